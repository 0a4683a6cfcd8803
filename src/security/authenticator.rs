//! Request authentication.
//!
//! The decision algorithm is pluggable; the server only cares whether a user
//! came back.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::{header, request::Parts};
use thiserror::Error;

use crate::config::schema::TokenConfig;
use crate::security::user::UserInfo;

#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("malformed credentials: {0}")]
    Malformed(String),

    #[error("authenticator unavailable: {0}")]
    Unavailable(String),
}

/// Extracts and validates credentials from a request.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// `Ok(None)` means no acceptable credentials were presented.
    async fn authenticate(&self, parts: &Parts) -> Result<Option<UserInfo>, AuthenticationError>;
}

/// Bearer tokens from a fixed table.
#[derive(Debug, Default, Clone)]
pub struct TokenAuthenticator {
    tokens: HashMap<String, UserInfo>,
}

impl TokenAuthenticator {
    pub fn new(tokens: HashMap<String, UserInfo>) -> Self {
        Self { tokens }
    }

    pub fn from_config(tokens: &[TokenConfig]) -> Self {
        let tokens = tokens
            .iter()
            .map(|t| {
                let user = UserInfo {
                    name: t.user.clone(),
                    uid: t.uid.clone(),
                    groups: t.groups.clone(),
                };
                (t.token.clone(), user)
            })
            .collect();
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, parts: &Parts) -> Result<Option<UserInfo>, AuthenticationError> {
        let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
            return Ok(None);
        };
        let value = value
            .to_str()
            .map_err(|_| AuthenticationError::Malformed("authorization header is not ASCII".into()))?;

        let Some((scheme, token)) = value.split_once(' ') else {
            return Ok(None);
        };
        if !scheme.eq_ignore_ascii_case("bearer") {
            return Ok(None);
        }
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthenticationError::Malformed("empty bearer token".into()));
        }

        Ok(self.tokens.get(token).cloned())
    }
}
