//! Request authorization.

use thiserror::Error;

use crate::security::user::UserInfo;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("{0}")]
    Denied(String),
}

/// What is being requested, and by whom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    pub user: Option<UserInfo>,
    pub verb: String,
    pub read_only: bool,
    pub is_resource_request: bool,
    pub path: String,
    pub api_group: String,
    pub api_version: String,
    pub namespace: String,
    pub resource: String,
    pub subresource: String,
    pub name: String,
}

impl Attributes {
    pub fn user_name(&self) -> &str {
        self.user.as_ref().map(|u| u.name.as_str()).unwrap_or("")
    }
}

/// Policy check run after authentication.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, attributes: &Attributes) -> Result<(), AuthorizationError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAllow;

impl Authorizer for AlwaysAllow {
    fn authorize(&self, _: &Attributes) -> Result<(), AuthorizationError> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysDeny;

impl Authorizer for AlwaysDeny {
    fn authorize(&self, _: &Attributes) -> Result<(), AuthorizationError> {
        Err(AuthorizationError::Denied("Everything is forbidden.".into()))
    }
}
