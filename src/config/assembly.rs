//! Server assembly configuration.
//!
//! The validated options plus the collaborators the server calls into.
//! Consumed whole by `GenericApiServer::new`; nothing here changes afterwards.

use std::sync::Arc;

use crate::config::schema::{AuthorizationMode, ServerOptions};
use crate::http::context::RequestContextMapper;
use crate::security::admission::{AdmissionChain, AdmissionControl};
use crate::security::authenticator::{Authenticator, TokenAuthenticator};
use crate::security::authorizer::{AlwaysAllow, AlwaysDeny, Authorizer};
use crate::storage::StorageDestinations;

pub struct Config {
    pub options: ServerOptions,
    pub storage: StorageDestinations,
    /// Authentication is skipped on the trusted graph when absent.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub authorizer: Arc<dyn Authorizer>,
    pub admission: Arc<dyn AdmissionControl>,
    pub context_mapper: Arc<RequestContextMapper>,
}

impl Config {
    /// Options with permissive collaborators: no authentication, allow everything,
    /// admit everything.
    pub fn new(options: ServerOptions) -> Self {
        let storage = StorageDestinations::from_config(&options.storage);
        Self {
            options,
            storage,
            authenticator: None,
            authorizer: Arc::new(AlwaysAllow),
            admission: Arc::new(AdmissionChain::default()),
            context_mapper: Arc::new(RequestContextMapper::new()),
        }
    }

    /// Options with the stock collaborators they describe.
    pub fn from_options(options: ServerOptions) -> Self {
        let security = &options.security;

        let tokens = TokenAuthenticator::from_config(&security.tokens);
        let authenticator: Option<Arc<dyn Authenticator>> = if tokens.is_empty() {
            None
        } else {
            Some(Arc::new(tokens))
        };

        let authorizer: Arc<dyn Authorizer> = match security.authorization_mode {
            AuthorizationMode::AlwaysAllow => Arc::new(AlwaysAllow),
            AuthorizationMode::AlwaysDeny => Arc::new(AlwaysDeny),
        };

        let admission = Arc::new(AdmissionChain::from_plugins(&security.admission_control));

        tracing::debug!(
            authentication = authenticator.is_some(),
            authorization = ?security.authorization_mode,
            admission_plugins = admission.len(),
            "Assembled security collaborators"
        );

        Self {
            authenticator,
            authorizer,
            admission,
            ..Self::new(options)
        }
    }

    pub fn with_storage(mut self, storage: StorageDestinations) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_admission(mut self, admission: Arc<dyn AdmissionControl>) -> Self {
        self.admission = admission;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(ServerOptions::default())
    }
}
