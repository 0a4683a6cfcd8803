//! Admission control.
//!
//! Runs after authorization, right before a mutating call reaches its
//! resource handler. Plugins may rewrite the object or reject the request.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::config::schema::AdmissionPlugin;
use crate::security::user::UserInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("{operation:?} of {resource} denied: {reason}")]
    Denied {
        operation: Operation,
        resource: String,
        reason: String,
    },
}

/// Everything a plugin gets to see, including the (mutable) object.
#[derive(Debug, Clone)]
pub struct AdmissionAttributes {
    pub operation: Operation,
    pub group: String,
    pub version: String,
    pub resource: String,
    pub name: String,
    pub user: Option<UserInfo>,
    pub object: Option<Value>,
}

impl AdmissionAttributes {
    pub fn deny(&self, reason: impl Into<String>) -> AdmissionError {
        AdmissionError::Denied {
            operation: self.operation,
            resource: self.resource.clone(),
            reason: reason.into(),
        }
    }
}

pub trait AdmissionControl: Send + Sync {
    fn admit(&self, attributes: &mut AdmissionAttributes) -> Result<(), AdmissionError>;

    /// Whether the plugin cares about the operation at all.
    fn handles(&self, _operation: Operation) -> bool {
        true
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAdmit;

impl AdmissionControl for AlwaysAdmit {
    fn admit(&self, _: &mut AdmissionAttributes) -> Result<(), AdmissionError> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysDeny;

impl AdmissionControl for AlwaysDeny {
    fn admit(&self, attributes: &mut AdmissionAttributes) -> Result<(), AdmissionError> {
        Err(attributes.deny("admission control is denying all modifications"))
    }
}

/// Runs plugins in order; the first rejection wins.
#[derive(Default, Clone)]
pub struct AdmissionChain {
    plugins: Vec<Arc<dyn AdmissionControl>>,
}

impl AdmissionChain {
    pub fn new(plugins: Vec<Arc<dyn AdmissionControl>>) -> Self {
        Self { plugins }
    }

    pub fn from_plugins(names: &[AdmissionPlugin]) -> Self {
        let plugins = names
            .iter()
            .map(|name| -> Arc<dyn AdmissionControl> {
                match name {
                    AdmissionPlugin::AlwaysAdmit => Arc::new(AlwaysAdmit),
                    AdmissionPlugin::AlwaysDeny => Arc::new(AlwaysDeny),
                }
            })
            .collect();
        Self { plugins }
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

impl AdmissionControl for AdmissionChain {
    fn admit(&self, attributes: &mut AdmissionAttributes) -> Result<(), AdmissionError> {
        for plugin in &self.plugins {
            if plugin.handles(attributes.operation) {
                plugin.admit(attributes)?;
            }
        }
        Ok(())
    }
}
