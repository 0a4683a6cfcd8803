//! The capability set every resource handler implements.
//!
//! The installer is polymorphic over this trait, never over concrete
//! resource types. Handlers declare which verbs they support; every other
//! verb answers `405` with a `Status` body before the handler is reached.

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::status::ApiError;
use crate::http::context::RequestContext;

/// REST verbs a resource handler may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    List,
    Get,
    Create,
    Update,
    Delete,
    Watch,
}

impl Verb {
    pub const ALL: [Verb; 6] = [Verb::List, Verb::Get, Verb::Create, Verb::Update, Verb::Delete, Verb::Watch];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::List => "list",
            Verb::Get => "get",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Delete => "delete",
            Verb::Watch => "watch",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query parameters accepted by list and watch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListOptions {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
    pub watch: bool,
    pub resource_version: Option<String>,
    /// Overrides the server-chosen watch duration.
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeleteOptions {
    pub grace_period_seconds: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Error,
}

/// One change notification on a watch stream.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub object: Value,
}

impl WatchEvent {
    pub fn new(event_type: EventType, object: Value) -> Self {
        Self { event_type, object }
    }
}

pub type WatchStream = BoxStream<'static, WatchEvent>;

/// A resource handler. Objects travel as JSON values; conversion between
/// versions is the handler's business.
#[async_trait]
pub trait RestStorage: Send + Sync {
    /// Verbs this handler serves.
    fn verbs(&self) -> &[Verb];

    fn namespaced(&self) -> bool {
        false
    }

    async fn list(&self, _ctx: &RequestContext, _options: &ListOptions) -> Result<Value, ApiError> {
        Err(unsupported(Verb::List))
    }

    async fn get(&self, _ctx: &RequestContext, _name: &str) -> Result<Value, ApiError> {
        Err(unsupported(Verb::Get))
    }

    async fn create(&self, _ctx: &RequestContext, _object: Value) -> Result<Value, ApiError> {
        Err(unsupported(Verb::Create))
    }

    async fn update(&self, _ctx: &RequestContext, _name: &str, _object: Value) -> Result<Value, ApiError> {
        Err(unsupported(Verb::Update))
    }

    async fn delete(&self, _ctx: &RequestContext, _name: &str, _options: &DeleteOptions) -> Result<Value, ApiError> {
        Err(unsupported(Verb::Delete))
    }

    async fn watch(&self, _ctx: &RequestContext, _options: &ListOptions) -> Result<WatchStream, ApiError> {
        Err(unsupported(Verb::Watch))
    }
}

fn unsupported(verb: Verb) -> ApiError {
    ApiError::MethodNotSupported {
        resource: String::new(),
        verb: verb.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_options_from_query() {
        let options: ListOptions = serde_json::from_value(serde_json::json!({
            "watch": true,
            "timeoutSeconds": 5,
            "labelSelector": "app=web"
        }))
        .unwrap();
        assert!(options.watch);
        assert_eq!(options.timeout_seconds, Some(5));
        assert_eq!(options.label_selector.as_deref(), Some("app=web"));
    }

    #[test]
    fn watch_event_wire_shape() {
        let event = WatchEvent::new(EventType::Added, serde_json::json!({"metadata": {"name": "w1"}}));
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["type"], "ADDED");
        assert_eq!(wire["object"]["metadata"]["name"], "w1");
    }
}
