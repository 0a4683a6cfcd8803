//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use futures_util::StreamExt;
use generic_apiserver::api::{
    ApiError, ApiGroupInfo, DeleteOptions, EventType, GroupMeta, ListOptions, RestStorage, Verb, WatchEvent,
    WatchStream,
};
use generic_apiserver::config::ServerOptions;
use generic_apiserver::http::RequestContext;
use generic_apiserver::{Config, GenericApiServer};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tower::ServiceExt;

/// In-memory resource handler with a broadcast watch.
pub struct MemoryStorage {
    kind: String,
    verbs: Vec<Verb>,
    objects: Mutex<BTreeMap<String, Value>>,
    events: broadcast::Sender<WatchEvent>,
}

impl MemoryStorage {
    pub fn new(kind: &str) -> Arc<Self> {
        Self::with_verbs(kind, &Verb::ALL)
    }

    pub fn with_verbs(kind: &str, verbs: &[Verb]) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            kind: kind.to_string(),
            verbs: verbs.to_vec(),
            objects: Mutex::new(BTreeMap::new()),
            events,
        })
    }

    pub fn insert(&self, name: &str) {
        let object = json!({"kind": self.kind, "metadata": {"name": name}});
        self.objects.lock().unwrap().insert(name.to_string(), object.clone());
        let _ = self.events.send(WatchEvent::new(EventType::Added, object));
    }

    pub fn watchers(&self) -> usize {
        self.events.receiver_count()
    }
}

#[async_trait]
impl RestStorage for MemoryStorage {
    fn verbs(&self) -> &[Verb] {
        &self.verbs
    }

    fn namespaced(&self) -> bool {
        true
    }

    async fn list(&self, _ctx: &RequestContext, _options: &ListOptions) -> Result<Value, ApiError> {
        let items: Vec<Value> = self.objects.lock().unwrap().values().cloned().collect();
        Ok(json!({"kind": format!("{}List", self.kind), "metadata": {}, "items": items}))
    }

    async fn get(&self, _ctx: &RequestContext, name: &str) -> Result<Value, ApiError> {
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ApiError::NotFound {
                resource: self.kind.to_lowercase(),
                name: name.to_string(),
            })
    }

    async fn create(&self, ctx: &RequestContext, mut object: Value) -> Result<Value, ApiError> {
        let name = object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Invalid("metadata.name is required".into()))?
            .to_string();
        if let Some(user) = ctx.user() {
            object["metadata"]["annotations"]["createdBy"] = json!(user.name);
        }
        self.objects.lock().unwrap().insert(name, object.clone());
        let _ = self.events.send(WatchEvent::new(EventType::Added, object.clone()));
        Ok(object)
    }

    async fn delete(&self, _ctx: &RequestContext, name: &str, _options: &DeleteOptions) -> Result<Value, ApiError> {
        let removed = self.objects.lock().unwrap().remove(name);
        match removed {
            Some(object) => {
                let _ = self.events.send(WatchEvent::new(EventType::Deleted, object));
                Ok(json!({"kind": "Status", "status": "Success"}))
            }
            None => Err(ApiError::NotFound {
                resource: self.kind.to_lowercase(),
                name: name.to_string(),
            }),
        }
    }

    async fn watch(&self, _ctx: &RequestContext, _options: &ListOptions) -> Result<WatchStream, ApiError> {
        let stream = futures_util::stream::unfold(self.events.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }
}

/// `apps/v1` with a `widgets` resource.
pub fn apps_group(widgets: Arc<MemoryStorage>) -> ApiGroupInfo {
    ApiGroupInfo::new(GroupMeta::json("apps", &["v1"])).with_resource("v1", "widgets", widgets)
}

/// Legacy `v1` with a `pods` resource.
pub fn legacy_group(pods: Arc<MemoryStorage>) -> ApiGroupInfo {
    ApiGroupInfo::legacy(GroupMeta::json("", &["v1"])).with_resource("v1", "pods", pods)
}

/// Options for servers that never bind a port.
pub fn test_options() -> ServerOptions {
    let mut options = ServerOptions::default();
    options.serving.secure_port = 0;
    options
}

pub fn server(config: Config) -> GenericApiServer {
    GenericApiServer::new(config).unwrap()
}

pub fn default_server() -> GenericApiServer {
    server(Config::new(test_options()))
}

pub async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

pub async fn get(app: Router, path: &str) -> (StatusCode, Value) {
    send(app, Request::get(path).body(Body::empty()).unwrap()).await
}
