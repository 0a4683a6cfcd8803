//! Group/version installer.
//!
//! # Responsibilities
//! - Turn an `ApiGroupInfo` into routable REST endpoints, one version at a time
//! - Build discovery documents for the group
//! - Run admission on mutating calls and stamp self links on returned objects
//!
//! # Data Flow
//! ```text
//! ApiGroupInfo
//!     → overrides (drop disabled versions / resources)
//!     → ApiGroupVersion per version (codec, linker, lower-cased resources)
//!     → install_rest() → version Router
//!     → InstalledGroup { router, paths, discovery }
//! ```
//!
//! # Design Decisions
//! - Nothing is attached to the server here; the caller merges the result only
//!   when every group of a call installed cleanly
//! - Resource names are matched case-insensitively

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use futures_util::StreamExt;
use rand::Rng;
use serde_json::Value;
use thiserror::Error;

use crate::api::discovery::{ApiGroup, ApiResource, ApiResourceList, ApiVersions, GroupVersionForDiscovery};
use crate::api::group::{ApiGroupInfo, Codec, GroupVersion, SelfLinker, UnresolvedInterfaces};
use crate::api::rest::{DeleteOptions, ListOptions, RestStorage, Verb, WatchEvent};
use crate::api::status::ApiError;
use crate::config::schema::GroupVersionOverride;
use crate::http::context::RequestContext;
use crate::observability::metrics;
use crate::security::admission::{AdmissionAttributes, AdmissionControl, AdmissionError, Operation};

/// Largest request body accepted by create and update.
pub const MAX_REQUEST_BODY_BYTES: usize = 3 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("API group {0:?} is installed more than once")]
    DuplicateGroup(String),

    #[error("unable to set up API {group_version}: {source}")]
    MissingInterfaces {
        group_version: String,
        #[source]
        source: UnresolvedInterfaces,
    },

    #[error("path {0:?} is already registered")]
    DuplicatePath(String),

    #[error("API group {0:?} has no enabled versions")]
    NoEnabledVersions(String),

    #[error("only the legacy API group may be unnamed")]
    UnnamedGroup,

    #[error("path {0:?} must start with '/'")]
    InvalidPath(String),
}

/// Settings shared by every group version of a server.
#[derive(Clone)]
pub struct Installer {
    pub api_prefix: String,
    pub api_group_prefix: String,
    pub admission: Arc<dyn AdmissionControl>,
    pub min_request_timeout: Duration,
    pub overrides: HashMap<String, GroupVersionOverride>,
}

/// A group ready to be merged into the server.
pub struct InstalledGroup {
    pub name: String,
    pub is_legacy: bool,
    /// Root of the group's path space: `/api` or `/apis/<group>`.
    pub root: String,
    /// `apiVersion` for Status bodies produced under `root`.
    pub status_version: String,
    /// Every route template, for duplicate detection.
    pub paths: Vec<String>,
    /// Named-group discovery document; `None` for the legacy group.
    pub discovery: Option<ApiGroup>,
    pub router: Router,
}

impl Installer {
    fn root_for(&self, info: &ApiGroupInfo) -> String {
        if info.is_legacy_group {
            self.api_prefix.clone()
        } else {
            format!("{}/{}", self.api_group_prefix, info.name())
        }
    }

    fn override_for(&self, gv: &GroupVersion) -> Option<&GroupVersionOverride> {
        self.overrides.get(&gv.to_string())
    }

    /// Versions left after overrides, in declaration order.
    fn enabled_versions(&self, info: &ApiGroupInfo) -> Vec<GroupVersion> {
        info.group_meta
            .group_versions
            .iter()
            .filter(|gv| {
                let disabled = self.override_for(gv).is_some_and(|o| o.disable);
                if disabled {
                    tracing::info!(group_version = %gv, "API group version disabled by override");
                }
                !disabled
            })
            .cloned()
            .collect()
    }

    /// Build the routing object of a single version.
    pub fn group_version(&self, info: &ApiGroupInfo, gv: &GroupVersion) -> Result<ApiGroupVersion, InstallError> {
        let interfaces = info
            .group_meta
            .interfaces_for(gv)
            .map_err(|source| InstallError::MissingInterfaces {
                group_version: gv.to_string(),
                source,
            })?;

        let disabled_resources = self.override_for(gv).map(|o| &o.resource_overrides);
        let storage = info
            .versioned_resources
            .get(&gv.version)
            .into_iter()
            .flatten()
            .filter(|(resource, _)| {
                let enabled = disabled_resources
                    .and_then(|r| r.get(resource.as_str()))
                    .copied()
                    .unwrap_or(true);
                if !enabled {
                    tracing::info!(group_version = %gv, resource = %resource, "Resource disabled by override");
                }
                enabled
            })
            .map(|(resource, handler)| (resource.to_lowercase(), handler.clone()))
            .collect();

        let status_version = info
            .options_external_version
            .as_ref()
            .unwrap_or(&info.group_meta.group_version)
            .to_string();

        Ok(ApiGroupVersion {
            root: self.root_for(info),
            group_version: gv.clone(),
            storage,
            codec: interfaces.codec.clone(),
            linker: info.group_meta.self_linker.clone(),
            status_version,
            admission: self.admission.clone(),
            min_request_timeout: self.min_request_timeout,
        })
    }

    /// Install every enabled version of a group plus its discovery endpoint.
    pub fn install_group(&self, info: &ApiGroupInfo) -> Result<InstalledGroup, InstallError> {
        if !info.is_legacy_group && info.name().is_empty() {
            return Err(InstallError::UnnamedGroup);
        }
        let versions = self.enabled_versions(info);
        if versions.is_empty() {
            return Err(InstallError::NoEnabledVersions(info.name().to_string()));
        }

        let root = self.root_for(info);
        let mut router = Router::new();
        let mut paths = vec![root.clone()];

        for gv in &versions {
            let version = self.group_version(info, gv)?;
            paths.extend(version.route_paths());
            router = router.merge(version.install_rest());
        }

        let status_version = info
            .options_external_version
            .as_ref()
            .unwrap_or(&info.group_meta.group_version)
            .to_string();

        let discovery = if info.is_legacy_group {
            let doc = ApiVersions {
                versions: versions.iter().map(|gv| gv.version.clone()).collect(),
            };
            router = router.route(&root, get(move || async move { Json(doc) }));
            None
        } else {
            let preferred = versions
                .iter()
                .find(|gv| **gv == info.group_meta.group_version)
                .unwrap_or(&versions[0]);
            let doc = ApiGroup {
                name: info.name().to_string(),
                versions: versions.iter().map(GroupVersionForDiscovery::from).collect(),
                preferred_version: preferred.into(),
            };
            let served = doc.clone();
            router = router.route(&root, get(move || async move { Json(served) }));
            Some(doc)
        };

        tracing::info!(
            group = %info.name(),
            root = %root,
            versions = ?versions.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Installed API group"
        );

        Ok(InstalledGroup {
            name: info.name().to_string(),
            is_legacy: info.is_legacy_group,
            root,
            status_version,
            paths,
            discovery,
            router,
        })
    }
}

/// Routing object for one group version.
pub struct ApiGroupVersion {
    root: String,
    group_version: GroupVersion,
    /// Keyed by lower-cased resource name.
    storage: BTreeMap<String, Arc<dyn RestStorage>>,
    codec: Arc<dyn Codec>,
    linker: Arc<dyn SelfLinker>,
    status_version: String,
    admission: Arc<dyn AdmissionControl>,
    min_request_timeout: Duration,
}

impl ApiGroupVersion {
    pub fn group_version(&self) -> &GroupVersion {
        &self.group_version
    }

    /// `<root>/<version>`
    pub fn prefix(&self) -> String {
        format!("{}/{}", self.root, self.group_version.version)
    }

    pub fn resource_names(&self) -> impl Iterator<Item = &str> {
        self.storage.keys().map(String::as_str)
    }

    pub fn resource_list(&self) -> ApiResourceList {
        ApiResourceList {
            group_version: self.group_version.to_string(),
            resources: self
                .storage
                .iter()
                .map(|(name, handler)| ApiResource {
                    name: name.clone(),
                    namespaced: handler.namespaced(),
                })
                .collect(),
        }
    }

    pub fn route_paths(&self) -> Vec<String> {
        let prefix = self.prefix();
        vec![
            prefix.clone(),
            format!("{prefix}/{{resource}}"),
            format!("{prefix}/{{resource}}/{{name}}"),
            format!("{prefix}/watch/{{resource}}"),
        ]
    }

    /// Register every resource route of this version.
    pub fn install_rest(self) -> Router {
        let prefix = self.prefix();
        let resources = self.resource_list();
        Router::new()
            .route(&prefix, get(move || async move { Json(resources) }))
            .route(&format!("{prefix}/{{resource}}"), any(collection_handler))
            .route(&format!("{prefix}/{{resource}}/{{name}}"), any(item_handler))
            .route(&format!("{prefix}/watch/{{resource}}"), any(watch_handler))
            .with_state(Arc::new(self))
    }

    fn storage_for(&self, resource: &str) -> Result<(String, &Arc<dyn RestStorage>), ApiError> {
        let key = resource.to_lowercase();
        match self.storage.get(&key) {
            Some(handler) => Ok((key, handler)),
            None => Err(ApiError::RouteNotFound(format!(
                "the server could not find the requested resource {resource:?} in {}",
                self.group_version
            ))),
        }
    }

    fn require(&self, handler: &Arc<dyn RestStorage>, resource: &str, verb: Verb) -> Result<(), ApiError> {
        if handler.verbs().contains(&verb) {
            Ok(())
        } else {
            Err(ApiError::MethodNotSupported {
                resource: resource.to_string(),
                verb: verb.to_string(),
            })
        }
    }

    fn self_link(&self, resource: &str, name: Option<&str>) -> String {
        match name {
            Some(name) => format!("{}/{resource}/{name}", self.prefix()),
            None => format!("{}/{resource}", self.prefix()),
        }
    }

    /// Link the object itself, or for a list, the list and every named item.
    fn link(&self, resource: &str, name: Option<&str>, object: &mut Value) {
        self.linker.set_self_link(object, &self.self_link(resource, name));
        if name.is_some() {
            return;
        }
        if let Some(items) = object.get_mut("items").and_then(Value::as_array_mut) {
            for item in items {
                let item_name = item
                    .pointer("/metadata/name")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                if let Some(item_name) = item_name {
                    self.linker.set_self_link(item, &self.self_link(resource, Some(&item_name)));
                }
            }
        }
    }

    fn encode(&self, code: StatusCode, object: &Value) -> Result<Response, ApiError> {
        let body = self.codec.encode(object).map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok((code, [(header::CONTENT_TYPE, self.codec.content_type())], body).into_response())
    }

    async fn decode(&self, body: Body) -> Result<Value, ApiError> {
        let bytes = axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES)
            .await
            .map_err(|e| ApiError::BadRequest(format!("unable to read request body: {e}")))?;
        self.codec.decode(&bytes).map_err(|e| ApiError::BadRequest(e.to_string()))
    }

    fn admit(
        &self,
        ctx: &RequestContext,
        operation: Operation,
        resource: &str,
        name: &str,
        object: Option<Value>,
    ) -> Result<Option<Value>, ApiError> {
        let mut attributes = AdmissionAttributes {
            operation,
            group: self.group_version.group.clone(),
            version: self.group_version.version.clone(),
            resource: resource.to_string(),
            name: name.to_string(),
            user: ctx.user().cloned(),
            object,
        };
        self.admission.admit(&mut attributes).map_err(|e| match e {
            AdmissionError::Denied { .. } => ApiError::Forbidden(e.to_string()),
        })?;
        Ok(attributes.object)
    }

    /// Watch duration: the client's choice, else a jittered multiple of the minimum.
    fn watch_timeout(&self, options: &ListOptions) -> Duration {
        if let Some(secs) = options.timeout_seconds {
            return Duration::from_secs(secs);
        }
        let min = self.min_request_timeout.as_secs_f64();
        if min <= 0.0 {
            return self.min_request_timeout;
        }
        Duration::from_secs_f64(min * (1.0 + rand::thread_rng().gen_range(0.0..1.0)))
    }

    async fn serve_watch(
        &self,
        ctx: RequestContext,
        handler: &Arc<dyn RestStorage>,
        options: ListOptions,
    ) -> Result<Response, ApiError> {
        let events = handler.watch(&ctx, &options).await?;
        let timeout = self.watch_timeout(&options);
        let cancellation = ctx.cancellation();
        let stop = async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {}
                _ = cancellation.cancelled_owned() => {}
            }
        };

        let codec = self.codec.clone();
        let body = events.take_until(stop).filter_map(move |event: WatchEvent| {
            let line = serde_json::to_value(&event)
                .map_err(|e| e.to_string())
                .and_then(|value| codec.encode(&value).map_err(|e| e.to_string()));
            let chunk = match line {
                Ok(mut line) => {
                    line.push(b'\n');
                    Some(Ok::<_, std::convert::Infallible>(Bytes::from(line)))
                }
                Err(error) => {
                    tracing::warn!(error = %error, "Dropping watch event that failed to encode");
                    None
                }
            };
            std::future::ready(chunk)
        });

        Ok((
            StatusCode::OK,
            [(header::CONTENT_TYPE, self.codec.content_type())],
            Body::from_stream(body),
        )
            .into_response())
    }

    async fn collection(&self, resource: &str, request: Request) -> Result<Response, ApiError> {
        let (key, handler) = self.storage_for(resource)?;
        let ctx = request_context(&request);
        let options = list_options(&request)?;
        let method = request.method().clone();

        match method {
            Method::GET if options.watch => {
                self.require(handler, &key, Verb::Watch)?;
                self.serve_watch(ctx, handler, options).await
            }
            Method::GET => {
                self.require(handler, &key, Verb::List)?;
                let mut list = handler.list(&ctx, &options).await.map_err(|e| with_resource(e, &key))?;
                self.link(&key, None, &mut list);
                self.encode(StatusCode::OK, &list)
            }
            Method::POST => {
                self.require(handler, &key, Verb::Create)?;
                let object = self.decode(request.into_body()).await?;
                let name = object
                    .pointer("/metadata/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let object = self
                    .admit(&ctx, Operation::Create, &key, &name, Some(object))?
                    .unwrap_or(Value::Null);
                let mut created = handler.create(&ctx, object).await.map_err(|e| with_resource(e, &key))?;
                let name = created
                    .pointer("/metadata/name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or(name);
                self.link(&key, Some(&name), &mut created);
                self.encode(StatusCode::CREATED, &created)
            }
            method => Err(ApiError::MethodNotSupported {
                resource: key,
                verb: method.to_string(),
            }),
        }
    }

    async fn item(&self, resource: &str, name: &str, request: Request) -> Result<Response, ApiError> {
        let (key, handler) = self.storage_for(resource)?;
        let ctx = request_context(&request);
        let method = request.method().clone();

        match method {
            Method::GET => {
                self.require(handler, &key, Verb::Get)?;
                let mut object = handler.get(&ctx, name).await.map_err(|e| with_resource(e, &key))?;
                self.link(&key, Some(name), &mut object);
                self.encode(StatusCode::OK, &object)
            }
            Method::PUT => {
                self.require(handler, &key, Verb::Update)?;
                let object = self.decode(request.into_body()).await?;
                let object = self
                    .admit(&ctx, Operation::Update, &key, name, Some(object))?
                    .unwrap_or(Value::Null);
                let mut updated = handler.update(&ctx, name, object).await.map_err(|e| with_resource(e, &key))?;
                self.link(&key, Some(name), &mut updated);
                self.encode(StatusCode::OK, &updated)
            }
            Method::DELETE => {
                self.require(handler, &key, Verb::Delete)?;
                let bytes = axum::body::to_bytes(request.into_body(), MAX_REQUEST_BODY_BYTES)
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("unable to read request body: {e}")))?;
                let options: DeleteOptions = if bytes.is_empty() {
                    DeleteOptions::default()
                } else {
                    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(e.to_string()))?
                };
                self.admit(&ctx, Operation::Delete, &key, name, None)?;
                let result = handler.delete(&ctx, name, &options).await.map_err(|e| with_resource(e, &key))?;
                self.encode(StatusCode::OK, &result)
            }
            method => Err(ApiError::MethodNotSupported {
                resource: key,
                verb: method.to_string(),
            }),
        }
    }

    async fn watch(
        &self,
        resource: &str,
        method: Method,
        ctx: RequestContext,
        options: Result<ListOptions, ApiError>,
    ) -> Result<Response, ApiError> {
        if method != Method::GET {
            return Err(ApiError::MethodNotSupported {
                resource: resource.to_lowercase(),
                verb: method.to_string(),
            });
        }
        let (key, handler) = self.storage_for(resource)?;
        self.require(handler, &key, Verb::Watch)?;
        self.serve_watch(ctx, handler, options?).await
    }

    fn respond(&self, verb: &str, resource: &str, started: Instant, result: Result<Response, ApiError>) -> Response {
        let response = match result {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(
                    group_version = %self.group_version,
                    resource = %resource,
                    error = %error,
                    "Request rejected"
                );
                error.into_response_for(&self.status_version)
            }
        };
        metrics::record_request(verb, resource, response.status().as_u16(), started);
        response
    }
}

/// Fill in the resource of errors raised by a handler's default verb impls.
fn with_resource(error: ApiError, resource: &str) -> ApiError {
    match error {
        ApiError::MethodNotSupported { resource: r, verb } if r.is_empty() => ApiError::MethodNotSupported {
            resource: resource.to_string(),
            verb,
        },
        other => other,
    }
}

fn request_context(request: &Request) -> RequestContext {
    request
        .extensions()
        .get::<RequestContext>()
        .cloned()
        .unwrap_or_default()
}

fn list_options(request: &Request) -> Result<ListOptions, ApiError> {
    Query::<ListOptions>::try_from_uri(request.uri())
        .map(|Query(options)| options)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

async fn collection_handler(
    State(version): State<Arc<ApiGroupVersion>>,
    Path(resource): Path<String>,
    request: Request,
) -> Response {
    let started = Instant::now();
    let verb = request.method().to_string();
    let result = version.collection(&resource, request).await;
    version.respond(&verb, &resource, started, result)
}

async fn item_handler(
    State(version): State<Arc<ApiGroupVersion>>,
    Path((resource, name)): Path<(String, String)>,
    request: Request,
) -> Response {
    let started = Instant::now();
    let verb = request.method().to_string();
    let result = version.item(&resource, &name, request).await;
    version.respond(&verb, &resource, started, result)
}

async fn watch_handler(
    State(version): State<Arc<ApiGroupVersion>>,
    Path(resource): Path<String>,
    request: Request,
) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    let ctx = request_context(&request);
    let options = list_options(&request);
    let result = version.watch(&resource, method, ctx, options).await;
    version.respond("WATCH", &resource, started, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::group::GroupMeta;
    use crate::security::admission::AlwaysAdmit;
    use async_trait::async_trait;
    use serde_json::json;
    use tower::ServiceExt;

    struct Things;

    #[async_trait]
    impl RestStorage for Things {
        fn verbs(&self) -> &[Verb] {
            &[Verb::List, Verb::Get]
        }

        async fn list(&self, _: &RequestContext, _: &ListOptions) -> Result<Value, ApiError> {
            Ok(json!({"items": [{"metadata": {"name": "a"}}]}))
        }

        async fn get(&self, _: &RequestContext, name: &str) -> Result<Value, ApiError> {
            Ok(json!({"metadata": {"name": name}}))
        }
    }

    fn installer() -> Installer {
        Installer {
            api_prefix: "/api".into(),
            api_group_prefix: "/apis".into(),
            admission: Arc::new(AlwaysAdmit),
            min_request_timeout: Duration::from_secs(1800),
            overrides: HashMap::new(),
        }
    }

    fn things_group() -> ApiGroupInfo {
        ApiGroupInfo::new(GroupMeta::json("things", &["v1"])).with_resource("v1", "Things", Arc::new(Things))
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn resources_are_lower_cased_and_linked() {
        let installed = installer().install_group(&things_group()).unwrap();
        let response = installed
            .router
            .oneshot(axum::http::Request::get("/apis/things/v1/THINGS").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["metadata"]["selfLink"], "/apis/things/v1/things");
        assert_eq!(body["items"][0]["metadata"]["selfLink"], "/apis/things/v1/things/a");
    }

    #[tokio::test]
    async fn undeclared_verb_is_method_not_allowed() {
        let installed = installer().install_group(&things_group()).unwrap();
        let response = installed
            .router
            .oneshot(axum::http::Request::post("/apis/things/v1/things").body(Body::from("{}")).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        let body = body_json(response).await;
        assert_eq!(body["reason"], "MethodNotAllowed");
        assert_eq!(body["apiVersion"], "things/v1");
    }

    #[tokio::test]
    async fn unknown_resource_is_structured_not_found() {
        let installed = installer().install_group(&things_group()).unwrap();
        let response = installed
            .router
            .oneshot(axum::http::Request::get("/apis/things/v1/gadgets").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["kind"], "Status");
    }

    #[test]
    fn disabled_resource_is_dropped() {
        let mut installer = installer();
        installer.overrides.insert(
            "things/v1".into(),
            GroupVersionOverride {
                disable: false,
                resource_overrides: [("Things".to_string(), false)].into(),
            },
        );
        let info = things_group();
        let version = installer.group_version(&info, &GroupVersion::new("things", "v1")).unwrap();
        assert_eq!(version.resource_names().count(), 0);
    }

    #[test]
    fn watch_timeout_is_jittered_within_bounds() {
        let info = things_group();
        let version = installer().group_version(&info, &GroupVersion::new("things", "v1")).unwrap();
        for _ in 0..32 {
            let timeout = version.watch_timeout(&ListOptions::default());
            assert!(timeout >= Duration::from_secs(1800) && timeout < Duration::from_secs(3600));
        }
        let explicit = ListOptions {
            timeout_seconds: Some(5),
            ..Default::default()
        };
        assert_eq!(version.watch_timeout(&explicit), Duration::from_secs(5));
    }
}
