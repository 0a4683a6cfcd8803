//! API server assembly.
//!
//! # Responsibilities
//! - Fill cluster defaults once and compile CORS and long-running patterns
//! - Build the middleware chain and the base router
//! - Install API groups atomically
//! - Register extra authenticated paths for embedders
//! - Expose the open and trusted handler graphs to the listener runtime
//!
//! # Data Flow
//! ```text
//! Config
//!     → GenericApiServer::new (defaults, chain, optional subsystems)
//!     → install_api_groups / handle_with_auth (assembly phase, &mut self)
//!     → handler() / insecure_handler() (graphs over the current routes)
//!     → run(self) (server is consumed; nothing changes afterwards)
//! ```
//!
//! # Design Decisions
//! - Mutation needs `&mut self`, serving consumes `self`: the freeze after
//!   assembly is enforced by ownership
//! - Every path is recorded before it is routed, so conflicts surface as
//!   `InstallError` instead of a router panic

use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::handler::Handler;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use ipnet::IpNet;
use tower::Service;
use tower_http::services::ServeDir;

use crate::api::discovery::{ApiGroup, ApiGroupList, RootPaths};
use crate::api::group::ApiGroupInfo;
use crate::api::installer::{InstallError, InstalledGroup, Installer};
use crate::api::status::{ApiError, DEFAULT_STATUS_VERSION};
use crate::config::assembly::Config;
use crate::config::loader::ConfigError;
use crate::config::network::{ClusterInfo, PortRange};
use crate::config::schema::{EndpointPort, ServerOptions, ServicePort};
use crate::config::validation::validate_config;
use crate::health::active::StorageHealthChecker;
use crate::http::chain::HandlerChain;
use crate::http::context::RequestContextMapper;
use crate::http::middleware::{AuthnState, AuthzState, CorsPolicy, LongRunningCheck};
use crate::http::request::RequestInfoResolver;
use crate::lifecycle::startup;
use crate::net::listener::ServeError;
use crate::net::tls::{TlsSettings, SERVICE_DNS_NAMES};
use crate::net::transport::build_proxy_transport;
use crate::security::admission::AdmissionControl;
use crate::storage::{StorageDecorator, StorageDestinations};

const HEALTHZ_PATH: &str = "/healthz";
const STORAGE_HEALTHZ_PATH: &str = "/healthz/storage";
const LOGS_PATH: &str = "/logs";
const PROFILING_PATH: &str = "/debug/pprof/";

pub struct GenericApiServer {
    options: Arc<ServerOptions>,
    cluster: ClusterInfo,
    storage: Arc<StorageDestinations>,
    admission: Arc<dyn AdmissionControl>,
    context_mapper: Arc<RequestContextMapper>,
    chain: HandlerChain,
    long_running: Arc<LongRunningCheck>,
    installer: Installer,
    proxy_transport: Option<reqwest::Client>,
    health: StorageHealthChecker,
    started: Instant,

    /// Routes of installed groups.
    api_routes: Router,
    /// Routes added through `handle_with_auth`.
    extra_routes: Router,
    /// Every route template, for conflict detection.
    paths: BTreeSet<String>,
    /// Paths listed by the index.
    root_paths: BTreeSet<String>,
    /// `(is_legacy, name)` of every installed group.
    installed_groups: BTreeSet<(bool, String)>,
    /// Discovery documents of named groups, by name.
    group_discovery: BTreeMap<String, ApiGroup>,
    /// Group roots and the `apiVersion` of Status bodies under them.
    error_roots: Vec<(String, String)>,
}

impl GenericApiServer {
    /// Assemble a server. Configuration errors are returned, never fatal here.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let Config {
            options,
            storage,
            authenticator,
            authorizer,
            admission,
            context_mapper,
        } = config;

        validate_config(&options).map_err(ConfigError::Validation)?;
        let cluster = options.cluster.complete()?;

        let cors = CorsPolicy::compile(&options.security.cors_allowed_origins).map_err(|source| ConfigError::Cors {
            origins: options.security.cors_allowed_origins.clone(),
            source,
        })?;
        let long_running =
            Arc::new(LongRunningCheck::new(&options.serving.long_running_request_re).map_err(ConfigError::LongRunning)?);

        let resolver = Arc::new(RequestInfoResolver::new(&options.api.api_prefix, &options.api.api_group_prefix));
        let authz = AuthzState { authorizer, resolver };
        let authn = authenticator.map(|authenticator| AuthnState {
            authenticator,
            mapper: context_mapper.clone(),
            supports_basic_auth: options.security.supports_basic_auth,
        });
        let chain = HandlerChain::new(cors, authz, authn, context_mapper.clone());

        let proxy_transport = options.proxy.as_ref().map(build_proxy_transport).transpose()?;

        let installer = Installer {
            api_prefix: options.api.api_prefix.clone(),
            api_group_prefix: options.api.api_group_prefix.clone(),
            admission: admission.clone(),
            min_request_timeout: Duration::from_secs(options.api.min_request_timeout_secs),
            overrides: options.api.group_version_overrides.clone(),
        };

        let mut paths = BTreeSet::new();
        paths.insert(options.api.api_group_prefix.clone());
        paths.insert(HEALTHZ_PATH.to_string());
        paths.insert(STORAGE_HEALTHZ_PATH.to_string());
        if options.features.enable_index {
            paths.insert("/".to_string());
        }
        if options.features.enable_logs_support {
            paths.insert(LOGS_PATH.to_string());
        }
        if options.features.enable_profiling {
            paths.insert(PROFILING_PATH.to_string());
        }
        let root_paths = paths.iter().filter(|p| p.as_str() != "/").cloned().collect();

        tracing::info!(
            service_cluster_ip_range = %cluster.service_cluster_ip_range,
            service_read_write_ip = %cluster.service_read_write_ip,
            node_ports = %cluster.service_node_port_range,
            master_count = cluster.master_count,
            authentication = chain.trusted_stages().contains(&"authentication"),
            "API server assembled"
        );

        Ok(Self {
            health: StorageHealthChecker::new(options.health_check.clone()),
            options: Arc::new(options),
            cluster,
            storage: Arc::new(storage),
            admission,
            context_mapper,
            chain,
            long_running,
            installer,
            proxy_transport,
            started: Instant::now(),
            api_routes: Router::new(),
            extra_routes: Router::new(),
            paths,
            root_paths,
            installed_groups: BTreeSet::new(),
            group_discovery: BTreeMap::new(),
            error_roots: Vec::new(),
        })
    }

    /// Install resource groups. Either every group of the call becomes
    /// reachable or none does.
    pub fn install_api_groups(&mut self, groups: &[ApiGroupInfo]) -> Result<(), InstallError> {
        let mut seen = BTreeSet::new();
        for info in groups {
            let key = (info.is_legacy_group, info.name().to_string());
            if self.installed_groups.contains(&key) || !seen.insert(key) {
                return Err(InstallError::DuplicateGroup(info.name().to_string()));
            }
        }

        let mut staged: Vec<InstalledGroup> = Vec::with_capacity(groups.len());
        let mut new_paths = BTreeSet::new();
        for info in groups {
            let installed = self.installer.install_group(info)?;
            if let Some(taken) = self
                .paths
                .iter()
                .chain(&new_paths)
                .find(|path| is_under(path, &installed.root))
            {
                return Err(InstallError::DuplicatePath(taken.clone()));
            }
            for path in &installed.paths {
                if staged.iter().any(|group| is_under(path, &group.root)) {
                    return Err(InstallError::DuplicatePath(path.clone()));
                }
                if self.paths.contains(path) || !new_paths.insert(path.clone()) {
                    return Err(InstallError::DuplicatePath(path.clone()));
                }
            }
            staged.push(installed);
        }

        for group in staged {
            self.api_routes = std::mem::take(&mut self.api_routes).merge(group.router);
            self.root_paths
                .extend(group.paths.iter().filter(|p| !p.contains('{')).cloned());
            self.installed_groups.insert((group.is_legacy, group.name.clone()));
            if let Some(discovery) = group.discovery {
                self.group_discovery.insert(group.name, discovery);
            }
            self.error_roots.push((group.root, group.status_version));
        }
        self.paths.extend(new_paths);
        // Longest root first, so the most specific group answers.
        self.error_roots.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Ok(())
    }

    /// Roots whose whole subtree is routed by the server itself.
    fn claimed_roots(&self) -> impl Iterator<Item = &str> {
        let logs = self.options.features.enable_logs_support.then_some(LOGS_PATH);
        self.error_roots.iter().map(|(root, _)| root.as_str()).chain(logs)
    }

    fn register_path(&mut self, path: &str) -> Result<(), InstallError> {
        // Extra paths are literal: no parameters or wildcards.
        if !path.starts_with('/') || path.contains(['{', '}', '*']) {
            return Err(InstallError::InvalidPath(path.to_string()));
        }
        let claimed = self.claimed_roots().any(|root| is_under(path, root));
        if claimed || !self.paths.insert(path.to_string()) {
            return Err(InstallError::DuplicatePath(path.to_string()));
        }
        self.root_paths.insert(path.to_string());
        Ok(())
    }

    /// Serve `service` at `path` behind the trusted graph's authentication and
    /// authorization. Also reachable on the insecure listener.
    pub fn handle_with_auth<S>(&mut self, path: &str, service: S) -> Result<(), InstallError>
    where
        S: Service<Request, Error = Infallible> + Clone + Send + Sync + 'static,
        S::Response: IntoResponse,
        S::Future: Send + 'static,
    {
        self.register_path(path)?;
        self.extra_routes = std::mem::take(&mut self.extra_routes).route_service(path, service);
        Ok(())
    }

    /// Like `handle_with_auth`, for a handler function.
    pub fn handle_func_with_auth<H, T>(&mut self, path: &str, handler: H) -> Result<(), InstallError>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        self.register_path(path)?;
        self.extra_routes = std::mem::take(&mut self.extra_routes).route(path, any(handler));
        Ok(())
    }

    fn base_router(&self) -> Router {
        let features = &self.options.features;

        let groups = ApiGroupList {
            groups: self.group_discovery.values().cloned().collect(),
        };
        let mut router = Router::new()
            .merge(self.api_routes.clone())
            .merge(self.extra_routes.clone())
            .route(&self.options.api.api_group_prefix, get(move || async move { Json(groups) }))
            .route(HEALTHZ_PATH, get(|| async { "ok" }))
            .route(
                STORAGE_HEALTHZ_PATH,
                get(storage_health).with_state(StorageHealthState {
                    checker: self.health.clone(),
                    backends: Arc::new(self.storage.backends()),
                }),
            );

        if features.enable_index {
            let index = RootPaths {
                paths: self.root_paths.iter().cloned().collect(),
            };
            router = router.route("/", get(move || async move { Json(index) }));
        }
        if features.enable_logs_support {
            router = router.nest_service(LOGS_PATH, ServeDir::new(&features.logs_directory));
        }
        if features.enable_profiling {
            router = router.route(
                PROFILING_PATH,
                get(profile).with_state(ProfileState {
                    mapper: self.context_mapper.clone(),
                    started: self.started,
                }),
            );
        }

        // Applies to the routes registered so far, so it comes after every route.
        let roots = Arc::new(self.error_roots.clone());
        let method_roots = roots.clone();
        router
            .method_not_allowed_fallback(move |method: Method, uri: Uri| {
                let roots = method_roots.clone();
                async move { method_not_allowed(&roots, &method, &uri) }
            })
            .fallback(move |uri: Uri| {
                let roots = roots.clone();
                async move { not_found(&roots, &uri) }
            })
    }

    /// Graph served on the secure listener.
    pub fn handler(&self) -> Router {
        self.chain.build_trusted(self.base_router())
    }

    /// Graph served on the insecure listener. No authentication or authorization.
    pub fn insecure_handler(&self) -> Router {
        self.chain.build_open(self.base_router())
    }

    /// Serve until the insecure listener fails.
    pub async fn run(self) -> Result<Infallible, ServeError> {
        startup::run(self).await
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn chain(&self) -> &HandlerChain {
        &self.chain
    }

    pub fn storage(&self) -> &StorageDestinations {
        &self.storage
    }

    /// Sorted, deduplicated addresses of every storage backend.
    pub fn storage_backends(&self) -> Vec<String> {
        self.storage.backends()
    }

    pub fn storage_decorator(&self) -> StorageDecorator {
        StorageDecorator::from_watch_cache(self.options.features.enable_watch_cache)
    }

    pub fn admission(&self) -> &Arc<dyn AdmissionControl> {
        &self.admission
    }

    pub fn context_mapper(&self) -> &Arc<RequestContextMapper> {
        &self.context_mapper
    }

    pub fn long_running_check(&self) -> Arc<LongRunningCheck> {
        self.long_running.clone()
    }

    pub fn proxy_transport(&self) -> Option<&reqwest::Client> {
        self.proxy_transport.as_ref()
    }

    pub fn enable_ui_support(&self) -> bool {
        self.options.features.enable_ui_support
    }

    pub fn enable_swagger_support(&self) -> bool {
        self.options.features.enable_swagger_support
    }

    pub fn cluster_info(&self) -> &ClusterInfo {
        &self.cluster
    }

    pub fn service_cluster_ip_range(&self) -> IpNet {
        self.cluster.service_cluster_ip_range
    }

    pub fn service_node_port_range(&self) -> PortRange {
        self.cluster.service_node_port_range
    }

    pub fn cluster_ip(&self) -> Option<IpAddr> {
        self.cluster.cluster_ip
    }

    pub fn service_read_write_ip(&self) -> IpAddr {
        self.cluster.service_read_write_ip
    }

    pub fn service_read_write_port(&self) -> u16 {
        self.cluster.service_read_write_port
    }

    pub fn public_read_write_port(&self) -> u16 {
        self.cluster.public_read_write_port
    }

    pub fn master_count(&self) -> u32 {
        self.cluster.master_count
    }

    pub fn extra_service_ports(&self) -> &[ServicePort] {
        &self.cluster.extra_service_ports
    }

    pub fn extra_endpoint_ports(&self) -> &[EndpointPort] {
        &self.cluster.extra_endpoint_ports
    }

    pub fn kubernetes_service_node_port(&self) -> u16 {
        self.cluster.kubernetes_service_node_port
    }

    pub fn cache_timeout(&self) -> Duration {
        self.cluster.cache_timeout
    }

    pub fn external_host(&self) -> Option<&str> {
        self.cluster.external_host.as_deref()
    }

    pub fn master_service_namespace(&self) -> &str {
        &self.cluster.master_service_namespace
    }

    /// Certificate sources for the secure listener. A self-signed certificate
    /// covers the service IP and the in-cluster DNS names.
    pub fn tls_settings(&self) -> TlsSettings {
        let serving = &self.options.serving;
        TlsSettings {
            cert_file: serving.tls_cert_file.clone(),
            key_file: serving.tls_private_key_file.clone(),
            client_ca_file: serving.client_ca_file.clone(),
            cert_directory: serving.cert_directory.clone(),
            host: self
                .cluster
                .cluster_ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "localhost".to_string()),
            alternate_ips: vec![self.cluster.service_read_write_ip],
            alternate_dns: SERVICE_DNS_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// `path` is `root` or lies below it.
fn is_under(path: &str, root: &str) -> bool {
    path.strip_prefix(root)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// `apiVersion` of Status bodies for `path`: its group's, else the default.
fn status_version<'a>(roots: &'a [(String, String)], path: &str) -> &'a str {
    roots
        .iter()
        .find(|(root, _)| is_under(path, root))
        .map(|(_, version)| version.as_str())
        .unwrap_or(DEFAULT_STATUS_VERSION)
}

/// Structured 404 for paths no route matched.
fn not_found(roots: &[(String, String)], uri: &Uri) -> Response {
    ApiError::RouteNotFound("the server could not find the requested resource".into())
        .into_response_for(status_version(roots, uri.path()))
}

/// Structured 405 for routed paths that do not take this method.
fn method_not_allowed(roots: &[(String, String)], method: &Method, uri: &Uri) -> Response {
    ApiError::MethodNotSupported {
        resource: uri.path().to_string(),
        verb: method.to_string(),
    }
    .into_response_for(status_version(roots, uri.path()))
}

#[derive(Clone)]
struct StorageHealthState {
    checker: StorageHealthChecker,
    backends: Arc<Vec<String>>,
}

async fn storage_health(State(state): State<StorageHealthState>) -> Response {
    let results = state.checker.check_all(&state.backends).await;
    let code = if results.iter().all(|r| r.healthy) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(results)).into_response()
}

#[derive(Clone)]
struct ProfileState {
    mapper: Arc<RequestContextMapper>,
    started: Instant,
}

/// Runtime snapshot.
async fn profile(State(state): State<ProfileState>) -> Json<serde_json::Value> {
    let runtime = tokio::runtime::Handle::current().metrics();
    Json(serde_json::json!({
        "pid": std::process::id(),
        "uptimeSeconds": state.started.elapsed().as_secs(),
        "requestsInFlight": state.mapper.len(),
        "runtimeWorkers": runtime.num_workers(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use tower::ServiceExt;

    fn server() -> GenericApiServer {
        GenericApiServer::new(Config::default()).unwrap()
    }

    async fn get_json(app: Router, path: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(axum::http::Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn index_lists_registered_paths() {
        let mut server = server();
        server.handle_func_with_auth("/custom", || async { "custom" }).unwrap();
        let (status, body) = get_json(server.insecure_handler(), "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["paths"],
            serde_json::json!(["/apis", "/custom", "/healthz", "/healthz/storage"])
        );
    }

    #[test]
    fn duplicate_extra_path_is_rejected() {
        let mut server = server();
        server.handle_func_with_auth("/custom", || async { "a" }).unwrap();
        assert!(matches!(
            server.handle_func_with_auth("/custom", || async { "b" }),
            Err(InstallError::DuplicatePath(_))
        ));
        assert!(matches!(
            server.handle_func_with_auth("/healthz", || async { "c" }),
            Err(InstallError::DuplicatePath(_))
        ));
        assert!(matches!(
            server.handle_func_with_auth("relative", || async { "d" }),
            Err(InstallError::InvalidPath(_))
        ));
    }

    #[test]
    fn templated_extra_paths_are_rejected() {
        let mut server = server();
        for path in ["/custom/{id}", "/custom/{*rest}", "/files/*"] {
            assert!(
                matches!(
                    server.handle_func_with_auth(path, || async { "x" }),
                    Err(InstallError::InvalidPath(_))
                ),
                "{path}"
            );
        }
    }

    #[tokio::test]
    async fn wrong_method_on_fixed_routes_gets_a_status_body() {
        let app = server().insecure_handler();
        for path in ["/apis", "/healthz", "/"] {
            let response = app
                .clone()
                .oneshot(axum::http::Request::post(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{path}");
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(body["kind"], "Status");
            assert_eq!(body["reason"], "MethodNotAllowed");
            assert_eq!(body["apiVersion"], "v1");
        }
    }

    #[test]
    fn subtree_membership_respects_segments() {
        assert!(is_under("/apis/apps", "/apis/apps"));
        assert!(is_under("/apis/apps/v1/x", "/apis/apps"));
        assert!(!is_under("/apis/appsx", "/apis/apps"));
        assert!(!is_under("/apis", "/api"));
    }

    #[tokio::test]
    async fn unknown_paths_get_status_bodies() {
        let (status, body) = get_json(server().insecure_handler(), "/nowhere").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["kind"], "Status");
        assert_eq!(body["apiVersion"], "v1");
    }

    #[tokio::test]
    async fn storage_health_without_backends_is_ok() {
        let (status, body) = get_json(server().insecure_handler(), "/healthz/storage").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }

    #[test]
    fn cluster_defaults_are_filled() {
        let server = server();
        assert_eq!(server.service_cluster_ip_range().to_string(), "10.0.0.0/24");
        assert_eq!(server.service_read_write_ip(), IpAddr::from([10, 0, 0, 1]));
        assert_eq!(server.service_node_port_range(), PortRange::DEFAULT);
        assert_eq!(server.master_count(), 1);
        assert_eq!(server.public_read_write_port(), 6443);
        assert_eq!(server.service_read_write_port(), 443);
        assert_eq!(server.cache_timeout(), Duration::from_secs(5));
        assert!(server.storage_decorator().is_cached());
        assert!(server.proxy_transport().is_none());
    }

    #[test]
    fn bad_cors_pattern_fails_assembly() {
        let mut options = ServerOptions::default();
        options.security.cors_allowed_origins = vec!["(".into()];
        assert!(GenericApiServer::new(Config::new(options)).is_err());
    }
}
