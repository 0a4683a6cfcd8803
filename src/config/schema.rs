//! Configuration schema definitions.
//!
//! This module defines the complete option tree for the API server.
//! All types derive Serde traits for deserialization from config files.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root options for the API server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerOptions {
    /// Listener settings for the secure and insecure ports.
    pub serving: ServingConfig,

    /// API surface settings (prefixes, overrides).
    pub api: ApiConfig,

    /// Optional subsystems.
    pub features: FeatureConfig,

    /// CORS, authentication and authorization settings.
    pub security: SecurityConfig,

    /// Cluster service network settings.
    pub cluster: ClusterConfig,

    /// Storage destinations per API group.
    pub storage: StorageConfig,

    /// Transport used when proxying to cluster members.
    pub proxy: Option<ProxyTransportConfig>,

    /// Storage backend health probing.
    pub health_check: HealthCheckConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Address the secure listener binds to.
    pub bind_address: IpAddr,

    /// Secure (TLS) port. 0 disables the secure listener.
    pub secure_port: u16,

    /// Address the insecure listener binds to. Must be a trusted network.
    pub insecure_bind_address: IpAddr,

    /// Insecure (plaintext) port.
    pub insecure_port: u16,

    /// Directory for generated self-signed certificates.
    pub cert_directory: PathBuf,

    /// Certificate file (PEM). Self-signed when both files are unset.
    pub tls_cert_file: Option<PathBuf>,

    /// Private key file (PEM).
    pub tls_private_key_file: Option<PathBuf>,

    /// CA bundle used to verify client certificates, when presented.
    pub client_ca_file: Option<PathBuf>,

    /// Maximum concurrent non-long-running requests. 0 means unbounded.
    pub max_requests_in_flight: usize,

    /// Paths matching this pattern are exempt from the timeout and the in-flight gate.
    pub long_running_request_re: String,

    /// Fixed per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Delay before the secure listener retries after a failure.
    pub secure_retry_interval_secs: u64,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([0, 0, 0, 0]),
            secure_port: 6443,
            insecure_bind_address: IpAddr::from([127, 0, 0, 1]),
            insecure_port: 8080,
            cert_directory: PathBuf::from("/var/run/kubernetes"),
            tls_cert_file: None,
            tls_private_key_file: None,
            client_ca_file: None,
            max_requests_in_flight: 400,
            long_running_request_re: DEFAULT_LONG_RUNNING_REQUEST_RE.to_string(),
            request_timeout_secs: 60,
            secure_retry_interval_secs: 15,
        }
    }
}

/// Watch, proxy, log streaming, exec, attach and port-forward paths.
pub const DEFAULT_LONG_RUNNING_REQUEST_RE: &str =
    "(/|^)((watch|proxy)(/|$)|(logs?|portforward|exec|attach)/?$)";

/// API surface configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Prefix of the legacy (ungrouped) API, e.g. `/api`.
    pub api_prefix: String,

    /// Prefix of named API groups, e.g. `/apis`.
    pub api_group_prefix: String,

    /// Lower bound of the watch timeout in seconds. Watches run between this and twice this.
    pub min_request_timeout_secs: u64,

    /// Enable/disable group versions or single resources. Keyed by `group/version`,
    /// or by `version` alone for the legacy group.
    pub group_version_overrides: HashMap<String, GroupVersionOverride>,

    /// Storage version per group.
    pub storage_versions: HashMap<String, String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api".to_string(),
            api_group_prefix: "/apis".to_string(),
            min_request_timeout_secs: 1800,
            group_version_overrides: HashMap::new(),
            storage_versions: HashMap::new(),
        }
    }
}

/// Override for a single group version.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GroupVersionOverride {
    /// Disable the whole group version.
    pub disable: bool,

    /// Per-resource switches; `false` removes the resource.
    pub resource_overrides: HashMap<String, bool>,
}

/// Optional subsystems.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub enable_index: bool,
    pub enable_logs_support: bool,
    /// Directory served under `/logs/`.
    pub logs_directory: PathBuf,
    pub enable_ui_support: bool,
    pub enable_profiling: bool,
    pub enable_watch_cache: bool,
    pub enable_swagger_support: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            enable_index: true,
            enable_logs_support: false,
            logs_directory: PathBuf::from("/var/log"),
            enable_ui_support: false,
            enable_profiling: false,
            enable_watch_cache: true,
            enable_swagger_support: false,
        }
    }
}

/// Security configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Regular expressions matched against the `Origin` header.
    pub cors_allowed_origins: Vec<String>,

    /// Answer failed authentication with a basic-auth challenge.
    pub supports_basic_auth: bool,

    /// Static bearer tokens. Authentication is enabled when non-empty.
    pub tokens: Vec<TokenConfig>,

    /// Authorization policy.
    pub authorization_mode: AuthorizationMode,

    /// Admission plugins, run in order.
    pub admission_control: Vec<AdmissionPlugin>,
}

/// A static bearer token and the user it authenticates.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
    pub token: String,
    pub user: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
pub enum AuthorizationMode {
    #[default]
    AlwaysAllow,
    AlwaysDeny,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub enum AdmissionPlugin {
    AlwaysAdmit,
    AlwaysDeny,
}

/// Cluster service network configuration. Unset values are defaulted once at assembly.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// CIDR for service cluster IPs, e.g. "10.0.0.0/24".
    pub service_cluster_ip_range: Option<String>,

    /// IP of the API server's own service. Must lie inside the range.
    pub service_read_write_ip: Option<IpAddr>,

    /// Node port range, e.g. "30000-32767".
    pub service_node_port_range: Option<String>,

    /// Number of API server replicas.
    pub master_count: u32,

    /// Port on the public address where the read-write server listens.
    pub read_write_port: u16,

    /// Address where cluster members reach this server.
    pub public_address: Option<IpAddr>,

    /// Host name used in external URLs.
    pub external_host: Option<String>,

    /// Cache expiry in seconds.
    pub cache_timeout_secs: u64,

    pub master_service_namespace: String,

    /// Additional ports exposed on the API server service.
    pub extra_service_ports: Vec<ServicePort>,

    /// Additional ports exposed on the API server endpoints.
    pub extra_endpoint_ports: Vec<EndpointPort>,

    pub kubernetes_service_node_port: u16,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            service_cluster_ip_range: None,
            service_read_write_ip: None,
            service_node_port_range: None,
            master_count: 0,
            read_write_port: 0,
            public_address: None,
            external_host: None,
            cache_timeout_secs: 0,
            master_service_namespace: "default".to_string(),
            extra_service_ports: Vec::new(),
            extra_endpoint_ports: Vec::new(),
            kubernetes_service_node_port: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServicePort {
    pub name: String,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub target_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct EndpointPort {
    pub name: String,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

/// Storage destinations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Key prefix for every stored object.
    pub path_prefix: String,

    /// Default backend per API group.
    pub groups: Vec<StorageGroupConfig>,

    /// Backends for single resources, overriding the group default.
    pub overrides: Vec<StorageOverrideConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path_prefix: DEFAULT_STORAGE_PATH_PREFIX.to_string(),
            groups: Vec::new(),
            overrides: Vec::new(),
        }
    }
}

pub const DEFAULT_STORAGE_PATH_PREFIX: &str = "/registry";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageGroupConfig {
    /// API group name. Empty for the legacy group.
    pub group: String,
    /// Backend server URLs.
    pub servers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageOverrideConfig {
    pub group: String,
    pub resource: String,
    pub servers: Vec<String>,
}

/// Transport options for proxying to cluster members.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyTransportConfig {
    /// Extra CA (PEM) trusted for proxied TLS connections.
    pub ca_file: Option<PathBuf>,

    /// Skip certificate verification. Only for test clusters.
    pub insecure_skip_tls_verify: bool,

    /// Connection establishment timeout in seconds.
    pub dial_timeout_secs: u64,
}

impl Default for ProxyTransportConfig {
    fn default() -> Self {
        Self {
            ca_file: None,
            insecure_skip_tls_verify: false,
            dial_timeout_secs: 30,
        }
    }
}

/// Storage backend health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Path to probe on every storage backend.
    pub path: String,

    /// Probe timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: "/health".to_string(),
            timeout_secs: 2,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let options: ServerOptions = toml::from_str(
            r#"
            [serving]
            secure_port = 0
            insecure_port = 9000

            [security]
            cors_allowed_origins = ["^https://dash\\.example\\.com$"]
            authorization_mode = "AlwaysDeny"
            admission_control = ["AlwaysAdmit"]

            [[security.tokens]]
            token = "abc"
            user = "admin"

            [[storage.groups]]
            group = ""
            servers = ["http://127.0.0.1:2379"]
            "#,
        )
        .unwrap();

        assert_eq!(options.serving.secure_port, 0);
        assert_eq!(options.serving.insecure_port, 9000);
        assert_eq!(options.serving.max_requests_in_flight, 400);
        assert_eq!(options.security.authorization_mode, AuthorizationMode::AlwaysDeny);
        assert_eq!(options.security.tokens[0].user, "admin");
        assert_eq!(options.storage.path_prefix, "/registry");
        assert_eq!(options.storage.groups[0].servers.len(), 1);
        assert_eq!(options.api.api_prefix, "/api");
    }
}
