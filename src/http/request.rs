//! Request attribute extraction.
//!
//! # Responsibilities
//! - Classify a request as a resource or non-resource request
//! - Derive verb, group, version, namespace, resource, subresource and name
//!   from the method, path and query
//!
//! # Design Decisions
//! - Pure function of the request line; never reads the body
//! - Paths outside the API prefixes are non-resource requests with the
//!   lower-cased HTTP method as verb

use axum::http::{Method, Uri};

use crate::security::authorizer::Attributes;
use crate::security::user::UserInfo;

/// What a request asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    pub is_resource_request: bool,
    pub path: String,
    pub verb: String,
    pub api_prefix: String,
    pub api_group: String,
    pub api_version: String,
    pub namespace: String,
    pub resource: String,
    pub subresource: String,
    pub name: String,
}

impl RequestInfo {
    pub fn is_read_only(&self) -> bool {
        matches!(self.verb.as_str(), "get" | "list" | "watch" | "head" | "options")
    }

    pub fn into_attributes(self, user: Option<UserInfo>) -> Attributes {
        Attributes {
            user,
            read_only: self.is_read_only(),
            verb: self.verb,
            is_resource_request: self.is_resource_request,
            path: self.path,
            api_group: self.api_group,
            api_version: self.api_version,
            namespace: self.namespace,
            resource: self.resource,
            subresource: self.subresource,
            name: self.name,
        }
    }
}

/// Parses request lines against the legacy and group prefixes.
#[derive(Debug, Clone)]
pub struct RequestInfoResolver {
    api_prefix: String,
    api_group_prefix: String,
}

impl RequestInfoResolver {
    pub fn new(api_prefix: &str, api_group_prefix: &str) -> Self {
        Self {
            api_prefix: api_prefix.trim_matches('/').to_string(),
            api_group_prefix: api_group_prefix.trim_matches('/').to_string(),
        }
    }

    /// Resource paths look like:
    /// `/<prefix>[/<group>]/<version>[/watch]/[namespaces/<ns>/]<resource>[/<name>[/<subresource>]]`
    pub fn resolve(&self, method: &Method, uri: &Uri) -> RequestInfo {
        let path = uri.path().to_string();
        let non_resource = RequestInfo {
            is_resource_request: false,
            path: path.clone(),
            verb: method.as_str().to_lowercase(),
            ..Default::default()
        };

        let parts: Vec<&str> = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).collect();
        let Some((&prefix, rest)) = parts.split_first() else {
            return non_resource;
        };

        let mut info = RequestInfo {
            is_resource_request: true,
            path: path.clone(),
            api_prefix: prefix.to_string(),
            ..Default::default()
        };

        let rest = if prefix == self.api_group_prefix {
            let Some((&group, rest)) = rest.split_first() else {
                return non_resource;
            };
            info.api_group = group.to_string();
            rest
        } else if prefix == self.api_prefix {
            rest
        } else {
            return non_resource;
        };

        let Some((&version, mut rest)) = rest.split_first() else {
            return non_resource;
        };
        info.api_version = version.to_string();
        if rest.is_empty() {
            // Discovery of a single version.
            return non_resource;
        }

        let mut watch_path = false;
        if rest[0] == "watch" {
            watch_path = true;
            rest = &rest[1..];
        }

        if rest.len() >= 2 && rest[0] == "namespaces" {
            info.namespace = rest[1].to_string();
            if rest.len() > 2 {
                rest = &rest[2..];
            }
        }

        if let Some(resource) = rest.first() {
            info.resource = resource.to_string();
        }
        if let Some(name) = rest.get(1) {
            info.name = name.to_string();
        }
        if let Some(sub) = rest.get(2) {
            info.subresource = sub.to_string();
        }

        let watch_query = uri
            .query()
            .is_some_and(|q| q.split('&').any(|kv| kv == "watch=true" || kv == "watch=1"));

        let collection = info.name.is_empty();
        info.verb = match *method {
            _ if watch_path || (watch_query && collection && *method == Method::GET) => "watch".to_string(),
            Method::GET | Method::HEAD if collection => "list".to_string(),
            Method::GET | Method::HEAD => "get".to_string(),
            Method::POST => "create".to_string(),
            Method::PUT => "update".to_string(),
            Method::PATCH => "patch".to_string(),
            Method::DELETE if collection => "deletecollection".to_string(),
            Method::DELETE => "delete".to_string(),
            _ => method.as_str().to_lowercase(),
        };

        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(method: Method, uri: &str) -> RequestInfo {
        RequestInfoResolver::new("/api", "/apis").resolve(&method, &uri.parse().unwrap())
    }

    #[test]
    fn named_group_item() {
        let info = resolve(Method::GET, "/apis/apps/v1/namespaces/ns1/widgets/w1/status");
        assert!(info.is_resource_request);
        assert_eq!(info.verb, "get");
        assert_eq!(info.api_group, "apps");
        assert_eq!(info.api_version, "v1");
        assert_eq!(info.namespace, "ns1");
        assert_eq!(info.resource, "widgets");
        assert_eq!(info.name, "w1");
        assert_eq!(info.subresource, "status");
    }

    #[test]
    fn legacy_collection_verbs() {
        assert_eq!(resolve(Method::GET, "/api/v1/pods").verb, "list");
        assert_eq!(resolve(Method::POST, "/api/v1/pods").verb, "create");
        assert_eq!(resolve(Method::DELETE, "/api/v1/pods").verb, "deletecollection");
        assert_eq!(resolve(Method::GET, "/api/v1/pods?watch=true").verb, "watch");
        assert_eq!(resolve(Method::GET, "/api/v1/watch/pods").verb, "watch");
    }

    #[test]
    fn namespace_object_itself() {
        let info = resolve(Method::GET, "/api/v1/namespaces/ns1");
        assert_eq!(info.resource, "namespaces");
        assert_eq!(info.name, "ns1");
        assert_eq!(info.namespace, "ns1");
    }

    #[test]
    fn non_resource_paths() {
        let info = resolve(Method::GET, "/healthz");
        assert!(!info.is_resource_request);
        assert_eq!(info.verb, "get");

        assert!(!resolve(Method::GET, "/apis/apps").is_resource_request);
        assert!(!resolve(Method::GET, "/api").is_resource_request);
        assert!(!resolve(Method::GET, "/api/v1").is_resource_request);
    }
}
