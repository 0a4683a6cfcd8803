//! Resource group descriptors.
//!
//! Produced by the resource-handler layer, consumed once by
//! `GenericApiServer::install_api_groups`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::api::rest::RestStorage;

/// A group and one of its versions. The legacy group has an empty name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupVersion {
    pub group: String,
    pub version: String,
}

impl GroupVersion {
    pub fn new(group: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
        }
    }
}

/// `group/version`, or just `version` for the legacy group.
impl fmt::Display for GroupVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.version)
        } else {
            write!(f, "{}/{}", self.group, self.version)
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unable to decode object: {0}")]
    Decode(String),

    #[error("unable to encode object: {0}")]
    Encode(String),
}

/// Wire format of one group version.
pub trait Codec: Send + Sync + fmt::Debug {
    fn content_type(&self) -> &'static str;
    fn encode(&self, object: &Value) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, data: &[u8]) -> Result<Value, CodecError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, object: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(object).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(data).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

/// Stamps the canonical URL of an object into it.
pub trait SelfLinker: Send + Sync + fmt::Debug {
    fn set_self_link(&self, object: &mut Value, link: &str);
}

/// Writes `metadata.selfLink`, creating `metadata` when missing.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataSelfLinker;

impl SelfLinker for MetadataSelfLinker {
    fn set_self_link(&self, object: &mut Value, link: &str) {
        let Some(obj) = object.as_object_mut() else {
            return;
        };
        let metadata = obj
            .entry("metadata")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("selfLink".into(), Value::String(link.to_string()));
        }
    }
}

/// Per-version wire interfaces.
#[derive(Debug, Clone)]
pub struct VersionInterfaces {
    pub codec: Arc<dyn Codec>,
}

impl Default for VersionInterfaces {
    fn default() -> Self {
        Self { codec: Arc::new(JsonCodec) }
    }
}

/// Group metadata: versions, the preferred one, and how to talk each.
#[derive(Debug, Clone)]
pub struct GroupMeta {
    /// Preferred version.
    pub group_version: GroupVersion,
    /// All versions, in declaration order.
    pub group_versions: Vec<GroupVersion>,
    pub self_linker: Arc<dyn SelfLinker>,
    interfaces: HashMap<String, VersionInterfaces>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unsupported version {version:?} of group {group:?}: no wire interfaces registered")]
pub struct UnresolvedInterfaces {
    pub group: String,
    pub version: String,
}

impl GroupMeta {
    /// A group speaking JSON in every listed version; the first one is preferred.
    pub fn json(group: &str, versions: &[&str]) -> Self {
        let group_versions: Vec<GroupVersion> = versions.iter().map(|v| GroupVersion::new(group, *v)).collect();
        let interfaces = versions
            .iter()
            .map(|v| (v.to_string(), VersionInterfaces::default()))
            .collect();
        Self {
            group_version: group_versions.first().cloned().unwrap_or_else(|| GroupVersion::new(group, "")),
            group_versions,
            self_linker: Arc::new(MetadataSelfLinker),
            interfaces,
        }
    }

    pub fn group(&self) -> &str {
        &self.group_version.group
    }

    pub fn with_preferred(mut self, version: &str) -> Self {
        self.group_version = GroupVersion::new(self.group_version.group.clone(), version);
        self
    }

    pub fn with_interfaces(mut self, version: &str, interfaces: VersionInterfaces) -> Self {
        self.interfaces.insert(version.to_string(), interfaces);
        self
    }

    /// Declare a version without wire interfaces.
    pub fn with_bare_version(mut self, version: &str) -> Self {
        self.group_versions.push(GroupVersion::new(self.group(), version));
        self
    }

    pub fn interfaces_for(&self, gv: &GroupVersion) -> Result<&VersionInterfaces, UnresolvedInterfaces> {
        self.interfaces.get(&gv.version).ok_or_else(|| UnresolvedInterfaces {
            group: gv.group.clone(),
            version: gv.version.clone(),
        })
    }
}

/// Resource handlers of one version, keyed by resource name.
pub type ResourceMap = HashMap<String, Arc<dyn RestStorage>>;

/// Everything needed to expose one API group.
#[derive(Clone)]
pub struct ApiGroupInfo {
    pub group_meta: GroupMeta,
    /// version → resource → handler.
    pub versioned_resources: HashMap<String, ResourceMap>,
    /// Served under the legacy prefix without a group segment.
    pub is_legacy_group: bool,
    /// `apiVersion` for common envelope types. Defaults to the preferred group version.
    pub options_external_version: Option<GroupVersion>,
}

impl ApiGroupInfo {
    pub fn new(group_meta: GroupMeta) -> Self {
        Self {
            group_meta,
            versioned_resources: HashMap::new(),
            is_legacy_group: false,
            options_external_version: None,
        }
    }

    pub fn legacy(group_meta: GroupMeta) -> Self {
        Self {
            is_legacy_group: true,
            ..Self::new(group_meta)
        }
    }

    pub fn with_resource(mut self, version: &str, resource: &str, storage: Arc<dyn RestStorage>) -> Self {
        self.versioned_resources
            .entry(version.to_string())
            .or_default()
            .insert(resource.to_string(), storage);
        self
    }

    pub fn with_options_external_version(mut self, gv: GroupVersion) -> Self {
        self.options_external_version = Some(gv);
        self
    }

    pub fn name(&self) -> &str {
        self.group_meta.group()
    }
}

impl fmt::Debug for ApiGroupInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut versions: Vec<_> = self.versioned_resources.keys().collect();
        versions.sort();
        f.debug_struct("ApiGroupInfo")
            .field("group", &self.name())
            .field("versions", &versions)
            .field("is_legacy_group", &self.is_legacy_group)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn group_version_display() {
        assert_eq!(GroupVersion::new("apps", "v1").to_string(), "apps/v1");
        assert_eq!(GroupVersion::new("", "v1").to_string(), "v1");
    }

    #[test]
    fn json_meta_prefers_first_version() {
        let meta = GroupMeta::json("apps", &["v1", "v1beta1"]);
        assert_eq!(meta.group_version, GroupVersion::new("apps", "v1"));
        assert!(meta.interfaces_for(&GroupVersion::new("apps", "v1beta1")).is_ok());

        let meta = meta.with_bare_version("v2");
        assert_eq!(meta.group_versions.len(), 3);
        assert!(meta.interfaces_for(&GroupVersion::new("apps", "v2")).is_err());
    }

    #[test]
    fn self_linker_creates_metadata() {
        let mut obj = json!({"spec": {}});
        MetadataSelfLinker.set_self_link(&mut obj, "/apis/apps/v1/widgets/w1");
        assert_eq!(obj["metadata"]["selfLink"], "/apis/apps/v1/widgets/w1");
    }
}
