//! Discovery documents.
//!
//! Clients read these to pick a version they can talk.

use serde::{Deserialize, Serialize};

use crate::api::group::GroupVersion;

/// Versions of the legacy group, served at the legacy prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiVersions {
    pub versions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupVersionForDiscovery {
    pub group_version: String,
    pub version: String,
}

impl From<&GroupVersion> for GroupVersionForDiscovery {
    fn from(gv: &GroupVersion) -> Self {
        Self {
            group_version: gv.to_string(),
            version: gv.version.clone(),
        }
    }
}

/// A named group, served at `<group-prefix>/<group>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiGroup {
    pub name: String,
    pub versions: Vec<GroupVersionForDiscovery>,
    pub preferred_version: GroupVersionForDiscovery,
}

/// Every named group, served at the group prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ApiGroupList {
    pub groups: Vec<ApiGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResource {
    pub name: String,
    pub namespaced: bool,
}

/// Resources of one group version, served at `<root>/<version>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResourceList {
    pub group_version: String,
    pub resources: Vec<ApiResource>,
}

/// Root paths of the server, served at `/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RootPaths {
    pub paths: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_document_shape() {
        let v1 = GroupVersion::new("apps", "v1");
        let doc = ApiGroup {
            name: "apps".into(),
            versions: vec![(&v1).into()],
            preferred_version: (&v1).into(),
        };
        assert_eq!(
            serde_json::to_value(&doc).unwrap(),
            serde_json::json!({
                "name": "apps",
                "versions": [{"groupVersion": "apps/v1", "version": "v1"}],
                "preferredVersion": {"groupVersion": "apps/v1", "version": "v1"}
            })
        );
    }
}
