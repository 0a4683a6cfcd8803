//! API surface subsystem.
//!
//! # Data Flow
//! ```text
//! Resource-handler layer:
//!     → group.rs (ApiGroupInfo: versions, codecs, handlers)
//!     → installer.rs (routes per group version, discovery)
//!     → rest.rs (RestStorage verbs, called per request)
//!
//! Every failure on the way out:
//!     → status.rs (ApiError → Status body)
//! ```
//!
//! # Design Decisions
//! - Handlers are trait objects keyed by resource name
//! - Installation produces values; attaching them to the server is a separate, atomic step

pub mod discovery;
pub mod group;
pub mod installer;
pub mod rest;
pub mod status;

pub use discovery::{ApiGroup, ApiGroupList, ApiResourceList, ApiVersions, GroupVersionForDiscovery, RootPaths};
pub use group::{ApiGroupInfo, Codec, GroupMeta, GroupVersion, JsonCodec, MetadataSelfLinker, SelfLinker, VersionInterfaces};
pub use installer::{ApiGroupVersion, InstallError, Installer};
pub use rest::{DeleteOptions, EventType, ListOptions, RestStorage, Verb, WatchEvent, WatchStream};
pub use status::{ApiError, Status};
