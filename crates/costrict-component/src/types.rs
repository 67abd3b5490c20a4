//! Snapshot type returned by the component manager's accessors.

use costrict_config::ComponentSpecification;
use costrict_core::VersionNumber;

/// A point-in-time view of one declared component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDetail {
    pub name: String,
    pub spec: ComponentSpecification,
    pub installed: bool,
    pub local_version: Option<VersionNumber>,
    pub remote_newest: Option<VersionNumber>,
    pub need_upgrade: bool,
    /// `true` for a conf-type package declared under the system spec's
    /// `Configurations` list rather than its `Components` list.
    pub is_config: bool,
}
