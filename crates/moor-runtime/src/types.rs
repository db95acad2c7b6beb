use std::time::Duration;

use moor_core::{BuildSpec, HealthStatus, RuntimeError, WorkloadDescriptor};

/// Label every container created by moor carries.
pub const MANAGED_LABEL: &str = "moor.managed";
pub const SOURCE_LABEL: &str = "moor.source";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ListFilter {
    All,
    Label { key: String, value: String },
}

impl ListFilter {
    pub fn managed() -> Self {
        Self::Label { key: MANAGED_LABEL.to_string(), value: "true".to_string() }
    }
}

/// Capability interface over the container runtime.
///
/// `exists` must report entities in unusual or error states as existing;
/// `false` means the runtime has no record of the name at all.
pub trait RuntimeAdapter: Send + Sync {
    fn runtime_name(&self) -> &str;

    fn exists(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Returns the runtime's id for the new container.
    fn create(&self, descriptor: &WorkloadDescriptor, start: bool) -> Result<String, RuntimeError>;

    fn start(&self, name: &str) -> Result<(), RuntimeError>;

    fn stop(&self, name: &str, timeout: Duration) -> Result<(), RuntimeError>;

    fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError>;

    fn inspect_health(&self, name: &str) -> Result<HealthStatus, RuntimeError>;

    fn inspect_running(&self, name: &str) -> Result<bool, RuntimeError>;

    fn list(&self, filter: &ListFilter) -> Result<Vec<String>, RuntimeError>;

    /// Delegates an image build; returns the produced tag.
    fn build(&self, spec: &BuildSpec) -> Result<String, RuntimeError>;
}
