use std::time::Duration;

use anyhow::{anyhow, Result};
use moor_core::{RuntimeError, WorkloadDescriptor};

use crate::types::{ListFilter, RuntimeAdapter};

/// Shared adapter contract suite, run against the fake and (opt-in) real runtimes.
pub fn run_runtime_contract_suite(adapter: &dyn RuntimeAdapter, image: &str) -> Result<()> {
    let name = format!("moor-contract-{}", std::process::id());
    let mut descriptor = WorkloadDescriptor::for_image(&name, image);
    descriptor.source = "contract".to_string();
    descriptor.command = vec!["sleep".to_string(), "300".to_string()];

    // leftovers from an aborted run
    if adapter.exists(&name)? {
        adapter.remove(&name, true)?;
    }

    adapter.create(&descriptor, false)?;
    if !adapter.exists(&name)? {
        return Err(anyhow!("created container {name} does not exist"));
    }
    if adapter.inspect_running(&name)? {
        return Err(anyhow!("container created without start is running"));
    }
    if !adapter.list(&ListFilter::managed())?.contains(&name) {
        return Err(anyhow!("managed listing does not include {name}"));
    }

    adapter.start(&name)?;
    if !adapter.inspect_running(&name)? {
        return Err(anyhow!("started container is not running"));
    }
    adapter.inspect_health(&name)?;

    adapter.stop(&name, Duration::from_secs(1))?;
    if adapter.inspect_running(&name)? {
        return Err(anyhow!("stopped container still running"));
    }

    adapter.remove(&name, true)?;
    if adapter.exists(&name)? {
        return Err(anyhow!("removed container still exists"));
    }

    match adapter.start(&name) {
        Err(RuntimeError::NotFound(_)) => Ok(()),
        other => Err(anyhow!("start of a missing container should be NotFound, got {other:?}")),
    }
}
