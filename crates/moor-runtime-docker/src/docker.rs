use std::process::Command;
use std::time::Duration;

use moor_core::{BuildSpec, HealthStatus, RuntimeError, WorkloadDescriptor};
use moor_runtime::{ListFilter, RuntimeAdapter};
use tracing::debug;

use crate::args::{
    build_args, create_args, inspect_args, list_args, remove_args, stop_args, HEALTH_FORMAT, ID_FORMAT, RUNNING_FORMAT,
};

/// Runtime adapter driving a docker-compatible CLI (`docker`, `podman`).
#[derive(Clone, Debug)]
pub struct DockerCli {
    pub binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }

    fn run(&self, args: &[String]) -> Result<String, RuntimeError> {
        debug!(binary = %self.binary, ?args, "runtime call");
        let out = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| RuntimeError::Definitive(format!("run {} {:?}: {e}", self.binary, args)))?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            return Err(classify_failure(stderr.trim()));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "cannot connect to the docker daemon",
    "is the docker daemon running",
    "connection refused",
    "timed out",
    "timeout",
    "already in progress",
    "try again",
    "resource temporarily unavailable",
    "device or resource busy",
];

/// Maps CLI stderr to a runtime error class.
pub fn classify_failure(stderr: &str) -> RuntimeError {
    let lower = stderr.to_lowercase();
    if lower.contains("no such container") || lower.contains("no such object") {
        RuntimeError::NotFound(stderr.to_string())
    } else if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        RuntimeError::Transient(stderr.to_string())
    } else {
        RuntimeError::Definitive(stderr.to_string())
    }
}

fn parse_bool(out: &str) -> Result<bool, RuntimeError> {
    match out.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(RuntimeError::Definitive(format!("unexpected inspect output {other:?}"))),
    }
}

impl RuntimeAdapter for DockerCli {
    fn runtime_name(&self) -> &str {
        &self.binary
    }

    fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        match self.run(&inspect_args(name, ID_FORMAT)) {
            Ok(_) => Ok(true),
            Err(RuntimeError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn create(&self, descriptor: &WorkloadDescriptor, start: bool) -> Result<String, RuntimeError> {
        let out = self.run(&create_args(descriptor, start)?)?;
        // `run` may print pull progress before the id
        Ok(out.lines().last().unwrap_or_default().trim().to_string())
    }

    fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.run(&["start".to_string(), name.to_string()]).map(|_| ())
    }

    fn stop(&self, name: &str, timeout: Duration) -> Result<(), RuntimeError> {
        self.run(&stop_args(name, timeout)).map(|_| ())
    }

    fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        self.run(&remove_args(name, force)).map(|_| ())
    }

    fn inspect_health(&self, name: &str) -> Result<HealthStatus, RuntimeError> {
        let out = self.run(&inspect_args(name, HEALTH_FORMAT))?;
        HealthStatus::parse(&out).ok_or_else(|| RuntimeError::Definitive(format!("unexpected health status {out:?}")))
    }

    fn inspect_running(&self, name: &str) -> Result<bool, RuntimeError> {
        parse_bool(&self.run(&inspect_args(name, RUNNING_FORMAT))?)
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<String>, RuntimeError> {
        let out = self.run(&list_args(filter))?;
        Ok(out.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect())
    }

    fn build(&self, spec: &BuildSpec) -> Result<String, RuntimeError> {
        self.run(&build_args(spec))?;
        Ok(spec.tag.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_cli_failures() {
        assert!(matches!(classify_failure("Error: No such container: web"), RuntimeError::NotFound(_)));
        assert!(matches!(classify_failure("Error: No such object: web"), RuntimeError::NotFound(_)));
        assert!(matches!(
            classify_failure("Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?"),
            RuntimeError::Transient(_)
        ));
        assert!(matches!(
            classify_failure("Error response from daemon: removal of container web is already in progress"),
            RuntimeError::Transient(_)
        ));
        assert!(matches!(
            classify_failure("Error response from daemon: Conflict. The container name \"/web\" is already in use"),
            RuntimeError::Definitive(_)
        ));
    }

    #[test]
    fn parses_running_flag() {
        assert!(parse_bool("true\n").unwrap());
        assert!(!parse_bool("false").unwrap());
        assert!(parse_bool("").is_err());
    }

    #[test]
    fn missing_binary_is_definitive() {
        let rt = DockerCli::new("moor-definitely-not-a-binary");
        assert!(matches!(rt.exists("web"), Err(RuntimeError::Definitive(_))));
    }

    #[test]
    #[ignore = "needs a running docker daemon"]
    fn docker_contract() {
        let rt = DockerCli::new("docker");
        moor_runtime::contract::run_runtime_contract_suite(&rt, "busybox:latest").unwrap();
    }
}
