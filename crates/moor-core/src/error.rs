use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::OperationKind;

/// Failure reported by a runtime adapter call.
///
/// Adapters must classify: only `Transient` is worth retrying.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("runtime temporarily unavailable: {0}")]
    Transient(String),
    #[error("no such container: {0}")]
    NotFound(String),
    #[error("{0}")]
    Definitive(String),
}

impl RuntimeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[derive(Clone, Debug, Error)]
pub enum MoorError {
    #[error("invalid workload {name:?}: {reason}")]
    Validation { name: String, reason: String },

    #[error("{op} {name}: already exists (use --force to replace it)")]
    AlreadyExists { op: OperationKind, name: String },

    #[error("{op} {name}: no such container: {cause}")]
    NotFound { op: OperationKind, name: String, cause: String },

    #[error("{op} {name}: never generated; run `moor generate` first")]
    NotPreviouslyGenerated { op: OperationKind, name: String },

    #[error("{op} {name}: runtime busy, gave up after retries: {cause}")]
    TransientRuntime { op: OperationKind, name: String, cause: String },

    #[error("{op} {name}: runtime error: {cause}")]
    DefinitiveRuntime { op: OperationKind, name: String, cause: String },

    #[error("{op} {name}: not ready after {}s", timeout.as_secs())]
    ReadinessTimeout { op: OperationKind, name: String, timeout: Duration },

    #[error("{op} {name}: health check reports unhealthy")]
    ReadinessUnhealthy { op: OperationKind, name: String },

    #[error("{op}: incomplete for {}: {detail}", targets.join(", "))]
    PartialFailure { op: OperationKind, targets: Vec<String>, detail: String },

    #[error("{op}: no container named and no previously used container to default to")]
    NoTarget { op: OperationKind },

    #[error("{op}: removing every runtime container requires confirmation (pass --yes or --force)")]
    ConfirmationRequired { op: OperationKind },

    #[error("state document {} is unreadable: {cause}", path.display())]
    StateCorruption { path: PathBuf, cause: String },

    #[error("state document {}: {cause}", path.display())]
    StateIo { path: PathBuf, cause: String },
}

impl MoorError {
    /// Attach operation and target to a runtime failure.
    pub fn from_runtime(op: OperationKind, name: &str, err: RuntimeError) -> Self {
        match err {
            RuntimeError::Transient(cause) => Self::TransientRuntime { op, name: name.to_string(), cause },
            RuntimeError::NotFound(cause) => Self::NotFound { op, name: name.to_string(), cause },
            RuntimeError::Definitive(cause) => Self::DefinitiveRuntime { op, name: name.to_string(), cause },
        }
    }

    /// Target the error is about, when it concerns a single container.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Validation { name, .. }
            | Self::AlreadyExists { name, .. }
            | Self::NotFound { name, .. }
            | Self::NotPreviouslyGenerated { name, .. }
            | Self::TransientRuntime { name, .. }
            | Self::DefinitiveRuntime { name, .. }
            | Self::ReadinessTimeout { name, .. }
            | Self::ReadinessUnhealthy { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Whether the whole invocation must stop.
    pub fn is_fatal_to_invocation(&self) -> bool {
        matches!(self, Self::StateCorruption { .. } | Self::StateIo { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_errors_keep_target_and_operation() {
        let e = MoorError::from_runtime(OperationKind::Start, "web", RuntimeError::Definitive("boom".into()));
        assert_eq!(e.to_string(), "start web: runtime error: boom");
        assert_eq!(e.target(), Some("web"));

        let e = MoorError::from_runtime(OperationKind::Stop, "db", RuntimeError::NotFound("Error: No such container: db".into()));
        assert!(matches!(e, MoorError::NotFound { .. }));
        assert_eq!(e.to_string(), "stop db: no such container: Error: No such container: db");
    }

    #[test]
    fn partial_failure_names_every_target() {
        let e = MoorError::PartialFailure {
            op: OperationKind::Cleanup,
            targets: vec!["a".into(), "b".into()],
            detail: "still present after 3 attempts".into(),
        };
        assert_eq!(e.to_string(), "cleanup: incomplete for a, b: still present after 3 attempts");
        assert!(!e.is_fatal_to_invocation());
    }
}
