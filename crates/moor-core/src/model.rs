use serde::{Deserialize, Serialize};

/// Lifecycle status of a tracked container, as last recorded.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Created,
    Running,
    Stopped,
    Unknown,
}

impl RecordStatus {
    /// Statuses that claim a runtime entity backs the record.
    pub fn implies_existence(&self) -> bool {
        matches!(self, Self::Created | Self::Running | Self::Stopped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best-known readiness of a tracked container.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Readiness {
    #[default]
    Unknown,
    Ready,
    Unhealthy,
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => f.write_str("readiness unknown"),
            Self::Ready => f.write_str("ready"),
            Self::Unhealthy => f.write_str("unhealthy"),
        }
    }
}

/// Health as reported by the runtime's health-check machinery.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The entity has no health check configured.
    None,
    Starting,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "" | "none" | "<nil>" => Some(Self::None),
            "starting" => Some(Self::Starting),
            "healthy" => Some(Self::Healthy),
            "unhealthy" => Some(Self::Unhealthy),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Generate,
    Install,
    Update,
    Start,
    Stop,
    Restart,
    Cleanup,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Install => "install",
            Self::Update => "update",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Cleanup => "cleanup",
        }
    }

    /// Operations after which the reconciliation sweep runs.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Cleanup | Self::Generate | Self::Install | Self::Update)
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unknown_status_does_not_imply_existence() {
        assert!(RecordStatus::Created.implies_existence());
        assert!(RecordStatus::Running.implies_existence());
        assert!(RecordStatus::Stopped.implies_existence());
        assert!(!RecordStatus::Unknown.implies_existence());
    }

    #[test]
    fn parses_runtime_health_strings() {
        assert_eq!(HealthStatus::parse("healthy\n"), Some(HealthStatus::Healthy));
        assert_eq!(HealthStatus::parse("<nil>"), Some(HealthStatus::None));
        assert_eq!(HealthStatus::parse("starting"), Some(HealthStatus::Starting));
        assert_eq!(HealthStatus::parse("bogus"), None);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RecordStatus::Running).unwrap(), r#""running""#);
        assert_eq!(serde_json::to_string(&OperationKind::Restart).unwrap(), r#""restart""#);
    }
}
