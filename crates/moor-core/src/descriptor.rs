use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::MoorError;

/// Canonical, validated description of one named container.
///
/// Produced by a workload loader and never patched in place: a changed workload
/// file yields a new descriptor that replaces the old one wholesale.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadDescriptor {
    pub name: String,
    /// Where the descriptor came from (workload file path or other reference).
    pub source: String,
    pub image: ImageSource,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub health_check: Option<HealthCheck>,
    /// Per-workload readiness timeout; wins over every other timeout source.
    #[serde(default)]
    pub readiness_timeout: Option<Duration>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    Image { reference: String },
    Build(BuildSpec),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildSpec {
    pub context: String,
    #[serde(default)]
    pub dockerfile: Option<String>,
    /// Image tag the runtime should produce.
    pub tag: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortMapping {
    /// `None` publishes on an ephemeral host port.
    pub host: Option<u16>,
    pub container: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    /// Parses `"8080:80"`, `"8443:443/tcp"` or `"53/udp"`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (ports, protocol) = match s.trim().split_once('/') {
            Some((p, "tcp")) => (p, Protocol::Tcp),
            Some((p, "udp")) => (p, Protocol::Udp),
            Some((_, other)) => return Err(format!("unknown protocol {other:?} in port {s:?}")),
            None => (s.trim(), Protocol::Tcp),
        };
        let parse_port = |p: &str| p.parse::<u16>().map_err(|_| format!("invalid port number {p:?} in {s:?}"));
        match ports.split_once(':') {
            Some((host, container)) => Ok(Self { host: Some(parse_port(host)?), container: parse_port(container)?, protocol }),
            None => Ok(Self { host: None, container: parse_port(ports)?, protocol }),
        }
    }

    pub fn to_publish_arg(&self) -> String {
        let proto = match self.protocol {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        };
        match self.host {
            Some(h) => format!("{}:{}/{}", h, self.container, proto),
            None => format!("{}/{}", self.container, proto),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub read_only: bool,
}

impl VolumeMount {
    /// Parses `"src:/dst"` or `"src:/dst:ro"`.
    pub fn parse(s: &str) -> Result<Self, String> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.as_slice() {
            [source, target] => Ok(Self { source: source.to_string(), target: target.to_string(), read_only: false }),
            [source, target, "ro"] => Ok(Self { source: source.to_string(), target: target.to_string(), read_only: true }),
            [source, target, "rw"] => Ok(Self { source: source.to_string(), target: target.to_string(), read_only: false }),
            _ => Err(format!("invalid volume {s:?}, expected src:/dst[:ro]")),
        }
    }

    pub fn to_volume_arg(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.source, self.target)
        } else {
            format!("{}:{}", self.source, self.target)
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheck {
    /// Probe command, e.g. `["CMD", "curl", "-f", "http://localhost/"]`.
    pub test: Vec<String>,
    #[serde(default)]
    pub interval: Option<Duration>,
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub start_period: Option<Duration>,
}

impl HealthCheck {
    /// `["NONE"]` switches off a health check baked into the image.
    pub fn is_disabled(&self) -> bool {
        self.test.first().is_some_and(|t| t == "NONE")
    }
}

impl WorkloadDescriptor {
    /// Minimal descriptor for an image, mostly useful in tests and tooling.
    pub fn for_image(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: String::new(),
            image: ImageSource::Image { reference: image.into() },
            ports: vec![],
            volumes: vec![],
            env: BTreeMap::new(),
            network: None,
            command: vec![],
            health_check: None,
            readiness_timeout: None,
        }
    }

    pub fn has_health_check(&self) -> bool {
        self.health_check.as_ref().is_some_and(|hc| !hc.is_disabled())
    }

    /// Image reference the runtime should run, after any build.
    pub fn image_reference(&self) -> &str {
        match &self.image {
            ImageSource::Image { reference } => reference,
            ImageSource::Build(b) => &b.tag,
        }
    }

    pub fn validate(&self) -> Result<(), MoorError> {
        let fail = |reason: String| MoorError::Validation { name: self.name.clone(), reason };

        if !is_valid_name(&self.name) {
            return Err(fail("name must match [A-Za-z0-9][A-Za-z0-9_.-]*".to_string()));
        }
        match &self.image {
            ImageSource::Image { reference } if reference.trim().is_empty() => {
                return Err(fail("image reference is empty".to_string()));
            }
            ImageSource::Build(b) if b.context.trim().is_empty() || b.tag.trim().is_empty() => {
                return Err(fail("build requires both context and tag".to_string()));
            }
            _ => {}
        }
        if let Some(p) = self.ports.iter().find(|p| p.container == 0) {
            return Err(fail(format!("container port must be non-zero ({})", p.to_publish_arg())));
        }
        if let Some(v) = self.volumes.iter().find(|v| !v.target.starts_with('/')) {
            return Err(fail(format!("volume target {:?} must be absolute", v.target)));
        }
        if let Some(k) = self.env.keys().find(|k| k.is_empty() || k.contains('=')) {
            return Err(fail(format!("invalid env key {k:?}")));
        }
        if let Some(hc) = &self.health_check {
            if hc.test.is_empty() {
                return Err(fail("health check test is empty".to_string()));
            }
            if hc.test.iter().any(|t| t.contains('\0')) {
                return Err(fail("health check test contains a NUL byte".to_string()));
            }
        }
        if self.readiness_timeout == Some(Duration::ZERO) {
            return Err(fail("readiness timeout must be positive".to_string()));
        }
        Ok(())
    }
}

pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_forms() {
        assert_eq!(
            PortMapping::parse("8080:80").unwrap(),
            PortMapping { host: Some(8080), container: 80, protocol: Protocol::Tcp }
        );
        assert_eq!(
            PortMapping::parse("53/udp").unwrap(),
            PortMapping { host: None, container: 53, protocol: Protocol::Udp }
        );
        assert!(PortMapping::parse("80/sctp").is_err());
        assert!(PortMapping::parse("x:80").is_err());
    }

    #[test]
    fn parses_volume_forms() {
        let v = VolumeMount::parse("./data:/data:ro").unwrap();
        assert!(v.read_only);
        assert_eq!(v.to_volume_arg(), "./data:/data:ro");
        assert!(VolumeMount::parse("nodst").is_err());
    }

    #[test]
    fn validation_rejects_bad_names() {
        assert!(is_valid_name("web-1.app_x"));
        assert!(!is_valid_name("-web"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("we b"));

        let d = WorkloadDescriptor::for_image("bad name", "nginx");
        assert!(matches!(d.validate(), Err(MoorError::Validation { .. })));
    }

    #[test]
    fn validation_rejects_relative_volume_target() {
        let mut d = WorkloadDescriptor::for_image("web", "nginx");
        d.volumes.push(VolumeMount { source: "./x".into(), target: "data".into(), read_only: false });
        assert!(d.validate().is_err());
    }

    #[test]
    fn none_health_check_counts_as_absent() {
        let mut d = WorkloadDescriptor::for_image("web", "nginx");
        d.health_check = Some(HealthCheck { test: vec!["NONE".into()], interval: None, timeout: None, retries: None, start_period: None });
        assert!(!d.has_health_check());
        assert!(d.validate().is_ok());
    }

    #[test]
    fn build_tag_is_the_image_reference() {
        let mut d = WorkloadDescriptor::for_image("api", "unused");
        d.image = ImageSource::Build(BuildSpec { context: ".".into(), dockerfile: None, tag: "api:dev".into() });
        assert_eq!(d.image_reference(), "api:dev");
        assert!(d.validate().is_ok());
    }
}
