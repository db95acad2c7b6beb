use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use moor_core::{BuildSpec, HealthCheck, ImageSource, MoorError, PortMapping, VolumeMount, WorkloadDescriptor};
use serde::{Deserialize, Serialize};

/// One workload as written in a YAML file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadEntry {
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub build: Option<BuildEntry>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub network: Option<String>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub healthcheck: Option<HealthCheckEntry>,
    #[serde(default)]
    pub readiness_timeout_secs: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildEntry {
    pub context: String,
    #[serde(default)]
    pub dockerfile: Option<String>,
    pub tag: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckEntry {
    pub test: Vec<String>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub start_period_secs: Option<u64>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkloadList {
    workloads: Vec<serde_yaml::Value>,
}

/// One entry of a workload file, keyed by its name (or `#<position>` when it
/// has none). A malformed entry does not spoil its neighbours.
pub type ParsedEntry = (String, Result<WorkloadEntry>);

/// Parses a workload file body: either one workload mapping or `workloads: [...]`.
///
/// YAML syntax errors and an empty list fail the whole file; anything wrong
/// inside a single entry is reported against that entry only.
pub fn parse_workloads(yaml: &str) -> Result<Vec<ParsedEntry>> {
    let value: serde_yaml::Value = serde_yaml::from_str(yaml).context("parse workload yaml")?;
    let is_list = value.as_mapping().map(|m| m.contains_key("workloads")).unwrap_or(false);
    let values = if is_list {
        let list: WorkloadList = serde_yaml::from_value(value).context("parse workloads list")?;
        if list.workloads.is_empty() {
            return Err(anyhow!("workloads list is empty"));
        }
        list.workloads
    } else {
        vec![value]
    };
    Ok(values
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            let name = v.get("name").and_then(serde_yaml::Value::as_str).map(String::from).unwrap_or_else(|| format!("#{}", i + 1));
            let entry = serde_yaml::from_value::<WorkloadEntry>(v).context("parse workload");
            (name, entry)
        })
        .collect())
}

/// Paths starting with `./` or `../` are taken relative to the workload file.
fn resolve_relative(base: &Path, p: &str) -> String {
    if p.starts_with("./") || p.starts_with("../") || p == "." {
        base.join(p).to_string_lossy().into_owned()
    } else {
        p.to_string()
    }
}

impl WorkloadEntry {
    /// Converts to a validated descriptor. `base` is the directory of the workload file.
    pub fn into_descriptor(self, source: &str, base: &Path) -> Result<WorkloadDescriptor> {
        let image = match (self.image, self.build) {
            (Some(reference), None) => ImageSource::Image { reference },
            (None, Some(b)) => ImageSource::Build(BuildSpec {
                context: resolve_relative(base, &b.context),
                dockerfile: b.dockerfile,
                tag: b.tag,
            }),
            (Some(_), Some(_)) => return Err(anyhow!("workload {}: set either image or build, not both", self.name)),
            (None, None) => return Err(anyhow!("workload {}: one of image or build is required", self.name)),
        };

        let ports = self
            .ports
            .iter()
            .map(|p| PortMapping::parse(p))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| anyhow!("workload {}: {e}", self.name))?;
        let volumes = self
            .volumes
            .iter()
            .map(|v| {
                VolumeMount::parse(v).map(|mut m| {
                    m.source = resolve_relative(base, &m.source);
                    m
                })
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| anyhow!("workload {}: {e}", self.name))?;

        let health_check = self.healthcheck.map(|h| HealthCheck {
            test: h.test,
            interval: h.interval_secs.map(Duration::from_secs),
            timeout: h.timeout_secs.map(Duration::from_secs),
            retries: h.retries,
            start_period: h.start_period_secs.map(Duration::from_secs),
        });

        let descriptor = WorkloadDescriptor {
            name: self.name,
            source: source.to_string(),
            image,
            ports,
            volumes,
            env: self.env,
            network: self.network,
            command: self.command,
            health_check,
            readiness_timeout: self.readiness_timeout_secs.map(Duration::from_secs),
        };
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// A workload from a file: its descriptor, or the reason it is invalid.
pub type LoadedWorkload = std::result::Result<WorkloadDescriptor, MoorError>;

/// Loads and validates every workload in a file, in file order. `source` on
/// each descriptor is the canonical path.
///
/// The outer error covers the file as a whole (unreadable, not YAML,
/// duplicate names); each invalid entry comes back as its own `Validation`.
pub fn load_workloads(path: &Path) -> Result<Vec<LoadedWorkload>> {
    let canonical: PathBuf = path.canonicalize().with_context(|| format!("resolve workload file: {}", path.display()))?;
    let s = std::fs::read_to_string(&canonical).with_context(|| format!("read workload file: {}", canonical.display()))?;
    let base = canonical.parent().map(Path::to_path_buf).unwrap_or_default();
    let source = canonical.to_string_lossy().into_owned();

    let entries = parse_workloads(&s).with_context(|| format!("workload file {}", canonical.display()))?;
    let mut seen = std::collections::BTreeSet::new();
    if let Some((dup, _)) = entries.iter().find(|(name, _)| !seen.insert(name.clone())) {
        return Err(anyhow!("workload file {}: duplicate workload name {dup}", canonical.display()));
    }
    Ok(entries
        .into_iter()
        .map(|(name, entry)| entry.and_then(|e| e.into_descriptor(&source, &base)).map_err(|e| invalid(&name, e)))
        .collect())
}

fn invalid(name: &str, err: anyhow::Error) -> MoorError {
    match err.downcast::<MoorError>() {
        Ok(e) => e,
        Err(e) => MoorError::Validation { name: name.to_string(), reason: format!("{e:#}") },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(yaml: &str) -> WorkloadEntry {
        parse_workloads(yaml).unwrap().remove(0).1.unwrap()
    }

    #[test]
    fn single_and_list_forms() {
        let one = parse_workloads("name: web\nimage: nginx\n").unwrap();
        assert_eq!(one.len(), 1);
        let many = parse_workloads("workloads:\n  - name: a\n    image: x\n  - name: b\n    image: y\n").unwrap();
        assert_eq!(many.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(parse_workloads("workloads: []\n").is_err());
        assert!(parse_workloads("workloads: [\n").is_err());
    }

    #[test]
    fn unknown_keys_fail_only_their_entry() {
        let parsed = parse_workloads("workloads:\n  - name: a\n    image: x\n  - name: b\n    imagee: typo\n  - image: z\n").unwrap();
        assert!(parsed[0].1.is_ok());
        assert_eq!(parsed[1].0, "b");
        assert!(parsed[1].1.is_err());
        assert_eq!(parsed[2].0, "#3");
        assert!(parsed[2].1.is_err());
    }

    #[test]
    fn image_and_build_are_exclusive() {
        let e = entry("name: web\nimage: nginx\nbuild: {context: ., tag: web:dev}\n");
        assert!(e.into_descriptor("w.yaml", Path::new("/srv")).is_err());
        let e = entry("name: web\n");
        assert!(e.into_descriptor("w.yaml", Path::new("/srv")).is_err());
    }

    #[test]
    fn relative_paths_resolve_against_file_dir() {
        let e = entry("name: api\nbuild: {context: ./api, tag: api:dev}\nvolumes: ['./data:/data:ro', 'named:/cache']\n");
        let d = e.into_descriptor("/srv/app.yaml", Path::new("/srv")).unwrap();
        match &d.image {
            ImageSource::Build(b) => assert_eq!(b.context, "/srv/./api"),
            other => panic!("unexpected image {other:?}"),
        }
        assert_eq!(d.volumes[0].source, "/srv/./data");
        assert!(d.volumes[0].read_only);
        assert_eq!(d.volumes[1].source, "named");
    }

    #[test]
    fn invalid_port_names_the_workload() {
        let e = entry("name: web\nimage: nginx\nports: ['80/sctp']\n");
        let err = e.into_descriptor("w.yaml", Path::new("/")).unwrap_err();
        assert!(err.to_string().contains("web"));
    }
}
