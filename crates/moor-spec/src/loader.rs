use std::path::Path;

use moor_core::{DescriptorLoader, MoorError, WorkloadDescriptor};

use crate::{descriptor_digest, load_workloads};

/// Reloads descriptors from the workload file a record points at.
#[derive(Clone, Debug, Default)]
pub struct YamlSpecLoader;

impl DescriptorLoader for YamlSpecLoader {
    fn load(&self, source: &str, name: &str) -> Result<WorkloadDescriptor, MoorError> {
        let invalid = |reason: String| MoorError::Validation { name: name.to_string(), reason };
        let all = load_workloads(Path::new(source)).map_err(|e| invalid(format!("{e:#}")))?;
        all.into_iter()
            .find(|w| match w {
                Ok(d) => d.name == name,
                Err(e) => e.target() == Some(name),
            })
            .ok_or_else(|| invalid(format!("workload no longer defined in {source}")))?
    }

    fn digest(&self, descriptor: &WorkloadDescriptor) -> Option<String> {
        Some(descriptor_digest(descriptor))
    }
}
