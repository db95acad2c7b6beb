use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::{MoorError, WorkloadDescriptor};

/// Recovers a descriptor from the source reference stored on a record.
pub trait DescriptorLoader: Send + Sync {
    fn load(&self, source: &str, name: &str) -> Result<WorkloadDescriptor, MoorError>;

    /// Content digest recorded alongside the record, if the loader computes one.
    fn digest(&self, _descriptor: &WorkloadDescriptor) -> Option<String> {
        None
    }
}

/// Loader over descriptors held in memory, keyed by name.
#[derive(Default)]
pub struct StaticLoader {
    descriptors: Mutex<BTreeMap<String, WorkloadDescriptor>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, descriptor: WorkloadDescriptor) {
        self.descriptors.lock().unwrap_or_else(|p| p.into_inner()).insert(descriptor.name.clone(), descriptor);
    }

    pub fn remove(&self, name: &str) {
        self.descriptors.lock().unwrap_or_else(|p| p.into_inner()).remove(name);
    }
}

impl DescriptorLoader for StaticLoader {
    fn load(&self, source: &str, name: &str) -> Result<WorkloadDescriptor, MoorError> {
        self.descriptors
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .filter(|d| d.source == source)
            .cloned()
            .ok_or_else(|| MoorError::Validation { name: name.to_string(), reason: format!("workload no longer defined in {source}") })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_loader_matches_source_and_name() {
        let loader = StaticLoader::new();
        let mut d = WorkloadDescriptor::for_image("web", "nginx");
        d.source = "/srv/web.yaml".into();
        loader.insert(d.clone());
        assert_eq!(loader.load("/srv/web.yaml", "web").unwrap(), d);
        assert!(loader.load("/srv/other.yaml", "web").is_err());
        loader.remove("web");
        assert!(loader.load("/srv/web.yaml", "web").is_err());
        assert_eq!(loader.digest(&d), None);
    }
}
