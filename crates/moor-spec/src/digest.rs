use moor_core::WorkloadDescriptor;
use sha2::{Digest, Sha256};

/// Recursively sort object keys for stable hashing.
fn sort_json(v: serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(map) => {
            let mut entries: Vec<_> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            serde_json::Value::Object(entries.into_iter().map(|(k, v)| (k, sort_json(v))).collect())
        }
        serde_json::Value::Array(arr) => serde_json::Value::Array(arr.into_iter().map(sort_json).collect()),
        other => other,
    }
}

/// sha256 over the key-sorted JSON form. `source` is excluded: moving a file does not change the workload.
pub fn descriptor_digest(d: &WorkloadDescriptor) -> String {
    let mut v = match serde_json::to_value(d) {
        Ok(v) => v,
        Err(_) => return String::new(),
    };
    if let Some(obj) = v.as_object_mut() {
        obj.remove("source");
    }
    let bytes = serde_json::to_vec(&sort_json(v)).unwrap_or_default();
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let mut a = WorkloadDescriptor::for_image("web", "nginx:1.25");
        a.env.insert("B".into(), "2".into());
        a.env.insert("A".into(), "1".into());
        let h1 = descriptor_digest(&a);
        assert_eq!(h1.len(), 64);
        assert_eq!(h1, descriptor_digest(&a.clone()));

        let mut moved = a.clone();
        moved.source = "/elsewhere.yaml".into();
        assert_eq!(h1, descriptor_digest(&moved));

        let mut changed = a.clone();
        changed.image = moor_core::ImageSource::Image { reference: "nginx:1.26".into() };
        assert_ne!(h1, descriptor_digest(&changed));
    }
}
