use std::path::PathBuf;

use moor_core::{DescriptorLoader, ImageSource, MoorError, Protocol, WorkloadDescriptor};
use moor_spec::{descriptor_digest, load_workloads, YamlSpecLoader};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/workloads").join(name)
}

fn valid(name: &str) -> Vec<WorkloadDescriptor> {
    load_workloads(&fixture(name)).unwrap().into_iter().collect::<Result<_, _>>().unwrap()
}

#[test]
fn loads_single_workload_fixture() {
    let all = valid("web.yaml");
    assert_eq!(all.len(), 1);
    let web = &all[0];
    assert_eq!(web.name, "web");
    assert_eq!(web.image_reference(), "nginx:1.25");
    assert_eq!(web.ports[0].to_publish_arg(), "8080:80/tcp");
    assert!(web.volumes[0].source.ends_with("html"));
    assert!(web.volumes[0].read_only);
    assert_eq!(web.readiness_timeout, Some(std::time::Duration::from_secs(90)));
    assert_eq!(web.health_check.as_ref().unwrap().retries, Some(3));
    assert!(PathBuf::from(&web.source).is_absolute());
}

#[test]
fn loads_stack_in_file_order() {
    let all = valid("stack.yaml");
    assert_eq!(all.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(), vec!["db", "api", "cache"]);
    let api = &all[1];
    match &api.image {
        ImageSource::Build(b) => {
            assert_eq!(b.tag, "moor-api:dev");
            assert!(PathBuf::from(&b.context).is_absolute());
        }
        other => panic!("api should build, got {other:?}"),
    }
    assert_eq!(api.ports[1].host, None);
    assert_eq!(api.ports[1].protocol, Protocol::Tcp);
    assert_eq!(all[0].volumes[0].source, "pgdata");
}

#[test]
fn invalid_fixture_fails_validation() {
    let mut all = load_workloads(&fixture("invalid_volume.yaml")).unwrap();
    match all.remove(0) {
        Err(MoorError::Validation { name, reason }) => {
            assert_eq!(name, "broken");
            assert!(reason.contains("must be absolute"), "{reason}");
        }
        other => panic!("expected a validation error, got {other:?}"),
    }
}

#[test]
fn one_invalid_entry_leaves_the_others_loadable() {
    let all = load_workloads(&fixture("batch.yaml")).unwrap();
    assert_eq!(all.len(), 5);
    let names: Vec<&str> = all
        .iter()
        .map(|w| match w {
            Ok(d) => d.name.as_str(),
            Err(e) => e.target().unwrap(),
        })
        .collect();
    assert_eq!(names, vec!["edge", "queue", "reports", "mailer", "search"]);
    assert!(matches!(&all[2], Err(MoorError::Validation { .. })));
    assert_eq!(all.iter().filter(|w| w.is_ok()).count(), 4);

    // install of a sibling still works off the same file
    let queue = YamlSpecLoader.load(&all[1].as_ref().unwrap().source, "queue").unwrap();
    assert_eq!(queue.image_reference(), "rabbitmq:3.13");
    assert!(matches!(YamlSpecLoader.load(&queue.source, "reports"), Err(MoorError::Validation { .. })));
}

#[test]
fn duplicate_names_fail_the_whole_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dup.yaml");
    std::fs::write(&path, "workloads:\n  - name: a\n    image: x\n  - name: a\n    image: y\n").unwrap();
    let err = load_workloads(&path).unwrap_err();
    assert!(err.to_string().contains("duplicate workload name a"), "{err:#}");
}

#[test]
fn loader_recovers_by_source_and_name() {
    let all = valid("stack.yaml");
    let loader = YamlSpecLoader;
    let cache = loader.load(&all[2].source, "cache").unwrap();
    assert_eq!(cache, all[2]);
    assert_eq!(loader.digest(&cache), Some(descriptor_digest(&cache)));

    assert!(matches!(loader.load(&all[2].source, "gone"), Err(MoorError::Validation { .. })));
    assert!(matches!(loader.load("/nonexistent/moor.yaml", "web"), Err(MoorError::Validation { .. })));
}
