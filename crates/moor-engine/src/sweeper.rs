use moor_core::{MoorError, TrackedRecord};
use moor_runtime::RuntimeAdapter;
use moor_state::StateStore;
use tracing::{info, warn};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    /// Records whose container the runtime no longer knows.
    pub pruned: Vec<String>,
    /// Records left alone because existence could not be determined.
    pub skipped: Vec<(String, String)>,
}

impl SweepReport {
    pub fn is_noop(&self) -> bool {
        self.pruned.is_empty()
    }
}

/// Runtime half of a sweep: decides which records are stale. Touches no state.
pub fn check_records(records: &[TrackedRecord], runtime: &dyn RuntimeAdapter) -> SweepReport {
    let mut report = SweepReport::default();
    for rec in records.iter().filter(|r| r.status.implies_existence()) {
        report.checked += 1;
        match runtime.exists(&rec.name) {
            Ok(true) => {}
            Ok(false) => report.pruned.push(rec.name.clone()),
            Err(e) => {
                warn!(container = %rec.name, error = %e, "existence unknown, keeping record");
                report.skipped.push((rec.name.clone(), e.to_string()));
            }
        }
    }
    report
}

/// State half of a sweep. Returns whether anything changed.
pub fn apply_sweep(store: &mut StateStore, report: &SweepReport) -> bool {
    let mut changed = false;
    for name in &report.pruned {
        if store.remove(name).is_some() {
            info!(container = %name, "pruned record of vanished container");
            changed = true;
        }
    }
    changed
}

/// Drops records whose container no longer exists. Never adds records, and
/// only writes the document when something was pruned.
pub fn sweep(store: &mut StateStore, runtime: &dyn RuntimeAdapter) -> Result<SweepReport, MoorError> {
    let report = check_records(&store.records(), runtime);
    if apply_sweep(store, &report) {
        store.save()?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use moor_core::{OperationKind, RecordStatus, RuntimeError, StateLimits};
    use moor_runtime::FakeRuntime;

    fn tracked(store: &mut StateStore, name: &str, status: RecordStatus) {
        let mut r = TrackedRecord::new(name, "/w.yaml", OperationKind::Generate, 1);
        r.status = status;
        store.put(r);
    }

    #[test]
    fn prunes_only_vanished_existence_claims() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StateStore::open(dir.path().join("state.json"), StateLimits::default()).unwrap();
        let rt = FakeRuntime::new();
        rt.insert("alive", "nginx", true);
        tracked(&mut store, "alive", RecordStatus::Running);
        tracked(&mut store, "gone", RecordStatus::Stopped);
        tracked(&mut store, "limbo", RecordStatus::Unknown);

        let report = sweep(&mut store, &rt).unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.pruned, vec!["gone"]);
        assert_eq!(store.names(), vec!["alive", "limbo"]);
    }

    #[test]
    fn uncertain_existence_never_prunes() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = StateStore::open(dir.path().join("state.json"), StateLimits::default()).unwrap();
        let rt = FakeRuntime::new();
        rt.fail_exists("web", RuntimeError::Transient("daemon unreachable".into()));
        tracked(&mut store, "web", RecordStatus::Running);

        let report = sweep(&mut store, &rt).unwrap();
        assert!(report.is_noop());
        assert_eq!(report.skipped.len(), 1);
        assert!(store.get("web").is_some());
        // nothing pruned, nothing written
        assert!(!dir.path().join("state.json").exists());
    }

    #[test]
    fn second_sweep_leaves_document_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut store = StateStore::open(&path, StateLimits::default()).unwrap();
        let rt = FakeRuntime::new();
        rt.insert("a", "nginx", true);
        tracked(&mut store, "a", RecordStatus::Running);
        tracked(&mut store, "b", RecordStatus::Created);
        store.save().unwrap();

        sweep(&mut store, &rt).unwrap();
        let first = std::fs::read(&path).unwrap();
        let again = sweep(&mut store, &rt).unwrap();
        assert!(again.is_noop());
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }
}
