use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use moor_core::{BuildSpec, HealthStatus, RuntimeError, WorkloadDescriptor};

use crate::types::{ListFilter, RuntimeAdapter, MANAGED_LABEL, SOURCE_LABEL};

/// In-memory runtime for tests, with per-container fault scripts.
#[derive(Default)]
pub struct FakeRuntime {
    inner: Mutex<Inner>,
}

#[derive(Clone, Debug)]
pub struct FakeContainer {
    pub id: String,
    pub image: String,
    pub running: bool,
    pub has_health_check: bool,
    pub labels: BTreeMap<String, String>,
}

#[derive(Default)]
struct Inner {
    containers: BTreeMap<String, FakeContainer>,
    scripts: HashMap<String, Script>,
    calls: Vec<String>,
    builds: Vec<String>,
    next_id: u64,
}

#[derive(Default)]
struct Script {
    exists_error: Option<RuntimeError>,
    create_failures: VecDeque<RuntimeError>,
    /// `create` makes the container, then fails as a `run` whose start half failed.
    create_then_fail: VecDeque<RuntimeError>,
    start_failures: VecDeque<RuntimeError>,
    stop_failures: VecDeque<RuntimeError>,
    remove_failures: VecDeque<RuntimeError>,
    remove_always: Option<RuntimeError>,
    /// `remove` reports success but the container stays.
    remove_ignored: bool,
    health: VecDeque<HealthStatus>,
    health_probe_error: bool,
    not_running_polls: u32,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn script(&self, name: &str, f: impl FnOnce(&mut Script)) {
        let mut inner = self.lock();
        f(inner.scripts.entry(name.to_string()).or_default());
    }

    /// Seed a container that exists in the runtime without moor having created it.
    pub fn insert(&self, name: &str, image: &str, running: bool) {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = format!("fake-{:012}", inner.next_id);
        inner.containers.insert(name.to_string(), FakeContainer {
            id,
            image: image.to_string(),
            running,
            has_health_check: false,
            labels: BTreeMap::new(),
        });
    }

    /// Drop a container behind moor's back.
    pub fn vanish(&self, name: &str) {
        self.lock().containers.remove(name);
    }

    pub fn fail_exists(&self, name: &str, err: RuntimeError) {
        self.script(name, |s| s.exists_error = Some(err));
    }

    pub fn fail_create(&self, name: &str, errors: Vec<RuntimeError>) {
        self.script(name, |s| s.create_failures.extend(errors));
    }

    /// The next creates leave a stopped container behind and still fail.
    pub fn fail_create_after_creating(&self, name: &str, errors: Vec<RuntimeError>) {
        self.script(name, |s| s.create_then_fail.extend(errors));
    }

    pub fn fail_start(&self, name: &str, errors: Vec<RuntimeError>) {
        self.script(name, |s| s.start_failures.extend(errors));
    }

    pub fn fail_stop(&self, name: &str, errors: Vec<RuntimeError>) {
        self.script(name, |s| s.stop_failures.extend(errors));
    }

    /// The next `errors.len()` removals fail with these errors, in order.
    pub fn fail_remove(&self, name: &str, errors: Vec<RuntimeError>) {
        self.script(name, |s| s.remove_failures.extend(errors));
    }

    pub fn fail_remove_always(&self, name: &str, err: RuntimeError) {
        self.script(name, |s| s.remove_always = Some(err));
    }

    pub fn ignore_remove(&self, name: &str) {
        self.script(name, |s| s.remove_ignored = true);
    }

    /// Health answers for successive probes; the last one repeats.
    pub fn health_sequence(&self, name: &str, seq: Vec<HealthStatus>) {
        self.script(name, |s| s.health = seq.into());
    }

    pub fn fail_health_probe(&self, name: &str) {
        self.script(name, |s| s.health_probe_error = true);
    }

    /// Report "not running" for the first `polls` running checks.
    pub fn running_after_polls(&self, name: &str, polls: u32) {
        self.script(name, |s| s.not_running_polls = polls);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().containers.contains_key(name)
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.lock().containers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.lock().containers.keys().cloned().collect()
    }

    pub fn builds(&self) -> Vec<String> {
        self.lock().builds.clone()
    }

    /// Every call made so far, as `"<call> <name>"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, call: &str, name: &str) -> usize {
        let needle = format!("{call} {name}");
        self.lock().calls.iter().filter(|c| **c == needle).count()
    }

    /// Calls that change runtime state.
    pub fn mutating_calls(&self) -> Vec<String> {
        const MUTATING: [&str; 5] = ["create", "start", "stop", "remove", "build"];
        self.calls()
            .into_iter()
            .filter(|c| MUTATING.iter().any(|m| c.starts_with(&format!("{m} "))))
            .collect()
    }
}

fn not_found(name: &str) -> RuntimeError {
    RuntimeError::NotFound(name.to_string())
}

impl RuntimeAdapter for FakeRuntime {
    fn runtime_name(&self) -> &str {
        "fake"
    }

    fn exists(&self, name: &str) -> Result<bool, RuntimeError> {
        let mut inner = self.lock();
        inner.calls.push(format!("exists {name}"));
        if let Some(err) = inner.scripts.get(name).and_then(|s| s.exists_error.clone()) {
            return Err(err);
        }
        Ok(inner.containers.contains_key(name))
    }

    fn create(&self, descriptor: &WorkloadDescriptor, start: bool) -> Result<String, RuntimeError> {
        let name = descriptor.name.as_str();
        let mut inner = self.lock();
        inner.calls.push(format!("create {name}"));
        if let Some(err) = inner.scripts.get_mut(name).and_then(|s| s.create_failures.pop_front()) {
            return Err(err);
        }
        if inner.containers.contains_key(name) {
            return Err(RuntimeError::Definitive(format!("container name {name:?} is already in use")));
        }
        inner.next_id += 1;
        let id = format!("fake-{:012}", inner.next_id);
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(SOURCE_LABEL.to_string(), descriptor.source.clone());
        let half_failure = inner.scripts.get_mut(name).and_then(|s| s.create_then_fail.pop_front());
        inner.containers.insert(name.to_string(), FakeContainer {
            id: id.clone(),
            image: descriptor.image_reference().to_string(),
            running: start && half_failure.is_none(),
            has_health_check: descriptor.has_health_check(),
            labels,
        });
        match half_failure {
            Some(err) => Err(err),
            None => Ok(id),
        }
    }

    fn start(&self, name: &str) -> Result<(), RuntimeError> {
        let mut inner = self.lock();
        inner.calls.push(format!("start {name}"));
        if let Some(err) = inner.scripts.get_mut(name).and_then(|s| s.start_failures.pop_front()) {
            return Err(err);
        }
        let c = inner.containers.get_mut(name).ok_or_else(|| not_found(name))?;
        c.running = true;
        Ok(())
    }

    fn stop(&self, name: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        let mut inner = self.lock();
        inner.calls.push(format!("stop {name}"));
        if let Some(err) = inner.scripts.get_mut(name).and_then(|s| s.stop_failures.pop_front()) {
            return Err(err);
        }
        let c = inner.containers.get_mut(name).ok_or_else(|| not_found(name))?;
        c.running = false;
        Ok(())
    }

    fn remove(&self, name: &str, force: bool) -> Result<(), RuntimeError> {
        let mut inner = self.lock();
        inner.calls.push(format!("remove {name}"));
        let mut ignored = false;
        if let Some(s) = inner.scripts.get_mut(name) {
            if let Some(err) = s.remove_always.clone() {
                return Err(err);
            }
            if let Some(err) = s.remove_failures.pop_front() {
                return Err(err);
            }
            ignored = s.remove_ignored;
        }
        let c = inner.containers.get(name).ok_or_else(|| not_found(name))?;
        if c.running && !force {
            return Err(RuntimeError::Definitive(format!("cannot remove running container {name}")));
        }
        if !ignored {
            inner.containers.remove(name);
        }
        Ok(())
    }

    fn inspect_health(&self, name: &str) -> Result<HealthStatus, RuntimeError> {
        let mut inner = self.lock();
        inner.calls.push(format!("health {name}"));
        let c = inner.containers.get(name).cloned().ok_or_else(|| not_found(name))?;
        let Some(s) = inner.scripts.get_mut(name) else {
            return Ok(default_health(&c));
        };
        if s.health_probe_error {
            return Err(RuntimeError::Definitive("template parsing error: no health field".to_string()));
        }
        let status = if s.health.len() > 1 { s.health.pop_front() } else { s.health.front().copied() };
        Ok(status.unwrap_or_else(|| default_health(&c)))
    }

    fn inspect_running(&self, name: &str) -> Result<bool, RuntimeError> {
        let mut inner = self.lock();
        inner.calls.push(format!("running {name}"));
        let running = inner.containers.get(name).map(|c| c.running).ok_or_else(|| not_found(name))?;
        if let Some(s) = inner.scripts.get_mut(name) {
            if running && s.not_running_polls > 0 {
                s.not_running_polls -= 1;
                return Ok(false);
            }
        }
        Ok(running)
    }

    fn list(&self, filter: &ListFilter) -> Result<Vec<String>, RuntimeError> {
        let mut inner = self.lock();
        inner.calls.push("list *".to_string());
        Ok(inner
            .containers
            .iter()
            .filter(|(_, c)| match filter {
                ListFilter::All => true,
                ListFilter::Label { key, value } => c.labels.get(key) == Some(value),
            })
            .map(|(name, _)| name.clone())
            .collect())
    }

    fn build(&self, spec: &BuildSpec) -> Result<String, RuntimeError> {
        let mut inner = self.lock();
        inner.calls.push(format!("build {}", spec.tag));
        inner.builds.push(spec.tag.clone());
        Ok(spec.tag.clone())
    }
}

fn default_health(c: &FakeContainer) -> HealthStatus {
    match (c.has_health_check, c.running) {
        (false, _) => HealthStatus::None,
        (true, true) => HealthStatus::Healthy,
        (true, false) => HealthStatus::Starting,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_satisfies_runtime_contract() {
        let rt = FakeRuntime::new();
        crate::contract::run_runtime_contract_suite(&rt, "busybox:latest").unwrap();
    }

    #[test]
    fn scripted_remove_failures_are_consumed_in_order() {
        let rt = FakeRuntime::new();
        rt.insert("web", "nginx", false);
        rt.fail_remove("web", vec![RuntimeError::Transient("busy".into())]);
        assert!(matches!(rt.remove("web", true), Err(RuntimeError::Transient(_))));
        assert!(rt.remove("web", true).is_ok());
        assert!(!rt.contains("web"));
    }

    #[test]
    fn ignored_remove_leaves_container() {
        let rt = FakeRuntime::new();
        rt.insert("web", "nginx", false);
        rt.ignore_remove("web");
        rt.remove("web", true).unwrap();
        assert!(rt.exists("web").unwrap());
    }

    #[test]
    fn half_failed_create_leaves_a_stopped_container() {
        let rt = FakeRuntime::new();
        let d = WorkloadDescriptor::for_image("web", "nginx");
        rt.fail_create_after_creating("web", vec![RuntimeError::Definitive("port is already allocated".into())]);
        assert!(matches!(rt.create(&d, true), Err(RuntimeError::Definitive(_))));
        assert!(rt.contains("web"));
        assert!(!rt.container("web").unwrap().running);
    }

    #[test]
    fn health_sequence_repeats_last_value() {
        let rt = FakeRuntime::new();
        rt.insert("db", "postgres", true);
        rt.health_sequence("db", vec![HealthStatus::Starting, HealthStatus::Healthy]);
        assert_eq!(rt.inspect_health("db").unwrap(), HealthStatus::Starting);
        assert_eq!(rt.inspect_health("db").unwrap(), HealthStatus::Healthy);
        assert_eq!(rt.inspect_health("db").unwrap(), HealthStatus::Healthy);
    }

    #[test]
    fn running_after_polls_delays_running() {
        let rt = FakeRuntime::new();
        rt.insert("db", "postgres", true);
        rt.running_after_polls("db", 2);
        assert!(!rt.inspect_running("db").unwrap());
        assert!(!rt.inspect_running("db").unwrap());
        assert!(rt.inspect_running("db").unwrap());
    }

    #[test]
    fn mutating_calls_skip_probes() {
        let rt = FakeRuntime::new();
        rt.insert("a", "x", false);
        rt.exists("a").unwrap();
        rt.start("a").unwrap();
        assert_eq!(rt.mutating_calls(), vec!["start a"]);
    }
}
