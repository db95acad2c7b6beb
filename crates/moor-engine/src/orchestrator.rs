use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use moor_core::{
    resolve_readiness_timeout, BatchResult, DescriptorLoader, EffectiveTimeout, HealthStatus, ImageSource, MoorError,
    OperationKind, Readiness, RecordStatus, RetryPolicy, RuntimeError, StateLimits, TrackedRecord, WorkloadDescriptor,
};
use moor_runtime::{ListFilter, RuntimeAdapter};
use moor_state::StateStore;
use tracing::{debug, info, warn};

use crate::{
    apply_sweep, check_records, remove_verified, with_transient_retry, BatchExecutor, CancelToken, Clock,
    ReadinessMonitor, RemovalOutcome, SweepReport, WatchState,
};

/// Knobs the engine needs, resolved from config by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub limits: StateLimits,
    pub retry: RetryPolicy,
    pub stop_timeout: Duration,
    pub default_readiness_timeout: Option<Duration>,
    pub poll_interval: Duration,
    pub parallelism: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            limits: StateLimits::default(),
            retry: RetryPolicy::default(),
            stop_timeout: Duration::from_secs(10),
            default_readiness_timeout: None,
            poll_interval: Duration::from_secs(1),
            parallelism: 1,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GenerateOptions {
    pub start: bool,
    pub force: bool,
    /// Invoker-supplied readiness timeout for this call.
    pub timeout: Option<Duration>,
}

impl GenerateOptions {
    pub fn started() -> Self {
        Self { start: true, ..Self::default() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleReport {
    pub name: String,
    pub status: RecordStatus,
    pub readiness: Readiness,
    pub description: String,
    pub warnings: Vec<String>,
}

impl LifecycleReport {
    fn from_record(rec: &TrackedRecord, warnings: Vec<String>) -> Self {
        Self {
            name: rec.name.clone(),
            status: rec.status,
            readiness: rec.readiness,
            description: rec.describe(),
            warnings,
        }
    }

    pub fn summary(&self) -> String {
        if self.warnings.is_empty() {
            self.description.clone()
        } else {
            format!("{} (warning: {})", self.description, self.warnings.join("; "))
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CleanupTarget {
    Names(Vec<String>),
    /// Every name the state document tracks.
    StateManaged,
    /// Every runtime container plus every tracked name.
    FullRuntime,
}

/// Recorded state next to what the runtime reports right now.
#[derive(Clone, Debug)]
pub struct StatusView {
    pub name: String,
    pub record: Option<TrackedRecord>,
    /// `None` when the runtime could not be asked.
    pub present: Option<bool>,
    pub running: Option<bool>,
    pub health: Option<HealthStatus>,
}

impl StatusView {
    /// The record claims a container the runtime does not have.
    pub fn is_drifted(&self) -> bool {
        self.record.as_ref().is_some_and(|r| r.status.implies_existence()) && self.present == Some(false)
    }
}

/// Sequences runtime calls, readiness waits and state updates per operation.
///
/// Runtime calls run without holding the store lock; every state change goes
/// through [`LifecycleOrchestrator::commit`], which locks, mutates and saves.
pub struct LifecycleOrchestrator {
    pub(crate) runtime: Arc<dyn RuntimeAdapter>,
    loader: Arc<dyn DescriptorLoader>,
    store: Mutex<StateStore>,
    clock: Arc<dyn Clock>,
    pub(crate) settings: EngineSettings,
    cancel: CancelToken,
}

impl LifecycleOrchestrator {
    pub fn new(
        runtime: Arc<dyn RuntimeAdapter>,
        loader: Arc<dyn DescriptorLoader>,
        store: StateStore,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        Self { runtime, loader, store: Mutex::new(store), clock, settings, cancel: CancelToken::new() }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub(crate) fn store(&self) -> MutexGuard<'_, StateStore> {
        self.store.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn commit<T>(&self, f: impl FnOnce(&mut StateStore) -> T) -> Result<T, MoorError> {
        let mut store = self.store();
        let out = f(&mut store);
        store.save()?;
        Ok(out)
    }

    fn call<T>(&self, op: OperationKind, name: &str, what: &str, f: impl FnMut() -> Result<T, RuntimeError>) -> Result<T, MoorError> {
        with_transient_retry(&self.settings.retry, self.clock.as_ref(), &format!("{what} {name}"), f)
            .map_err(|e| MoorError::from_runtime(op, name, e))
    }

    fn remove_container(&self, name: &str) -> RemovalOutcome {
        remove_verified(self.runtime.as_ref(), self.clock.as_ref(), &self.settings.retry, name, true)
    }

    pub fn get(&self, name: &str) -> Option<TrackedRecord> {
        self.store().get(name).cloned()
    }

    pub fn records(&self) -> Vec<TrackedRecord> {
        self.store().records()
    }

    /// The named container, or the most recently used one.
    pub fn resolve_target(&self, op: OperationKind, name: Option<&str>) -> Result<String, MoorError> {
        match name {
            Some(n) => Ok(n.to_string()),
            None => self.store().last_container().map(String::from).ok_or(MoorError::NoTarget { op }),
        }
    }

    pub fn generate(&self, descriptor: &WorkloadDescriptor, opts: GenerateOptions) -> Result<LifecycleReport, MoorError> {
        descriptor.validate()?;
        self.provision(OperationKind::Generate, descriptor, opts, true)
    }

    /// Recreates a tracked container from the file its record points at.
    pub fn install(&self, name: &str, opts: GenerateOptions) -> Result<LifecycleReport, MoorError> {
        let op = OperationKind::Install;
        let rec = self.get(name).ok_or_else(|| MoorError::NotPreviouslyGenerated { op, name: name.to_string() })?;
        let descriptor = self.loader.load(&rec.source, name)?;
        descriptor.validate()?;
        self.provision(op, &descriptor, opts, false)
    }

    /// Replaces a tracked container with one built from a new descriptor.
    pub fn update(&self, descriptor: &WorkloadDescriptor, opts: GenerateOptions) -> Result<LifecycleReport, MoorError> {
        let op = OperationKind::Update;
        descriptor.validate()?;
        if self.get(&descriptor.name).is_none() {
            return Err(MoorError::NotPreviouslyGenerated { op, name: descriptor.name.clone() });
        }
        self.provision(op, descriptor, GenerateOptions { force: true, ..opts }, false)
    }

    fn provision(
        &self,
        op: OperationKind,
        d: &WorkloadDescriptor,
        opts: GenerateOptions,
        record_conflicts: bool,
    ) -> Result<LifecycleReport, MoorError> {
        let name = d.name.as_str();
        let present = self.call(op, name, "exists", || self.runtime.exists(name))?;
        let tracked = self.get(name).is_some();
        if (present || (record_conflicts && tracked)) && !opts.force {
            return Err(MoorError::AlreadyExists { op, name: name.to_string() });
        }
        if present {
            info!(op = %op, container = name, "replacing existing container");
            self.remove_container(name).into_result(op, name)?;
        }
        if tracked {
            // keeps the record, and its source, through a failed build or create
            let outcome = if present { "replaced, awaiting create" } else { "awaiting create" };
            self.stamp(op, name, RecordStatus::Unknown, outcome)?;
        }

        if let ImageSource::Build(spec) = &d.image {
            let tag = self.call(op, name, "build", || self.runtime.build(spec))?;
            info!(container = name, tag = %tag, "image built");
        }
        let runtime_id = match self.call(op, name, "create", || self.runtime.create(d, opts.start)) {
            Ok(id) => Some(id),
            Err(e) => return Err(self.adopt_failed_create(op, d, e)),
        };

        let record = self.record_created(op, d, runtime_id, "created")?;
        info!(op = %op, container = name, start = opts.start, "container created");

        if !opts.start {
            return Ok(LifecycleReport::from_record(&record, vec![]));
        }
        let timeout = resolve_readiness_timeout(d.readiness_timeout, opts.timeout, self.settings.default_readiness_timeout);
        self.await_ready(op, name, d.has_health_check(), timeout)
    }

    fn record_created(
        &self,
        op: OperationKind,
        d: &WorkloadDescriptor,
        runtime_id: Option<String>,
        outcome: &str,
    ) -> Result<TrackedRecord, MoorError> {
        let name = d.name.as_str();
        let now = self.clock.now_unix();
        let digest = self.loader.digest(d);
        let limit = self.settings.limits.history_limit;
        self.commit(|s| {
            let mut rec = TrackedRecord::new(name, d.source.clone(), op, now);
            if let Some(prev) = s.get(name) {
                rec.history = prev.history.clone();
            }
            rec.descriptor_digest = digest;
            rec.has_health_check = d.has_health_check();
            rec.runtime_id = runtime_id;
            rec.record_operation(op, now, outcome, limit);
            s.put(rec.clone());
            rec
        })
    }

    /// A create that failed half way (`run` creates, then fails to start)
    /// can leave the container behind. Such a container is tracked as
    /// created so cleanup and a forced generate can reach it.
    fn adopt_failed_create(&self, op: OperationKind, d: &WorkloadDescriptor, err: MoorError) -> MoorError {
        let name = d.name.as_str();
        match self.call(op, name, "exists", || self.runtime.exists(name)) {
            Ok(true) => {
                warn!(op = %op, container = name, error = %err, "create failed but left a container; tracking it");
                if let Err(save) = self.record_created(op, d, None, &format!("create failed: {err}")) {
                    return save;
                }
            }
            Ok(false) => {}
            Err(check) => warn!(op = %op, container = name, error = %check, "could not check for a half-created container"),
        }
        err
    }

    /// Waits for readiness and records the result, whatever it is. Only a
    /// cancelled wait leaves the record untouched.
    fn await_ready(
        &self,
        op: OperationKind,
        name: &str,
        has_health_check: bool,
        timeout: EffectiveTimeout,
    ) -> Result<LifecycleReport, MoorError> {
        let monitor = ReadinessMonitor::new(self.runtime.as_ref(), self.clock.as_ref(), self.settings.poll_interval);
        let outcome = monitor.wait(name, has_health_check, timeout, &self.cancel);

        let (status, readiness, note) = match outcome.state {
            WatchState::Ready => (Some(RecordStatus::Running), Readiness::Ready, "ready".to_string()),
            WatchState::Unhealthy => (Some(RecordStatus::Running), Readiness::Unhealthy, "unhealthy".to_string()),
            WatchState::TimedOut => (None, Readiness::Unknown, format!("not ready after {}s", outcome.timeout.duration.as_secs())),
            WatchState::Cancelled | WatchState::Waiting => {
                let rec = self.get(name).ok_or_else(|| record_gone(op, name))?;
                return Ok(LifecycleReport::from_record(&rec, vec!["readiness wait cancelled".to_string()]));
            }
        };

        let now = self.clock.now_unix();
        let limit = self.settings.limits.history_limit;
        let record = self.commit(|s| {
            let mut rec = s.get(name)?.clone();
            if let Some(status) = status {
                rec.status = status;
            }
            rec.readiness = readiness;
            rec.record_operation(op, now, note, limit);
            s.put(rec.clone());
            Some(rec)
        })?;
        let record = record.ok_or_else(|| record_gone(op, name))?;

        match outcome.state {
            WatchState::Unhealthy => Err(MoorError::ReadinessUnhealthy { op, name: name.to_string() }),
            WatchState::TimedOut => {
                let warning = MoorError::ReadinessTimeout { op, name: name.to_string(), timeout: outcome.timeout.duration };
                warn!(container = name, source = ?outcome.timeout.source, "{warning}");
                Ok(LifecycleReport::from_record(&record, vec![warning.to_string()]))
            }
            _ => {
                info!(op = %op, container = name, polls = outcome.polls, "container ready");
                Ok(LifecycleReport::from_record(&record, vec![]))
            }
        }
    }

    fn tracked(&self, op: OperationKind, name: &str) -> Result<TrackedRecord, MoorError> {
        self.get(name).ok_or_else(|| MoorError::NotPreviouslyGenerated { op, name: name.to_string() })
    }

    /// Sets status and appends history on an existing record. A record removed in the meantime stays removed.
    fn stamp(&self, op: OperationKind, name: &str, status: RecordStatus, outcome: &str) -> Result<Option<TrackedRecord>, MoorError> {
        let now = self.clock.now_unix();
        let limit = self.settings.limits.history_limit;
        self.commit(|s| {
            let mut rec = s.get(name)?.clone();
            rec.status = status;
            rec.readiness = Readiness::Unknown;
            rec.record_operation(op, now, outcome, limit);
            s.put(rec.clone());
            Some(rec)
        })
    }

    pub fn start(&self, name: &str, timeout: Option<Duration>) -> Result<LifecycleReport, MoorError> {
        self.start_as(OperationKind::Start, name, timeout)
    }

    fn start_as(&self, op: OperationKind, name: &str, timeout: Option<Duration>) -> Result<LifecycleReport, MoorError> {
        let rec = self.tracked(op, name)?;
        self.call(op, name, "start", || self.runtime.start(name))?;
        self.stamp(op, name, RecordStatus::Running, "started")?;

        // the workload file may have moved since; its override is then unavailable
        let descriptor_timeout = match self.loader.load(&rec.source, name) {
            Ok(d) => d.readiness_timeout,
            Err(e) => {
                debug!(container = name, error = %e, "descriptor not reloadable, skipping its timeout");
                None
            }
        };
        let timeout = resolve_readiness_timeout(descriptor_timeout, timeout, self.settings.default_readiness_timeout);
        self.await_ready(op, name, rec.has_health_check, timeout)
    }

    pub fn stop(&self, name: &str) -> Result<LifecycleReport, MoorError> {
        self.stop_as(OperationKind::Stop, name)
    }

    fn stop_as(&self, op: OperationKind, name: &str) -> Result<LifecycleReport, MoorError> {
        let rec = self.tracked(op, name)?;
        self.call(op, name, "stop", || self.runtime.stop(name, self.settings.stop_timeout))?;
        let rec = self.stamp(op, name, RecordStatus::Stopped, "stopped")?.unwrap_or(rec);
        info!(op = %op, container = name, "container stopped");
        Ok(LifecycleReport::from_record(&rec, vec![]))
    }

    /// Stop, then start with readiness evaluated afresh.
    pub fn restart(&self, name: &str, timeout: Option<Duration>) -> Result<LifecycleReport, MoorError> {
        self.stop_as(OperationKind::Restart, name)?;
        self.start_as(OperationKind::Restart, name, timeout)
    }

    /// Names a cleanup addresses. A full-runtime sweep needs `confirmed` or `force`.
    pub fn cleanup_targets(&self, target: CleanupTarget, force: bool, confirmed: bool) -> Result<Vec<String>, MoorError> {
        let op = OperationKind::Cleanup;
        match target {
            CleanupTarget::Names(names) => Ok(names),
            CleanupTarget::StateManaged => Ok(self.store().names()),
            CleanupTarget::FullRuntime => {
                if !(force || confirmed) {
                    return Err(MoorError::ConfirmationRequired { op });
                }
                let mut names = self.call(op, "*", "list", || self.runtime.list(&ListFilter::All))?;
                for tracked in self.store().names() {
                    if !names.contains(&tracked) {
                        names.push(tracked);
                    }
                }
                Ok(names)
            }
        }
    }

    pub fn cleanup(&self, target: CleanupTarget, force: bool, confirmed: bool) -> Result<BatchResult, MoorError> {
        let names = self.cleanup_targets(target, force, confirmed)?;
        BatchExecutor::new(self.settings.parallelism).run(OperationKind::Cleanup, &names, |n: &String| self.cleanup_one(n))
    }

    /// Removes one container with verification, then forgets its record. A
    /// container that is still present keeps its record.
    pub fn cleanup_one(&self, name: &str) -> Result<String, MoorError> {
        let op = OperationKind::Cleanup;
        let outcome = self.remove_container(name);
        let was_present = matches!(outcome, RemovalOutcome::Removed { was_present: true, .. });
        outcome.into_result(op, name)?;

        let had_record = {
            let mut store = self.store();
            let had = store.remove(name).is_some();
            if had {
                store.save()?;
            }
            had
        };
        info!(container = name, was_present, had_record, "cleaned up");
        Ok(match (was_present, had_record) {
            (true, _) => "removed",
            (false, true) => "already gone, record dropped",
            (false, false) => "not present",
        }
        .to_string())
    }

    pub fn inspect(&self, name: &str) -> StatusView {
        let record = self.get(name);
        let present = self.runtime.exists(name).ok();
        let (running, health) = if present == Some(true) {
            let health = match &record {
                Some(r) if r.has_health_check => self.runtime.inspect_health(name).ok(),
                _ => None,
            };
            (self.runtime.inspect_running(name).ok(), health)
        } else {
            (None, None)
        };
        StatusView { name: name.to_string(), record, present, running, health }
    }

    /// Prunes records of containers the runtime no longer has. The runtime is
    /// queried outside the store lock; the document is written only on change.
    pub fn sweep(&self) -> Result<SweepReport, MoorError> {
        let records = self.records();
        let report = check_records(&records, self.runtime.as_ref());
        if !report.is_noop() {
            let mut store = self.store();
            if apply_sweep(&mut store, &report) {
                store.save()?;
            }
        }
        Ok(report)
    }
}

fn record_gone(op: OperationKind, name: &str) -> MoorError {
    MoorError::NotFound { op, name: name.to_string(), cause: "record dropped during the readiness wait".to_string() }
}
