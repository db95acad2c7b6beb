use std::time::Duration;

use moor_core::{EffectiveTimeout, HealthStatus};
use moor_runtime::RuntimeAdapter;
use tracing::{debug, warn};

use crate::{CancelToken, Clock};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WatchState {
    Waiting,
    Ready,
    TimedOut,
    Unhealthy,
    Cancelled,
}

impl WatchState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Waiting)
    }
}

/// One observation of the container, as fed to [`ReadinessWatch::observe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    Health(HealthStatus),
    Running(bool),
}

/// Readiness state machine for a single container. Pure: it never talks to
/// the runtime, so every transition is testable with plain values.
#[derive(Clone, Debug)]
pub struct ReadinessWatch {
    timeout: Duration,
    started: Duration,
    state: WatchState,
    polls: u32,
}

impl ReadinessWatch {
    pub fn new(timeout: Duration, started: Duration) -> Self {
        Self { timeout, started, state: WatchState::Waiting, polls: 0 }
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.started)
    }

    pub fn remaining(&self, now: Duration) -> Duration {
        self.timeout.saturating_sub(self.elapsed(now))
    }

    pub fn observe(&mut self, probe: Probe, now: Duration) -> WatchState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.polls += 1;
        self.state = match probe {
            Probe::Health(HealthStatus::Healthy) | Probe::Running(true) => WatchState::Ready,
            Probe::Health(HealthStatus::Unhealthy) => WatchState::Unhealthy,
            Probe::Health(HealthStatus::Starting | HealthStatus::None) | Probe::Running(false) => {
                if self.elapsed(now) >= self.timeout {
                    WatchState::TimedOut
                } else {
                    WatchState::Waiting
                }
            }
        };
        self.state
    }

    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.state = WatchState::Cancelled;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadinessOutcome {
    pub state: WatchState,
    pub timeout: EffectiveTimeout,
    pub waited: Duration,
    pub polls: u32,
}

/// Drives a [`ReadinessWatch`] against a runtime at a fixed poll interval.
pub struct ReadinessMonitor<'a> {
    runtime: &'a dyn RuntimeAdapter,
    clock: &'a dyn Clock,
    poll_interval: Duration,
}

impl<'a> ReadinessMonitor<'a> {
    pub fn new(runtime: &'a dyn RuntimeAdapter, clock: &'a dyn Clock, poll_interval: Duration) -> Self {
        Self { runtime, clock, poll_interval }
    }

    /// With a declared health check only `healthy` counts; a probe that reports
    /// no health state or fails outright falls back to the running flag.
    pub fn probe(&self, name: &str, has_health_check: bool) -> Probe {
        if has_health_check {
            match self.runtime.inspect_health(name) {
                Ok(HealthStatus::None) => {}
                Ok(status) => return Probe::Health(status),
                Err(e) => debug!(container = name, error = %e, "health probe failed, using running state"),
            }
        }
        match self.runtime.inspect_running(name) {
            Ok(running) => Probe::Running(running),
            Err(e) => {
                debug!(container = name, error = %e, "running probe failed");
                Probe::Running(false)
            }
        }
    }

    pub fn wait(&self, name: &str, has_health_check: bool, timeout: EffectiveTimeout, cancel: &CancelToken) -> ReadinessOutcome {
        let start = self.clock.now();
        let mut watch = ReadinessWatch::new(timeout.duration, start);
        debug!(container = name, timeout_secs = timeout.duration.as_secs(), source = ?timeout.source, "waiting for readiness");
        loop {
            if cancel.is_cancelled() {
                watch.cancel();
                break;
            }
            let probe = self.probe(name, has_health_check);
            if watch.observe(probe, self.clock.now()).is_terminal() {
                break;
            }
            let now = self.clock.now();
            self.clock.sleep(self.poll_interval.min(watch.remaining(now)));
        }
        let outcome =
            ReadinessOutcome { state: watch.state(), timeout, waited: watch.elapsed(self.clock.now()), polls: watch.polls() };
        match outcome.state {
            WatchState::TimedOut => warn!(container = name, waited_secs = outcome.waited.as_secs(), "readiness timed out"),
            state => debug!(container = name, ?state, polls = outcome.polls, "readiness wait finished"),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use moor_core::{TimeoutSource, WorkloadDescriptor};
    use moor_runtime::FakeRuntime;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn timeout(s: u64) -> EffectiveTimeout {
        EffectiveTimeout { duration: secs(s), source: TimeoutSource::Invoker }
    }

    #[test]
    fn watch_transitions() {
        let mut w = ReadinessWatch::new(secs(10), secs(0));
        assert_eq!(w.observe(Probe::Health(HealthStatus::Starting), secs(1)), WatchState::Waiting);
        assert_eq!(w.observe(Probe::Health(HealthStatus::Healthy), secs(2)), WatchState::Ready);
        // terminal states stick
        assert_eq!(w.observe(Probe::Health(HealthStatus::Unhealthy), secs(3)), WatchState::Ready);
        assert_eq!(w.polls(), 2);

        let mut w = ReadinessWatch::new(secs(10), secs(0));
        assert_eq!(w.observe(Probe::Health(HealthStatus::Unhealthy), secs(1)), WatchState::Unhealthy);

        let mut w = ReadinessWatch::new(secs(10), secs(5));
        assert_eq!(w.observe(Probe::Running(false), secs(14)), WatchState::Waiting);
        assert_eq!(w.observe(Probe::Running(false), secs(15)), WatchState::TimedOut);
    }

    #[test]
    fn ready_on_the_deadline_poll_still_counts() {
        let mut w = ReadinessWatch::new(secs(3), secs(0));
        assert_eq!(w.observe(Probe::Running(true), secs(3)), WatchState::Ready);
    }

    #[test]
    fn no_health_check_is_ready_once_running() {
        let rt = FakeRuntime::new();
        rt.create(&WorkloadDescriptor::for_image("web", "nginx"), true).unwrap();
        rt.running_after_polls("web", 2);
        let clock = ManualClock::default();
        let out = ReadinessMonitor::new(&rt, &clock, secs(1)).wait("web", false, timeout(30), &CancelToken::new());
        assert_eq!(out.state, WatchState::Ready);
        assert_eq!(out.polls, 3);
        assert_eq!(out.waited, secs(2));
        assert_eq!(rt.count_calls("health", "web"), 0);
    }

    #[test]
    fn health_check_requires_healthy_not_just_running() {
        let rt = FakeRuntime::new();
        let mut d = WorkloadDescriptor::for_image("db", "postgres");
        d.health_check = Some(moor_core::HealthCheck {
            test: vec!["CMD".into(), "true".into()],
            interval: None,
            timeout: None,
            retries: None,
            start_period: None,
        });
        rt.create(&d, true).unwrap();
        rt.health_sequence("db", vec![HealthStatus::Starting, HealthStatus::Starting, HealthStatus::Unhealthy]);
        let clock = ManualClock::default();
        let out = ReadinessMonitor::new(&rt, &clock, secs(1)).wait("db", true, timeout(30), &CancelToken::new());
        assert_eq!(out.state, WatchState::Unhealthy);
        assert_eq!(out.polls, 3);
        assert_eq!(rt.count_calls("running", "db"), 0);
    }

    #[test]
    fn failing_health_probe_falls_back_to_running() {
        let rt = FakeRuntime::new();
        rt.create(&WorkloadDescriptor::for_image("web", "nginx"), true).unwrap();
        rt.fail_health_probe("web");
        let clock = ManualClock::default();
        let out = ReadinessMonitor::new(&rt, &clock, secs(1)).wait("web", true, timeout(30), &CancelToken::new());
        assert_eq!(out.state, WatchState::Ready);
        assert_eq!(rt.count_calls("running", "web"), 1);
    }

    #[test]
    fn times_out_without_oversleeping() {
        let rt = FakeRuntime::new();
        rt.create(&WorkloadDescriptor::for_image("web", "nginx"), false).unwrap();
        let clock = ManualClock::default();
        let out = ReadinessMonitor::new(&rt, &clock, secs(2)).wait("web", false, timeout(5), &CancelToken::new());
        assert_eq!(out.state, WatchState::TimedOut);
        assert_eq!(out.waited, secs(5));
        assert_eq!(clock.sleeps(), vec![secs(2), secs(2), secs(1)]);
    }

    #[test]
    fn cancelled_before_first_poll() {
        let rt = FakeRuntime::new();
        rt.create(&WorkloadDescriptor::for_image("web", "nginx"), false).unwrap();
        let clock = ManualClock::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let out = ReadinessMonitor::new(&rt, &clock, secs(1)).wait("web", false, timeout(5), &cancel);
        assert_eq!(out.state, WatchState::Cancelled);
        assert_eq!(out.polls, 0);
    }
}
