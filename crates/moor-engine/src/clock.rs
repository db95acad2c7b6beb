use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time source for every wait in the engine.
///
/// `now` is monotonic and only meaningful as a difference; `now_unix` is
/// wall-clock seconds for record timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
    fn sleep(&self, d: Duration);
    fn now_unix(&self) -> i64;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, d: Duration) {
        std::thread::sleep(d)
    }

    fn now_unix(&self) -> i64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
    }
}

/// Test clock: `sleep` advances time instantly and is recorded.
pub struct ManualClock {
    inner: Mutex<ManualInner>,
}

struct ManualInner {
    elapsed: Duration,
    unix_origin: i64,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new(unix_origin: i64) -> Self {
        Self { inner: Mutex::new(ManualInner { elapsed: Duration::ZERO, unix_origin, sleeps: vec![] }) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn advance(&self, d: Duration) {
        self.lock().elapsed += d;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.lock().sleeps.iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_700_000_000)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.lock().elapsed
    }

    fn sleep(&self, d: Duration) {
        let mut inner = self.lock();
        inner.elapsed += d;
        inner.sleeps.push(d);
    }

    fn now_unix(&self) -> i64 {
        let inner = self.lock();
        inner.unix_origin + inner.elapsed.as_secs() as i64
    }
}

/// Shared flag a caller sets to abandon in-flight readiness waits.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
