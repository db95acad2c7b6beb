use moor_core::{RetryPolicy, RuntimeError};
use tracing::warn;

use crate::Clock;

/// Re-runs `f` while it fails with a transient error, within `policy`.
/// NotFound and definitive errors are returned on the first occurrence.
pub fn with_transient_retry<T>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    what: &str,
    mut f: impl FnMut() -> Result<T, RuntimeError>,
) -> Result<T, RuntimeError> {
    let mut attempt = 1;
    loop {
        match f() {
            Err(e) if e.is_transient() => match policy.delay_after(attempt) {
                Some(delay) => {
                    warn!(call = what, attempt, error = %e, "transient runtime error, retrying");
                    clock.sleep(delay);
                    attempt += 1;
                }
                None => return Err(e),
            },
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;
    use std::time::Duration;

    #[test]
    fn retries_transient_then_succeeds() {
        let clock = ManualClock::default();
        let mut calls = 0;
        let out = with_transient_retry(&RetryPolicy::default(), &clock, "start web", || {
            calls += 1;
            if calls < 3 {
                Err(RuntimeError::Transient("daemon busy".into()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(out, Ok(3));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1); 2]);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let clock = ManualClock::default();
        let mut calls = 0;
        let out: Result<(), _> = with_transient_retry(&RetryPolicy::default(), &clock, "stop web", || {
            calls += 1;
            Err(RuntimeError::Transient("daemon busy".into()))
        });
        assert!(matches!(out, Err(RuntimeError::Transient(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn definitive_errors_are_not_retried() {
        let clock = ManualClock::default();
        let mut calls = 0;
        let out: Result<(), _> = with_transient_retry(&RetryPolicy::default(), &clock, "create web", || {
            calls += 1;
            Err(RuntimeError::Definitive("bad image".into()))
        });
        assert!(out.is_err());
        assert_eq!(calls, 1);
        assert!(clock.sleeps().is_empty());
    }
}
