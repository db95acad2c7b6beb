use moor_core::{MoorError, OperationKind, RetryPolicy, RuntimeError};
use moor_runtime::RuntimeAdapter;
use tracing::{debug, warn};

use crate::Clock;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// Verified absent afterwards. `was_present` is false when the runtime never knew the name.
    Removed { attempts: u32, was_present: bool },
    StillPresent { attempts: u32, last_error: Option<String> },
}

impl RemovalOutcome {
    pub fn into_result(self, op: OperationKind, name: &str) -> Result<u32, MoorError> {
        match self {
            Self::Removed { attempts, .. } => Ok(attempts),
            Self::StillPresent { attempts, last_error } => {
                let mut detail = format!("still present after {attempts} removal attempt(s)");
                if let Some(e) = last_error {
                    detail.push_str(&format!(" (last error: {e})"));
                }
                Err(MoorError::PartialFailure { op, targets: vec![name.to_string()], detail })
            }
        }
    }
}

/// Requests removal and verifies absence, retrying within `policy`.
///
/// Every attempt ends with an existence check; that check, not the removal
/// call's result, decides the outcome. A definitive removal error stops
/// further attempts but is still followed by the check.
pub fn remove_verified(
    runtime: &dyn RuntimeAdapter,
    clock: &dyn Clock,
    policy: &RetryPolicy,
    name: &str,
    force: bool,
) -> RemovalOutcome {
    let mut attempts = 0;
    let mut was_present = true;
    let mut last_error = None;
    loop {
        attempts += 1;
        let give_up = match runtime.remove(name, force) {
            Ok(()) => false,
            Err(RuntimeError::NotFound(_)) => {
                if attempts == 1 {
                    was_present = false;
                }
                false
            }
            Err(e) => {
                let transient = e.is_transient();
                last_error = Some(e.to_string());
                !transient
            }
        };

        match runtime.exists(name) {
            Ok(false) => {
                debug!(container = name, attempts, "removal verified");
                return RemovalOutcome::Removed { attempts, was_present };
            }
            Ok(true) => {}
            Err(e) => last_error = Some(e.to_string()),
        }

        if give_up {
            break;
        }
        match policy.delay_after(attempts) {
            Some(delay) => {
                warn!(container = name, attempt = attempts, "container still present after removal, retrying");
                clock.sleep(delay);
            }
            None => break,
        }
    }
    warn!(container = name, attempts, error = last_error.as_deref().unwrap_or(""), "container could not be removed");
    RemovalOutcome::StillPresent { attempts, last_error }
}
