use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use moor_core::{BatchResult, MoorError, OperationKind, WorkloadDescriptor};
use tracing::{debug, info};

/// Anything a batch can be run over.
pub trait BatchTarget {
    fn target_name(&self) -> &str;
}

impl BatchTarget for String {
    fn target_name(&self) -> &str {
        self
    }
}

impl BatchTarget for WorkloadDescriptor {
    fn target_name(&self) -> &str {
        &self.name
    }
}

/// A workload that may have failed to load; the error names its target.
impl BatchTarget for Result<WorkloadDescriptor, MoorError> {
    fn target_name(&self) -> &str {
        match self {
            Ok(d) => &d.name,
            Err(e) => e.target().unwrap_or("?"),
        }
    }
}

pub type TargetRun = (String, Result<String, MoorError>);

/// Runs one operation over many targets, continuing past per-target
/// failures. Results come back in input order whatever the parallelism.
#[derive(Clone, Copy, Debug)]
pub struct BatchExecutor {
    parallelism: usize,
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self { parallelism: 1 }
    }
}

impl BatchExecutor {
    pub fn new(parallelism: usize) -> Self {
        Self { parallelism: parallelism.max(1) }
    }

    /// Per-target results. Stops scheduling new targets once a failure that
    /// is fatal to the whole invocation (state I/O, corruption) is seen.
    pub fn run_each<T, F>(&self, op: OperationKind, items: &[T], f: F) -> Result<Vec<TargetRun>, MoorError>
    where
        T: BatchTarget + Sync,
        F: Fn(&T) -> Result<String, MoorError> + Sync,
    {
        let runs = if self.parallelism == 1 || items.len() <= 1 {
            let mut runs = Vec::with_capacity(items.len());
            for item in items {
                let result = f(item);
                let fatal = matches!(&result, Err(e) if e.is_fatal_to_invocation());
                runs.push((item.target_name().to_string(), result));
                if fatal {
                    break;
                }
            }
            runs
        } else {
            self.run_parallel(items, &f)
        };

        if let Some(e) = runs.iter().find_map(|(_, r)| r.as_ref().err().filter(|e| e.is_fatal_to_invocation())) {
            return Err(e.clone());
        }
        for (name, result) in &runs {
            match result {
                Ok(summary) => debug!(op = %op, container = %name, summary = %summary, "target done"),
                Err(e) => info!(op = %op, container = %name, error = %e, "target failed"),
            }
        }
        Ok(runs)
    }

    pub fn run<T, F>(&self, op: OperationKind, items: &[T], f: F) -> Result<BatchResult, MoorError>
    where
        T: BatchTarget + Sync,
        F: Fn(&T) -> Result<String, MoorError> + Sync,
    {
        let mut batch = BatchResult::new(op);
        for (name, result) in self.run_each(op, items, f)? {
            batch.push(name, result);
        }
        info!(op = %op, succeeded = batch.succeeded(), failed = batch.failed(), "batch finished");
        Ok(batch)
    }

    fn run_parallel<T, F>(&self, items: &[T], f: &F) -> Vec<TargetRun>
    where
        T: BatchTarget + Sync,
        F: Fn(&T) -> Result<String, MoorError> + Sync,
    {
        let next = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let slots: Mutex<Vec<Option<TargetRun>>> = Mutex::new((0..items.len()).map(|_| None).collect());

        std::thread::scope(|s| {
            for _ in 0..self.parallelism.min(items.len()) {
                s.spawn(|| loop {
                    if abort.load(Ordering::SeqCst) {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(item) = items.get(i) else { break };
                    let result = f(item);
                    if matches!(&result, Err(e) if e.is_fatal_to_invocation()) {
                        abort.store(true, Ordering::SeqCst);
                    }
                    let mut slots = slots.lock().unwrap_or_else(|p| p.into_inner());
                    slots[i] = Some((item.target_name().to_string(), result));
                });
            }
        });

        // unscheduled slots only exist after an abort
        slots.into_inner().unwrap_or_else(|p| p.into_inner()).into_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("c{i}")).collect()
    }

    fn fail_third(name: &String) -> Result<String, MoorError> {
        if name == "c3" {
            Err(MoorError::Validation { name: name.clone(), reason: "bad".into() })
        } else {
            Ok("ok".into())
        }
    }

    #[test]
    fn continues_past_failures_in_order() {
        for parallelism in [1, 3] {
            let b = BatchExecutor::new(parallelism).run(OperationKind::Start, &names(5), fail_third).unwrap();
            assert_eq!(b.outcomes.iter().map(|o| o.name.as_str()).collect::<Vec<_>>(), vec!["c1", "c2", "c3", "c4", "c5"]);
            assert_eq!(b.succeeded(), 4);
            assert_eq!(b.failed(), 1);
            assert_eq!(b.failed_targets(), vec!["c3"]);
        }
    }

    #[test]
    fn fatal_error_aborts_the_batch() {
        let seen = Mutex::new(vec![]);
        let err = BatchExecutor::default()
            .run(OperationKind::Stop, &names(4), |n: &String| {
                seen.lock().unwrap().push(n.clone());
                if n == "c2" {
                    Err(MoorError::StateIo { path: "/x".into(), cause: "disk full".into() })
                } else {
                    Ok("stopped".into())
                }
            })
            .unwrap_err();
        assert!(matches!(err, MoorError::StateIo { .. }));
        assert_eq!(*seen.lock().unwrap(), vec!["c1", "c2"]);
    }
}
