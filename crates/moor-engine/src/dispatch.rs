use moor_core::{BatchResult, MoorError, OperationKind, OperationRequest, TargetScope, WorkloadDescriptor};
use tracing::{info, warn};

use crate::{BatchExecutor, BatchTarget, CleanupTarget, GenerateOptions, LifecycleOrchestrator, TargetRun};

impl LifecycleOrchestrator {
    /// Runs a normalized request.
    ///
    /// With a single target its own error is returned as-is; with several,
    /// every target is attempted and the per-target outcomes come back in a
    /// [`BatchResult`]. The state document is re-read first; destructive
    /// operations are followed by a sweep.
    pub fn execute(&self, req: &OperationRequest) -> Result<BatchResult, MoorError> {
        let op = req.kind;
        info!(op = %op, targets = req.targets.len(), descriptors = req.descriptors.len(), scope = ?req.scope, "executing request");
        // another moor invocation may have written since this one opened the document
        self.store().reload()?;
        let result = self.run_request(req);

        let fatal = matches!(&result, Err(e) if e.is_fatal_to_invocation());
        if op.is_destructive() && !fatal {
            let swept = self.sweep();
            match &swept {
                Ok(report) if !report.is_noop() => info!(pruned = ?report.pruned, "sweep pruned stale records"),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "post-operation sweep failed"),
            }
            let batch = result?;
            swept?;
            return Ok(batch);
        }
        result
    }

    fn run_request(&self, req: &OperationRequest) -> Result<BatchResult, MoorError> {
        let op = req.kind;
        let flags = &req.flags;
        let opts = GenerateOptions { start: !flags.no_start, force: flags.force, timeout: flags.timeout_override };
        let exec = BatchExecutor::new(self.settings.parallelism);

        let runs = match op {
            OperationKind::Generate | OperationKind::Update => {
                let descriptors = self.select_descriptors(req)?;
                exec.run_each(op, &descriptors, |loaded: &Loaded| {
                    let d = loaded.as_ref().map_err(|e| e.clone())?;
                    let report = if op == OperationKind::Generate { self.generate(d, opts) } else { self.update(d, opts) };
                    report.map(|r| r.summary())
                })?
            }
            OperationKind::Install | OperationKind::Start | OperationKind::Stop | OperationKind::Restart => {
                let names = self.select_names(req)?;
                exec.run_each(op, &names, |n: &String| {
                    let report = match op {
                        OperationKind::Install => self.install(n, opts),
                        OperationKind::Start => self.start(n, flags.timeout_override),
                        OperationKind::Stop => self.stop(n),
                        _ => self.restart(n, flags.timeout_override),
                    };
                    report.map(|r| r.summary())
                })?
            }
            OperationKind::Cleanup => {
                let target = match req.scope {
                    TargetScope::Named => CleanupTarget::Names(self.select_names(req)?),
                    TargetScope::StateManaged => CleanupTarget::StateManaged,
                    TargetScope::FullRuntime => CleanupTarget::FullRuntime,
                };
                let names = self.cleanup_targets(target, flags.force, flags.confirmed)?;
                exec.run_each(op, &names, |n: &String| self.cleanup_one(n))?
            }
        };
        collect(op, runs)
    }

    /// Workloads carried by the request, narrowed to `targets` when any are
    /// named. Entries that failed to load are kept so they fail in place.
    fn select_descriptors(&self, req: &OperationRequest) -> Result<Vec<Loaded>, MoorError> {
        if req.descriptors.is_empty() {
            return Err(MoorError::NoTarget { op: req.kind });
        }
        if req.targets.is_empty() {
            return Ok(req.descriptors.clone());
        }
        Ok(dedup(&req.targets)
            .into_iter()
            .map(|t| {
                req.descriptors.iter().find(|d| d.target_name() == t).cloned().unwrap_or_else(|| {
                    Err(MoorError::Validation { name: t, reason: "not defined in the given workload file".to_string() })
                })
            })
            .collect())
    }

    fn select_names(&self, req: &OperationRequest) -> Result<Vec<String>, MoorError> {
        match req.scope {
            TargetScope::StateManaged | TargetScope::FullRuntime => Ok(self.store().names()),
            TargetScope::Named if req.targets.is_empty() => Ok(vec![self.resolve_target(req.kind, None)?]),
            TargetScope::Named => Ok(dedup(&req.targets)),
        }
    }
}

type Loaded = Result<WorkloadDescriptor, MoorError>;

/// Names in first-seen order, each once.
fn dedup(targets: &[String]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(targets.len());
    for t in targets {
        if !names.contains(t) {
            names.push(t.clone());
        }
    }
    names
}

fn collect(op: OperationKind, runs: Vec<TargetRun>) -> Result<BatchResult, MoorError> {
    let mut batch = BatchResult::new(op);
    if runs.len() == 1 {
        if let Some((name, result)) = runs.into_iter().next() {
            batch.push(name, Ok(result?));
        }
        return Ok(batch);
    }
    for (name, result) in runs {
        batch.push(name, result);
    }
    Ok(batch)
}
