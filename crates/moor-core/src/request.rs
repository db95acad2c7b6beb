use std::time::Duration;

use crate::{MoorError, OperationKind, WorkloadDescriptor};

/// Which containers a request addresses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TargetScope {
    /// The names (or descriptors) carried by the request.
    #[default]
    Named,
    /// Every name the state document tracks.
    StateManaged,
    /// Every container the runtime reports, tracked or not.
    FullRuntime,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestFlags {
    pub force: bool,
    pub no_start: bool,
    pub timeout_override: Option<Duration>,
    /// The user already confirmed a full-runtime sweep.
    pub confirmed: bool,
}

/// Normalized request handed over by the invoker.
#[derive(Clone, Debug)]
pub struct OperationRequest {
    pub kind: OperationKind,
    pub targets: Vec<String>,
    /// Workloads for generate and update in file order. One that failed to
    /// load stays in place as its error and is reported as that target's outcome.
    pub descriptors: Vec<Result<WorkloadDescriptor, MoorError>>,
    pub scope: TargetScope,
    pub flags: RequestFlags,
}

impl OperationRequest {
    pub fn new(kind: OperationKind) -> Self {
        Self { kind, targets: vec![], descriptors: vec![], scope: TargetScope::Named, flags: RequestFlags::default() }
    }

    pub fn with_targets(mut self, targets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_descriptors(mut self, descriptors: Vec<WorkloadDescriptor>) -> Self {
        self.descriptors = descriptors.into_iter().map(Ok).collect();
        self
    }

    pub fn with_loaded(mut self, loaded: Vec<Result<WorkloadDescriptor, MoorError>>) -> Self {
        self.descriptors = loaded;
        self
    }

    pub fn with_scope(mut self, scope: TargetScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_flags(mut self, flags: RequestFlags) -> Self {
        self.flags = flags;
        self
    }
}
