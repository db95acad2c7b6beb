use crate::{MoorError, OperationKind};

#[derive(Clone, Debug)]
pub struct TargetOutcome {
    pub name: String,
    /// Success summary, or the failure reason.
    pub result: Result<String, String>,
}

impl TargetOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-target results of a multi-target operation, in input order.
#[derive(Clone, Debug)]
pub struct BatchResult {
    pub operation: OperationKind,
    pub outcomes: Vec<TargetOutcome>,
}

impl BatchResult {
    pub fn new(operation: OperationKind) -> Self {
        Self { operation, outcomes: vec![] }
    }

    pub fn push(&mut self, name: impl Into<String>, result: Result<String, MoorError>) {
        self.outcomes.push(TargetOutcome { name: name.into(), result: result.map_err(|e| e.to_string()) });
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_full_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failed_targets(&self) -> Vec<String> {
        self.outcomes.iter().filter(|o| !o.is_success()).map(|o| o.name.clone()).collect()
    }

    pub fn summary(&self) -> String {
        format!("{}: {} succeeded, {} failed", self.operation, self.succeeded(), self.failed())
    }

    pub fn into_result(self) -> Result<Self, MoorError> {
        if self.is_full_success() {
            return Ok(self);
        }
        let detail = self
            .outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|r| format!("{}: {}", o.name, r)))
            .collect::<Vec<_>>()
            .join("; ");
        Err(MoorError::PartialFailure { op: self.operation, targets: self.failed_targets(), detail })
    }
}
