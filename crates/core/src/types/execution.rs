use serde::{Deserialize, Serialize};

use super::function::{FunctionId, DEFAULT_FUNCTION_NAME};
use super::language::Language;

// =============================================================================
// Execution Types
// =============================================================================

/// A single code submission. Transient, one per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub owner: String,
    pub function_name: String,
    pub language: Language,
    pub source_code: String,
}

impl ExecutionRequest {
    /// Build a request, falling back to the default function name when blank.
    pub fn new(
        owner: impl Into<String>,
        function_name: Option<String>,
        language: Language,
        source_code: impl Into<String>,
    ) -> Self {
        let function_name = function_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| DEFAULT_FUNCTION_NAME.to_string());
        Self {
            owner: owner.into(),
            function_name,
            language,
            source_code: source_code.into(),
        }
    }
}

/// What the sandbox observed when running a built image.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    /// The container was killed after exceeding the wall-clock limit.
    pub timed_out: bool,
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Whether the program exited cleanly within its time budget.
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// Stderr as recorded in the execution log: only kept for failed runs.
    pub fn logged_error(&self) -> Option<String> {
        if self.success() {
            None
        } else {
            Some(self.stderr.clone())
        }
    }
}

/// Counters returned by the ledger after a charged run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountingSnapshot {
    pub function_id: FunctionId,
    pub cost_cents: u64,
    pub total_cost_cents: u64,
    pub run_count: u64,
    pub language_runs: u64,
}

/// Response assembled for the caller of `execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub function_id: FunctionId,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub timed_out: bool,
    pub cost_cents: u64,
    pub total_cost_cents: u64,
    pub run_count: u64,
}

impl ExecutionOutcome {
    pub fn new(result: ExecutionResult, snapshot: AccountingSnapshot) -> Self {
        Self {
            function_id: snapshot.function_id,
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
            timed_out: result.timed_out,
            cost_cents: snapshot.cost_cents,
            total_cost_cents: snapshot.total_cost_cents,
            run_count: snapshot.run_count,
        }
    }
}

/// Render integer cents as a dollar amount.
pub fn cents_to_dollars(cents: u64) -> f64 {
    cents as f64 / 100.0
}
