//! Execution ledger.
//!
//! Bookkeeping after an execution attempt: the function record, the
//! append-only log, per-language run counters and accrued cost. Only a run
//! whose image built and whose container executed is charged; every other
//! attempt leaves a log entry and nothing else.

use std::sync::Arc;

use code_runner_core::{
    traits::{AccountStore, FunctionRegistry, LogStore},
    types::{AccountingSnapshot, DependencySet, ExecutionLog, ExecutionRequest, ExecutionResult, Function},
    Error, Result,
};
use code_runner_governance::track_charge;

use crate::scheduler::ExecutionScheduler;

/// Records execution attempts against functions and accounts.
pub struct ExecutionLedger {
    functions: Arc<dyn FunctionRegistry>,
    logs: Arc<dyn LogStore>,
    accounts: Arc<dyn AccountStore>,
    scheduler: Arc<ExecutionScheduler>,
    cost_per_run_cents: u64,
}

impl ExecutionLedger {
    pub fn new(
        functions: Arc<dyn FunctionRegistry>,
        logs: Arc<dyn LogStore>,
        accounts: Arc<dyn AccountStore>,
        scheduler: Arc<ExecutionScheduler>,
        cost_per_run_cents: u64,
    ) -> Self {
        Self {
            functions,
            logs,
            accounts,
            scheduler,
            cost_per_run_cents,
        }
    }

    pub fn cost_per_run_cents(&self) -> u64 {
        self.cost_per_run_cents
    }

    /// Fetch the function for the request's identity, creating it with the
    /// submitted source when unseen. A new function starts at run count 0.
    pub async fn open(&self, request: &ExecutionRequest) -> Result<Function> {
        let (function, created) = self
            .functions
            .get_or_create(
                &request.owner,
                &request.function_name,
                request.language,
                &request.source_code,
            )
            .await?;

        if created {
            tracing::info!(
                function_id = %function.id,
                key = %function.key(),
                "Registered new function"
            );
        }
        Ok(function)
    }

    /// Record a program that ran: overwrite the body, bump counters, charge.
    pub async fn record_run(
        &self,
        function: &Function,
        source: &str,
        deps: &DependencySet,
        result: &ExecutionResult,
    ) -> Result<AccountingSnapshot> {
        let identity = function.key().to_string();
        self.scheduler
            .serialized(&identity, || async move {
                let mut updated = function.clone();
                updated.code = source.to_string();
                updated.dependencies = deps.to_json()?;
                self.functions.save(&updated).await?;

                let run_count = self.functions.increment_run_count(function.id).await?;
                self.logs
                    .append(ExecutionLog::completed(
                        function.id,
                        result.stdout.clone(),
                        result.logged_error(),
                    ))
                    .await?;

                let language_runs = self
                    .accounts
                    .increment_runs(&function.owner, function.language)
                    .await?;
                let total_cost_cents = self
                    .accounts
                    .add_cost(&function.owner, self.cost_per_run_cents)
                    .await?;
                track_charge(function.language, self.cost_per_run_cents);

                tracing::info!(
                    function_id = %function.id,
                    owner = %function.owner,
                    run_count,
                    cost_cents = self.cost_per_run_cents,
                    total_cost_cents,
                    exit_code = result.exit_code,
                    "Execution recorded"
                );

                Ok::<_, Error>(AccountingSnapshot {
                    function_id: function.id,
                    cost_cents: self.cost_per_run_cents,
                    total_cost_cents,
                    run_count,
                    language_runs,
                })
            })
            .await
    }

    /// Record a failed image build. No counters or cost change.
    pub async fn record_build_failure(&self, function: &Function, diagnostic: &str) -> Result<()> {
        self.logs
            .append(ExecutionLog::failed(function.id, diagnostic))
            .await?;
        tracing::warn!(function_id = %function.id, "Build failure recorded");
        Ok(())
    }

    /// Record an attempt that failed for any other reason (engine, workspace).
    pub async fn record_failure(&self, function: &Function, error: &Error) -> Result<()> {
        self.logs
            .append(ExecutionLog::failed(function.id, error.to_string()))
            .await?;
        tracing::warn!(function_id = %function.id, code = error.code(), "Failed attempt recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use code_runner_core::types::Language;
    use code_runner_store::{InMemoryAccountStore, InMemoryFunctionRegistry, InMemoryLogStore};

    struct Fixture {
        ledger: ExecutionLedger,
        functions: Arc<InMemoryFunctionRegistry>,
        logs: Arc<InMemoryLogStore>,
        accounts: Arc<InMemoryAccountStore>,
    }

    fn fixture() -> Fixture {
        let functions = Arc::new(InMemoryFunctionRegistry::new());
        let logs = Arc::new(InMemoryLogStore::new());
        let accounts = Arc::new(InMemoryAccountStore::new());
        let ledger = ExecutionLedger::new(
            functions.clone(),
            logs.clone(),
            accounts.clone(),
            Arc::new(ExecutionScheduler::default()),
            1,
        );
        Fixture {
            ledger,
            functions,
            logs,
            accounts,
        }
    }

    fn request(code: &str) -> ExecutionRequest {
        ExecutionRequest::new("alice", Some("f1".into()), Language::Python, code)
    }

    #[tokio::test]
    async fn test_open_creates_with_zero_runs() {
        let f = fixture();
        let function = f.ledger.open(&request("print(1)")).await.unwrap();
        assert_eq!(function.run_count, 0);
        assert_eq!(function.code, "print(1)");
        assert_eq!(f.functions.len(), 1);
    }

    #[tokio::test]
    async fn test_record_run_charges_and_overwrites() {
        let f = fixture();
        let function = f.ledger.open(&request("print(1)")).await.unwrap();
        let deps: DependencySet = ["numpy"].into_iter().collect();
        let result = ExecutionResult {
            stdout: "2\n".into(),
            ..Default::default()
        };

        let snapshot = f
            .ledger
            .record_run(&function, "print(2)", &deps, &result)
            .await
            .unwrap();

        assert_eq!(snapshot.run_count, 1);
        assert_eq!(snapshot.cost_cents, 1);
        assert_eq!(snapshot.total_cost_cents, 1);
        assert_eq!(snapshot.language_runs, 1);

        let stored = f.functions.get(function.id).await.unwrap().unwrap();
        assert_eq!(stored.code, "print(2)");
        assert_eq!(stored.dependency_set().unwrap(), deps);

        let logs = f.logs.recent(function.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].output.as_deref(), Some("2\n"));
        assert!(logs[0].error.is_none());
    }

    #[tokio::test]
    async fn test_failed_program_keeps_stderr() {
        let f = fixture();
        let function = f.ledger.open(&request("raise SystemExit(3)")).await.unwrap();
        let result = ExecutionResult {
            stderr: "boom".into(),
            exit_code: 3,
            ..Default::default()
        };
        f.ledger
            .record_run(&function, "raise SystemExit(3)", &DependencySet::new(), &result)
            .await
            .unwrap();

        let logs = f.logs.recent(function.id, 10).await.unwrap();
        assert_eq!(logs[0].error.as_deref(), Some("boom"));
        assert_eq!(f.accounts.account("alice").await.unwrap().cost_cents, 1);
    }

    #[tokio::test]
    async fn test_build_failure_touches_only_the_log() {
        let f = fixture();
        let function = f.ledger.open(&request("import nump")).await.unwrap();

        f.ledger
            .record_build_failure(&function, "No matching distribution found for nump")
            .await
            .unwrap();

        let stored = f.functions.get(function.id).await.unwrap().unwrap();
        assert_eq!(stored.run_count, 0);
        assert_eq!(f.accounts.account("alice").await.unwrap().cost_cents, 0);

        let logs = f.logs.recent(function.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].output.is_none());
        assert!(logs[0].error.as_deref().unwrap().contains("nump"));
    }

    #[tokio::test]
    async fn test_concurrent_runs_count_exactly() {
        let f = fixture();
        let ledger = Arc::new(f.ledger);
        let function = ledger.open(&request("print(1)")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            let ledger = ledger.clone();
            let function = function.clone();
            handles.push(tokio::spawn(async move {
                let source = format!("print({})", i);
                ledger
                    .record_run(&function, &source, &DependencySet::new(), &ExecutionResult::default())
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = f.functions.get(function.id).await.unwrap().unwrap();
        assert_eq!(stored.run_count, 10);
        assert_eq!(f.logs.recent(function.id, 100).await.unwrap().len(), 10);
        let account = f.accounts.account("alice").await.unwrap();
        assert_eq!(account.python_runs, 10);
        assert_eq!(account.cost_cents, 10);
    }
}
