//! Builder for ExecutionPipeline.

use std::sync::Arc;

use code_runner_core::{
    config::AppConfig,
    traits::{AccountStore, FunctionRegistry, LogStore, UserStore},
    Error, Result,
};
use code_runner_sandbox::{SandboxConfig, SandboxEngine};
use code_runner_store::{
    InMemoryAccountStore, InMemoryFunctionRegistry, InMemoryLogStore, InMemoryUserStore,
};

use crate::ledger::ExecutionLedger;
use crate::pipeline::ExecutionPipeline;
use crate::scheduler::ExecutionScheduler;

/// Builder for constructing an ExecutionPipeline.
///
/// Stores that are not set fall back to the in-memory implementations.
pub struct PipelineBuilder {
    sandbox_config: SandboxConfig,
    max_concurrent_executions: usize,
    cost_per_run_cents: u64,
    engine: Option<Arc<dyn SandboxEngine>>,
    users: Option<Arc<dyn UserStore>>,
    functions: Option<Arc<dyn FunctionRegistry>>,
    logs: Option<Arc<dyn LogStore>>,
    accounts: Option<Arc<dyn AccountStore>>,
}

impl PipelineBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            sandbox_config: SandboxConfig::default(),
            max_concurrent_executions: 4,
            cost_per_run_cents: 1,
            engine: None,
            users: None,
            functions: None,
            logs: None,
            accounts: None,
        }
    }

    /// Take limits, scheduler size and pricing from the application config.
    pub fn with_app_config(mut self, config: &AppConfig) -> Self {
        self.sandbox_config = SandboxConfig::from(&config.sandbox);
        self.max_concurrent_executions = config.scheduler.max_concurrent_executions;
        self.cost_per_run_cents = config.ledger.cost_per_run_cents;
        self
    }

    /// Set the sandbox configuration.
    pub fn with_sandbox_config(mut self, config: SandboxConfig) -> Self {
        self.sandbox_config = config;
        self
    }

    /// Set the global cap on concurrent build+run work.
    pub fn with_max_concurrent_executions(mut self, limit: usize) -> Self {
        self.max_concurrent_executions = limit;
        self
    }

    /// Set the fixed charge per successful run.
    pub fn with_cost_per_run_cents(mut self, cents: u64) -> Self {
        self.cost_per_run_cents = cents;
        self
    }

    /// Set the sandbox engine.
    pub fn with_engine(mut self, engine: Arc<dyn SandboxEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the user store.
    pub fn with_users(mut self, users: Arc<dyn UserStore>) -> Self {
        self.users = Some(users);
        self
    }

    /// Set the function registry.
    pub fn with_functions(mut self, functions: Arc<dyn FunctionRegistry>) -> Self {
        self.functions = Some(functions);
        self
    }

    /// Set the log store.
    pub fn with_logs(mut self, logs: Arc<dyn LogStore>) -> Self {
        self.logs = Some(logs);
        self
    }

    /// Set the account store.
    pub fn with_accounts(mut self, accounts: Arc<dyn AccountStore>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    /// Build the ExecutionPipeline. An engine is required.
    pub fn build(self) -> Result<ExecutionPipeline> {
        let engine = self
            .engine
            .ok_or_else(|| Error::internal("ExecutionPipeline requires a sandbox engine"))?;
        let users = self
            .users
            .unwrap_or_else(|| Arc::new(InMemoryUserStore::default()) as Arc<dyn UserStore>);
        let functions = self
            .functions
            .unwrap_or_else(|| Arc::new(InMemoryFunctionRegistry::new()) as Arc<dyn FunctionRegistry>);
        let logs = self
            .logs
            .unwrap_or_else(|| Arc::new(InMemoryLogStore::new()) as Arc<dyn LogStore>);
        let accounts = self
            .accounts
            .unwrap_or_else(|| Arc::new(InMemoryAccountStore::new()) as Arc<dyn AccountStore>);

        let scheduler = Arc::new(ExecutionScheduler::new(self.max_concurrent_executions));
        let ledger = ExecutionLedger::new(
            functions.clone(),
            logs.clone(),
            accounts.clone(),
            scheduler.clone(),
            self.cost_per_run_cents,
        );

        Ok(ExecutionPipeline {
            users,
            functions,
            logs,
            accounts,
            engine,
            scheduler,
            ledger,
            config: self.sandbox_config,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
