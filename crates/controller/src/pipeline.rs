//! The sandboxed execution pipeline.
//!
//! request → authorize → extract → open function → materialize → build (or
//! reuse) → run → record. Each execution runs on its own tokio task so that
//! a dropped caller never leaves a half-finished container or an unrecorded
//! run behind.

use std::sync::Arc;
use std::time::Instant;

use tracing::Instrument;

use code_runner_core::{
    traits::{AccountStore, FunctionRegistry, LogStore, UserStore},
    types::{
        Account, DependencySet, ExecutionLog, ExecutionOutcome, ExecutionRequest, ExecutionResult,
        Function, FunctionId, User,
    },
    Error, Result,
};
use code_runner_governance::{track_build, track_execution, track_run, ExecutionOutcomeKind};
use code_runner_sandbox::{extract, BuildContext, ImageHandle, SandboxConfig, SandboxEngine};

use crate::ledger::ExecutionLedger;
use crate::scheduler::ExecutionScheduler;

/// Number of log entries returned with a function's detail.
pub const RECENT_LOG_LIMIT: usize = 10;

/// A function together with its most recent execution logs.
#[derive(Debug, Clone)]
pub struct FunctionDetail {
    pub function: Function,
    pub logs: Vec<ExecutionLog>,
}

pub struct ExecutionPipeline {
    pub(crate) users: Arc<dyn UserStore>,
    pub(crate) functions: Arc<dyn FunctionRegistry>,
    pub(crate) logs: Arc<dyn LogStore>,
    pub(crate) accounts: Arc<dyn AccountStore>,
    pub(crate) engine: Arc<dyn SandboxEngine>,
    pub(crate) scheduler: Arc<ExecutionScheduler>,
    pub(crate) ledger: ExecutionLedger,
    pub(crate) config: SandboxConfig,
}

impl ExecutionPipeline {
    pub fn scheduler(&self) -> &ExecutionScheduler {
        &self.scheduler
    }

    pub fn sandbox_config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Resolve a user and require a currently valid verification.
    pub async fn authorize(&self, username: &str) -> Result<User> {
        let user = self
            .users
            .get_user(username)
            .await?
            .ok_or_else(|| Error::UserNotFound(username.to_string()))?;
        if !self.users.is_verified(&user).await? {
            return Err(Error::Unverified(username.to_string()));
        }
        Ok(user)
    }

    /// Execute a submission and return its output with updated accounting.
    ///
    /// The work is dispatched onto its own task; dropping the returned future
    /// does not cancel it.
    pub async fn execute(self: &Arc<Self>, request: ExecutionRequest) -> Result<ExecutionOutcome> {
        if request.owner.trim().is_empty() {
            return Err(Error::invalid_request("username must not be empty"));
        }

        let request_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "execution",
            request_id = %request_id,
            owner = %request.owner,
            function = %request.function_name,
            language = %request.language,
        );

        let pipeline = Arc::clone(self);
        let task = tokio::spawn(
            async move { pipeline.run_to_completion(request_id, request).await }.instrument(span),
        );
        task.await
            .map_err(|e| Error::internal(format!("Execution task failed: {}", e)))?
    }

    async fn run_to_completion(
        &self,
        request_id: String,
        request: ExecutionRequest,
    ) -> Result<ExecutionOutcome> {
        let language = request.language;

        if let Err(e) = self.authorize(&request.owner).await {
            track_execution(language, ExecutionOutcomeKind::Rejected);
            return Err(e);
        }

        let deps = extract(&request.source_code, language);
        tracing::debug!(dependencies = ?deps, "Dependencies extracted");

        let function = self.ledger.open(&request).await?;

        let slot = self.scheduler.acquire_slot().await?;
        let attempt = self.build_and_run(&request_id, &request, &deps).await;
        drop(slot);

        let result = match attempt {
            Ok(result) => result,
            Err(Error::BuildFailed(diagnostic)) => {
                track_execution(language, ExecutionOutcomeKind::BuildFailure);
                self.ledger.record_build_failure(&function, &diagnostic).await?;
                return Err(Error::BuildFailed(diagnostic));
            }
            Err(e) => {
                track_execution(language, ExecutionOutcomeKind::InfrastructureFailure);
                tracing::error!(function_id = %function.id, error = %e, "Execution aborted");
                if let Err(log_err) = self.ledger.record_failure(&function, &e).await {
                    tracing::error!(error = %log_err, "Failed to record aborted execution");
                }
                return Err(e);
            }
        };

        let snapshot = self
            .ledger
            .record_run(&function, &request.source_code, &deps, &result)
            .await?;

        let kind = if result.timed_out {
            ExecutionOutcomeKind::Timeout
        } else if result.success() {
            ExecutionOutcomeKind::Success
        } else {
            ExecutionOutcomeKind::RuntimeFailure
        };
        track_execution(language, kind);

        Ok(ExecutionOutcome::new(result, snapshot))
    }

    /// Build (or reuse) the image and run it once.
    async fn build_and_run(
        &self,
        request_id: &str,
        request: &ExecutionRequest,
        deps: &DependencySet,
    ) -> Result<ExecutionResult> {
        let language = request.language;
        let reuse = self.config.reuse_images;

        let tag = if reuse {
            let recipe = self.config.recipes.dockerfile(language);
            ImageHandle::content_tag(language, &request.source_code, deps, &recipe)
        } else {
            ImageHandle::request_tag(language, request_id)
        };

        let image = if reuse && self.engine.image_exists(&tag).await? {
            tracing::debug!(tag = %tag, "Reusing existing image");
            ImageHandle {
                tag,
                language,
                reused: true,
            }
        } else {
            // The build context lives only for the duration of the build
            let context = BuildContext::materialize(
                self.config.workspace_root.as_deref(),
                request_id,
                language,
                &request.source_code,
                deps,
                &self.config.recipes,
            )
            .await?;
            let started = Instant::now();
            let image = self.engine.build(&context, &tag).await?;
            track_build(language, started.elapsed().as_secs_f64());
            image
        };

        let started = Instant::now();
        let run = self.engine.run(&image).await;
        track_run(language, started.elapsed().as_secs_f64());

        if !reuse {
            if let Err(e) = self.engine.remove_image(&image).await {
                tracing::warn!(tag = %image.tag, error = %e, "Failed to remove per-request image");
            }
        }

        run
    }

    // =========================================================================
    // Read operations
    // =========================================================================

    /// All functions owned by a verified user.
    pub async fn list_functions(&self, username: &str) -> Result<Vec<Function>> {
        self.authorize(username).await?;
        self.functions.list_by_owner(username).await
    }

    /// A function owned by `username` with its most recent logs, newest first.
    pub async fn function_detail(&self, username: &str, id: FunctionId) -> Result<FunctionDetail> {
        self.authorize(username).await?;
        let function = self
            .functions
            .get(id)
            .await?
            .filter(|f| f.owner == username)
            .ok_or_else(|| Error::FunctionNotFound(id.to_string()))?;
        let logs = self.logs.recent(id, RECENT_LOG_LIMIT).await?;
        Ok(FunctionDetail { function, logs })
    }

    /// Run counters and accrued cost for a verified user.
    pub async fn usage(&self, username: &str) -> Result<Account> {
        self.authorize(username).await?;
        self.accounts.account(username).await
    }
}
