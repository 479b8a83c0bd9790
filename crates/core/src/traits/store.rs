//! Collaborator store traits.
//!
//! The pipeline only depends on these contracts; persistence is provided by
//! whichever implementation is wired in at startup.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Account, ExecutionLog, Function, FunctionId, Language, User};

/// Identity and verification lookup.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a user by username.
    async fn get_user(&self, username: &str) -> Result<Option<User>>;

    /// Whether the user's verification is currently valid.
    async fn is_verified(&self, user: &User) -> Result<bool>;
}

/// Function registry keyed by (owner, name, language).
#[async_trait]
pub trait FunctionRegistry: Send + Sync {
    /// Fetch the function for the identity, creating it with `default_code` if unseen.
    /// Returns the function and whether it was created.
    async fn get_or_create(
        &self,
        owner: &str,
        name: &str,
        language: Language,
        default_code: &str,
    ) -> Result<(Function, bool)>;

    /// Persist code and dependencies. Does not change `run_count`.
    async fn save(&self, function: &Function) -> Result<()>;

    /// Atomically increment the run counter and return the new value.
    async fn increment_run_count(&self, id: FunctionId) -> Result<u64>;

    /// Load a function by ID.
    async fn get(&self, id: FunctionId) -> Result<Option<Function>>;

    /// List all functions owned by a user.
    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Function>>;
}

/// Append-only execution log.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append an execution record.
    async fn append(&self, log: ExecutionLog) -> Result<()>;

    /// Most recent records for a function, newest first.
    async fn recent(&self, function_id: FunctionId, limit: usize) -> Result<Vec<ExecutionLog>>;
}

/// Per-user usage counters and accrued cost.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Increment the language-specific run counter. Returns the new value.
    async fn increment_runs(&self, owner: &str, language: Language) -> Result<u64>;

    /// Add to the accrued cost. Returns the new total in cents.
    async fn add_cost(&self, owner: &str, cents: u64) -> Result<u64>;

    /// Current counters for a user.
    async fn account(&self, owner: &str) -> Result<Account>;
}
