//! In-memory store implementations using DashMap.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use code_runner_core::{
    traits::{AccountStore, FunctionRegistry, LogStore, UserStore},
    types::{Account, ExecutionLog, Function, FunctionId, FunctionKey, Language, User},
    Error, Result,
};

// =============================================================================
// Users
// =============================================================================

/// In-memory user directory with time-limited verification.
pub struct InMemoryUserStore {
    users: DashMap<String, User>,
    verification_ttl: Duration,
}

impl InMemoryUserStore {
    /// Create a store where verification lapses after `verification_ttl`.
    pub fn new(verification_ttl: Duration) -> Self {
        Self {
            users: DashMap::new(),
            verification_ttl,
        }
    }

    /// Register a user. Verified users are verified as of now.
    pub fn add_user(&self, username: impl Into<String>, verified: bool) {
        let username = username.into();
        let user = User {
            username: username.clone(),
            verified,
            verified_at: verified.then(Utc::now),
        };
        self.users.insert(username, user);
    }

    /// Mark a user verified as of now. Returns false when the user is unknown.
    pub fn verify(&self, username: &str) -> bool {
        match self.users.get_mut(username) {
            Some(mut user) => {
                user.verified = true;
                user.verified_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    /// Get the number of registered users.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new(Duration::minutes(30))
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_user(&self, username: &str) -> Result<Option<User>> {
        Ok(self.users.get(username).map(|r| r.value().clone()))
    }

    async fn is_verified(&self, user: &User) -> Result<bool> {
        Ok(user.is_verified_at(Utc::now(), self.verification_ttl))
    }
}

// =============================================================================
// Accounts
// =============================================================================

/// Per-user run counters and accrued cost.
#[derive(Debug)]
pub struct InMemoryAccountStore {
    accounts: DashMap<String, Account>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }
}

impl Default for InMemoryAccountStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn increment_runs(&self, owner: &str, language: Language) -> Result<u64> {
        let mut account = self
            .accounts
            .entry(owner.to_string())
            .or_insert_with(|| Account::new(owner));
        let runs = match language {
            Language::Python => &mut account.python_runs,
            Language::JavaScript => &mut account.javascript_runs,
        };
        *runs += 1;
        Ok(*runs)
    }

    async fn add_cost(&self, owner: &str, cents: u64) -> Result<u64> {
        let mut account = self
            .accounts
            .entry(owner.to_string())
            .or_insert_with(|| Account::new(owner));
        account.cost_cents += cents;
        Ok(account.cost_cents)
    }

    async fn account(&self, owner: &str) -> Result<Account> {
        Ok(self
            .accounts
            .get(owner)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| Account::new(owner)))
    }
}

// =============================================================================
// Function Registry
// =============================================================================

/// Function registry keyed by (owner, name, language).
#[derive(Debug)]
pub struct InMemoryFunctionRegistry {
    /// Identity → id. Held while a new function is inserted so creation is atomic.
    index: DashMap<FunctionKey, FunctionId>,
    functions: DashMap<FunctionId, Function>,
    next_id: AtomicU64,
}

impl InMemoryFunctionRegistry {
    pub fn new() -> Self {
        Self {
            index: DashMap::new(),
            functions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Get the number of stored functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Default for InMemoryFunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FunctionRegistry for InMemoryFunctionRegistry {
    async fn get_or_create(
        &self,
        owner: &str,
        name: &str,
        language: Language,
        default_code: &str,
    ) -> Result<(Function, bool)> {
        let key = FunctionKey::new(owner, name, language);
        match self.index.entry(key) {
            Entry::Occupied(entry) => {
                let id = *entry.get();
                let function = self
                    .functions
                    .get(&id)
                    .map(|r| r.value().clone())
                    .ok_or_else(|| Error::storage(format!("Index points at missing function {}", id)))?;
                Ok((function, false))
            }
            Entry::Vacant(entry) => {
                let id = FunctionId(self.next_id.fetch_add(1, Ordering::SeqCst));
                let function = Function {
                    id,
                    owner: owner.to_string(),
                    name: name.to_string(),
                    language,
                    code: default_code.to_string(),
                    dependencies: String::new(),
                    run_count: 0,
                };
                self.functions.insert(id, function.clone());
                entry.insert(id);
                tracing::debug!(function_id = %id, key = %function.key(), "Function created");
                Ok((function, true))
            }
        }
    }

    async fn save(&self, function: &Function) -> Result<()> {
        let mut stored = self
            .functions
            .get_mut(&function.id)
            .ok_or_else(|| Error::FunctionNotFound(function.id.to_string()))?;
        stored.code = function.code.clone();
        stored.dependencies = function.dependencies.clone();
        Ok(())
    }

    async fn increment_run_count(&self, id: FunctionId) -> Result<u64> {
        let mut stored = self
            .functions
            .get_mut(&id)
            .ok_or_else(|| Error::FunctionNotFound(id.to_string()))?;
        stored.run_count += 1;
        Ok(stored.run_count)
    }

    async fn get(&self, id: FunctionId) -> Result<Option<Function>> {
        Ok(self.functions.get(&id).map(|r| r.value().clone()))
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Function>> {
        let mut functions: Vec<Function> = self
            .functions
            .iter()
            .filter(|r| r.value().owner == owner)
            .map(|r| r.value().clone())
            .collect();
        functions.sort_by_key(|f| f.id.0);
        Ok(functions)
    }
}

// =============================================================================
// Execution Log
// =============================================================================

/// Append-only execution log, grouped by function.
#[derive(Debug)]
pub struct InMemoryLogStore {
    logs: DashMap<FunctionId, Vec<ExecutionLog>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self {
            logs: DashMap::new(),
        }
    }

    /// Total number of records across all functions.
    pub fn len(&self) -> usize {
        self.logs.iter().map(|r| r.value().len()).sum()
    }

    /// Check if the log is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(&self, log: ExecutionLog) -> Result<()> {
        self.logs.entry(log.function_id).or_default().push(log);
        Ok(())
    }

    async fn recent(&self, function_id: FunctionId, limit: usize) -> Result<Vec<ExecutionLog>> {
        Ok(self
            .logs
            .get(&function_id)
            .map(|r| r.value().iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
