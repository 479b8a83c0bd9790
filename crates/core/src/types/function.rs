use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::language::{DependencySet, Language};

// =============================================================================
// Function Types
// =============================================================================

/// Name given to submissions that do not carry one.
pub const DEFAULT_FUNCTION_NAME: &str = "Unnamed Function";

/// Registry-assigned function identifier.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionId(pub u64);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a function: resubmitting under the same key overwrites the body.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct FunctionKey {
    pub owner: String,
    pub name: String,
    pub language: Language,
}

impl FunctionKey {
    pub fn new(owner: impl Into<String>, name: impl Into<String>, language: Language) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            language,
        }
    }
}

impl fmt::Display for FunctionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.owner, self.name, self.language)
    }
}

/// A stored function owned by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Function {
    pub id: FunctionId,
    pub owner: String,
    pub name: String,
    pub language: Language,
    /// Latest submitted source.
    pub code: String,
    /// Serialized [`DependencySet`].
    pub dependencies: String,
    /// Number of successful runs.
    pub run_count: u64,
}

impl Function {
    pub fn key(&self) -> FunctionKey {
        FunctionKey::new(&self.owner, &self.name, self.language)
    }

    /// Decode the stored dependency list.
    pub fn dependency_set(&self) -> crate::Result<DependencySet> {
        DependencySet::from_json(&self.dependencies)
    }
}

/// Immutable record of one execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: String,
    pub function_id: FunctionId,
    pub timestamp: DateTime<Utc>,
    /// Absent when the program never ran (build or infrastructure failure).
    pub output: Option<String>,
    pub error: Option<String>,
}

impl ExecutionLog {
    /// Log entry for a program that ran to completion (or was killed).
    pub fn completed(function_id: FunctionId, stdout: String, stderr: Option<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            function_id,
            timestamp: Utc::now(),
            output: Some(stdout),
            error: stderr,
        }
    }

    /// Log entry for an attempt that failed before the program produced output.
    pub fn failed(function_id: FunctionId, error: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            function_id,
            timestamp: Utc::now(),
            output: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_key_display() {
        let key = FunctionKey::new("alice", "f1", Language::Python);
        assert_eq!(key.to_string(), "alice/f1:python");
    }

    #[test]
    fn test_failed_log_has_no_output() {
        let log = ExecutionLog::failed(FunctionId(7), "boom");
        assert!(log.output.is_none());
        assert_eq!(log.error.as_deref(), Some("boom"));
    }
}
