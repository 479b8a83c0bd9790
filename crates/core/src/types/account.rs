use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identity & Account Types
// =============================================================================

/// A registered user as seen by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub verified: bool,
    pub verified_at: Option<DateTime<Utc>>,
}

impl User {
    /// Whether the verification is still valid at `now` given a TTL.
    pub fn is_verified_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match (self.verified, self.verified_at) {
            (false, _) => false,
            (true, None) => true,
            (true, Some(at)) => now - at <= ttl,
        }
    }
}

/// Aggregate usage counters and accrued cost for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    pub python_runs: u64,
    pub javascript_runs: u64,
    pub cost_cents: u64,
}

impl Account {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Default::default()
        }
    }

    pub fn total_runs(&self) -> u64 {
        self.python_runs + self.javascript_runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_expires() {
        let now = Utc::now();
        let user = User {
            username: "alice".into(),
            verified: true,
            verified_at: Some(now - Duration::minutes(31)),
        };
        assert!(!user.is_verified_at(now, Duration::minutes(30)));
        assert!(user.is_verified_at(now, Duration::minutes(60)));
    }

    #[test]
    fn test_unverified_never_passes() {
        let user = User {
            username: "bob".into(),
            verified: false,
            verified_at: None,
        };
        assert!(!user.is_verified_at(Utc::now(), Duration::days(1)));
    }

    #[test]
    fn test_total_runs() {
        let account = Account {
            username: "alice".into(),
            python_runs: 2,
            javascript_runs: 3,
            cost_cents: 5,
        };
        assert_eq!(account.total_runs(), 5);
    }
}
