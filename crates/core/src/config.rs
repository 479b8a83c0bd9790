use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub sandbox: SandboxSettings,
    pub scheduler: SchedulerConfig,
    pub ledger: LedgerConfig,
    pub identity: IdentityConfig,
    pub governance: GovernanceConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SandboxSettings {
    /// Base image for the Python recipe.
    pub python_image: String,
    /// Base image for the JavaScript recipe.
    pub javascript_image: String,
    pub memory_limit_bytes: i64,
    /// CPU quota per 100ms period (100_000 = one core).
    pub cpu_quota: i64,
    pub pids_limit: i64,
    pub run_timeout_secs: u64,
    pub build_timeout_secs: u64,
    /// Cap on captured bytes per output stream (stdout, stderr, build log).
    pub max_output_bytes: usize,
    /// Parent directory for per-request build contexts. Empty means the OS temp dir.
    pub workspace_root: String,
    /// Tag images by content hash and skip rebuilding identical submissions.
    pub reuse_images: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_executions: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LedgerConfig {
    pub cost_per_run_cents: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IdentityConfig {
    pub verification_ttl_secs: u64,
    pub seed_users: Vec<SeedUser>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SeedUser {
    pub username: String,
    pub verified: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GovernanceConfig {
    pub json_logs: bool,
    pub enable_metrics: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("CODE_RUNNER_ENV").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            .add_source(File::with_name("config/local").required(false))
            // Map APP__SERVER__PORT=3000 to server.port
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 8000,
            },
            sandbox: SandboxSettings {
                python_image: "python:3.11-slim".into(),
                javascript_image: "node:20-slim".into(),
                memory_limit_bytes: 256 * 1024 * 1024, // 256MB
                cpu_quota: 50_000,                     // half a core
                pids_limit: 64,
                run_timeout_secs: 10,
                build_timeout_secs: 300,
                max_output_bytes: 1024 * 1024, // 1MB
                workspace_root: String::new(),
                reuse_images: true,
            },
            scheduler: SchedulerConfig {
                max_concurrent_executions: 4,
            },
            ledger: LedgerConfig {
                cost_per_run_cents: 1,
            },
            identity: IdentityConfig {
                verification_ttl_secs: 30 * 60,
                seed_users: Vec::new(),
            },
            governance: GovernanceConfig {
                json_logs: false,
                enable_metrics: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_bounded() {
        let config = AppConfig::default();
        assert_eq!(config.ledger.cost_per_run_cents, 1);
        assert!(config.sandbox.run_timeout_secs > 0);
        assert!(config.sandbox.memory_limit_bytes > 0);
        assert!(config.sandbox.max_output_bytes > 0);
        assert!(config.scheduler.max_concurrent_executions > 0);
        assert_eq!(config.identity.verification_ttl_secs, 1800);
    }

    #[test]
    fn test_load_without_files_uses_defaults() {
        let config = AppConfig::load().unwrap();
        assert_eq!(config.sandbox.python_image, "python:3.11-slim");
        assert_eq!(config.sandbox.javascript_image, "node:20-slim");
    }
}
