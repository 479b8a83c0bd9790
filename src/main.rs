#![deny(unused)]
//! Code Runner - sandboxed code execution service
//!
//! Accepts Python and JavaScript submissions over HTTP, builds a disposable
//! container image per submission, runs it under strict limits and records
//! output, run counts and cost per user.

use std::sync::Arc;

use code_runner_controller::PipelineBuilder;
use code_runner_core::config::AppConfig;
use code_runner_gateway::{GatewayConfig, GatewayServer};
use code_runner_sandbox::{DockerSandbox, SandboxConfig, SandboxEngine};
use code_runner_store::InMemoryUserStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    // Initialize tracing
    code_runner_governance::configure_tracing(config.governance.json_logs)?;

    tracing::info!("Starting Code Runner v{}", env!("CARGO_PKG_VERSION"));

    // =========================================================================
    // Identity
    // =========================================================================
    let users = Arc::new(InMemoryUserStore::new(chrono_seconds(
        config.identity.verification_ttl_secs,
    )));
    for seed in &config.identity.seed_users {
        users.add_user(&seed.username, seed.verified);
    }
    tracing::info!(users = users.len(), "User store initialized");

    // =========================================================================
    // Sandbox
    // =========================================================================
    let sandbox_config = SandboxConfig::from(&config.sandbox);
    let engine = Arc::new(DockerSandbox::new(sandbox_config.clone())?);
    if engine.is_available().await {
        tracing::info!(
            python_image = %sandbox_config.recipes.python_image,
            javascript_image = %sandbox_config.recipes.javascript_image,
            run_timeout = ?sandbox_config.run_timeout,
            "Docker sandbox initialized"
        );
    } else {
        tracing::warn!("Docker daemon not reachable; executions will fail until it is");
    }

    // =========================================================================
    // Pipeline
    // =========================================================================
    let pipeline = Arc::new(
        PipelineBuilder::new()
            .with_app_config(&config)
            .with_engine(engine)
            .with_users(users)
            .build()?,
    );
    tracing::info!(
        max_concurrent = pipeline.scheduler().limit(),
        cost_per_run_cents = config.ledger.cost_per_run_cents,
        "Execution pipeline initialized"
    );

    // =========================================================================
    // Gateway
    // =========================================================================
    let gateway_config = GatewayConfig::from(&config.server);
    let mut server = GatewayServer::new(gateway_config.clone(), pipeline);

    if config.governance.enable_metrics {
        let metrics_handle = code_runner_governance::setup_metrics_recorder()?;
        server = server.with_metrics(metrics_handle);
    }

    tracing::info!(
        host = %gateway_config.host,
        port = gateway_config.port,
        "Gateway initialized"
    );

    server.run().await?;

    Ok(())
}

fn chrono_seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}
