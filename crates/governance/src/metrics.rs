//! Metrics implementation using Prometheus.

use code_runner_core::{types::Language, Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let builder = PrometheusBuilder::new();

    let handle = builder
        .install_recorder()
        .map_err(|e| Error::internal(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// How a pipeline execution ended, as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcomeKind {
    Success,
    RuntimeFailure,
    Timeout,
    BuildFailure,
    InfrastructureFailure,
    Rejected,
}

impl ExecutionOutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::RuntimeFailure => "runtime_failure",
            Self::Timeout => "timeout",
            Self::BuildFailure => "build_failure",
            Self::InfrastructureFailure => "infrastructure_failure",
            Self::Rejected => "rejected",
        }
    }
}

/// Helper to track HTTP request metrics (latency, count).
pub fn track_request(method: &str, path: &str, status: u16, latency_sec: f64) {
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(latency_sec);
}

/// Count one finished execution.
pub fn track_execution(language: Language, outcome: ExecutionOutcomeKind) {
    metrics::counter!(
        "code_runner_executions_total",
        "language" => language.as_str(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record how long an image build took (reused images are not recorded).
pub fn track_build(language: Language, seconds: f64) {
    metrics::histogram!("code_runner_build_duration_seconds", "language" => language.as_str())
        .record(seconds);
}

/// Record how long a container run took.
pub fn track_run(language: Language, seconds: f64) {
    metrics::histogram!("code_runner_run_duration_seconds", "language" => language.as_str())
        .record(seconds);
}

/// Record a charge applied by the ledger.
pub fn track_charge(language: Language, cents: u64) {
    metrics::counter!("code_runner_charged_cents_total", "language" => language.as_str())
        .increment(cents);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_metrics_are_rendered() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            track_execution(Language::Python, ExecutionOutcomeKind::Success);
            track_execution(Language::Python, ExecutionOutcomeKind::Success);
            track_execution(Language::JavaScript, ExecutionOutcomeKind::BuildFailure);
            track_charge(Language::Python, 2);
            track_request("POST", "/execute/python", 200, 0.25);
        });

        let rendered = handle.render();
        assert!(rendered.contains(r#"code_runner_executions_total{language="python",outcome="success"} 2"#));
        assert!(rendered.contains(r#"outcome="build_failure""#));
        assert!(rendered.contains(r#"code_runner_charged_cents_total{language="python"} 2"#));
        assert!(rendered.contains("http_requests_total"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(ExecutionOutcomeKind::InfrastructureFailure.as_str(), "infrastructure_failure");
        assert_eq!(ExecutionOutcomeKind::Timeout.as_str(), "timeout");
    }
}
