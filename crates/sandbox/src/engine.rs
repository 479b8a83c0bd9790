//! Sandbox build and execution engine.
//!
//! This module provides the `SandboxEngine` trait and a Docker-based implementation
//! using the `bollard` crate. Images are built from a per-request build context;
//! each run happens in a fresh container with no network, dropped capabilities,
//! memory/CPU/pids limits and a hard wall-clock timeout. The container is
//! removed on every exit path.

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use code_runner_core::{
    config::SandboxSettings,
    types::{DependencySet, ExecutionResult, Language},
    Error, Result,
};

use crate::output::CappedOutput;
use crate::recipe::RecipeSet;
use crate::workspace::BuildContext;

/// Label attached to every image and container the engine creates.
const MANAGED_BY: (&str, &str) = ("managed-by", "code-runner");

/// Exit code reported for a program killed after its time budget.
pub const TIMEOUT_EXIT_CODE: i64 = 137;

// =============================================================================
// Sandbox Types
// =============================================================================

/// A built image ready to run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ImageHandle {
    pub tag: String,
    pub language: Language,
    /// The image already existed and no build was performed.
    pub reused: bool,
}

impl ImageHandle {
    /// Tag unique to one request.
    pub fn request_tag(language: Language, request_id: &str) -> String {
        format!("code-runner-{}:req-{}", language, request_id)
    }

    /// Tag derived from everything that goes into the image, so identical
    /// submissions map to the same image.
    pub fn content_tag(language: Language, source: &str, deps: &DependencySet, recipe: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(language.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(recipe.as_bytes());
        hasher.update([0u8]);
        for dep in deps.iter() {
            hasher.update(dep.as_bytes());
            hasher.update([b'\n']);
        }
        hasher.update([0u8]);
        hasher.update(source.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("code-runner-{}:{}", language, &digest[..32])
    }
}

/// Limits and policy applied to every build and run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub recipes: RecipeSet,
    /// Maximum memory in bytes.
    pub memory_limit: i64,
    /// CPU quota per 100ms period.
    pub cpu_quota: i64,
    pub pids_limit: i64,
    pub run_timeout: Duration,
    pub build_timeout: Duration,
    /// Per-stream cap on captured stdout, stderr and build log.
    pub max_output_bytes: usize,
    /// Tag images by content hash and keep them between requests.
    pub reuse_images: bool,
    /// Parent directory for build contexts; `None` means the OS temp dir.
    pub workspace_root: Option<PathBuf>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            recipes: RecipeSet::default(),
            memory_limit: 256 * 1024 * 1024, // 256MB
            cpu_quota: 50_000,               // half a core
            pids_limit: 64,
            run_timeout: Duration::from_secs(10),
            build_timeout: Duration::from_secs(300),
            max_output_bytes: 1024 * 1024, // 1MB
            reuse_images: true,
            workspace_root: None,
        }
    }
}

impl From<&SandboxSettings> for SandboxConfig {
    fn from(settings: &SandboxSettings) -> Self {
        let workspace_root = Some(settings.workspace_root.trim())
            .filter(|root| !root.is_empty())
            .map(PathBuf::from);
        Self {
            recipes: RecipeSet {
                python_image: settings.python_image.clone(),
                javascript_image: settings.javascript_image.clone(),
            },
            memory_limit: settings.memory_limit_bytes,
            cpu_quota: settings.cpu_quota,
            pids_limit: settings.pids_limit,
            run_timeout: Duration::from_secs(settings.run_timeout_secs),
            build_timeout: Duration::from_secs(settings.build_timeout_secs),
            max_output_bytes: settings.max_output_bytes,
            reuse_images: settings.reuse_images,
            workspace_root,
        }
    }
}

// =============================================================================
// Sandbox Engine Trait
// =============================================================================

/// Trait for sandbox build/run backends.
///
/// `build` failing with [`Error::BuildFailed`] means the recipe did not
/// complete; any other error is an engine (infrastructure) failure.
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    /// Build an image from a build context.
    async fn build(&self, context: &BuildContext, tag: &str) -> Result<ImageHandle>;

    /// Whether an image with this tag already exists.
    async fn image_exists(&self, tag: &str) -> Result<bool>;

    /// Run the image in a disposable container and collect its output.
    async fn run(&self, image: &ImageHandle) -> Result<ExecutionResult>;

    /// Remove an image that will not be reused.
    async fn remove_image(&self, image: &ImageHandle) -> Result<()>;

    /// Check if the sandbox backend is available (e.g., Docker daemon running).
    async fn is_available(&self) -> bool;
}

// =============================================================================
// Docker Sandbox Implementation
// =============================================================================

/// Docker-based sandbox engine using the `bollard` crate.
pub struct DockerSandbox {
    docker: bollard::Docker,
    config: SandboxConfig,
}

impl DockerSandbox {
    /// Create a new Docker sandbox engine connecting to the local Docker daemon.
    pub fn new(config: SandboxConfig) -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            Error::sandbox(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;
        Ok(Self { docker, config })
    }

    fn labels() -> HashMap<String, String> {
        HashMap::from([(MANAGED_BY.0.to_string(), MANAGED_BY.1.to_string())])
    }

    /// Start the container, stream its output and wait for it to stop.
    ///
    /// Returns `None` when the run timeout expired first. A stream that
    /// overflows its capture limit gets the container killed early.
    async fn drive(
        &self,
        name: &str,
        stdout: &mut CappedOutput,
        stderr: &mut CappedOutput,
    ) -> Result<Option<i64>> {
        use bollard::container::{
            KillContainerOptions, LogOutput, LogsOptions, StartContainerOptions, WaitContainerOptions,
        };

        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| Error::sandbox(format!("Failed to start sandbox container: {}", e)))?;

        let collect = async {
            let mut logs = Box::pin(self.docker.logs(
                name,
                Some(LogsOptions::<String> {
                    follow: true,
                    stdout: true,
                    stderr: true,
                    ..Default::default()
                }),
            ));
            while let Some(msg) = logs.next().await {
                let within_limit = match msg {
                    Ok(LogOutput::StdOut { message }) => stdout.push(&message),
                    Ok(LogOutput::StdErr { message }) => stderr.push(&message),
                    Ok(_) => true,
                    Err(e) => {
                        return Err(Error::sandbox(format!("Lost sandbox log stream: {}", e)));
                    }
                };
                if !within_limit {
                    tracing::warn!(
                        container = %name,
                        limit = self.config.max_output_bytes,
                        "Sandbox output limit reached, stopping container"
                    );
                    // The container may already have exited
                    let _ = self
                        .docker
                        .kill_container(name, None::<KillContainerOptions<String>>)
                        .await;
                    break;
                }
            }

            let mut wait = Box::pin(self.docker.wait_container(
                name,
                Some(WaitContainerOptions {
                    condition: "not-running",
                }),
            ));
            match wait.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                // bollard reports non-zero exits as an error carrying the code
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
                Some(Err(e)) => Err(Error::sandbox(format!("Failed to wait for sandbox container: {}", e))),
                None => Err(Error::sandbox("Sandbox container wait stream ended early")),
            }
        };

        match tokio::time::timeout(self.config.run_timeout, collect).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        use bollard::container::RemoveContainerOptions;

        self.docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| Error::sandbox(format!("Failed to remove sandbox container: {}", e)))
    }
}

#[async_trait]
impl SandboxEngine for DockerSandbox {
    async fn build(&self, context: &BuildContext, tag: &str) -> Result<ImageHandle> {
        use bollard::image::BuildImageOptions;

        let archive = context.to_tar().await?;
        let options = BuildImageOptions::<String> {
            dockerfile: "Dockerfile".to_string(),
            t: tag.to_string(),
            rm: true,
            forcerm: true,
            labels: Self::labels(),
            ..Default::default()
        };

        let started = Instant::now();
        let mut build_log = CappedOutput::new(self.config.max_output_bytes);

        let collect = async move {
            let mut stream = Box::pin(self.docker.build_image(options, None, Some(Bytes::from(archive))));
            while let Some(item) = stream.next().await {
                match item {
                    Ok(info) => {
                        if let Some(line) = info.stream {
                            build_log.push(line.as_bytes());
                        }
                        if let Some(error) = info.error {
                            return Err(build_failure(build_log, &error));
                        }
                    }
                    Err(bollard::errors::Error::DockerStreamError { error }) => {
                        return Err(build_failure(build_log, &error));
                    }
                    Err(e) => {
                        return Err(Error::sandbox(format!("Image build request failed: {}", e)));
                    }
                }
            }
            Ok(())
        };

        match tokio::time::timeout(self.config.build_timeout, collect).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(tag = %tag, timeout = ?self.config.build_timeout, "Image build timed out");
                return Err(Error::build_failed(format!(
                    "image build exceeded {:?}",
                    self.config.build_timeout
                )));
            }
        }

        tracing::info!(
            tag = %tag,
            language = %context.language(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Sandbox image built"
        );

        Ok(ImageHandle {
            tag: tag.to_string(),
            language: context.language(),
            reused: false,
        })
    }

    async fn image_exists(&self, tag: &str) -> Result<bool> {
        match self.docker.inspect_image(tag).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => Err(Error::sandbox(format!("Failed to inspect image {}: {}", tag, e))),
        }
    }

    async fn run(&self, image: &ImageHandle) -> Result<ExecutionResult> {
        use bollard::container::{Config, CreateContainerOptions, KillContainerOptions};

        let name = format!("code-runner-{}", uuid::Uuid::new_v4());

        let container_config = Config {
            image: Some(image.tag.clone()),
            host_config: Some(host_config(&self.config)),
            network_disabled: Some(true),
            labels: Some(Self::labels()),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                container_config,
            )
            .await
            .map_err(|e| Error::sandbox(format!("Failed to create sandbox container: {}", e)))?;

        // From here on the container exists and must be removed on every path.
        let guard = ContainerGuard::new(self.docker.clone(), name.clone());
        let started = Instant::now();
        let mut stdout = CappedOutput::new(self.config.max_output_bytes);
        let mut stderr = CappedOutput::new(self.config.max_output_bytes);

        let outcome = self.drive(&name, &mut stdout, &mut stderr).await;

        if let Ok(None) = outcome {
            tracing::warn!(container = %name, timeout = ?self.config.run_timeout, "Sandbox run timed out");
            let _ = self
                .docker
                .kill_container(&name, None::<KillContainerOptions<String>>)
                .await;
        }

        match self.remove_container(&name).await {
            Ok(()) => guard.disarm(),
            Err(e) => tracing::warn!(container = %name, error = %e, "Container removal failed, retrying in background"),
        }

        let exit_code = outcome?;
        let duration_ms = started.elapsed().as_millis() as u64;
        let result = assemble_result(stdout, stderr, exit_code, self.config.run_timeout, duration_ms);

        tracing::info!(
            container = %name,
            image = %image.tag,
            exit_code = result.exit_code,
            timed_out = result.timed_out,
            duration_ms = result.duration_ms,
            "Sandbox run finished"
        );

        Ok(result)
    }

    async fn remove_image(&self, image: &ImageHandle) -> Result<()> {
        use bollard::image::RemoveImageOptions;

        self.docker
            .remove_image(
                &image.tag,
                Some(RemoveImageOptions {
                    force: true,
                    noprune: false,
                }),
                None,
            )
            .await
            .map_err(|e| Error::sandbox(format!("Failed to remove image {}: {}", image.tag, e)))?;
        tracing::debug!(image = %image.tag, "Sandbox image removed");
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

/// Hardened host settings applied to every sandbox container.
fn host_config(config: &SandboxConfig) -> bollard::models::HostConfig {
    use bollard::models::{HostConfig, Mount, MountTmpfsOptions, MountTypeEnum, ResourcesUlimits};

    HostConfig {
        memory: Some(config.memory_limit),
        memory_swap: Some(config.memory_limit),
        cpu_quota: Some(config.cpu_quota),
        cpu_period: Some(100_000), // standard 100ms period
        network_mode: Some("none".to_string()),
        // Scratch space; the image filesystem itself is read-only
        mounts: Some(vec![Mount {
            target: Some("/tmp".to_string()),
            typ: Some(MountTypeEnum::TMPFS),
            tmpfs_options: Some(MountTmpfsOptions {
                size_bytes: Some(config.memory_limit / 4),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        readonly_rootfs: Some(true),
        cap_drop: Some(vec!["ALL".to_string()]),
        security_opt: Some(vec!["no-new-privileges:true".to_string()]),
        pids_limit: Some(config.pids_limit),
        ulimits: Some(vec![ResourcesUlimits {
            name: Some("nofile".to_string()),
            soft: Some(256),
            hard: Some(512),
        }]),
        ..Default::default()
    }
}

/// Build diagnostic: the captured build log followed by the failing step's error.
fn build_failure(log: CappedOutput, error: &str) -> Error {
    Error::build_failed(format!("{}{}", log.into_string(), error))
}

/// Turn captured output and the observed exit status into a result.
/// `None` means the run timed out.
fn assemble_result(
    stdout: CappedOutput,
    stderr: CappedOutput,
    exit_code: Option<i64>,
    run_timeout: Duration,
    duration_ms: u64,
) -> ExecutionResult {
    match exit_code {
        Some(code) => ExecutionResult {
            stdout: stdout.into_string(),
            stderr: stderr.into_string(),
            exit_code: code,
            timed_out: false,
            duration_ms,
        },
        None => {
            let notice = format!("[Execution timed out after {:?}]", run_timeout);
            let stderr = if stderr.is_empty() {
                notice
            } else {
                format!("{}\n{}", stderr.into_string(), notice)
            };
            ExecutionResult {
                stdout: stdout.into_string(),
                stderr,
                exit_code: TIMEOUT_EXIT_CODE,
                timed_out: true,
                duration_ms,
            }
        }
    }
}

/// Force-removes a container when dropped while still armed.
///
/// Covers the paths where the owning future is cancelled or panics between
/// container creation and explicit removal.
struct ContainerGuard {
    docker: Option<bollard::Docker>,
    name: String,
}

impl ContainerGuard {
    fn new(docker: bollard::Docker, name: String) -> Self {
        Self {
            docker: Some(docker),
            name,
        }
    }

    fn disarm(mut self) {
        self.docker = None;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(docker) = self.docker.take() else {
            return;
        };
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    use bollard::container::RemoveContainerOptions;
                    let options = RemoveContainerOptions {
                        force: true,
                        v: true,
                        ..Default::default()
                    };
                    if let Err(e) = docker.remove_container(&name, Some(options)).await {
                        tracing::error!(container = %name, error = %e, "Background container removal failed");
                    }
                });
            }
            Err(_) => {
                tracing::error!(container = %name, "No runtime available to remove orphaned container");
            }
        }
    }
}

// =============================================================================
// Mock Sandbox (for testing without Docker)
// =============================================================================

/// Scripted outcome for one `run` call of [`MockSandbox`].
#[derive(Debug, Clone)]
pub enum MockRun {
    Completed(ExecutionResult),
    /// The engine itself fails (container could not be started).
    EngineError(String),
}

/// In-memory mock sandbox for unit testing.
///
/// Builds succeed unless a build failure has been queued; runs pop scripted
/// responses and fall back to a clean exit.
#[derive(Default)]
pub struct MockSandbox {
    pub build_failures: Arc<tokio::sync::Mutex<Vec<String>>>,
    pub run_responses: Arc<tokio::sync::Mutex<Vec<MockRun>>>,
    /// Manifest contents of every build, in order.
    pub built_manifests: Arc<tokio::sync::Mutex<Vec<String>>>,
    images: Arc<tokio::sync::Mutex<HashSet<String>>>,
    run_delay: Duration,
    builds: AtomicUsize,
    runs: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockSandbox {
    /// Create a mock sandbox with predefined run responses.
    pub fn new(responses: Vec<MockRun>) -> Self {
        Self {
            run_responses: Arc::new(tokio::sync::Mutex::new(responses)),
            ..Default::default()
        }
    }

    /// Make every run take at least `delay`.
    pub fn with_run_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    /// Queue a build failure with the given diagnostic.
    pub async fn fail_next_build(&self, diagnostic: impl Into<String>) {
        self.build_failures.lock().await.push(diagnostic.into());
    }

    /// Queue a run response.
    pub async fn push_run(&self, run: MockRun) {
        self.run_responses.lock().await.push(run);
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    /// Highest number of runs observed executing at the same time.
    pub fn max_concurrent_runs(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of images currently held.
    pub async fn image_count(&self) -> usize {
        self.images.lock().await.len()
    }
}

#[async_trait]
impl SandboxEngine for MockSandbox {
    async fn build(&self, context: &BuildContext, tag: &str) -> Result<ImageHandle> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let manifest = tokio::fs::read_to_string(context.manifest_path()).await?;
        self.built_manifests.lock().await.push(manifest);

        let mut failures = self.build_failures.lock().await;
        if !failures.is_empty() {
            return Err(Error::build_failed(failures.remove(0)));
        }
        drop(failures);

        self.images.lock().await.insert(tag.to_string());
        Ok(ImageHandle {
            tag: tag.to_string(),
            language: context.language(),
            reused: false,
        })
    }

    async fn image_exists(&self, tag: &str) -> Result<bool> {
        Ok(self.images.lock().await.contains(tag))
    }

    async fn run(&self, _image: &ImageHandle) -> Result<ExecutionResult> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.run_delay.is_zero() {
            tokio::time::sleep(self.run_delay).await;
        }

        let next = {
            let mut responses = self.run_responses.lock().await;
            if responses.is_empty() {
                None
            } else {
                Some(responses.remove(0))
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match next {
            None => Ok(ExecutionResult {
                stdout: "[mock] program executed\n".to_string(),
                ..Default::default()
            }),
            Some(MockRun::Completed(result)) => Ok(result),
            Some(MockRun::EngineError(message)) => Err(Error::sandbox(message)),
        }
    }

    async fn remove_image(&self, image: &ImageHandle) -> Result<()> {
        self.images.lock().await.remove(&image.tag);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

// =============================================================================
// Tests
// =============================================================================
