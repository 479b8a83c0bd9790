//! Sandbox integration tests.
//!
//! Tests the stages end to end: extract → BuildContext → SandboxEngine.
//! The MockSandbox tests do not require Docker; the Docker smoke test is
//! ignored by default and skips itself when no daemon is reachable.

use std::time::Duration;

use code_runner_core::types::{ExecutionResult, Language};
use code_runner_core::Error;
use code_runner_sandbox::{
    extract, BuildContext, DockerSandbox, ImageHandle, MockRun, MockSandbox, SandboxConfig,
    SandboxEngine,
};

// =============================================================================
// Helpers
// =============================================================================

async fn context(request_id: &str, language: Language, source: &str) -> BuildContext {
    let deps = extract(source, language);
    BuildContext::materialize(
        None,
        request_id,
        language,
        source,
        &deps,
        &SandboxConfig::default().recipes,
    )
    .await
    .unwrap()
}

// =============================================================================
// 1. Extracted dependencies reach the manifest
// =============================================================================

#[tokio::test]
async fn test_extracted_dependencies_reach_manifest() {
    let engine = MockSandbox::default();
    let ctx = context(
        "it-1",
        Language::Python,
        "import numpy as np\nimport os\nfrom scipy.optimize import minimize\nprint(np.pi)\n",
    )
    .await;

    engine.build(&ctx, "code-runner-python:it-1").await.unwrap();

    let manifests = engine.built_manifests.lock().await;
    assert_eq!(manifests.as_slice(), ["numpy\nscipy\n".to_string()]);
}

#[tokio::test]
async fn test_javascript_manifest_reaches_build() {
    let engine = MockSandbox::default();
    let ctx = context(
        "it-2",
        Language::JavaScript,
        "const _ = require('lodash');\nconst fs = require('fs');\nconsole.log(_.sum([1,2]));\n",
    )
    .await;

    engine.build(&ctx, "code-runner-javascript:it-2").await.unwrap();

    let manifests = engine.built_manifests.lock().await;
    let package: serde_json::Value = serde_json::from_str(&manifests[0]).unwrap();
    assert_eq!(package["dependencies"]["lodash"], "latest");
    assert!(package["dependencies"].get("fs").is_none());
}

// =============================================================================
// 2. Run outcomes
// =============================================================================

#[tokio::test]
async fn test_runtime_failure_is_a_result_not_an_error() {
    let engine = MockSandbox::new(vec![MockRun::Completed(ExecutionResult {
        stderr: "ZeroDivisionError: division by zero\n".into(),
        exit_code: 1,
        ..Default::default()
    })]);
    let ctx = context("it-3", Language::Python, "print(1/0)").await;
    let image = engine.build(&ctx, "t3").await.unwrap();

    let result = engine.run(&image).await.unwrap();
    assert!(!result.success());
    assert!(result.stderr.contains("ZeroDivisionError"));
}

#[tokio::test]
async fn test_engine_failure_is_an_error() {
    let engine = MockSandbox::new(vec![MockRun::EngineError("daemon went away".into())]);
    let ctx = context("it-4", Language::Python, "print(1)").await;
    let image = engine.build(&ctx, "t4").await.unwrap();

    let err = engine.run(&image).await.unwrap_err();
    assert!(matches!(err, Error::Sandbox(_)));
}

#[tokio::test]
async fn test_image_survives_build_context_cleanup() {
    let engine = MockSandbox::default();
    let ctx = context("it-5", Language::Python, "print(1)").await;
    let path = ctx.path().to_path_buf();
    let image = engine.build(&ctx, "t5").await.unwrap();
    drop(ctx);

    assert!(!path.exists());
    // The image is independent of the build directory
    assert!(engine.run(&image).await.unwrap().success());
}

// =============================================================================
// 3. Docker smoke test
// =============================================================================

#[tokio::test]
#[ignore = "requires a running Docker daemon and network access for base images"]
async fn test_docker_build_and_run_hello() {
    let config = SandboxConfig {
        run_timeout: Duration::from_secs(30),
        ..Default::default()
    };
    let engine = match DockerSandbox::new(config) {
        Ok(engine) => engine,
        Err(_) => return,
    };
    if !engine.is_available().await {
        eprintln!("Docker not reachable, skipping");
        return;
    }

    let request_id = uuid::Uuid::new_v4().to_string();
    let ctx = context(&request_id, Language::Python, "print('hello from sandbox')\n").await;
    let tag = ImageHandle::request_tag(Language::Python, &request_id);

    let image = engine.build(&ctx, &tag).await.unwrap();
    let result = engine.run(&image).await.unwrap();
    engine.remove_image(&image).await.unwrap();

    assert_eq!(result.exit_code, 0);
    assert_eq!(result.stdout.trim(), "hello from sandbox");
    assert!(!engine.image_exists(&tag).await.unwrap());
}

/// Names of containers this engine created that still exist.
async fn leftover_containers(docker: &bollard::Docker) -> Vec<String> {
    use bollard::container::ListContainersOptions;
    use std::collections::HashMap;

    let filters = HashMap::from([("label".to_string(), vec!["managed-by=code-runner".to_string()])]);
    docker
        .list_containers(Some(ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        }))
        .await
        .unwrap()
        .into_iter()
        .flat_map(|c| c.names.unwrap_or_default())
        .collect()
}

#[tokio::test]
#[ignore = "requires a running Docker daemon and network access for base images"]
async fn test_docker_timeout_and_failure_leave_no_containers() {
    let config = SandboxConfig {
        run_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    let engine = match DockerSandbox::new(config) {
        Ok(engine) => engine,
        Err(_) => return,
    };
    if !engine.is_available().await {
        eprintln!("Docker not reachable, skipping");
        return;
    }
    let docker = bollard::Docker::connect_with_local_defaults().unwrap();
    let before = leftover_containers(&docker).await.len();

    let request_id = uuid::Uuid::new_v4().to_string();
    let ctx = context(&request_id, Language::Python, "while True:\n    pass\n").await;
    let looping = engine
        .build(&ctx, &ImageHandle::request_tag(Language::Python, &request_id))
        .await
        .unwrap();
    let result = engine.run(&looping).await.unwrap();
    assert!(result.timed_out);
    assert_eq!(result.exit_code, code_runner_sandbox::TIMEOUT_EXIT_CODE);
    assert!(result.stderr.contains("timed out"));
    engine.remove_image(&looping).await.unwrap();

    let request_id = uuid::Uuid::new_v4().to_string();
    let ctx = context(&request_id, Language::Python, "import sys\nsys.exit(3)\n").await;
    let failing = engine
        .build(&ctx, &ImageHandle::request_tag(Language::Python, &request_id))
        .await
        .unwrap();
    let result = engine.run(&failing).await.unwrap();
    assert_eq!(result.exit_code, 3);
    engine.remove_image(&failing).await.unwrap();

    assert_eq!(leftover_containers(&docker).await.len(), before);
}
