#![deny(unused)]
//! Isolated build and execution of submitted programs.
//!
//! Every request goes through the same stages. Nothing from one request is
//! visible to another: build contexts are per-request directories and every
//! run happens in a fresh container that is removed afterwards.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │  extract: source → DependencySet       │
//! │    ↓                                   │
//! ├────────────────────────────────────────┤
//! │  workspace: BuildContext (tempdir)     │
//! │    user_code.*, manifest, Dockerfile   │
//! │    ↓ tar                               │
//! ├────────────────────────────────────────┤
//! │  engine: DockerSandbox (bollard)       │
//! │    build → run → remove                │
//! ├────────────────────────────────────────┤
//! │  Docker Container (disposable)         │
//! │    /tmp (tmpfs), read-only rootfs      │
//! │    No network, no root, no caps        │
//! └────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use code_runner_sandbox::{extract, BuildContext, DockerSandbox, ImageHandle, SandboxConfig, SandboxEngine};
//!
//! let config = SandboxConfig::default();
//! let engine = DockerSandbox::new(config.clone())?;
//!
//! let deps = extract(source, Language::Python);
//! let ctx = BuildContext::materialize(None, &request_id, Language::Python, source, &deps, &config.recipes).await?;
//! let image = engine.build(&ctx, &ImageHandle::request_tag(Language::Python, &request_id)).await?;
//! let result = engine.run(&image).await?;
//! ```

pub mod engine;
pub mod extract;
pub mod output;
pub mod recipe;
pub mod workspace;

pub use engine::{
    DockerSandbox, ImageHandle, MockRun, MockSandbox, SandboxConfig,
    SandboxEngine, TIMEOUT_EXIT_CODE,
};
pub use extract::extract;
pub use output::CappedOutput;
pub use recipe::RecipeSet;
pub use workspace::{is_installable, render_manifest, BuildContext};
