#![deny(unused)]
//! Core types, traits, and error definitions for Code Runner.
//!
//! This crate provides the foundational building blocks shared across all layers
//! of the execution pipeline: the domain model (functions, execution logs,
//! accounts), the collaborator traits the pipeline depends on, the error
//! taxonomy, and application configuration.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::*;
pub use types::*;
