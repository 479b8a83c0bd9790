//! Core traits for Code Runner.
//!
//! Traits are organized by the collaborator they describe:
//! - `store`: identity, function registry, execution log and account stores

pub mod store;

pub use store::*;
