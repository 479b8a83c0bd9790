//! Core type definitions for Code Runner.
//!
//! This module contains the domain model shared by the sandbox, the ledger
//! and the gateway.

pub mod account;
pub mod execution;
pub mod function;
pub mod language;

pub use account::*;
pub use execution::*;
pub use function::*;
pub use language::*;
