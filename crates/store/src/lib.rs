#![deny(unused)]
//! Persistence for Code Runner.
//!
//! Users, per-user accounts, the function registry and the append-only
//! execution log. All stores are in-memory and safe for concurrent use;
//! they implement the store traits from `code_runner_core` so another backend
//! can be wired in at startup without touching the pipeline.

pub mod memory;

pub use memory::{InMemoryAccountStore, InMemoryFunctionRegistry, InMemoryLogStore, InMemoryUserStore};
