#![deny(unused)]
//! Execution pipeline for Code Runner.
//!
//! This crate wires the sandbox stages to the stores: it authorizes the
//! caller, drives extraction, build and run under a bounded scheduler, and
//! records every attempt in the ledger.

pub mod builder;
pub mod ledger;
pub mod pipeline;
pub mod scheduler;

pub use builder::PipelineBuilder;
pub use ledger::ExecutionLedger;
pub use pipeline::{ExecutionPipeline, FunctionDetail, RECENT_LOG_LIMIT};
pub use scheduler::ExecutionScheduler;
