#![deny(unused)]
//! HTTP gateway for Code Runner.
//!
//! This crate provides the HTTP entry point: code submission per language,
//! function listing and detail, usage, health and Prometheus metrics.

pub mod server;

pub use server::{status_for, ApiError, AppState, GatewayConfig, GatewayServer};
