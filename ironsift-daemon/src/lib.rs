//! Ironsift daemon library.
//!
//! This library exposes internal modules for integration testing.
//! In production, `ironsift-daemon` is used as a binary (main.rs).

pub mod analyzer;
pub mod cli;
pub mod daemon;
pub mod health;
pub mod logging;
pub mod metrics_server;
