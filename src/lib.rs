//! Tandem - local coordination server for paired AI coding agents
//!
//! One interactive driver and any number of autonomous workers share a
//! project workspace through this server:
//! - Authoritative shared state in SQLite (full-aggregate load/save)
//! - Task dispatch with pluggable assignment strategies
//! - Worker process lifecycle: spawn, cooldown, retries, isolation
//! - Heartbeat/SLA watchdog with escalating alerts and recovery
//! - Signal-driven push notifications and offline agent wake-ups

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod rpc;
pub mod services;

pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{Config, SharedState};
