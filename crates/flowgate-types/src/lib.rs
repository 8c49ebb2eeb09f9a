//! Shared domain types for Flowgate.
//!
//! This crate contains the domain types used across the orchestrator:
//! workflow definitions and node configurations, execution state and events,
//! step outputs, trigger contexts, queue rows, entity filters, configuration,
//! and the repository error type.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod entity;
pub mod error;
pub mod event;
pub mod execution;
pub mod node;
pub mod output;
pub mod queue;
pub mod state;
pub mod workflow;
