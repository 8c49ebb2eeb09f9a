//! Event bus for engine lifecycle notifications.
//!
//! `EventBus` fans `EngineEvent`s out to every subscriber; `ExecutionWatch`
//! follows a single execution until it finishes.

pub mod bus;

pub use bus::{EventBus, ExecutionWatch};
