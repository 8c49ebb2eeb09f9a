//! Observability for Flowgate: subscriber setup and engine event logging.

pub mod event_log;
pub mod tracing_setup;
