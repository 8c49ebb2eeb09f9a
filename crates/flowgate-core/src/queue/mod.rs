//! Admission queue dispatching.
//!
//! Runs enter the system as `pending` rows in the execution queue. The
//! `ExecutionQueueDispatcher` claims batches of rows, hands each to an
//! `ExecutionHost` and periodically resets claims that were never dispatched.

pub mod dispatcher;

pub use dispatcher::{DispatchError, DispatchReport, ExecutionQueueDispatcher};
