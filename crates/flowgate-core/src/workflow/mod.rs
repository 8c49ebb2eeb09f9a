//! Workflow engine core: publish-time validation, readiness, state, data flow
//! and node execution.
//!
//! - `definition` -- YAML/JSON loading, structural validation, publishing
//! - `dag` -- cycle detection and the runtime dependency resolver
//! - `state_machine` -- pure reducer over `WorkflowEvent` plus the event log
//! - `registry` -- per-run data registry of trigger context and step outputs
//! - `template` -- `{{ ... }}` resolution against the registry
//! - `expression` -- JEXL evaluator for control-flow nodes
//! - `node` -- the node execution contract and capability-scoped services
//! - `checkpoint` -- audit records and event log persistence
//! - `activity` -- one node activity: resolve, audit, execute
//! - `runner` -- drives one execution to a terminal phase
//! - `host` -- execution host port and the in-process implementation

pub mod activity;
pub mod checkpoint;
pub mod dag;
pub mod definition;
pub mod expression;
pub mod host;
pub mod node;
pub mod registry;
pub mod runner;
pub mod state_machine;
pub mod template;
