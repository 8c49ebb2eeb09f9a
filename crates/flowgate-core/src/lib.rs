//! Orchestration logic and repository trait definitions for Flowgate.
//!
//! This crate defines the "ports" (repository and collaborator traits) that
//! the infrastructure layer implements, plus the orchestration core: the
//! dependency resolver, the workflow state machine, the data registry, the
//! node execution contract, the run driver and the queue dispatcher. It
//! depends only on `flowgate-types` -- never on `flowgate-infra` or any
//! database/IO crate.

pub mod event;
pub mod queue;
pub mod repository;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
