//! PostgreSQL storage for the shared admission queue.
//!
//! Only the queue lives here: it is the one table that dispatchers on
//! different hosts contend on, and PostgreSQL's `FOR UPDATE SKIP LOCKED`
//! lets each claimer take a disjoint batch without waiting on the others.

pub mod pool;
pub mod queue;
