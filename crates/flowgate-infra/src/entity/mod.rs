//! Bundled entity-mutation service.
//!
//! Action nodes talk to an `EntityMutationService`. Deployments plug in their
//! own; this module provides an in-process store keyed by UUIDv7 together
//! with the schema registry that both the store and publish-time validation
//! consult.

pub mod memory;
pub mod schema;

pub use memory::InMemoryEntityStore;
pub use schema::InMemorySchemaRegistry;
