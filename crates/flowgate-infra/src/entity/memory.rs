//! DashMap-backed entity store.
//!
//! Records are scoped by `(workspace_id, entity_type)`: a record in another
//! workspace or of another type is reported as not found. Updates merge the
//! payload's top-level fields into the stored object.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use flowgate_core::workflow::node::{EntityFuture, EntityMutationService, EntityServiceError};
use flowgate_types::entity::{EntityRecord, QueryFilter};
use serde_json::Value;
use uuid::Uuid;

use super::schema::InMemorySchemaRegistry;

#[derive(Default)]
pub struct InMemoryEntityStore {
    records: DashMap<Uuid, EntityRecord>,
    schemas: Option<Arc<InMemorySchemaRegistry>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes whose data violates a registered schema.
    pub fn with_schemas(mut self, schemas: Arc<InMemorySchemaRegistry>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check(&self, entity_type: &str, data: &Value) -> Result<(), EntityServiceError> {
        let Some(schemas) = &self.schemas else {
            return Ok(());
        };
        let errors = schemas.check_record(entity_type, data);
        if errors.is_empty() {
            return Ok(());
        }
        let joined = errors
            .iter()
            .map(|e| format!("{} {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(EntityServiceError::Rejected(format!("{entity_type}: {joined}")))
    }
}

fn not_found(entity_type: &str, id: Uuid) -> EntityServiceError {
    EntityServiceError::NotFound {
        entity_type: entity_type.to_string(),
        id,
    }
}

fn in_scope(record: &EntityRecord, workspace_id: Uuid, entity_type: &str) -> bool {
    record.workspace_id == workspace_id && record.entity_type == entity_type
}

impl EntityMutationService for InMemoryEntityStore {
    fn create<'a>(
        &'a self,
        workspace_id: Uuid,
        entity_type: &'a str,
        payload: Value,
    ) -> EntityFuture<'a, EntityRecord> {
        Box::pin(async move {
            if !payload.is_object() {
                return Err(EntityServiceError::Rejected(format!(
                    "{entity_type}: payload must be an object"
                )));
            }
            self.check(entity_type, &payload)?;

            let now = Utc::now();
            let record = EntityRecord {
                id: Uuid::now_v7(),
                workspace_id,
                entity_type: entity_type.to_string(),
                data: payload,
                created_at: now,
                updated_at: now,
            };
            self.records.insert(record.id, record.clone());
            tracing::debug!(entity_type, entity_id = %record.id, "entity created");
            Ok(record)
        })
    }

    fn update<'a>(
        &'a self,
        workspace_id: Uuid,
        entity_type: &'a str,
        entity_id: Uuid,
        payload: Value,
    ) -> EntityFuture<'a, EntityRecord> {
        Box::pin(async move {
            let Value::Object(patch) = payload else {
                return Err(EntityServiceError::Rejected(format!(
                    "{entity_type}: payload must be an object"
                )));
            };

            let mut entry = self
                .records
                .get_mut(&entity_id)
                .filter(|r| in_scope(r, workspace_id, entity_type))
                .ok_or_else(|| not_found(entity_type, entity_id))?;

            let mut merged = match &entry.data {
                Value::Object(existing) => existing.clone(),
                _ => serde_json::Map::new(),
            };
            merged.extend(patch);
            let merged = Value::Object(merged);
            self.check(entity_type, &merged)?;

            entry.data = merged;
            entry.updated_at = Utc::now();
            tracing::debug!(entity_type, entity_id = %entity_id, "entity updated");
            Ok(entry.clone())
        })
    }

    fn delete<'a>(
        &'a self,
        workspace_id: Uuid,
        entity_type: &'a str,
        entity_id: Uuid,
    ) -> EntityFuture<'a, bool> {
        Box::pin(async move {
            let removed = self
                .records
                .remove_if(&entity_id, |_, r| in_scope(r, workspace_id, entity_type))
                .is_some();
            if removed {
                tracing::debug!(entity_type, entity_id = %entity_id, "entity deleted");
            }
            Ok(removed)
        })
    }

    fn query<'a>(
        &'a self,
        workspace_id: Uuid,
        entity_type: &'a str,
        filter: Option<QueryFilter>,
        limit: Option<u32>,
    ) -> EntityFuture<'a, Vec<EntityRecord>> {
        Box::pin(async move {
            let mut matched: Vec<EntityRecord> = self
                .records
                .iter()
                .filter(|r| in_scope(r.value(), workspace_id, entity_type))
                .filter(|r| filter.as_ref().is_none_or(|f| f.matches(&r.data)))
                .map(|r| r.value().clone())
                .collect();
            // UUIDv7 ids sort by creation time.
            matched.sort_by_key(|r| r.id);
            if let Some(limit) = limit {
                matched.truncate(limit as usize);
            }
            Ok(matched)
        })
    }
}
