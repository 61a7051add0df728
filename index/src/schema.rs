//! Collection schema management.
//!
//! The schema version lives on the reserved metadata point and only ever
//! moves forward. Each migration is idempotent (`ensure_payload_index`
//! checks existence before creating), so a crashed upgrade can simply be
//! re-run.

use std::sync::Arc;

use crate::error::Result;
use crate::store::VectorStore;
use crate::types::IndexingMarker;
use crate::types::METADATA_POINT_ID;

/// Version the code expects; bump when appending to `MIGRATIONS`.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Numbered one-way migrations. Index `n` upgrades version `n` to `n+1`.
struct Migration {
    version: u32,
    description: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "keyword payload index on relativePath",
}];

/// Applies pending schema migrations to a collection.
pub struct SchemaManager {
    store: Arc<dyn VectorStore>,
}

impl SchemaManager {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self { store }
    }

    /// Bring the collection to `CURRENT_SCHEMA_VERSION`.
    ///
    /// Returns the number of migrations applied; zero on an up-to-date
    /// collection.
    pub async fn ensure_current_schema(&self, collection: &str) -> Result<u32> {
        let stored = self.stored_version(collection).await?;
        let mut applied = 0;

        for migration in MIGRATIONS.iter().filter(|m| m.version > stored) {
            tracing::info!(
                collection = collection,
                version = migration.version,
                description = migration.description,
                "applying schema migration"
            );
            self.apply(collection, migration.version).await?;
            applied += 1;
        }

        if applied > 0 {
            self.write_version(collection, CURRENT_SCHEMA_VERSION).await?;
        }
        Ok(applied)
    }

    async fn apply(&self, collection: &str, version: u32) -> Result<()> {
        match version {
            1 => {
                self.ensure_payload_index(collection, "relativePath").await
            }
            other => {
                tracing::warn!(version = other, "unknown schema migration, skipped");
                Ok(())
            }
        }
    }

    /// Create a keyword payload index unless one already exists.
    pub async fn ensure_payload_index(&self, collection: &str, field: &str) -> Result<()> {
        if self.store.has_payload_index(collection, field).await? {
            return Ok(());
        }
        self.store.create_payload_index(collection, field).await
    }

    async fn stored_version(&self, collection: &str) -> Result<u32> {
        let point = self.store.get_point(collection, METADATA_POINT_ID).await?;
        Ok(point
            .and_then(|p| p.payload.get("schemaVersion").cloned())
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32)
    }

    async fn write_version(&self, collection: &str, version: u32) -> Result<()> {
        let marker = IndexingMarker {
            schema_version: Some(version),
            ..Default::default()
        };
        self.store
            .set_payload(
                collection,
                marker.to_payload_map(),
                &[METADATA_POINT_ID.to_string()],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Distance;
    use crate::store::InMemoryStore;
    use crate::types::Point;

    async fn collection_with_marker() -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        store
            .create_collection("c", 2, Distance::Cosine, false)
            .await
            .unwrap();
        store
            .upsert(
                "c",
                vec![Point {
                    id: METADATA_POINT_ID.to_string(),
                    vector: vec![0.0, 0.0],
                    sparse_vector: None,
                    payload: serde_json::Map::new(),
                }],
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn initial_migration_creates_path_index() {
        let store = collection_with_marker().await;
        let schema = SchemaManager::new(store.clone());

        let applied = schema.ensure_current_schema("c").await.unwrap();
        assert_eq!(applied, 1);
        assert!(store.has_payload_index("c", "relativePath").await.unwrap());

        let marker = store
            .get_point("c", METADATA_POINT_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            marker.payload["schemaVersion"],
            u64::from(CURRENT_SCHEMA_VERSION)
        );
    }

    #[tokio::test]
    async fn second_run_applies_zero_migrations() {
        let store = collection_with_marker().await;
        let schema = SchemaManager::new(store.clone());

        assert_eq!(schema.ensure_current_schema("c").await.unwrap(), 1);
        assert_eq!(schema.ensure_current_schema("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn ensure_payload_index_is_idempotent() {
        let store = collection_with_marker().await;
        let schema = SchemaManager::new(store.clone());

        schema.ensure_payload_index("c", "relativePath").await.unwrap();
        // Second call must not fail even though the index exists.
        schema.ensure_payload_index("c", "relativePath").await.unwrap();
        assert!(store.has_payload_index("c", "relativePath").await.unwrap());
    }
}
