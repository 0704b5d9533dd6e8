//! Override store port and its adapters
//!
//! The pipeline only sees [`OverrideStore`]; which backend sits behind it is
//! decided once at startup.

use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::db::repository::overrides;
use crate::models::{BulkUpdateResult, OverrideError, OverridePatch, PatchField};
use crate::services::m3u_parser::is_valid_content_id;

/// Validate and canonicalize (lowercase) a content id used as a store key
pub fn normalize_content_id(content_id: &str) -> Result<String, OverrideError> {
    let trimmed = content_id.trim();
    if !is_valid_content_id(trimmed) {
        return Err(OverrideError::InvalidContentId(content_id.to_string()));
    }
    Ok(trimmed.to_ascii_lowercase())
}

#[async_trait]
pub trait OverrideStore: Send + Sync {
    async fn get(&self, content_id: &str) -> Result<Option<OverridePatch>, OverrideError>;

    /// Merge `patch` into the stored patch, creating it if needed.
    /// Returns the stored result.
    async fn set(&self, content_id: &str, patch: OverridePatch) -> Result<OverridePatch, OverrideError>;

    /// Remove every field at once. Returns false if nothing was stored.
    async fn delete(&self, content_id: &str) -> Result<bool, OverrideError>;

    async fn list(&self) -> Result<HashMap<String, OverridePatch>, OverrideError>;

    /// Set one field on many ids.
    ///
    /// Non-atomic: each id stands alone and failures are listed per id.
    /// Atomic: any failure leaves the store untouched and returns
    /// [`OverrideError::BulkRolledBack`].
    async fn bulk_update(
        &self,
        ids: &[String],
        field: PatchField,
        value: &serde_json::Value,
        atomic: bool,
    ) -> Result<BulkUpdateResult, OverrideError>;

    /// Backend name for health output
    fn backend(&self) -> &'static str;

    async fn is_healthy(&self) -> bool {
        true
    }
}

/// In-process store, used when no database is configured
#[derive(Clone, Default)]
pub struct MemoryOverrideStore {
    patches: Arc<RwLock<HashMap<String, OverridePatch>>>,
}

impl MemoryOverrideStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OverrideStore for MemoryOverrideStore {
    async fn get(&self, content_id: &str) -> Result<Option<OverridePatch>, OverrideError> {
        let key = normalize_content_id(content_id)?;
        Ok(self.patches.read().await.get(&key).cloned())
    }

    async fn set(&self, content_id: &str, patch: OverridePatch) -> Result<OverridePatch, OverrideError> {
        let key = normalize_content_id(content_id)?;
        let mut patches = self.patches.write().await;
        let stored = patches.entry(key).or_default();
        stored.merge(patch);
        Ok(stored.clone())
    }

    async fn delete(&self, content_id: &str) -> Result<bool, OverrideError> {
        let key = normalize_content_id(content_id)?;
        Ok(self.patches.write().await.remove(&key).is_some())
    }

    async fn list(&self) -> Result<HashMap<String, OverridePatch>, OverrideError> {
        Ok(self.patches.read().await.clone())
    }

    async fn bulk_update(
        &self,
        ids: &[String],
        field: PatchField,
        value: &serde_json::Value,
        atomic: bool,
    ) -> Result<BulkUpdateResult, OverrideError> {
        let patch = field.patch_with(value)?;
        let mut patches = self.patches.write().await;
        let mut staged = if atomic { patches.clone() } else { HashMap::new() };
        let mut result = BulkUpdateResult::default();

        for id in ids {
            let key = match normalize_content_id(id) {
                Ok(key) => key,
                Err(e) => {
                    result.record_failure(id, e.to_string());
                    continue;
                }
            };
            let target = if atomic { &mut staged } else { &mut *patches };
            target.entry(key).or_default().merge(patch.clone());
            result.updated += 1;
        }

        if atomic {
            if result.failed > 0 {
                return Err(OverrideError::BulkRolledBack {
                    failed: result.failed,
                    total: ids.len(),
                    result,
                });
            }
            *patches = staged;
        }

        Ok(result)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgOverrideStore {
    pool: PgPool,
}

impl PgOverrideStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OverrideStore for PgOverrideStore {
    async fn get(&self, content_id: &str) -> Result<Option<OverridePatch>, OverrideError> {
        let key = normalize_content_id(content_id)?;
        let row = overrides::find_by_content_id(&self.pool, &key).await?;
        Ok(row.map(Into::into))
    }

    async fn set(&self, content_id: &str, patch: OverridePatch) -> Result<OverridePatch, OverrideError> {
        let key = normalize_content_id(content_id)?;
        let mut conn = self.pool.acquire().await?;
        let row = overrides::upsert_merge(&mut conn, &key, &patch).await?;
        tracing::debug!("Override {} stored at {}", row.content_id, row.updated_at);
        Ok(row.into())
    }

    async fn delete(&self, content_id: &str) -> Result<bool, OverrideError> {
        let key = normalize_content_id(content_id)?;
        Ok(overrides::delete(&self.pool, &key).await?)
    }

    async fn list(&self) -> Result<HashMap<String, OverridePatch>, OverrideError> {
        let rows = overrides::list_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.content_id.clone(), row.into()))
            .collect())
    }

    async fn bulk_update(
        &self,
        ids: &[String],
        field: PatchField,
        value: &serde_json::Value,
        atomic: bool,
    ) -> Result<BulkUpdateResult, OverrideError> {
        let patch = field.patch_with(value)?;
        let mut result = BulkUpdateResult::default();

        if atomic {
            let mut tx = self.pool.begin().await?;
            for id in ids {
                let outcome = match normalize_content_id(id) {
                    Ok(key) => overrides::upsert_merge(&mut tx, &key, &patch)
                        .await
                        .map_err(OverrideError::from),
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(_) => result.updated += 1,
                    Err(e) => {
                        result.record_failure(id, e.to_string());
                        // Postgres aborts the transaction on the first statement error
                        break;
                    }
                }
            }

            if result.failed > 0 {
                tx.rollback().await?;
                return Err(OverrideError::BulkRolledBack {
                    failed: result.failed,
                    total: ids.len(),
                    result,
                });
            }
            tx.commit().await?;
            return Ok(result);
        }

        for id in ids {
            let outcome = match normalize_content_id(id) {
                Ok(key) => match self.pool.acquire().await {
                    Ok(mut conn) => overrides::upsert_merge(&mut conn, &key, &patch)
                        .await
                        .map_err(OverrideError::from),
                    Err(e) => Err(e.into()),
                },
                Err(e) => Err(e),
            };
            match outcome {
                Ok(_) => result.updated += 1,
                Err(e) => result.record_failure(id, e.to_string()),
            }
        }

        tracing::info!(
            "Bulk override of {} on {} ids: {} updated, {} failed",
            field,
            ids.len(),
            result.updated,
            result.failed
        );

        Ok(result)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn is_healthy(&self) -> bool {
        crate::db::health_check(&self.pool).await
    }
}
