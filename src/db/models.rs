//! Database row types for PostgreSQL

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::models::OverridePatch;

/// Override row from database
#[derive(Debug, Clone, FromRow)]
pub struct OverrideRow {
    pub content_id: String,
    pub enabled: Option<bool>,
    pub display_name: Option<String>,
    pub directory_id: Option<String>,
    pub directory_name: Option<String>,
    pub logo_url: Option<String>,
    pub group_label: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<OverrideRow> for OverridePatch {
    fn from(row: OverrideRow) -> Self {
        OverridePatch {
            enabled: row.enabled,
            display_name: row.display_name,
            directory_id: row.directory_id,
            directory_name: row.directory_name,
            logo_url: row.logo_url,
            group_label: row.group_label,
        }
    }
}
