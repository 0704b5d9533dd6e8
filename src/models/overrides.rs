use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Sparse user correction keyed by content id.
///
/// `None` never overwrites a stored value, `Some` always replaces it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverridePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_label: Option<String>,
}

impl OverridePatch {
    /// Field-wise last-write-wins merge of `incoming` into `self`
    pub fn merge(&mut self, incoming: OverridePatch) {
        if incoming.enabled.is_some() {
            self.enabled = incoming.enabled;
        }
        if incoming.display_name.is_some() {
            self.display_name = incoming.display_name;
        }
        if incoming.directory_id.is_some() {
            self.directory_id = incoming.directory_id;
        }
        if incoming.directory_name.is_some() {
            self.directory_name = incoming.directory_name;
        }
        if incoming.logo_url.is_some() {
            self.logo_url = incoming.logo_url;
        }
        if incoming.group_label.is_some() {
            self.group_label = incoming.group_label;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when the patch explicitly disables the entry
    pub fn is_disabled(&self) -> bool {
        self.enabled == Some(false)
    }
}

/// Field addressable by a bulk update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatchField {
    Enabled,
    DisplayName,
    DirectoryId,
    DirectoryName,
    LogoUrl,
    GroupLabel,
}

impl fmt::Display for PatchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PatchField::Enabled => "enabled",
            PatchField::DisplayName => "displayName",
            PatchField::DirectoryId => "directoryId",
            PatchField::DirectoryName => "directoryName",
            PatchField::LogoUrl => "logoUrl",
            PatchField::GroupLabel => "groupLabel",
        };
        f.write_str(name)
    }
}

impl PatchField {
    /// Build a single-field patch, checking the value type
    pub fn patch_with(self, value: &serde_json::Value) -> Result<OverridePatch, OverrideError> {
        let text = || {
            value.as_str().map(str::to_string).ok_or(OverrideError::InvalidValue {
                field: self,
                expected: "string",
            })
        };

        let mut patch = OverridePatch::default();
        match self {
            PatchField::Enabled => {
                patch.enabled = Some(value.as_bool().ok_or(OverrideError::InvalidValue {
                    field: self,
                    expected: "boolean",
                })?);
            }
            PatchField::DisplayName => patch.display_name = Some(text()?),
            PatchField::DirectoryId => patch.directory_id = Some(text()?),
            PatchField::DirectoryName => patch.directory_name = Some(text()?),
            PatchField::LogoUrl => patch.logo_url = Some(text()?),
            PatchField::GroupLabel => patch.group_label = Some(text()?),
        }
        Ok(patch)
    }
}

/// Request body for the bulk endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateRequest {
    pub ids: Vec<String>,
    pub field: PatchField,
    pub value: serde_json::Value,
    #[serde(default)]
    pub atomic: bool,
}

/// Outcome of a bulk update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateResult {
    pub updated: usize,
    pub failed: usize,
    /// content id -> reason
    pub errors: HashMap<String, String>,
}

impl BulkUpdateResult {
    pub fn record_failure(&mut self, id: &str, reason: impl Into<String>) {
        self.failed += 1;
        self.errors.insert(id.to_string(), reason.into());
    }
}

/// Override store errors
#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    #[error("invalid content id: {0}")]
    InvalidContentId(String),

    #[error("invalid value for {field}: expected {expected}")]
    InvalidValue {
        field: PatchField,
        expected: &'static str,
    },

    #[error("atomic bulk update rolled back: {failed} of {total} ids failed")]
    BulkRolledBack {
        failed: usize,
        total: usize,
        result: BulkUpdateResult,
    },

    #[error("override store error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for OverrideError {
    fn from(err: sqlx::Error) -> Self {
        OverrideError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_keeps_absent_fields() {
        let mut stored = OverridePatch {
            enabled: Some(false),
            group_label: Some("Sports".to_string()),
            ..Default::default()
        };
        stored.merge(OverridePatch {
            group_label: Some("News".to_string()),
            logo_url: Some("http://logo".to_string()),
            ..Default::default()
        });

        assert_eq!(stored.enabled, Some(false));
        assert_eq!(stored.group_label.as_deref(), Some("News"));
        assert_eq!(stored.logo_url.as_deref(), Some("http://logo"));
        assert!(stored.display_name.is_none());
    }

    #[test]
    fn test_patch_deserializes_sparse_json() {
        let patch: OverridePatch =
            serde_json::from_value(json!({ "enabled": false, "groupLabel": "Kids" })).unwrap();
        assert!(patch.is_disabled());
        assert_eq!(patch.group_label.as_deref(), Some("Kids"));
        assert!(patch.directory_id.is_none());
    }

    #[test]
    fn test_patch_field_checks_value_type() {
        assert!(PatchField::Enabled.patch_with(&json!("yes")).is_err());
        assert!(PatchField::GroupLabel.patch_with(&json!(true)).is_err());

        let patch = PatchField::Enabled.patch_with(&json!(false)).unwrap();
        assert_eq!(patch.enabled, Some(false));

        let patch = PatchField::LogoUrl.patch_with(&json!("http://x/logo.png")).unwrap();
        assert_eq!(patch.logo_url.as_deref(), Some("http://x/logo.png"));
    }

    #[test]
    fn test_each_text_field_sets_only_itself() {
        let value = json!("v");
        let cases = [
            (PatchField::DisplayName, OverridePatch { display_name: Some("v".into()), ..Default::default() }),
            (PatchField::DirectoryId, OverridePatch { directory_id: Some("v".into()), ..Default::default() }),
            (PatchField::DirectoryName, OverridePatch { directory_name: Some("v".into()), ..Default::default() }),
            (PatchField::LogoUrl, OverridePatch { logo_url: Some("v".into()), ..Default::default() }),
            (PatchField::GroupLabel, OverridePatch { group_label: Some("v".into()), ..Default::default() }),
        ];

        for (field, expected) in cases {
            assert_eq!(field.patch_with(&value).unwrap(), expected);
            assert!(field.patch_with(&json!(1)).is_err());
        }
    }

    #[test]
    fn test_bulk_request_field_names() {
        let req: BulkUpdateRequest = serde_json::from_value(json!({
            "ids": ["a"],
            "field": "groupLabel",
            "value": "Movies"
        }))
        .unwrap();
        assert_eq!(req.field, PatchField::GroupLabel);
        assert!(!req.atomic);
        assert_eq!(req.field.to_string(), "groupLabel");
    }
}
