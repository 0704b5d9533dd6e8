use serde::{Deserialize, Serialize};

/// Upstream feed a record came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLabel {
    pub ordinal: usize,
    pub label: String,
}

impl SourceLabel {
    pub fn new(ordinal: usize, label: impl Into<String>) -> Self {
        Self {
            ordinal,
            label: label.into(),
        }
    }
}

/// One physical playable entry
///
/// Only built by the parser from an entry whose swarm URI carries a valid
/// 40-hex content id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRecord {
    pub content_id: String,
    pub display_name: String,
    pub directory_id: String,
    pub directory_name: String,
    pub logo_url: String,
    pub group_label: String,
    pub source: SourceLabel,
    pub enabled: bool,
    pub has_override: bool,
}

impl StreamRecord {
    /// Grouping key, `None` when the directory id is blank
    pub fn grouping_key(&self) -> Option<&str> {
        let key = self.directory_id.trim();
        (!key.is_empty()).then_some(key)
    }
}

/// Aggregation unit. Channel-level fields come from the first record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub display_name: String,
    pub directory_id: String,
    pub logo_url: String,
    pub group_label: String,
    pub streams: Vec<StreamRecord>,
}

impl Channel {
    /// Start a channel from its representative record
    pub fn from_first(record: StreamRecord) -> Self {
        Self {
            display_name: record.display_name.clone(),
            directory_id: record.directory_id.clone(),
            logo_url: record.logo_url.clone(),
            group_label: record.group_label.clone(),
            streams: vec![record],
        }
    }
}

/// Optional catalog filters, matched case-insensitively as substrings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelFilter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
}

impl ChannelFilter {
    pub fn is_empty(&self) -> bool {
        blank(&self.name) && blank(&self.group)
    }

    /// Channel-level fields only; individual stream names never match
    pub fn matches(&self, channel: &Channel) -> bool {
        contains_ci(&channel.display_name, self.name.as_deref())
            && contains_ci(&channel.group_label, self.group.as_deref())
    }
}

fn blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

fn contains_ci(haystack: &str, needle: Option<&str>) -> bool {
    match needle.map(str::trim) {
        None | Some("") => true,
        Some(needle) => haystack.to_lowercase().contains(&needle.to_lowercase()),
    }
}

/// Stream entry as exposed by the catalog endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamView {
    pub content_id: String,
    pub display_name: String,
    pub directory_name: String,
    pub source: String,
    pub enabled: bool,
    pub has_override: bool,
    pub playback_url: String,
}

/// Channel as exposed by the catalog endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelView {
    pub display_name: String,
    pub directory_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub logo_url: String,
    pub group_label: String,
    pub streams: Vec<StreamView>,
}

/// Catalog response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsResponse {
    pub channels: Vec<ChannelView>,
    pub total: usize,
    pub failed_sources: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str, group: &str) -> Channel {
        Channel {
            display_name: name.to_string(),
            directory_id: String::new(),
            logo_url: String::new(),
            group_label: group.to_string(),
            streams: Vec::new(),
        }
    }

    #[test]
    fn test_filter_is_case_insensitive() {
        let filter = ChannelFilter {
            name: Some("sport".to_string()),
            group: None,
        };
        assert!(filter.matches(&channel("Eurosport 1", "Sports")));
        assert!(!filter.matches(&channel("News 24", "Sports")));
    }

    #[test]
    fn test_filter_combines_name_and_group() {
        let filter = ChannelFilter {
            name: Some("one".to_string()),
            group: Some("UK".to_string()),
        };
        assert!(filter.matches(&channel("BBC One", "uk general")));
        assert!(!filter.matches(&channel("BBC One", "Ireland")));
        assert!(!filter.is_empty());
        assert!(ChannelFilter::default().is_empty());
    }

    #[test]
    fn test_blank_directory_id_has_no_grouping_key() {
        let record = StreamRecord {
            content_id: "a".repeat(40),
            display_name: "X".to_string(),
            directory_id: "   ".to_string(),
            directory_name: String::new(),
            logo_url: String::new(),
            group_label: String::new(),
            source: SourceLabel::new(0, "main"),
            enabled: true,
            has_override: false,
        };
        assert_eq!(record.grouping_key(), None);
    }
}
