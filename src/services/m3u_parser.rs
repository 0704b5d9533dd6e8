//! Extended M3U parsing
//!
//! Two views of the same text:
//! - [`parse_records`]: strict, swarm-only records for the catalog
//! - [`parse_document`]: every entry kept verbatim for the rewritten playlist

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

use crate::models::{SourceLabel, StreamRecord};

pub const EXTINF_PREFIX: &str = "#EXTINF:";
pub const SWARM_SCHEME: &str = "acestream://";

pub const ATTR_DIRECTORY_ID: &str = "tvg-id";
pub const ATTR_DIRECTORY_NAME: &str = "tvg-name";
pub const ATTR_LOGO: &str = "tvg-logo";
pub const ATTR_GROUP: &str = "group-title";

lazy_static! {
    /// Regex to parse EXTINF attributes (tvg-id="...", group-title="...", etc)
    static ref ATTR_REGEX: Regex = Regex::new(r#"([\w]+(?:-[\w]+)*)="([^"]*)""#).unwrap();
}

/// Strict content id check used by the parser: exactly 40 hex characters.
///
/// The rewrite stage uses the looser [`crate::services::rewriter::extract_content_id`].
pub fn is_valid_content_id(id: &str) -> bool {
    id.len() == 40 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Parsed EXTINF line data
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtinfData {
    /// First occurrence of each attribute name
    pub attributes: HashMap<String, String>,
    /// Text after the last comma
    pub title: String,
}

impl ExtinfData {
    pub fn attr(&self, name: &str) -> &str {
        self.attributes.get(name).map(String::as_str).unwrap_or("")
    }
}

/// Split an EXTINF line into header (attributes) and title at the last comma.
/// A line without a comma is all header and has an empty title.
fn split_extinf(line: &str) -> (&str, &str) {
    match line.rfind(',') {
        Some(idx) => (&line[..idx], &line[idx + 1..]),
        None => (line, ""),
    }
}

/// Parse an EXTINF line
/// Format: #EXTINF:duration tvg-id="..." tvg-name="..." tvg-logo="..." group-title="...",Title
pub fn parse_extinf(line: &str) -> Option<ExtinfData> {
    let content = line.trim().strip_prefix(EXTINF_PREFIX)?;
    let (header, title) = split_extinf(content);

    let mut attributes = HashMap::new();
    for caps in ATTR_REGEX.captures_iter(header) {
        let key = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let value = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        attributes
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    Some(ExtinfData {
        attributes,
        title: title.trim().to_string(),
    })
}

/// Content id carried by a swarm URI line, if the line is one
fn swarm_suffix(line: &str) -> Option<&str> {
    line.strip_prefix(SWARM_SCHEME).map(str::trim)
}

/// Parse raw playlist bytes into stream records.
///
/// A metadata line followed directly by a swarm URI forms a record. Any
/// other line after a metadata line discards it, which means conventional
/// HTTP entries never reach the catalog. Malformed content ids are dropped.
pub fn parse_records(raw: &[u8], source: &SourceLabel) -> Vec<StreamRecord> {
    let text = String::from_utf8_lossy(raw);
    let mut records = Vec::new();
    let mut pending: Option<ExtinfData> = None;

    for line in text.lines() {
        let line = line.trim();

        if line.starts_with(EXTINF_PREFIX) {
            pending = parse_extinf(line);
            continue;
        }

        let Some(extinf) = pending.take() else {
            continue;
        };

        let Some(content_id) = swarm_suffix(line) else {
            continue;
        };

        if !is_valid_content_id(content_id) {
            tracing::debug!(source = %source.label, "dropping malformed content id: {}", content_id);
            continue;
        }

        records.push(StreamRecord {
            content_id: content_id.to_string(),
            display_name: extinf.title.clone(),
            directory_id: extinf.attr(ATTR_DIRECTORY_ID).to_string(),
            directory_name: extinf.attr(ATTR_DIRECTORY_NAME).to_string(),
            logo_url: extinf.attr(ATTR_LOGO).to_string(),
            group_label: extinf.attr(ATTR_GROUP).to_string(),
            source: source.clone(),
            enabled: true,
            has_override: false,
        });
    }

    records
}

/// One playlist entry kept verbatim for text rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub extinf: String,
    /// `#EXTVLCOPT` style lines between the metadata line and the URI
    pub directives: Vec<String>,
    pub uri: String,
}

impl PlaylistEntry {
    pub fn metadata(&self) -> ExtinfData {
        parse_extinf(&self.extinf).unwrap_or_default()
    }
}

/// Header lines plus entries of one or more merged playlists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaylistDocument {
    pub header: Vec<String>,
    pub entries: Vec<PlaylistEntry>,
}

impl PlaylistDocument {
    /// Append another document. Only the first `#EXTM3U` marker is kept.
    pub fn extend(&mut self, other: PlaylistDocument) {
        let has_marker = self.header.iter().any(|l| l.starts_with("#EXTM3U"));
        for line in other.header {
            if has_marker && line.starts_with("#EXTM3U") {
                continue;
            }
            self.header.push(line);
        }
        self.entries.extend(other.entries);
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.header {
            out.push_str(line);
            out.push('\n');
        }
        for entry in &self.entries {
            out.push_str(&entry.extinf);
            out.push('\n');
            for directive in &entry.directives {
                out.push_str(directive);
                out.push('\n');
            }
            out.push_str(&entry.uri);
            out.push('\n');
        }
        out
    }
}

/// Split playlist text into header lines and entries of any URI kind.
///
/// Lines that are not part of an entry (markers, comments, dangling
/// metadata) go to the header in their original order.
pub fn parse_document(raw: &[u8]) -> PlaylistDocument {
    let text = String::from_utf8_lossy(raw);
    let mut doc = PlaylistDocument::default();
    let mut pending: Option<(String, Vec<String>)> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with(EXTINF_PREFIX) {
            if let Some((dangling, directives)) = pending.take() {
                doc.header.push(dangling);
                doc.header.extend(directives);
            }
            pending = Some((line.to_string(), Vec::new()));
            continue;
        }

        match pending.as_mut() {
            Some((_, directives)) if line.starts_with('#') => directives.push(line.to_string()),
            Some(_) => {
                if let Some((extinf, directives)) = pending.take() {
                    doc.entries.push(PlaylistEntry {
                        extinf,
                        directives,
                        uri: line.to_string(),
                    });
                }
            }
            None => doc.header.push(line.to_string()),
        }
    }

    if let Some((dangling, directives)) = pending {
        doc.header.push(dangling);
        doc.header.extend(directives);
    }

    doc
}

/// Replace the value of `name` on a metadata line, appending the attribute
/// to the header when absent.
pub fn set_attribute(extinf: &str, name: &str, value: &str) -> String {
    let (header, title) = split_extinf(extinf);
    let has_comma = extinf.contains(',');
    let pattern = format!(r#"{}="[^"]*""#, regex::escape(name));

    let header = match Regex::new(&pattern) {
        Ok(re) if re.is_match(header) => re
            .replacen(header, 1, |_: &regex::Captures| format!(r#"{}="{}""#, name, value))
            .into_owned(),
        _ => format!(r#"{} {}="{}""#, header.trim_end(), name, value),
    };

    if has_comma {
        format!("{},{}", header, title)
    } else {
        header
    }
}

/// Replace the display name (text after the last comma)
pub fn set_title(extinf: &str, title: &str) -> String {
    let (header, _) = split_extinf(extinf);
    format!("{},{}", header, title)
}
