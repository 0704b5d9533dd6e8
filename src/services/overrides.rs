//! Applies stored override patches to parsed data
//!
//! The catalog projection marks records and keeps disabled ones, the text
//! playlist drops disabled entries outright.

use std::collections::HashMap;

use crate::models::{Channel, OverridePatch};
use crate::services::m3u_parser::{
    set_attribute, set_title, PlaylistDocument, ATTR_DIRECTORY_ID, ATTR_DIRECTORY_NAME, ATTR_GROUP,
    ATTR_LOGO,
};
use crate::services::rewriter::extract_content_id;

pub type PatchMap = HashMap<String, OverridePatch>;

fn lookup<'a>(patches: &'a PatchMap, content_id: &str) -> Option<&'a OverridePatch> {
    patches
        .get(content_id)
        .or_else(|| patches.get(&content_id.to_ascii_lowercase()))
}

/// Catalog projection: flag every patched record, apply record-level fields,
/// and channel-level fields when the channel's first record is patched.
pub fn apply_to_channels(channels: &mut [Channel], patches: &PatchMap) {
    if patches.is_empty() {
        return;
    }

    for channel in channels.iter_mut() {
        for record in channel.streams.iter_mut() {
            let Some(patch) = lookup(patches, &record.content_id) else {
                continue;
            };
            record.has_override = true;
            if let Some(enabled) = patch.enabled {
                record.enabled = enabled;
            }
            if let Some(name) = &patch.display_name {
                record.display_name = name.clone();
            }
            if let Some(name) = &patch.directory_name {
                record.directory_name = name.clone();
            }
        }

        let Some(first) = channel.streams.first() else {
            continue;
        };
        let Some(patch) = lookup(patches, &first.content_id) else {
            continue;
        };
        if let Some(id) = &patch.directory_id {
            channel.directory_id = id.clone();
        }
        if let Some(logo) = &patch.logo_url {
            channel.logo_url = logo.clone();
        }
        if let Some(group) = &patch.group_label {
            channel.group_label = group.clone();
        }
    }
}

/// Apply one patch to a metadata line
pub fn apply_to_extinf(extinf: &str, patch: &OverridePatch) -> String {
    let mut line = extinf.to_string();
    let attrs = [
        (ATTR_DIRECTORY_ID, &patch.directory_id),
        (ATTR_DIRECTORY_NAME, &patch.directory_name),
        (ATTR_LOGO, &patch.logo_url),
        (ATTR_GROUP, &patch.group_label),
    ];
    for (name, value) in attrs {
        if let Some(value) = value {
            line = set_attribute(&line, name, value);
        }
    }
    if let Some(title) = &patch.display_name {
        line = set_title(&line, title);
    }
    line
}

/// Text path: rewrite patched metadata lines and drop disabled entries.
/// Returns how many entries were dropped.
pub fn apply_to_document(doc: &mut PlaylistDocument, patches: &PatchMap) -> usize {
    if patches.is_empty() {
        return 0;
    }

    let before = doc.entries.len();
    doc.entries.retain_mut(|entry| {
        let Some(patch) = extract_content_id(&entry.uri).and_then(|id| lookup(patches, &id)) else {
            return true;
        };
        if patch.is_disabled() {
            return false;
        }
        entry.extinf = apply_to_extinf(&entry.extinf, patch);
        true
    });
    before - doc.entries.len()
}
