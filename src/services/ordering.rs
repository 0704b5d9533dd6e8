//! Deduplication and ordering for playlist output

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::models::Channel;
use crate::services::m3u_parser::{PlaylistEntry, ATTR_GROUP};
use crate::services::rewriter::extract_content_id;

/// Keep the first entry per content id. Entries without one (plain HTTP
/// streams) are always kept. Returns how many entries were removed.
pub fn dedup_entries(entries: &mut Vec<PlaylistEntry>) -> usize {
    let mut seen: HashSet<String> = HashSet::new();
    let before = entries.len();

    entries.retain(|entry| match extract_content_id(&entry.uri) {
        Some(id) => seen.insert(id.to_ascii_lowercase()),
        None => true,
    });

    before - entries.len()
}

/// Group then name, case-insensitive; empty groups sort after every named group
pub fn compare_group_then_name(a: (&str, &str), b: (&str, &str)) -> Ordering {
    let (group_a, name_a) = (a.0.trim(), a.1);
    let (group_b, name_b) = (b.0.trim(), b.1);

    group_a
        .is_empty()
        .cmp(&group_b.is_empty())
        .then_with(|| group_a.to_lowercase().cmp(&group_b.to_lowercase()))
        .then_with(|| name_a.to_lowercase().cmp(&name_b.to_lowercase()))
}

/// Stable sort; ties keep their input order
pub fn sort_entries(entries: &mut [PlaylistEntry]) {
    let mut keyed: Vec<(String, String, PlaylistEntry)> = entries
        .iter()
        .map(|entry| {
            let meta = entry.metadata();
            (meta.attr(ATTR_GROUP).to_string(), meta.title, entry.clone())
        })
        .collect();

    keyed.sort_by(|a, b| compare_group_then_name((&a.0, &a.1), (&b.0, &b.1)));

    for (slot, (_, _, entry)) in entries.iter_mut().zip(keyed) {
        *slot = entry;
    }
}

/// Stable sort of catalog channels by their channel-level fields
pub fn sort_channels(channels: &mut [Channel]) {
    channels.sort_by(|a, b| {
        compare_group_then_name(
            (&a.group_label, &a.display_name),
            (&b.group_label, &b.display_name),
        )
    });
}
