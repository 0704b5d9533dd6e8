//! Playback URI rewriting for the text playlist
//!
//! Swarm URIs and previously rewritten URIs (ours or the engine's own
//! `/ace/getstream` form) all end up as `{base}/stream?id=...`.

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use crate::services::m3u_parser::{PlaylistDocument, SWARM_SCHEME};

pub const STREAM_PATH: &str = "/stream";
pub const TRANSCODE_AUDIO_PARAM: &str = "transcode_audio";

const LEGACY_PATHS: [&str; 2] = ["/ace/getstream", "/ace/manifest.m3u8"];
const LEGACY_ID_PARAMS: [&str; 2] = ["id", "infohash"];

lazy_static! {
    static ref LEADING_HEX: Regex = Regex::new(r"^[0-9a-fA-F]{1,40}").unwrap();
    static ref LOGO_ATTR: Regex = Regex::new(r#"(?:^|\s)tvg-logo="[^"]*""#).unwrap();
}

/// How the rewrite stage sees a URI line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UriKind {
    /// `acestream://{id}`
    Swarm { content_id: String },
    /// Already in our `/stream?id=` form
    Internal {
        content_id: String,
        transcode_audio: Option<String>,
    },
    /// Engine-native `/ace/getstream?id=` form from older playlists
    Legacy {
        content_id: String,
        transcode_audio: Option<String>,
    },
    /// Anything else, passed through untouched
    Other,
}

impl UriKind {
    pub fn content_id(&self) -> Option<&str> {
        match self {
            UriKind::Swarm { content_id }
            | UriKind::Internal { content_id, .. }
            | UriKind::Legacy { content_id, .. } => Some(content_id),
            UriKind::Other => None,
        }
    }
}

/// Rewrite settings
#[derive(Debug, Clone, Default)]
pub struct RewriteOptions {
    /// Public base URL, empty for root-relative URIs
    pub base_url: String,
    /// Used when the URI carries no `transcode_audio` of its own
    pub transcode_audio: Option<String>,
}

/// Loose content id extraction: up to 40 leading hex characters.
///
/// Deliberately not the parser's strict check; a short or over-long value
/// still yields an id here.
pub fn loose_content_id(value: &str) -> Option<String> {
    LEADING_HEX
        .find(value.trim())
        .map(|m| m.as_str().to_string())
}

/// Content id of any URI kind the rewrite stage understands
pub fn extract_content_id(uri: &str) -> Option<String> {
    classify_uri(uri).content_id().map(str::to_string)
}

fn parse_http(uri: &str) -> Option<Url> {
    if uri.starts_with('/') {
        return Url::parse("http://localhost").ok()?.join(uri).ok();
    }
    if !(uri.starts_with("http://") || uri.starts_with("https://")) {
        return None;
    }
    Url::parse(uri).ok()
}

fn query_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

pub fn classify_uri(uri: &str) -> UriKind {
    let uri = uri.trim();

    if let Some(suffix) = uri.strip_prefix(SWARM_SCHEME) {
        return match loose_content_id(suffix) {
            Some(content_id) => UriKind::Swarm { content_id },
            None => UriKind::Other,
        };
    }

    let Some(url) = parse_http(uri) else {
        return UriKind::Other;
    };
    let path = url.path().trim_end_matches('/');
    let transcode_audio = query_value(&url, TRANSCODE_AUDIO_PARAM);

    if path.ends_with(STREAM_PATH) {
        if let Some(content_id) = query_value(&url, "id").and_then(|v| loose_content_id(&v)) {
            return UriKind::Internal {
                content_id,
                transcode_audio,
            };
        }
    }

    if LEGACY_PATHS.iter().any(|legacy| path.ends_with(legacy)) {
        let content_id = LEGACY_ID_PARAMS
            .iter()
            .find_map(|param| query_value(&url, param))
            .and_then(|v| loose_content_id(&v));
        if let Some(content_id) = content_id {
            return UriKind::Legacy {
                content_id,
                transcode_audio,
            };
        }
    }

    UriKind::Other
}

/// `{base}/stream?id={id}[&transcode_audio=v]`
pub fn internal_stream_url(base_url: &str, content_id: &str, transcode_audio: Option<&str>) -> String {
    let mut url = format!(
        "{}{}?id={}",
        base_url.trim_end_matches('/'),
        STREAM_PATH,
        content_id
    );
    if let Some(value) = transcode_audio.filter(|v| !v.is_empty()) {
        url.push_str(&format!("&{}={}", TRANSCODE_AUDIO_PARAM, urlencoding::encode(value)));
    }
    url
}

/// Rewrite one URI line; non-swarm, non-rewritten URIs are returned as-is
pub fn rewrite_uri(uri: &str, options: &RewriteOptions) -> String {
    match classify_uri(uri) {
        UriKind::Swarm { content_id } => {
            internal_stream_url(&options.base_url, &content_id, options.transcode_audio.as_deref())
        }
        UriKind::Internal {
            content_id,
            transcode_audio,
        }
        | UriKind::Legacy {
            content_id,
            transcode_audio,
        } => internal_stream_url(
            &options.base_url,
            &content_id,
            transcode_audio.as_deref().or(options.transcode_audio.as_deref()),
        ),
        UriKind::Other => uri.to_string(),
    }
}

/// Remove `tvg-logo` from a metadata line and tidy the gap it leaves.
///
/// Only the attribute and its separator go; whitespace elsewhere on the line
/// is kept as is.
pub fn strip_logo(extinf: &str) -> String {
    let mut out = String::with_capacity(extinf.len());
    let mut last = 0;

    for m in LOGO_ATTR.find_iter(extinf) {
        out.push_str(&extinf[last..m.start()]);
        last = m.end();

        let rest = &extinf[last..];
        let after_ws = rest.trim_start();
        if after_ws.starts_with(',') {
            // `... tvg-logo="x" ,Title` leaves no space before the comma
            last += rest.len() - after_ws.len();
        } else if m.start() == 0 && rest.starts_with(char::is_whitespace) {
            // Nothing consumed on the left, take one separator from the right
            last += rest.chars().next().map_or(0, char::len_utf8);
        }
    }

    out.push_str(&extinf[last..]);
    out
}

/// Strip logos and rewrite every entry URI in place
pub fn rewrite_document(doc: &mut PlaylistDocument, options: &RewriteOptions) {
    for entry in &mut doc.entries {
        entry.extinf = strip_logo(&entry.extinf);
        entry.uri = rewrite_uri(&entry.uri, options);
    }
}
