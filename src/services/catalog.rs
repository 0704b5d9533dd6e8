//! Catalog pipeline: fetch every source, then project either the channel
//! catalog (JSON) or the rewritten playback playlist (text).

use bytes::Bytes;
use futures::future::join_all;
use std::sync::Arc;

use crate::config::SourceConfig;
use crate::metrics;
use crate::models::{
    Channel, ChannelFilter, ChannelView, ChannelsResponse, OverrideError, SourceLabel, StreamView,
};
use crate::services::aggregator::{aggregate, filter_channels};
use crate::services::fetcher::Fetcher;
use crate::services::m3u_parser::{parse_document, parse_records, PlaylistDocument};
use crate::services::ordering::{dedup_entries, sort_channels, sort_entries};
use crate::services::override_store::OverrideStore;
use crate::services::overrides::{apply_to_channels, apply_to_document};
use crate::services::rewriter::{internal_stream_url, rewrite_document, RewriteOptions};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("all {attempted} playlist sources are unavailable")]
    AllSourcesUnavailable { attempted: usize },

    #[error(transparent)]
    Overrides(#[from] OverrideError),
}

/// Bodies of the sources that answered, in source order
struct Ingested {
    bodies: Vec<(SourceLabel, Bytes)>,
    failed: Vec<String>,
}

pub struct CatalogService {
    fetcher: Arc<dyn Fetcher>,
    overrides: Arc<dyn OverrideStore>,
    sources: Vec<SourceConfig>,
    base_url: String,
    default_transcode_audio: Option<String>,
}

impl CatalogService {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        overrides: Arc<dyn OverrideStore>,
        sources: Vec<SourceConfig>,
        base_url: impl Into<String>,
        default_transcode_audio: Option<String>,
    ) -> Self {
        Self {
            fetcher,
            overrides,
            sources,
            base_url: base_url.into(),
            default_transcode_audio,
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Fetch all sources concurrently, keeping source order.
    ///
    /// A failing source is skipped. Only when every configured source fails
    /// does the whole read fail.
    async fn ingest(&self) -> Result<Ingested, IngestError> {
        let fetches = self.sources.iter().map(|source| async move {
            (source, self.fetcher.fetch(&source.url).await)
        });

        let mut ingested = Ingested {
            bodies: Vec::with_capacity(self.sources.len()),
            failed: Vec::new(),
        };

        for (source, result) in join_all(fetches).await {
            match result {
                Ok(fetched) => ingested.bodies.push((
                    SourceLabel::new(source.ordinal, source.label.clone()),
                    fetched.body,
                )),
                Err(e) => {
                    tracing::warn!("Skipping source {}: {}", source.label, e);
                    metrics::record_fetch_failure(&source.label);
                    ingested.failed.push(source.label.clone());
                }
            }
        }

        if !self.sources.is_empty() && ingested.bodies.is_empty() {
            return Err(IngestError::AllSourcesUnavailable {
                attempted: self.sources.len(),
            });
        }

        Ok(ingested)
    }

    /// Aggregated, overridden, filtered and sorted channel catalog
    pub async fn list_channels(&self, filter: &ChannelFilter) -> Result<ChannelsResponse, IngestError> {
        let ingested = self.ingest().await?;
        let patches = self.overrides.list().await?;

        let records = ingested
            .bodies
            .iter()
            .flat_map(|(label, body)| parse_records(body, label));
        let mut channels = aggregate(records);
        apply_to_channels(&mut channels, &patches);

        let mut channels = filter_channels(channels, filter);
        sort_channels(&mut channels);

        let channels: Vec<ChannelView> = channels.into_iter().map(|c| self.view(c)).collect();
        Ok(ChannelsResponse {
            total: channels.len(),
            channels,
            failed_sources: ingested.failed,
        })
    }

    /// Merged playlist with overrides applied, duplicates removed, entries
    /// sorted and URIs pointing at this service
    pub async fn render_playlist(&self, transcode_audio: Option<String>) -> Result<String, IngestError> {
        let ingested = self.ingest().await?;
        let patches = self.overrides.list().await?;

        let mut doc = PlaylistDocument::default();
        for (_, body) in &ingested.bodies {
            doc.extend(parse_document(body));
        }

        let dropped = apply_to_document(&mut doc, &patches);
        let duplicates = dedup_entries(&mut doc.entries);
        sort_entries(&mut doc.entries);

        let options = RewriteOptions {
            base_url: self.base_url.clone(),
            transcode_audio: transcode_audio
                .filter(|v| !v.trim().is_empty())
                .or_else(|| self.default_transcode_audio.clone()),
        };
        rewrite_document(&mut doc, &options);

        tracing::info!(
            "Rendered playlist: {} entries, {} disabled, {} duplicates, {} failed sources",
            doc.entries.len(),
            dropped,
            duplicates,
            ingested.failed.len()
        );

        Ok(doc.render())
    }

    fn view(&self, channel: Channel) -> ChannelView {
        let transcode = self.default_transcode_audio.as_deref();
        ChannelView {
            display_name: channel.display_name,
            directory_id: channel.directory_id,
            logo_url: channel.logo_url,
            group_label: channel.group_label,
            streams: channel
                .streams
                .into_iter()
                .map(|record| StreamView {
                    playback_url: internal_stream_url(&self.base_url, &record.content_id, transcode),
                    content_id: record.content_id,
                    display_name: record.display_name,
                    directory_name: record.directory_name,
                    source: record.source.label,
                    enabled: record.enabled,
                    has_override: record.has_override,
                })
                .collect(),
        }
    }
}
