use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::models::{Channel, Guide};
use crate::services::fetcher::{FetchError, SourceFetcher};
use crate::services::m3u_parser::M3UParser;
use crate::services::xmltv_parser::XmltvParser;

/// Immutable parsed source plus the time it was fetched
#[derive(Debug)]
pub struct Snapshot<T> {
    pub value: T,
    pub fetched_at: DateTime<Utc>,
}

impl<T> Snapshot<T> {
    fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            value,
            fetched_at: Utc::now(),
        })
    }
}

type Slot<T> = Arc<RwLock<Option<Arc<Snapshot<T>>>>>;

/// Cache status for the health endpoint
#[derive(Debug, Serialize)]
pub struct CacheStatus {
    pub channels: bool,
    pub epg: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epg_channel_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels_fetched_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epg_fetched_at: Option<DateTime<Utc>>,
}

/// Result of a manual refresh
#[derive(Debug, Clone, Copy)]
pub struct RefreshSummary {
    pub channels: usize,
    pub programmes: usize,
}

/// In-memory cache of the last parsed playlist and guide.
///
/// Each slot holds an `Arc` snapshot that is swapped as a whole, so readers
/// either see the previous snapshot or the new one, never a mix. The two
/// slots are independent. Locks are never held across network I/O.
#[derive(Clone, Default)]
pub struct SourceCache {
    channels: Slot<Vec<Channel>>,
    guide: Slot<Guide>,
}

impl SourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn channels(&self) -> Option<Arc<Snapshot<Vec<Channel>>>> {
        self.channels.read().await.clone()
    }

    pub async fn guide(&self) -> Option<Arc<Snapshot<Guide>>> {
        self.guide.read().await.clone()
    }

    pub async fn replace_channels(&self, channels: Vec<Channel>) -> Arc<Snapshot<Vec<Channel>>> {
        let snapshot = Snapshot::new(channels);
        *self.channels.write().await = Some(snapshot.clone());
        snapshot
    }

    pub async fn replace_guide(&self, guide: Guide) -> Arc<Snapshot<Guide>> {
        let snapshot = Snapshot::new(guide);
        *self.guide.write().await = Some(snapshot.clone());
        snapshot
    }

    pub async fn status(&self) -> CacheStatus {
        let channels = self.channels().await;
        let guide = self.guide().await;

        CacheStatus {
            channels: channels.is_some(),
            epg: guide.is_some(),
            channel_count: channels.as_ref().map(|s| s.value.len()),
            epg_channel_count: guide.as_ref().map(|s| s.value.len()),
            channels_fetched_at: channels.as_ref().map(|s| s.fetched_at),
            epg_fetched_at: guide.as_ref().map(|s| s.fetched_at),
        }
    }

    /// Cached channels, fetching and parsing the playlist on a miss
    pub async fn channels_or_fetch(
        &self,
        fetcher: &SourceFetcher,
        config: &Config,
    ) -> Result<Arc<Snapshot<Vec<Channel>>>, FetchError> {
        if let Some(snapshot) = self.channels().await {
            return Ok(snapshot);
        }

        let channels = load_channels(fetcher, config).await?;
        tracing::info!("Loaded {} channels", channels.len());
        Ok(self.replace_channels(channels).await)
    }

    /// Cached guide, fetching and parsing the XMLTV document on a miss
    pub async fn guide_or_fetch(
        &self,
        fetcher: &SourceFetcher,
        config: &Config,
    ) -> Result<Arc<Snapshot<Guide>>, FetchError> {
        if let Some(snapshot) = self.guide().await {
            return Ok(snapshot);
        }

        let guide = load_guide(fetcher, config).await?;
        Ok(self.replace_guide(guide).await)
    }

    /// Refetch both sources. The playlist is replaced before the guide is
    /// fetched, so a guide failure leaves the new playlist in place.
    pub async fn refresh_all(
        &self,
        fetcher: &SourceFetcher,
        config: &Config,
    ) -> Result<RefreshSummary, FetchError> {
        let channels = load_channels(fetcher, config).await?;
        let channels = self.replace_channels(channels).await.value.len();

        let guide = load_guide(fetcher, config).await?;
        let programmes = guide.values().map(Vec::len).sum();
        self.replace_guide(guide).await;

        tracing::info!(channels, programmes, "Sources refreshed");
        Ok(RefreshSummary { channels, programmes })
    }
}

async fn load_channels(fetcher: &SourceFetcher, config: &Config) -> Result<Vec<Channel>, FetchError> {
    let text = fetcher
        .fetch_text("playlist", &config.m3u_url, config.playlist_fetch_timeout())
        .await?;

    Ok(M3UParser::parse(&text))
}

async fn load_guide(fetcher: &SourceFetcher, config: &Config) -> Result<Guide, FetchError> {
    let text = fetcher
        .fetch_text("guide", &config.xmltv_url, config.guide_fetch_timeout())
        .await?;

    Ok(XmltvParser::parse(&text))
}
