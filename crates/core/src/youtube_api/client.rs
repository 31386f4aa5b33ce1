use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{sync::Mutex, time::Instant};

use crate::{
    cache::ResponseCache,
    error::{FinderError, Result},
    types::{Playlist, Video},
    youtube_api::{
        transport::ApiTransport,
        types::{
            PlaylistItemListResponse, PlaylistListResponse, SearchListResponse, VideoListResponse,
        },
    },
};

/// Largest page size the list endpoints accept.
pub const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Total attempts per request, including the first one.
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts.
    pub retry_backoff: Duration,
    /// Minimum spacing between two outgoing requests.
    pub min_interval: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_backoff: Duration::from_secs(1),
            min_interval: Duration::from_millis(500),
        }
    }
}

/// Session object for the YouTube Data API.
///
/// Constructed once per run and passed to the finder; safe to share between
/// concurrently running strategies.
pub struct YouTubeApi {
    transport: Arc<dyn ApiTransport>,
    cache: Arc<ResponseCache>,
    settings: ClientSettings,
    last_call: Mutex<Option<Instant>>,
    quota_used: AtomicU64,
    api_calls: AtomicU64,
    quota_exhausted: AtomicBool,
}

impl YouTubeApi {
    pub fn new(
        transport: Arc<dyn ApiTransport>,
        cache: Arc<ResponseCache>,
        settings: ClientSettings,
    ) -> Self {
        Self {
            transport,
            cache,
            settings,
            last_call: Mutex::new(None),
            quota_used: AtomicU64::new(0),
            api_calls: AtomicU64::new(0),
            quota_exhausted: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Quota units spent by successful requests so far.
    pub fn quota_used(&self) -> u64 {
        self.quota_used.load(Ordering::Relaxed)
    }

    pub fn api_calls(&self) -> u64 {
        self.api_calls.load(Ordering::Relaxed)
    }

    pub fn is_quota_exhausted(&self) -> bool {
        self.quota_exhausted.load(Ordering::Relaxed)
    }

    /// Clear the exhausted flag left behind by a previous run.
    pub fn begin_run(&self) {
        self.quota_exhausted.store(false, Ordering::Relaxed);
    }

    pub async fn get_video(&self, video_id: &str) -> Result<Video> {
        let response: VideoListResponse = self
            .fetch(
                "videos",
                &[
                    ("part", "snippet,contentDetails,statistics".to_string()),
                    ("id", video_id.to_string()),
                ],
            )
            .await?;

        let item = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| FinderError::NotFound {
                resource: "video",
                id: video_id.to_string(),
            })?;

        let count = |value: Option<String>| value.and_then(|v| v.parse().ok()).unwrap_or(0);

        Ok(Video {
            id: video_id.to_string(),
            title: item.snippet.title,
            channel_id: item.snippet.channel_id,
            channel_title: item.snippet.channel_title,
            description: item.snippet.description,
            duration: item.content_details.duration.unwrap_or_default(),
            view_count: count(item.statistics.view_count),
            like_count: count(item.statistics.like_count),
            published_at: item.snippet.published_at,
            thumbnail_url: item.snippet.thumbnails.best_url(),
            tags: item.snippet.tags,
        })
    }

    pub async fn get_playlist(&self, playlist_id: &str) -> Result<Playlist> {
        let response: PlaylistListResponse = self
            .fetch(
                "playlists",
                &[
                    ("part", "snippet,contentDetails,status".to_string()),
                    ("id", playlist_id.to_string()),
                ],
            )
            .await?;

        let item = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| FinderError::NotFound {
                resource: "playlist",
                id: playlist_id.to_string(),
            })?;

        Ok(Playlist {
            id: playlist_id.to_string(),
            title: item.snippet.title,
            channel_id: item.snippet.channel_id,
            channel_title: item.snippet.channel_title,
            description: item.snippet.description,
            item_count: item.content_details.item_count.unwrap_or(0),
            published_at: item.snippet.published_at,
            thumbnail_url: item.snippet.thumbnails.best_url(),
            privacy_status: item
                .status
                .privacy_status
                .unwrap_or_else(|| "public".to_string()),
            contains_video: false,
            discovered_by: None,
            url: Playlist::playlist_url(playlist_id),
        })
    }

    /// Page through a playlist's items looking for `video_id`.
    pub async fn playlist_contains_video(&self, playlist_id: &str, video_id: &str) -> Result<bool> {
        let mut page_token: Option<String> = None;

        loop {
            let mut params = vec![
                ("part", "contentDetails".to_string()),
                ("playlistId", playlist_id.to_string()),
                ("maxResults", MAX_PAGE_SIZE.to_string()),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }

            let page: PlaylistItemListResponse = self.fetch("playlistItems", &params).await?;
            let found = page
                .items
                .iter()
                .any(|item| item.content_details.video_id.as_deref() == Some(video_id));
            if found {
                return Ok(true);
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(false),
            }
        }
    }

    /// Playlist ids returned by a playlist search for `query`.
    pub async fn search_playlists(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        let mut playlist_ids = Vec::new();
        let mut page_token: Option<String> = None;

        while playlist_ids.len() < max_results {
            let mut params = vec![
                ("part", "id".to_string()),
                ("q", query.to_string()),
                ("type", "playlist".to_string()),
                (
                    "maxResults",
                    MAX_PAGE_SIZE.min(max_results - playlist_ids.len()).to_string(),
                ),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }

            let page: SearchListResponse = self.fetch("search", &params).await?;
            playlist_ids.extend(page.items.into_iter().filter_map(|item| item.id.playlist_id));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        playlist_ids.truncate(max_results);
        Ok(playlist_ids)
    }

    /// Ids of the playlists owned by a channel.
    pub async fn channel_playlists(
        &self,
        channel_id: &str,
        max_results: usize,
    ) -> Result<Vec<String>> {
        let mut playlist_ids = Vec::new();
        let mut page_token: Option<String> = None;

        while playlist_ids.len() < max_results {
            let mut params = vec![
                ("part", "id".to_string()),
                ("channelId", channel_id.to_string()),
                (
                    "maxResults",
                    MAX_PAGE_SIZE.min(max_results - playlist_ids.len()).to_string(),
                ),
            ];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }

            let page: PlaylistListResponse = self.fetch("playlists", &params).await?;
            playlist_ids.extend(page.items.into_iter().map(|item| item.id));

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        playlist_ids.truncate(max_results);
        Ok(playlist_ids)
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let value = self.request(endpoint, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Cache first, then the transport with retries.
    async fn request(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        let key = cache_key(endpoint, params);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        if self.is_quota_exhausted() {
            return Err(FinderError::QuotaExceeded);
        }

        let attempts = self.settings.max_retries.max(1);
        let mut attempt = 0;
        loop {
            self.throttle().await;
            tracing::debug!(endpoint, attempt = attempt + 1, "API request");

            match self.transport.get_json(endpoint, params).await {
                Ok(value) => {
                    self.api_calls.fetch_add(1, Ordering::Relaxed);
                    self.quota_used
                        .fetch_add(quota_cost(endpoint), Ordering::Relaxed);
                    self.cache.put(&key, value.clone()).await;
                    return Ok(value);
                }
                Err(FinderError::QuotaExceeded) => {
                    self.api_calls.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(endpoint, "quota exceeded, no further API calls this run");
                    self.quota_exhausted.store(true, Ordering::Relaxed);
                    return Err(FinderError::QuotaExceeded);
                }
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = backoff_delay(self.settings.retry_backoff, attempt);
                    tracing::debug!(endpoint, ?delay, "transient failure, retrying: {}", e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::debug!(endpoint, "request failed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn throttle(&self) {
        if self.settings.min_interval.is_zero() {
            return;
        }

        let mut last_call = self.last_call.lock().await;
        if let Some(previous) = *last_call {
            let elapsed = previous.elapsed();
            if elapsed < self.settings.min_interval {
                tokio::time::sleep(self.settings.min_interval - elapsed).await;
            }
        }
        *last_call = Some(Instant::now());
    }
}

/// Request signature used as the cache key; never contains credentials.
pub fn cache_key(endpoint: &str, params: &[(&str, String)]) -> String {
    let mut sorted: Vec<_> = params.iter().collect();
    sorted.sort();
    let query = sorted
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", endpoint, query)
}

/// Longest wait between two attempts.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// `base * 2^attempt`, capped at [`MAX_BACKOFF`].
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
        .min(MAX_BACKOFF)
}

/// Quota units charged per call.
pub fn quota_cost(endpoint: &str) -> u64 {
    match endpoint {
        "search" => 100,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    /// Replays a fixed sequence of results and records the calls.
    struct ScriptedTransport {
        replies: StdMutex<Vec<Result<Value>>>,
        calls: AtomicU64,
    }

    impl ScriptedTransport {
        fn new(mut replies: Vec<Result<Value>>) -> Self {
            replies.reverse();
            Self {
                replies: StdMutex::new(replies),
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait]
    impl ApiTransport for ScriptedTransport {
        async fn get_json(&self, _endpoint: &str, _params: &[(&str, String)]) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Ok(json!({ "items": [] })))
        }
    }

    fn api(transport: Arc<ScriptedTransport>) -> YouTubeApi {
        YouTubeApi::new(
            transport,
            Arc::new(ResponseCache::in_memory(chrono::TimeDelta::hours(1))),
            ClientSettings {
                max_retries: 3,
                retry_backoff: Duration::from_millis(10),
                min_interval: Duration::ZERO,
            },
        )
    }

    fn unavailable() -> FinderError {
        FinderError::Api {
            status: 503,
            message: "backend error".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Ok(json!({ "items": [{ "id": { "kind": "youtube#playlist", "playlistId": "PL1" } }] })),
        ]));
        let api = api(transport.clone());

        let ids = api.search_playlists("rust", 10).await.unwrap();
        assert_eq!(ids, vec!["PL1".to_string()]);
        assert_eq!(transport.calls.load(Ordering::Relaxed), 3);
        assert_eq!(api.quota_used(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_after_max_attempts() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(unavailable()),
            Err(unavailable()),
            Err(unavailable()),
            Ok(json!({ "items": [] })),
        ]));
        let api = api(transport.clone());

        let err = api.search_playlists("rust", 10).await.unwrap_err();
        assert!(matches!(err, FinderError::Api { status: 503, .. }));
        assert_eq!(transport.calls.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn quota_exceeded_short_circuits_later_calls() {
        let transport = Arc::new(ScriptedTransport::new(vec![Err(FinderError::QuotaExceeded)]));
        let api = api(transport.clone());

        assert!(matches!(
            api.search_playlists("a", 5).await,
            Err(FinderError::QuotaExceeded)
        ));
        assert!(matches!(
            api.channel_playlists("UC1", 5).await,
            Err(FinderError::QuotaExceeded)
        ));
        assert_eq!(transport.calls.load(Ordering::Relaxed), 1);

        api.begin_run();
        assert!(!api.is_quota_exhausted());
    }

    #[tokio::test]
    async fn repeated_requests_are_served_from_cache() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(json!({
            "items": [{ "contentDetails": { "videoId": "vid00000001" } }]
        }))]));
        let api = api(transport.clone());

        assert!(api.playlist_contains_video("PL1", "vid00000001").await.unwrap());
        assert!(api.playlist_contains_video("PL1", "vid00000001").await.unwrap());
        assert_eq!(transport.calls.load(Ordering::Relaxed), 1);
        assert_eq!(api.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn missing_video_is_not_found() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(json!({ "items": [] }))]));
        let api = api(transport);

        let err = api.get_video("nope0000000").await.unwrap_err();
        assert!(matches!(err, FinderError::NotFound { resource: "video", .. }));
    }

    #[test]
    fn backoff_doubles_then_caps() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(base, 40), MAX_BACKOFF);
        assert_eq!(backoff_delay(Duration::from_secs(u64::MAX), 3), MAX_BACKOFF);
    }

    #[test]
    fn cache_key_ignores_parameter_order() {
        let a = cache_key("search", &[("q", "x".into()), ("part", "id".into())]);
        let b = cache_key("search", &[("part", "id".into()), ("q", "x".into())]);
        assert_eq!(a, b);
        assert_eq!(a, "search?part=id&q=x");
    }
}
