use std::{fmt, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::{FinderError, Result},
    types::Video,
    youtube_api::YouTubeApi,
};

/// Heuristic used to produce candidate playlists.
///
/// Declaration order is the fixed priority order results are merged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    ExactTitle,
    ChannelPlaylists,
    TitleChannel,
    #[serde(alias = "keyword")]
    KeywordSearch,
    #[serde(rename = "popular", alias = "popular_playlists")]
    Popular,
}

impl SearchStrategy {
    pub const ALL: [SearchStrategy; 5] = [
        SearchStrategy::ExactTitle,
        SearchStrategy::ChannelPlaylists,
        SearchStrategy::TitleChannel,
        SearchStrategy::KeywordSearch,
        SearchStrategy::Popular,
    ];

    /// Used when a caller selects nothing.
    pub const DEFAULT: [SearchStrategy; 4] = [
        SearchStrategy::ExactTitle,
        SearchStrategy::ChannelPlaylists,
        SearchStrategy::TitleChannel,
        SearchStrategy::KeywordSearch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::ExactTitle => "exact_title",
            SearchStrategy::ChannelPlaylists => "channel_playlists",
            SearchStrategy::TitleChannel => "title_channel",
            SearchStrategy::KeywordSearch => "keyword_search",
            SearchStrategy::Popular => "popular",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SearchStrategy::ExactTitle => "Exact Title Search",
            SearchStrategy::ChannelPlaylists => "Channel Playlists",
            SearchStrategy::TitleChannel => "Title + Channel",
            SearchStrategy::KeywordSearch => "Keyword Search",
            SearchStrategy::Popular => "Popular Playlists",
        }
    }

    pub fn priority(&self) -> usize {
        *self as usize
    }

    /// The implementation registered for this variant.
    pub fn source(&self) -> &'static dyn CandidateSource {
        SOURCES[self.priority()]
    }

    /// Deduplicate a selection and put it in priority order.
    pub fn normalize(selection: &[SearchStrategy]) -> Vec<SearchStrategy> {
        if selection.is_empty() {
            return Self::DEFAULT.to_vec();
        }
        let mut strategies = selection.to_vec();
        strategies.sort();
        strategies.dedup();
        strategies
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchStrategy {
    type Err = FinderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "exact_title" => Ok(SearchStrategy::ExactTitle),
            "channel_playlists" => Ok(SearchStrategy::ChannelPlaylists),
            "title_channel" => Ok(SearchStrategy::TitleChannel),
            "keyword_search" | "keyword" => Ok(SearchStrategy::KeywordSearch),
            "popular" | "popular_playlists" => Ok(SearchStrategy::Popular),
            other => Err(FinderError::Config {
                reason: format!("unknown search strategy '{}'", other),
            }),
        }
    }
}

/// Produces candidate playlist ids for a video.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    async fn candidates(&self, api: &YouTubeApi, video: &Video, limit: usize)
    -> Result<Vec<String>>;
}

/// Indexed by [`SearchStrategy::priority`].
static SOURCES: [&dyn CandidateSource; 5] = [
    &ExactTitleSearch,
    &ChannelPlaylistsSearch,
    &TitleChannelSearch,
    &KeywordSearch,
    &PopularSearch,
];

pub struct ExactTitleSearch;

#[async_trait]
impl CandidateSource for ExactTitleSearch {
    async fn candidates(
        &self,
        api: &YouTubeApi,
        video: &Video,
        limit: usize,
    ) -> Result<Vec<String>> {
        api.search_playlists(&video.title, limit).await
    }
}

pub struct ChannelPlaylistsSearch;

#[async_trait]
impl CandidateSource for ChannelPlaylistsSearch {
    async fn candidates(
        &self,
        api: &YouTubeApi,
        video: &Video,
        limit: usize,
    ) -> Result<Vec<String>> {
        tracing::debug!(channel_id = %video.channel_id, "fetching channel playlists");
        api.channel_playlists(&video.channel_id, limit).await
    }
}

pub struct TitleChannelSearch;

#[async_trait]
impl CandidateSource for TitleChannelSearch {
    async fn candidates(
        &self,
        api: &YouTubeApi,
        video: &Video,
        limit: usize,
    ) -> Result<Vec<String>> {
        let query = format!("{} {}", video.title, video.channel_title);
        api.search_playlists(&query, limit).await
    }
}

pub struct KeywordSearch;

#[async_trait]
impl CandidateSource for KeywordSearch {
    async fn candidates(
        &self,
        api: &YouTubeApi,
        video: &Video,
        limit: usize,
    ) -> Result<Vec<String>> {
        let Some(query) = keyword_query(video) else {
            tracing::debug!(video_id = %video.id, "video has no tags, skipping keyword search");
            return Ok(Vec::new());
        };
        api.search_playlists(&query, limit).await
    }
}

pub struct PopularSearch;

pub const POPULAR_QUERY_PREFIXES: [&str; 4] = ["best of", "compilation", "mix", "playlist"];

#[async_trait]
impl CandidateSource for PopularSearch {
    async fn candidates(
        &self,
        api: &YouTubeApi,
        video: &Video,
        limit: usize,
    ) -> Result<Vec<String>> {
        let per_query = (limit / POPULAR_QUERY_PREFIXES.len()).max(1);
        let mut playlist_ids = Vec::new();
        for prefix in POPULAR_QUERY_PREFIXES {
            let query = format!("{} {}", prefix, video.channel_title);
            playlist_ids.extend(api.search_playlists(&query, per_query).await?);
        }
        playlist_ids.truncate(limit);
        Ok(playlist_ids)
    }
}

/// First three tags joined by spaces.
pub fn keyword_query(video: &Video) -> Option<String> {
    let keywords: Vec<&str> = video
        .tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .take(3)
        .collect();
    (!keywords.is_empty()).then(|| keywords.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_orders_by_priority_and_dedups() {
        let selection = [
            SearchStrategy::Popular,
            SearchStrategy::ExactTitle,
            SearchStrategy::Popular,
            SearchStrategy::TitleChannel,
        ];
        assert_eq!(
            SearchStrategy::normalize(&selection),
            vec![
                SearchStrategy::ExactTitle,
                SearchStrategy::TitleChannel,
                SearchStrategy::Popular
            ]
        );
        assert_eq!(
            SearchStrategy::normalize(&[]),
            SearchStrategy::DEFAULT.to_vec()
        );
    }

    #[test]
    fn parses_names_and_aliases() {
        assert_eq!(
            "keyword".parse::<SearchStrategy>().unwrap(),
            SearchStrategy::KeywordSearch
        );
        assert_eq!(
            "popular_playlists".parse::<SearchStrategy>().unwrap(),
            SearchStrategy::Popular
        );
        assert!("related_videos".parse::<SearchStrategy>().is_err());
        for strategy in SearchStrategy::ALL {
            assert_eq!(strategy.as_str().parse::<SearchStrategy>().unwrap(), strategy);
        }
    }

    #[test]
    fn serde_uses_config_names() {
        let parsed: Vec<SearchStrategy> =
            serde_json::from_str(r#"["exact_title", "keyword", "popular"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                SearchStrategy::ExactTitle,
                SearchStrategy::KeywordSearch,
                SearchStrategy::Popular
            ]
        );
    }

    /// Answers every search with one playlist id derived from the query.
    struct EchoSearch;

    #[async_trait]
    impl crate::youtube_api::ApiTransport for EchoSearch {
        async fn get_json(
            &self,
            _endpoint: &str,
            params: &[(&str, String)],
        ) -> Result<serde_json::Value> {
            let query = params
                .iter()
                .find(|(name, _)| *name == "q")
                .map(|(_, value)| value.clone())
                .unwrap_or_default();
            Ok(serde_json::json!({
                "items": [{ "id": { "kind": "youtube#playlist", "playlistId": query } }]
            }))
        }
    }

    #[tokio::test]
    async fn popular_search_respects_small_limits() {
        let api = YouTubeApi::new(
            std::sync::Arc::new(EchoSearch),
            std::sync::Arc::new(crate::cache::ResponseCache::in_memory(
                chrono::TimeDelta::hours(1),
            )),
            crate::youtube_api::ClientSettings {
                min_interval: std::time::Duration::ZERO,
                ..Default::default()
            },
        );
        let video = video(vec![]);

        let ids = PopularSearch.candidates(&api, &video, 2).await.unwrap();
        assert_eq!(ids, vec!["best of ch".to_string(), "compilation ch".to_string()]);

        let ids = PopularSearch.candidates(&api, &video, 50).await.unwrap();
        assert_eq!(ids.len(), POPULAR_QUERY_PREFIXES.len());
    }

    fn video(tags: Vec<String>) -> Video {
        Video {
            id: "abcdefghijk".into(),
            title: "t".into(),
            channel_id: "c".into(),
            channel_title: "ch".into(),
            description: String::new(),
            duration: String::new(),
            view_count: 0,
            like_count: 0,
            published_at: String::new(),
            thumbnail_url: String::new(),
            tags,
        }
    }

    #[test]
    fn keyword_query_uses_first_three_tags() {
        let mut video = Video {
            id: "abcdefghijk".into(),
            title: "t".into(),
            channel_id: "c".into(),
            channel_title: "ch".into(),
            description: String::new(),
            duration: String::new(),
            view_count: 0,
            like_count: 0,
            published_at: String::new(),
            thumbnail_url: String::new(),
            tags: vec!["rust".into(), " ".into(), "async".into(), "tokio".into(), "x".into()],
        };
        assert_eq!(keyword_query(&video).as_deref(), Some("rust async tokio"));

        video.tags.clear();
        assert_eq!(keyword_query(&video), None);
    }
}
