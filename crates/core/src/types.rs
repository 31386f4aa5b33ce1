use serde::{Deserialize, Serialize};

use crate::{cache::CacheStats, strategy::SearchStrategy};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub published_at: String,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Video {
    pub fn url(&self) -> String {
        format!("https://www.youtube.com/watch?v={}", self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub channel_id: String,
    pub channel_title: String,
    #[serde(default)]
    pub description: String,
    pub item_count: u64,
    #[serde(default)]
    pub published_at: String,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default = "default_privacy_status")]
    pub privacy_status: String,
    /// Set once the playlist's items were listed and the target video was among them.
    #[serde(default)]
    pub contains_video: bool,
    /// First strategy that reported this playlist as a candidate.
    #[serde(default)]
    pub discovered_by: Option<SearchStrategy>,
    pub url: String,
}

fn default_privacy_status() -> String {
    "public".to_string()
}

impl Playlist {
    pub fn playlist_url(id: &str) -> String {
        format!("https://www.youtube.com/playlist?list={}", id)
    }

    pub fn mark_confirmed(&mut self, strategy: SearchStrategy) {
        self.contains_video = true;
        self.discovered_by = Some(strategy);
    }
}

/// How a search run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum SearchStatus {
    Complete,
    QuotaExceeded,
    Cancelled,
    TimedOut,
    Failed(String),
}

impl SearchStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, SearchStatus::Complete)
    }

    pub fn describe(&self) -> String {
        match self {
            SearchStatus::Complete => "search complete".to_string(),
            SearchStatus::QuotaExceeded => {
                "YouTube API quota exceeded, results may be partial".to_string()
            }
            SearchStatus::Cancelled => "search cancelled, results are partial".to_string(),
            SearchStatus::TimedOut => "search timed out, results are partial".to_string(),
            SearchStatus::Failed(reason) => format!("all strategies failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyReport {
    pub strategy: SearchStrategy,
    pub candidates: usize,
    pub error: Option<String>,
}

impl StrategyReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub video: Video,
    pub playlists: Vec<Playlist>,
    pub status: SearchStatus,
    pub strategies: Vec<StrategyReport>,
    pub candidates_checked: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinderStats {
    pub quota_used: u64,
    pub api_calls: u64,
    pub playlists_checked: usize,
    pub playlists_found: usize,
    pub cache: CacheStats,
}

/// Progress update emitted while a search runs.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchProgress {
    pub message: String,
    pub percent: u8,
}
