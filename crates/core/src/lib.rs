pub mod cache;
pub mod config;
pub mod error;
pub mod export;
pub mod finder;
pub mod format;
pub mod strategy;
pub mod types;
pub mod video_id;
pub mod youtube_api;

pub use cache::{CacheStats, ResponseCache, get_root_cache_dir};
pub use config::{API_KEY_ENV_VAR, Config, DEFAULT_CONFIG_FILE};
pub use error::{FinderError, Result};
pub use export::{ExportFormat, default_export_path, export_batch, export_results};
pub use finder::{CancelToken, PlaylistFinder, ProgressFn, SearchOptions};
pub use format::{ellipsize, format_outcome_summary, format_results_readable, format_stats};
pub use strategy::{CandidateSource, SearchStrategy};
pub use types::{
    FinderStats, Playlist, SearchOutcome, SearchProgress, SearchStatus, StrategyReport, Video,
};
pub use video_id::extract_video_id;
pub use youtube_api::{ApiTransport, ClientSettings, HttpTransport, YouTubeApi};
