use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::{
    cache::{ResponseCache, get_root_cache_dir, hours},
    error::{FinderError, Result},
    export::ExportFormat,
    finder::{PlaylistFinder, SearchOptions},
    strategy::SearchStrategy,
    youtube_api::{ClientSettings, HttpTransport, YouTubeApi},
};

pub const API_KEY_ENV_VAR: &str = "YOUTUBE_API_KEY";
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Slowest accepted request rate; zero turns throttling off.
pub const MIN_REQUESTS_PER_SECOND: f64 = 0.001;

/// User configuration, read from YAML or JSON. Missing keys take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_key: String,
    pub max_playlists: usize,
    pub parallel_search: bool,
    pub search_strategies: Vec<SearchStrategy>,
    pub cache_enabled: bool,
    /// Relative paths resolve against the working directory; empty means the platform cache dir.
    pub cache_dir: String,
    pub cache_expire_hours: u64,
    pub output_dir: String,
    pub export_formats: Vec<ExportFormat>,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub requests_per_second: f64,
    pub max_workers: usize,
    pub candidate_limit: usize,
    pub strategy_timeout_secs: u64,
    /// Zero disables the overall deadline.
    pub search_timeout_secs: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            max_playlists: 100,
            parallel_search: true,
            search_strategies: SearchStrategy::DEFAULT.to_vec(),
            cache_enabled: true,
            cache_dir: ".cache".to_string(),
            cache_expire_hours: 24,
            output_dir: "results".to_string(),
            export_formats: vec![ExportFormat::Json, ExportFormat::Html],
            request_timeout_secs: 10,
            max_retries: 3,
            requests_per_second: 2.0,
            max_workers: 10,
            candidate_limit: 50,
            strategy_timeout_secs: 60,
            search_timeout_secs: 0,
            log_level: "warn".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Yaml,
    Json,
}

fn config_format(path: &Path) -> Result<ConfigFormat> {
    let ext = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "yaml" | "yml" => Ok(ConfigFormat::Yaml),
        "json" => Ok(ConfigFormat::Json),
        other => Err(FinderError::Config {
            reason: format!("unsupported config format '.{}'", other),
        }),
    }
}

impl Config {
    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        let config: Config = match config_format(path)? {
            // An empty YAML document is a valid, all-defaults config.
            ConfigFormat::Yaml if contents.trim().is_empty() => Config::default(),
            ConfigFormat::Yaml => serde_yaml::from_str(contents)?,
            ConfigFormat::Json => serde_json::from_str(contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn render(&self, path: &Path) -> Result<String> {
        Ok(match config_format(path)? {
            ConfigFormat::Yaml => serde_yaml::to_string(self)?,
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
        })
    }

    /// Load `path`; a missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path).await {
            Ok(contents) => Self::parse(&contents, path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let contents = self.render(path)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, contents).await?;
        Ok(())
    }

    /// Write the defaults to `path` unless a file is already there.
    pub async fn init(path: &Path) -> Result<bool> {
        if fs::try_exists(path).await? {
            return Ok(false);
        }
        Self::default().save(path).await?;
        Ok(true)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.requests_per_second >= 0.0) {
            return Err(FinderError::Config {
                reason: "requests_per_second must not be negative".to_string(),
            });
        }
        if self.requests_per_second > 0.0 && self.requests_per_second < MIN_REQUESTS_PER_SECOND {
            return Err(FinderError::Config {
                reason: format!(
                    "requests_per_second must be 0 or at least {}",
                    MIN_REQUESTS_PER_SECOND
                ),
            });
        }
        Ok(())
    }

    /// `--api-key` first, then the config file, then `YOUTUBE_API_KEY`.
    pub fn resolve_api_key(&self, cli_key: Option<&str>) -> Result<String> {
        resolve_api_key_from(
            cli_key,
            &self.api_key,
            std::env::var(API_KEY_ENV_VAR).ok().as_deref(),
        )
    }

    pub fn cache_path(&self) -> PathBuf {
        if self.cache_dir.trim().is_empty() {
            get_root_cache_dir()
        } else {
            PathBuf::from(&self.cache_dir)
        }
    }

    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(&self.output_dir)
    }

    pub fn client_settings(&self) -> ClientSettings {
        let min_interval = if self.requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / self.requests_per_second)
        } else {
            Duration::ZERO
        };
        ClientSettings {
            max_retries: self.max_retries,
            min_interval,
            ..ClientSettings::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            strategies: self.search_strategies.clone(),
            max_playlists: self.max_playlists,
            parallel: self.parallel_search,
            candidate_limit: self.candidate_limit,
            max_workers: self.max_workers,
            strategy_timeout: (self.strategy_timeout_secs > 0)
                .then(|| Duration::from_secs(self.strategy_timeout_secs)),
            search_timeout: (self.search_timeout_secs > 0)
                .then(|| Duration::from_secs(self.search_timeout_secs)),
        }
    }
}

impl Config {
    /// Cache according to `cache_enabled`; a directory that cannot be created
    /// downgrades to an in-memory cache for this run.
    pub async fn open_cache(&self) -> ResponseCache {
        if !self.cache_enabled {
            return ResponseCache::disabled();
        }
        let dir = self.cache_path();
        match ResponseCache::new(&dir, self.cache_expire_hours).await {
            Ok(cache) => cache,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), "cache directory unavailable: {}", e);
                ResponseCache::in_memory(hours(self.cache_expire_hours))
            }
        }
    }

    /// Wire transport, cache and client into a ready finder.
    pub async fn build_finder(&self, api_key: &str) -> Result<PlaylistFinder> {
        let transport = HttpTransport::new(api_key, self.request_timeout())?;
        let cache = self.open_cache().await;
        let api = YouTubeApi::new(Arc::new(transport), Arc::new(cache), self.client_settings());
        Ok(PlaylistFinder::new(api))
    }
}

fn resolve_api_key_from(
    cli_key: Option<&str>,
    config_key: &str,
    env_key: Option<&str>,
) -> Result<String> {
    [cli_key, Some(config_key), env_key]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|key| !key.is_empty())
        .map(str::to_string)
        .ok_or_else(|| FinderError::MissingApiKey {
            env_var: API_KEY_ENV_VAR.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_fills_missing_keys_with_defaults() {
        let config = Config::parse(
            "api_key: abc\nmax_playlists: 5\nsearch_strategies: [exact_title, popular]\n",
            Path::new("config.yaml"),
        )
        .unwrap();

        assert_eq!(config.api_key, "abc");
        assert_eq!(config.max_playlists, 5);
        assert_eq!(
            config.search_strategies,
            vec![SearchStrategy::ExactTitle, SearchStrategy::Popular]
        );
        assert!(config.parallel_search);
        assert_eq!(config.cache_expire_hours, 24);
        assert_eq!(
            config.export_formats,
            vec![ExportFormat::Json, ExportFormat::Html]
        );
    }

    #[test]
    fn json_is_accepted() {
        let config = Config::parse(
            r#"{"parallel_search": false, "export_formats": ["csv"], "cache_enabled": false}"#,
            Path::new("settings.json"),
        )
        .unwrap();
        assert!(!config.parallel_search);
        assert!(!config.cache_enabled);
        assert_eq!(config.export_formats, vec![ExportFormat::Csv]);
        assert_eq!(config.output_dir, "results");
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(
            Config::parse("", Path::new("c.yml")).unwrap(),
            Config::default()
        );
    }

    #[test]
    fn unknown_extension_and_bad_values_are_rejected() {
        assert!(matches!(
            Config::parse("x = 1", Path::new("c.toml")),
            Err(FinderError::Config { .. })
        ));
        assert!(matches!(
            Config::parse("requests_per_second: -1.0", Path::new("c.yaml")),
            Err(FinderError::Config { .. })
        ));
        assert!(matches!(
            Config::parse("requests_per_second: 1.0e-300", Path::new("c.yaml")),
            Err(FinderError::Config { .. })
        ));
        let unthrottled = Config::parse("requests_per_second: 0", Path::new("c.yaml")).unwrap();
        assert_eq!(unthrottled.client_settings().min_interval, Duration::ZERO);
        assert!(matches!(
            Config::parse("search_strategies: [related_videos]", Path::new("c.yaml")),
            Err(FinderError::YamlError(_))
        ));
    }

    #[test]
    fn api_key_precedence() {
        assert_eq!(
            resolve_api_key_from(Some("cli"), "cfg", Some("env")).unwrap(),
            "cli"
        );
        assert_eq!(resolve_api_key_from(None, "cfg", Some("env")).unwrap(), "cfg");
        assert_eq!(resolve_api_key_from(Some(" "), "", Some("env")).unwrap(), "env");
        assert!(matches!(
            resolve_api_key_from(None, "", None),
            Err(FinderError::MissingApiKey { .. })
        ));
    }

    #[tokio::test]
    async fn init_writes_defaults_once_and_load_reads_them() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        assert!(Config::init(&path).await.unwrap());
        assert!(!Config::init(&path).await.unwrap());
        assert_eq!(Config::load(&path).await.unwrap(), Config::default());

        let missing = dir.path().join("missing.json");
        assert_eq!(Config::load(&missing).await.unwrap(), Config::default());
    }

    #[test]
    fn search_options_follow_config() {
        let config = Config {
            parallel_search: false,
            search_timeout_secs: 30,
            strategy_timeout_secs: 0,
            ..Config::default()
        };
        let options = config.search_options();
        assert!(!options.parallel);
        assert_eq!(options.search_timeout, Some(Duration::from_secs(30)));
        assert_eq!(options.strategy_timeout, None);
        assert_eq!(
            config.client_settings().min_interval,
            Duration::from_millis(500)
        );
    }
}
