use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::Local;
use iced::widget::{Column, Row, button, column, row, scrollable, text, text_input};
use iced::{Element, Length, Subscription, Task};
use playlist_finder_core::{
    Config, DEFAULT_CONFIG_FILE, ExportFormat, FinderStats, PlaylistFinder, SearchOptions,
    SearchOutcome, SearchProgress, SearchStrategy, default_export_path, ellipsize, export_results,
    extract_video_id,
};
use tracing_subscriber::EnvFilter;

fn main() -> iced::Result {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    iced::application(App::new, App::update, App::view)
        .title("Playlist Finder")
        .subscription(App::subscription)
        .run()
}

/// Finder handle carried through messages.
#[derive(Clone)]
struct SharedFinder(Arc<PlaylistFinder>);

impl fmt::Debug for SharedFinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedFinder")
    }
}

struct App {
    config: Config,
    api_key: String,
    video: String,
    max_playlists: String,
    strategies: Vec<SearchStrategy>,
    parallel: bool,
    /// Built on first search, rebuilt when the key changes.
    finder: Option<(String, Arc<PlaylistFinder>)>,
    progress: Arc<Mutex<Option<SearchProgress>>>,
    searching: bool,
    /// Waiting for a finder to be built; no cancel token exists yet.
    connecting: bool,
    stop_requested: bool,
    status: String,
    outcome: Option<SearchOutcome>,
    stats: Option<FinderStats>,
}

#[derive(Debug, Clone)]
enum Message {
    ConfigLoaded(Result<Config, String>),
    ApiKeyChanged(String),
    VideoChanged(String),
    MaxPlaylistsChanged(String),
    ToggleStrategy(SearchStrategy),
    ToggleParallel,
    Search,
    FinderReady {
        api_key: String,
        video_id: String,
        result: Result<SharedFinder, String>,
    },
    SearchFinished(Result<SearchOutcome, String>),
    Stop,
    Tick,
    Export(ExportFormat),
    Exported(Result<PathBuf, String>),
}

impl App {
    fn new() -> (Self, Task<Message>) {
        let config = Config::default();
        let app = Self {
            api_key: String::new(),
            video: String::new(),
            max_playlists: config.max_playlists.to_string(),
            strategies: config.search_strategies.clone(),
            parallel: config.parallel_search,
            config,
            finder: None,
            progress: Arc::default(),
            searching: false,
            connecting: false,
            stop_requested: false,
            status: "Enter a video ID or URL".to_string(),
            outcome: None,
            stats: None,
        };
        let load = Task::perform(
            async { Config::load(Path::new(DEFAULT_CONFIG_FILE)).await.map_err(|e| e.to_string()) },
            Message::ConfigLoaded,
        );
        (app, load)
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            Message::ConfigLoaded(Ok(config)) => {
                self.api_key = config.api_key.clone();
                self.max_playlists = config.max_playlists.to_string();
                self.strategies = config.search_strategies.clone();
                self.parallel = config.parallel_search;
                self.config = config;
            }
            Message::ConfigLoaded(Err(e)) => self.status = format!("Config not loaded: {}", e),
            Message::ApiKeyChanged(key) => self.api_key = key,
            Message::VideoChanged(video) => self.video = video,
            Message::MaxPlaylistsChanged(value) => {
                if value.chars().all(|c| c.is_ascii_digit()) {
                    self.max_playlists = value;
                }
            }
            Message::ToggleStrategy(strategy) => {
                if let Some(pos) = self.strategies.iter().position(|s| *s == strategy) {
                    self.strategies.remove(pos);
                } else {
                    self.strategies.push(strategy);
                }
            }
            Message::ToggleParallel => self.parallel = !self.parallel,
            Message::Search => return self.search(),
            Message::FinderReady {
                api_key,
                video_id,
                result,
            } => {
                self.connecting = false;
                match result {
                    Ok(SharedFinder(finder)) => {
                        self.finder = Some((api_key, finder.clone()));
                        if self.stop_requested {
                            self.searching = false;
                            self.status = "Search stopped".to_string();
                        } else {
                            return self.start_search(finder, video_id);
                        }
                    }
                    Err(e) => {
                        self.searching = false;
                        self.status = format!("Error: {}", e);
                    }
                }
            }
            Message::SearchFinished(result) => {
                self.searching = false;
                match result {
                    Ok(outcome) => {
                        self.status = format!(
                            "Found {} playlists ({})",
                            outcome.playlists.len(),
                            outcome.status.describe()
                        );
                        self.outcome = Some(outcome);
                    }
                    Err(e) => self.status = format!("Error: {}", e),
                }
                self.stats = self.finder.as_ref().map(|(_, finder)| finder.stats());
            }
            Message::Stop => {
                if !self.searching {
                    return Task::none();
                }
                self.stop_requested = true;
                self.status = "Stopping...".to_string();
                if !self.connecting {
                    if let Some((_, finder)) = &self.finder {
                        finder.cancel_token().cancel();
                    }
                }
            }
            Message::Tick => {
                let latest = self.progress.lock().unwrap_or_else(|e| e.into_inner()).take();
                if let Some(progress) = latest {
                    self.status = format!("{}% {}", progress.percent, progress.message);
                }
            }
            Message::Export(format) => {
                let Some(outcome) = &self.outcome else {
                    return Task::none();
                };
                let video = outcome.video.clone();
                let playlists = outcome.playlists.clone();
                let path = default_export_path(
                    &self.config.output_path(),
                    &video.id,
                    format,
                    Local::now(),
                );
                return Task::perform(
                    async move {
                        export_results(&video, &playlists, format, &path)
                            .await
                            .map_err(|e| e.to_string())
                    },
                    Message::Exported,
                );
            }
            Message::Exported(Ok(path)) => self.status = format!("Saved {}", path.display()),
            Message::Exported(Err(e)) => self.status = format!("Export failed: {}", e),
        }
        Task::none()
    }

    fn search(&mut self) -> Task<Message> {
        if self.searching {
            return Task::none();
        }
        let video_id = match extract_video_id(&self.video) {
            Ok(id) => id,
            Err(e) => {
                self.status = e.to_string();
                return Task::none();
            }
        };
        let api_key = match self.config.resolve_api_key(Some(&self.api_key)) {
            Ok(key) => key,
            Err(e) => {
                self.status = e.to_string();
                return Task::none();
            }
        };

        self.searching = true;
        self.stop_requested = false;
        self.outcome = None;

        if let Some((key, finder)) = &self.finder {
            if *key == api_key {
                let finder = finder.clone();
                return self.start_search(finder, video_id);
            }
        }

        self.connecting = true;
        self.status = "Connecting...".to_string();
        let config = self.config.clone();
        let slot = self.progress.clone();
        Task::perform(
            async move {
                let result = config
                    .build_finder(&api_key)
                    .await
                    .map(|finder| {
                        SharedFinder(Arc::new(finder.with_progress(Arc::new(
                            move |progress| {
                                *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(progress);
                            },
                        ))))
                    })
                    .map_err(|e| e.to_string());
                (api_key, video_id, result)
            },
            |(api_key, video_id, result)| Message::FinderReady {
                api_key,
                video_id,
                result,
            },
        )
    }

    fn start_search(&mut self, finder: Arc<PlaylistFinder>, video_id: String) -> Task<Message> {
        self.status = "Searching...".to_string();
        let options = self.search_options();
        Task::perform(
            async move {
                finder
                    .find_playlists(&video_id, &options)
                    .await
                    .map_err(|e| e.to_string())
            },
            Message::SearchFinished,
        )
    }

    fn search_options(&self) -> SearchOptions {
        let mut options = self.config.search_options();
        options.strategies = self.strategies.clone();
        options.parallel = self.parallel;
        if let Ok(max) = self.max_playlists.parse() {
            options.max_playlists = max;
        }
        options
    }

    fn subscription(&self) -> Subscription<Message> {
        if self.searching {
            iced::time::every(Duration::from_millis(200)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        }
    }

    fn view(&self) -> Element<'_, Message> {
        let strategies = Row::with_children(SearchStrategy::ALL.iter().map(|&strategy| {
            let mark = if self.strategies.contains(&strategy) {
                "[x]"
            } else {
                "[ ]"
            };
            button(text(format!("{} {}", mark, strategy.label())))
                .on_press(Message::ToggleStrategy(strategy))
                .into()
        }))
        .spacing(5);

        let parallel = if self.parallel { "[x]" } else { "[ ]" };
        let controls = row![
            button(text(format!("{} Parallel", parallel))).on_press(Message::ToggleParallel),
            button("Search").on_press_maybe((!self.searching).then_some(Message::Search)),
            button("Stop").on_press_maybe(self.searching.then_some(Message::Stop)),
        ]
        .spacing(10);

        let results = Column::with_children(
            self.outcome
                .iter()
                .flat_map(|outcome| outcome.playlists.iter().enumerate())
                .map(|(i, playlist)| {
                    column![
                        text(format!("{}. {}", i + 1, ellipsize(&playlist.title, 60))),
                        text(format!(
                            "{} | {} videos | {}",
                            playlist.channel_title, playlist.item_count, playlist.url
                        ))
                        .size(12),
                    ]
                    .into()
                }),
        )
        .spacing(8);

        let exportable = !self.searching && self.outcome.is_some();
        let exports = Row::with_children(ExportFormat::ALL.iter().map(|&format| {
            button(text(format!("Export {}", format.extension().to_uppercase())))
                .on_press_maybe(exportable.then_some(Message::Export(format)))
                .into()
        }))
        .spacing(10);

        let stats = match &self.stats {
            Some(stats) => format!(
                "Quota used: {} | API calls: {} | Checked: {} | Found: {} | Cache hit rate: {:.1}%",
                stats.quota_used,
                stats.api_calls,
                stats.playlists_checked,
                stats.playlists_found,
                stats.cache.hit_rate
            ),
            None => String::new(),
        };

        column![
            text("Playlist Finder").size(24),
            text_input("YouTube API key", &self.api_key)
                .secure(true)
                .on_input(Message::ApiKeyChanged),
            text_input("Video ID or URL", &self.video)
                .on_input(Message::VideoChanged)
                .on_submit(Message::Search),
            row![
                text("Max playlists"),
                text_input("100", &self.max_playlists)
                    .on_input(Message::MaxPlaylistsChanged)
                    .width(80),
            ]
            .spacing(10),
            strategies,
            controls,
            text(&self.status),
            scrollable(results).height(Length::Fill),
            exports,
            text(stats).size(12),
        ]
        .padding(20)
        .spacing(10)
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playlist_finder_core::{ClientSettings, HttpTransport, ResponseCache, YouTubeApi};

    fn offline_finder() -> SharedFinder {
        let transport = HttpTransport::new("key", Duration::from_secs(1)).unwrap();
        let api = YouTubeApi::new(
            Arc::new(transport),
            Arc::new(ResponseCache::disabled()),
            ClientSettings::default(),
        );
        SharedFinder(Arc::new(PlaylistFinder::new(api)))
    }

    #[test]
    fn stop_while_connecting_skips_the_search() {
        let (mut app, _) = App::new();
        app.api_key = "key".to_string();
        app.video = "dQw4w9WgXcQ".to_string();

        let _ = app.update(Message::Search);
        assert!(app.searching && app.connecting);

        let _ = app.update(Message::Stop);
        let _ = app.update(Message::FinderReady {
            api_key: "key".to_string(),
            video_id: "dQw4w9WgXcQ".to_string(),
            result: Ok(offline_finder()),
        });

        assert!(!app.searching);
        assert_eq!(app.status, "Search stopped");
        let (_, finder) = app.finder.as_ref().unwrap();
        assert!(!finder.cancel_token().is_cancelled());
    }

    #[test]
    fn new_search_clears_an_earlier_stop() {
        let (mut app, _) = App::new();
        app.api_key = "key".to_string();
        app.video = "dQw4w9WgXcQ".to_string();

        let _ = app.update(Message::Search);
        let _ = app.update(Message::Stop);
        let _ = app.update(Message::FinderReady {
            api_key: "key".to_string(),
            video_id: "dQw4w9WgXcQ".to_string(),
            result: Err("offline".to_string()),
        });
        assert!(!app.searching);

        let _ = app.update(Message::Search);
        assert!(app.searching);
        assert!(!app.stop_requested);
    }
}
