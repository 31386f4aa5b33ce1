use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use chrono::Local;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use playlist_finder_core::{
    CancelToken, Config, ExportFormat, FinderError, Playlist, PlaylistFinder, SearchOutcome,
    SearchProgress, SearchStatus, default_export_path, ellipsize, export_batch, export_results,
    extract_video_id, format_outcome_summary, format_results_readable, format_stats,
};
use tokio::fs;

/// Where search results go once printed.
pub enum ExportTarget {
    None,
    File { path: PathBuf, format: ExportFormat },
    /// One timestamped file per format under `output_dir`.
    Configured(Vec<ExportFormat>),
}

type ProgressSlot = Arc<Mutex<Option<ProgressBar>>>;

/// A connected finder plus the terminal plumbing around it.
pub struct Session {
    config: Config,
    finder: PlaylistFinder,
    progress: ProgressSlot,
    searching: Arc<AtomicBool>,
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        format!("{:.0}m {:.0}s", (secs / 60.0).floor(), secs % 60.0)
    }
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ")
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Ctrl-C cancels a running search; outside a search it exits.
fn spawn_interrupt_handler(token: CancelToken, searching: Arc<AtomicBool>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if searching.load(Ordering::SeqCst) {
                token.cancel();
            } else {
                std::process::exit(130);
            }
        }
    });
}

impl Session {
    pub async fn connect(config: Config, api_key: &str) -> Result<Self> {
        let progress: ProgressSlot = Arc::default();
        let slot = progress.clone();
        let finder = config
            .build_finder(api_key)
            .await?
            .with_progress(Arc::new(move |update: SearchProgress| {
                let slot = slot.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(pb) = slot.as_ref() {
                    pb.set_position(update.percent.into());
                    pb.set_message(update.message);
                }
            }));

        let searching = Arc::new(AtomicBool::new(false));
        spawn_interrupt_handler(finder.cancel_token(), searching.clone());

        Ok(Self {
            config,
            finder,
            progress,
            searching,
        })
    }

    /// Run `search` with a live progress bar and Ctrl-C wired to cancellation.
    async fn tracked<T>(&self, search: impl Future<Output = T>) -> T {
        let pb = create_progress_bar();
        *self.progress.lock().unwrap_or_else(|e| e.into_inner()) = Some(pb.clone());
        self.searching.store(true, Ordering::SeqCst);

        let result = search.await;

        self.searching.store(false, Ordering::SeqCst);
        self.progress
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        pb.finish_and_clear();
        result
    }

    pub async fn search_video(&self, input: &str, target: &ExportTarget) -> Result<()> {
        let video_id = extract_video_id(input)?;
        let options = self.config.search_options();

        let started = Instant::now();
        let outcome = self
            .tracked(self.finder.find_playlists(&video_id, &options))
            .await?;

        println!("{}", style("─".repeat(60)).dim());
        println!("{}", format_results_readable(&outcome.video, &outcome.playlists));
        println!("{}", style(format_outcome_summary(&outcome)).dim());
        print_status(&outcome.status);
        println!(
            "{} {}\n",
            style("Search time:").dim(),
            style(format_duration(started.elapsed())).cyan().bold()
        );

        self.export(&outcome, target).await;
        Ok(())
    }

    pub async fn search_batch(&self, path: &Path, target: &ExportTarget) -> Result<()> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read batch file {}", path.display()))?;

        let mut video_ids = Vec::new();
        for line in contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
        {
            match extract_video_id(line) {
                Ok(id) => video_ids.push(id),
                Err(e) => eprintln!("{} {}", style("Skipping:").yellow(), e),
            }
        }

        println!(
            "{} Processing {} videos",
            style("✓").green().bold(),
            video_ids.len()
        );

        let options = self.config.search_options();
        let started = Instant::now();
        let results = self
            .tracked(self.finder.find_batch(&video_ids, &options))
            .await;

        let mut found: BTreeMap<String, Vec<Playlist>> = BTreeMap::new();
        for (video_id, result) in results {
            match result {
                Ok(outcome) => {
                    println!(
                        "{} {} {}",
                        style("✓").green().bold(),
                        ellipsize(&outcome.video.title, 40),
                        style(format!("({} playlists)", outcome.playlists.len())).dim()
                    );
                    if !outcome.status.is_complete() {
                        print_status(&outcome.status);
                    }
                    found.insert(video_id, outcome.playlists);
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => eprintln!("{} {}: {}", style("✗").red().bold(), video_id, e),
            }
        }

        println!(
            "\n{} {}\n",
            style("Batch time:").dim(),
            style(format_duration(started.elapsed())).cyan().bold()
        );

        let destination = match target {
            ExportTarget::None => return Ok(()),
            ExportTarget::File { path, .. } => path.clone(),
            ExportTarget::Configured(_) => self.config.output_path().join(format!(
                "batch_results_{}.json",
                Local::now().format("%Y%m%d_%H%M%S")
            )),
        };
        match export_batch(&found, &destination).await {
            Ok(()) => println!(
                "{} Batch results saved: {}",
                style("✓").green().bold(),
                style(destination.display()).cyan()
            ),
            Err(e) => eprintln!("{} {}", style("Export failed:").red().bold(), e),
        }
        Ok(())
    }

    /// Export failures are reported; the printed results stand.
    async fn export(&self, outcome: &SearchOutcome, target: &ExportTarget) {
        let jobs: Vec<(ExportFormat, PathBuf)> = match target {
            ExportTarget::None => return,
            ExportTarget::File { path, format } => vec![(*format, path.clone())],
            ExportTarget::Configured(formats) => {
                let now = Local::now();
                formats
                    .iter()
                    .map(|&format| {
                        let path = default_export_path(
                            &self.config.output_path(),
                            &outcome.video.id,
                            format,
                            now,
                        );
                        (format, path)
                    })
                    .collect()
            }
        };

        for (format, path) in jobs {
            match export_results(&outcome.video, &outcome.playlists, format, &path).await {
                Ok(path) => println!(
                    "{} Saved {}: {}",
                    style("✓").green().bold(),
                    format,
                    style(path.display()).cyan()
                ),
                Err(e) => eprintln!("{} {}", style("Export failed:").red().bold(), e),
            }
        }
    }

    pub async fn clear_cache(&self) -> Result<usize, FinderError> {
        self.finder.api().cache().clear().await
    }

    pub fn print_stats(&self) {
        println!("{}", style("Statistics").bold());
        println!("{}", format_stats(&self.finder.stats()));
    }
}

fn print_status(status: &SearchStatus) {
    if !status.is_complete() {
        println!("{} {}", style("!").yellow().bold(), style(status.describe()).yellow());
    }
}
