use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use playlist_finder_core::{Config, DEFAULT_CONFIG_FILE, ExportFormat, SearchStrategy};
use tracing_subscriber::EnvFilter;

use crate::session::{ExportTarget, Session};

mod interactive;
mod session;

/// CLI wrapper for SearchStrategy (needed for clap ValueEnum)
#[derive(Clone, Copy, ValueEnum)]
#[value(rename_all = "snake_case")]
enum CliStrategy {
    ExactTitle,
    ChannelPlaylists,
    TitleChannel,
    #[value(alias = "keyword")]
    KeywordSearch,
    #[value(alias = "popular_playlists")]
    Popular,
}

impl From<CliStrategy> for SearchStrategy {
    fn from(cli: CliStrategy) -> Self {
        match cli {
            CliStrategy::ExactTitle => SearchStrategy::ExactTitle,
            CliStrategy::ChannelPlaylists => SearchStrategy::ChannelPlaylists,
            CliStrategy::TitleChannel => SearchStrategy::TitleChannel,
            CliStrategy::KeywordSearch => SearchStrategy::KeywordSearch,
            CliStrategy::Popular => SearchStrategy::Popular,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum CliFormat {
    Json,
    Html,
    Csv,
}

impl From<CliFormat> for ExportFormat {
    fn from(cli: CliFormat) -> Self {
        match cli {
            CliFormat::Json => ExportFormat::Json,
            CliFormat::Html => ExportFormat::Html,
            CliFormat::Csv => ExportFormat::Csv,
        }
    }
}

#[derive(Parser)]
#[command(name = "playlist-finder", version)]
#[command(about = "Find the YouTube playlists that contain a given video")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Configuration file (.yaml, .yml or .json)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Search for playlists containing a video
    Search(SearchArgs),
    /// Inspect or clear the response cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Show or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct SearchArgs {
    /// Video ID or URL
    video: Option<String>,

    /// YouTube Data API key (overrides config and YOUTUBE_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Maximum number of playlists to return
    #[arg(short = 'n', long)]
    max_playlists: Option<usize>,

    /// Strategies to run, in any order
    #[arg(short, long, num_args = 1.., value_delimiter = ',')]
    strategies: Vec<CliStrategy>,

    /// Export results to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Export format (defaults to the --output extension, then the configured formats)
    #[arg(short, long)]
    format: Option<CliFormat>,

    /// File with one video ID or URL per line
    #[arg(short, long, conflicts_with = "video")]
    batch: Option<PathBuf>,

    /// Menu-driven session
    #[arg(short, long)]
    interactive: bool,

    /// Skip the response cache for this run
    #[arg(long)]
    no_cache: bool,

    /// Run strategies one after another
    #[arg(long)]
    sequential: bool,

    /// Export to every configured format under output_dir
    #[arg(short, long)]
    export: bool,
}

impl SearchArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(max) = self.max_playlists {
            config.max_playlists = max;
        }
        if !self.strategies.is_empty() {
            config.search_strategies = self.strategies.iter().map(|&s| s.into()).collect();
        }
        if self.no_cache {
            config.cache_enabled = false;
        }
        if self.sequential {
            config.parallel_search = false;
        }
    }

    fn export_target(&self, config: &Config) -> ExportTarget {
        let format = self.format.map(ExportFormat::from);
        if let Some(path) = &self.output {
            let format = format
                .or_else(|| {
                    path.extension()
                        .and_then(|ext| ext.to_str())
                        .and_then(|ext| ext.parse().ok())
                })
                .unwrap_or(ExportFormat::Json);
            return ExportTarget::File {
                path: path.clone(),
                format,
            };
        }
        match format {
            Some(format) => ExportTarget::Configured(vec![format]),
            None if self.export => ExportTarget::Configured(config.export_formats.clone()),
            None => ExportTarget::None,
        }
    }
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show where the cache lives and how many entries it holds
    Stats,
    /// Delete every cached response
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a configuration file with default values
    Init,
}

fn init_tracing(verbose: bool, log_level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .await
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    init_tracing(cli.verbose, &config.log_level);

    match cli.command {
        Command::Search(args) => run_search(args, config).await,
        Command::Cache { action } => run_cache(action, &config).await,
        Command::Config { action } => run_config(action, &cli.config, &config).await,
    }
}

async fn run_search(args: SearchArgs, mut config: Config) -> Result<()> {
    args.apply(&mut config);

    // Validate API key early
    let api_key = match config.resolve_api_key(args.api_key.as_deref()) {
        Ok(key) => key,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            std::process::exit(1);
        }
    };

    println!(
        "\n{}  {}\n",
        style("playlist-finder").cyan().bold(),
        style("YouTube Playlist Finder").dim()
    );

    let target = args.export_target(&config);
    let session = Session::connect(config, &api_key).await?;

    if args.interactive || (args.video.is_none() && args.batch.is_none()) {
        interactive::run(&session, &target).await?;
    } else if let Some(batch) = &args.batch {
        session.search_batch(batch, &target).await?;
    } else if let Some(video) = &args.video {
        session.search_video(video, &target).await?;
    }

    session.print_stats();
    Ok(())
}

async fn run_cache(action: CacheAction, config: &Config) -> Result<()> {
    if !config.cache_enabled {
        println!("{} Cache is disabled in the configuration", style("!").yellow());
        return Ok(());
    }

    let cache = config.open_cache().await;
    let dir = config.cache_path();
    match action {
        CacheAction::Stats => {
            let entries = cache.disk_entries().await?;
            println!("{} {}", style("Cache directory:").dim(), style(dir.display()).cyan());
            println!("{} {}", style("Entries:").dim(), entries);
            println!(
                "{} {} hours",
                style("Expiry:").dim(),
                config.cache_expire_hours
            );
        }
        CacheAction::Clear => {
            let removed = cache.clear().await?;
            println!(
                "{} Removed {} cache entries from {}",
                style("✓").green().bold(),
                removed,
                style(dir.display()).dim()
            );
        }
    }
    Ok(())
}

async fn run_config(action: ConfigAction, path: &Path, config: &Config) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let mut shown = config.clone();
            if !shown.api_key.is_empty() {
                shown.api_key = "********".to_string();
            }
            println!("{} {}\n", style("Config file:").dim(), style(path.display()).cyan());
            println!("{}", shown.render(path)?);
        }
        ConfigAction::Init => {
            if Config::init(path).await? {
                println!(
                    "{} Created {}",
                    style("✓").green().bold(),
                    style(path.display()).cyan()
                );
            } else {
                println!(
                    "{} {} already exists",
                    style("!").yellow(),
                    style(path.display()).cyan()
                );
            }
        }
    }
    Ok(())
}
