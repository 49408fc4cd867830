//! CLI entry point for the capdex semantic retrieval engine.
//!
//! Provides commands for initializing the storage root, inspecting
//! configuration and index statistics, rebuilding category indexes from a
//! source enumeration, and running similarity searches.

use anyhow::{Result, anyhow};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use capdex::storage::IndexStorage;
use capdex::{Category, Settings, SyncError, VectorSyncManager, create_generator};

/// Standard exit codes for CLI operations.
///
/// `0` success, `1` general error, `3` the command ran but found nothing
/// (scripts can tell an empty search apart from a failed one).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum ExitCode {
    Success = 0,
    GeneralError = 1,
    NoResults = 3,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Semantic retrieval for capability maps
#[derive(Parser)]
#[command(
    name = "capdex",
    version = env!("CARGO_PKG_VERSION"),
    about = "Embedding-backed semantic retrieval for capability maps",
    long_about = "Index capability, goal, and recommendation texts and query them by meaning.",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
enum Commands {
    /// Initialize project
    #[command(about = "Set up the .capdex directory with default configuration")]
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Show configuration
    #[command(about = "Display active settings from .capdex/settings.toml")]
    Config,

    /// Show index statistics
    #[command(about = "Show vector counts, index sizes, and record ages per category")]
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rebuild one category from its authoritative source
    #[command(about = "Rebuild one category's index from a JSON-lines enumeration")]
    Rebuild {
        /// Category to rebuild: capability, goal, or recommendation
        category: String,

        /// JSON-lines file, one {"object_id": ..., "text": ...} entry per line
        #[arg(short, long)]
        source: PathBuf,
    },

    /// Similarity search
    #[command(about = "Find objects whose stored text is most similar to a query")]
    Search {
        /// Category to search: capability, goal, or recommendation
        category: String,

        /// Query text
        query: String,

        /// Maximum number of results (default from search.default_limit)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Minimum similarity score; an exactly equal score passes
        #[arg(short, long)]
        threshold: Option<f32>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // For anything but init, a missing config is worth a warning but the
    // defaults still work.
    if !matches!(cli.command, Commands::Init { .. }) {
        if let Err(warning) = Settings::check_init() {
            eprintln!("Warning: {warning}");
            eprintln!("Using default configuration for now.");
        }
    }

    let config = if let Some(config_path) = &cli.config {
        Settings::load_from(config_path).unwrap_or_else(|e| {
            eprintln!(
                "Configuration error loading from {}: {}",
                config_path.display(),
                e
            );
            std::process::exit(ExitCode::GeneralError.into());
        })
    } else {
        Settings::load().unwrap_or_else(|e| {
            eprintln!("Configuration error: {e}");
            Settings::default()
        })
    };

    // Log to stderr so stdout stays clean for --json output.
    let default_level = if config.debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = run(cli.command, config);
    std::process::exit(code.into());
}

fn run(command: Commands, config: Settings) -> ExitCode {
    match command {
        Commands::Init { force } => cmd_init(force),
        Commands::Config => cmd_config(&config),
        Commands::Stats { json } => match open_manager(config) {
            Ok(manager) => cmd_stats(&manager, json),
            Err(code) => code,
        },
        Commands::Rebuild { category, source } => match open_manager(config) {
            Ok(manager) => cmd_rebuild(&manager, &category, &source),
            Err(code) => code,
        },
        Commands::Search {
            category,
            query,
            limit,
            threshold,
            json,
        } => match open_manager(config) {
            Ok(manager) => cmd_search(&manager, &category, &query, limit, threshold, json),
            Err(code) => code,
        },
    }
}

/// Builds the embedding provider and loads persisted state.
fn open_manager(config: Settings) -> Result<VectorSyncManager, ExitCode> {
    let settings = Arc::new(config);
    let generator = create_generator(&settings).map_err(|e| {
        eprintln!("Error: {e}");
        ExitCode::GeneralError
    })?;
    VectorSyncManager::open(settings, generator).map_err(|e| {
        report_error(&e);
        ExitCode::GeneralError
    })
}

fn report_error(error: &SyncError) {
    eprintln!("Error: {error}");
    for suggestion in error.recovery_suggestions() {
        eprintln!("  Hint: {suggestion}");
    }
}

fn cmd_init(force: bool) -> ExitCode {
    let config_path = PathBuf::from(".capdex/settings.toml");

    if config_path.exists() && !force {
        eprintln!(
            "Configuration file already exists at: {}",
            config_path.display()
        );
        eprintln!("Use --force to overwrite");
        return ExitCode::GeneralError;
    }

    if let Err(e) = Settings::init_config_file(force) {
        eprintln!("Error: {e}");
        return ExitCode::GeneralError;
    }
    println!("Edit this file to customize your settings.");

    let storage = IndexStorage::new(Settings::default().index_path);
    if let Err(e) = storage.ensure_layout() {
        report_error(&e);
        return ExitCode::GeneralError;
    }
    println!("Created index root at: {}", storage.root().display());

    ExitCode::Success
}

fn cmd_config(config: &Settings) -> ExitCode {
    println!("Current Configuration:");
    println!("{}", "=".repeat(50));
    match toml::to_string_pretty(config) {
        Ok(toml_str) => {
            println!("{toml_str}");
            ExitCode::Success
        }
        Err(e) => {
            eprintln!("Error displaying config: {e}");
            ExitCode::GeneralError
        }
    }
}

fn cmd_stats(manager: &VectorSyncManager, json: bool) -> ExitCode {
    let report = manager.stats();

    if json {
        match serde_json::to_string_pretty(&report) {
            Ok(out) => {
                println!("{out}");
                ExitCode::Success
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::GeneralError
            }
        }
    } else {
        println!(
            "Semantic index ({} dimensions, model {})",
            report.dimension, report.model
        );
        println!(
            "{:<16} {:>8} {:>8} {:>12}  {}",
            "CATEGORY", "VECTORS", "RECORDS", "INDEX SIZE", "LAST UPDATE"
        );
        for stats in &report.categories {
            println!(
                "{:<16} {:>8} {:>8} {:>12}  {}",
                stats.category.as_str(),
                stats.vectors,
                stats.records,
                format_bytes(stats.index_bytes),
                format_age(stats.latest_age_secs),
            );
        }
        ExitCode::Success
    }
}

/// One line of a rebuild source file.
#[derive(Debug, Deserialize)]
struct RebuildEntry {
    object_id: String,
    text: String,
}

fn cmd_rebuild(manager: &VectorSyncManager, category_arg: &str, source: &Path) -> ExitCode {
    let category: Category = match category_arg.parse() {
        Ok(category) => category,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::GeneralError;
        }
    };

    let entries = match read_rebuild_entries(source) {
        Ok(entries) => entries,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::GeneralError;
        }
    };

    match manager.rebuild(category, entries) {
        Ok(count) => {
            println!(
                "Rebuilt '{category}' with {count} vectors from {}",
                source.display()
            );
            ExitCode::Success
        }
        Err(e) => {
            report_error(&e);
            ExitCode::GeneralError
        }
    }
}

fn read_rebuild_entries(path: &Path) -> Result<Vec<(String, String)>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("cannot read {}: {e}", path.display()))?;

    let mut entries = Vec::new();
    for (line_number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let entry: RebuildEntry = serde_json::from_str(line)
            .map_err(|e| anyhow!("{}:{}: {e}", path.display(), line_number + 1))?;
        entries.push((entry.object_id, entry.text));
    }
    Ok(entries)
}

fn cmd_search(
    manager: &VectorSyncManager,
    category_arg: &str,
    query: &str,
    limit: Option<usize>,
    threshold: Option<f32>,
    json: bool,
) -> ExitCode {
    let category: Category = match category_arg.parse() {
        Ok(category) => category,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::GeneralError;
        }
    };

    let k = limit.unwrap_or(manager.settings().search.default_limit);
    let threshold = threshold.unwrap_or(manager.settings().search.default_threshold);

    match manager.search(category, query, k, threshold) {
        Ok(hits) if hits.is_empty() => {
            if json {
                println!("[]");
            } else {
                println!("No results at or above threshold {threshold} in '{category}'.");
            }
            ExitCode::NoResults
        }
        Ok(hits) => {
            if json {
                match serde_json::to_string_pretty(&hits) {
                    Ok(out) => println!("{out}"),
                    Err(e) => {
                        eprintln!("Error: {e}");
                        return ExitCode::GeneralError;
                    }
                }
            } else {
                println!("Found {} result(s) in '{category}':", hits.len());
                for (rank, hit) in hits.iter().enumerate() {
                    println!(
                        "{:>3}. {} (score {:.4})",
                        rank + 1,
                        hit.object_id,
                        hit.score.get()
                    );
                    println!("     {}", hit.text);
                }
            }
            ExitCode::Success
        }
        Err(e) => {
            report_error(&e);
            ExitCode::GeneralError
        }
    }
}

fn format_bytes(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    let value = bytes as f64;
    if value >= MB {
        format!("{:.1} MB", value / MB)
    } else if value >= KB {
        format!("{:.1} KB", value / KB)
    } else {
        format!("{bytes} B")
    }
}

fn format_age(age_secs: Option<u64>) -> String {
    let Some(secs) = age_secs else {
        return "never".to_string();
    };
    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}
