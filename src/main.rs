// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Shoebox: Local AI Document Archiver
//!
//! Scans a folder, extracts facts with local models, classifies files
//! into a user taxonomy and files them into a category/year archive.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::signal;
use tracing::{info, warn};

use shoebox::archive::{archive_dest_for_item, unique_destination};
use shoebox::cache::CacheStore;
use shoebox::config::AppConfig;
use shoebox::item::{ItemStatus, WorkItem};
use shoebox::ollama::OllamaClient;
use shoebox::tasks::{
    run_classify, run_extract, run_move, run_scan, CancelFlag, StageReport, TaskCategory,
    TaskEvent, TaskHub,
};
use shoebox::taxonomy;
use shoebox::{Result, ShoeboxError};

/// Shoebox CLI - Local AI Document Archiver
#[derive(Parser, Debug)]
#[command(name = "shoebox")]
#[command(version = "0.4.0")]
#[command(about = "Local AI-powered document archiver", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "shoebox.json", global = true)]
    config: PathBuf,

    /// Override the source folder from the config
    #[arg(long, global = true)]
    source: Option<PathBuf>,

    /// Override the archive root from the config
    #[arg(long, global = true)]
    archive: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full pipeline: scan, extract facts, classify, move
    Run {
        /// Stop after classification; do not move files
        #[arg(long)]
        no_move: bool,

        /// Skip Ollama health check on startup
        #[arg(long)]
        skip_health_check: bool,
    },

    /// Scan the source folder and show the work list
    Scan,

    /// Extract text and facts for pending files (phase 1)
    Facts {
        /// Skip Ollama health check on startup
        #[arg(long)]
        skip_health_check: bool,
    },

    /// Classify scanned files and propose names (phase 2)
    Classify {
        /// Skip Ollama health check on startup
        #[arg(long)]
        skip_health_check: bool,
    },

    /// Move classified files into the archive tree
    Apply {
        /// Show destinations without moving anything
        #[arg(long)]
        dry_run: bool,

        /// Also move skipped and errored files under their original names
        #[arg(long)]
        include_unclassified: bool,
    },

    /// Show AI engine status and cache statistics
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Taxonomy management
    Taxonomy {
        #[command(subcommand)]
        action: TaxonomyCommands,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "shoebox.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[derive(Subcommand, Debug)]
enum TaxonomyCommands {
    /// Show the active taxonomy (file or language default)
    Show,

    /// Write the default taxonomy file into the source folder for editing
    Init {
        /// Overwrite an existing taxonomy file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = AppConfig::load(&cli.config)?;
    if let Some(source) = &cli.source {
        config.source_dir = source.to_string_lossy().to_string();
    }
    if let Some(archive) = &cli.archive {
        config.archive_dir = archive.to_string_lossy().to_string();
    }

    match cli.command {
        Some(Commands::Run {
            no_move,
            skip_health_check,
        }) => cmd_run(config, no_move, skip_health_check, cli.quiet).await,
        Some(Commands::Scan) => cmd_scan(config),
        Some(Commands::Facts { skip_health_check }) => {
            cmd_facts(config, skip_health_check, cli.quiet).await
        }
        Some(Commands::Classify { skip_health_check }) => {
            cmd_classify(config, skip_health_check, cli.quiet).await
        }
        Some(Commands::Apply {
            dry_run,
            include_unclassified,
        }) => cmd_apply(config, dry_run, include_unclassified, cli.quiet),
        Some(Commands::Status) => cmd_status(config).await,
        Some(Commands::Config { action }) => cmd_config(config, action, &cli.config),
        Some(Commands::Taxonomy { action }) => cmd_taxonomy(config, action),
        None => cmd_scan(config),
    }
}

/// Wire Ctrl-C to a cancellation flag.
fn cancel_on_ctrl_c(cancel: &CancelFlag) {
    let flag = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested, finishing the current item...");
            flag.cancel();
        }
    });
}

async fn connect_ollama(config: &AppConfig, skip_health_check: bool) -> Result<OllamaClient> {
    let client = OllamaClient::new(&config.ai_engine.url)?;
    if !skip_health_check {
        client.health_check().await.map_err(|e| {
            ShoeboxError::OllamaUnavailable(format!(
                "Failed to connect to Ollama at {}: {}. Is `ollama serve` running?",
                config.ai_engine.url, e
            ))
        })?;
    }
    Ok(client)
}

fn load_source_cache(config: &AppConfig) -> CacheStore {
    let mut cache = CacheStore::new(Path::new(&config.source_dir));
    cache.load();
    cache
}

fn print_item_line(item: &WorkItem) {
    let status = item.status.as_str();
    let extra = match item.status {
        ItemStatus::Classified | ItemStatus::Moved => format!(
            " -> {}/{}/{}",
            item.category.as_deref().unwrap_or("unknown"),
            item.reference_year.as_deref().unwrap_or("undated"),
            item.proposed_name.as_deref().unwrap_or("")
        ),
        ItemStatus::Skipped | ItemStatus::Error => {
            format!(" ({})", item.reason.as_deref().unwrap_or(""))
        }
        _ => String::new(),
    };
    println!("  [{status:>10}] {}{}", item.path.display(), extra);
}

fn print_report(stage: &str, report: &StageReport, quiet: bool) {
    if quiet {
        return;
    }
    let cancelled = if report.cancelled { " (cancelled)" } else { "" };
    println!(
        "{stage}: {} processed, {} errors{cancelled}",
        report.processed, report.errors
    );
}

fn cmd_scan(config: AppConfig) -> Result<()> {
    let mut cache = load_source_cache(&config);
    let items = run_scan(&config, &mut cache)?;
    for item in &items {
        print_item_line(item);
    }
    println!("{} files in {}", items.len(), config.source_dir);
    Ok(())
}

async fn cmd_facts(config: AppConfig, skip_health_check: bool, quiet: bool) -> Result<()> {
    let client = connect_ollama(&config, skip_health_check).await?;
    let hub = TaskHub::new();
    let guard = hub.try_begin(TaskCategory::ExtractFacts)?;
    cancel_on_ctrl_c(&guard.cancel);

    let mut cache = load_source_cache(&config);
    let items = run_scan(&config, &mut cache)?;
    let (items, report) =
        run_extract(&items, &config, &client, &mut cache, &guard.cancel, None).await?;
    drop(guard);

    for item in &items {
        print_item_line(item);
    }
    print_report("facts", &report, quiet);
    Ok(())
}

async fn cmd_classify(config: AppConfig, skip_health_check: bool, quiet: bool) -> Result<()> {
    let client = connect_ollama(&config, skip_health_check).await?;
    let root = PathBuf::from(&config.source_dir);
    let (taxonomy, errors) = taxonomy::load_for_folder(&root, &config.language);
    for e in &errors {
        warn!("taxonomy: {e}");
    }

    let hub = TaskHub::new();
    let guard = hub.try_begin(TaskCategory::Classify)?;
    cancel_on_ctrl_c(&guard.cancel);

    let mut cache = load_source_cache(&config);
    let items = run_scan(&config, &mut cache)?;
    let (items, report) = run_classify(
        &items,
        &config,
        &client,
        &taxonomy,
        &mut cache,
        &guard.cancel,
        None,
    )
    .await?;
    drop(guard);

    for item in &items {
        print_item_line(item);
    }
    print_report("classify", &report, quiet);
    Ok(())
}

fn cmd_apply(
    config: AppConfig,
    dry_run: bool,
    include_unclassified: bool,
    quiet: bool,
) -> Result<()> {
    let mut cache = load_source_cache(&config);
    let items = run_scan(&config, &mut cache)?;
    let movable: Vec<WorkItem> = items
        .into_iter()
        .filter(|it| {
            it.status == ItemStatus::Classified
                || (include_unclassified
                    && matches!(it.status, ItemStatus::Skipped | ItemStatus::Error))
        })
        .collect();

    if dry_run {
        for item in &movable {
            let (dest, _) = archive_dest_for_item(item, &config);
            let dest = unique_destination(&dest);
            println!("  {} -> {}", item.path.display(), dest.display());
        }
        println!("{} files would move (dry run)", movable.len());
        return Ok(());
    }

    let mut archive_cache = CacheStore::new(Path::new(&config.archive_dir));
    archive_cache.load();

    let hub = TaskHub::new();
    let guard = hub.try_begin(TaskCategory::Move)?;
    let (moved, report) = run_move(
        &movable,
        &config,
        &mut cache,
        &mut archive_cache,
        &guard.cancel,
        None,
    )?;
    drop(guard);

    for item in &moved {
        print_item_line(item);
    }
    print_report("apply", &report, quiet);
    Ok(())
}

async fn cmd_run(
    config: AppConfig,
    no_move: bool,
    skip_health_check: bool,
    quiet: bool,
) -> Result<()> {
    let client = connect_ollama(&config, skip_health_check).await?;
    let root = PathBuf::from(&config.source_dir);
    let (taxonomy, errors) = taxonomy::load_for_folder(&root, &config.language);
    for e in &errors {
        warn!("taxonomy: {e}");
    }

    let cancel = CancelFlag::new();
    cancel_on_ctrl_c(&cancel);
    let mut cache = load_source_cache(&config);
    let items = run_scan(&config, &mut cache)?;
    info!("{} files found", items.len());

    // Stream item updates as they happen instead of waiting per stage.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<TaskEvent>();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let TaskEvent::ItemUpdated { item } = event {
                print_item_line(&item);
            }
        }
    });
    let events = if quiet { None } else { Some(&tx) };

    let (items, facts_report) =
        run_extract(&items, &config, &client, &mut cache, &cancel, events).await?;
    print_report("facts", &facts_report, quiet);

    let result = if facts_report.cancelled {
        Ok(())
    } else {
        let (items, classify_report) = run_classify(
            &items, &config, &client, &taxonomy, &mut cache, &cancel, events,
        )
        .await?;
        print_report("classify", &classify_report, quiet);

        if classify_report.cancelled || no_move {
            Ok(())
        } else {
            let mut archive_cache = CacheStore::new(Path::new(&config.archive_dir));
            archive_cache.load();
            let (_items, move_report) = run_move(
                &items,
                &config,
                &mut cache,
                &mut archive_cache,
                &cancel,
                events,
            )?;
            print_report("apply", &move_report, quiet);
            Ok(())
        }
    };

    drop(tx);
    let _ = printer.await;
    result
}

async fn cmd_status(config: AppConfig) -> Result<()> {
    let client = OllamaClient::new(&config.ai_engine.url)?;

    println!("Shoebox v0.4.0 Status");
    println!("=====================");

    match client.health_check().await {
        Ok(()) => println!("Ollama: running at {}", config.ai_engine.url),
        Err(e) => println!("Ollama: error - {e}"),
    }

    match client.list_models().await {
        Ok(models) => {
            let configured = [
                config.ai_engine.models.text_fast.as_str(),
                config.ai_engine.models.text_deep.as_str(),
                config.ai_engine.models.vision.as_str(),
            ];
            println!("\nAvailable models:");
            for m in &models {
                let marker = if configured.iter().any(|c| m.starts_with(c)) {
                    "→"
                } else {
                    " "
                };
                println!("  {marker} {m}");
            }
        }
        Err(e) => println!("  Error listing models: {e}"),
    }

    let cache = load_source_cache(&config);
    println!("\nCache ({}):", config.source_dir);
    println!("  Entries: {}", cache.len());
    let mut counts: std::collections::BTreeMap<&'static str, usize> = Default::default();
    for (_, item) in cache.iter() {
        *counts.entry(item.status.as_str()).or_default() += 1;
    }
    for (status, count) in counts {
        println!("    {status}: {count}");
    }

    println!("\nConfiguration:");
    println!("  Source: {}", config.source_dir);
    println!("  Archive: {}", config.archive_dir);
    println!("  Fast model: {}", config.ai_engine.models.text_fast);
    println!("  Deep model: {}", config.ai_engine.models.text_deep);
    println!("  Vision model: {}", config.ai_engine.models.vision);

    Ok(())
}

fn cmd_config(config: AppConfig, action: ConfigCommands, config_path: &Path) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{json}");
        }
        ConfigCommands::Generate { output } => {
            let default_config = AppConfig::default();
            default_config.save(&output)?;
            println!("Generated config at {output:?}");
        }
        ConfigCommands::Validate => {
            println!("Configuration at {config_path:?} is valid");
            println!("  Source: {}", config.source_dir);
            println!("  Archive: {}", config.archive_dir);
            println!("  Language: {}", config.language);
        }
    }
    Ok(())
}

fn cmd_taxonomy(config: AppConfig, action: TaxonomyCommands) -> Result<()> {
    let root = PathBuf::from(&config.source_dir);
    match action {
        TaxonomyCommands::Show => {
            let (taxonomy, errors) = taxonomy::load_for_folder(&root, &config.language);
            for e in &errors {
                eprintln!("warning: {e}");
            }
            println!("{}", taxonomy.to_prompt_block());
        }
        TaxonomyCommands::Init { force } => {
            let path = AppConfig::taxonomy_path(&root);
            if path.exists() && !force {
                return Err(ShoeboxError::Taxonomy(format!(
                    "{} already exists. Use --force to overwrite",
                    path.display()
                )));
            }
            let path = taxonomy::write_default_taxonomy(&root, &config.language)?;
            println!("Wrote default taxonomy to {}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["shoebox"]).unwrap();
        assert!(!cli.verbose);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_apply_flags() {
        let cli =
            Cli::try_parse_from(["shoebox", "apply", "--dry-run", "--include-unclassified"])
                .unwrap();
        match cli.command {
            Some(Commands::Apply {
                dry_run,
                include_unclassified,
            }) => {
                assert!(dry_run);
                assert!(include_unclassified);
            }
            _ => panic!("Expected Apply command"),
        }
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from(["shoebox", "--source", "/tmp/in", "scan"]).unwrap();
        assert_eq!(cli.source, Some(PathBuf::from("/tmp/in")));
    }
}
