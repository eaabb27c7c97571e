//! # Stockshot CLI - Command Line Interface
//!
//! Drives the catalog engine from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # List entities in a directory tree
//! stockshot-cli scan /shots -r
//!
//! # Extract metadata, then query it
//! stockshot-cli meta extract /shots -r
//! stockshot-cli meta show /shots/010
//! stockshot-cli --json meta search '{"codec": "prores", "width_min": 1920}'
//!
//! # Build thumbnails and inspect the caches
//! stockshot-cli thumbs /shots -r
//! stockshot-cli cache info
//! stockshot-cli cache clear --context user
//!
//! # Store maintenance
//! stockshot-cli backup create
//! stockshot-cli backup restore /path/to/backup.db --context project
//! ```
//!
//! # Configuration
//!
//! `--config`, `--project-config` and `--user-config` name the JSON layers.
//! The user layer defaults to `<config dir>/stockshot/user.json`. The log
//! level comes from `logging.level` unless `RUST_LOG` is set.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info};
use serde::Serialize;
use std::path::{Path, PathBuf};
use stockshot::config::ConfigPaths;
use stockshot::{Batch, Catalog, Config, Context, MediaEntity, MetadataFilter, PipelineEvent};

#[derive(Parser)]
#[command(name = "stockshot-cli")]
#[command(about = "Media catalog engine: scan, probe and thumbnail review libraries", long_about = None)]
struct Args {
    /// General configuration file
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Project configuration file
    #[arg(long = "project-config", global = true)]
    project_config: Option<PathBuf>,

    /// User configuration file
    #[arg(long = "user-config", global = true)]
    user_config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(short = 'j', long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the media entities in a directory
    Scan {
        path: PathBuf,
        /// Scan subdirectories recursively
        #[arg(short = 'r', long)]
        recursive: bool,
    },
    /// Metadata extraction and queries
    Meta {
        #[command(subcommand)]
        action: MetaAction,
    },
    /// Generate thumbnails for a directory
    Thumbs {
        path: PathBuf,
        #[arg(short = 'r', long)]
        recursive: bool,
    },
    /// Thumbnail cache management
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
    /// Store backups and maintenance
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
}

#[derive(Subcommand)]
enum MetaAction {
    /// Scan a directory and extract metadata for every entity
    Extract {
        path: PathBuf,
        #[arg(short = 'r', long)]
        recursive: bool,
    },
    /// Stored metadata of one entity path
    Show { path: PathBuf },
    /// Entity paths matching a JSON filter, e.g. '{"width_min": 1920}'
    Search { filter: String },
    /// Metadata coverage of a context store
    Summary {
        #[arg(long, default_value = "general")]
        context: Context,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Size of every cache directory
    Info,
    /// Delete cached thumbnails (every context when omitted)
    Clear {
        #[arg(long)]
        context: Option<Context>,
    },
}

#[derive(Subcommand)]
enum BackupAction {
    /// Back up every open store
    Create,
    /// Backups of one context store
    List {
        #[arg(long, default_value = "general")]
        context: Context,
    },
    /// Replace a context store with a backup
    Restore {
        backup: PathBuf,
        #[arg(long, default_value = "general")]
        context: Context,
    },
    /// Vacuum every open store
    Vacuum,
    /// Size, schema version and row counts of every open store
    Info,
}

fn main() {
    let args = Args::parse();

    let paths = ConfigPaths {
        general: args.config.clone(),
        project: args.project_config.clone(),
        user: args.user_config.clone().or_else(|| dirs_next::config_dir().map(|d| d.join("stockshot/user.json"))),
    };
    let config = match Config::load(paths) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let level: String = config.get_or("logging.level", "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let catalog = match Catalog::open(config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let ok = match run(&catalog, args.command, args.json) {
        Ok(ok) => ok,
        Err(e) => {
            eprintln!("Error: {}", e);
            false
        }
    };
    catalog.shutdown();
    if !ok {
        std::process::exit(1);
    }
}

/// Run one command. `Ok(false)` means it finished with per-item failures.
fn run(catalog: &Catalog, command: Command, json: bool) -> stockshot::Result<bool> {
    match command {
        Command::Scan { path, recursive } => {
            let entities = scan(catalog, &path, recursive);
            if json {
                print_json(&entities)?;
            } else {
                for entity in &entities {
                    println!("{}", entity);
                }
                eprintln!("\nTotal: {} entities", entities.len());
            }
            Ok(true)
        }
        Command::Meta { action } => meta(catalog, action, json),
        Command::Thumbs { path, recursive } => {
            let entities = scan(catalog, &path, recursive);
            let batch = catalog.queue_thumbnails(entities, &path)?;
            let report = follow(batch, "thumbnails");
            if json {
                print_json(&report.succeeded)?;
            } else {
                let skipped = report.succeeded.iter().filter(|(_, o)| o.skipped).count();
                println!(
                    "{} thumbnails ({} fresh), {} failed",
                    report.succeeded.len(),
                    skipped,
                    report.failed.len()
                );
            }
            print_failures(&report.failed);
            Ok(report.failed.is_empty())
        }
        Command::Cache { action } => match action {
            CacheAction::Info => {
                let infos = catalog.cache_info();
                if json {
                    print_json(&infos)?;
                } else {
                    infos.iter().for_each(|i| println!("{}", i));
                }
                Ok(true)
            }
            CacheAction::Clear { context } => {
                let removed = catalog.clear_cache(context)?;
                println!("Removed {} cached files", removed);
                Ok(true)
            }
        },
        Command::Backup { action } => backup(catalog, action, json),
    }
}

fn meta(catalog: &Catalog, action: MetaAction, json: bool) -> stockshot::Result<bool> {
    match action {
        MetaAction::Extract { path, recursive } => {
            let entities = scan(catalog, &path, recursive);
            let batch = catalog.process_metadata(entities, &path)?;
            let report = follow(batch, "metadata");
            if json {
                let records: Vec<_> = report.succeeded.iter().map(|(p, r)| (p, r.to_map())).collect();
                print_json(&records)?;
            } else {
                println!("{} extracted, {} failed", report.succeeded.len(), report.failed.len());
            }
            print_failures(&report.failed);
            Ok(report.failed.is_empty())
        }
        MetaAction::Show { path } => match catalog.get_entity_metadata(&path)? {
            Some(map) => {
                if json {
                    print_json(&map)?;
                } else {
                    for (key, value) in &map {
                        println!("{:>20}: {}", key, value);
                    }
                }
                Ok(true)
            }
            None => {
                eprintln!("No metadata for {}", path.display());
                Ok(false)
            }
        },
        MetaAction::Search { filter } => {
            let filter: MetadataFilter = serde_json::from_str(&filter)?;
            debug!("Search filter: {:?}", filter);
            let found = catalog.search_by_metadata(&filter)?;
            if json {
                print_json(&found)?;
            } else {
                found.iter().for_each(|p| println!("{}", p));
                eprintln!("\nTotal: {} entities", found.len());
            }
            Ok(true)
        }
        MetaAction::Summary { context } => {
            let summary = catalog.metadata_summary(context)?;
            if json {
                print_json(&summary)?;
            } else {
                println!(
                    "{} entities, {} with metadata ({:.1}%)",
                    summary.total_entities, summary.with_metadata, summary.coverage_percent
                );
                for (format, count) in &summary.formats {
                    println!("  {}: {}", format, count);
                }
            }
            Ok(true)
        }
    }
}

fn backup(catalog: &Catalog, action: BackupAction, json: bool) -> stockshot::Result<bool> {
    let stores = catalog.stores();
    match action {
        BackupAction::Create => {
            let made = stores.backup_all();
            made.iter().for_each(|p| println!("{}", p.display()));
            Ok(made.len() == stores.distinct().len())
        }
        BackupAction::List { context } => {
            let backups = stores.store(context)?.list_backups()?;
            if json {
                print_json(&backups)?;
            } else {
                backups.iter().for_each(|p| println!("{}", p.display()));
            }
            Ok(true)
        }
        BackupAction::Restore { backup, context } => {
            let store = stores.store(context)?;
            store.restore_backup(&backup)?;
            info!("Restored {} from {}", store.path().display(), backup.display());
            println!("Restored {}", store.path().display());
            Ok(true)
        }
        BackupAction::Vacuum => {
            let total = stores.distinct().len();
            let done = stores.vacuum_all();
            println!("Vacuumed {}/{} stores", done, total);
            Ok(done == total)
        }
        BackupAction::Info => {
            let infos = stores.info_all();
            if json {
                print_json(&infos)?;
            } else {
                infos.iter().for_each(|i| println!("{}", i));
            }
            Ok(true)
        }
    }
}

fn bar(len: u64, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    let template = format!("[{{elapsed_precise}}] {{bar:40.cyan/blue}} {{pos}}/{{len}} {}", unit);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb
}

fn scan(catalog: &Catalog, path: &Path, recursive: bool) -> Vec<MediaEntity> {
    let pb = bar(0, if recursive { "folders" } else { "files" });
    let result = catalog.scan_with_progress(path, recursive, &mut |done, total| {
        pb.set_length(total as u64);
        pb.set_position(done as u64);
    });
    pb.finish_and_clear();
    for err in &result.errors {
        eprintln!("Error: {}", err);
    }
    info!("{}", result);
    result.entities
}

/// Wait for `batch` behind a progress bar.
fn follow<R>(batch: Batch<R>, unit: &str) -> stockshot::BatchReport<R> {
    let pb = bar(batch.total() as u64, unit);
    let report = batch.wait_with(|event| match event {
        PipelineEvent::Progress { done, .. } => pb.set_position(*done as u64),
        PipelineEvent::ItemCompleted { entity, outcome: Err(e) } => {
            pb.suspend(|| debug!("{} failed: {}", entity.display(), e));
        }
        _ => {}
    });
    pb.finish_and_clear();
    report
}

fn print_failures(failed: &[(PathBuf, String)]) {
    for (path, err) in failed {
        eprintln!("Failed: {}: {}", path.display(), err);
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> stockshot::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
