// SPDX-License-Identifier: MIT OR Apache-2.0

//! symdex - Lexical symbol index and search for source trees
//!
//! Builds a persistent, incrementally updated index of the symbols in a
//! source tree and answers ranked name queries against it.

mod cli;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use symdex::cancel::{install_interrupt_handler, CancelToken};
use symdex::config::Config;
use symdex::errors::{IndexError, EXIT_INTERNAL, EXIT_OK};
use symdex::indexer::pipeline::{run_index, IndexOptions, IndexSummary};
use symdex::indexer::status::{read_status, IndexStatus};
use symdex::indexer::watch::watch;
use symdex::output::{format_timestamp_ms, init_colors, print_json};
use symdex::parser::ExtractorRegistry;
use symdex::query::search::{self, SearchOptions};
use symdex::store::{discover_db, IndexStore, DEFAULT_DB_DIR};

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    init_colors();

    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_code(&err)
        }
    };
    std::process::exit(code);
}

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        EnvFilter::try_from_env("SYMDEX_LOG").unwrap_or_else(|_| EnvFilter::new(level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<IndexError>())
        .map_or(EXIT_INTERNAL, IndexError::exit_code)
}

fn run(cli: Cli) -> Result<i32> {
    let config = Config::load();
    let quiet = cli.quiet;

    match cli.command {
        Commands::Index {
            root,
            db,
            include,
            exclude,
            verify_hash,
            workers,
            force,
            max_file_size,
            keep_failed,
            follow_symlinks,
            json,
        } => {
            let mut options = config.index_options(root.unwrap_or_else(|| PathBuf::from(".")));
            options.db = config.merge_db(db);
            options.include.extend(include);
            options.exclude.extend(exclude);
            options.verify_hash = verify_hash;
            options.workers = config.merge_workers(workers);
            options.force = force;
            if let Some(limit) = max_file_size {
                options.max_file_size = limit;
            }
            options.keep_failed |= keep_failed;
            options.follow_links = follow_symlinks;
            options.show_progress = !json && !quiet && std::io::stderr().is_terminal();

            let cancel = CancelToken::new();
            install_interrupt_handler(cancel.clone());
            let summary = run_index(&options, &ExtractorRegistry::default(), cancel)?;
            if json {
                print_json(&summary, false)?;
            } else if !quiet {
                print_summary(&summary);
            }
            Ok(EXIT_OK)
        }
        Commands::Search {
            query,
            db,
            limit,
            kind,
            file,
            json,
            cursor,
            context,
        } => {
            let options = SearchOptions {
                query: query.join(" "),
                db: resolve_db(&config, db)?,
                limit: config.merge_max_results(limit),
                kind,
                file,
                cursor,
                json,
                context: context.unwrap_or(0),
            };
            search::run(&options)
        }
        Commands::Status { db, json } => {
            let store = IndexStore::new(resolve_db(&config, db)?);
            let status = read_status(&store)?;
            if json {
                print_json(&status, false)?;
            } else {
                print_status(&status);
            }
            Ok(EXIT_OK)
        }
        Commands::Watch {
            root,
            db,
            include,
            exclude,
            workers,
            debounce_ms,
        } => {
            let mut options: IndexOptions =
                config.index_options(root.unwrap_or_else(|| PathBuf::from(".")));
            options.db = config.merge_db(db);
            options.include.extend(include);
            options.exclude.extend(exclude);
            options.workers = config.merge_workers(workers);

            let cancel = CancelToken::new();
            install_interrupt_handler(cancel.clone());
            let registry = ExtractorRegistry::default();
            let result = watch(
                &options,
                &registry,
                Duration::from_millis(debounce_ms),
                cancel,
                |summary| {
                    if !quiet {
                        print_summary(summary);
                    }
                },
            );
            match result {
                // Ctrl-C is the normal way out of watch mode.
                Ok(()) | Err(IndexError::Cancelled) => Ok(EXIT_OK),
                Err(err) => Err(err.into()),
            }
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "symdex", &mut std::io::stdout());
            Ok(EXIT_OK)
        }
    }
}

/// Index directory for read commands: flag or env, config, the nearest
/// ancestor `.symdex`, then `./.symdex`.
fn resolve_db(config: &Config, flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(db) = config.merge_db(flag) {
        return Ok(db);
    }
    let cwd = std::env::current_dir()?;
    Ok(discover_db(&cwd).unwrap_or_else(|| cwd.join(DEFAULT_DB_DIR)))
}

fn print_summary(summary: &IndexSummary) {
    println!(
        "Indexed {} ({} files, {} symbols, {} tokens) in {} ms",
        summary.root, summary.files, summary.symbols, summary.tokens, summary.elapsed_ms
    );
    println!(
        "  scanned {}: {} new, {} modified, {} touched, {} unchanged, {} deleted, {} failed, {} skipped",
        summary.scanned,
        summary.new,
        summary.modified,
        summary.touched,
        summary.unchanged,
        summary.deleted,
        summary.failed,
        summary.skipped
    );
    println!("  index: {}", display_path(Path::new(&summary.db)));
}

fn print_status(status: &IndexStatus) {
    println!("index:    {}", status.db);
    match status.pid {
        Some(pid) => println!("state:    {} (pid {pid})", status.state.as_str()),
        None => println!("state:    {}", status.state.as_str()),
    }
    if let Some(root) = &status.root {
        println!("root:     {root}");
    }
    if let Some(version) = status.schema_version {
        println!("schema:   {version}");
    }
    println!("files:    {}", status.files);
    println!("symbols:  {}", status.symbols);
    println!("tokens:   {}", status.tokens);
    for (id, version) in &status.extractors {
        println!("extractor {id} v{version}");
    }
    if let Some(created) = status.created_at_ms {
        println!("created:  {}", format_timestamp_ms(created));
    }
    if let Some(updated) = status.updated_at_ms {
        println!("updated:  {}", format_timestamp_ms(updated));
    }
}

fn display_path(path: &Path) -> String {
    std::env::current_dir()
        .ok()
        .and_then(|cwd| path.strip_prefix(cwd).ok().map(Path::to_path_buf))
        .filter(|rel| !rel.as_os_str().is_empty())
        .unwrap_or_else(|| path.to_path_buf())
        .display()
        .to_string()
}
