// SPDX-License-Identifier: MIT OR Apache-2.0

//! CLI argument parsing using clap

use clap::{ArgAction, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// symdex - Lexical symbol index and search for source trees
///
/// Indexes functions, methods, types, fields, constants, variables and
/// comment tags, then answers exact, prefix and substring queries.
#[derive(Parser, Debug)]
#[command(name = "symdex")]
#[command(
    author,
    version,
    about,
    long_about = None,
    after_help = "Quickstart:\n  symdex index .\n  symdex search calculate\n  symdex s kind:method tax --file '**/*.go'\n\nQuery terms (ANDed): <text> | name:<text> | kind:<kind> | file:<glob>"
)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug); SYMDEX_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build or incrementally update the index of a source tree
    #[command(visible_aliases = ["i", "ix"])]
    Index {
        /// Root of the source tree (defaults to current directory)
        root: Option<PathBuf>,

        /// Index directory (defaults to <root>/.symdex)
        #[arg(long, env = "INDEX_DB_PATH")]
        db: Option<PathBuf>,

        /// Only index files matching this glob (repeatable)
        #[arg(long = "include")]
        include: Vec<String>,

        /// Skip files and directories matching this glob (repeatable)
        #[arg(short = 'x', long = "exclude")]
        exclude: Vec<String>,

        /// Hash every file instead of trusting size and mtime
        #[arg(long)]
        verify_hash: bool,

        /// Number of extraction workers (defaults to CPU count)
        #[arg(short = 'j', long, env = "INDEX_WORKERS")]
        workers: Option<usize>,

        /// Ignore the existing index and rebuild everything
        #[arg(short, long)]
        force: bool,

        /// Skip files larger than this many bytes
        #[arg(long)]
        max_file_size: Option<u64>,

        /// Keep previous symbols of files whose extraction fails
        #[arg(long)]
        keep_failed: bool,

        /// Follow symbolic links while walking
        #[arg(short = 'L', long)]
        follow_symlinks: bool,

        /// Print the build summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Search indexed symbols
    #[command(visible_aliases = ["s", "q"])]
    Search {
        /// Query terms: <text>, name:<text>, kind:<kind>, file:<glob>
        #[arg(required_unless_present_any = ["kind", "file"])]
        query: Vec<String>,

        /// Index directory (defaults to the nearest .symdex)
        #[arg(long, env = "INDEX_DB_PATH")]
        db: Option<PathBuf>,

        /// Results per page
        #[arg(short = 'm', long)]
        limit: Option<usize>,

        /// Only symbols of this kind
        #[arg(short, long)]
        kind: Option<String>,

        /// Only symbols in files matching this glob
        #[arg(long)]
        file: Option<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Resume after a previous page (printed as "next cursor")
        #[arg(long)]
        cursor: Option<String>,

        /// Show up to N source lines of each matched declaration
        #[arg(short = 'c', long, value_name = "N")]
        context: Option<usize>,
    },

    /// Show index state, counts and last update time
    #[command(visible_aliases = ["st"])]
    Status {
        /// Index directory (defaults to the nearest .symdex)
        #[arg(long, env = "INDEX_DB_PATH")]
        db: Option<PathBuf>,

        /// Print status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Index, then re-index whenever the tree changes
    #[command(visible_aliases = ["w"])]
    Watch {
        /// Root of the source tree (defaults to current directory)
        root: Option<PathBuf>,

        /// Index directory (defaults to <root>/.symdex)
        #[arg(long, env = "INDEX_DB_PATH")]
        db: Option<PathBuf>,

        /// Only index files matching this glob (repeatable)
        #[arg(long = "include")]
        include: Vec<String>,

        /// Skip files and directories matching this glob (repeatable)
        #[arg(short = 'x', long = "exclude")]
        exclude: Vec<String>,

        /// Number of extraction workers (defaults to CPU count)
        #[arg(short = 'j', long, env = "INDEX_WORKERS")]
        workers: Option<usize>,

        /// Quiet period in milliseconds before re-indexing
        #[arg(long, default_value_t = 500)]
        debounce_ms: u64,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}
