//! Binary entry point for engram.
//!
//! This binary provides the CLI interface for the engram memory store.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow needless_pass_by_value for command functions
#![allow(clippy::needless_pass_by_value)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use engram::config::EngramConfig;
use engram::models::{ConsolidationRequest, MemoryId, RecallRequest, RememberRequest, TagMode};
use engram::observability::{self, InitOptions};
use engram::store::MemoryStore;
use engram::remote::HttpExecutor;
use std::process::ExitCode;

/// Engram - a persistent, queryable memory store for autonomous agents.
#[derive(Parser)]
#[command(name = "engram")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Store a memory.
    Remember {
        /// The content to remember.
        what: String,

        /// Memory type: world, experience, decision, procedure, interaction, or anomaly.
        #[arg(short = 't', long, default_value = "world")]
        memory_type: String,

        /// Tags for the memory (comma-separated).
        #[arg(long)]
        tags: Option<String>,

        /// Confidence override in [0, 1].
        #[arg(short, long)]
        confidence: Option<f64>,

        /// Priority tier in [-1, 2].
        #[arg(short, long, default_value = "0")]
        priority: i8,

        /// Session grouping identifier.
        #[arg(long)]
        session: Option<String>,
    },

    /// Search for memories.
    Recall {
        /// The search query; omit with --fetch-all to list without a
        /// text predicate.
        query: Option<String>,

        /// Filter by tags (comma-separated).
        #[arg(long)]
        tags: Option<String>,

        /// Require all tags instead of any.
        #[arg(long)]
        all_tags: bool,

        /// Filter by memory type.
        #[arg(short = 't', long)]
        memory_type: Option<String>,

        /// Minimum confidence.
        #[arg(long)]
        min_confidence: Option<f64>,

        /// Retrieve without a text predicate.
        #[arg(long)]
        fetch_all: bool,

        /// Strict chronological order instead of ranked.
        #[arg(long)]
        strict: bool,

        /// Reward frequently-accessed memories in ranking.
        #[arg(long)]
        episodic: bool,

        /// Filter by session.
        #[arg(long)]
        session: Option<String>,

        /// Maximum number of results.
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Soft-delete a memory.
    Forget {
        /// Memory id.
        id: String,
    },

    /// Replace a memory with a corrected version.
    Supersede {
        /// Id of the memory to replace.
        id: String,

        /// Corrected content.
        what: String,

        /// Memory type of the replacement.
        #[arg(short = 't', long, default_value = "world")]
        memory_type: String,

        /// Tags for the replacement (comma-separated); inherits the
        /// original's tags when omitted.
        #[arg(long)]
        tags: Option<String>,
    },

    /// Show the supersede chain rooted at a memory.
    Chain {
        /// Root memory id.
        id: String,

        /// Traversal depth.
        #[arg(short, long, default_value = "10")]
        depth: usize,
    },

    /// Run tag-cluster consolidation.
    Consolidate {
        /// Restrict to memories carrying any of these tags (comma-separated).
        #[arg(long)]
        tags: Option<String>,

        /// Minimum cluster size.
        #[arg(long, default_value = "3")]
        min_cluster: usize,

        /// Apply the merge instead of previewing it.
        #[arg(long)]
        execute: bool,
    },

    /// Soft-delete old or low-priority memories.
    Prune {
        /// Delete memories older than this many days.
        #[arg(long)]
        older_than_days: Option<i64>,

        /// Only memories at or below this priority.
        #[arg(long, default_value = "0")]
        max_priority: i8,

        /// Apply the deletions instead of previewing them.
        #[arg(long)]
        execute: bool,
    },

    /// Adjust a memory's priority.
    Reprioritize {
        /// Memory id.
        id: String,

        /// New priority tier in [-1, 2].
        priority: i8,
    },

    /// Manage store-side configuration.
    Config {
        /// Show a configuration value.
        #[arg(long)]
        get: Option<String>,

        /// Set a configuration value as key=value.
        #[arg(long)]
        set: Option<String>,
    },

    /// Create the schema on the remote store.
    Migrate,
}

/// Main entry point.
fn main() -> ExitCode {
    let cli = Cli::parse();

    observability::init(InitOptions {
        verbose: cli.verbose,
        json: cli.json_logs,
    });

    let config = match EngramConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    let store = MemoryStore::connect(config);
    store.install_exit_flush();

    let result = run_command(cli, &store);

    // Failed commands may still have background writes in flight.
    let report = store.flush();
    if report.timed_out > 0 {
        eprintln!("Warning: {} background write(s) timed out", report.timed_out);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
fn run_command(cli: Cli, store: &MemoryStore<HttpExecutor>) -> anyhow::Result<()> {
    match cli.command {
        Commands::Remember {
            what,
            memory_type,
            tags,
            confidence,
            priority,
            session,
        } => cmd_remember(store, what, memory_type, tags, confidence, priority, session),

        Commands::Recall {
            query,
            tags,
            all_tags,
            memory_type,
            min_confidence,
            fetch_all,
            strict,
            episodic,
            session,
            limit,
        } => cmd_recall(
            store,
            query,
            tags,
            all_tags,
            memory_type,
            min_confidence,
            fetch_all,
            strict,
            episodic,
            session,
            limit,
        ),

        Commands::Forget { id } => cmd_forget(store, &id),

        Commands::Supersede {
            id,
            what,
            memory_type,
            tags,
        } => cmd_supersede(store, &id, what, &memory_type, tags),

        Commands::Chain { id, depth } => cmd_chain(store, &id, depth),

        Commands::Consolidate {
            tags,
            min_cluster,
            execute,
        } => cmd_consolidate(store, tags, min_cluster, execute),

        Commands::Prune {
            older_than_days,
            max_priority,
            execute,
        } => cmd_prune(store, older_than_days, max_priority, execute),

        Commands::Reprioritize { id, priority } => {
            store.reprioritize(&MemoryId::new(id), priority)?;
            println!("Priority updated");
            Ok(())
        },

        Commands::Config { get, set } => cmd_config(store, get, set),

        Commands::Migrate => {
            store.migrate()?;
            println!("Schema ready");
            Ok(())
        },
    }
}

fn split_tags(tags: Option<String>) -> Vec<String> {
    tags.map(|t| {
        t.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

/// Remember command.
fn cmd_remember(
    store: &MemoryStore<HttpExecutor>,
    what: String,
    memory_type: String,
    tags: Option<String>,
    confidence: Option<f64>,
    priority: i8,
    session: Option<String>,
) -> anyhow::Result<()> {
    let mut request = RememberRequest::new(what, memory_type)
        .with_tags(split_tags(tags))
        .with_priority(priority);
    if let Some(confidence) = confidence {
        request = request.with_confidence(confidence);
    }
    if let Some(session) = session {
        request = request.with_session(session);
    }

    let id = store.remember(request)?;
    println!("Remembered: {id}");
    Ok(())
}

/// Recall command.
#[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
fn cmd_recall(
    store: &MemoryStore<HttpExecutor>,
    query: Option<String>,
    tags: Option<String>,
    all_tags: bool,
    memory_type: Option<String>,
    min_confidence: Option<f64>,
    fetch_all: bool,
    strict: bool,
    episodic: bool,
    session: Option<String>,
    limit: usize,
) -> anyhow::Result<()> {
    let mut request = RecallRequest::new().with_limit(limit);
    if let Some(query) = query {
        request = request.with_search(query);
    }
    let tag_list = split_tags(tags);
    if !tag_list.is_empty() {
        request = request.with_tags(tag_list).with_tag_mode(if all_tags {
            TagMode::All
        } else {
            TagMode::Any
        });
    }
    if let Some(memory_type) = memory_type {
        request = request.with_type(memory_type);
    }
    if let Some(min_confidence) = min_confidence {
        request = request.with_min_confidence(min_confidence);
    }
    if let Some(session) = session {
        request = request.with_session(session);
    }
    if fetch_all {
        request = request.fetch_all();
    }
    if strict {
        request = request.strict();
    }
    if episodic {
        request = request.episodic();
    }

    let memories = store.recall(&request)?;
    println!("Found {} memories:", memories.len());
    println!();
    for memory in &memories {
        let confidence = memory.confidence.unwrap_or(0.0);
        println!(
            "  [{:.2}] {} ({})",
            confidence,
            memory.id,
            memory.memory_type.as_str()
        );
        println!("       {}", memory.preview());
        println!();
    }
    Ok(())
}

/// Forget command.
fn cmd_forget(store: &MemoryStore<HttpExecutor>, id: &str) -> anyhow::Result<()> {
    if store.forget(&MemoryId::new(id))? {
        println!("Forgotten: {id}");
    } else {
        println!("Nothing to forget: {id}");
    }
    Ok(())
}

/// Supersede command.
fn cmd_supersede(
    store: &MemoryStore<HttpExecutor>,
    id: &str,
    what: String,
    memory_type: &str,
    tags: Option<String>,
) -> anyhow::Result<()> {
    let new_id = store.supersede(&MemoryId::new(id), what, memory_type, split_tags(tags))?;
    println!("Superseded {id} with {new_id}");
    Ok(())
}

/// Chain command.
fn cmd_chain(store: &MemoryStore<HttpExecutor>, id: &str, depth: usize) -> anyhow::Result<()> {
    let chain = store.get_chain(&MemoryId::new(id), depth)?;
    for entry in &chain {
        let marker = if entry.memory.is_deleted() {
            " (superseded)"
        } else {
            ""
        };
        println!(
            "{:indent$}{}{} {}",
            "",
            entry.memory.id,
            marker,
            entry.memory.preview(),
            indent = entry.depth * 2
        );
    }
    Ok(())
}

/// Consolidate command.
fn cmd_consolidate(
    store: &MemoryStore<HttpExecutor>,
    tags: Option<String>,
    min_cluster: usize,
    execute: bool,
) -> anyhow::Result<()> {
    let mut request = ConsolidationRequest::new()
        .with_tags(split_tags(tags))
        .with_min_cluster(min_cluster);
    if execute {
        request = request.execute();
    }

    let report = store.consolidate(&request)?;
    for cluster in &report.clusters {
        println!("  [{}] {} members", cluster.tag, cluster.size());
    }
    println!("{}", report.summary());
    if !execute && !report.clusters.is_empty() {
        println!("Dry run; pass --execute to apply");
    }
    Ok(())
}

/// Prune command.
fn cmd_prune(
    store: &MemoryStore<HttpExecutor>,
    older_than_days: Option<i64>,
    max_priority: i8,
    execute: bool,
) -> anyhow::Result<()> {
    let report = match older_than_days {
        Some(days) => store.prune_by_age(days, max_priority, !execute)?,
        None => store.prune_by_priority(max_priority, !execute)?,
    };

    println!("Candidates: {}", report.candidates.len());
    if execute {
        println!("Pruned: {}", report.pruned);
    } else if !report.candidates.is_empty() {
        for id in &report.candidates {
            println!("  {id}");
        }
        println!("Dry run; pass --execute to apply");
    }
    Ok(())
}

/// Config command.
fn cmd_config(
    store: &MemoryStore<HttpExecutor>,
    get: Option<String>,
    set: Option<String>,
) -> anyhow::Result<()> {
    if let Some(pair) = set {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected key=value, got '{pair}'"))?;
        store.set_config(key, value, "cli")?;
        println!("Set {key}");
        return Ok(());
    }
    if let Some(key) = get {
        match store.get_config(&key)? {
            Some(value) => println!("{value}"),
            None => println!("(unset)"),
        }
        return Ok(());
    }
    match store.tag_vocabulary() {
        Ok(vocabulary) if !vocabulary.is_empty() => {
            println!("Tag vocabulary: {}", vocabulary.join(", "));
        },
        _ => println!("No configuration to show; use --get or --set"),
    }
    Ok(())
}
