use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use synctree_common::{ensure_config, load_config, ResourcePath, SyncConfig, SyncType};
use synctree_core::{
    classify_diff, Diff, DirectoryRemoteProvider, Direction, LocalStore, MergeEngine,
    MergeResult, MergeStatus, StorageMergerDispatcher, SynchronizationContext,
    SynchronizationScope,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Exit code when merging left conflicts behind
const EXIT_CONFLICTS: i32 = 2;

#[derive(Parser)]
#[command(name = "synctree")]
#[command(author = "Synctree Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Three-way synchronization and merge of directory trees", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what differs between a local tree and a remote tree
    Status {
        /// Local working directory
        local: PathBuf,

        /// Last synchronized state (common ancestor)
        ancestor: PathBuf,

        /// Current remote state
        remote: PathBuf,

        /// Output results as JSON
        #[arg(long)]
        json: bool,

        /// Disable ANSI colors in output
        #[arg(long)]
        no_color: bool,
    },

    /// Bring remote changes into the local tree
    Merge {
        /// Local working directory
        local: PathBuf,

        /// Last synchronized state (common ancestor)
        ancestor: PathBuf,

        /// Current remote state
        remote: PathBuf,

        /// Take the remote state for conflicting files
        #[arg(long)]
        ignore_local_changes: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Three-way merge of single files
    MergeFile {
        /// Common ancestor
        ancestor: PathBuf,

        /// Local version (also decides the merger)
        local: PathBuf,

        /// Remote version
        remote: PathBuf,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the configuration file, creating it with defaults if missing
    Config {
        /// Keep the configuration next to the executable
        #[arg(long)]
        portable: bool,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    // Initialize tracing to stderr (so JSON output can go cleanly to stdout)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Status {
            local,
            ancestor,
            remote,
            json,
            no_color,
        } => run_status(&local, &ancestor, &remote, json, no_color),
        Commands::Merge {
            local,
            ancestor,
            remote,
            ignore_local_changes,
            json,
        } => run_merge(&local, &ancestor, &remote, ignore_local_changes, json),
        Commands::MergeFile {
            ancestor,
            local,
            remote,
            output,
        } => run_merge_file(&ancestor, &local, &remote, output.as_deref()),
        Commands::Config { portable, json } => run_config(portable, json),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{:#}", e);
            std::process::exit(1);
        }
    }
}

fn load_sync_config() -> anyhow::Result<SyncConfig> {
    let loaded = load_config(false).context("failed to load configuration")?;
    if loaded.exists {
        info!("Using configuration {}", loaded.path.display());
    }
    Ok(loaded.config)
}

#[derive(Serialize)]
struct ConfigReport<'a> {
    path: String,
    portable: bool,
    created: bool,
    config: &'a SyncConfig,
}

fn run_config(portable: bool, json: bool) -> anyhow::Result<i32> {
    let loaded = ensure_config(portable).context("failed to prepare configuration")?;
    let report = ConfigReport {
        path: loaded.path.display().to_string(),
        portable: loaded.portable,
        created: !loaded.exists,
        config: &loaded.config,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(0);
    }

    let status = if report.created { "created" } else { "existing" };
    println!("{} ({})", report.path, status);
    println!("  refresh_batch_size:         {}", report.config.refresh_batch_size);
    println!("  content_types:              {}", report.config.content_types.len());
    println!("  text_extensions:            {}", report.config.text_extensions.join(", "));
    println!(
        "  treat_unknown_utf8_as_text: {}",
        report.config.treat_unknown_utf8_as_text
    );
    Ok(0)
}

/// Refreshed three-way context over the three directories
fn open_context(
    local: &Path,
    ancestor: &Path,
    remote: &Path,
    config: SyncConfig,
) -> anyhow::Result<Arc<SynchronizationContext>> {
    for (label, path) in [("Local", local), ("Ancestor", ancestor), ("Remote", remote)] {
        if !path.is_dir() {
            bail!("{} directory does not exist: {}", label, path.display());
        }
    }

    info!("Synchronizing:");
    info!("  Local:    {}", local.display());
    info!("  Ancestor: {}", ancestor.display());
    info!("  Remote:   {}", remote.display());

    let context = SynchronizationContext::new(
        SynchronizationScope::for_roots(vec![ResourcePath::root()]),
        SyncType::ThreeWay,
        Arc::new(LocalStore::new(local.to_path_buf())),
        Arc::new(DirectoryRemoteProvider::new(
            Some(ancestor.to_path_buf()),
            remote.to_path_buf(),
        )),
    )
    .with_config(config);

    context.refresh_all(None).context("refresh failed")?;
    Ok(Arc::new(context))
}

#[derive(Serialize)]
struct StatusReport {
    local: String,
    ancestor: String,
    remote: String,
    summary: StatusSummary,
    entries: Vec<StatusEntry>,
}

#[derive(Serialize, Default)]
struct StatusSummary {
    total: usize,
    incoming: usize,
    outgoing: usize,
    conflicting: usize,
}

#[derive(Serialize)]
struct StatusEntry {
    path: String,
    direction: String,
    kind: String,
    conflict: bool,
}

fn build_status_report(
    local: &Path,
    ancestor: &Path,
    remote: &Path,
    diffs: &[Diff],
) -> anyhow::Result<StatusReport> {
    let mut summary = StatusSummary {
        total: diffs.len(),
        ..Default::default()
    };
    let mut entries = Vec::with_capacity(diffs.len());

    for diff in diffs {
        let classification = classify_diff(diff)?;
        match classification.direction {
            Direction::Incoming => summary.incoming += 1,
            Direction::Outgoing => summary.outgoing += 1,
            Direction::Conflicting => summary.conflicting += 1,
        }
        entries.push(StatusEntry {
            path: diff.path().to_string(),
            direction: classification.direction.to_string(),
            kind: classification.kind.to_string(),
            conflict: classification.conflict,
        });
    }

    Ok(StatusReport {
        local: local.to_string_lossy().to_string(),
        ancestor: ancestor.to_string_lossy().to_string(),
        remote: remote.to_string_lossy().to_string(),
        summary,
        entries,
    })
}

fn run_status(
    local: &Path,
    ancestor: &Path,
    remote: &Path,
    json: bool,
    no_color: bool,
) -> anyhow::Result<i32> {
    let config = load_sync_config()?;
    let context = open_context(local, ancestor, remote, config)?;
    let diffs = context.get_diffs(context.scope().traversals());
    let report = build_status_report(local, ancestor, remote, &diffs)?;
    context.dispose();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(0);
    }

    let use_color = !no_color && std::io::stdout().is_terminal();

    println!("\n{}", "=".repeat(80));
    println!("Synchronization Status");
    println!("{}", "=".repeat(80));

    for entry in &report.entries {
        let symbol = match entry.direction.as_str() {
            "incoming" => "  <<  ",
            "outgoing" => "  >>  ",
            _ => "  !!  ",
        };
        let (color, reset) = if use_color {
            (
                match entry.direction.as_str() {
                    "incoming" => "\x1b[34m", // Blue
                    "outgoing" => "\x1b[33m", // Yellow
                    _ => "\x1b[31m",          // Red
                },
                "\x1b[0m",
            )
        } else {
            ("", "")
        };
        println!("{}{}{} {:<8} {}", color, symbol, reset, entry.kind, entry.path);
    }

    println!("\n{}", "=".repeat(80));
    println!("Summary:");
    println!("  Out of sync:     {}", report.summary.total);
    println!("  Incoming:        {} (<<)", report.summary.incoming);
    println!("  Outgoing:        {} (>>)", report.summary.outgoing);
    println!("  Conflicting:     {} (!!)", report.summary.conflicting);
    println!("{}", "=".repeat(80));

    Ok(0)
}

#[derive(Serialize)]
struct MergeReport {
    ok: bool,
    merged: Vec<String>,
    conflicting: Vec<String>,
}

impl From<&MergeStatus> for MergeReport {
    fn from(status: &MergeStatus) -> Self {
        Self {
            ok: status.ok,
            merged: status.merged_paths.iter().map(ToString::to_string).collect(),
            conflicting: status
                .conflicting_paths
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

fn run_merge(
    local: &Path,
    ancestor: &Path,
    remote: &Path,
    ignore_local_changes: bool,
    json: bool,
) -> anyhow::Result<i32> {
    let config = load_sync_config()?;
    let dispatcher = StorageMergerDispatcher::from_config(&config)?;
    let context = open_context(local, ancestor, remote, config)?;
    let engine = MergeEngine::new(Arc::clone(&context), dispatcher);

    let traversals = context.scope().traversals().to_vec();
    let status = engine
        .merge_all(&traversals, ignore_local_changes)
        .context("merge failed")?;
    context.dispose();

    let report = MergeReport::from(&status);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for path in &report.merged {
            println!("merged      {}", path);
        }
        for path in &report.conflicting {
            println!("conflicting {}", path);
        }
        println!(
            "\n{} merged, {} conflicting",
            report.merged.len(),
            report.conflicting.len()
        );
    }

    Ok(if status.ok { 0 } else { EXIT_CONFLICTS })
}

fn run_merge_file(
    ancestor: &Path,
    local: &Path,
    remote: &Path,
    output: Option<&Path>,
) -> anyhow::Result<i32> {
    let read = |path: &Path| {
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))
    };
    let ancestor_content = read(ancestor)?;
    let local_content = read(local)?;
    let remote_content = read(remote)?;

    let config = load_sync_config()?;
    let dispatcher = StorageMergerDispatcher::from_config(&config)?;
    let name = local
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let path = ResourcePath::from_segments([name])?;

    let result = dispatcher.merge(
        &path,
        Some(ancestor_content.as_slice()),
        &local_content,
        &remote_content,
    );
    match result {
        MergeResult::Merged(bytes) => {
            match output {
                Some(out) => fs::write(out, &bytes)
                    .with_context(|| format!("failed to write {}", out.display()))?,
                None => std::io::stdout().write_all(&bytes)?,
            }
            info!("Merged {} cleanly", local.display());
            Ok(0)
        }
        MergeResult::Conflict => {
            eprintln!("conflict: {} could not be merged automatically", local.display());
            Ok(EXIT_CONFLICTS)
        }
        MergeResult::Error(reason) => bail!("merge of {} failed: {}", local.display(), reason),
    }
}
