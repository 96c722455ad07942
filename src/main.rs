use std::path::PathBuf;
use std::process;
use std::sync::Mutex;
use std::time::Instant;

use ahash::{HashMap, HashMapExt};
use anyhow::{bail, Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use tracing_subscriber::EnvFilter;

use versync::{
    diff_histories, execute_merge, peerid_for_root, plan_merge, scan, GlobFilter, GroupMap,
    GroupedPath, History, HistoryEntry, HistoryStore, LocalRootFetcher, MergeAction, MergeActionType,
    MergeLog, NameFilter, RevisionStore, SyncConfig, SystemClock,
};

#[derive(Parser)]
#[command(
    name = "vsync",
    version,
    about = "Syncs two trees by comparing their version histories, not just their bytes"
)]
struct Cli {
    /// Source tree root
    source: PathBuf,

    /// Destination tree root
    dest: PathBuf,

    /// Path to a vsync.toml config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Apply planned deletions (without this, deletes are reported but skipped)
    #[arg(short, long)]
    delete: bool,

    /// Show the merge plan without touching the destination tree
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,

    /// Quiet mode (no progress or summary output)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Number of hashing threads (default: CPU count)
    #[arg(short = 'j', long, value_name = "THREADS")]
    threads: Option<usize>,

    /// Exclude paths matching this glob (can be used multiple times)
    #[arg(short, long, value_name = "PATTERN")]
    exclude: Vec<String>,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {e:#}", "Error:".red());
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    install_logging(cli.verbose, cli.quiet);

    if let Some(t) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(t)
            .build_global()
            .map_err(|e| anyhow::anyhow!("failed to configure thread pool: {e}"))?;
    }

    if !cli.source.exists() {
        bail!("source does not exist: {}", cli.source.display());
    }
    if !cli.dest.exists() {
        bail!("destination does not exist: {}", cli.dest.display());
    }

    let config = match &cli.config {
        Some(path) => SyncConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => SyncConfig::default(),
    };

    let mut ignore_globs = config.ignore_globs.clone();
    ignore_globs.extend(cli.exclude.iter().cloned());
    let name_filter = NameFilter::new(config.ignore_names.iter().cloned());
    let hash_algorithm = config.hash_algorithm.0;

    let mut group_map = GroupMap::new();
    group_map.register("root", cli.source.clone())?;
    let mut dest_group_map = GroupMap::new();
    dest_group_map.register("root", cli.dest.clone())?;

    for (groupid, root) in &config.group_map {
        group_map
            .register(groupid.clone(), root.clone())
            .with_context(|| format!("registering configured group {groupid:?} -> {}", root.display()))?;
        dest_group_map
            .register(groupid.clone(), root.clone())
            .with_context(|| format!("registering configured group {groupid:?} -> {}", root.display()))?;
    }

    let source_peerid = peerid_for_root(&cli.source);
    let dest_peerid = peerid_for_root(&cli.dest);

    let source_db_path = cli.source.join(&config.db_relpath);
    let dest_db_path = cli.dest.join(&config.db_relpath);
    if let Some(parent) = source_db_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    if let Some(parent) = dest_db_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    let source_conn = Mutex::new(versync::history::open(&source_db_path).with_context(|| format!("opening {}", source_db_path.display()))?);
    let dest_conn = Mutex::new(versync::history::open(&dest_db_path).with_context(|| format!("opening {}", dest_db_path.display()))?);
    let source_store = HistoryStore::new(&source_conn);
    let dest_store = HistoryStore::new(&dest_conn);

    let source_glob_filter = GlobFilter::new(&cli.source, &ignore_globs)?;
    let dest_glob_filter = GlobFilter::new(&cli.dest, &ignore_globs)?;

    if cli.verbose && !cli.quiet {
        println!("Scanning: {}", cli.source.display());
    }
    let source_entries = scan(
        &cli.source,
        config.group_root_marker.as_deref(),
        &name_filter,
        &source_glob_filter,
        hash_algorithm,
        &source_store,
        &source_peerid,
        &group_map,
        &SystemClock,
    )
    .context("scanning source tree")?;

    if cli.verbose && !cli.quiet {
        println!("Scanning: {}", cli.dest.display());
    }
    let dest_entries = scan(
        &cli.dest,
        config.group_root_marker.as_deref(),
        &name_filter,
        &dest_glob_filter,
        hash_algorithm,
        &dest_store,
        &dest_peerid,
        &dest_group_map,
        &SystemClock,
    )
    .context("scanning destination tree")?;

    if cli.verbose && !cli.quiet {
        println!("{} history rows on source, {} on destination", source_entries.len(), dest_entries.len());
    }

    let diffs = diff_histories(&histories_by_gpath(&source_entries), &histories_by_gpath(&dest_entries));
    let revisions = RevisionStore::new(cli.dest.join(&config.revisions_relpath));
    let mut actions = plan_merge(&diffs, &latest_by_hash(&dest_entries), &revisions);

    if !cli.delete {
        let (kept, skipped_deletes): (Vec<_>, Vec<_>) =
            actions.into_iter().partition(|a| a.action_type != MergeActionType::Delete);
        if !skipped_deletes.is_empty() && !cli.quiet {
            println!(
                "{} {} deletion(s) not applied (pass --delete to apply)",
                "Note:".yellow(),
                skipped_deletes.len()
            );
        }
        actions = kept;
    }

    if actions.is_empty() {
        if !cli.quiet {
            println!("{}", "In sync".green());
        }
        return Ok(());
    }

    if !cli.quiet {
        print_plan_summary(&actions, cli.verbose);
    }

    if cli.dry_run {
        if !cli.quiet {
            println!("(dry run)");
        }
        return Ok(());
    }

    if !cli.yes && !cli.quiet {
        print!("Proceed? [y/N] ");
        std::io::Write::flush(&mut std::io::stdout())?;
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            return Ok(());
        }
    }

    let merge_log = MergeLog::new(&dest_conn, SystemClock);
    let fetcher = LocalRootFetcher { source_root: cli.source.clone() };
    let start = Instant::now();
    let report = execute_merge(
        actions,
        &cli.dest,
        &revisions,
        &dest_store,
        &merge_log,
        &dest_peerid,
        hash_algorithm,
        &fetcher,
        &SystemClock,
    )
    .context("executing merge plan")?;
    let elapsed = start.elapsed();

    if !cli.quiet {
        if report.skipped.is_empty() {
            println!(
                "{} {} action(s) applied in {:.2}s",
                "Done.".green().bold(),
                report.applied.len(),
                elapsed.as_secs_f64()
            );
        } else {
            println!(
                "{} {} action(s) applied, {} skipped in {:.2}s",
                "Done.".green().bold(),
                report.applied.len(),
                report.skipped.len(),
                elapsed.as_secs_f64()
            );
            if cli.verbose {
                for (action_type, reason) in &report.skipped {
                    println!("  {} {}: {}", "skipped".red(), action_type.as_str(), reason);
                }
            }
        }
    }

    Ok(())
}

fn install_logging(verbose: bool, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn histories_by_gpath(entries: &[HistoryEntry]) -> HashMap<GroupedPath, History> {
    let mut by_gpath: HashMap<GroupedPath, Vec<HistoryEntry>> = HashMap::new();
    for entry in entries {
        by_gpath
            .entry(GroupedPath::new(entry.groupid.clone(), entry.path.clone()))
            .or_default()
            .push(entry.clone());
    }
    by_gpath.into_iter().map(|(gpath, entries)| (gpath, History::new(entries))).collect()
}

fn latest_by_hash(entries: &[HistoryEntry]) -> HashMap<String, HistoryEntry> {
    let mut out = HashMap::new();
    for history in histories_by_gpath(entries).values() {
        if !history.latest.deleted() && !history.latest.hash.is_empty() {
            out.insert(history.latest.hash.as_str().to_string(), history.latest.clone());
        }
    }
    out
}

fn print_plan_summary(actions: &[MergeAction], verbose: bool) {
    let mut counts: HashMap<MergeActionType, usize> = HashMap::new();
    for action in actions {
        *counts.entry(action.action_type).or_default() += 1;
    }

    let order = [
        MergeActionType::Update,
        MergeActionType::Copy,
        MergeActionType::Move,
        MergeActionType::Touch,
        MergeActionType::UpdateHistory,
        MergeActionType::Delete,
        MergeActionType::Undelete,
    ];

    let parts: Vec<String> = order
        .into_iter()
        .filter_map(|action_type| counts.get(&action_type).map(|n| format!("{n} {}", action_type.as_str())))
        .collect();
    println!("{}", parts.join(", ").cyan());

    if verbose {
        for action in actions.iter().take(20) {
            println!("  {} {}", action.action_type.as_str(), action.path);
        }
        if actions.len() > 20 {
            println!("  ... {} more", actions.len() - 20);
        }
    }
}
