//! Directory load orchestration.
//!
//! Discovers spreadsheet files under a root, optionally clears the catalog
//! for a full reload, and fans the files out over a bounded pool of
//! [`BatchIngestor`] workers. Each worker owns its own connection; the only
//! state they share is the work queue and the store's ledger constraints.
//!
//! Every file is fingerprinted before fan-out. Files whose content matches
//! an earlier path in the same load never reach a worker, so byte-identical
//! copies cannot be ingested twice by racing workers.

use anyhow::Result;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

use crate::config::Config;
use crate::db;
use crate::ingest::{self, BatchIngestor, FileOutcome, Fingerprint, IngestError};
use crate::ledger::{self, LedgerError};
use crate::migrate;
use crate::models::LoadSummary;
use crate::progress::{LoadProgressEvent, LoadProgressReporter, ProgressMode};
use crate::reader::TabularReader;

/// Files never treated as input: hidden files and Office lock files.
const DEFAULT_EXCLUDES: &[&str] = &["**/.*", "**/~$*"];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("no input files ({extensions}) found in {root}")]
    NoInputFiles { root: String, extensions: String },

    #[error("failed to scan {root}: {message}")]
    Discovery { root: String, message: String },

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    #[error("failed to clear catalog: {0}")]
    Clear(#[from] LedgerError),
}

/// Body of a load request.
#[derive(Debug, Clone, Deserialize)]
pub struct LoadRequest {
    pub directory: PathBuf,
    #[serde(default)]
    pub force_reload: bool,
}

/// CLI entry point for `bookshelf load`.
pub async fn run_load(
    config: &Config,
    directory: &Path,
    force_reload: bool,
    progress: ProgressMode,
) -> Result<()> {
    let reporter: Arc<dyn LoadProgressReporter> = Arc::from(progress.reporter());
    let summary = load_directory(config, directory, force_reload, reporter).await?;

    println!("load {}", directory.display());
    println!("  files attempted: {}", summary.attempted);
    println!("  files succeeded: {}", summary.succeeded);
    println!("  files skipped: {}", summary.skipped);
    println!("  files failed: {}", summary.failed);
    println!("  rows written: {}", summary.rows);
    if summary.failed > 0 {
        println!("partial");
    } else {
        println!("ok");
    }
    Ok(())
}

pub async fn load_directory(
    config: &Config,
    directory: &Path,
    force_reload: bool,
    progress: Arc<dyn LoadProgressReporter>,
) -> Result<LoadSummary, LoadError> {
    if !directory.is_dir() {
        return Err(LoadError::NotADirectory(directory.display().to_string()));
    }
    // Ledger keys are absolute so loads from different working directories agree.
    let root = std::fs::canonicalize(directory)
        .map_err(|_| LoadError::NotADirectory(directory.display().to_string()))?;

    progress.report(LoadProgressEvent::Discovering {
        root: root.display().to_string(),
    });
    let files = discover_files(&root, &config.ingest.extensions)?;
    if files.is_empty() {
        return Err(LoadError::NoInputFiles {
            root: root.display().to_string(),
            extensions: config.ingest.extensions.join(", "),
        });
    }

    // Startup: the only globally fatal failure point.
    let pool = db::connect(config).await?;
    migrate::create_schema(&pool).await?;
    if force_reload {
        let mut conn = pool.acquire().await?;
        ledger::clear(&mut conn).await?;
        tracing::info!("cleared catalog and ledger for full reload");
    }
    pool.close().await;

    let total = files.len() as u64;
    let parallelism = worker_count(config.ingest.max_workers, files.len());
    let completion = Completion {
        progress: Arc::clone(&progress),
        done: Arc::new(AtomicU64::new(0)),
        total,
    };

    let plan = plan_dispatch(fingerprint_all(files, parallelism).await);

    let mut summary = LoadSummary {
        attempted: total,
        ..LoadSummary::default()
    };
    for (path, original) in &plan.duplicates {
        tracing::info!(
            file = %path.display(),
            original = %original.display(),
            "same content as another file in this load, skipping"
        );
        summary.skipped += 1;
        completion.finish(path, "duplicate");
    }
    for (path, err) in &plan.failed {
        tracing::error!(file = %path.display(), error = %err, "cannot fingerprint file");
        summary.failed += 1;
        completion.finish(path, "failed");
    }

    let workers = worker_count(config.ingest.max_workers, plan.unique.len());
    tracing::info!(
        root = %root.display(),
        files = total,
        unique = plan.unique.len(),
        workers,
        "starting load"
    );

    let queue = Arc::new(Mutex::new(plan.unique.into_iter()));
    let reader = Arc::new(TabularReader::default());

    let mut set = JoinSet::new();
    for worker_id in 0..workers {
        let ctx = WorkerContext {
            id: worker_id,
            config: config.clone(),
            queue: Arc::clone(&queue),
            reader: Arc::clone(&reader),
            progress: Arc::clone(&progress),
            completion: completion.clone(),
        };
        set.spawn(run_worker(ctx));
    }

    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(tally) => {
                summary.succeeded += tally.succeeded;
                summary.skipped += tally.skipped;
                summary.failed += tally.failed;
                summary.rows += tally.rows;
            }
            Err(e) => tracing::error!(error = %e, "ingestion worker aborted"),
        }
    }

    // Files never picked up (every worker lost its connection) or lost to a
    // crashed worker.
    let accounted = summary.succeeded + summary.skipped + summary.failed;
    if accounted < total {
        tracing::error!(
            unprocessed = total - accounted,
            "some files were not processed by any worker"
        );
        summary.failed += total - accounted;
    }

    tracing::info!(
        attempted = summary.attempted,
        succeeded = summary.succeeded,
        skipped = summary.skipped,
        failed = summary.failed,
        rows = summary.rows,
        "load finished"
    );
    Ok(summary)
}

/// min(configured cap, available parallelism, number of files), at least 1.
pub fn worker_count(max_workers: usize, files: usize) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    max_workers.min(cpus).min(files).max(1)
}

/// Recursively lists files under `root` whose extension is in `extensions`
/// (case-insensitive), sorted by path.
pub fn discover_files(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, LoadError> {
    let discovery_err = |message: String| LoadError::Discovery {
        root: root.display().to_string(),
        message,
    };

    let include: Vec<String> = extensions
        .iter()
        .map(|ext| format!("**/*.{}", ext.trim_start_matches('.')))
        .collect();
    let include_set = build_globset(&include).map_err(|e| discovery_err(e.to_string()))?;
    let excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    let exclude_set = build_globset(&excludes).map_err(|e| discovery_err(e.to_string()))?;

    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(|e| discovery_err(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push(path.to_path_buf());
    }

    files.sort();
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            GlobBuilder::new(pattern)
                .case_insensitive(true)
                .literal_separator(false)
                .build()?,
        );
    }
    builder.build()
}

/// Files split by content before any worker runs.
#[derive(Debug, Default)]
struct DispatchPlan {
    /// First path (in sorted order) for each distinct content hash.
    unique: Vec<(PathBuf, Fingerprint)>,
    /// Later paths with the same content, paired with the path kept.
    duplicates: Vec<(PathBuf, PathBuf)>,
    failed: Vec<(PathBuf, IngestError)>,
}

/// Fingerprints every file, at most `parallelism` at a time.
async fn fingerprint_all(
    files: Vec<PathBuf>,
    parallelism: usize,
) -> Vec<(PathBuf, Result<Fingerprint, IngestError>)> {
    let permits = Arc::new(Semaphore::new(parallelism.max(1)));
    let mut set = JoinSet::new();
    for path in files {
        let permits = Arc::clone(&permits);
        set.spawn(async move {
            let _permit = permits.acquire_owned().await;
            let fp = ingest::fingerprint(&path).await;
            (path, fp)
        });
    }

    let mut out = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(pair) => out.push(pair),
            // The file stays unaccounted and is counted as failed later.
            Err(e) => tracing::error!(error = %e, "fingerprint task aborted"),
        }
    }
    out
}

fn plan_dispatch(
    mut fingerprinted: Vec<(PathBuf, Result<Fingerprint, IngestError>)>,
) -> DispatchPlan {
    fingerprinted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut plan = DispatchPlan::default();
    let mut first_by_hash: HashMap<String, PathBuf> = HashMap::new();
    for (path, fp) in fingerprinted {
        match fp {
            Ok(fp) => match first_by_hash.get(&fp.hash) {
                Some(original) => plan.duplicates.push((path, original.clone())),
                None => {
                    first_by_hash.insert(fp.hash.clone(), path.clone());
                    plan.unique.push((path, fp));
                }
            },
            Err(e) => plan.failed.push((path, e)),
        }
    }
    plan
}

/// Shared completion counter behind `FileDone` progress events.
#[derive(Clone)]
struct Completion {
    progress: Arc<dyn LoadProgressReporter>,
    done: Arc<AtomicU64>,
    total: u64,
}

impl Completion {
    fn finish(&self, path: &Path, outcome: &'static str) {
        let n = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        self.progress.report(LoadProgressEvent::FileDone {
            file: path.display().to_string(),
            outcome,
            n,
            total: self.total,
        });
    }
}

struct WorkerContext {
    id: usize,
    config: Config,
    queue: Arc<Mutex<std::vec::IntoIter<(PathBuf, Fingerprint)>>>,
    reader: Arc<TabularReader>,
    progress: Arc<dyn LoadProgressReporter>,
    completion: Completion,
}

impl WorkerContext {
    fn next_file(&self) -> Option<(PathBuf, Fingerprint)> {
        self.queue.lock().ok().and_then(|mut q| q.next())
    }
}

/// Pulls files off the shared queue until it is empty.
async fn run_worker(ctx: WorkerContext) -> LoadSummary {
    let mut tally = LoadSummary::default();

    let conn = match db::open_connection(&ctx.config).await {
        Ok(conn) => conn,
        Err(e) => {
            // Leave the queue to the other workers.
            tracing::error!(worker = ctx.id, error = %e, "worker could not connect to store");
            return tally;
        }
    };
    let mut ingestor = BatchIngestor::new(
        conn,
        Arc::clone(&ctx.reader),
        &ctx.config.ingest,
        Arc::clone(&ctx.progress),
    );

    while let Some((path, fp)) = ctx.next_file() {
        match ingestor.ingest_fingerprinted(&path, &fp).await {
            Ok(outcome) => {
                if outcome.is_skip() {
                    tally.skipped += 1;
                } else {
                    tally.succeeded += 1;
                }
                if let FileOutcome::Ingested { rows, .. } = &outcome {
                    tally.rows += *rows;
                }
                ctx.completion.finish(&path, outcome.label());
            }
            Err(e) => {
                log_failure(ctx.id, &path, &e);
                tally.failed += 1;
                tally.rows += e.committed_rows();
                ctx.completion.finish(&path, "failed");
            }
        }
    }

    ingestor.close().await;
    tally
}

fn log_failure(worker: usize, path: &Path, err: &IngestError) {
    match err {
        IngestError::InputUnreadable(_) => {
            tracing::warn!(worker, file = %path.display(), error = %err, "skipping unreadable file")
        }
        _ => tracing::error!(worker, file = %path.display(), error = %err, "file ingestion failed"),
    }
}
