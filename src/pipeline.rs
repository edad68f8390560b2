//! Pass one (dispatch) and the end-to-end ingestion entry point.
//!
//! Records are processed either on the calling thread or by a fixed pool of rayon
//! workers. Every worker owns a [`WorkerContext`] (its own filter and store) built
//! by the caller's factory; only [`RecordOutcome`] values travel back, and they are
//! merged into the [`WikiIndex`] on the coordinating thread after each chunk.

use crate::config::{ARTICLES_TABLE, BODIES_TABLE, CHUNK_MULTIPLIER, PROGRESS_INTERVAL};
use crate::extract::Extractor;
use crate::filter::WikiTextFilter;
use crate::index::WikiIndex;
use crate::models::{RawRecord, RecordOutcome};
use crate::redirects::resolve_redirects;
use crate::stats::IngestStats;
use crate::store::{Connector, Inserted, ResilientStore, StoreError};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

static REDIRECT_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*#REDIRECT\s*:?\s*\[\[([^\]]*)\]\]").unwrap());

/// Per-worker state: never shared between workers.
pub struct WorkerContext<C: Connector> {
    pub filter: WikiTextFilter,
    pub store: ResilientStore<C>,
}

impl<C: Connector> WorkerContext<C> {
    pub fn new(filter: WikiTextFilter, store: ResilientStore<C>) -> Self {
        Self { filter, store }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// 0 or 1 selects the sequential path.
    pub workers: usize,
    /// Stop after roughly this many records.
    pub limit: Option<u64>,
    pub chunk_multiplier: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            limit: None,
            chunk_multiplier: CHUNK_MULTIPLIER,
        }
    }
}

/// Returns the target title if `body` is a redirect page.
pub fn redirect_target(body: &str) -> Option<&str> {
    REDIRECT_REGEX
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|target| !target.is_empty())
}

/// Processes a single record.
///
/// Redirects are returned as [`RecordOutcome::Alias`] without touching the store.
/// Other records get their body filtered and stored, then an article row pointing
/// at the new body. Rejected writes are suppressed; only fatal store errors
/// (exhausted retries, connect failures) are returned as `Err`.
pub fn process_one<C: Connector>(
    ctx: &mut WorkerContext<C>,
    record: RawRecord,
) -> Result<RecordOutcome, StoreError> {
    if let Some(target) = redirect_target(&record.body) {
        return Ok(RecordOutcome::Alias {
            title: record.title,
            target: target.to_string(),
            source_id: record.source_id,
        });
    }

    let body = ctx.filter.normalize(&record.body);
    let inserted = ctx
        .store
        .insert(BODIES_TABLE, &[("body", body.into())], Some("id"), true)?;

    let Some(body_id) = inserted.and_then(Inserted::id) else {
        debug!(title = %record.title, "Body insert failed, skipping record");
        return Ok(RecordOutcome::Skipped);
    };

    // the body id is reserved even if the article row is rejected
    ctx.store.insert(
        ARTICLES_TABLE,
        &[
            ("title", record.title.as_str().into()),
            ("body", body_id.into()),
            ("aid", record.source_id.into()),
        ],
        Some("id"),
        true,
    )?;

    Ok(RecordOutcome::Direct {
        title: record.title,
        body_id,
    })
}

fn merge(index: &mut WikiIndex, outcome: RecordOutcome, stats: &IngestStats) {
    match &outcome {
        RecordOutcome::Direct { .. } => stats.inc_articles(),
        RecordOutcome::Alias { .. } => stats.inc_redirects(),
        RecordOutcome::Skipped => stats.inc_skipped(),
    }
    index.record(outcome);
}

fn run_worker<C: Connector>(
    ctx: &mut WorkerContext<C>,
    records: Vec<RawRecord>,
) -> Result<Vec<RecordOutcome>, StoreError> {
    let mut outcomes = Vec::with_capacity(records.len());
    for record in records {
        outcomes.push(process_one(ctx, record)?);
        ctx.store.commit()?;
    }
    Ok(outcomes)
}

/// Round-robin split of a chunk into one batch per worker.
fn partition(chunk: Vec<RawRecord>, parts: usize) -> Vec<Vec<RawRecord>> {
    let mut batches: Vec<Vec<RawRecord>> = (0..parts)
        .map(|_| Vec::with_capacity(chunk.len() / parts + 1))
        .collect();
    for (i, record) in chunk.into_iter().enumerate() {
        batches[i % parts].push(record);
    }
    batches
}

fn remaining(processed: u64, limit: Option<u64>) -> Option<u64> {
    limit.map(|l| l.saturating_sub(processed))
}

fn make_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {pos} records {msg}") {
        pb.set_style(style);
    }
    pb
}

/// Pass one: processes every record and returns the merged index.
///
/// An `Err` item from `records` aborts the run.
pub fn dispatch<C, F, I>(
    records: I,
    factory: &F,
    options: &PipelineOptions,
    stats: &IngestStats,
) -> Result<WikiIndex>
where
    C: Connector,
    F: Fn() -> WorkerContext<C>,
    I: Iterator<Item = Result<RawRecord>>,
{
    let pb = make_spinner();
    let index = if options.workers <= 1 {
        dispatch_sequential(records, factory, options.limit, stats, &pb)?
    } else {
        dispatch_parallel(records, factory, options, stats, &pb)?
    };
    pb.finish_and_clear();

    let (canonical, redirects, skipped) = index.stats();
    info!(canonical, redirects, skipped, "Pass one complete");

    Ok(index)
}

fn dispatch_sequential<C, F, I>(
    records: I,
    factory: &F,
    limit: Option<u64>,
    stats: &IngestStats,
    pb: &ProgressBar,
) -> Result<WikiIndex>
where
    C: Connector,
    F: Fn() -> WorkerContext<C>,
    I: Iterator<Item = Result<RawRecord>>,
{
    let mut ctx = factory();
    let mut index = WikiIndex::new();
    let mut processed = 0u64;

    for record in records {
        if remaining(processed, limit) == Some(0) {
            info!(limit, "Record limit reached");
            break;
        }

        let record = record.context("Dump stream failed")?;
        let outcome = process_one(&mut ctx, record).context("Fatal store error in pass one")?;
        ctx.store.commit().context("Commit failed")?;
        merge(&mut index, outcome, stats);

        processed += 1;
        stats.add_processed(1);
        if processed % PROGRESS_INTERVAL == 0 {
            pb.set_position(processed);
        }
    }

    ctx.store.close().context("Failed to close store")?;
    Ok(index)
}

fn dispatch_parallel<C, F, I>(
    mut records: I,
    factory: &F,
    options: &PipelineOptions,
    stats: &IngestStats,
    pb: &ProgressBar,
) -> Result<WikiIndex>
where
    C: Connector,
    F: Fn() -> WorkerContext<C>,
    I: Iterator<Item = Result<RawRecord>>,
{
    let workers = options.workers;
    let chunk_size = workers * options.chunk_multiplier.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("wikidb-worker-{i}"))
        .build()
        .context("Failed to build worker pool")?;

    let mut contexts: Vec<WorkerContext<C>> = (0..workers).map(|_| factory()).collect();
    let mut index = WikiIndex::new();
    let mut processed = 0u64;

    info!(workers, chunk_size, "Dispatching to worker pool");

    loop {
        let take = match remaining(processed, options.limit) {
            Some(0) => {
                info!(limit = options.limit, "Record limit reached");
                break;
            }
            Some(left) => chunk_size.min(left as usize),
            None => chunk_size,
        };

        let chunk: Vec<RawRecord> = records
            .by_ref()
            .take(take)
            .collect::<Result<_>>()
            .context("Dump stream failed")?;
        if chunk.is_empty() {
            break;
        }
        let chunk_len = chunk.len() as u64;
        let started = Instant::now();
        let batches = partition(chunk, workers);

        let results: Vec<Result<Vec<RecordOutcome>, StoreError>> = pool.install(|| {
            contexts
                .par_iter_mut()
                .zip(batches)
                .map(|(ctx, batch)| run_worker(ctx, batch))
                .collect()
        });

        for result in results {
            for outcome in result.context("Worker aborted with a fatal store error")? {
                merge(&mut index, outcome, stats);
            }
        }

        processed += chunk_len;
        stats.add_processed(chunk_len);
        pb.set_position(processed);
        debug!(
            records = chunk_len,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chunk merged"
        );
    }

    for ctx in &mut contexts {
        ctx.store.close().context("Failed to close worker store")?;
    }
    Ok(index)
}

/// Outcome of a complete [`ingest`] run.
#[derive(Debug)]
pub struct IngestReport {
    pub stats: IngestStats,
    pub dispatch_time: Duration,
    pub resolve_time: Duration,
}

/// Runs both passes over the dump at `path`.
///
/// `factory` builds a fresh worker context; it is called once per worker (or once
/// for the sequential path) and once more for redirect resolution.
pub fn ingest<C, F>(
    path: &str,
    extractor: &Extractor,
    factory: F,
    options: &PipelineOptions,
) -> Result<IngestReport>
where
    C: Connector,
    F: Fn() -> WorkerContext<C>,
{
    let stats = IngestStats::new();

    let start = Instant::now();
    let records = extractor.stream(path)?;
    let index = dispatch(records, &factory, options, &stats)?;
    let dispatch_time = start.elapsed();
    info!(
        duration_secs = dispatch_time.as_secs_f64(),
        records = stats.processed(),
        "Records stored"
    );

    let start = Instant::now();
    let mut resolver = factory();
    resolve_redirects(&index, &mut resolver.store, &stats)
        .context("Redirect resolution failed")?;
    resolver.store.close().context("Failed to close store")?;
    let resolve_time = start.elapsed();

    Ok(IngestReport {
        stats,
        dispatch_time,
        resolve_time,
    })
}
