// Detection Orchestrator
// Single entry point. Chooses the detector path per analysis, fans model calls
// out over (chunk, category) pairs and falls back to pattern matching for the
// whole analysis on the first backend failure.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::models::{Category, DetectionResult, DetectorMode, Occurrence, TextChunk};

use super::backend::DetectionBackend;
use super::catalog::ShortcutCatalog;
use super::chunker;
use super::error::DetectionError;
use super::merger::merge_into_result;
use super::model_detector;
use super::pattern_detector;

const RETRY_BACKOFF_MS: u64 = 400;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzeOptions {
    pub loose_mode: bool,
    /// Caller wants model-assisted detection when a backend is supplied
    pub backend_available: bool,
    pub max_chunk_size: usize,
    pub overlap_size: usize,
    pub dedup_tolerance: usize,
    pub max_concurrency: usize,
    pub request_timeout: Duration,
    /// Attempts per (chunk, category) call; 1 means the first failure falls back
    pub max_attempts: usize,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            loose_mode: false,
            backend_available: true,
            max_chunk_size: 3000,
            overlap_size: 300,
            dedup_tolerance: 0,
            max_concurrency: 4,
            request_timeout: Duration::from_secs(60),
            max_attempts: 1,
        }
    }
}

impl AnalyzeOptions {
    /// Clamp values so chunking and fan-out can never fail on bad input
    fn sanitized(&self) -> Self {
        let max_chunk_size = self.max_chunk_size.max(1);
        let overlap_size = if self.overlap_size >= max_chunk_size {
            max_chunk_size / 2
        } else {
            self.overlap_size
        };
        Self {
            max_chunk_size,
            overlap_size,
            max_concurrency: self.max_concurrency.max(1),
            max_attempts: self.max_attempts.max(1),
            ..self.clone()
        }
    }
}

/// Analyze one discussion. Always returns a result: backend failures degrade to
/// the pattern path with `fell_back = true`.
pub async fn analyze(
    text: &str,
    catalog: Arc<ShortcutCatalog>,
    options: &AnalyzeOptions,
    backend: Option<Arc<dyn DetectionBackend>>,
) -> DetectionResult {
    let analysis_id = Uuid::new_v4();
    let span = info_span!("analysis", id = %analysis_id);
    run_analysis(text, catalog, options.sanitized(), backend)
        .instrument(span)
        .await
}

async fn run_analysis(
    text: &str,
    catalog: Arc<ShortcutCatalog>,
    options: AnalyzeOptions,
    backend: Option<Arc<dyn DetectionBackend>>,
) -> DetectionResult {
    let started = Instant::now();
    let mode = match (&backend, options.backend_available) {
        (Some(_), true) => DetectorMode::Model,
        _ => DetectorMode::Pattern,
    };
    info!(
        "[ORCHESTRATOR] Starting analysis: {} bytes, mode={}, loose={}",
        text.len(),
        mode,
        options.loose_mode
    );

    let chunks = make_chunks(text, &options);

    if mode == DetectorMode::Pattern {
        let fell_back = options.backend_available;
        if fell_back {
            warn!("[ORCHESTRATOR] No backend configured, using pattern detection");
        }
        return pattern_result(&chunks, &catalog, &options, fell_back);
    }

    if text.trim().is_empty() {
        return DetectionResult::empty(DetectorMode::Model, false);
    }

    let Some(backend) = backend else {
        return pattern_result(&chunks, &catalog, &options, true);
    };

    match run_model_path(&chunks, catalog.clone(), &options, backend).await {
        Ok(per_chunk) => {
            let result = merge_into_result(
                per_chunk,
                DetectorMode::Model,
                false,
                chunks.len(),
                options.dedup_tolerance,
            );
            info!(
                "[ORCHESTRATOR] Model analysis done: occurrences={}, chunks={}, elapsed_ms={}",
                result.occurrences.len(),
                chunks.len(),
                started.elapsed().as_millis()
            );
            result
        }
        Err(e) => {
            warn!("[ORCHESTRATOR] Model detection failed, falling back to patterns: {}", e);
            pattern_result(&chunks, &catalog, &options, true)
        }
    }
}

/// Pattern path only; never contacts a backend
pub fn analyze_with_pattern(text: &str, catalog: &ShortcutCatalog, options: &AnalyzeOptions) -> DetectionResult {
    let options = options.sanitized();
    let chunks = make_chunks(text, &options);
    pattern_result(&chunks, catalog, &options, false)
}

fn make_chunks(text: &str, options: &AnalyzeOptions) -> Vec<Arc<TextChunk>> {
    let chunks = chunker::split(text, options.max_chunk_size, options.overlap_size).unwrap_or_else(|e| {
        warn!("[ORCHESTRATOR] Chunking failed ({}), analyzing as one chunk", e);
        vec![TextChunk::whole(text)]
    });
    chunks.into_iter().map(Arc::new).collect()
}

fn pattern_result(
    chunks: &[Arc<TextChunk>],
    catalog: &ShortcutCatalog,
    options: &AnalyzeOptions,
    fell_back: bool,
) -> DetectionResult {
    let per_chunk: Vec<Vec<Occurrence>> = chunks
        .iter()
        .map(|chunk| pattern_detector::detect(chunk, catalog))
        .collect();
    let result = merge_into_result(
        per_chunk,
        DetectorMode::Pattern,
        fell_back,
        chunks.len(),
        options.dedup_tolerance,
    );
    info!(
        "[ORCHESTRATOR] Pattern analysis done: occurrences={}, chunks={}, fell_back={}",
        result.occurrences.len(),
        chunks.len(),
        fell_back
    );
    result
}

async fn run_model_path(
    chunks: &[Arc<TextChunk>],
    catalog: Arc<ShortcutCatalog>,
    options: &AnalyzeOptions,
    backend: Arc<dyn DetectionBackend>,
) -> Result<Vec<Vec<Occurrence>>, DetectionError> {
    let semaphore = Arc::new(Semaphore::new(options.max_concurrency));
    let mut join_set: JoinSet<Result<(usize, Vec<Occurrence>), DetectionError>> = JoinSet::new();

    for (index, chunk) in chunks.iter().enumerate() {
        for category in Category::ALL {
            let chunk = chunk.clone();
            let catalog = catalog.clone();
            let backend = backend.clone();
            let semaphore = semaphore.clone();
            let options = options.clone();

            join_set.spawn(async move {
                call_with_retry(&chunk, &catalog, category, &options, backend.as_ref(), &semaphore)
                    .await
                    .map(|occurrences| (index, occurrences))
            });
        }
    }

    let total = join_set.len();
    let mut done = 0usize;
    let mut per_chunk: Vec<Vec<Occurrence>> = vec![Vec::new(); chunks.len()];

    while let Some(res) = join_set.join_next().await {
        match res {
            Ok(Ok((index, occurrences))) => {
                done += 1;
                per_chunk[index].extend(occurrences);
                if done == total || done % 5 == 0 {
                    info!("[ORCHESTRATOR] Model progress: {}/{}", done, total);
                }
            }
            Ok(Err(e)) if e.triggers_fallback() => {
                join_set.abort_all();
                return Err(e);
            }
            Ok(Err(e)) => {
                done += 1;
                warn!("[ORCHESTRATOR] Call result ignored: {}", e);
            }
            Err(e) => {
                join_set.abort_all();
                return Err(DetectionError::BackendUnavailable(format!("task failed: {}", e)));
            }
        }
    }

    Ok(per_chunk)
}

async fn call_with_retry(
    chunk: &TextChunk,
    catalog: &ShortcutCatalog,
    category: Category,
    options: &AnalyzeOptions,
    backend: &dyn DetectionBackend,
    semaphore: &Semaphore,
) -> Result<Vec<Occurrence>, DetectionError> {
    let mut last_err: Option<DetectionError> = None;

    for attempt in 1..=options.max_attempts {
        // Permit covers the request only, not the backoff
        let res = {
            let _permit = semaphore
                .acquire()
                .await
                .map_err(|_| DetectionError::BackendUnavailable("semaphore closed".to_string()))?;
            let fut = model_detector::detect(chunk, catalog, category, options.loose_mode, backend);
            tokio::time::timeout(options.request_timeout, fut).await
        };

        match res {
            Ok(Ok(occurrences)) => return Ok(occurrences),
            Ok(Err(e)) => {
                warn!(
                    "[ORCHESTRATOR] {} error chunk={} category={} attempt={}: {}",
                    backend.name(),
                    chunk.sequence_index,
                    category,
                    attempt,
                    e
                );
                last_err = Some(e);
            }
            Err(_) => {
                warn!(
                    "[ORCHESTRATOR] {} timeout chunk={} category={} attempt={} ({}s)",
                    backend.name(),
                    chunk.sequence_index,
                    category,
                    attempt,
                    options.request_timeout.as_secs()
                );
                last_err = Some(DetectionError::Timeout(options.request_timeout.as_secs()));
            }
        }

        if attempt < options.max_attempts {
            tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64)).await;
        }
    }

    Err(last_err.unwrap_or_else(|| DetectionError::BackendUnavailable("unknown error".to_string())))
}
