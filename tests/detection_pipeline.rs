use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use talkscan::models::{Category, DetectionResult, DetectorMode, MatchConfidence};
use talkscan::services::detection::{
    analyze, analyze_with_pattern, AnalyzeOptions, BackendRequest, Candidate, DetectionBackend, DetectionError,
    ShortcutCatalog,
};
use talkscan::services::{format_for_sheets, ExportFormat};

const DISCUSSION: &str = "\
Editor A: The lead gives this fringe view far too much space per WP:UNDUE. \
See also WP:NPOV, which is not negotiable.\n\n\
Editor B: The sources are blogs, so WP:RS and WP:SPS both apply. Please stop edit warring, WP:3RR is close.\n\n\
Editor C: I'd say WP:IAR here, but WP:CONSENSUS says otherwise. Also MOS:LEAD is relevant for the intro. \
Nobody is arguing WP:NPOV does not apply; the question is WP:DUE weight.\n\n\
Editor A: Fine. Let's not beat a dead horse (WP:STICK).";

/// Returns one candidate per literal alias hit, like a well-behaved model would
struct ScriptedBackend {
    calls: AtomicUsize,
    saw_loose: AtomicBool,
    fail_marker: Option<&'static str>,
    fail_first_calls: usize,
    delay: Option<Duration>,
}

impl ScriptedBackend {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            saw_loose: AtomicBool::new(false),
            fail_marker: None,
            fail_first_calls: 0,
            delay: None,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DetectionBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn find_candidates(&self, request: &BackendRequest<'_>) -> Result<Vec<Candidate>, DetectionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if request.loose_mode {
            self.saw_loose.store(true, Ordering::SeqCst);
        }
        if call < self.fail_first_calls {
            return Err(DetectionError::BackendUnavailable("warming up".to_string()));
        }
        if let Some(marker) = self.fail_marker {
            if request.chunk_text.contains(marker) {
                return Err(DetectionError::BackendMalformedResponse("garbled".to_string()));
            }
        }
        if request.entries.iter().any(|e| e.category != request.category) {
            return Err(DetectionError::BackendMalformedResponse("category leak".to_string()));
        }

        let mut candidates = Vec::new();
        for entry in &request.entries {
            for alias in &entry.aliases {
                for _ in request.chunk_text.match_indices(alias.as_str()) {
                    candidates.push(Candidate {
                        code: entry.code.clone(),
                        matched_text: alias.clone(),
                        location_hint: None,
                    });
                }
            }
        }
        if request.category == Category::Guideline {
            if request.chunk_text.contains("MOS:LEAD") {
                candidates.push(Candidate {
                    code: "MOS:LEAD".to_string(),
                    matched_text: "MOS:LEAD".to_string(),
                    location_hint: Some("Editor C".to_string()),
                });
            }
        }
        if request.category == Category::Policy {
            candidates.push(Candidate {
                code: "WP:BLP".to_string(),
                matched_text: "this violates WP:BLP".to_string(),
                location_hint: None,
            });
        }
        Ok(candidates)
    }
}

fn small_chunks() -> AnalyzeOptions {
    AnalyzeOptions {
        max_chunk_size: 160,
        overlap_size: 40,
        ..AnalyzeOptions::default()
    }
}

fn spans(result: &DetectionResult) -> Vec<(String, usize, usize)> {
    result
        .occurrences
        .iter()
        .map(|o| (o.code.clone(), o.start_offset, o.end_offset))
        .collect()
}

#[test]
fn pattern_detection_end_to_end() {
    let catalog = ShortcutCatalog::builtin();
    let result = analyze_with_pattern(DISCUSSION, &catalog, &AnalyzeOptions::default());

    assert_eq!(result.detector_used, DetectorMode::Pattern);
    assert!(!result.fell_back);
    for occ in &result.occurrences {
        assert_eq!(&DISCUSSION[occ.start_offset..occ.end_offset], occ.matched_text);
        assert_eq!(occ.confidence, MatchConfidence::Exact);
    }

    let counts = result.count_by_code();
    assert_eq!(counts.get("WP:NPOV"), Some(&4));
    assert_eq!(counts.get("WP:RS"), Some(&2));
    assert_eq!(counts.get("WP:EW"), Some(&1));
    assert_eq!(counts.get("WP:CON"), Some(&1));
    assert_eq!(counts.get("MOS:LEAD"), Some(&1));
    assert_eq!(counts.get("WP:STICK"), Some(&1));
    assert_eq!(counts.get("WP:BLP"), None);
}

#[test]
fn chunk_size_does_not_change_pattern_results() {
    let catalog = ShortcutCatalog::builtin();
    let whole = analyze_with_pattern(DISCUSSION, &catalog, &AnalyzeOptions::default());
    let chunked = analyze_with_pattern(DISCUSSION, &catalog, &small_chunks());

    assert!(chunked.chunk_count > 1);
    assert_eq!(spans(&whole), spans(&chunked));
}

#[tokio::test]
async fn model_path_relocates_and_merges() {
    let catalog = Arc::new(ShortcutCatalog::builtin());
    let backend = Arc::new(ScriptedBackend::new());
    let options = small_chunks();

    let result = analyze(DISCUSSION, catalog.clone(), &options, Some(backend.clone())).await;

    assert_eq!(result.detector_used, DetectorMode::Model);
    assert!(!result.fell_back);
    assert_eq!(backend.calls(), result.chunk_count * Category::ALL.len());

    // Hallucinated quote never makes it into the result
    assert!(result.occurrences.iter().all(|o| o.code != "WP:BLP"));

    // Overlapping chunks report the same mention twice; it appears once
    let pattern = analyze_with_pattern(DISCUSSION, &catalog, &options);
    assert_eq!(spans(&result), spans(&pattern));

    for occ in &result.occurrences {
        assert_eq!(&DISCUSSION[occ.start_offset..occ.end_offset], occ.matched_text);
    }
}

#[tokio::test]
async fn one_failing_chunk_falls_back_to_patterns() {
    let catalog = Arc::new(ShortcutCatalog::builtin());
    let backend = Arc::new(ScriptedBackend {
        fail_marker: Some("Editor B"),
        ..ScriptedBackend::new()
    });
    let options = small_chunks();

    let result = analyze(DISCUSSION, catalog.clone(), &options, Some(backend)).await;

    assert_eq!(result.detector_used, DetectorMode::Pattern);
    assert!(result.fell_back);
    let pattern = analyze_with_pattern(DISCUSSION, &catalog, &options);
    assert_eq!(result.occurrences, pattern.occurrences);
}

#[tokio::test]
async fn single_failed_call_falls_back_with_default_options() {
    let catalog = Arc::new(ShortcutCatalog::builtin());
    let backend = Arc::new(ScriptedBackend {
        fail_first_calls: 1,
        ..ScriptedBackend::new()
    });
    let options = AnalyzeOptions::default();

    let result = analyze(DISCUSSION, catalog.clone(), &options, Some(backend)).await;

    assert_eq!(result.detector_used, DetectorMode::Pattern);
    assert!(result.fell_back);
    assert_eq!(result, DetectionResult { fell_back: true, ..analyze_with_pattern(DISCUSSION, &catalog, &options) });
}

#[tokio::test]
async fn retries_are_opt_in() {
    let catalog = Arc::new(ShortcutCatalog::builtin());
    let backend = Arc::new(ScriptedBackend {
        fail_first_calls: 1,
        ..ScriptedBackend::new()
    });
    let options = AnalyzeOptions {
        max_concurrency: 1,
        max_attempts: 2,
        ..AnalyzeOptions::default()
    };

    let result = analyze(DISCUSSION, catalog, &options, Some(backend.clone())).await;

    assert_eq!(result.detector_used, DetectorMode::Model);
    assert!(!result.fell_back);
    assert_eq!(backend.calls(), Category::ALL.len() + 1);
}

#[tokio::test]
async fn slow_backend_times_out_and_falls_back() {
    let catalog = Arc::new(ShortcutCatalog::builtin());
    let backend = Arc::new(ScriptedBackend {
        delay: Some(Duration::from_secs(5)),
        ..ScriptedBackend::new()
    });
    let options = AnalyzeOptions {
        request_timeout: Duration::from_millis(50),
        max_attempts: 1,
        ..AnalyzeOptions::default()
    };

    let started = Instant::now();
    let result = analyze(DISCUSSION, catalog, &options, Some(backend)).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.detector_used, DetectorMode::Pattern);
    assert!(result.fell_back);
    assert!(!result.occurrences.is_empty());
}

#[tokio::test]
async fn dropped_analysis_stops_outstanding_requests() {
    let catalog = Arc::new(ShortcutCatalog::builtin());
    let backend = Arc::new(ScriptedBackend {
        delay: Some(Duration::from_millis(200)),
        ..ScriptedBackend::new()
    });

    let cancelled = tokio::time::timeout(
        Duration::from_millis(20),
        analyze(DISCUSSION, catalog, &small_chunks(), Some(backend.clone())),
    )
    .await;
    assert!(cancelled.is_err());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn pattern_only_never_calls_backend() {
    let catalog = Arc::new(ShortcutCatalog::builtin());
    let backend = Arc::new(ScriptedBackend::new());
    let options = AnalyzeOptions {
        backend_available: false,
        ..AnalyzeOptions::default()
    };

    let result = analyze(DISCUSSION, catalog, &options, Some(backend.clone())).await;

    assert_eq!(result.detector_used, DetectorMode::Pattern);
    assert!(!result.fell_back);
    assert_eq!(backend.calls(), 0);
}

#[tokio::test]
async fn loose_mode_reaches_backend() {
    let catalog = Arc::new(ShortcutCatalog::builtin());
    let backend = Arc::new(ScriptedBackend::new());
    let options = AnalyzeOptions {
        loose_mode: true,
        ..AnalyzeOptions::default()
    };

    let result = analyze("Per WP:V.", catalog, &options, Some(backend.clone())).await;

    assert!(backend.saw_loose.load(Ordering::SeqCst));
    assert_eq!(result.detector_used, DetectorMode::Model);
    assert_eq!(result.count_by_code().get("WP:V"), Some(&1));
}

#[tokio::test]
async fn empty_text_with_backend() {
    let catalog = Arc::new(ShortcutCatalog::builtin());
    let backend = Arc::new(ScriptedBackend::new());

    let result = analyze("", catalog, &AnalyzeOptions::default(), Some(backend.clone())).await;

    assert!(result.occurrences.is_empty());
    assert_eq!(result.detector_used, DetectorMode::Model);
    assert!(!result.fell_back);
    assert_eq!(backend.calls(), 0);
}

#[test]
fn export_of_pattern_result() {
    let catalog = ShortcutCatalog::builtin();
    let result = analyze_with_pattern(DISCUSSION, &catalog, &AnalyzeOptions::default());

    let tsv = format_for_sheets(&result, DISCUSSION, ExportFormat::Tsv).unwrap();
    let first_row = tsv.lines().nth(1).unwrap();
    assert!(first_row.starts_with("Policy\tWP:NPOV\t4\t"));
    assert!(first_row.ends_with("https://en.wikipedia.org/wiki/WP:NPOV"));
    assert!(tsv.lines().skip(1).all(|l| !l.contains('\n') && l.split('\t').count() == 5));
}

/// Tracks how many requests are in flight at once
struct CountingBackend {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl DetectionBackend for CountingBackend {
    fn name(&self) -> &str {
        "counting"
    }

    async fn find_candidates(&self, _request: &BackendRequest<'_>) -> Result<Vec<Candidate>, DetectionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_is_bounded() {
    let catalog = Arc::new(ShortcutCatalog::builtin());
    let backend = Arc::new(CountingBackend {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        calls: AtomicUsize::new(0),
    });
    let options = AnalyzeOptions {
        max_concurrency: 2,
        ..small_chunks()
    };

    let result = analyze(DISCUSSION, catalog, &options, Some(backend.clone())).await;

    assert_eq!(result.detector_used, DetectorMode::Model);
    let calls = backend.calls.load(Ordering::SeqCst);
    assert!(calls > 6, "only {} calls", calls);
    assert_eq!(calls, result.chunk_count * Category::ALL.len());
    let peak = backend.peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 2, "peak in-flight {}", peak);
}
