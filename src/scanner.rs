use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::abort::AbortSignal;
use crate::cache::ResultCache;
use crate::classify::{Classification, Classifier};
use crate::config::ResolvedConfig;
use crate::domain::{DatasetFileInfo, ProcessingState, ProcessorKind};
use crate::error::ScanError;
use crate::fs_util::now_local;
use crate::integrity::IntegrityChecker;
use crate::processor::ProcessorRegistry;
use crate::status::{ProgressEvent, ProgressSink, RunState, ScanSummary, StatusWriter};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessOutcome {
    pub path: PathBuf,
    pub success: bool,
    pub state: ProcessingState,
    pub kind: Option<ProcessorKind>,
    pub dataset_name: Option<String>,
}

impl ProcessOutcome {
    fn unsupported(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            success: false,
            state: ProcessingState::NotProcessed,
            kind: None,
            dataset_name: None,
        }
    }
}

/// Runs datasets through classifier, cache and processors, one at a time.
pub struct Scanner {
    pub(crate) config: ResolvedConfig,
    pub(crate) classifier: Classifier,
    pub(crate) registry: ProcessorRegistry,
    pub(crate) cache: ResultCache,
    pub(crate) abort: AbortSignal,
    pub(crate) status: StatusWriter,
    pub(crate) integrity: Option<Box<dyn IntegrityChecker>>,
}

impl Scanner {
    pub fn new(config: ResolvedConfig, registry: ProcessorRegistry) -> Self {
        let cache = ResultCache::from_config(&config);
        let abort = AbortSignal::new(
            config.paths.abort_file.as_std_path(),
            config.abort_poll_interval,
        );
        let status = StatusWriter::new(
            config
                .paths
                .status_file
                .as_ref()
                .map(|path| path.clone().into_std_path_buf()),
            config.status_interval,
        );
        let classifier = Classifier::new().with_generic_fallback(config.process_all_extensions);

        Self {
            config,
            classifier,
            registry,
            cache,
            abort,
            status,
            integrity: None,
        }
    }

    pub fn with_integrity_checker(mut self, checker: impl IntegrityChecker + 'static) -> Self {
        self.integrity = Some(Box::new(checker));
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn summary(&self) -> &ScanSummary {
        self.status.summary()
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// Loads both cache tables. A cache that cannot be read is reported and
    /// left unloaded so it is never overwritten this run.
    pub fn open(&mut self) {
        if !self.config.use_cache {
            return;
        }
        if let Err(err) = self.cache.load_datasets(false) {
            warn!(error = %err, "dataset cache not loaded");
        }
        if let Err(err) = self.cache.load_directories(false) {
            warn!(error = %err, "directory cache not loaded");
        }
    }

    /// Classifies and processes one file or directory.
    pub fn process_path(
        &mut self,
        path: &Path,
        output_dir: Option<&Path>,
        sink: &dyn ProgressSink,
    ) -> ProcessOutcome {
        match self.classifier.classify(path) {
            Some(classification) => self.process_classified(path, classification, output_dir, sink),
            None => {
                warn!(path = %path.display(), "unsupported dataset type");
                sink.event(ProgressEvent {
                    message: format!("phase=Classify; unsupported {}", path.display()),
                    elapsed: None,
                });
                self.status.summary_mut().unsupported += 1;
                ProcessOutcome::unsupported(path)
            }
        }
    }

    fn process_classified(
        &mut self,
        path: &Path,
        classification: Classification,
        output_dir: Option<&Path>,
        sink: &dyn ProgressSink,
    ) -> ProcessOutcome {
        let kind = classification.kind;
        let Some(processor) = self.registry.get(kind) else {
            warn!(path = %path.display(), %kind, "no processor registered");
            self.status.summary_mut().unsupported += 1;
            return ProcessOutcome::unsupported(path);
        };

        let dataset_name = processor.dataset_name(path);
        let outcome = |success: bool, state: ProcessingState| ProcessOutcome {
            path: path.to_path_buf(),
            success,
            state,
            kind: Some(kind),
            dataset_name: Some(dataset_name.clone()),
        };

        self.status.begin_item(path);
        sink.event(ProgressEvent {
            message: format!("phase=Classify; {kind} {dataset_name}"),
            elapsed: None,
        });

        if self.config.use_cache && !self.config.reprocess_existing {
            if let Some(cached) = self.cache.cached_dataset(&dataset_name) {
                if cached.file_size_bytes > 0 || !self.config.reprocess_if_cached_size_zero {
                    debug!(dataset = %dataset_name, "skipping; found in cache");
                    sink.event(ProgressEvent {
                        message: format!("phase=Cache; {dataset_name} already cached"),
                        elapsed: None,
                    });
                    self.status
                        .summary_mut()
                        .record(ProcessingState::SkippedSinceFoundInCache);
                    self.status.maybe_write();
                    return outcome(true, ProcessingState::SkippedSinceFoundInCache);
                }
            }
        }

        let start = Instant::now();
        let mut info = DatasetFileInfo::new(dataset_name.clone(), now_local());
        let mut attempts = 0;
        let result = loop {
            attempts += 1;
            match processor.process_data_file(path, &mut info) {
                Ok(()) => break Ok(()),
                Err(err) => {
                    if attempts >= self.config.retry.max_attempts
                        || !recently_written(path, self.config.retry.recency_window)
                    {
                        break Err(err);
                    }
                    warn!(
                        dataset = %dataset_name,
                        error = %err,
                        attempt = attempts,
                        "processing failed on a recently written dataset; retrying"
                    );
                    sink.event(ProgressEvent {
                        message: format!("retry {attempts} for {dataset_name}"),
                        elapsed: Some(start.elapsed()),
                    });
                    thread::sleep(self.config.retry.delay);
                }
            }
        };

        let state = match result {
            Ok(()) => {
                info.finalize_acq_times();
                if self.config.create_output_files {
                    if let Some(output_dir) = output_dir {
                        if let Err(err) = processor.create_output_files(path, &info, output_dir) {
                            warn!(dataset = %dataset_name, error = %err, "output files not written");
                        }
                    }
                }
                info!(
                    dataset = %dataset_name,
                    %kind,
                    bytes = info.file_size_bytes,
                    "processed dataset"
                );
                self.record_result(info);
                ProcessingState::ProcessedSuccessfully
            }
            Err(err) => {
                warn!(dataset = %dataset_name, error = %err, "processing failed");
                if attempts > 1 && !info.dataset_name.is_empty() {
                    // Retries ran out on a file still being written; keep what was salvaged.
                    info.finalize_acq_times();
                    self.record_result(info);
                }
                ProcessingState::FailedProcessing
            }
        };

        sink.event(ProgressEvent {
            message: format!("phase=Store; {dataset_name} {}", state_label(state)),
            elapsed: Some(start.elapsed()),
        });
        self.status.summary_mut().record(state);
        self.status.maybe_write();
        outcome(state == ProcessingState::ProcessedSuccessfully, state)
    }

    fn record_result(&mut self, info: DatasetFileInfo) {
        if !self.config.use_cache {
            return;
        }
        if let Err(err) = self.cache.upsert_dataset(info) {
            warn!(error = %err, "result not cached");
            return;
        }
        if let Err(err) = self.cache.autosave() {
            warn!(error = %err, "autosave failed");
        }
    }

    /// Flushes the cache and writes the final status.
    ///
    /// A failed flush only fails the run when integrity checking was requested,
    /// since the directory table is the product of that run.
    pub fn finish(mut self) -> Result<ScanSummary, ScanError> {
        let flushed = self.cache.close();
        let aborted = self.abort.is_aborted();
        self.status.summary_mut().aborted = aborted;

        let run_state = match (&flushed, aborted) {
            (Err(_), _) if self.config.check_integrity => RunState::Failed,
            (_, true) => RunState::Aborted,
            _ => RunState::Complete,
        };
        self.status.finish(run_state);

        if let Err(err) = flushed {
            if self.config.check_integrity {
                return Err(err);
            }
        }
        Ok(self.status.summary().clone())
    }
}

fn state_label(state: ProcessingState) -> &'static str {
    match state {
        ProcessingState::NotProcessed => "not processed",
        ProcessingState::ProcessedSuccessfully => "processed",
        ProcessingState::FailedProcessing => "failed",
        ProcessingState::SkippedSinceFoundInCache => "skipped",
    }
}

/// True when the path was created or modified within `window` of now, which
/// suggests the instrument is still writing it.
pub(crate) fn recently_written(path: &Path, window: Duration) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    let now = SystemTime::now();
    let is_recent = |time: std::io::Result<SystemTime>| {
        time.ok()
            .map(|time| now.duration_since(time).unwrap_or(Duration::ZERO) <= window)
            .unwrap_or(false)
    };
    is_recent(metadata.modified()) || is_recent(metadata.created())
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use camino::Utf8PathBuf;

    use super::*;
    use crate::processor::DatasetProcessor;
    use crate::status::NoopSink;

    /// Fails the first `failures` calls, then reports a fixed size.
    struct FlakyProcessor {
        calls: Rc<Cell<u32>>,
        failures: u32,
        size: u64,
        created: Rc<RefCell<Vec<PathBuf>>>,
    }

    impl DatasetProcessor for FlakyProcessor {
        fn dataset_name(&self, path: &Path) -> String {
            path.file_stem().unwrap().to_string_lossy().into_owned()
        }

        fn process_data_file(
            &self,
            _path: &Path,
            info: &mut DatasetFileInfo,
        ) -> Result<(), ScanError> {
            self.calls.set(self.calls.get() + 1);
            info.scan_count = 7;
            if self.calls.get() <= self.failures {
                return Err(ScanError::processing(info.dataset_name.clone(), "file locked"));
            }
            info.file_size_bytes = self.size;
            Ok(())
        }

        fn create_output_files(
            &self,
            path: &Path,
            _info: &DatasetFileInfo,
            _output_dir: &Path,
        ) -> Result<(), ScanError> {
            self.created.borrow_mut().push(path.to_path_buf());
            Ok(())
        }
    }

    struct Fixture {
        _temp: tempfile::TempDir,
        raw: PathBuf,
        config: ResolvedConfig,
        calls: Rc<Cell<u32>>,
        created: Rc<RefCell<Vec<PathBuf>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = tempfile::tempdir().unwrap();
            let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
            let mut config = ResolvedConfig::with_base_dir(&base);
            config.retry.delay = Duration::ZERO;
            let raw = temp.path().join("X.raw");
            fs::write(&raw, b"spectra").unwrap();
            Self {
                _temp: temp,
                raw,
                config,
                calls: Rc::new(Cell::new(0)),
                created: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn scanner(&self, failures: u32, size: u64) -> Scanner {
            let mut registry = ProcessorRegistry::empty();
            registry.register(
                ProcessorKind::ThermoRaw,
                FlakyProcessor {
                    calls: self.calls.clone(),
                    failures,
                    size,
                    created: self.created.clone(),
                },
            );
            let mut scanner = Scanner::new(self.config.clone(), registry);
            scanner.open();
            scanner
        }

        fn cached(&self, name: &str, size: u64) {
            let mut cache = ResultCache::from_config(&self.config);
            let mut info = DatasetFileInfo::new(name, now_local());
            info.file_size_bytes = size;
            cache.upsert_dataset(info).unwrap();
            cache.close().unwrap();
        }
    }

    #[test]
    fn processes_and_caches_new_dataset() {
        let fixture = Fixture::new();
        let mut scanner = fixture.scanner(0, 100);
        let out = fixture.raw.parent().unwrap().to_path_buf();

        let outcome = scanner.process_path(&fixture.raw, Some(&out), &NoopSink);
        assert!(outcome.success);
        assert_eq!(outcome.state, ProcessingState::ProcessedSuccessfully);
        assert_eq!(outcome.dataset_name.as_deref(), Some("X"));
        assert_eq!(scanner.cache().cached_dataset("X").unwrap().scan_count, 7);
        assert_eq!(fixture.created.borrow().len(), 1);

        let summary = scanner.finish().unwrap();
        assert_eq!(summary.processed, 1);
        assert!(fixture.config.paths.dataset_cache.exists());
    }

    #[test]
    fn cached_dataset_is_skipped() {
        let fixture = Fixture::new();
        fixture.cached("X", 100);
        let mut scanner = fixture.scanner(0, 5);

        let outcome = scanner.process_path(&fixture.raw, None, &NoopSink);
        assert_eq!(outcome.state, ProcessingState::SkippedSinceFoundInCache);
        assert_eq!(fixture.calls.get(), 0);
        assert_eq!(scanner.cache().cached_dataset("X").unwrap().file_size_bytes, 100);
    }

    #[test]
    fn zero_size_cache_entry_is_reprocessed_when_enabled() {
        let mut fixture = Fixture::new();
        fixture.cached("X", 0);
        fixture.config.reprocess_if_cached_size_zero = true;
        let mut scanner = fixture.scanner(0, 5);

        let outcome = scanner.process_path(&fixture.raw, None, &NoopSink);
        assert_eq!(outcome.state, ProcessingState::ProcessedSuccessfully);
        assert_eq!(fixture.calls.get(), 1);
        assert_eq!(scanner.cache().cached_dataset("X").unwrap().file_size_bytes, 5);
    }

    #[test]
    fn zero_size_cache_entry_is_skipped_by_default() {
        let fixture = Fixture::new();
        fixture.cached("X", 0);
        let mut scanner = fixture.scanner(0, 5);
        let outcome = scanner.process_path(&fixture.raw, None, &NoopSink);
        assert_eq!(outcome.state, ProcessingState::SkippedSinceFoundInCache);
    }

    #[test]
    fn reprocess_existing_ignores_cache() {
        let mut fixture = Fixture::new();
        fixture.cached("X", 100);
        fixture.config.reprocess_existing = true;
        let mut scanner = fixture.scanner(0, 5);
        let outcome = scanner.process_path(&fixture.raw, None, &NoopSink);
        assert_eq!(outcome.state, ProcessingState::ProcessedSuccessfully);
    }

    #[test]
    fn recently_written_file_is_retried() {
        let fixture = Fixture::new();
        let mut scanner = fixture.scanner(1, 9);
        let outcome = scanner.process_path(&fixture.raw, None, &NoopSink);
        assert!(outcome.success);
        assert_eq!(fixture.calls.get(), 2);
    }

    #[test]
    fn exhausted_retries_keep_partial_row() {
        let fixture = Fixture::new();
        let mut scanner = fixture.scanner(10, 9);
        let outcome = scanner.process_path(&fixture.raw, None, &NoopSink);
        assert!(!outcome.success);
        assert_eq!(outcome.state, ProcessingState::FailedProcessing);
        assert_eq!(fixture.calls.get(), 2);
        let partial = scanner.cache().cached_dataset("X").unwrap();
        assert_eq!(partial.scan_count, 7);
        assert_eq!(partial.file_size_bytes, 0);
    }

    #[test]
    fn attempt_cap_bounds_processor_calls() {
        let mut fixture = Fixture::new();
        fixture.config.retry.max_attempts = 1;
        let mut scanner = fixture.scanner(10, 9);
        let outcome = scanner.process_path(&fixture.raw, None, &NoopSink);
        assert_eq!(outcome.state, ProcessingState::FailedProcessing);
        assert_eq!(fixture.calls.get(), 1);
        // No retry ran, so nothing is salvaged.
        assert!(scanner.cache().cached_dataset("X").is_none());
    }

    #[test]
    fn old_file_is_not_retried() {
        let mut fixture = Fixture::new();
        fixture.config.retry.recency_window = Duration::ZERO;
        let mut scanner = fixture.scanner(1, 9);
        let outcome = scanner.process_path(&fixture.raw, None, &NoopSink);
        assert_eq!(outcome.state, ProcessingState::FailedProcessing);
        assert_eq!(fixture.calls.get(), 1);
        assert!(scanner.cache().cached_dataset("X").is_none());
    }

    #[test]
    fn unsupported_path_never_reaches_a_processor() {
        let fixture = Fixture::new();
        let notes = fixture.raw.with_file_name("notes.txt");
        fs::write(&notes, b"hello").unwrap();
        let mut scanner = fixture.scanner(0, 1);

        let outcome = scanner.process_path(&notes, None, &NoopSink);
        assert!(!outcome.success);
        assert_eq!(outcome.state, ProcessingState::NotProcessed);
        assert_eq!(fixture.calls.get(), 0);
        assert_eq!(scanner.summary().unsupported, 1);
    }
}
