//! Tab-delimited result cache.
//!
//! Two independent tables are kept in memory and flushed to their backing
//! files: dataset metadata keyed by dataset name, and directory integrity
//! summaries keyed by directory path. Each table tracks whether it has
//! unsaved changes so autosave only touches the disk when needed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ResolvedConfig;
use crate::domain::{DatasetFileInfo, DirectoryIntegrityInfo, whole_seconds};
use crate::error::ScanError;
use crate::fs_util::write_bytes_atomic;

pub const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const DATASET_COLUMNS: [&str; 9] = [
    "DatasetID",
    "DatasetName",
    "FileExtension",
    "AcqTimeStart",
    "AcqTimeEnd",
    "ScanCount",
    "FileSizeBytes",
    "InfoLastModified",
    "FileModificationDate",
];

pub const DIRECTORY_COLUMNS: [&str; 5] = [
    "FolderID",
    "FolderPath",
    "FileCount",
    "FileCountFailedIntegrity",
    "InfoLastModified",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableState {
    NotInitialized,
    InitializedButUnmodified,
    Modified,
}

trait CacheRow: Sized {
    const COLUMNS: &'static [&'static str];
    const MIN_COLUMNS: usize;

    fn key(&self) -> &str;
    fn to_fields(&self) -> Vec<String>;
    fn from_record(record: &csv::StringRecord) -> Option<Self>;
}

impl CacheRow for DatasetFileInfo {
    const COLUMNS: &'static [&'static str] = &DATASET_COLUMNS;
    // Files written before FileModificationDate existed have eight columns.
    const MIN_COLUMNS: usize = 8;

    fn key(&self) -> &str {
        &self.dataset_name
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.dataset_id.to_string(),
            self.dataset_name.clone(),
            self.file_extension.clone(),
            format_date(self.acq_time_start),
            format_date(self.acq_time_end),
            self.scan_count.to_string(),
            self.file_size_bytes.to_string(),
            format_date(self.info_last_modified),
            format_date(self.file_system_modification_time),
        ]
    }

    fn from_record(record: &csv::StringRecord) -> Option<Self> {
        if record.len() < Self::MIN_COLUMNS {
            return None;
        }
        let dataset_id = record.get(0)?.trim().parse::<i64>().ok()?;
        let dataset_name = record.get(1)?.to_string();
        if dataset_name.is_empty() {
            return None;
        }
        let info_last_modified = parse_date(record.get(7)?)?;
        let modified = match record.get(8) {
            Some(value) if !value.trim().is_empty() => parse_date(value)?,
            _ => info_last_modified,
        };

        Some(DatasetFileInfo {
            dataset_id,
            dataset_name,
            file_extension: record.get(2)?.to_string(),
            acq_time_start: parse_date(record.get(3)?)?,
            acq_time_end: parse_date(record.get(4)?)?,
            scan_count: record.get(5)?.trim().parse().ok()?,
            file_size_bytes: record.get(6)?.trim().parse().ok()?,
            file_system_creation_time: modified,
            file_system_modification_time: modified,
            info_last_modified,
            overall_quality_score: 0.0,
            instrument_files: Vec::new(),
        })
    }
}

impl CacheRow for DirectoryIntegrityInfo {
    const COLUMNS: &'static [&'static str] = &DIRECTORY_COLUMNS;
    const MIN_COLUMNS: usize = 5;

    fn key(&self) -> &str {
        &self.directory_path
    }

    fn to_fields(&self) -> Vec<String> {
        vec![
            self.directory_id.to_string(),
            self.directory_path.clone(),
            self.file_count.to_string(),
            self.file_count_fail_integrity.to_string(),
            format_date(self.info_last_modified),
        ]
    }

    fn from_record(record: &csv::StringRecord) -> Option<Self> {
        if record.len() < Self::MIN_COLUMNS {
            return None;
        }
        let directory_id = record.get(0)?.trim().parse::<u32>().ok()?;
        let directory_path = record.get(1)?.to_string();
        if directory_path.is_empty() {
            return None;
        }
        Some(DirectoryIntegrityInfo {
            directory_id,
            directory_path,
            file_count: record.get(2)?.trim().parse().ok()?,
            file_count_fail_integrity: record.get(3)?.trim().parse().ok()?,
            info_last_modified: parse_date(record.get(4)?)?,
        })
    }
}

struct Table<R> {
    path: PathBuf,
    rows: HashMap<String, R>,
    state: TableState,
    last_saved: Instant,
}

impl<R: CacheRow> Table<R> {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            rows: HashMap::new(),
            state: TableState::NotInitialized,
            last_saved: Instant::now(),
        }
    }

    fn load(&mut self, force_reload: bool) -> Result<usize, ScanError> {
        if self.state != TableState::NotInitialized && !force_reload {
            return Ok(self.rows.len());
        }
        self.rows.clear();

        if self.path.exists() {
            let mut reader = csv::ReaderBuilder::new()
                .delimiter(b'\t')
                .has_headers(false)
                .flexible(true)
                .quoting(false)
                .from_path(&self.path)
                .map_err(|err| ScanError::CacheRead {
                    path: self.path.clone(),
                    message: err.to_string(),
                })?;

            let mut skipped = 0usize;
            for record in reader.records() {
                let Some(row) = record.ok().as_ref().and_then(R::from_record) else {
                    skipped += 1;
                    continue;
                };
                if self.rows.contains_key(row.key()) {
                    skipped += 1;
                    continue;
                }
                self.rows.insert(row.key().to_string(), row);
            }
            // `skipped` includes the header line, which fails the id parse.
            debug!(
                path = %self.path.display(),
                rows = self.rows.len(),
                skipped,
                "loaded cache file"
            );
        }

        self.state = TableState::InitializedButUnmodified;
        self.last_saved = Instant::now();
        Ok(self.rows.len())
    }

    fn ensure_loaded(&mut self) -> Result<(), ScanError> {
        if self.state == TableState::NotInitialized {
            self.load(false)?;
        }
        Ok(())
    }

    fn upsert(&mut self, row: R) {
        self.rows.insert(row.key().to_string(), row);
        self.state = TableState::Modified;
    }

    fn save(&mut self, clear: bool) -> Result<bool, ScanError> {
        if self.state != TableState::Modified {
            return Ok(false);
        }

        let write_error = |message: String| ScanError::CacheWrite {
            path: self.path.clone(),
            message,
        };

        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(csv::QuoteStyle::Never)
            .from_writer(Vec::new());
        writer
            .write_record(R::COLUMNS)
            .map_err(|err| write_error(err.to_string()))?;

        let mut keys = self.rows.keys().collect::<Vec<_>>();
        keys.sort();
        for key in keys {
            let fields = self.rows[key]
                .to_fields()
                .into_iter()
                .map(|field| sanitize_field(&field));
            writer
                .write_record(fields)
                .map_err(|err| write_error(err.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| write_error(err.to_string()))?;
        write_bytes_atomic(&self.path, &bytes).map_err(|err| write_error(err.to_string()))?;

        info!(path = %self.path.display(), rows = self.rows.len(), "saved cache file");
        self.last_saved = Instant::now();
        if clear {
            self.rows.clear();
            self.state = TableState::NotInitialized;
        } else {
            self.state = TableState::InitializedButUnmodified;
        }
        Ok(true)
    }

    fn autosave_due(&self, interval: Duration) -> bool {
        self.state == TableState::Modified && self.last_saved.elapsed() >= interval
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub dataset_cache: PathBuf,
    pub dataset_state: TableState,
    pub datasets: usize,
    pub directory_cache: PathBuf,
    pub directory_state: TableState,
    pub directories: usize,
}

/// In-memory copy of previously computed results, backed by two TSV files.
///
/// The cache must be flushed by its owner through [`ResultCache::close`];
/// dropping it discards unsaved rows.
pub struct ResultCache {
    datasets: Table<DatasetFileInfo>,
    directories: Table<DirectoryIntegrityInfo>,
    autosave_interval: Duration,
    max_directory_id: u32,
    save_failures: usize,
}

impl ResultCache {
    pub fn new(
        dataset_cache: impl Into<PathBuf>,
        directory_cache: impl Into<PathBuf>,
        autosave_interval: Duration,
    ) -> Self {
        Self {
            datasets: Table::new(dataset_cache.into()),
            directories: Table::new(directory_cache.into()),
            autosave_interval,
            max_directory_id: 0,
            save_failures: 0,
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(
            config.paths.dataset_cache.as_std_path(),
            config.paths.directory_cache.as_std_path(),
            config.autosave_interval,
        )
    }

    pub fn dataset_cache_path(&self) -> &Path {
        &self.datasets.path
    }

    pub fn directory_cache_path(&self) -> &Path {
        &self.directories.path
    }

    pub fn dataset_state(&self) -> TableState {
        self.datasets.state
    }

    pub fn directory_state(&self) -> TableState {
        self.directories.state
    }

    pub fn dataset_count(&self) -> usize {
        self.datasets.rows.len()
    }

    pub fn directory_count(&self) -> usize {
        self.directories.rows.len()
    }

    /// Number of saves that failed during this run.
    pub fn save_failures(&self) -> usize {
        self.save_failures
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            dataset_cache: self.datasets.path.clone(),
            dataset_state: self.datasets.state,
            datasets: self.dataset_count(),
            directory_cache: self.directories.path.clone(),
            directory_state: self.directories.state,
            directories: self.directory_count(),
        }
    }

    pub fn load_datasets(&mut self, force_reload: bool) -> Result<usize, ScanError> {
        self.datasets.load(force_reload)
    }

    pub fn load_directories(&mut self, force_reload: bool) -> Result<usize, ScanError> {
        let count = self.directories.load(force_reload)?;
        self.track_max_directory_id();
        Ok(count)
    }

    pub fn cached_dataset(&self, dataset_name: &str) -> Option<&DatasetFileInfo> {
        self.datasets.rows.get(dataset_name)
    }

    pub fn cached_directory(&self, directory_path: &str) -> Option<&DirectoryIntegrityInfo> {
        self.directories.rows.get(directory_path)
    }

    /// Inserts or replaces the row for `info.dataset_name`.
    ///
    /// An unloaded table is loaded first so rows already on disk survive the
    /// next save.
    pub fn upsert_dataset(&mut self, mut info: DatasetFileInfo) -> Result<(), ScanError> {
        self.datasets.ensure_loaded()?;
        info.truncate_to_seconds();
        self.datasets.upsert(info);
        Ok(())
    }

    /// Inserts or replaces the row for `info.directory_path` and returns its id.
    ///
    /// Known paths keep their id; new paths get one past the highest id ever
    /// seen, so ids are never reused.
    pub fn upsert_directory(&mut self, mut info: DirectoryIntegrityInfo) -> Result<u32, ScanError> {
        self.directories.ensure_loaded()?;
        self.track_max_directory_id();

        info.directory_id = match self.directories.rows.get(&info.directory_path) {
            Some(existing) => existing.directory_id,
            None => {
                self.max_directory_id += 1;
                self.max_directory_id
            }
        };
        info.info_last_modified = whole_seconds(info.info_last_modified);
        let id = info.directory_id;
        self.directories.upsert(info);
        Ok(id)
    }

    pub fn save_datasets(&mut self, clear: bool) -> Result<bool, ScanError> {
        let result = self.datasets.save(clear);
        self.record_save(result)
    }

    pub fn save_directories(&mut self, clear: bool) -> Result<bool, ScanError> {
        let result = self.directories.save(clear);
        self.record_save(result)
    }

    /// Saves each modified table whose autosave interval has elapsed.
    ///
    /// Both tables are attempted; the first failure is returned and the
    /// in-memory rows stay authoritative.
    pub fn autosave(&mut self) -> Result<usize, ScanError> {
        let mut saved = 0;
        let mut first_error = None;

        if self.datasets.autosave_due(self.autosave_interval) {
            match self.save_datasets(false) {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(err) => first_error = Some(err),
            }
        }
        if self.directories.autosave_due(self.autosave_interval) {
            match self.save_directories(false) {
                Ok(true) => saved += 1,
                Ok(false) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(saved),
        }
    }

    /// Flushes both tables, keeping their rows in memory.
    pub fn close(&mut self) -> Result<(), ScanError> {
        let datasets = self.save_datasets(false);
        let directories = self.save_directories(false);
        datasets?;
        directories?;
        Ok(())
    }

    fn record_save(&mut self, result: Result<bool, ScanError>) -> Result<bool, ScanError> {
        if let Err(err) = &result {
            self.save_failures += 1;
            warn!(error = %err, "cache save failed; keeping rows in memory");
        }
        result
    }

    fn track_max_directory_id(&mut self) {
        let loaded_max = self
            .directories
            .rows
            .values()
            .map(|row| row.directory_id)
            .max()
            .unwrap_or(0);
        self.max_directory_id = self.max_directory_id.max(loaded_max);
    }
}

pub fn format_date(value: NaiveDateTime) -> String {
    value.format(DATE_FORMAT).to_string()
}

pub fn parse_date(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

fn sanitize_field(value: &str) -> String {
    value.replace(['\t', '\r', '\n'], " ")
}
