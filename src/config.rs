use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ScanError;

pub const DEFAULT_CONFIG_FILE: &str = "msinfo-scan.json";
pub const DEFAULT_DATASET_CACHE_FILE: &str = "DatasetTimeFile.txt";
pub const DEFAULT_DIRECTORY_CACHE_FILE: &str = "FolderIntegrityInfo.txt";
pub const DEFAULT_ABORT_FILE: &str = "AbortProcessing.txt";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub base_dir: Option<String>,
    #[serde(default)]
    pub dataset_cache_file: Option<String>,
    #[serde(default)]
    pub directory_cache_file: Option<String>,
    #[serde(default)]
    pub autosave_interval_minutes: Option<u64>,
    #[serde(default)]
    pub use_cache: Option<bool>,
    #[serde(default)]
    pub reprocess_existing: Option<bool>,
    #[serde(default)]
    pub reprocess_if_cached_size_zero: Option<bool>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
    #[serde(default)]
    pub max_levels_to_recurse: Option<i32>,
    #[serde(default)]
    pub process_all_extensions: Option<bool>,
    #[serde(default)]
    pub skip_files_in_error: Option<bool>,
    #[serde(default)]
    pub recursion_errors_fatal: Option<bool>,
    #[serde(default)]
    pub check_integrity: Option<bool>,
    #[serde(default)]
    pub create_output_files: Option<bool>,
    #[serde(default)]
    pub abort_file_name: Option<String>,
    #[serde(default)]
    pub abort_poll_seconds: Option<u64>,
    #[serde(default)]
    pub status_file: Option<String>,
    #[serde(default)]
    pub status_interval_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub window_minutes: Option<u64>,
    #[serde(default)]
    pub delay_seconds: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ScannerPaths {
    pub base_dir: Utf8PathBuf,
    pub dataset_cache: Utf8PathBuf,
    pub directory_cache: Utf8PathBuf,
    pub abort_file: Utf8PathBuf,
    pub status_file: Option<Utf8PathBuf>,
}

impl ScannerPaths {
    pub fn in_dir(base_dir: &Utf8Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
            dataset_cache: base_dir.join(DEFAULT_DATASET_CACHE_FILE),
            directory_cache: base_dir.join(DEFAULT_DIRECTORY_CACHE_FILE),
            abort_file: base_dir.join(DEFAULT_ABORT_FILE),
            status_file: None,
        }
    }
}

/// Bounds for re-running a processor on a dataset that may still be written.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total processor calls, the first one included.
    pub max_attempts: u32,
    pub recency_window: Duration,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            recency_window: Duration::from_secs(60 * 60),
            delay: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub paths: ScannerPaths,
    pub autosave_interval: Duration,
    pub use_cache: bool,
    pub reprocess_existing: bool,
    pub reprocess_if_cached_size_zero: bool,
    pub retry: RetryPolicy,
    /// `<= 0` means unlimited.
    pub max_levels_to_recurse: i32,
    pub process_all_extensions: bool,
    pub skip_files_in_error: bool,
    pub recursion_errors_fatal: bool,
    pub check_integrity: bool,
    pub create_output_files: bool,
    pub abort_poll_interval: Duration,
    pub status_interval: Duration,
}

impl ResolvedConfig {
    pub fn with_base_dir(base_dir: &Utf8Path) -> Self {
        Self {
            paths: ScannerPaths::in_dir(base_dir),
            autosave_interval: Duration::from_secs(5 * 60),
            use_cache: true,
            reprocess_existing: false,
            reprocess_if_cached_size_zero: false,
            retry: RetryPolicy::default(),
            max_levels_to_recurse: 0,
            process_all_extensions: false,
            skip_files_in_error: true,
            recursion_errors_fatal: false,
            check_integrity: false,
            create_output_files: true,
            abort_poll_interval: Duration::from_secs(15),
            status_interval: Duration::from_secs(30),
        }
    }

    pub fn apply_overrides(&mut self, overrides: &ScanOverrides) {
        if let Some(levels) = overrides.max_levels_to_recurse {
            self.max_levels_to_recurse = levels;
        }
        if overrides.reprocess {
            self.reprocess_existing = true;
        }
        if overrides.reprocess_zero_size {
            self.reprocess_if_cached_size_zero = true;
        }
        if overrides.no_cache {
            self.use_cache = false;
        }
        if overrides.all_extensions {
            self.process_all_extensions = true;
        }
        if overrides.check_integrity {
            self.check_integrity = true;
        }
        if overrides.no_output_files {
            self.create_output_files = false;
        }
        if overrides.fatal_recursion_errors {
            self.recursion_errors_fatal = true;
        }
        if let Some(status) = &overrides.status_file {
            self.paths.status_file = Some(status.clone());
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ScanOverrides {
    pub max_levels_to_recurse: Option<i32>,
    pub reprocess: bool,
    pub reprocess_zero_size: bool,
    pub no_cache: bool,
    pub all_extensions: bool,
    pub check_integrity: bool,
    pub no_output_files: bool,
    pub fatal_recursion_errors: bool,
    pub status_file: Option<Utf8PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `msinfo-scan.json` in the working directory when present.
    /// Without either, the defaults rooted at the working directory are used.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, ScanError> {
        let cwd = std::env::current_dir().map_err(|err| ScanError::Filesystem(err.to_string()))?;
        let cwd = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|_| ScanError::Filesystem("non-utf8 working directory".to_string()))?;

        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => cwd.join(DEFAULT_CONFIG_FILE).into_std_path_buf(),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default(), &cwd);
        }

        let config = Self::read(&config_path)?;
        Self::resolve_config(config, &cwd)
    }

    pub fn read(path: &Path) -> Result<Config, ScanError> {
        let content =
            fs::read_to_string(path).map_err(|_| ScanError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| ScanError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config, cwd: &Utf8Path) -> Result<ResolvedConfig, ScanError> {
        let base_dir = match config.base_dir.as_deref() {
            Some(dir) => anchor(cwd, dir),
            None => cwd.to_path_buf(),
        };
        let mut resolved = ResolvedConfig::with_base_dir(&base_dir);

        if let Some(file) = config.dataset_cache_file.as_deref() {
            resolved.paths.dataset_cache = anchor(&base_dir, file);
        }
        if let Some(file) = config.directory_cache_file.as_deref() {
            resolved.paths.directory_cache = anchor(&base_dir, file);
        }
        if let Some(name) = config.abort_file_name.as_deref() {
            if name.trim().is_empty() {
                return Err(ScanError::ConfigParse("abort_file_name is empty".to_string()));
            }
            resolved.paths.abort_file = anchor(&base_dir, name);
        }
        resolved.paths.status_file = config
            .status_file
            .as_deref()
            .map(|file| anchor(&base_dir, file));

        if let Some(minutes) = config.autosave_interval_minutes {
            resolved.autosave_interval = Duration::from_secs(minutes * 60);
        }
        if let Some(retry) = config.retry {
            if let Some(max) = retry.max_attempts {
                resolved.retry.max_attempts = max.max(1);
            }
            if let Some(minutes) = retry.window_minutes {
                resolved.retry.recency_window = Duration::from_secs(minutes * 60);
            }
            if let Some(seconds) = retry.delay_seconds {
                resolved.retry.delay = Duration::from_secs(seconds);
            }
        }
        if let Some(seconds) = config.abort_poll_seconds {
            resolved.abort_poll_interval = Duration::from_secs(seconds);
        }
        if let Some(seconds) = config.status_interval_seconds {
            resolved.status_interval = Duration::from_secs(seconds);
        }

        resolved.use_cache = config.use_cache.unwrap_or(resolved.use_cache);
        resolved.reprocess_existing = config
            .reprocess_existing
            .unwrap_or(resolved.reprocess_existing);
        resolved.reprocess_if_cached_size_zero = config
            .reprocess_if_cached_size_zero
            .unwrap_or(resolved.reprocess_if_cached_size_zero);
        resolved.max_levels_to_recurse = config
            .max_levels_to_recurse
            .unwrap_or(resolved.max_levels_to_recurse);
        resolved.process_all_extensions = config
            .process_all_extensions
            .unwrap_or(resolved.process_all_extensions);
        resolved.skip_files_in_error = config
            .skip_files_in_error
            .unwrap_or(resolved.skip_files_in_error);
        resolved.recursion_errors_fatal = config
            .recursion_errors_fatal
            .unwrap_or(resolved.recursion_errors_fatal);
        resolved.check_integrity = config.check_integrity.unwrap_or(resolved.check_integrity);
        resolved.create_output_files = config
            .create_output_files
            .unwrap_or(resolved.create_output_files);

        Ok(resolved)
    }
}

fn anchor(base: &Utf8Path, value: &str) -> Utf8PathBuf {
    let candidate = Utf8PathBuf::from(value);
    if candidate.is_absolute() {
        candidate
    } else {
        base.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_base_dir() {
        let config = ConfigLoader::resolve_config(Config::default(), Utf8Path::new("/data/run"))
            .unwrap();
        assert_eq!(
            config.paths.dataset_cache,
            Utf8PathBuf::from("/data/run/DatasetTimeFile.txt")
        );
        assert_eq!(config.autosave_interval, Duration::from_secs(300));
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.recency_window, Duration::from_secs(3600));
        assert!(config.skip_files_in_error);
        assert!(!config.recursion_errors_fatal);
        assert_eq!(config.max_levels_to_recurse, 0);
    }

    #[test]
    fn relative_cache_file_is_anchored_to_base_dir() {
        let mut config = Config::default();
        config.base_dir = Some("state".to_string());
        config.dataset_cache_file = Some("cache/datasets.tsv".to_string());
        let resolved = ConfigLoader::resolve_config(config, Utf8Path::new("/work")).unwrap();
        assert_eq!(
            resolved.paths.dataset_cache,
            Utf8PathBuf::from("/work/state/cache/datasets.tsv")
        );
        assert_eq!(
            resolved.paths.abort_file,
            Utf8PathBuf::from("/work/state/AbortProcessing.txt")
        );
    }
}
