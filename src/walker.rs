use std::collections::HashSet;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use glob::{MatchOptions, Pattern};
use tracing::{debug, info, warn};

use crate::classify::{
    is_bundle_sentinel, is_known_directory_extension, is_known_file, is_zipped_imaging_name,
    is_zipped_s_folder_name,
};
use crate::domain::ProcessingState;
use crate::error::ScanError;
use crate::scanner::{ProcessOutcome, Scanner};
use crate::status::ProgressSink;

const LISTING_ATTEMPTS: u32 = 2;
const LISTING_RETRY_DELAY: Duration = Duration::from_millis(500);

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// What a scan input names: one dataset path, or a directory plus a
/// file-name pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTarget {
    Path(PathBuf),
    Directory { dir: PathBuf, pattern: String },
}

impl ScanTarget {
    /// Existing paths are taken as-is; otherwise the last component must be
    /// a wildcard pattern inside an existing directory.
    pub fn resolve(input: &Path) -> Result<Self, ScanError> {
        if input.exists() {
            return Ok(ScanTarget::Path(input.to_path_buf()));
        }

        let pattern = input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| name.contains(['*', '?', '[']))
            .ok_or_else(|| ScanError::InvalidPath(input.to_path_buf()))?;
        let dir = match input.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.is_dir() {
            return Err(ScanError::InvalidPath(dir));
        }
        Pattern::new(&pattern)
            .map_err(|err| ScanError::InvalidPattern(format!("{pattern}: {err}")))?;

        Ok(ScanTarget::Directory { dir, pattern })
    }
}

#[derive(Debug, Default)]
struct Listing {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
}

impl Scanner {
    /// Processes a single dataset, or walks a directory for datasets.
    ///
    /// A directory that is itself a dataset (for example `Run.d`) is
    /// processed as one; any other directory is walked with pattern `*`.
    pub fn scan(
        &mut self,
        input: &Path,
        output_dir: Option<&Path>,
        recurse: bool,
        sink: &dyn ProgressSink,
    ) -> Result<(), ScanError> {
        let (dir, pattern) = match ScanTarget::resolve(input)? {
            ScanTarget::Path(path) if path.is_file() || self.classifier.classify(&path).is_some() => {
                let outcome = self.process_path(&path, output_dir, sink);
                if outcome.kind.is_none() {
                    return Err(ScanError::UnsupportedType(outcome.path));
                }
                return self.check_outcome(&outcome);
            }
            ScanTarget::Path(path) => (path, "*".to_string()),
            ScanTarget::Directory { dir, pattern } => (dir, pattern),
        };

        let compiled = Pattern::new(&pattern)
            .map_err(|err| ScanError::InvalidPattern(format!("{pattern}: {err}")))?;
        info!(dir = %dir.display(), %pattern, recurse, "scanning directory");
        self.walk_directory(&dir, &compiled, output_dir, 1, recurse, sink)?;

        if self.abort.is_aborted() {
            info!(path = %self.abort.path().display(), "scan aborted");
            return Ok(());
        }
        if self.status.summary().matched() == 0 {
            return Err(ScanError::NoMatchingFiles(
                dir.join(&pattern).display().to_string(),
            ));
        }
        Ok(())
    }

    fn walk_directory(
        &mut self,
        dir: &Path,
        pattern: &Pattern,
        output_dir: Option<&Path>,
        level: u32,
        recurse: bool,
        sink: &dyn ProgressSink,
    ) -> Result<(), ScanError> {
        if self.abort.poll() {
            return Ok(());
        }

        let listing = match list_directory(dir) {
            Ok(listing) => listing,
            Err(err) if self.config.recursion_errors_fatal => {
                return Err(ScanError::Filesystem(format!("{}: {err}", dir.display())));
            }
            Err(err) => {
                warn!(dir = %dir.display(), error = %err, "skipping unreadable directory");
                return Ok(());
            }
        };

        let matches = |path: &Path| {
            path.file_name()
                .is_some_and(|name| pattern.matches_with(&name.to_string_lossy(), MATCH_OPTIONS))
        };
        let files: Vec<&PathBuf> = listing.files.iter().filter(|path| matches(path)).collect();
        let leaves: Vec<&PathBuf> = listing
            .dirs
            .iter()
            .filter(|path| {
                matches(path) && (is_bundle_sentinel(path) || is_known_directory_extension(path))
            })
            .collect();
        debug!(
            dir = %dir.display(),
            files = files.len(),
            leaves = leaves.len(),
            "listed directory"
        );

        let total = files.len() + leaves.len();
        let mut done = 0;
        let mut touched = Vec::new();
        let mut bundle_processed = false;

        for file in files {
            if self.abort.poll() {
                return Ok(());
            }
            done += 1;
            self.status.set_progress(done, total);

            if is_known_file(file) {
                let outcome = self.process_path(file, output_dir, sink);
                touched.push(file.clone());
                self.check_outcome(&outcome)?;
            } else if is_zipped_imaging_name(file) || is_zipped_s_folder_name(file) {
                // The zips are pieces of one dataset: the directory holding them.
                if !bundle_processed {
                    bundle_processed = true;
                    let outcome = self.process_path(dir, output_dir, sink);
                    self.check_outcome(&outcome)?;
                }
            } else if self.config.process_all_extensions {
                let outcome = self.process_path(file, output_dir, sink);
                touched.push(file.clone());
                self.check_outcome(&outcome)?;
            }
        }

        let mut consumed = HashSet::new();
        for leaf in leaves {
            if self.abort.poll() {
                return Ok(());
            }
            done += 1;
            self.status.set_progress(done, total);

            let outcome = self.process_path(leaf, output_dir, sink);
            consumed.insert(leaf.clone());
            self.check_outcome(&outcome)?;
        }

        self.check_directory_integrity(dir, &touched);

        let max_levels = self.config.max_levels_to_recurse;
        if !recurse || (max_levels > 0 && level >= max_levels as u32) {
            return Ok(());
        }
        for sub in listing.dirs.iter().filter(|sub| !consumed.contains(*sub)) {
            if self.abort.poll() {
                return Ok(());
            }
            self.walk_directory(sub, pattern, output_dir, level + 1, recurse, sink)?;
        }
        Ok(())
    }

    fn check_outcome(&self, outcome: &ProcessOutcome) -> Result<(), ScanError> {
        if outcome.state == ProcessingState::FailedProcessing && !self.config.skip_files_in_error {
            return Err(ScanError::processing(
                outcome.dataset_name.clone().unwrap_or_default(),
                "processing failed and skip_files_in_error is off",
            ));
        }
        Ok(())
    }

    fn check_directory_integrity(&mut self, dir: &Path, touched: &[PathBuf]) {
        if !self.config.check_integrity {
            return;
        }
        let Some(checker) = self.integrity.as_deref() else {
            return;
        };

        let result = match checker.check_directory(dir, touched) {
            Ok(result) => result,
            Err(err) => {
                warn!(error = %err, "integrity check skipped");
                return;
            }
        };
        let failed = result.directory.file_count_fail_integrity;
        if failed > 0 {
            warn!(dir = %dir.display(), failed, "files failed integrity check");
        }
        match self.cache.upsert_directory(result.directory) {
            Ok(directory_id) => debug!(dir = %dir.display(), directory_id, "integrity recorded"),
            Err(err) => warn!(error = %err, "integrity result not cached"),
        }
        self.status.summary_mut().directories_checked += 1;
        if let Err(err) = self.cache.autosave() {
            warn!(error = %err, "autosave failed");
        }
    }
}

fn list_directory(dir: &Path) -> io::Result<Listing> {
    let mut attempt = 1;
    loop {
        match read_listing(dir) {
            Ok(listing) => return Ok(listing),
            Err(err) if attempt < LISTING_ATTEMPTS && is_transient(&err) => {
                warn!(dir = %dir.display(), error = %err, attempt, "retrying directory listing");
                attempt += 1;
                thread::sleep(LISTING_RETRY_DELAY);
            }
            Err(err) => return Err(err),
        }
    }
}

/// Sorted files and directories directly inside `dir`. Symlinks to files are
/// kept; symlinked directories are not followed.
fn read_listing(dir: &Path) -> io::Result<Listing> {
    let mut listing = Listing::default();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let path = entry.path();
        if file_type.is_dir() {
            listing.dirs.push(path);
        } else if file_type.is_file() || (file_type.is_symlink() && path.is_file()) {
            listing.files.push(path);
        }
    }
    listing.files.sort();
    listing.dirs.sort();
    Ok(listing)
}

/// Errors a network share can raise and clear on its own.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::Interrupted
            | ErrorKind::TimedOut
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::ResourceBusy
            | ErrorKind::StaleNetworkFileHandle
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_path_resolves_as_is() {
        let temp = tempfile::tempdir().unwrap();
        assert_eq!(
            ScanTarget::resolve(temp.path()).unwrap(),
            ScanTarget::Path(temp.path().to_path_buf())
        );
    }

    #[test]
    fn wildcard_splits_into_directory_and_pattern() {
        let temp = tempfile::tempdir().unwrap();
        let target = ScanTarget::resolve(&temp.path().join("*.raw")).unwrap();
        assert_eq!(
            target,
            ScanTarget::Directory {
                dir: temp.path().to_path_buf(),
                pattern: "*.raw".to_string(),
            }
        );
    }

    #[test]
    fn missing_path_without_wildcard_is_invalid() {
        let temp = tempfile::tempdir().unwrap();
        let err = ScanTarget::resolve(&temp.path().join("Run01.raw")).unwrap_err();
        assert!(matches!(err, ScanError::InvalidPath(_)));

        let err = ScanTarget::resolve(&temp.path().join("missing").join("*.raw")).unwrap_err();
        assert!(matches!(err, ScanError::InvalidPath(_)));
    }

    #[test]
    fn malformed_pattern_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let err = ScanTarget::resolve(&temp.path().join("[*.raw")).unwrap_err();
        assert!(matches!(err, ScanError::InvalidPattern(_)));
    }

    #[test]
    fn listing_is_sorted_and_split() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("b.raw"), b"x").unwrap();
        fs::write(temp.path().join("a.raw"), b"x").unwrap();
        fs::create_dir(temp.path().join("Run.d")).unwrap();

        let listing = list_directory(temp.path()).unwrap();
        let names: Vec<_> = listing
            .files
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.raw", "b.raw"]);
        assert_eq!(listing.dirs, [temp.path().join("Run.d")]);
    }

    #[test]
    fn transient_errors() {
        assert!(is_transient(&io::Error::from(ErrorKind::TimedOut)));
        assert!(!is_transient(&io::Error::from(ErrorKind::NotFound)));
        assert!(!is_transient(&io::Error::from(ErrorKind::PermissionDenied)));
    }

    #[test]
    fn pattern_match_ignores_case() {
        let pattern = Pattern::new("*.raw").unwrap();
        assert!(pattern.matches_with("RUN01.RAW", MATCH_OPTIONS));
    }
}
