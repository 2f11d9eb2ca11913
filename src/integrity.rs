use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::domain::DirectoryIntegrityInfo;
use crate::error::ScanError;
use crate::fs_util::{dotted_extension, now_local, validate_zip};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileIntegrity {
    pub path: PathBuf,
    pub length: u64,
    pub passed: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DirectoryIntegrity {
    pub directory: DirectoryIntegrityInfo,
    pub files: Vec<FileIntegrity>,
}

pub trait IntegrityChecker {
    /// Checks the files directly inside `dir`. Paths in `already_processed`
    /// were read by a dataset processor this run and count as passing.
    fn check_directory(
        &self,
        dir: &Path,
        already_processed: &[PathBuf],
    ) -> Result<DirectoryIntegrity, ScanError>;
}

/// Zip archives must decompress cleanly; any other file must be non-empty
/// and readable.
pub struct ZipIntegrityChecker;

impl ZipIntegrityChecker {
    fn check_file(path: &Path, length: u64) -> Result<(), String> {
        if length == 0 {
            return Err("file is empty".to_string());
        }
        if dotted_extension(path) == ".zip" {
            return validate_zip(path).map_err(|err| err.to_string());
        }
        let mut buffer = [0u8; 1];
        fs::File::open(path)
            .and_then(|mut file| file.read_exact(&mut buffer))
            .map_err(|err| err.to_string())
    }
}

impl IntegrityChecker for ZipIntegrityChecker {
    fn check_directory(
        &self,
        dir: &Path,
        already_processed: &[PathBuf],
    ) -> Result<DirectoryIntegrity, ScanError> {
        let integrity_error = |message: String| ScanError::Integrity {
            path: dir.to_path_buf(),
            message,
        };
        let entries = fs::read_dir(dir).map_err(|err| integrity_error(err.to_string()))?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| integrity_error(err.to_string()))?;
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(err) => {
                    files.push(FileIntegrity {
                        path,
                        length: 0,
                        passed: false,
                        message: Some(err.to_string()),
                    });
                    continue;
                }
            };

            let length = metadata.len();
            let outcome = if already_processed.contains(&path) {
                Ok(())
            } else {
                Self::check_file(&path, length)
            };
            if let Err(message) = &outcome {
                debug!(path = %path.display(), %message, "integrity check failed");
            }
            files.push(FileIntegrity {
                path,
                length,
                passed: outcome.is_ok(),
                message: outcome.err(),
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));

        let mut directory = DirectoryIntegrityInfo::new(dir.display().to_string(), now_local());
        directory.file_count = files.len() as u32;
        directory.file_count_fail_integrity = files.iter().filter(|file| !file.passed).count() as u32;

        Ok(DirectoryIntegrity { directory, files })
    }
}
