use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDateTime};
use sha2::{Digest, Sha256};
use zip::ZipArchive;

use crate::error::ScanError;

/// Reads every entry of the archive to the end, which forces CRC verification.
pub fn validate_zip(zip_path: &Path) -> Result<(), ScanError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| ScanError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive =
        ZipArchive::new(file).map_err(|err| ScanError::Filesystem(err.to_string()))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| ScanError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| ScanError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

/// Replaces `path` with `content` through a temp file in the same directory.
pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;
    let mut temp = tempfile::Builder::new()
        .prefix(".msinfo-scan")
        .tempfile_in(&parent)?;
    temp.write_all(content)?;
    temp.flush()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

pub fn local_time(time: SystemTime) -> NaiveDateTime {
    DateTime::<Local>::from(time).naive_local()
}

pub fn now_local() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Creation time falls back to modification time on filesystems without birth times.
pub fn file_times(metadata: &fs::Metadata) -> io::Result<(NaiveDateTime, NaiveDateTime)> {
    let modified = metadata.modified()?;
    let created = metadata.created().unwrap_or(modified);
    Ok((local_time(created), local_time(modified)))
}

pub fn sha256_file(path: &Path) -> io::Result<String> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Lists regular files below `root`, sorted for stable output. Symlinked
/// directories are not followed.
pub fn files_below(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() || (file_type.is_symlink() && path.is_file()) {
                items.push(path);
            }
        }
    }
    items.sort();
    Ok(items)
}

/// Lower-cased extension including the leading dot, or an empty string.
pub fn dotted_extension(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_ascii_lowercase()))
        .unwrap_or_default()
}
