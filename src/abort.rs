use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Cooperative abort request signalled by the presence of a sentinel file.
///
/// The file is checked at most once per poll interval to avoid hammering
/// network shares. Once seen it is renamed to `<name>.done` so the next run
/// does not abort immediately, and the signal stays raised for the rest of
/// this run.
#[derive(Debug)]
pub struct AbortSignal {
    path: PathBuf,
    poll_interval: Duration,
    last_checked: Option<Instant>,
    aborted: bool,
}

impl AbortSignal {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
            last_checked: None,
            aborted: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Returns true once the sentinel has been observed.
    pub fn poll(&mut self) -> bool {
        if self.aborted {
            return true;
        }
        if let Some(last) = self.last_checked {
            if last.elapsed() < self.poll_interval {
                return false;
            }
        }
        self.last_checked = Some(Instant::now());

        if self.path.exists() {
            warn!(path = %self.path.display(), "abort file found; stopping");
            self.aborted = true;
            self.consume();
        }
        self.aborted
    }

    pub fn done_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".done");
        PathBuf::from(name)
    }

    fn consume(&self) {
        let done = self.done_path();
        if done.exists() {
            if let Err(err) = fs::remove_file(&done) {
                debug!(path = %done.display(), error = %err, "could not delete stale abort marker");
            }
        }
        if let Err(err) = fs::rename(&self.path, &done) {
            debug!(path = %self.path.display(), error = %err, "could not rename abort file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_does_not_abort() {
        let temp = tempfile::tempdir().unwrap();
        let mut signal = AbortSignal::new(temp.path().join("AbortProcessing.txt"), Duration::ZERO);
        assert!(!signal.poll());
        assert!(!signal.is_aborted());
    }

    #[test]
    fn sentinel_is_renamed_once() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("AbortProcessing.txt");
        let mut signal = AbortSignal::new(&path, Duration::ZERO);
        fs::write(signal.done_path(), b"stale").unwrap();
        fs::write(&path, b"").unwrap();

        assert!(signal.poll());
        assert!(!path.exists());
        assert_eq!(fs::read(signal.done_path()).unwrap(), b"");

        // A new sentinel after consumption is left alone: the signal is latched.
        fs::write(&path, b"again").unwrap();
        assert!(signal.poll());
        assert!(path.exists());
    }

    #[test]
    fn polling_is_rate_limited() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("AbortProcessing.txt");
        let mut signal = AbortSignal::new(&path, Duration::from_secs(3600));
        assert!(!signal.poll());
        fs::write(&path, b"").unwrap();
        assert!(!signal.poll());
        assert!(path.exists());
    }
}
