use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{DownloadSession, DownloadTask, Locator};
use crate::error::{DownloadError, Result};

/// Downloads a resource into a file
///
/// Bytes are written to a temporary file next to the destination and the
/// file is moved into place only when the session completes, so a failed or
/// cancelled attempt never leaves a truncated destination behind.
#[derive(Debug, Clone)]
pub struct FileTask {
    locator: Locator,
    destination: PathBuf,
}

impl FileTask {
    pub fn new(locator: impl Into<Locator>, destination: impl Into<PathBuf>) -> Self {
        Self {
            locator: locator.into(),
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}

impl DownloadTask<PathBuf> for FileTask {
    fn locator(&self) -> &Locator {
        &self.locator
    }

    fn create_session(&self, _expected_len: Option<u64>) -> Result<Box<dyn DownloadSession<PathBuf>>> {
        let parent = match self.destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        if self.destination.is_dir() {
            return Err(DownloadError::InvalidArgument(format!(
                "destination is a directory: {}",
                self.destination.display()
            )));
        }

        let staging = NamedTempFile::new_in(&parent)?;
        debug!(path = %staging.path().display(), "Staging file created");

        Ok(Box::new(FileSession {
            staging,
            destination: self.destination.clone(),
            written: 0,
        }))
    }
}

struct FileSession {
    staging: NamedTempFile,
    destination: PathBuf,
    written: u64,
}

impl DownloadSession<PathBuf> for FileSession {
    fn receive(&mut self, data: &[u8]) -> Result<()> {
        self.staging.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn completed(mut self: Box<Self>) -> Result<PathBuf> {
        self.staging.flush()?;
        self.staging.as_file().sync_all()?;

        let FileSession {
            staging,
            destination,
            written,
        } = *self;

        // On failure the returned error still owns the temp file and drops it.
        staging.persist(&destination).map_err(|e| DownloadError::from(e.error))?;
        debug!(path = %destination.display(), bytes = written, "File placed");
        Ok(destination)
    }

    fn failed(self: Box<Self>) {
        let path = self.staging.path().to_path_buf();
        if let Err(e) = self.staging.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove staging file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_session_places_on_completion() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("nested").join("out.bin");
        let task = FileTask::new("mem://file", &destination);

        let mut session = task.create_session(None).unwrap();
        session.receive(b"hello ").unwrap();
        assert!(!destination.exists());
        session.receive(b"world").unwrap();

        let placed = session.completed().unwrap();
        assert_eq!(placed, destination);
        assert_eq!(std::fs::read(&destination).unwrap(), b"hello world");
    }

    #[test]
    fn test_file_session_failure_leaves_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let destination = temp_dir.path().join("out.bin");
        let task = FileTask::new("mem://file", &destination);

        let mut session = task.create_session(Some(4)).unwrap();
        session.receive(b"part").unwrap();
        session.failed();

        assert!(!destination.exists());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_file_task_rejects_directory_destination() {
        let temp_dir = TempDir::new().unwrap();
        let task = FileTask::new("mem://file", temp_dir.path());
        assert!(matches!(
            task.create_session(None),
            Err(DownloadError::InvalidArgument(_))
        ));
    }
}
