//! Configuration file watching for hot reload.
//!
//! [`ConfigWatcher`] watches the directory containing the configuration file
//! rather than the file itself, so editors and deployment tools that replace
//! the file by rename are still noticed. Events for other files in the
//! directory are ignored, and bursts of events are coalesced into a single
//! [`ConfigChange`] once the file has been quiet for the debounce window.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use warden_config::ConfigWatcher;
//!
//! # async fn example() -> Result<(), warden_config::ConfigError> {
//! let mut watcher = ConfigWatcher::builder("/etc/warden/config.toml")
//!     .with_debounce(Duration::from_millis(250))
//!     .build()?;
//!
//! while let Some(change) = watcher.changed().await {
//!     println!("{} changed ({:?})", change.path.display(), change.kind);
//! }
//! # Ok(())
//! # }
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ConfigError;

/// Kind of file change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChangeKind {
    /// File was created, or renamed into place.
    Created,
    /// File was modified.
    Modified,
    /// File was deleted.
    Deleted,
}

impl FileChangeKind {
    fn from_event(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Modify(_) => Some(Self::Modified),
            EventKind::Remove(_) => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// A debounced change to the watched configuration file.
#[derive(Debug, Clone)]
pub struct ConfigChange {
    /// Path of the configuration file.
    pub path: PathBuf,
    /// Last kind of change seen within the debounce window.
    pub kind: FileChangeKind,
    /// When the first event of the burst was seen.
    pub first_seen: Instant,
}

/// Builder for [`ConfigWatcher`].
#[derive(Debug)]
pub struct ConfigWatcherBuilder {
    path: PathBuf,
    debounce: Duration,
}

impl ConfigWatcherBuilder {
    /// Set the debounce duration.
    ///
    /// Changes within this window are coalesced into a single event.
    /// Default is 500ms.
    #[must_use]
    pub fn with_debounce(mut self, duration: Duration) -> Self {
        self.debounce = duration;
        self
    }

    /// Start watching.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or the watcher cannot be
    /// created.
    pub fn build(self) -> Result<ConfigWatcher, ConfigError> {
        if !self.path.exists() {
            return Err(ConfigError::file_not_found(&self.path));
        }

        let file_name = self
            .path
            .file_name()
            .map(ToOwned::to_owned)
            .ok_or_else(|| {
                ConfigError::invalid_config(format!(
                    "not a file path: {}",
                    self.path.display()
                ))
            })?;
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (tx, rx) = mpsc::channel(64);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                // A full channel already holds a pending change.
                Ok(event) => {
                    let _ = tx.try_send(event);
                }
                Err(e) => warn!(error = %e, "config watcher error"),
            }
        })
        .map_err(|e| ConfigError::invalid_config(format!("failed to create file watcher: {e}")))?;

        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                ConfigError::Io(std::io::Error::other(format!(
                    "failed to watch {}: {e}",
                    dir.display()
                )))
            })?;

        debug!(path = %self.path.display(), "watching configuration file");

        Ok(ConfigWatcher {
            _watcher: watcher,
            rx,
            path: self.path,
            file_name,
            debounce: self.debounce,
        })
    }
}

/// Watches one configuration file for changes.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<Event>,
    path: PathBuf,
    file_name: OsString,
    debounce: Duration,
}

impl std::fmt::Debug for ConfigWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigWatcher")
            .field("path", &self.path)
            .field("debounce", &self.debounce)
            .finish_non_exhaustive()
    }
}

impl ConfigWatcher {
    /// Create a builder watching `path`.
    pub fn builder(path: impl AsRef<Path>) -> ConfigWatcherBuilder {
        ConfigWatcherBuilder {
            path: path.as_ref().to_path_buf(),
            debounce: Duration::from_millis(500),
        }
    }

    /// The watched file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait for the next debounced change.
    ///
    /// Returns `None` once the underlying watcher has shut down.
    pub async fn changed(&mut self) -> Option<ConfigChange> {
        let (mut kind, first_seen) = loop {
            let event = self.rx.recv().await?;
            if let Some(kind) = self.relevant(&event) {
                break (kind, Instant::now());
            }
        };

        // Keep absorbing events until the file has been quiet for a full
        // debounce window.
        loop {
            match tokio::time::timeout(self.debounce, self.rx.recv()).await {
                Ok(Some(event)) => {
                    if let Some(k) = self.relevant(&event) {
                        kind = k;
                    }
                }
                Ok(None) | Err(_) => break,
            }
        }

        Some(ConfigChange {
            path: self.path.clone(),
            kind,
            first_seen,
        })
    }

    fn relevant(&self, event: &Event) -> Option<FileChangeKind> {
        let kind = FileChangeKind::from_event(&event.kind)?;
        event
            .paths
            .iter()
            .any(|p| p.file_name() == Some(self.file_name.as_os_str()))
            .then_some(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::time::{sleep, timeout};

    #[test]
    fn test_change_kind_from_event_kind() {
        assert_eq!(
            FileChangeKind::from_event(&EventKind::Create(notify::event::CreateKind::File)),
            Some(FileChangeKind::Created)
        );
        assert_eq!(
            FileChangeKind::from_event(&EventKind::Remove(notify::event::RemoveKind::File)),
            Some(FileChangeKind::Deleted)
        );
        assert_eq!(
            FileChangeKind::from_event(&EventKind::Access(notify::event::AccessKind::Any)),
            None
        );
    }

    #[test]
    fn test_build_missing_file() {
        let result = ConfigWatcher::builder("/nonexistent/warden.toml").build();
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[tokio::test]
    async fn test_relevant_filters_other_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "bind = \"127.0.0.1:1\"").unwrap();

        let watcher = ConfigWatcher::builder(&path).build().unwrap();

        let other = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(dir.path().join("other.toml"));
        assert_eq!(watcher.relevant(&other), None);

        let ours = Event::new(EventKind::Modify(notify::event::ModifyKind::Any)).add_path(path);
        assert_eq!(watcher.relevant(&ours), Some(FileChangeKind::Modified));
    }

    #[tokio::test]
    async fn test_file_change_detection() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "bind = \"127.0.0.1:1\"").unwrap();

        let mut watcher = ConfigWatcher::builder(&path)
            .with_debounce(Duration::from_millis(50))
            .build()
            .unwrap();

        sleep(Duration::from_millis(100)).await;
        fs::write(&path, "bind = \"127.0.0.1:2\"").unwrap();

        // File system events can be unreliable in CI; only check what arrives.
        if let Ok(Some(change)) = timeout(Duration::from_secs(2), watcher.changed()).await {
            assert_eq!(change.path, path);
        }
    }
}
