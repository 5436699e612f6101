//! Configuration reload.
//!
//! A reload re-reads the configuration file, builds every application of the
//! new configuration off to the side and only then swaps the registry
//! snapshot. Any failure leaves the running configuration untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};
use warden_config::{AgentConfig, ConfigLoader};
use warden_core::EngineFactory;

use crate::error::AgentResult;
use crate::notify::SystemdNotifier;
use crate::registry::{ApplicationRegistry, RegistrySnapshot};

/// Rebuilds the application registry from the configuration file.
pub struct Reloader {
    path: PathBuf,
    registry: Arc<ApplicationRegistry>,
    factory: Arc<dyn EngineFactory>,
    current: Mutex<AgentConfig>,
    notifier: SystemdNotifier,
}

impl std::fmt::Debug for Reloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reloader")
            .field("path", &self.path)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

impl Reloader {
    /// Create a reloader for the configuration at `path`, currently running
    /// `current`.
    pub fn new(
        path: impl Into<PathBuf>,
        current: AgentConfig,
        registry: Arc<ApplicationRegistry>,
        factory: Arc<dyn EngineFactory>,
    ) -> Self {
        Self {
            path: path.into(),
            registry,
            factory,
            current: Mutex::new(current),
            notifier: SystemdNotifier::disabled(),
        }
    }

    /// Report reloads to systemd.
    #[must_use]
    pub fn with_notifier(mut self, notifier: SystemdNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// The configuration file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The configuration currently in effect.
    pub fn current(&self) -> AgentConfig {
        self.current.lock().clone()
    }

    /// Reload the configuration file.
    ///
    /// Concurrent calls are serialized. Blocks while engines are built; call
    /// from a blocking context.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be loaded or validated, if the
    /// listen address changed, or if an engine cannot be built. The running
    /// configuration is kept in every case.
    pub fn reload(&self) -> AgentResult<()> {
        self.notifier.reloading();
        let result = self.try_reload();
        self.notifier.ready();

        if let Err(e) = &result {
            error!(path = %self.path.display(), error = %e, "configuration reload failed");
        }
        result
    }

    fn try_reload(&self) -> AgentResult<()> {
        let mut current = self.current.lock();

        let next = ConfigLoader::load_path(&self.path)?;
        current.check_reloadable(&next)?;

        let snapshot = RegistrySnapshot::from_config(&next, self.factory.as_ref())?;
        self.registry.reload(snapshot);

        info!(
            path = %self.path.display(),
            applications = next.applications.len(),
            "configuration reloaded"
        );
        *current = next;
        Ok(())
    }
}
