//! Hot-swappable registry of named applications.
//!
//! Readers load the current [`RegistrySnapshot`] through an `ArcSwap`, so
//! resolution on the message path never takes a lock. A reload builds a
//! complete new snapshot off to the side and swaps the pointer.
//!
//! Applications replaced by a reload are kept in a retired list while they
//! still cache transactions, so a response can complete against the
//! application that handled its request. Once a retired application's cache
//! is empty it is released, which drains and drops its engine. Releasing
//! happens on reload, on response lookups and, inside a tokio runtime, on a
//! periodic pruning task that runs while anything is retired.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};
use warden_config::AgentConfig;
use warden_core::EngineFactory;

use crate::application::Application;
use crate::error::{AgentError, AgentResult};

/// How often retired applications are checked for empty caches.
const PRUNE_INTERVAL: Duration = Duration::from_millis(250);

type Retired = Mutex<Vec<Arc<Application>>>;

/// An immutable name to application map plus the default name.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    applications: HashMap<String, Arc<Application>>,
    default_application: Option<String>,
}

impl RegistrySnapshot {
    /// Create an empty snapshot.
    pub fn new(default_application: Option<String>) -> Self {
        Self {
            applications: HashMap::new(),
            default_application,
        }
    }

    /// Build every application in `config`.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::EngineInit` for the first application whose
    /// engine cannot be built.
    pub fn from_config(config: &AgentConfig, factory: &dyn EngineFactory) -> AgentResult<Self> {
        config
            .applications
            .iter()
            .try_fold(Self::new(config.default_application.clone()), |snapshot, app| {
                Ok(snapshot.with_application(Application::new(app.clone(), factory)?))
            })
    }

    /// Add an application, replacing one with the same name.
    #[must_use]
    pub fn with_application(mut self, application: Application) -> Self {
        self.applications
            .insert(application.name().to_string(), Arc::new(application));
        self
    }

    /// Look up an application by exact name.
    pub fn get(&self, name: &str) -> Option<&Arc<Application>> {
        self.applications.get(name)
    }

    /// Name of the default application.
    pub fn default_application(&self) -> Option<&str> {
        self.default_application.as_deref()
    }

    /// Application names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.applications.keys().map(String::as_str)
    }

    /// Number of applications.
    pub fn len(&self) -> usize {
        self.applications.len()
    }

    /// Whether the snapshot has no applications.
    pub fn is_empty(&self) -> bool {
        self.applications.is_empty()
    }

    /// Resolve `name`, falling back to the default application.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::ApplicationNotFound` when neither exists.
    pub fn resolve(&self, name: Option<&str>) -> AgentResult<Arc<Application>> {
        let requested = name.unwrap_or_default();
        if !requested.is_empty() {
            if let Some(app) = self.applications.get(requested) {
                return Ok(Arc::clone(app));
            }
        }

        let fallback = self
            .default_application
            .as_deref()
            .and_then(|default| self.applications.get(default))
            .ok_or_else(|| AgentError::application_not_found(requested))?;

        debug!(
            requested,
            app = %fallback.name(),
            "using default application"
        );
        Ok(Arc::clone(fallback))
    }
}

/// The agent's application registry.
#[derive(Debug)]
pub struct ApplicationRegistry {
    current: ArcSwap<RegistrySnapshot>,
    retired: Arc<Retired>,
    pruner: Mutex<Option<JoinHandle<()>>>,
}

impl ApplicationRegistry {
    /// Create a registry serving `snapshot`.
    pub fn new(snapshot: RegistrySnapshot) -> Self {
        Self {
            current: ArcSwap::from_pointee(snapshot),
            retired: Arc::new(Mutex::new(Vec::new())),
            pruner: Mutex::new(None),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.load_full()
    }

    /// Resolve an application in the current snapshot.
    ///
    /// The returned application stays usable even if a reload replaces it.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::ApplicationNotFound` when neither `name` nor the
    /// default application exists.
    pub fn resolve(&self, name: Option<&str>) -> AgentResult<Arc<Application>> {
        self.current.load().resolve(name)
    }

    /// Install `next` as the current snapshot.
    ///
    /// Applications of the previous snapshot are retired, not drained.
    pub fn reload(&self, next: RegistrySnapshot) {
        let names: Vec<String> = next.names().map(str::to_string).collect();
        let previous = self.current.swap(Arc::new(next));

        let remaining = {
            let mut retired = self.retired.lock();
            retired.extend(previous.applications.values().cloned());
            drop(previous);
            retired.retain(|app| !app.cache().is_empty());
            retired.len()
        };

        info!(
            applications = ?names,
            retired = remaining,
            "application registry reloaded"
        );
        if remaining > 0 {
            self.spawn_pruner();
        }
    }

    /// Find a retired application still holding transaction `id`.
    ///
    /// An application named `name` is preferred; any other retired
    /// application holding the id is returned otherwise, so a response still
    /// reaches its transaction after a reload renamed or removed the
    /// application.
    pub fn find_retired(&self, name: Option<&str>, id: &str) -> Option<Arc<Application>> {
        let mut retired = self.retired.lock();
        retired.retain(|app| !app.cache().is_empty());
        if retired.is_empty() {
            return None;
        }

        let holding = |app: &&Arc<Application>| app.cache().contains(id);
        retired
            .iter()
            .filter(holding)
            .find(|app| Some(app.name()) == name)
            .or_else(|| retired.iter().find(holding))
            .cloned()
    }

    /// Number of retired applications still holding transactions.
    ///
    /// Applications whose caches have emptied are released first.
    pub fn retired_count(&self) -> usize {
        let mut retired = self.retired.lock();
        retired.retain(|app| !app.cache().is_empty());
        retired.len()
    }

    /// Finalize every cached transaction, current and retired.
    ///
    /// Call only after message dispatch has stopped.
    pub fn drain_all(&self) -> usize {
        let retired: Vec<_> = std::mem::take(&mut *self.retired.lock());
        let snapshot = self.snapshot();

        snapshot
            .applications
            .values()
            .chain(retired.iter())
            .map(|app| app.drain())
            .sum()
    }

    /// Release retired applications in the background until none is left.
    fn spawn_pruner(&self) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let mut pruner = self.pruner.lock();
        if pruner.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let retired = Arc::downgrade(&self.retired);
        *pruner = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(retired) = retired.upgrade() else {
                    break;
                };
                let mut retired = retired.lock();
                let before = retired.len();
                retired.retain(|app| !app.cache().is_empty());
                if retired.len() < before {
                    debug!(
                        released = before - retired.len(),
                        remaining = retired.len(),
                        "released retired applications"
                    );
                }
                if retired.is_empty() {
                    break;
                }
            }
        }));
    }
}

impl Drop for ApplicationRegistry {
    fn drop(&mut self) {
        if let Some(pruner) = self.pruner.get_mut().take() {
            pruner.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_config::ApplicationConfig;
    use warden_core::{decode_request, decode_response};
    use warden_test::{request_args, response_args, ScriptedEngineFactory};

    fn snapshot(factory: &ScriptedEngineFactory, names: &[&str], default: Option<&str>) -> RegistrySnapshot {
        let config = names
            .iter()
            .fold(AgentConfig::builder(), |builder, name| {
                builder.application(ApplicationConfig::new(*name, "").with_response_check(true))
            });
        let config = match default {
            Some(default) => config.default_application(default),
            None => config,
        }
        .build();
        RegistrySnapshot::from_config(&config, factory).unwrap()
    }

    #[test]
    fn test_resolve_exact() {
        let factory = ScriptedEngineFactory::new();
        let registry = ApplicationRegistry::new(snapshot(&factory, &["a", "b"], Some("a")));

        assert_eq!(registry.resolve(Some("b")).unwrap().name(), "b");
    }

    #[test]
    fn test_resolve_falls_back_to_default() {
        let factory = ScriptedEngineFactory::new();
        let registry = ApplicationRegistry::new(snapshot(&factory, &["a", "b"], Some("a")));

        assert_eq!(registry.resolve(None).unwrap().name(), "a");
        assert_eq!(registry.resolve(Some("")).unwrap().name(), "a");
        assert_eq!(registry.resolve(Some("unknown-app")).unwrap().name(), "a");
    }

    #[test]
    fn test_resolve_without_default() {
        let factory = ScriptedEngineFactory::new();
        let registry = ApplicationRegistry::new(snapshot(&factory, &["a"], None));

        for name in [None, Some(""), Some("unknown-app")] {
            let err = registry.resolve(name).unwrap_err();
            assert!(matches!(err, AgentError::ApplicationNotFound { .. }));
        }
    }

    #[test]
    fn test_from_config_propagates_build_failure() {
        let factory = ScriptedEngineFactory::new();
        let config = AgentConfig::builder()
            .application(ApplicationConfig::new("ok", ""))
            .application(ApplicationConfig::new("bad", "fail-build"))
            .build();

        let err = RegistrySnapshot::from_config(&config, &factory).unwrap_err();
        assert!(matches!(err, AgentError::EngineInit { ref app, .. } if app == "bad"));
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let factory = ScriptedEngineFactory::new();
        let registry = ApplicationRegistry::new(snapshot(&factory, &["a"], None));

        let held = registry.resolve(Some("a")).unwrap();
        registry.reload(snapshot(&factory, &["b"], Some("b")));

        assert_eq!(registry.resolve(Some("a")).unwrap().name(), "b");
        assert_eq!(held.name(), "a");
        assert_eq!(registry.snapshot().len(), 1);
        assert_eq!(registry.retired_count(), 0);
    }

    #[test]
    fn test_retired_application_keeps_pending_transaction() {
        let factory = ScriptedEngineFactory::new();
        let registry = ApplicationRegistry::new(snapshot(&factory, &["a"], None));

        let req = decode_request(&request_args("a", "r1")).unwrap().value;
        registry.resolve(Some("a")).unwrap().inspect_request(&req).unwrap();

        registry.reload(snapshot(&factory, &["a"], None));
        assert_eq!(registry.retired_count(), 1);
        assert_eq!(factory.ledger().close_count("r1"), 0);

        let current = registry.resolve(Some("a")).unwrap();
        assert!(!current.cache().contains("r1"));

        let old = registry.find_retired(Some("a"), "r1").unwrap();
        let resp = decode_response(&response_args("a", "r1", 200)).unwrap().value;
        old.inspect_response(&resp).unwrap();
        drop(old);

        assert!(registry.find_retired(Some("a"), "r1").is_none());
        assert_eq!(registry.retired_count(), 0);
        assert!(factory.ledger().finalized_once("r1"));
    }

    #[test]
    fn test_find_retired_by_transaction_id() {
        let factory = ScriptedEngineFactory::new();
        let registry = ApplicationRegistry::new(snapshot(&factory, &["a", "b"], None));

        let req = decode_request(&request_args("a", "r1")).unwrap().value;
        registry.resolve(Some("a")).unwrap().inspect_request(&req).unwrap();
        registry.reload(snapshot(&factory, &["c"], Some("c")));

        assert_eq!(registry.find_retired(Some("a"), "r1").unwrap().name(), "a");
        assert_eq!(registry.find_retired(Some("c"), "r1").unwrap().name(), "a");
        assert_eq!(registry.find_retired(None, "r1").unwrap().name(), "a");
        assert!(registry.find_retired(Some("a"), "other").is_none());
    }

    #[tokio::test]
    async fn test_retired_application_released_after_eviction() {
        let factory = ScriptedEngineFactory::new();
        let config = AgentConfig::builder()
            .application(
                ApplicationConfig::new("a", "")
                    .with_response_check(true)
                    .with_transaction_ttl(Duration::from_millis(20)),
            )
            .build();
        let registry =
            ApplicationRegistry::new(RegistrySnapshot::from_config(&config, &factory).unwrap());

        let app = registry.resolve(Some("a")).unwrap();
        let req = decode_request(&request_args("a", "idle")).unwrap().value;
        app.inspect_request(&req).unwrap();
        let old = Arc::downgrade(&app);
        drop(app);
        registry.reload(snapshot(&factory, &["a"], None));
        assert!(old.upgrade().is_some());

        tokio::time::sleep(Duration::from_millis(800)).await;

        // Released without any further registry call.
        assert!(old.upgrade().is_none());
        assert!(factory.ledger().finalized_once("idle"));
    }

    #[test]
    fn test_drain_all_covers_retired() {
        let factory = ScriptedEngineFactory::new();
        let registry = ApplicationRegistry::new(snapshot(&factory, &["a"], None));
        let app = registry.resolve(Some("a")).unwrap();

        let req = decode_request(&request_args("a", "old")).unwrap().value;
        app.inspect_request(&req).unwrap();
        drop(app);

        registry.reload(snapshot(&factory, &["a"], None));
        let req = decode_request(&request_args("a", "new")).unwrap().value;
        registry.resolve(Some("a")).unwrap().inspect_request(&req).unwrap();

        assert_eq!(registry.drain_all(), 2);
        assert!(factory.ledger().finalized_once("old"));
        assert!(factory.ledger().finalized_once("new"));
        assert_eq!(registry.drain_all(), 0);
    }
}
