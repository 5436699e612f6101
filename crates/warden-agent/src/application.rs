//! One inspection profile: engine, settings and transaction cache.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use warden_config::ApplicationConfig;
use warden_core::{
    parse_headers, Engine, EngineFactory, InspectionRequest, InspectionResponse, Interruption,
    MatchedRule, MatchedRuleCallback, Severity, Transaction,
};

use crate::cache::TransactionCache;
use crate::error::{AgentError, AgentResult};
use crate::handle::TransactionHandle;

/// Upper bound for the cache sweep interval.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// A named, independently configured inspection profile.
///
/// Immutable once built; a reload builds a new `Application`. Dropping the
/// last reference finalizes every transaction still cached.
pub struct Application {
    config: ApplicationConfig,
    engine: Arc<dyn Engine>,
    cache: Arc<TransactionCache>,
    sweeper: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Application {
    /// Build the engine for `config`.
    ///
    /// When called inside a tokio runtime, a sweeper task evicts expired
    /// transactions in the background; otherwise expiry is only enforced on
    /// lookup.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::EngineInit` if the engine rejects the directives.
    pub fn new(config: ApplicationConfig, factory: &dyn EngineFactory) -> AgentResult<Self> {
        let engine = factory
            .build(&config.directives, matched_rule_logger(&config.name))
            .map_err(|e| AgentError::engine_init(&config.name, &e))?;

        let cache = Arc::new(TransactionCache::new(&config.name));
        let sweeper = Handle::try_current().ok().map(|runtime| {
            let every = config.transaction_ttl().min(MAX_SWEEP_INTERVAL);
            cache.spawn_sweeper(&runtime, every)
        });

        debug!(
            app = %config.name,
            response_check = config.response_check,
            ttl_ms = u64::try_from(config.transaction_ttl().as_millis()).unwrap_or(u64::MAX),
            "application built"
        );

        Ok(Self {
            config,
            engine,
            cache,
            sweeper,
        })
    }

    /// Application name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Application settings.
    pub fn config(&self) -> &ApplicationConfig {
        &self.config
    }

    /// Whether responses are inspected.
    pub fn response_check(&self) -> bool {
        self.config.response_check
    }

    /// How long a transaction waits for its response.
    pub fn transaction_ttl(&self) -> Duration {
        self.config.transaction_ttl()
    }

    /// The transaction cache.
    pub fn cache(&self) -> &TransactionCache {
        &self.cache
    }

    /// Run the request phases for `req`.
    ///
    /// Returns the interruption, if any. Without interruption the transaction
    /// is cached when response checking is on and finalized otherwise; an
    /// interrupted transaction is always finalized and never cached.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::MalformedHeader` or `AgentError::Engine`; the
    /// transaction is finalized in both cases.
    pub fn inspect_request(&self, req: &InspectionRequest) -> AgentResult<Option<Interruption>> {
        let handle = Arc::new(TransactionHandle::new(self.engine.new_transaction(&req.id)));
        let mut tx = handle
            .try_begin_finalize()
            .ok_or_else(|| AgentError::transaction_busy(&req.id))?;

        if tx.is_rule_engine_off() {
            warn!(tx = %req.id, app = %self.name(), "rule engine is off, skipping request phases");
        } else if let Some(interruption) = self.run_request_phases(&mut *tx, req)? {
            return Ok(Some(interruption));
        }

        if self.response_check() {
            tx.release();
            self.cache.put(handle, self.transaction_ttl());
        }
        Ok(None)
    }

    /// Run the response phases for the transaction `resp` answers.
    ///
    /// The cached transaction is removed before any phase runs and is
    /// finalized before this returns.
    ///
    /// # Errors
    ///
    /// Returns `AgentError::ResponseCheckDisabled` before any lookup when the
    /// application does not inspect responses, `AgentError::TransactionNotFound`
    /// when nothing is cached under the id, and header or engine errors from
    /// the phases.
    pub fn inspect_response(&self, resp: &InspectionResponse) -> AgentResult<Option<Interruption>> {
        if !self.response_check() {
            return Err(AgentError::response_check_disabled(self.name()));
        }

        let handle = self
            .cache
            .take(&resp.id)
            .ok_or_else(|| AgentError::transaction_not_found(&resp.id))?;
        let mut tx = handle
            .try_begin_finalize()
            .ok_or_else(|| AgentError::transaction_busy(&resp.id))?;

        if tx.is_rule_engine_off() {
            return Ok(None);
        }
        self.run_response_phases(&mut *tx, resp)
    }

    /// Finalize every cached transaction.
    pub fn drain(&self) -> usize {
        self.cache.drain_all()
    }

    fn run_request_phases(
        &self,
        tx: &mut dyn Transaction,
        req: &InspectionRequest,
    ) -> AgentResult<Option<Interruption>> {
        tx.process_connection(req.src_ip, req.src_port, req.dst_ip, req.dst_port);
        tx.process_uri(&req.uri(), &req.method, &req.protocol());

        parse_headers(&req.headers, |key, value| tx.add_request_header(key, value))
            .map_err(|e| AgentError::malformed_header(&req.id, e))?;

        if let Some(interruption) = tx.process_request_headers() {
            return Ok(Some(interruption));
        }

        if let Some(interruption) = tx
            .write_request_body(&req.body)
            .map_err(|e| AgentError::engine(&req.id, self.name(), &e))?
        {
            return Ok(Some(interruption));
        }

        tx.process_request_body()
            .map_err(|e| AgentError::engine(&req.id, self.name(), &e))
    }

    fn run_response_phases(
        &self,
        tx: &mut dyn Transaction,
        resp: &InspectionResponse,
    ) -> AgentResult<Option<Interruption>> {
        parse_headers(&resp.headers, |key, value| tx.add_response_header(key, value))
            .map_err(|e| AgentError::malformed_header(&resp.id, e))?;

        if let Some(interruption) = tx.process_response_headers(resp.status, &resp.protocol()) {
            return Ok(Some(interruption));
        }

        if let Some(interruption) = tx
            .write_response_body(&resp.body)
            .map_err(|e| AgentError::engine(&resp.id, self.name(), &e))?
        {
            return Ok(Some(interruption));
        }

        tx.process_response_body()
            .map_err(|e| AgentError::engine(&resp.id, self.name(), &e))
    }
}

impl Drop for Application {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        let drained = self.cache.drain_all();
        if drained > 0 {
            info!(app = %self.name(), drained, "released application with pending transactions");
        }
    }
}

/// Log matched rules at the level matching their severity.
fn matched_rule_logger(app: &str) -> MatchedRuleCallback {
    let app = app.to_string();
    Arc::new(move |rule: &MatchedRule| match rule.severity {
        Severity::Emergency | Severity::Alert | Severity::Critical | Severity::Error => {
            error!(app = %app, tx = %rule.transaction_id, rule_id = rule.rule_id, "{}", rule.message);
        }
        Severity::Warning => {
            warn!(app = %app, tx = %rule.transaction_id, rule_id = rule.rule_id, "{}", rule.message);
        }
        Severity::Notice | Severity::Info => {
            info!(app = %app, tx = %rule.transaction_id, rule_id = rule.rule_id, "{}", rule.message);
        }
        Severity::Debug => {
            debug!(app = %app, tx = %rule.transaction_id, rule_id = rule.rule_id, "{}", rule.message);
        }
    })
}
