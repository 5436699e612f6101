//! Message dispatch: decode, resolve, inspect, answer.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, info_span, warn, Span};
use warden_core::{
    decode_request, decode_response, Args, FieldError, Interruption, MessageKind, Verdict,
};
use warden_telemetry::logging::fields;
use warden_telemetry::metrics::{record_interruption, record_message};

use crate::error::{AgentError, AgentResult};
use crate::registry::ApplicationRegistry;

/// The transaction bridge between the proxy and the applications' engines.
///
/// Cheap to share: every connection task holds an `Arc<Agent>`.
#[derive(Debug)]
pub struct Agent {
    registry: Arc<ApplicationRegistry>,
}

impl Agent {
    /// Create an agent serving `registry`.
    pub fn new(registry: Arc<ApplicationRegistry>) -> Self {
        Self { registry }
    }

    /// The application registry.
    pub fn registry(&self) -> &Arc<ApplicationRegistry> {
        &self.registry
    }

    /// Handle one message and produce the verdict for the proxy.
    ///
    /// Never fails: errors are logged and reported as `error = 1`.
    pub fn handle(&self, kind: MessageKind, args: &Args) -> Verdict {
        let start = Instant::now();
        let span = info_span!(
            "message",
            kind = %kind,
            app = tracing::field::Empty,
            tx = tracing::field::Empty,
        );
        let _enter = span.enter();

        let result = match kind {
            MessageKind::Request => self.handle_request(args),
            MessageKind::Response => self.handle_response(args),
        };

        let (verdict, outcome) = match result {
            Ok(verdict) if verdict.is_hit() => (verdict, "interrupted"),
            Ok(verdict) => (verdict, "pass"),
            Err(e) => {
                log_error(&e);
                (Verdict::error(), e.category())
            }
        };

        record_message(kind.as_str(), outcome, start.elapsed());
        verdict
    }

    /// Run the request path.
    ///
    /// # Errors
    ///
    /// Returns decode, resolution, header and engine errors.
    pub fn handle_request(&self, args: &Args) -> AgentResult<Verdict> {
        let decoded =
            decode_request(args).map_err(|e| AgentError::decode(MessageKind::Request, e))?;
        log_warnings(&decoded.warnings);
        let req = decoded.value;

        let span = Span::current();
        span.record(fields::TX, req.id.as_str());
        if req.id_generated {
            debug!(tx = %req.id, "generated transaction id");
        }

        let app = self.registry.resolve(req.app.as_deref())?;
        span.record(fields::APP, app.name());

        let verdict = match app.inspect_request(&req)? {
            Some(interruption) => interrupted(&interruption),
            None => Verdict::miss(),
        };
        Ok(verdict.with_id(req.id))
    }

    /// Run the response path.
    ///
    /// A transaction still held by an application retired by a reload is
    /// answered by that application, whatever the current configuration
    /// says about the requested name.
    ///
    /// # Errors
    ///
    /// Returns decode, resolution, cache, header and engine errors.
    pub fn handle_response(&self, args: &Args) -> AgentResult<Verdict> {
        let decoded =
            decode_response(args).map_err(|e| AgentError::decode(MessageKind::Response, e))?;
        log_warnings(&decoded.warnings);
        let resp = decoded.value;

        let span = Span::current();
        span.record(fields::TX, resp.id.as_str());

        if let Some(retired) = self.registry.find_retired(resp.app.as_deref(), &resp.id) {
            span.record(fields::APP, retired.name());
            debug!("transaction belongs to a previous configuration");
            return Ok(response_verdict(retired.inspect_response(&resp)?));
        }

        let app = self.registry.resolve(resp.app.as_deref())?;
        span.record(fields::APP, app.name());

        // A reload between the two lookups retires the application that
        // cached the transaction.
        let outcome = match app.inspect_response(&resp) {
            Err(not_found @ AgentError::TransactionNotFound { .. }) => {
                match self.registry.find_retired(resp.app.as_deref(), &resp.id) {
                    Some(retired) => retired.inspect_response(&resp),
                    None => Err(not_found),
                }
            }
            other => other,
        }?;

        Ok(response_verdict(outcome))
    }

    /// Finalize every cached transaction.
    ///
    /// Call once message dispatch has stopped.
    pub fn shutdown(&self) -> usize {
        let drained = self.registry.drain_all();
        info!(drained, "finalized pending transactions");
        drained
    }
}

fn response_verdict(outcome: Option<Interruption>) -> Verdict {
    match outcome {
        Some(interruption) => interrupted(&interruption),
        None => Verdict::miss(),
    }
}

fn interrupted(interruption: &Interruption) -> Verdict {
    info!(
        status = interruption.status,
        action = %interruption.action,
        rule_id = interruption.rule_id,
        "transaction interrupted"
    );
    record_interruption(interruption.action.as_str());
    Verdict::interrupted(interruption)
}

fn log_warnings(warnings: &[FieldError]) {
    for warning in warnings {
        warn!(field = warning.field, error = %warning.error, "invalid argument, default used");
    }
}

fn log_error(err: &AgentError) {
    match err {
        AgentError::Engine { .. } | AgentError::EngineInit { .. } => {
            error!(error = %err, "failed to process message");
        }
        AgentError::TransactionNotFound { .. } => {
            info!(error = %err, "no pending transaction for response");
        }
        _ => warn!(error = %err, "failed to process message"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_config::{AgentConfig, ApplicationConfig};
    use warden_core::VarValue;
    use warden_test::{request_args, response_args, ScriptedEngineFactory};

    use crate::registry::RegistrySnapshot;

    fn agent(factory: &ScriptedEngineFactory, apps: Vec<ApplicationConfig>) -> Agent {
        let config = apps
            .into_iter()
            .fold(AgentConfig::builder(), |b, app| b.application(app))
            .default_application("default")
            .build();
        let snapshot = RegistrySnapshot::from_config(&config, factory).unwrap();
        Agent::new(Arc::new(ApplicationRegistry::new(snapshot)))
    }

    #[test]
    fn test_request_verdict_carries_id() {
        let factory = ScriptedEngineFactory::new();
        let agent = agent(&factory, vec![ApplicationConfig::new("default", "")]);

        let verdict = agent.handle(MessageKind::Request, &request_args("default", "abc"));
        assert!(!verdict.is_hit());
        assert!(!verdict.is_error());
        assert_eq!(verdict.get("id"), Some(&VarValue::Str("abc".to_string())));
    }

    #[test]
    fn test_generated_id_is_returned() {
        let factory = ScriptedEngineFactory::new();
        let agent = agent(&factory, vec![ApplicationConfig::new("default", "")]);

        let mut args = request_args("default", "");
        args.remove("id");
        let verdict = agent.handle(MessageKind::Request, &args);

        match verdict.get("id") {
            Some(VarValue::Str(id)) => {
                assert_eq!(id.len(), 16);
                assert!(id.chars().all(|c| c.is_ascii_uppercase()));
                assert!(factory.ledger().finalized_once(id));
            }
            other => panic!("unexpected id variable: {other:?}"),
        }
    }

    #[test]
    fn test_interrupted_verdict() {
        let factory = ScriptedEngineFactory::new();
        let agent = agent(
            &factory,
            vec![ApplicationConfig::new(
                "default",
                "interrupt-if-header X-Attack deny 403 942100",
            )],
        );

        let args = request_args("default", "r1").with("headers", "X-Attack: 1 OR 1=1\r\n");
        let verdict = agent.handle(MessageKind::Request, &args);

        assert!(verdict.is_hit());
        assert_eq!(verdict.get("status"), Some(&VarValue::Int(403)));
        assert_eq!(verdict.get("action"), Some(&VarValue::Str("deny".to_string())));
        assert_eq!(verdict.get("ruleid"), Some(&VarValue::Int(942_100)));
        assert_eq!(verdict.get("id"), Some(&VarValue::Str("r1".to_string())));
    }

    #[test]
    fn test_decode_error_is_error_verdict() {
        let factory = ScriptedEngineFactory::new();
        let agent = agent(&factory, vec![ApplicationConfig::new("default", "")]);

        let args = Args::new().with("id", "r1");
        let verdict = agent.handle(MessageKind::Response, &args);
        assert!(verdict.is_error());

        let args = request_args("default", "r1").with("id", 7_i64);
        assert!(agent.handle(MessageKind::Request, &args).is_error());
        assert_eq!(factory.ledger().created(), 0);
    }

    #[test]
    fn test_unknown_response_is_error_verdict() {
        let factory = ScriptedEngineFactory::new();
        let agent = agent(
            &factory,
            vec![ApplicationConfig::new("default", "").with_response_check(true)],
        );

        let err = agent
            .handle_response(&response_args("default", "missing", 200))
            .unwrap_err();
        assert!(matches!(err, AgentError::TransactionNotFound { .. }));
        assert!(agent
            .handle(MessageKind::Response, &response_args("default", "missing", 200))
            .is_error());
    }

    #[test]
    fn test_full_exchange_and_shutdown() {
        let factory = ScriptedEngineFactory::new();
        let agent = agent(
            &factory,
            vec![ApplicationConfig::new("default", "").with_response_check(true)],
        );

        agent.handle(MessageKind::Request, &request_args("default", "done"));
        agent.handle(MessageKind::Request, &request_args("default", "pending"));

        let verdict = agent.handle(MessageKind::Response, &response_args("default", "done", 200));
        assert_eq!(verdict.get("fail"), Some(&VarValue::Int(0)));

        assert_eq!(agent.shutdown(), 1);
        assert!(factory.ledger().finalized_once("done"));
        assert!(factory.ledger().finalized_once("pending"));
    }
}
