//! Built-in engine that never interrupts.
//!
//! Used when no real rule engine is linked in. It understands a single
//! directive, `SecRuleEngine On|Off|DetectionOnly`, so that the agent's
//! engine-off path can be exercised; every other directive is ignored with a
//! warning.

use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::engine::{Engine, EngineFactory, Interruption, MatchedRuleCallback, Transaction};
use crate::error::{CoreError, CoreResult};

/// Rule engine mode selected by `SecRuleEngine`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuleEngineMode {
    /// Rules are evaluated.
    #[default]
    On,
    /// Rules are not evaluated.
    Off,
    /// Rules are evaluated but never disrupt.
    DetectionOnly,
}

impl RuleEngineMode {
    fn parse(value: &str) -> CoreResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            "detectiononly" => Ok(Self::DetectionOnly),
            other => Err(CoreError::engine_init(format!(
                "invalid SecRuleEngine value: {other}"
            ))),
        }
    }
}

/// Factory for [`PassthroughEngine`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughEngineFactory;

impl PassthroughEngineFactory {
    /// Create the factory.
    pub fn new() -> Self {
        Self
    }
}

impl EngineFactory for PassthroughEngineFactory {
    fn build(&self, directives: &str, _on_match: MatchedRuleCallback) -> CoreResult<Arc<dyn Engine>> {
        let mut mode = RuleEngineMode::default();
        let mut ignored = 0_usize;

        for line in directives.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(name), Some(value)) if name.eq_ignore_ascii_case("SecRuleEngine") => {
                    mode = RuleEngineMode::parse(value)?;
                }
                _ => ignored += 1,
            }
        }

        if ignored > 0 {
            warn!(
                ignored,
                "passthrough engine ignores rule directives; traffic is not inspected"
            );
        }
        debug!(?mode, "passthrough engine built");

        Ok(Arc::new(PassthroughEngine { mode }))
    }
}

/// Engine that never interrupts.
#[derive(Debug)]
pub struct PassthroughEngine {
    mode: RuleEngineMode,
}

impl PassthroughEngine {
    /// The configured rule engine mode.
    pub fn mode(&self) -> RuleEngineMode {
        self.mode
    }
}

impl Engine for PassthroughEngine {
    fn new_transaction(&self, id: &str) -> Box<dyn Transaction> {
        Box::new(PassthroughTransaction {
            id: id.to_string(),
            mode: self.mode,
        })
    }
}

#[derive(Debug)]
struct PassthroughTransaction {
    id: String,
    mode: RuleEngineMode,
}

impl Transaction for PassthroughTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_rule_engine_off(&self) -> bool {
        self.mode == RuleEngineMode::Off
    }

    fn process_connection(&mut self, _: IpAddr, _: u16, _: IpAddr, _: u16) {}

    fn process_uri(&mut self, _: &str, _: &str, _: &str) {}

    fn add_request_header(&mut self, _: &str, _: &str) {}

    fn process_request_headers(&mut self) -> Option<Interruption> {
        None
    }

    fn write_request_body(&mut self, _: &[u8]) -> CoreResult<Option<Interruption>> {
        Ok(None)
    }

    fn process_request_body(&mut self) -> CoreResult<Option<Interruption>> {
        Ok(None)
    }

    fn add_response_header(&mut self, _: &str, _: &str) {}

    fn process_response_headers(&mut self, _: u16, _: &str) -> Option<Interruption> {
        None
    }

    fn write_response_body(&mut self, _: &[u8]) -> CoreResult<Option<Interruption>> {
        Ok(None)
    }

    fn process_response_body(&mut self) -> CoreResult<Option<Interruption>> {
        Ok(None)
    }

    fn process_logging(&mut self) {}

    fn close(&mut self) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MatchedRule;

    fn build(directives: &str) -> CoreResult<Arc<dyn Engine>> {
        PassthroughEngineFactory::new().build(directives, Arc::new(|_: &MatchedRule| {}))
    }

    #[test]
    fn test_default_mode_on() {
        let engine = build("").unwrap();
        let tx = engine.new_transaction("a");
        assert_eq!(tx.id(), "a");
        assert!(!tx.is_rule_engine_off());
    }

    #[test]
    fn test_engine_off() {
        let engine = build("# comment\nSecRuleEngine Off\n").unwrap();
        assert!(engine.new_transaction("b").is_rule_engine_off());
    }

    #[test]
    fn test_detection_only_is_not_off() {
        let engine = build("secruleengine DetectionOnly").unwrap();
        assert!(!engine.new_transaction("c").is_rule_engine_off());
    }

    #[test]
    fn test_invalid_mode_rejected() {
        let err = build("SecRuleEngine Maybe").err().unwrap();
        assert!(matches!(err, CoreError::EngineInit { .. }));
    }

    #[test]
    fn test_never_interrupts() {
        let engine = build("SecRule ARGS \"@rx attack\" \"id:1,deny\"").unwrap();
        let mut tx = engine.new_transaction("d");
        assert!(tx.process_request_headers().is_none());
        assert!(tx.write_request_body(b"attack").unwrap().is_none());
        assert!(tx.process_request_body().unwrap().is_none());
        assert!(tx.process_response_headers(200, "HTTP/1.1").is_none());
        assert!(tx.close().is_ok());
    }
}
