//! Scriptable in-memory rule engine.
//!
//! The script is the application's directive text, one instruction per line:
//!
//! ```text
//! SecRuleEngine Off                            # report the rule engine as off
//! interrupt <phase> <action> <status> <rule>   # interrupt unconditionally
//! interrupt-if-header <name> <action> <status> <rule>
//!                                              # interrupt request headers when <name> is present
//! fail <phase>                                 # body phases return an engine error
//! fail-build                                   # factory refuses to build
//! report <rule> <severity>                     # report a matched rule on request headers
//! ```
//!
//! `<phase>` is one of `request-headers`, `request-body`, `response-headers`,
//! `response-body`. Every call is recorded in a shared [`Ledger`].

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use warden_core::{
    CoreError, CoreResult, Engine, EngineFactory, Interruption, InterruptionAction, MatchedRule,
    MatchedRuleCallback, Severity, Transaction,
};

/// Inspection phase that can be scripted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Request header evaluation.
    RequestHeaders,
    /// Request body evaluation.
    RequestBody,
    /// Response header evaluation.
    ResponseHeaders,
    /// Response body evaluation.
    ResponseBody,
}

impl Phase {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "request-headers" => Some(Self::RequestHeaders),
            "request-body" => Some(Self::RequestBody),
            "response-headers" => Some(Self::ResponseHeaders),
            "response-body" => Some(Self::ResponseBody),
            _ => None,
        }
    }
}

/// What happened to one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Phases run, in order.
    pub phases: Vec<Phase>,
    /// Request headers added.
    pub request_headers: Vec<(String, String)>,
    /// Response headers added.
    pub response_headers: Vec<(String, String)>,
    /// URI passed to the URI phase.
    pub uri: Option<String>,
    /// Number of `process_logging` calls.
    pub logged: usize,
    /// Number of `close` calls.
    pub closed: usize,
}

impl TransactionRecord {
    /// Logged and closed exactly once.
    pub fn finalized_once(&self) -> bool {
        self.logged == 1 && self.closed == 1
    }
}

/// Shared record of every transaction a [`ScriptedEngineFactory`] created.
#[derive(Debug, Clone, Default)]
pub struct Ledger {
    inner: Arc<Mutex<HashMap<String, TransactionRecord>>>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut TransactionRecord)) {
        f(self.inner.lock().entry(id.to_string()).or_default());
    }

    /// Snapshot of one transaction's record.
    pub fn record(&self, id: &str) -> Option<TransactionRecord> {
        self.inner.lock().get(id).cloned()
    }

    /// Whether the transaction was created at all.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains_key(id)
    }

    /// Number of `close` calls for `id`.
    pub fn close_count(&self, id: &str) -> usize {
        self.record(id).map_or(0, |r| r.closed)
    }

    /// Number of `process_logging` calls for `id`.
    pub fn logging_count(&self, id: &str) -> usize {
        self.record(id).map_or(0, |r| r.logged)
    }

    /// Whether `id` was logged and closed exactly once.
    pub fn finalized_once(&self, id: &str) -> bool {
        self.record(id).is_some_and(|r| r.finalized_once())
    }

    /// Number of transactions created.
    pub fn created(&self) -> usize {
        self.inner.lock().len()
    }

    /// Ids of transactions that were created but not closed yet.
    pub fn open_ids(&self) -> Vec<String> {
        self.inner
            .lock()
            .iter()
            .filter(|(_, r)| r.closed == 0)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[derive(Debug, Clone)]
enum Trigger {
    Always,
    RequestHeader(String),
}

#[derive(Debug, Clone)]
struct ScriptedInterruption {
    phase: Phase,
    trigger: Trigger,
    interruption: Interruption,
}

#[derive(Debug, Clone, Default)]
struct Script {
    engine_off: bool,
    interruptions: Vec<ScriptedInterruption>,
    failures: Vec<Phase>,
    reports: Vec<(u64, Severity)>,
}

fn parse_action(s: &str) -> CoreResult<InterruptionAction> {
    match s {
        "allow" => Ok(InterruptionAction::Allow),
        "deny" => Ok(InterruptionAction::Deny),
        "redirect" => Ok(InterruptionAction::Redirect),
        "drop" => Ok(InterruptionAction::Drop),
        other => Err(CoreError::engine_init(format!("unknown action {other}"))),
    }
}

fn parse_severity(s: &str) -> CoreResult<Severity> {
    Ok(match s {
        "emergency" => Severity::Emergency,
        "alert" => Severity::Alert,
        "critical" => Severity::Critical,
        "error" => Severity::Error,
        "warning" => Severity::Warning,
        "notice" => Severity::Notice,
        "info" => Severity::Info,
        "debug" => Severity::Debug,
        other => return Err(CoreError::engine_init(format!("unknown severity {other}"))),
    })
}

fn parse_number<T: std::str::FromStr>(s: Option<&str>, what: &str) -> CoreResult<T> {
    s.and_then(|s| s.parse().ok())
        .ok_or_else(|| CoreError::engine_init(format!("invalid {what}")))
}

fn parse_interruption(words: &[&str]) -> CoreResult<Interruption> {
    let action = parse_action(words.first().copied().unwrap_or_default())?;
    let status = parse_number(words.get(1).copied(), "status")?;
    let rule_id = parse_number(words.get(2).copied(), "rule id")?;
    let mut interruption = Interruption::new(action, status, rule_id);
    if let Some(data) = words.get(3) {
        interruption = interruption.with_data(*data);
    }
    Ok(interruption)
}

impl Script {
    fn parse(directives: &str) -> CoreResult<Self> {
        let mut script = Self::default();

        for line in directives.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                ["SecRuleEngine", mode] => script.engine_off = mode.eq_ignore_ascii_case("off"),
                ["fail-build"] => return Err(CoreError::engine_init("scripted build failure")),
                ["fail", phase] => script.failures.push(
                    Phase::parse(phase)
                        .ok_or_else(|| CoreError::engine_init(format!("unknown phase {phase}")))?,
                ),
                ["interrupt", phase, rest @ ..] => {
                    let phase = Phase::parse(phase)
                        .ok_or_else(|| CoreError::engine_init(format!("unknown phase {phase}")))?;
                    script.interruptions.push(ScriptedInterruption {
                        phase,
                        trigger: Trigger::Always,
                        interruption: parse_interruption(rest)?,
                    });
                }
                ["interrupt-if-header", name, rest @ ..] => {
                    script.interruptions.push(ScriptedInterruption {
                        phase: Phase::RequestHeaders,
                        trigger: Trigger::RequestHeader((*name).to_string()),
                        interruption: parse_interruption(rest)?,
                    });
                }
                ["report", rule, severity] => script.reports.push((
                    parse_number(Some(*rule), "rule id")?,
                    parse_severity(severity)?,
                )),
                _ => return Err(CoreError::engine_init(format!("unknown directive: {line}"))),
            }
        }

        Ok(script)
    }
}

/// Factory for [`ScriptedEngine`]s sharing one [`Ledger`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedEngineFactory {
    ledger: Ledger,
}

impl ScriptedEngineFactory {
    /// Create a factory with a fresh ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// The ledger shared by all engines built by this factory.
    pub fn ledger(&self) -> Ledger {
        self.ledger.clone()
    }
}

impl EngineFactory for ScriptedEngineFactory {
    fn build(&self, directives: &str, on_match: MatchedRuleCallback) -> CoreResult<Arc<dyn Engine>> {
        Ok(Arc::new(ScriptedEngine {
            script: Arc::new(Script::parse(directives)?),
            ledger: self.ledger.clone(),
            on_match,
        }))
    }
}

/// Deterministic engine driven by a directive script.
pub struct ScriptedEngine {
    script: Arc<Script>,
    ledger: Ledger,
    on_match: MatchedRuleCallback,
}

impl std::fmt::Debug for ScriptedEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedEngine")
            .field("script", &self.script)
            .finish_non_exhaustive()
    }
}

impl Engine for ScriptedEngine {
    fn new_transaction(&self, id: &str) -> Box<dyn Transaction> {
        self.ledger.update(id, |_| {});
        Box::new(ScriptedTransaction {
            id: id.to_string(),
            script: Arc::clone(&self.script),
            ledger: self.ledger.clone(),
            on_match: Arc::clone(&self.on_match),
            request_headers: Vec::new(),
        })
    }
}

struct ScriptedTransaction {
    id: String,
    script: Arc<Script>,
    ledger: Ledger,
    on_match: MatchedRuleCallback,
    request_headers: Vec<String>,
}

impl ScriptedTransaction {
    fn run(&mut self, phase: Phase) -> Option<Interruption> {
        self.ledger.update(&self.id, |r| r.phases.push(phase));
        self.script
            .interruptions
            .iter()
            .find(|s| {
                s.phase == phase
                    && match &s.trigger {
                        Trigger::Always => true,
                        Trigger::RequestHeader(name) => self
                            .request_headers
                            .iter()
                            .any(|h| h.eq_ignore_ascii_case(name)),
                    }
            })
            .map(|s| s.interruption.clone())
    }

    fn run_fallible(&mut self, phase: Phase) -> CoreResult<Option<Interruption>> {
        if self.script.failures.contains(&phase) {
            self.ledger.update(&self.id, |r| r.phases.push(phase));
            return Err(CoreError::engine(format!("scripted failure in {phase:?}")));
        }
        Ok(self.run(phase))
    }
}

impl Transaction for ScriptedTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_rule_engine_off(&self) -> bool {
        self.script.engine_off
    }

    fn process_connection(&mut self, _: IpAddr, _: u16, _: IpAddr, _: u16) {}

    fn process_uri(&mut self, uri: &str, _method: &str, _protocol: &str) {
        let uri = uri.to_string();
        self.ledger.update(&self.id, |r| r.uri = Some(uri));
    }

    fn add_request_header(&mut self, key: &str, value: &str) {
        self.request_headers.push(key.to_string());
        let pair = (key.to_string(), value.to_string());
        self.ledger.update(&self.id, |r| r.request_headers.push(pair));
    }

    fn process_request_headers(&mut self) -> Option<Interruption> {
        for (rule_id, severity) in &self.script.reports {
            (self.on_match)(&MatchedRule {
                transaction_id: self.id.clone(),
                rule_id: *rule_id,
                severity: *severity,
                message: format!("scripted match {rule_id}"),
            });
        }
        self.run(Phase::RequestHeaders)
    }

    fn write_request_body(&mut self, _: &[u8]) -> CoreResult<Option<Interruption>> {
        Ok(None)
    }

    fn process_request_body(&mut self) -> CoreResult<Option<Interruption>> {
        self.run_fallible(Phase::RequestBody)
    }

    fn add_response_header(&mut self, key: &str, value: &str) {
        let pair = (key.to_string(), value.to_string());
        self.ledger.update(&self.id, |r| r.response_headers.push(pair));
    }

    fn process_response_headers(&mut self, _: u16, _: &str) -> Option<Interruption> {
        self.run(Phase::ResponseHeaders)
    }

    fn write_response_body(&mut self, _: &[u8]) -> CoreResult<Option<Interruption>> {
        Ok(None)
    }

    fn process_response_body(&mut self) -> CoreResult<Option<Interruption>> {
        self.run_fallible(Phase::ResponseBody)
    }

    fn process_logging(&mut self) {
        self.ledger.update(&self.id, |r| r.logged += 1);
    }

    fn close(&mut self) -> CoreResult<()> {
        self.ledger.update(&self.id, |r| r.closed += 1);
        Ok(())
    }
}
