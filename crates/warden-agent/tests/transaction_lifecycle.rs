//! End-to-end tests of the transaction bridge.
//!
//! Every test drives the agent through its public API with a
//! `ScriptedEngineFactory`, whose ledger counts `process_logging` and
//! `close` per transaction.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use warden_agent::{Agent, AgentError, Application, ApplicationRegistry, RegistrySnapshot};
use warden_config::{AgentConfig, ApplicationConfig};
use warden_core::{
    decode_request, decode_response, parse_headers, Args, CoreError, MessageKind, VarValue,
};
use warden_test::{request_args, response_args, ScriptedEngineFactory};

fn agent_with(factory: &ScriptedEngineFactory, config: &AgentConfig) -> Agent {
    let snapshot = RegistrySnapshot::from_config(config, factory).unwrap();
    Agent::new(Arc::new(ApplicationRegistry::new(snapshot)))
}

fn checked_app(name: &str, directives: &str) -> ApplicationConfig {
    ApplicationConfig::new(name, directives).with_response_check(true)
}

#[test]
fn test_response_and_eviction_race_finalizes_once() {
    let factory = ScriptedEngineFactory::new();
    let config = checked_app("race", "").with_transaction_ttl(Duration::from_millis(2));
    let app = Arc::new(Application::new(config, &factory).unwrap());

    let mut responded = 0;
    let mut evicted = 0;

    for i in 0..200 {
        let id = format!("tx-{i}");
        let req = decode_request(&request_args("race", &id)).unwrap().value;
        app.inspect_request(&req).unwrap();

        // Let the entry get close to its expiry before both paths start.
        thread::sleep(Duration::from_millis(1));
        let barrier = Arc::new(Barrier::new(2));

        let response = {
            let app = Arc::clone(&app);
            let barrier = Arc::clone(&barrier);
            let resp = decode_response(&response_args("race", &id, 200)).unwrap().value;
            thread::spawn(move || {
                barrier.wait();
                app.inspect_response(&resp)
            })
        };
        let sweeper = {
            let app = Arc::clone(&app);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                thread::sleep(Duration::from_millis(1));
                app.cache().evict_expired()
            })
        };

        match response.join().unwrap() {
            Ok(_) => responded += 1,
            Err(AgentError::TransactionNotFound { .. }) => evicted += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
        sweeper.join().unwrap();

        let ledger = factory.ledger();
        assert_eq!(ledger.logging_count(&id), 1, "{id} logged once");
        assert_eq!(ledger.close_count(&id), 1, "{id} closed once");
    }

    assert_eq!(responded + evicted, 200);
    assert!(app.cache().is_empty());
}

#[test]
fn test_ttl_eviction_finalizes_once() {
    let factory = ScriptedEngineFactory::new();
    let config = checked_app("ttl", "").with_transaction_ttl(Duration::from_millis(1));
    let app = Application::new(config, &factory).unwrap();

    let req = decode_request(&request_args("ttl", "short")).unwrap().value;
    app.inspect_request(&req).unwrap();
    assert!(app.cache().contains("short"));

    thread::sleep(Duration::from_millis(10));

    assert!(app.cache().get("short").is_none());
    assert_eq!(app.cache().evict_expired(), 0);
    assert!(factory.ledger().finalized_once("short"));

    let resp = decode_response(&response_args("ttl", "short", 200)).unwrap().value;
    let err = app.inspect_response(&resp).unwrap_err();
    assert!(matches!(err, AgentError::TransactionNotFound { .. }));
    assert!(factory.ledger().finalized_once("short"));
}

#[tokio::test]
async fn test_background_sweeper_evicts() {
    let factory = ScriptedEngineFactory::new();
    let config = checked_app("sweep", "").with_transaction_ttl(Duration::from_millis(20));
    let app = Application::new(config, &factory).unwrap();

    let req = decode_request(&request_args("sweep", "idle")).unwrap().value;
    app.inspect_request(&req).unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(app.cache().is_empty());
    assert!(factory.ledger().finalized_once("idle"));
}

#[test]
fn test_hot_reload_isolation() {
    let factory = ScriptedEngineFactory::new();
    let before = AgentConfig::builder()
        .application(checked_app("A", ""))
        .default_application("A")
        .build();
    let agent = agent_with(&factory, &before);

    let verdict = agent.handle(MessageKind::Request, &request_args("A", "in-flight"));
    assert!(!verdict.is_error());

    // The new "A" would deny every response; the old transaction must not see it.
    let after = AgentConfig::builder()
        .application(checked_app("A", "interrupt response-headers deny 403 1"))
        .default_application("A")
        .build();
    agent
        .registry()
        .reload(RegistrySnapshot::from_config(&after, &factory).unwrap());
    assert_eq!(factory.ledger().close_count("in-flight"), 0);

    let verdict = agent.handle(MessageKind::Response, &response_args("A", "in-flight", 200));
    assert!(!verdict.is_error());
    assert!(!verdict.is_hit());
    assert!(factory.ledger().finalized_once("in-flight"));
    assert_eq!(agent.registry().retired_count(), 0);

    // New transactions use the new configuration.
    agent.handle(MessageKind::Request, &request_args("A", "fresh"));
    let verdict = agent.handle(MessageKind::Response, &response_args("A", "fresh", 200));
    assert!(verdict.is_hit());
    assert!(factory.ledger().finalized_once("fresh"));
}

#[test]
fn test_reload_disabling_response_check_completes_pending() {
    let factory = ScriptedEngineFactory::new();
    let before = AgentConfig::builder()
        .application(checked_app("A", ""))
        .default_application("A")
        .build();
    let agent = agent_with(&factory, &before);
    agent.handle(MessageKind::Request, &request_args("A", "pending"));

    let after = AgentConfig::builder()
        .application(ApplicationConfig::new("A", ""))
        .default_application("A")
        .build();
    agent
        .registry()
        .reload(RegistrySnapshot::from_config(&after, &factory).unwrap());

    let verdict = agent.handle(MessageKind::Response, &response_args("A", "pending", 200));
    assert!(!verdict.is_error());
    assert!(factory.ledger().finalized_once("pending"));
    assert_eq!(agent.registry().retired_count(), 0);

    // New transactions follow the new setting.
    agent.handle(MessageKind::Request, &request_args("A", "fresh"));
    assert!(factory.ledger().finalized_once("fresh"));
    let err = agent
        .handle_response(&response_args("A", "fresh", 200))
        .unwrap_err();
    assert!(matches!(err, AgentError::ResponseCheckDisabled { .. }));
}

#[test]
fn test_reload_removing_application_completes_pending() {
    let factory = ScriptedEngineFactory::new();
    let before = AgentConfig::builder()
        .application(checked_app("A", ""))
        .application(checked_app("main", ""))
        .default_application("main")
        .build();
    let agent = agent_with(&factory, &before);
    agent.handle(MessageKind::Request, &request_args("A", "pending"));

    let after = AgentConfig::builder()
        .application(checked_app("main", "interrupt response-headers deny 403 1"))
        .default_application("main")
        .build();
    agent
        .registry()
        .reload(RegistrySnapshot::from_config(&after, &factory).unwrap());

    let verdict = agent.handle(MessageKind::Response, &response_args("A", "pending", 200));
    assert!(!verdict.is_error());
    assert!(!verdict.is_hit(), "answered by the old A, not the default");
    assert!(factory.ledger().finalized_once("pending"));
    assert_eq!(agent.registry().retired_count(), 0);
}

#[test]
fn test_default_application_fallback() {
    let factory = ScriptedEngineFactory::new();
    let with_default = AgentConfig::builder()
        .application(ApplicationConfig::new("main", ""))
        .default_application("main")
        .build();
    let agent = agent_with(&factory, &with_default);

    for app in ["", "unknown-app"] {
        let verdict = agent.handle(MessageKind::Request, &request_args(app, app));
        assert!(!verdict.is_error(), "app {app:?} should fall back");
    }
    let mut args = request_args("ignored", "no-app");
    args.remove("app");
    assert!(!agent.handle(MessageKind::Request, &args).is_error());

    let without_default = AgentConfig::builder()
        .application(ApplicationConfig::new("main", ""))
        .build();
    let agent = agent_with(&factory, &without_default);

    for app in ["", "unknown-app"] {
        let err = agent.handle_request(&request_args(app, "x")).unwrap_err();
        assert!(matches!(err, AgentError::ApplicationNotFound { .. }));
    }
}

#[test]
fn test_interruption_is_never_cached() {
    let factory = ScriptedEngineFactory::new();
    let config = AgentConfig::builder()
        .application(checked_app("shop", "interrupt-if-header X-Scanner deny 403 913100"))
        .default_application("shop")
        .build();
    let agent = agent_with(&factory, &config);

    let args = request_args("shop", "blocked").with("headers", "Host: shop\r\nX-Scanner: nikto\r\n");
    let verdict = agent.handle(MessageKind::Request, &args);
    assert!(verdict.is_hit());
    assert_eq!(verdict.get("status"), Some(&VarValue::Int(403)));

    let app = agent.registry().resolve(Some("shop")).unwrap();
    assert!(!app.cache().contains("blocked"));
    assert!(factory.ledger().finalized_once("blocked"));

    agent.handle(MessageKind::Request, &request_args("shop", "clean"));
    assert!(app.cache().contains("clean"));
}

#[test]
fn test_request_field_defaults() {
    let args = Args::new().with("id", "d1").with("method", "GET");
    let req = decode_request(&args).unwrap().value;

    assert_eq!(req.path, "/");
    assert_eq!(req.query, "");
    assert_eq!(req.version, "1.1");
    assert_eq!(req.src_port, 0);
    assert!(req.src_ip.is_unspecified());
    assert_eq!(req.uri(), "/");
}

#[test]
fn test_header_parse_pairs_in_order() {
    let mut pairs = Vec::new();
    parse_headers(b"Host: localhost\r\nX-Foo: bar", |k, v| {
        pairs.push((k.to_string(), v.to_string()));
    })
    .unwrap();
    assert_eq!(
        pairs,
        vec![
            ("Host".to_string(), "localhost".to_string()),
            ("X-Foo".to_string(), "bar".to_string()),
        ]
    );

    let err = parse_headers(b"Host: localhost\r\nno separator", |_, _| {}).unwrap_err();
    assert!(matches!(err, CoreError::MalformedHeader { .. }));
}

#[test]
fn test_shutdown_drains_everything_once() {
    let factory = ScriptedEngineFactory::new();
    let config = AgentConfig::builder()
        .application(checked_app("a", ""))
        .application(checked_app("b", ""))
        .build();
    let agent = agent_with(&factory, &config);

    for (app, id) in [("a", "a1"), ("a", "a2"), ("b", "b1")] {
        agent.handle(MessageKind::Request, &request_args(app, id));
    }

    assert_eq!(agent.shutdown(), 3);
    assert_eq!(agent.shutdown(), 0);
    for id in ["a1", "a2", "b1"] {
        assert!(factory.ledger().finalized_once(id));
    }
    assert!(factory.ledger().open_ids().is_empty());
}
