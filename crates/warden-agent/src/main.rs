//! Warden Agent - Entry point
//!
//! This is the main binary for the Warden inspection agent.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use warden_agent::{Agent, ApplicationRegistry, RegistrySnapshot, Reloader, Server, SystemdNotifier};
use warden_config::{ConfigLoader, ConfigWatcher};
use warden_core::{EngineFactory, PassthroughEngineFactory};
use warden_telemetry::{init_logging, init_metrics};

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
    /// Validate the configuration and exit.
    validate: bool,
    /// Reload when the configuration file changes.
    autoreload: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut parsed = Self {
            config: None,
            validate: false,
            autoreload: false,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    parsed.config = args.next().map(PathBuf::from);
                }
                "--validate" => parsed.validate = true,
                "--autoreload" => parsed.autoreload = true,
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("warden-agent {}", warden_agent::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        parsed
    }
}

fn print_help() {
    println!(
        r"Warden Agent - inspection sidecar for reverse proxies

USAGE:
    warden-agent --config <PATH> [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
        --validate         Load the configuration, build every application and exit
        --autoreload       Reload when the configuration file changes
    -h, --help             Print help information
    -v, --version          Print version information

SIGNALS:
    SIGHUP                 Reload the configuration file
    SIGINT, SIGTERM        Stop accepting connections and shut down

ENVIRONMENT VARIABLES:
    WARDEN__BIND                   Listen address (host:port or unix:///path)
    WARDEN__DEFAULT_APPLICATION    Application used when a message names none
    WARDEN__MAX_CONNECTIONS        Concurrent proxy connections (default: 1024)
    WARDEN__SHUTDOWN_TIMEOUT_SECS  Graceful shutdown timeout (default: 10)
    WARDEN__LOGGING__LEVEL         Log filter (default: info)
    WARDEN__LOGGING__FORMAT        json or pretty (default: json)
    WARDEN__METRICS__ENABLED       Serve Prometheus metrics (default: false)
    WARDEN__METRICS__ADDR          Metrics listen address (default: 127.0.0.1:9100)
    RUST_LOG                       Overrides the configured log filter

EXAMPLES:
    # Check a configuration before deploying it
    warden-agent --config /etc/warden/config.toml --validate

    # Run and follow configuration changes
    warden-agent --config /etc/warden/config.toml --autoreload
"
    );
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("warden-agent: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let Some(path) = args.config else {
        bail!("missing --config <PATH>");
    };

    let config = ConfigLoader::load_path(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    init_logging(&config.logging).context("failed to initialize logging")?;

    let factory: Arc<dyn EngineFactory> = Arc::new(PassthroughEngineFactory::new());
    let snapshot = RegistrySnapshot::from_config(&config, factory.as_ref())
        .context("failed to build applications")?;

    if args.validate {
        info!(applications = snapshot.len(), "configuration is valid");
        return Ok(());
    }

    init_metrics(&config.metrics).context("failed to initialize metrics")?;

    info!(version = warden_agent::VERSION, "starting Warden agent");

    let registry = Arc::new(ApplicationRegistry::new(snapshot));
    let agent = Arc::new(Agent::new(Arc::clone(&registry)));
    let server = Server::bind(&config, agent)
        .await
        .with_context(|| format!("failed to listen on {}", config.bind))?;

    let notifier = SystemdNotifier::from_env();
    let reloader = Arc::new(
        Reloader::new(&path, config, registry, factory).with_notifier(notifier.clone()),
    );
    let watcher = if args.autoreload {
        Some(watch_config(&path)?)
    } else {
        None
    };

    notifier.ready();
    server
        .run(wait_for_shutdown(reloader, watcher, notifier))
        .await?;

    info!("Warden agent stopped");
    Ok(())
}

fn watch_config(path: &Path) -> anyhow::Result<ConfigWatcher> {
    let watcher = ConfigWatcher::builder(path)
        .with_debounce(Duration::from_millis(500))
        .build()
        .with_context(|| format!("failed to watch {}", path.display()))?;
    info!(path = %path.display(), "watching configuration for changes");
    Ok(watcher)
}

/// Serve reload triggers until a termination signal arrives.
async fn wait_for_shutdown(
    reloader: Arc<Reloader>,
    mut watcher: Option<ConfigWatcher>,
    notifier: SystemdNotifier,
) {
    let (mut hangup, mut interrupt, mut terminate) = match (
        signal(SignalKind::hangup()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(hangup), Ok(interrupt), Ok(terminate)) => (hangup, interrupt, terminate),
        _ => {
            error!("failed to install signal handlers");
            notifier.stopping();
            return;
        }
    };

    loop {
        let trigger = tokio::select! {
            _ = interrupt.recv() => break,
            _ = terminate.recv() => break,
            _ = hangup.recv() => "signal",
            change = config_changed(&mut watcher) => match change {
                Some(_) => "file change",
                None => {
                    warn!("configuration watcher stopped");
                    watcher = None;
                    continue;
                }
            },
        };

        info!(trigger, "reloading configuration");
        let reloader = Arc::clone(&reloader);
        // Failures are logged by the reloader; the old configuration stays.
        if let Err(e) = tokio::task::spawn_blocking(move || reloader.reload()).await {
            error!(error = %e, "reload task failed");
        }
    }

    info!("shutdown signal received");
    notifier.stopping();
}

async fn config_changed(watcher: &mut Option<ConfigWatcher>) -> Option<warden_config::ConfigChange> {
    match watcher {
        Some(watcher) => watcher.changed().await,
        None => std::future::pending().await,
    }
}
