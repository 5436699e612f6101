//! Listener loop for proxy connections.

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};
use warden_config::{AgentConfig, BindAddress};

use crate::agent::Agent;
use crate::error::AgentResult;
use crate::transport::serve_connection;

enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

enum Connection {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Listener {
    async fn bind(address: &BindAddress) -> AgentResult<Self> {
        match address {
            BindAddress::Tcp(addr) => Ok(Self::Tcp(TcpListener::bind(addr).await?)),
            BindAddress::Unix(path) => {
                // A socket left behind by a previous run blocks the bind.
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                Ok(Self::Unix(UnixListener::bind(path)?, path.clone()))
            }
        }
    }

    async fn accept(&self) -> std::io::Result<(Connection, String)> {
        match self {
            Self::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Connection::Tcp(stream), peer.to_string()))
            }
            Self::Unix(listener, path) => {
                let (stream, _) = listener.accept().await?;
                Ok((Connection::Unix(stream), path.display().to_string()))
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Self::Unix(_, path) = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl Connection {
    async fn serve(self, agent: &Agent, shutdown: watch::Receiver<bool>) -> AgentResult<()> {
        match self {
            Self::Tcp(stream) => {
                stream.set_nodelay(true)?;
                serve_connection(agent, stream, shutdown).await
            }
            Self::Unix(stream) => serve_connection(agent, stream, shutdown).await,
        }
    }
}

/// Accepts proxy connections and serves each on its own task.
pub struct Server {
    agent: Arc<Agent>,
    listener: Listener,
    max_connections: usize,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr())
            .field("max_connections", &self.max_connections)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Bind the listen address from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or cannot be bound.
    pub async fn bind(config: &AgentConfig, agent: Arc<Agent>) -> AgentResult<Self> {
        let address = config.bind_address()?;
        let listener = Listener::bind(&address).await?;
        info!(bind = %address, "listening for proxy connections");

        Ok(Self {
            agent,
            listener,
            max_connections: config.max_connections,
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// Bound TCP address, if listening on TCP.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::Unix(..) => None,
        }
    }

    /// Serve until `shutdown` completes.
    ///
    /// Then stops accepting, lets connections answer the frame they are
    /// handling for up to the shutdown timeout, and finalizes every cached
    /// transaction.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept errors are logged.
    pub async fn run<F>(self, shutdown: F) -> AgentResult<()>
    where
        F: Future<Output = ()>,
    {
        let Self {
            agent,
            listener,
            max_connections,
            shutdown_timeout,
        } = self;

        let limit = Arc::new(Semaphore::new(max_connections));
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = listener.accept() => {
                    let (connection, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };

                    let Ok(permit) = Arc::clone(&limit).try_acquire_owned() else {
                        warn!(peer = %peer, max_connections, "connection limit reached, closing connection");
                        continue;
                    };

                    let agent = Arc::clone(&agent);
                    let stop = stop_rx.clone();
                    let span = info_span!("connection", peer = %peer);
                    connections.spawn(
                        async move {
                            let _permit = permit;
                            debug!("connection accepted");
                            if let Err(e) = connection.serve(&agent, stop).await {
                                debug!(error = %e, "connection closed with error");
                            }
                        }
                        .instrument(span),
                    );
                }
            }
        }

        drop(listener);
        let _ = stop_tx.send(true);
        info!(active = connections.len(), "shutting down");

        let drained = tokio::time::timeout(shutdown_timeout, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = connections.len(),
                "shutdown timeout elapsed, aborting connections"
            );
            connections.shutdown().await;
        }

        agent.shutdown();
        Ok(())
    }
}
