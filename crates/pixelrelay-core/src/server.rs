//! TCP acceptor for image sessions.
//!
//! Binds the configured address, accepts connections without a cap, and runs
//! each one as an independent session task. Sessions share only the read-only
//! [`SessionContext`].
//!
//! # Lifecycle
//!
//! [`ImageServer::start`] opens the listener and spawns the accept loop.
//! [`ServerHandle::shutdown`] (or dropping the handle) stops accepting. Sessions
//! already in flight are not cancelled and run to completion.

use crate::config::ServerConfig;
use crate::session::{handle_session, SessionContext, SessionOutcome};
use crate::{RelayError, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Handle to a running server. Dropping shuts down the accept loop.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    active_sessions: Arc<AtomicUsize>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of sessions currently being served.
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Stop accepting new connections.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Stop accepting and wait for the accept loop to exit.
    pub async fn close(mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Image processing server.
pub struct ImageServer;

impl ImageServer {
    /// Bind `config.host:config.port` and start serving.
    ///
    /// Port 0 picks a free port; read it back from [`ServerHandle::addr`].
    pub async fn start(config: &ServerConfig) -> Result<ServerHandle> {
        config.validate()?;
        let ctx = SessionContext::new(config.benchmark.clone())
            .with_max_payload_bytes(config.max_payload_bytes);
        Self::start_with_context(&config.bind_addr(), ctx).await
    }

    /// Start with an explicit session context.
    pub async fn start_with_context(bind_addr: &str, ctx: SessionContext) -> Result<ServerHandle> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| RelayError::Connection {
            message: format!("failed to bind {}: {}", bind_addr, e),
            source: Some(e),
        })?;
        let addr = listener.local_addr().map_err(RelayError::connection)?;

        info!("Image server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let active_sessions = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            Arc::new(ctx),
            shutdown_rx,
            active_sessions.clone(),
        ));

        Ok(ServerHandle {
            addr,
            active_sessions,
            shutdown_tx: Some(shutdown_tx),
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        ctx: Arc<SessionContext>,
        mut shutdown_rx: oneshot::Receiver<()>,
        active_sessions: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Image server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let ctx = ctx.clone();
                            let sessions = active_sessions.clone();
                            let active = sessions.fetch_add(1, Ordering::Relaxed) + 1;
                            debug!("Accepted {} ({} active sessions)", peer_addr, active);

                            tokio::spawn(async move {
                                Self::serve(stream, peer_addr, &ctx).await;
                                sessions.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn serve(stream: TcpStream, peer_addr: SocketAddr, ctx: &SessionContext) {
        info!("Client connected: {}", peer_addr);
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY for {}: {}", peer_addr, e);
        }

        match handle_session(stream, ctx).await {
            Ok(SessionOutcome::Image {
                transform,
                workers,
                response_bytes,
            }) => {
                info!(
                    "Sent {} result to {} ({} workers, {} bytes)",
                    transform, peer_addr, workers, response_bytes
                );
            }
            Ok(SessionOutcome::Report { response_bytes }) => {
                info!(
                    "Sent benchmark report to {} ({} bytes)",
                    peer_addr, response_bytes
                );
            }
            Err(e) if e.is_peer_fault() => {
                warn!("Session {} aborted: {}", peer_addr, e);
            }
            Err(e) => {
                debug!("Session {} ended: {}", peer_addr, e);
            }
        }
    }
}
