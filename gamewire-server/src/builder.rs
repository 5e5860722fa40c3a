//! Server builder and main server implementation.

use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::manager::SessionManager;
use crate::registry::HandlerRegistry;
use crate::session::{Session, SessionOutbox};
use crate::worker::{SessionLane, WorkerPool};
use bytes::Bytes;
use gamewire_core::message_type;
use gamewire_transport::{TcpConnection, TcpServer, TcpServerConfig};
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Runtime configuration of a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listening address.
    pub bind_addr: SocketAddr,
    /// Connections beyond this count are closed right after accept.
    pub max_connections: usize,
    /// Optional cap on the declared payload length of inbound frames.
    pub max_frame_size: Option<usize>,
    /// Number of worker threads running handlers.
    pub worker_threads: usize,
    /// Pending jobs allowed per session before its reader waits.
    pub worker_queue_capacity: usize,
    /// Message type allowed before authentication.
    pub login_type: i32,
    /// TCP_NODELAY on accepted sockets.
    pub tcp_nodelay: bool,
    /// SO_KEEPALIVE on accepted sockets.
    pub keepalive: bool,
    /// Listen backlog.
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8888)),
            max_connections: 1000,
            max_frame_size: None,
            worker_threads: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            worker_queue_capacity: 1024,
            login_type: message_type::LOGIN_REQUEST,
            tcp_nodelay: true,
            keepalive: true,
            backlog: 128,
        }
    }
}

impl ServerConfig {
    fn transport(&self) -> TcpServerConfig {
        TcpServerConfig::new(self.bind_addr)
            .max_frame_size(self.max_frame_size)
            .tcp_nodelay(self.tcp_nodelay)
            .keepalive(self.keepalive)
            .backlog(self.backlog)
    }
}

/// Builder for configuring and creating a server.
#[derive(Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    registry: Option<Arc<HandlerRegistry>>,
    sessions: Option<Arc<SessionManager>>,
}

impl ServerBuilder {
    /// Creates a new server builder with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the whole configuration.
    #[must_use]
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the bind address.
    #[must_use]
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Sets the maximum number of connections.
    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// Caps the declared payload length of inbound frames.
    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = Some(size);
        self
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = threads;
        self
    }

    /// Sets how many jobs one session may have pending.
    #[must_use]
    pub fn worker_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.worker_queue_capacity = capacity;
        self
    }

    /// Sets the message type allowed before authentication.
    #[must_use]
    pub fn login_type(mut self, message_type: i32) -> Self {
        self.config.login_type = message_type;
        self
    }

    /// Sets TCP_NODELAY on accepted sockets.
    #[must_use]
    pub fn tcp_nodelay(mut self, enabled: bool) -> Self {
        self.config.tcp_nodelay = enabled;
        self
    }

    /// Sets SO_KEEPALIVE on accepted sockets.
    #[must_use]
    pub fn keepalive(mut self, enabled: bool) -> Self {
        self.config.keepalive = enabled;
        self
    }

    /// Sets the listen backlog.
    #[must_use]
    pub fn backlog(mut self, backlog: i32) -> Self {
        self.config.backlog = backlog;
        self
    }

    /// Uses an existing handler registry instead of a fresh one.
    #[must_use]
    pub fn registry(mut self, registry: Arc<HandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Uses an existing session manager instead of a fresh one.
    #[must_use]
    pub fn sessions(mut self, sessions: Arc<SessionManager>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Builds the server and handle.
    #[must_use]
    pub fn build(self) -> (Server, ServerHandle) {
        let registry = self.registry.unwrap_or_default();
        let sessions = self.sessions.unwrap_or_default();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (addr_tx, addr_rx) = watch::channel(None);

        let server = Server {
            config: self.config,
            registry: Arc::clone(&registry),
            sessions: Arc::clone(&sessions),
            cmd_rx,
            addr_tx,
            shutdown: CancellationToken::new(),
        };

        let handle = ServerHandle {
            cmd_tx,
            registry,
            sessions,
            addr_rx,
        };

        (server, handle)
    }
}

/// The main server instance.
pub struct Server {
    config: ServerConfig,
    registry: Arc<HandlerRegistry>,
    sessions: Arc<SessionManager>,
    cmd_rx: mpsc::UnboundedReceiver<ServerCommand>,
    addr_tx: watch::Sender<Option<SocketAddr>>,
    shutdown: CancellationToken,
}

impl Server {
    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Runs the server until [`ServerHandle::shutdown`] is called.
    ///
    /// On shutdown every connection is closed, pending jobs are drained and
    /// disconnect listeners have run before this returns.
    ///
    /// # Errors
    /// Returns `ServerError` if the listener cannot be bound or the worker
    /// pool cannot be started.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        let listener = TcpServer::bind(self.config.transport())
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.sessions),
            self.config.login_type,
        ));
        let workers = WorkerPool::new(
            self.config.worker_threads,
            self.config.worker_queue_capacity,
            Arc::clone(&dispatcher),
        )?;
        let tracker = TaskTracker::new();

        self.addr_tx.send_replace(Some(local_addr));
        tracing::info!(
            %local_addr,
            workers = workers.size(),
            max_connections = self.config.max_connections,
            "server listening"
        );

        let mut commands_open = true;
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(conn) => self.handle_connection(conn, &dispatcher, &workers, &tracker),
                    Err(e) => tracing::error!(error = %e, "accept failed"),
                },

                cmd = self.cmd_rx.recv(), if commands_open => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd) {
                            break;
                        }
                    }
                    None => commands_open = false,
                },
            }
        }

        drop(listener);
        self.shutdown.cancel();
        tracker.close();
        tracker.wait().await;

        if let Err(e) = tokio::task::spawn_blocking(move || workers.shutdown()).await {
            tracing::error!(error = %e, "worker pool shutdown failed");
        }

        tracing::info!("server stopped");
        Ok(())
    }

    fn handle_connection(
        &self,
        conn: TcpConnection,
        dispatcher: &Dispatcher,
        workers: &WorkerPool,
        tracker: &TaskTracker,
    ) {
        let peer = conn.peer_addr();
        if self.sessions.count() >= self.config.max_connections {
            tracing::warn!(
                %peer,
                max_connections = self.config.max_connections,
                "max connections reached, rejecting"
            );
            return;
        }

        let (session, outbox) = Session::new(self.sessions.next_session_id(), peer);
        let session = Arc::new(session);
        dispatcher.on_connect(Arc::clone(&session));
        let lane = workers.lane(Arc::clone(&session));

        tracker.spawn(run_connection(
            conn,
            session,
            outbox,
            lane,
            self.shutdown.clone(),
        ));
    }

    fn handle_command(&self, cmd: ServerCommand) -> bool {
        match cmd {
            ServerCommand::Shutdown => {
                tracing::info!("server shutdown requested");
                true
            }
            ServerCommand::CloseSession(session_id) => {
                match self.sessions.lookup_by_connection(session_id) {
                    Some(session) => session.close(),
                    None => tracing::debug!(session_id, "close requested for unknown session"),
                }
                false
            }
        }
    }
}

/// Why a connection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// The peer went away or the stream failed; nothing more can be written.
    Peer,
    /// Closed from the server side; queued replies are flushed first.
    Local,
}

async fn run_connection(
    mut conn: TcpConnection,
    session: Arc<Session>,
    mut outbox: SessionOutbox,
    lane: SessionLane,
    shutdown: CancellationToken,
) {
    let session_id = session.id();
    let close = session.close_token().clone();

    let exit = loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => break Exit::Local,

            () = close.cancelled() => break Exit::Local,

            Some(message) = outbox.recv() => {
                if let Err(e) = conn.send(&message).await {
                    tracing::error!(session_id, error = %e, "write failed");
                    break Exit::Peer;
                }
            }

            inbound = conn.recv() => match inbound {
                Some(Ok(message)) => {
                    if lane.submit(message).await.is_err() {
                        break Exit::Local;
                    }
                }
                Some(Err(e)) => {
                    if e.is_disconnect() {
                        tracing::debug!(session_id, error = %e, "peer disconnected");
                    } else {
                        tracing::error!(session_id, error = %e, "read failed");
                    }
                    break Exit::Peer;
                }
                None => break Exit::Peer,
            },
        }
    };

    session.close();
    if exit == Exit::Local {
        while let Ok(message) = outbox.try_recv() {
            if conn.send(&message).await.is_err() {
                break;
            }
        }
    }
    drop(outbox);
    if let Err(e) = conn.close().await {
        tracing::debug!(session_id, error = %e, "close failed");
    }
    tracing::info!(session_id, peer = %session.peer_addr(), "connection closed");

    if lane.submit_disconnect().await.is_err() {
        tracing::error!(session_id, "worker pool stopped before disconnect cleanup");
    }
}

/// Handle for controlling the server from outside.
#[derive(Clone)]
pub struct ServerHandle {
    cmd_tx: mpsc::UnboundedSender<ServerCommand>,
    registry: Arc<HandlerRegistry>,
    sessions: Arc<SessionManager>,
    addr_rx: watch::Receiver<Option<SocketAddr>>,
}

impl ServerHandle {
    /// Requests server shutdown.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(ServerCommand::Shutdown);
    }

    /// Closes a specific session.
    pub fn close_session(&self, session_id: u64) {
        let _ = self.cmd_tx.send(ServerCommand::CloseSession(session_id));
    }

    /// Sends a frame to every open session. Returns how many were queued.
    pub fn broadcast(&self, message_type: i32, payload: impl Into<Bytes>) -> usize {
        self.sessions.broadcast(message_type, payload)
    }

    /// Returns the handler registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Returns the session manager.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Waits until the server is listening and returns its address.
    ///
    /// Returns `None` if the server stopped without binding.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let mut addr_rx = self.addr_rx.clone();
        match addr_rx.wait_for(Option::is_some).await {
            Ok(addr) => *addr,
            Err(_) => None,
        }
    }
}

/// Commands that can be sent to the server.
#[derive(Debug)]
pub enum ServerCommand {
    /// Shutdown the server.
    Shutdown,
    /// Close a specific session.
    CloseSession(u64),
}
