//! Per-connection session state.

use bytes::Bytes;
use gamewire_core::Message;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Authenticated player identifier; the key of the identity index.
pub type PlayerId = u64;

/// Receiving end of a session's outbound queue, drained by its connection task.
pub type SessionOutbox = mpsc::UnboundedReceiver<Message>;

/// The principal bound to a session after login.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    /// Player id.
    pub player_id: PlayerId,
    /// Display name.
    pub username: String,
}

impl Identity {
    /// Creates a new identity.
    #[must_use]
    pub fn new(player_id: PlayerId, username: impl Into<String>) -> Self {
        Self {
            player_id,
            username: username.into(),
        }
    }
}

#[derive(Debug, Default)]
struct AuthState {
    authenticated: bool,
    identity: Option<Identity>,
}

/// Server-side state for one live client connection.
///
/// A session is the only legal channel for sending data back to its client.
/// Sends are fire-and-forget: once the connection is gone they are dropped
/// silently.
#[derive(Debug)]
pub struct Session {
    id: u64,
    peer_addr: SocketAddr,
    created_at: u64,
    last_active: AtomicU64,
    auth: RwLock<AuthState>,
    current_match_id: Mutex<Option<u64>>,
    outbound: mpsc::UnboundedSender<Message>,
    close: CancellationToken,
}

impl Session {
    /// Creates an unauthenticated session and the outbox its connection task drains.
    ///
    /// # Arguments
    /// * `id` - Connection id, unique for the server's lifetime
    /// * `peer_addr` - Remote address of the connection
    #[must_use]
    pub fn new(id: u64, peer_addr: SocketAddr) -> (Self, SessionOutbox) {
        let (outbound, outbox) = mpsc::unbounded_channel();
        let now = now_millis();
        let session = Self {
            id,
            peer_addr,
            created_at: now,
            last_active: AtomicU64::new(now),
            auth: RwLock::new(AuthState::default()),
            current_match_id: Mutex::new(None),
            outbound,
            close: CancellationToken::new(),
        };
        (session, outbox)
    }

    /// Returns the connection handle.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the peer address.
    #[must_use]
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Creation timestamp (millis since epoch).
    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Last inbound activity (millis since epoch).
    #[must_use]
    pub fn last_active(&self) -> u64 {
        self.last_active.load(Ordering::Relaxed)
    }

    /// Records inbound activity.
    pub fn touch(&self) {
        self.last_active.store(now_millis(), Ordering::Relaxed);
    }

    /// Binds `identity` and marks the session authenticated.
    ///
    /// Calling it again with the same identity is a no-op. This is the only
    /// path by which a session becomes authenticated.
    pub fn mark_authenticated(&self, identity: Identity) {
        let mut auth = self.auth.write();
        if auth.authenticated && auth.identity.as_ref() == Some(&identity) {
            return;
        }
        auth.identity = Some(identity);
        auth.authenticated = true;
    }

    /// Drops the authentication state, e.g. on forced logout.
    pub fn clear_authentication(&self) {
        let mut auth = self.auth.write();
        auth.authenticated = false;
        auth.identity = None;
    }

    /// Returns true once login succeeded.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.auth.read().authenticated
    }

    /// Returns the bound identity, if any.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.auth.read().identity.clone()
    }

    /// Returns the bound player id, if any.
    #[must_use]
    pub fn player_id(&self) -> Option<PlayerId> {
        self.auth.read().identity.as_ref().map(|i| i.player_id)
    }

    /// Match the player is currently in.
    #[must_use]
    pub fn current_match_id(&self) -> Option<u64> {
        *self.current_match_id.lock()
    }

    /// Sets or clears the current match.
    pub fn set_current_match_id(&self, match_id: Option<u64>) {
        *self.current_match_id.lock() = match_id;
    }

    /// Returns true while the underlying connection is alive.
    ///
    /// Evaluated on every call: the outbox is dropped as soon as the
    /// connection task exits.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.close.is_cancelled() && !self.outbound.is_closed()
    }

    /// Returns true if the connection is open and authenticated.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_open() && self.is_authenticated()
    }

    /// Queues a frame for the client. Dropped silently if the connection is closed.
    pub fn send(&self, message_type: i32, payload: impl Into<Bytes>) {
        self.send_message(Message::new(message_type, payload));
    }

    /// Queues an already-built message. Dropped silently if the connection is closed.
    pub fn send_message(&self, message: Message) {
        if !self.is_open() {
            tracing::trace!(
                session_id = self.id,
                message_type = message.message_type(),
                "dropping send to closed session"
            );
            return;
        }
        if let Err(e) = self.outbound.send(message) {
            tracing::trace!(
                session_id = self.id,
                message_type = e.0.message_type(),
                "dropping send, connection went away"
            );
        }
    }

    /// Asks the connection task to close this connection.
    pub fn close(&self) {
        self.close.cancel();
    }

    pub(crate) fn close_token(&self) -> &CancellationToken {
        &self.close
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
