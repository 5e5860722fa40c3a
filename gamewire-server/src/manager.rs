//! Session directory indexed by connection and by identity.

use crate::handler::DisconnectListener;
use crate::session::{Identity, PlayerId, Session};
use bytes::Bytes;
use gamewire_core::Message;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Handle returned by [`SessionManager::register_disconnect_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Indices {
    by_connection: HashMap<u64, Arc<Session>>,
    by_identity: HashMap<PlayerId, Arc<Session>>,
}

/// Directory of all live sessions.
///
/// Both indices live behind one lock, so a removal is never observed
/// half-done. Every identity entry also exists in the connection index.
/// No lock is held while listeners run or while messages are queued.
pub struct SessionManager {
    indices: RwLock<Indices>,
    listeners: RwLock<Vec<(ListenerId, Arc<DisconnectListener>)>>,
    next_session_id: AtomicU64,
    next_listener_id: AtomicU64,
}

impl SessionManager {
    /// Creates a new session manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            indices: RwLock::new(Indices::default()),
            listeners: RwLock::new(Vec::new()),
            next_session_id: AtomicU64::new(1),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Allocates a connection handle for a new session.
    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds a freshly connected session to the connection index.
    pub fn on_connect(&self, session: Arc<Session>) {
        self.indices
            .write()
            .by_connection
            .insert(session.id(), session);
    }

    /// Points `player_id` at `session`, replacing any previous holder.
    ///
    /// The previous session, if any, is neither notified nor closed. Returns
    /// false (and indexes nothing) if `session` is no longer connected.
    pub fn on_authenticated(&self, player_id: PlayerId, session: &Arc<Session>) -> bool {
        let mut indices = self.indices.write();
        if !indices.by_connection.contains_key(&session.id()) {
            return false;
        }

        if let Some(previous) = indices.by_identity.insert(player_id, Arc::clone(session))
            && previous.id() != session.id()
        {
            tracing::info!(
                player_id,
                previous_session = previous.id(),
                session_id = session.id(),
                "identity rebound to newer session"
            );
        }
        true
    }

    /// Marks `session` authenticated as `identity` and indexes it.
    pub fn authenticate(&self, session: &Arc<Session>, identity: Identity) -> bool {
        let player_id = identity.player_id;
        session.mark_authenticated(identity);
        self.on_authenticated(player_id, session)
    }

    /// Removes `session` from both indices and runs every disconnect listener once.
    ///
    /// Only identity entries that still refer to this session are removed.
    /// Listener errors and panics are logged per listener. Returns false if
    /// the session was already removed, in which case no listener runs.
    pub fn on_disconnect(&self, session: &Arc<Session>) -> bool {
        {
            let mut indices = self.indices.write();
            if indices.by_connection.remove(&session.id()).is_none() {
                return false;
            }
            indices
                .by_identity
                .retain(|_, bound| !Arc::ptr_eq(bound, session));
        }

        let listeners: Vec<_> = self
            .listeners
            .read()
            .iter()
            .map(|(id, listener)| (*id, Arc::clone(listener)))
            .collect();

        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(session))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(
                        session_id = session.id(),
                        listener = id.0,
                        error = %e,
                        "disconnect listener failed"
                    );
                }
                Err(_) => {
                    tracing::error!(
                        session_id = session.id(),
                        listener = id.0,
                        "disconnect listener panicked"
                    );
                }
            }
        }
        true
    }

    /// Looks up a session by connection handle.
    #[must_use]
    pub fn lookup_by_connection(&self, session_id: u64) -> Option<Arc<Session>> {
        self.indices.read().by_connection.get(&session_id).cloned()
    }

    /// Looks up the session currently bound to `player_id`.
    #[must_use]
    pub fn lookup_by_identity(&self, player_id: PlayerId) -> Option<Arc<Session>> {
        self.indices.read().by_identity.get(&player_id).cloned()
    }

    /// Sends to the session bound to `player_id`, if it is open.
    ///
    /// Returns true if the message was queued.
    pub fn send_to(
        &self,
        player_id: PlayerId,
        message_type: i32,
        payload: impl Into<Bytes>,
    ) -> bool {
        match self.lookup_by_identity(player_id) {
            Some(session) if session.is_open() => {
                session.send(message_type, payload);
                true
            }
            _ => false,
        }
    }

    /// Sends the same message to each listed player that is online.
    ///
    /// Returns the number of sessions the message was queued for.
    pub fn send_to_many<I>(
        &self,
        player_ids: I,
        message_type: i32,
        payload: impl Into<Bytes>,
    ) -> usize
    where
        I: IntoIterator<Item = PlayerId>,
    {
        let message = Message::new(message_type, payload);
        let targets: Vec<_> = {
            let indices = self.indices.read();
            player_ids
                .into_iter()
                .filter_map(|id| indices.by_identity.get(&id).cloned())
                .collect()
        };
        deliver(&targets, &message)
    }

    /// Sends to every connected session, authenticated or not.
    ///
    /// Closed connections are skipped; partial delivery is not an error.
    /// Returns the number of sessions the message was queued for.
    pub fn broadcast(&self, message_type: i32, payload: impl Into<Bytes>) -> usize {
        let message = Message::new(message_type, payload);
        let targets: Vec<_> = self.indices.read().by_connection.values().cloned().collect();
        deliver(&targets, &message)
    }

    /// Sends to every authenticated session.
    pub fn broadcast_authenticated(&self, message_type: i32, payload: impl Into<Bytes>) -> usize {
        let message = Message::new(message_type, payload);
        let targets: Vec<_> = self.indices.read().by_identity.values().cloned().collect();
        deliver(&targets, &message)
    }

    /// Registers a listener run for every removed session.
    pub fn register_disconnect_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Arc<Session>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let listener: Arc<DisconnectListener> = Arc::new(listener);
        let mut listeners = self.listeners.write();
        listeners.push((id, listener));
        tracing::debug!(listeners = listeners.len(), "registered disconnect listener");
        id
    }

    /// Removes a listener. Returns true if it was registered.
    pub fn remove_disconnect_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        before != listeners.len()
    }

    /// Returns the number of connected sessions.
    #[must_use]
    pub fn count(&self) -> usize {
        self.indices.read().by_connection.len()
    }

    /// Returns the number of identity-indexed sessions.
    #[must_use]
    pub fn authenticated_count(&self) -> usize {
        self.indices.read().by_identity.len()
    }

    /// Returns all connection handles.
    #[must_use]
    pub fn session_ids(&self) -> Vec<u64> {
        self.indices.read().by_connection.keys().copied().collect()
    }

    /// Returns a snapshot of all connected sessions.
    #[must_use]
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.indices.read().by_connection.values().cloned().collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(targets: &[Arc<Session>], message: &Message) -> usize {
    let mut delivered = 0;
    for session in targets.iter().filter(|session| session.is_open()) {
        session.send_message(message.clone());
        delivered += 1;
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionOutbox;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    fn connect(manager: &SessionManager) -> (Arc<Session>, SessionOutbox) {
        let id = manager.next_session_id();
        let (session, outbox) = Session::new(id, "127.0.0.1:5000".parse().unwrap());
        let session = Arc::new(session);
        manager.on_connect(Arc::clone(&session));
        (session, outbox)
    }

    #[test]
    fn test_connect_indexes_by_connection_only() {
        let manager = SessionManager::new();
        let (session, _outbox) = connect(&manager);

        assert_eq!(manager.count(), 1);
        assert_eq!(manager.authenticated_count(), 0);
        assert!(manager.lookup_by_connection(session.id()).is_some());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let manager = SessionManager::new();
        let (a, _oa) = connect(&manager);
        let (b, _ob) = connect(&manager);
        assert_ne!(a.id(), b.id());

        let mut ids = manager.session_ids();
        ids.sort_unstable();
        assert_eq!(ids, vec![a.id(), b.id()]);
    }

    #[test]
    fn test_authenticate_indexes_identity() {
        let manager = SessionManager::new();
        let (session, _outbox) = connect(&manager);

        assert!(manager.authenticate(&session, Identity::new(1001, "amiya")));
        let found = manager.lookup_by_identity(1001).unwrap();
        assert!(Arc::ptr_eq(&found, &session));
        assert!(session.is_authenticated());
    }

    #[test]
    fn test_authenticate_after_disconnect_is_ignored() {
        let manager = SessionManager::new();
        let (session, _outbox) = connect(&manager);
        manager.on_disconnect(&session);

        assert!(!manager.on_authenticated(1001, &session));
        assert!(manager.lookup_by_identity(1001).is_none());
    }

    #[test]
    fn test_identity_remap_last_login_wins() {
        let manager = SessionManager::new();
        let (first, _o1) = connect(&manager);
        let (second, _o2) = connect(&manager);

        manager.authenticate(&first, Identity::new(42, "doctor"));
        manager.authenticate(&second, Identity::new(42, "doctor"));

        let found = manager.lookup_by_identity(42).unwrap();
        assert!(Arc::ptr_eq(&found, &second));
        assert!(first.is_open());
        assert_eq!(manager.count(), 2);
        assert_eq!(manager.authenticated_count(), 1);
    }

    #[test]
    fn test_stale_disconnect_keeps_newer_identity() {
        let manager = SessionManager::new();
        let (first, _o1) = connect(&manager);
        let (second, _o2) = connect(&manager);

        manager.authenticate(&first, Identity::new(42, "doctor"));
        manager.authenticate(&second, Identity::new(42, "doctor"));
        manager.on_disconnect(&first);

        let found = manager.lookup_by_identity(42).unwrap();
        assert!(Arc::ptr_eq(&found, &second));
        assert_eq!(manager.count(), 1);
    }

    #[test]
    fn test_disconnect_removes_both_indices() {
        let manager = SessionManager::new();
        let (session, _outbox) = connect(&manager);
        manager.authenticate(&session, Identity::new(7, "w"));

        assert!(manager.on_disconnect(&session));
        assert!(manager.lookup_by_connection(session.id()).is_none());
        assert!(manager.lookup_by_identity(7).is_none());
        assert_eq!(manager.count(), 0);
    }

    #[test]
    fn test_listener_fan_out_survives_failures() {
        let manager = SessionManager::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c = Arc::clone(&calls);
        manager.register_disconnect_listener(move |_session| {
            c.lock().unwrap().push("first");
            anyhow::bail!("listener exploded")
        });
        let c = Arc::clone(&calls);
        manager.register_disconnect_listener(move |_session| {
            c.lock().unwrap().push("second");
            panic!("listener panicked");
        });
        let c = Arc::clone(&calls);
        manager.register_disconnect_listener(move |session| {
            assert!(session.id() > 0);
            c.lock().unwrap().push("third");
            Ok(())
        });

        let (session, _outbox) = connect(&manager);
        assert!(manager.on_disconnect(&session));
        assert!(manager.lookup_by_connection(session.id()).is_none());
        assert_eq!(*calls.lock().unwrap(), vec!["first", "second", "third"]);

        assert!(!manager.on_disconnect(&session));
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_remove_disconnect_listener() {
        let manager = SessionManager::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let id = manager.register_disconnect_listener(move |_session| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(manager.remove_disconnect_listener(id));
        assert!(!manager.remove_disconnect_listener(id));

        let (session, _outbox) = connect(&manager);
        manager.on_disconnect(&session);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_send_to() {
        let manager = SessionManager::new();
        let (session, mut outbox) = connect(&manager);

        assert!(!manager.send_to(9, 70, &b"nobody"[..]));

        manager.authenticate(&session, Identity::new(9, "texas"));
        assert!(manager.send_to(9, 70, &b"hello"[..]));
        assert_eq!(outbox.try_recv().unwrap(), Message::new(70, &b"hello"[..]));

        drop(outbox);
        assert!(!manager.send_to(9, 70, &b"gone"[..]));
    }

    #[test]
    fn test_broadcast_skips_closed_sessions() {
        let manager = SessionManager::new();
        let (_a, mut outbox_a) = connect(&manager);
        let (_b, outbox_b) = connect(&manager);
        let (_c, mut outbox_c) = connect(&manager);
        drop(outbox_b);

        let delivered = manager.broadcast(100, &b"wave incoming"[..]);

        assert_eq!(delivered, 2);
        assert_eq!(outbox_a.try_recv().unwrap().message_type(), 100);
        assert_eq!(outbox_c.try_recv().unwrap().message_type(), 100);
    }

    #[test]
    fn test_broadcast_authenticated_and_send_to_many() {
        let manager = SessionManager::new();
        let (a, mut outbox_a) = connect(&manager);
        let (b, mut outbox_b) = connect(&manager);
        let (_guest, mut outbox_guest) = connect(&manager);
        manager.authenticate(&a, Identity::new(1, "a"));
        manager.authenticate(&b, Identity::new(2, "b"));

        assert_eq!(manager.broadcast_authenticated(5, &b"x"[..]), 2);
        assert!(outbox_a.try_recv().is_ok());
        assert!(outbox_b.try_recv().is_ok());
        assert!(outbox_guest.try_recv().is_err());

        assert_eq!(manager.send_to_many([2, 3], 6, &b"y"[..]), 1);
        assert!(outbox_a.try_recv().is_err());
        assert_eq!(outbox_b.try_recv().unwrap().message_type(), 6);
    }
}
