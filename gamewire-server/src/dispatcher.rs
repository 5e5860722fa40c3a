//! Per-connection dispatch: authentication gate and handler routing.

use crate::manager::SessionManager;
use crate::registry::{HandlerRegistry, Routed};
use crate::session::Session;
use gamewire_core::{Message, Response, message_type};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Error text sent when an unauthenticated session sends anything but a login.
pub const AUTH_REQUIRED: &str = "authentication required: send a login request first";

/// What happened to one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran to completion.
    Handled,
    /// Rejected by the authentication gate; an error frame was sent.
    Rejected,
    /// No handler for the type; an error frame was sent.
    Unhandled,
    /// The handler returned an error or panicked; logged only.
    Failed,
}

/// Glues sessions, the authentication gate and the handler registry.
///
/// Every entry point is a containment boundary: nothing a handler or
/// listener does escapes as a panic or error.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    sessions: Arc<SessionManager>,
    login_type: i32,
}

impl Dispatcher {
    /// Creates a dispatcher that lets `login_type` through the gate.
    #[must_use]
    pub fn new(
        registry: Arc<HandlerRegistry>,
        sessions: Arc<SessionManager>,
        login_type: i32,
    ) -> Self {
        Self {
            registry,
            sessions,
            login_type,
        }
    }

    /// Creates a dispatcher using [`message_type::LOGIN_REQUEST`] as the login type.
    #[must_use]
    pub fn with_default_login(
        registry: Arc<HandlerRegistry>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        Self::new(registry, sessions, message_type::LOGIN_REQUEST)
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

    /// Returns the message type allowed before authentication.
    #[must_use]
    pub fn login_type(&self) -> i32 {
        self.login_type
    }

    /// Registers a newly connected, unauthenticated session.
    pub fn on_connect(&self, session: Arc<Session>) {
        tracing::info!(
            session_id = session.id(),
            peer = %session.peer_addr(),
            "client connected, awaiting login"
        );
        self.sessions.on_connect(session);
    }

    /// Processes one inbound message for `session`.
    pub fn on_message(&self, session: &Arc<Session>, message: &Message) -> DispatchOutcome {
        session.touch();
        let message_type = message.message_type();

        if !session.is_authenticated() && message_type != self.login_type {
            tracing::warn!(
                session_id = session.id(),
                message_type,
                "unauthenticated session sent a non-login message"
            );
            reply_error(session, AUTH_REQUIRED);
            return DispatchOutcome::Rejected;
        }

        if let Some(player_id) = session.player_id() {
            tracing::debug!(
                session_id = session.id(),
                player_id,
                message_type,
                "message received"
            );
        }

        match catch_unwind(AssertUnwindSafe(|| self.registry.dispatch(session, message))) {
            Ok(Routed::Handled(Ok(()))) => DispatchOutcome::Handled,
            Ok(Routed::Handled(Err(e))) => {
                tracing::error!(
                    session_id = session.id(),
                    message_type,
                    error = %e,
                    "message handler failed"
                );
                DispatchOutcome::Failed
            }
            Ok(Routed::NoHandler) => {
                tracing::warn!(session_id = session.id(), message_type, "no message handler");
                reply_error(
                    session,
                    &format!("no handler registered for message type {message_type}"),
                );
                DispatchOutcome::Unhandled
            }
            Err(panic) => {
                tracing::error!(
                    session_id = session.id(),
                    message_type,
                    panic = panic_message(panic.as_ref()),
                    "message handler panicked"
                );
                DispatchOutcome::Failed
            }
        }
    }

    /// Tears down `session` after its connection ended.
    ///
    /// Closes the session, removes it from the manager (running disconnect
    /// listeners) and clears its authentication state.
    pub fn on_disconnect(&self, session: &Arc<Session>) {
        session.close();
        match session.identity() {
            Some(identity) => tracing::info!(
                session_id = session.id(),
                player_id = identity.player_id,
                username = %identity.username,
                "authenticated player disconnected"
            ),
            None => tracing::info!(
                session_id = session.id(),
                "unauthenticated client disconnected"
            ),
        }

        self.sessions.on_disconnect(session);
        session.clear_authentication();
    }
}

fn reply_error(session: &Session, text: &str) {
    match Response::error(text).to_payload() {
        Ok(payload) => session.send(message_type::ERROR, payload),
        Err(e) => tracing::error!(
            session_id = session.id(),
            error = %e,
            "failed to encode error reply"
        ),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Identity, SessionOutbox};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        dispatcher: Dispatcher,
        registry: Arc<HandlerRegistry>,
        sessions: Arc<SessionManager>,
    }

    fn fixture() -> Fixture {
        let registry = Arc::new(HandlerRegistry::new());
        let sessions = Arc::new(SessionManager::new());
        let dispatcher =
            Dispatcher::with_default_login(Arc::clone(&registry), Arc::clone(&sessions));
        Fixture {
            dispatcher,
            registry,
            sessions,
        }
    }

    fn connect(fx: &Fixture) -> (Arc<Session>, SessionOutbox) {
        let (session, outbox) =
            Session::new(fx.sessions.next_session_id(), "127.0.0.1:7000".parse().unwrap());
        let session = Arc::new(session);
        fx.dispatcher.on_connect(Arc::clone(&session));
        (session, outbox)
    }

    fn error_text(message: &Message) -> String {
        assert_eq!(message.message_type(), message_type::ERROR);
        let response: serde_json::Value = serde_json::from_slice(message.payload()).unwrap();
        assert_eq!(response["success"], false);
        response["message"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_auth_gate_rejects_non_login() {
        let fx = fixture();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        fx.registry.register_fn(30, move |_s, _m| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let (session, mut outbox) = connect(&fx);
        let outcome = fx.dispatcher.on_message(&session, &Message::empty(30));

        assert_eq!(outcome, DispatchOutcome::Rejected);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(error_text(&outbox.try_recv().unwrap()), AUTH_REQUIRED);
        assert!(session.is_open());
        assert!(!session.is_authenticated());
    }

    #[test]
    fn test_login_passes_gate() {
        let fx = fixture();
        let sessions = Arc::clone(&fx.sessions);
        fx.registry
            .register_fn(message_type::LOGIN_REQUEST, move |session, _message| {
                sessions.authenticate(session, Identity::new(1001, "amiya"));
                session.send(message_type::LOGIN_RESPONSE, &b"welcome"[..]);
                Ok(())
            });

        let (session, mut outbox) = connect(&fx);
        let login = Message::new(message_type::LOGIN_REQUEST, &b"{}"[..]);
        assert_eq!(fx.dispatcher.on_message(&session, &login), DispatchOutcome::Handled);

        let reply = outbox.try_recv().unwrap();
        assert_eq!(reply.message_type(), message_type::LOGIN_RESPONSE);
        assert!(session.is_authenticated());
        assert!(fx.sessions.lookup_by_identity(1001).is_some());
    }

    #[test]
    fn test_authenticated_message_is_routed() {
        let fx = fixture();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        fx.registry.register_fn(60, move |_s, _m| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let (session, _outbox) = connect(&fx);
        fx.sessions.authenticate(&session, Identity::new(5, "exusiai"));

        assert_eq!(
            fx.dispatcher.on_message(&session, &Message::empty(60)),
            DispatchOutcome::Handled
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unhandled_type_replies_error() {
        let fx = fixture();
        let (session, mut outbox) = connect(&fx);
        fx.sessions.authenticate(&session, Identity::new(5, "exusiai"));

        let outcome = fx.dispatcher.on_message(&session, &Message::empty(999));

        assert_eq!(outcome, DispatchOutcome::Unhandled);
        assert_eq!(
            error_text(&outbox.try_recv().unwrap()),
            "no handler registered for message type 999"
        );
        assert!(session.is_open());
    }

    #[test]
    fn test_unhandled_login_replies_error() {
        let fx = fixture();
        let (session, mut outbox) = connect(&fx);

        let outcome = fx
            .dispatcher
            .on_message(&session, &Message::empty(message_type::LOGIN_REQUEST));

        assert_eq!(outcome, DispatchOutcome::Unhandled);
        assert!(outbox.try_recv().is_ok());
    }

    #[test]
    fn test_handler_error_and_panic_are_contained() {
        let fx = fixture();
        fx.registry
            .register_fn(61, |_s, _m| anyhow::bail!("inventory missing"));
        fx.registry.register_fn(62, |_s, _m| panic!("boom"));
        let (session, mut outbox) = connect(&fx);
        fx.sessions.authenticate(&session, Identity::new(5, "exusiai"));

        assert_eq!(
            fx.dispatcher.on_message(&session, &Message::empty(61)),
            DispatchOutcome::Failed
        );
        assert_eq!(
            fx.dispatcher.on_message(&session, &Message::empty(62)),
            DispatchOutcome::Failed
        );
        assert!(outbox.try_recv().is_err());
        assert!(session.is_open());
        assert!(fx.sessions.lookup_by_connection(session.id()).is_some());
    }

    #[test]
    fn test_message_touches_session() {
        let fx = fixture();
        let (session, _outbox) = connect(&fx);
        let before = session.last_active();
        std::thread::sleep(std::time::Duration::from_millis(2));

        let _ = fx.dispatcher.on_message(&session, &Message::empty(30));
        assert!(session.last_active() > before);
    }

    #[test]
    fn test_disconnect_cleans_up() {
        let fx = fixture();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        fx.sessions.register_disconnect_listener(move |session| {
            assert_eq!(session.player_id(), Some(5));
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let (session, _outbox) = connect(&fx);
        fx.sessions.authenticate(&session, Identity::new(5, "exusiai"));
        fx.dispatcher.on_disconnect(&session);

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!session.is_open());
        assert!(!session.is_authenticated());
        assert_eq!(fx.sessions.count(), 0);
        assert!(fx.sessions.lookup_by_identity(5).is_none());

        fx.dispatcher.on_disconnect(&session);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
