//! Message type to handler routing table.

use crate::handler::{FnHandler, HandlerResult, MessageHandler};
use crate::session::Session;
use gamewire_core::Message;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of routing one message through the registry.
#[derive(Debug)]
#[must_use]
pub enum Routed {
    /// A handler ran and returned this result.
    Handled(HandlerResult),
    /// No handler is registered for the message type.
    NoHandler,
}

/// Maps message types to handlers.
///
/// One instance is shared by the whole server. At most one handler is
/// installed per type and the last registration wins. The table lock is held
/// only for the lookup, never while a handler runs, so late registration never
/// waits on a slow handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<i32, Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or replaces the handler for `message_type`.
    pub fn register(&self, message_type: i32, handler: Arc<dyn MessageHandler>) {
        if self
            .handlers
            .write()
            .insert(message_type, handler)
            .is_some()
        {
            tracing::debug!(message_type, "replaced message handler");
        }
    }

    /// Installs a closure as the handler for `message_type`.
    ///
    /// Returns the installed handler so it can later be passed to
    /// [`unregister`](Self::unregister).
    pub fn register_fn<F>(&self, message_type: i32, handler: F) -> Arc<dyn MessageHandler>
    where
        F: Fn(&Arc<Session>, &Message) -> HandlerResult + Send + Sync + 'static,
    {
        let handler: Arc<dyn MessageHandler> = Arc::new(FnHandler::new(handler));
        self.register(message_type, Arc::clone(&handler));
        handler
    }

    /// Removes the mapping only if `handler` is the one currently installed.
    ///
    /// Returns true if a mapping was removed.
    pub fn unregister(&self, message_type: i32, handler: &Arc<dyn MessageHandler>) -> bool {
        let mut handlers = self.handlers.write();
        match handlers.get(&message_type) {
            Some(current) if same_handler(current, handler) => {
                handlers.remove(&message_type);
                true
            }
            _ => false,
        }
    }

    /// Returns the handler installed for `message_type`.
    #[must_use]
    pub fn get(&self, message_type: i32) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.read().get(&message_type).cloned()
    }

    /// Returns true if a handler is registered for `message_type`.
    #[must_use]
    pub fn has_handler(&self, message_type: i32) -> bool {
        self.handlers.read().contains_key(&message_type)
    }

    /// Returns the number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Invokes the handler for `message.message_type()` on the calling thread.
    ///
    /// A missing handler is reported as [`Routed::NoHandler`]; informing the
    /// client is up to the caller.
    pub fn dispatch(&self, session: &Arc<Session>, message: &Message) -> Routed {
        match self.get(message.message_type()) {
            Some(handler) => Routed::Handled(handler.handle(session, message)),
            None => Routed::NoHandler,
        }
    }
}

fn same_handler(a: &Arc<dyn MessageHandler>, b: &Arc<dyn MessageHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
