//! Business callback contracts.

use crate::session::Session;
use gamewire_core::Message;
use std::sync::Arc;

/// Result returned by business callbacks.
///
/// An `Err` is logged at the dispatch boundary; the connection keeps serving.
pub type HandlerResult = anyhow::Result<()>;

/// Callback invoked for every inbound message of a registered type.
///
/// Handlers run on the worker pool, never on the I/O runtime, but should
/// still offload long blocking work. Session state may only be changed
/// through [`Session`]'s own operations.
pub trait MessageHandler: Send + Sync {
    /// Handles one message from `session`.
    ///
    /// # Errors
    /// Any error is logged by the dispatcher and otherwise ignored.
    fn handle(&self, session: &Arc<Session>, message: &Message) -> HandlerResult;
}

/// Wrapper to convert a closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&Arc<Session>, &Message) -> HandlerResult + Send + Sync,
{
    /// Creates a new function handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&Arc<Session>, &Message) -> HandlerResult + Send + Sync,
{
    fn handle(&self, session: &Arc<Session>, message: &Message) -> HandlerResult {
        (self.handler)(session, message)
    }
}

/// Callback run once for every session removed from the session manager.
pub type DisconnectListener = dyn Fn(&Arc<Session>) -> anyhow::Result<()> + Send + Sync;
