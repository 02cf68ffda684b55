use async_trait::async_trait;

use crate::wire::messages::{ConnClose, ConnOpen, Transfer};

// -----------------------------------------------------------------------------
// ----- EventCallback ---------------------------------------------------------

/// Business hooks for gateway events delivered on a main connection.
///
/// Each event runs on its own task, so slow handlers do not stall the
/// receive loop. Unimplemented hooks ignore the event.
#[async_trait]
pub trait EventCallback: Send + Sync + 'static {
    async fn on_open(&self, _event: ConnOpen) {}

    async fn on_message(&self, _event: Transfer) {}

    async fn on_close(&self, _event: ConnClose) {}
}

/// Ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl EventCallback for NoopEvents {}
