use async_trait::async_trait;
use bytes::Bytes;

use super::TransportError;

// -----------------------------------------------------------------------------
// ----- Connection ------------------------------------------------------------

/// What every gateway connection can do, whether pooled or registered.
///
/// `receive` and `round_trip` return `Ok(None)` when the receive timeout
/// elapsed without a complete frame; that is not a failure.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    async fn connect(&self) -> Result<(), TransportError>;

    async fn send(&self, payload: &[u8]) -> Result<(), TransportError>;

    async fn receive(&self) -> Result<Option<Bytes>, TransportError>;

    /// Send `payload` and read the next frame, with no other reader able to
    /// interleave between the two.
    async fn round_trip(&self, payload: &[u8]) -> Result<Option<Bytes>, TransportError>;

    async fn close(&self);

    fn is_connected(&self) -> bool;

    /// `host:port` of the peer, for logs and errors.
    fn addr(&self) -> &str;
}

// -----------------------------------------------------------------------------
// ----- ConnectionFactory -----------------------------------------------------

/// Builds ready-to-use (already connected) connections for a pool.
#[async_trait]
pub trait ConnectionFactory<C: Connection>: Send + Sync + 'static {
    async fn make(&self) -> Result<C, TransportError>;
}
