use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::{error, info, trace, warn};

use super::{Connection, ConnectionFactory, TransportError};
use crate::sync::wait_for;
use crate::wire::frame::{FrameError, MAX_FRAME_LEN, encode_frame, try_decode_frame};

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const READ_CAPACITY_HINT: usize = 8192;

// -----------------------------------------------------------------------------
// ----- TransportOptions ------------------------------------------------------

/// `None` timeouts wait forever.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub addr: String,
    pub connect_timeout: Option<Duration>,
    pub send_timeout: Option<Duration>,
    pub receive_timeout: Option<Duration>,
}

// -----------------------------------------------------------------------------
// ----- FramedTransport -------------------------------------------------------

/// One TCP connection speaking length-prefixed frames.
///
/// The read and write halves are locked independently so a registered
/// connection can keep a reader parked on `receive` while other tasks send.
/// Anything that needs both halves locks the reader first.
#[derive(Debug)]
pub struct FramedTransport {
    options: TransportOptions,
    reader: Mutex<Option<FrameReader>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
}

#[derive(Debug)]
struct FrameReader {
    half: OwnedReadHalf,
    buffer: BytesMut,
}

// -----------------------------------------------------------------------------
// ----- FramedTransport: Static -----------------------------------------------

impl FramedTransport {
    /// A transport that still has to `connect`.
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            reader: Mutex::new(None),
            writer: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }
}

// -----------------------------------------------------------------------------
// ----- FramedTransport: Connection -------------------------------------------

#[async_trait]
impl Connection for FramedTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let addr = &self.options.addr;

        let stream = match wait_for(self.options.connect_timeout, TcpStream::connect(addr)).await
        {
            Some(Ok(stream)) => stream,
            Some(Err(source)) => {
                error!("connect to {addr} failed: {source}");
                return Err(TransportError::Connect {
                    addr: addr.clone(),
                    source,
                });
            }
            None => {
                error!("connect to {addr} timed out");
                return Err(TransportError::ConnectTimeout { addr: addr.clone() });
            }
        };

        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        // Old halves (if any) drop here, which closes the previous socket.
        let mut reader = self.reader.lock().await;
        let mut writer = self.writer.lock().await;
        *reader = Some(FrameReader::new(read_half));
        *writer = Some(write_half);
        self.connected.store(true, Ordering::Release);

        info!("connect to {addr} ok");
        Ok(())
    }

    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > MAX_FRAME_LEN {
            warn!(
                "refusing {} byte payload for {}: over the frame limit",
                payload.len(),
                self.options.addr
            );
            return Err(TransportError::PayloadTooLarge {
                addr: self.options.addr.clone(),
                len: payload.len(),
            });
        }
        let frame = encode_frame(payload);

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            self.connected.store(false, Ordering::Release);
            return Err(TransportError::NotConnected {
                addr: self.options.addr.clone(),
            });
        };

        // write_all loops over short writes; a zero-length write is an error.
        let reason = match wait_for(self.options.send_timeout, writer.write_all(&frame)).await {
            Some(Ok(())) => {
                trace!("sent {} bytes to {}", frame.len(), self.options.addr);
                return Ok(());
            }
            Some(Err(e)) => e.to_string(),
            None => "send timed out".to_string(),
        };

        self.connected.store(false, Ordering::Release);
        error!("send to {} failed: {reason}", self.options.addr);
        Err(TransportError::Send {
            addr: self.options.addr.clone(),
            reason,
        })
    }

    async fn receive(&self) -> Result<Option<Bytes>, TransportError> {
        let mut reader = self.reader.lock().await;
        self.receive_locked(&mut reader).await
    }

    async fn round_trip(&self, payload: &[u8]) -> Result<Option<Bytes>, TransportError> {
        let mut reader = self.reader.lock().await;
        self.send(payload).await?;
        self.receive_locked(&mut reader).await
    }

    async fn close(&self) {
        let mut reader = self.reader.lock().await;
        let mut writer = self.writer.lock().await;

        reader.take();
        if let Some(mut half) = writer.take() {
            let _ = half.shutdown().await;
        }

        if self.connected.swap(false, Ordering::AcqRel) {
            info!("close connection {} ok", self.options.addr);
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn addr(&self) -> &str {
        &self.options.addr
    }
}

// -----------------------------------------------------------------------------
// ----- FramedTransport: Private ----------------------------------------------

impl FramedTransport {
    async fn receive_locked(
        &self,
        reader: &mut Option<FrameReader>,
    ) -> Result<Option<Bytes>, TransportError> {
        let addr = &self.options.addr;

        let Some(reader) = reader.as_mut() else {
            self.connected.store(false, Ordering::Release);
            return Err(TransportError::NotConnected { addr: addr.clone() });
        };

        match wait_for(self.options.receive_timeout, reader.read_frame(addr)).await {
            None => Ok(None),
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(err)) => {
                self.connected.store(false, Ordering::Release);
                error!("receive from {addr} failed: {err}");
                Err(err)
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- FrameReader -----------------------------------------------------------

impl FrameReader {
    fn new(half: OwnedReadHalf) -> Self {
        Self {
            half,
            buffer: BytesMut::with_capacity(READ_CAPACITY_HINT),
        }
    }

    /// Cancel safe: bytes read before a cancelled call stay in `buffer`.
    async fn read_frame(&mut self, addr: &str) -> Result<Bytes, TransportError> {
        loop {
            match try_decode_frame(&mut self.buffer) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {}
                Err(FrameError::TooLarge(len)) => {
                    return Err(TransportError::FrameTooLarge {
                        addr: addr.to_string(),
                        len,
                    });
                }
            }

            if self.buffer.capacity() == self.buffer.len() {
                self.buffer.reserve(READ_CAPACITY_HINT);
            }

            let n = self
                .half
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| TransportError::Receive {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                })?;

            if n == 0 {
                return Err(TransportError::Receive {
                    addr: addr.to_string(),
                    reason: "connection closed by peer".to_string(),
                });
            }
        }
    }
}

// -----------------------------------------------------------------------------
// ----- TransportFactory ------------------------------------------------------

/// Connects a fresh `FramedTransport` for every pool slot.
#[derive(Debug, Clone)]
pub struct TransportFactory {
    options: TransportOptions,
}

impl TransportFactory {
    pub fn new(options: TransportOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ConnectionFactory<FramedTransport> for TransportFactory {
    async fn make(&self) -> Result<FramedTransport, TransportError> {
        let transport = FramedTransport::new(self.options.clone());
        transport.connect().await?;
        Ok(transport)
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn options(addr: String, receive_timeout: Option<Duration>) -> TransportOptions {
        TransportOptions {
            addr,
            connect_timeout: Some(Duration::from_secs(1)),
            send_timeout: Some(Duration::from_secs(1)),
            receive_timeout,
        }
    }

    async fn listen() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn send_writes_length_prefix_and_receive_strips_it() {
        let (listener, addr) = listen().await;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut header = [0u8; 4];
            stream.read_exact(&mut header).await.unwrap();
            let len = u32::from_be_bytes(header) as usize;
            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).await.unwrap();

            stream.write_all(&encode_frame(b"pong")).await.unwrap();
            body
        });

        let transport = FramedTransport::new(options(addr, Some(Duration::from_secs(1))));
        transport.connect().await.unwrap();
        assert!(transport.is_connected());

        let reply = transport.round_trip(b"ping").await.unwrap();
        assert_eq!(reply.as_deref(), Some(&b"pong"[..]));
        assert_eq!(server.await.unwrap(), b"ping");
    }

    #[tokio::test]
    async fn receive_timeout_is_empty_not_failure() {
        let (listener, addr) = listen().await;
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(stream);
        });

        let transport = FramedTransport::new(options(addr, Some(Duration::from_millis(50))));
        transport.connect().await.unwrap();

        assert!(transport.receive().await.unwrap().is_none());
        assert!(transport.is_connected());
    }

    #[tokio::test]
    async fn partial_frame_survives_a_timeout() {
        let (listener, addr) = listen().await;
        let _server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let frame = encode_frame(b"split-frame");
            stream.write_all(&frame[..6]).await.unwrap();
            tokio::time::sleep(Duration::from_millis(150)).await;
            stream.write_all(&frame[6..]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let transport = FramedTransport::new(options(addr, Some(Duration::from_millis(50))));
        transport.connect().await.unwrap();

        let mut got = None;
        for _ in 0..20 {
            if let Some(frame) = transport.receive().await.unwrap() {
                got = Some(frame);
                break;
            }
        }
        assert_eq!(got.as_deref(), Some(&b"split-frame"[..]));
    }

    #[tokio::test]
    async fn peer_close_marks_disconnected() {
        let (listener, addr) = listen().await;
        let _server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let transport = FramedTransport::new(options(addr, Some(Duration::from_secs(1))));
        transport.connect().await.unwrap();

        let err = transport.receive().await.unwrap_err();
        assert!(matches!(err, TransportError::Receive { .. }));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn connect_refused_is_error() {
        let (listener, addr) = listen().await;
        drop(listener);

        let transport = FramedTransport::new(options(addr, Some(Duration::from_secs(1))));
        assert!(transport.connect().await.is_err());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn send_before_connect_fails() {
        let transport = FramedTransport::new(options("127.0.0.1:9".into(), None));
        let err = transport.send(b"x").await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn oversized_payload_is_refused_without_dropping_the_connection() {
        let (listener, addr) = listen().await;
        let _server = tokio::spawn(async move {
            let _conn = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let transport = FramedTransport::new(options(addr, Some(Duration::from_secs(1))));
        transport.connect().await.unwrap();

        let payload = vec![0u8; MAX_FRAME_LEN + 1];
        let err = transport.send(&payload).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::PayloadTooLarge { len, .. } if len == MAX_FRAME_LEN + 1
        ));
        assert!(transport.is_connected());
        transport.send(b"small").await.unwrap();
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (listener, addr) = listen().await;
        let _server = tokio::spawn(async move {
            let _conn = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let transport = FramedTransport::new(options(addr, Some(Duration::from_secs(1))));
        transport.connect().await.unwrap();
        transport.close().await;
        transport.close().await;
        assert!(!transport.is_connected());
        assert!(transport.send(b"late").await.is_err());
    }
}
