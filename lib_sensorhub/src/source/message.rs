//! # Message Stream Source
//!
//! Cuts MAVLink frames out of a continuous byte stream. The stream comes from a
//! `Connect` implementation, so the same reader runs over TCP in production
//! and over an in-memory duplex in tests.
//!
//! When the stream ends or fails, the reader drops it and reports
//! `TransientFetchError::Closed`. The next call reconnects, waiting with an
//! exponential backoff after consecutive failures. The wait observes the
//! cancellation token, the way `UpstreamManager` waits between reconnects.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::errors::{DriverError, TransientFetchError};

use super::mavlink::{parse_frame, DecodedMessage, Parsed};
use super::SourceReader;

const READ_CHUNK: usize = 4096;

/// Opens the byte stream a `MessageReader` decodes.
#[async_trait]
pub trait Connect: Send {
    type Stream: AsyncRead + Unpin + Send;

    fn describe(&self) -> String;

    async fn connect(&mut self) -> std::io::Result<Self::Stream>;
}

/// Plain TCP client connection to `host:port`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

#[async_trait]
impl Connect for TcpConnector {
    type Stream = TcpStream;

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }

    async fn connect(&mut self) -> std::io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// A stream that already exists. It can be handed out once. Later connects fail.
pub struct Preconnected<R>(Option<R>);

impl<R> Preconnected<R> {
    pub fn new(stream: R) -> Self {
        Self(Some(stream))
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> Connect for Preconnected<R> {
    type Stream = R;

    fn describe(&self) -> String {
        "preconnected stream".to_string()
    }

    async fn connect(&mut self) -> std::io::Result<R> {
        self.0
            .take()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotConnected, "stream already consumed"))
    }
}

/// Reconnect delay schedule: `base * 2^n`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(1000),
            max: Duration::from_millis(60_000),
        }
    }
}

impl Backoff {
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1).min(16));
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Source reader yielding one decoded message per call.
pub struct MessageReader<C: Connect> {
    connector: C,
    stream: Option<C::Stream>,
    buffer: BytesMut,
    backoff: Backoff,
    failures: u32,
}

impl<C: Connect> MessageReader<C> {
    pub fn new(connector: C, backoff: Backoff) -> Self {
        Self {
            connector,
            stream: None,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            backoff,
            failures: 0,
        }
    }

    /// Returns `false` when cancelled during the backoff wait.
    async fn ensure_connected(&mut self, cancel: &CancellationToken) -> Result<bool, DriverError> {
        if self.stream.is_some() {
            return Ok(true);
        }
        if self.failures > 0 {
            let delay = self.backoff.delay(self.failures);
            debug!("reconnecting to {} in {:?}", self.connector.describe(), delay);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(false),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        match self.connector.connect().await {
            Ok(stream) => {
                info!("connected to {}", self.connector.describe());
                self.stream = Some(stream);
                self.buffer.clear();
                self.failures = 0;
                Ok(true)
            }
            Err(e) => {
                self.failures = self.failures.saturating_add(1);
                warn!("connect to {} failed ({} in a row): {}", self.connector.describe(), self.failures, e);
                Err(TransientFetchError::Io(e).into())
            }
        }
    }

    fn disconnect(&mut self) {
        self.stream = None;
        self.failures = self.failures.saturating_add(1);
    }
}

#[async_trait]
impl<C> SourceReader for MessageReader<C>
where
    C: Connect,
    C::Stream: 'static,
{
    type Unit = DecodedMessage;

    fn describe(&self) -> String {
        self.connector.describe()
    }

    async fn next_unit(&mut self, cancel: &CancellationToken) -> Result<Option<DecodedMessage>, DriverError> {
        loop {
            // Buffered bytes first, so no frame waits on the socket.
            match parse_frame(&self.buffer) {
                Parsed::Frame { consumed, message } => {
                    self.buffer.advance(consumed);
                    return Ok(Some(message));
                }
                Parsed::Skip(n) => {
                    debug!("skipping unknown message id {}", self.buffer[5]);
                    self.buffer.advance(n);
                    continue;
                }
                Parsed::Invalid { error, discard } => {
                    self.buffer.advance(discard.max(1).min(self.buffer.len()));
                    return Err(error.into());
                }
                Parsed::Incomplete => {}
            }

            if !self.ensure_connected(cancel).await? {
                return Ok(None);
            }
            let Some(stream) = self.stream.as_mut() else {
                continue;
            };

            self.buffer.reserve(READ_CHUNK);
            let read = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                read = stream.read_buf(&mut self.buffer) => read,
            };
            match read {
                Ok(0) => {
                    info!("{} closed the stream", self.connector.describe());
                    self.disconnect();
                    return Err(TransientFetchError::Closed.into());
                }
                Ok(_) => {}
                Err(e) => {
                    self.disconnect();
                    return Err(TransientFetchError::Io(e).into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::mavlink::{encode_frame, RPM};
    use super::super::Numeric;
    use super::*;
    use crate::errors::ProtocolError;
    use tokio::io::AsyncWriteExt;

    fn rpm(seq: u8, a: f64) -> Vec<u8> {
        encode_frame(&RPM, seq, 1, 1, &[Numeric::Float(a), Numeric::Float(a * 2.0)])
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let b = Backoff {
            base: Duration::from_millis(100),
            max: Duration::from_millis(500),
        };
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(3), Duration::from_millis(400));
        assert_eq!(b.delay(10), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn decodes_frames_split_across_reads_and_resyncs() {
        let (mut tx, rx) = tokio::io::duplex(256);
        let mut reader = MessageReader::new(Preconnected::new(rx), Backoff::default());
        let cancel = CancellationToken::new();

        let first = rpm(0, 100.0);
        tx.write_all(&first[..5]).await.unwrap();
        let writer = tokio::spawn(async move {
            tx.write_all(&first[5..]).await.unwrap();
            let mut corrupt = rpm(1, 1.0);
            corrupt[7] ^= 0x55;
            tx.write_all(&corrupt).await.unwrap();
            tx.write_all(&rpm(2, 300.0)).await.unwrap();
            tx
        });

        let msg = reader.next_unit(&cancel).await.unwrap().unwrap();
        assert_eq!(msg.value("rpm1"), Some(Numeric::Float(100.0)));

        let err = reader.next_unit(&cancel).await.unwrap_err();
        assert!(matches!(err, DriverError::Protocol(ProtocolError::Checksum { .. })));

        // The rest of the corrupted frame is garbage until the next start byte.
        let msg = loop {
            match reader.next_unit(&cancel).await {
                Ok(Some(m)) => break m,
                Err(DriverError::Protocol(_)) => continue,
                other => panic!("unexpected {:?}", other.map(|m| m.map(|m| m.seq))),
            }
        };
        assert_eq!(msg.seq, 2);
        assert_eq!(msg.value("rpm2"), Some(Numeric::Float(600.0)));
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn end_of_stream_is_reported_as_closed() {
        let (tx, rx) = tokio::io::duplex(64);
        drop(tx);
        let mut reader = MessageReader::new(Preconnected::new(rx), Backoff::default());
        let cancel = CancellationToken::new();
        let err = reader.next_unit(&cancel).await.unwrap_err();
        assert!(matches!(err, DriverError::Fetch(TransientFetchError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_reconnect_backoff() {
        let (tx, rx) = tokio::io::duplex(64);
        drop(tx);
        let mut reader = MessageReader::new(Preconnected::new(rx), Backoff::default());
        let cancel = CancellationToken::new();
        assert!(reader.next_unit(&cancel).await.is_err());

        cancel.cancel();
        assert!(reader.next_unit(&cancel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_interrupts_idle_read() {
        let (_tx, rx) = tokio::io::duplex(64);
        let mut reader = MessageReader::new(Preconnected::new(rx), Backoff::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });
        assert!(reader.next_unit(&cancel).await.unwrap().is_none());
    }
}
