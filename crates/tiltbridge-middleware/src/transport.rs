//! Subscription transport.
//!
//! The dispatch loop never talks to a socket directly.  It holds one
//! [`Subscriber`] per channel and only ever asks it for the next frame.
//!
//! # Implementations
//!
//! - [`SpSubscriber`] – a SUB socket speaking the scalability-protocol wire
//!   mapping used by the simulation's PUB sockets (`tcp://host:port` and
//!   `ipc:///path`).
//! - [`BusSubscriber`][crate::bus::BusSubscriber] – in-process frames from a
//!   [`FrameBus`][crate::bus::FrameBus].
//!
//! # Wire mapping
//!
//! Both peers open with an 8-byte header: `00 53 50 00`, the 16-bit
//! big-endian protocol id, and two reserved zero bytes.  SUB is `0x0021` and
//! only talks to PUB (`0x0020`).  After the handshake each message is framed
//! as:
//!
//! | Transport | Framing |
//! |---|---|
//! | `tcp://` | 64-bit big-endian length, body |
//! | `ipc://` | `0x01` type byte, 64-bit big-endian length, body |
//!
//! PUB sends everything; topic filtering is a prefix match done here.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tiltbridge_types::BridgeError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Protocol id of a SUB v0 socket.
pub const PROTO_SUB: u16 = 0x0021;
/// Protocol id of a PUB v0 socket.
pub const PROTO_PUB: u16 = 0x0020;

/// Frames larger than this are rejected and the connection is reset.
pub const MAX_FRAME_LEN: u64 = 1 << 20;

const IPC_MSG_TYPE: u8 = 0x01;
const DEFAULT_REDIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Limit on connecting plus the protocol handshake.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(3);

/// A source of raw topic-framed messages.
#[async_trait]
pub trait Subscriber: Send {
    /// The topic prefix this subscriber delivers.
    fn topic(&self) -> &str;

    /// Wait for the next frame matching [`topic`][Self::topic].
    ///
    /// Returns `Ok(None)` once the source is permanently closed.  Errors are
    /// transient; calling `receive` again resumes delivery.
    async fn receive(&mut self) -> Result<Option<Vec<u8>>, BridgeError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Endpoint addressing
// ─────────────────────────────────────────────────────────────────────────────

/// A parsed dial address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `tcp://host:port`
    Tcp(String),
    /// `ipc:///path/to/socket`
    Ipc(std::path::PathBuf),
}

impl Endpoint {
    /// Parse a `tcp://` or `ipc://` address.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Subscription`] for any other scheme or an empty target.
    pub fn parse(address: &str) -> Result<Self, BridgeError> {
        let invalid = |details: &str| BridgeError::Subscription {
            address: address.to_string(),
            details: details.to_string(),
        };
        if let Some(target) = address.strip_prefix("tcp://") {
            if target.is_empty() || !target.contains(':') {
                return Err(invalid("expected tcp://host:port"));
            }
            Ok(Endpoint::Tcp(target.to_string()))
        } else if let Some(path) = address.strip_prefix("ipc://") {
            if path.is_empty() {
                return Err(invalid("expected ipc:///path"));
            }
            Ok(Endpoint::Ipc(path.into()))
        } else {
            Err(invalid("unsupported scheme; use tcp:// or ipc://"))
        }
    }
}

trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

// ─────────────────────────────────────────────────────────────────────────────
// SpSubscriber
// ─────────────────────────────────────────────────────────────────────────────

/// SUB socket dialled to a single PUB endpoint.
///
/// The first dial happens in [`SpSubscriber::dial`] and must succeed
/// within the dial timeout, handshake included.  If
/// the connection drops later, the error is reported once from
/// [`receive`][Subscriber::receive] and the next call re-dials, retrying
/// every `redial_backoff` until the publisher is back.
pub struct SpSubscriber {
    address: String,
    endpoint: Endpoint,
    topic: String,
    conn: Option<Box<dyn Connection>>,
    dial_timeout: Duration,
    redial_backoff: Duration,
}

impl SpSubscriber {
    /// Dial `address` and subscribe to `topic`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Subscription`] when the address cannot be parsed, the
    /// endpoint is unreachable, the peer is not a PUB socket, or the
    /// handshake does not finish within [`DEFAULT_DIAL_TIMEOUT`].
    pub async fn dial(address: &str, topic: impl Into<String>) -> Result<Self, BridgeError> {
        Self::dial_with_timeout(address, topic, DEFAULT_DIAL_TIMEOUT).await
    }

    /// [`dial`][Self::dial] with an explicit limit on connect plus handshake.
    /// The same limit applies to later re-dials.
    pub async fn dial_with_timeout(
        address: &str,
        topic: impl Into<String>,
        dial_timeout: Duration,
    ) -> Result<Self, BridgeError> {
        let endpoint = Endpoint::parse(address)?;
        let conn = connect_within(&endpoint, dial_timeout)
            .await
            .map_err(|e| BridgeError::Subscription {
                address: address.to_string(),
                details: e.to_string(),
            })?;
        let topic = topic.into();
        info!(address, topic = %topic, "subscribed");
        Ok(Self {
            address: address.to_string(),
            endpoint,
            topic,
            conn: Some(conn),
            dial_timeout,
            redial_backoff: DEFAULT_REDIAL_BACKOFF,
        })
    }

    /// Override the delay between re-dial attempts.
    pub fn with_redial_backoff(mut self, backoff: Duration) -> Self {
        self.redial_backoff = backoff;
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    async fn redial(&mut self) -> Box<dyn Connection> {
        loop {
            match connect_within(&self.endpoint, self.dial_timeout).await {
                Ok(conn) => {
                    info!(address = %self.address, "re-dialled publisher");
                    return conn;
                }
                Err(e) => {
                    debug!(address = %self.address, error = %e, "re-dial failed");
                    tokio::time::sleep(self.redial_backoff).await;
                }
            }
        }
    }
}

#[async_trait]
impl Subscriber for SpSubscriber {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn receive(&mut self) -> Result<Option<Vec<u8>>, BridgeError> {
        loop {
            if self.conn.is_none() {
                let conn = self.redial().await;
                self.conn = Some(conn);
            }
            let Some(conn) = self.conn.as_mut() else {
                continue;
            };

            match read_frame(conn, &self.endpoint).await {
                Ok(frame) if frame.starts_with(self.topic.as_bytes()) => return Ok(Some(frame)),
                Ok(frame) => {
                    trace!(topic = %self.topic, len = frame.len(), "dropped frame for other topic");
                }
                Err(e) => {
                    self.conn = None;
                    warn!(address = %self.address, error = %e, "publisher connection lost");
                    return Err(BridgeError::Transport(format!(
                        "connection to {} lost: {e}",
                        self.address
                    )));
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire helpers
// ─────────────────────────────────────────────────────────────────────────────

/// The 8-byte connection header announcing `proto`.
pub fn handshake_header(proto: u16) -> [u8; 8] {
    let [hi, lo] = proto.to_be_bytes();
    [0x00, b'S', b'P', 0x00, hi, lo, 0x00, 0x00]
}

async fn connect_within(endpoint: &Endpoint, limit: Duration) -> io::Result<Box<dyn Connection>> {
    tokio::time::timeout(limit, connect(endpoint))
        .await
        .unwrap_or_else(|_| {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("no PUB handshake within {limit:?}"),
            ))
        })
}

async fn connect(endpoint: &Endpoint) -> io::Result<Box<dyn Connection>> {
    let mut conn: Box<dyn Connection> = match endpoint {
        Endpoint::Tcp(target) => {
            let stream = TcpStream::connect(target.as_str()).await?;
            stream.set_nodelay(true)?;
            Box::new(stream)
        }
        #[cfg(unix)]
        Endpoint::Ipc(path) => Box::new(tokio::net::UnixStream::connect(path).await?),
        #[cfg(not(unix))]
        Endpoint::Ipc(_) => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "ipc:// endpoints need a unix platform",
            ));
        }
    };

    conn.write_all(&handshake_header(PROTO_SUB)).await?;
    let mut peer = [0u8; 8];
    conn.read_exact(&mut peer).await?;
    if peer[..4] != [0x00, b'S', b'P', 0x00] {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "peer did not send a protocol header",
        ));
    }
    let proto = u16::from_be_bytes([peer[4], peer[5]]);
    if proto != PROTO_PUB {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("peer protocol {proto:#06x} is not PUB"),
        ));
    }
    Ok(conn)
}

async fn read_frame<R>(conn: &mut R, endpoint: &Endpoint) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    if matches!(endpoint, Endpoint::Ipc(_)) {
        let kind = conn.read_u8().await?;
        if kind != IPC_MSG_TYPE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected ipc message type {kind:#04x}"),
            ));
        }
    }
    let len = conn.read_u64().await?;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds {MAX_FRAME_LEN}"),
        ));
    }
    let mut frame = vec![0u8; len as usize];
    conn.read_exact(&mut frame).await?;
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Accept one SUB connection on the listener side and complete the PUB
    /// half of the handshake.
    async fn accept_handshake<S>(stream: &mut S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut header = [0u8; 8];
        stream.read_exact(&mut header).await.unwrap();
        assert_eq!(header, handshake_header(PROTO_SUB));
        stream.write_all(&handshake_header(PROTO_PUB)).await.unwrap();
    }

    async fn write_tcp_frame<S: AsyncWrite + Unpin>(stream: &mut S, body: &[u8]) {
        stream.write_u64(body.len() as u64).await.unwrap();
        stream.write_all(body).await.unwrap();
    }

    #[test]
    fn parse_endpoints() {
        assert_eq!(
            Endpoint::parse("tcp://127.0.0.1:5555").unwrap(),
            Endpoint::Tcp("127.0.0.1:5555".to_string())
        );
        assert_eq!(
            Endpoint::parse("ipc:///tmp/RAAI/control_panel.ipc").unwrap(),
            Endpoint::Ipc("/tmp/RAAI/control_panel.ipc".into())
        );
        assert!(matches!(
            Endpoint::parse("ws://localhost:9090"),
            Err(BridgeError::Subscription { .. })
        ));
        assert!(Endpoint::parse("tcp://").is_err());
        assert!(Endpoint::parse("ipc://").is_err());
    }

    #[test]
    fn header_layout() {
        assert_eq!(handshake_header(PROTO_SUB), [0, b'S', b'P', 0, 0x00, 0x21, 0, 0]);
    }

    #[tokio::test]
    async fn dial_unreachable_endpoint_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = SpSubscriber::dial(&format!("tcp://{addr}"), "platform").await;
        assert!(matches!(result, Err(BridgeError::Subscription { .. })));
    }

    #[tokio::test]
    async fn tcp_subscriber_filters_by_topic_prefix() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let publisher = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            accept_handshake(&mut stream).await;
            write_tcp_frame(&mut stream, b"other {\"x\": 1}").await;
            write_tcp_frame(&mut stream, b"platform {\"platform_status\": false}").await;
            stream
        });

        let mut sub = SpSubscriber::dial(&format!("tcp://{addr}"), "platform")
            .await
            .unwrap();
        let frame = sub.receive().await.unwrap().unwrap();
        assert_eq!(frame, b"platform {\"platform_status\": false}");
        drop(publisher.await.unwrap());
    }

    #[tokio::test]
    async fn silent_peer_fails_dial_after_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let peer = tokio::spawn(async move {
            // Accept, then never answer the handshake.
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            SpSubscriber::dial_with_timeout(&format!("tcp://{addr}"), "platform", Duration::from_millis(100)),
        )
        .await
        .expect("dial must give up on its own");
        match result {
            Err(BridgeError::Subscription { details, .. }) => assert!(details.contains("handshake"), "{details}"),
            Err(other) => panic!("expected Subscription error, got {other:?}"),
            Ok(_) => panic!("dial to a silent peer must fail"),
        }
        peer.abort();
    }

    #[tokio::test]
    async fn peer_with_wrong_protocol_is_rejected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut header = [0u8; 8];
            stream.read_exact(&mut header).await.unwrap();
            // Answer as another SUB socket.
            stream.write_all(&handshake_header(PROTO_SUB)).await.unwrap();
        });

        let result = SpSubscriber::dial(&format!("tcp://{addr}"), "platform").await;
        assert!(matches!(result, Err(BridgeError::Subscription { .. })));
    }

    #[tokio::test]
    async fn oversized_frame_resets_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            accept_handshake(&mut stream).await;
            stream.write_u64(MAX_FRAME_LEN + 1).await.unwrap();
            // Keep the socket open long enough for the reader to react.
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut sub = SpSubscriber::dial(&format!("tcp://{addr}"), "platform")
            .await
            .unwrap();
        let err = sub.receive().await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
    }

    #[tokio::test]
    async fn lost_connection_is_redialled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            // First connection: handshake, then hang up.
            let (mut first, _) = listener.accept().await.unwrap();
            accept_handshake(&mut first).await;
            drop(first);

            let (mut second, _) = listener.accept().await.unwrap();
            accept_handshake(&mut second).await;
            write_tcp_frame(&mut second, b"platform {\"platform_status\": true}").await;
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut sub = SpSubscriber::dial(&format!("tcp://{addr}"), "platform")
            .await
            .unwrap()
            .with_redial_backoff(Duration::from_millis(10));

        assert!(sub.receive().await.is_err(), "hang-up must be reported once");
        let frame = sub.receive().await.unwrap().unwrap();
        assert!(frame.starts_with(b"platform"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn ipc_subscriber_reads_typed_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver_input_reader.ipc");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            accept_handshake(&mut stream).await;
            let body = b"driver_input {}";
            stream.write_u8(IPC_MSG_TYPE).await.unwrap();
            stream.write_u64(body.len() as u64).await.unwrap();
            stream.write_all(body).await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let address = format!("ipc://{}", path.display());
        let mut sub = SpSubscriber::dial(&address, "driver_input").await.unwrap();
        assert_eq!(sub.topic(), "driver_input");
        assert_eq!(sub.address(), address);
        let frame = sub.receive().await.unwrap().unwrap();
        assert_eq!(frame, b"driver_input {}");
    }
}
