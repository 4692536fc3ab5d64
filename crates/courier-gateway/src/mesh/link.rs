//! Mesh links: byte streams between relays and leaf clients.
//!
//! A link starts with a hello exchange (each side sends a single-frame
//! packet carrying its identity), then carries frame-set packets prefixed
//! with a `u32` length. Reads and writes run in separate tasks so a partially
//! read packet is never abandoned when outbound traffic arrives.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(unix)]
use std::path::PathBuf;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{timeout, Duration};

use courier_core::error::{CourierError, Result};
use courier_core::protocol::frames::{decode_frames, encode_frames, Frames};
use courier_core::protocol::HopId;

use crate::config::MeshSection;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(1);

pub trait LinkStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> LinkStream for T {}

pub type BoxStream = Box<dyn LinkStream>;

/// Where a relay listens: `tcp://host:port`, `host:port` or `ipc:///path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp(String),
    #[cfg(unix)]
    Ipc(PathBuf),
}

impl FromStr for Endpoint {
    type Err = CourierError;

    fn from_str(s: &str) -> Result<Self> {
        if let Some(addr) = s.strip_prefix("tcp://") {
            if addr.is_empty() {
                return Err(CourierError::BadRequest("empty tcp endpoint".into()));
            }
            return Ok(Endpoint::Tcp(addr.to_owned()));
        }
        if let Some(path) = s.strip_prefix("ipc://") {
            #[cfg(unix)]
            return Ok(Endpoint::Ipc(PathBuf::from(path)));
            #[cfg(not(unix))]
            return Err(CourierError::BadRequest(format!(
                "ipc endpoints are unix-only: {path}"
            )));
        }
        if !s.contains("://") && s.contains(':') {
            return Ok(Endpoint::Tcp(s.to_owned()));
        }
        Err(CourierError::BadRequest(format!("unsupported endpoint: {s}")))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            #[cfg(unix)]
            Endpoint::Ipc(path) => write!(f, "ipc://{}", path.display()),
        }
    }
}

impl Endpoint {
    pub async fn dial(&self) -> Result<BoxStream> {
        match self {
            Endpoint::Tcp(addr) => {
                let s = TcpStream::connect(addr)
                    .await
                    .map_err(|e| CourierError::TransportSend(format!("connect {self}: {e}")))?;
                let _ = s.set_nodelay(true);
                Ok(Box::new(s))
            }
            #[cfg(unix)]
            Endpoint::Ipc(path) => {
                let s = UnixStream::connect(path)
                    .await
                    .map_err(|e| CourierError::TransportSend(format!("connect {self}: {e}")))?;
                Ok(Box::new(s))
            }
        }
    }
}

pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Ipc(UnixListener, PathBuf),
}

impl Listener {
    /// Any bind failure is a startup error.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self> {
        match endpoint {
            Endpoint::Tcp(addr) => TcpListener::bind(addr)
                .await
                .map(Listener::Tcp)
                .map_err(|e| CourierError::BindConflict(format!("{endpoint}: {e}"))),
            #[cfg(unix)]
            Endpoint::Ipc(path) => UnixListener::bind(path)
                .map(|l| Listener::Ipc(l, path.clone()))
                .map_err(|e| CourierError::BindConflict(format!("{endpoint}: {e}"))),
        }
    }

    /// The endpoint actually bound (resolves `:0` ports).
    pub fn local_endpoint(&self) -> Result<Endpoint> {
        match self {
            Listener::Tcp(l) => l
                .local_addr()
                .map(|a| Endpoint::Tcp(a.to_string()))
                .map_err(|e| CourierError::Internal(format!("local_addr: {e}"))),
            #[cfg(unix)]
            Listener::Ipc(_, path) => Ok(Endpoint::Ipc(path.clone())),
        }
    }

    pub async fn accept(&self) -> std::io::Result<BoxStream> {
        match self {
            Listener::Tcp(l) => {
                let (s, _) = l.accept().await?;
                let _ = s.set_nodelay(true);
                Ok(Box::new(s))
            }
            #[cfg(unix)]
            Listener::Ipc(l, _) => {
                let (s, _) = l.accept().await?;
                Ok(Box::new(s))
            }
        }
    }
}

/// Encoded size of a frame set, excluding the link length prefix.
pub fn packet_len(frames: &[Bytes]) -> usize {
    2 + frames.iter().map(|f| 4 + f.len()).sum::<usize>()
}

/// Read one length-prefixed packet. `Ok(None)` on clean EOF.
///
/// A packet over `max` is read off the stream and discarded; the error is
/// `MalformedEnvelope` and the stream stays aligned on the next packet.
pub async fn read_packet<R: AsyncRead + Unpin>(r: &mut R, max: usize) -> Result<Option<Bytes>> {
    let len = match r.read_u32().await {
        Ok(n) => n as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CourierError::TransportSend(format!("read: {e}"))),
    };
    if len > max {
        let skipped = tokio::io::copy(&mut (&mut *r).take(len as u64), &mut tokio::io::sink())
            .await
            .map_err(|e| CourierError::TransportSend(format!("read: {e}")))?;
        if skipped < len as u64 {
            return Err(CourierError::TransportSend("closed inside oversized packet".into()));
        }
        return Err(CourierError::MalformedEnvelope(format!(
            "packet of {len} bytes exceeds {max}"
        )));
    }

    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)
        .await
        .map_err(|e| CourierError::TransportSend(format!("read: {e}")))?;
    Ok(Some(Bytes::from(buf)))
}

pub async fn write_packet<W: AsyncWrite + Unpin>(w: &mut W, frames: &[Bytes]) -> Result<()> {
    let packet = encode_frames(frames)?;
    let len = u32::try_from(packet.len())
        .map_err(|_| CourierError::MalformedEnvelope("packet exceeds u32".into()))?;

    write_raw(w, len, &packet)
        .await
        .map_err(|e| CourierError::TransportSend(format!("write: {e}")))
}

async fn write_raw<W: AsyncWrite + Unpin>(w: &mut W, len: u32, packet: &[u8]) -> std::io::Result<()> {
    w.write_u32(len).await?;
    w.write_all(packet).await?;
    w.flush().await
}

/// Exchange identities. Returns the peer identity and the split stream.
pub async fn handshake(
    stream: BoxStream,
    local: &str,
    max: usize,
) -> Result<(HopId, ReadHalf<BoxStream>, WriteHalf<BoxStream>)> {
    let (mut rd, mut wr) = tokio::io::split(stream);
    write_packet(&mut wr, &[Bytes::copy_from_slice(local.as_bytes())]).await?;

    let hello = timeout(HANDSHAKE_TIMEOUT, read_packet(&mut rd, max))
        .await
        .map_err(|_| CourierError::TransportSend("handshake timed out".into()))??
        .ok_or_else(|| CourierError::TransportSend("closed during handshake".into()))?;

    let peer = match decode_frames(hello)?.as_slice() {
        [id] if !id.is_empty() => String::from_utf8(id.to_vec())
            .map_err(|_| CourierError::MalformedEnvelope("peer identity is not utf-8".into()))?,
        _ => {
            return Err(CourierError::MalformedEnvelope(
                "hello must carry exactly one identity frame".into(),
            ))
        }
    };
    Ok((peer, rd, wr))
}

/// Inbound traffic from every link of one node, consumed by a single task.
#[derive(Debug)]
pub enum LinkEvent {
    Frames { from: HopId, frames: Frames },
    Closed { peer: HopId, link_id: u64 },
}

/// Sending side of a live link.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    pub id: u64,
    pub peer: HopId,
    tx: mpsc::Sender<Frames>,
    max: usize,
}

impl LinkHandle {
    /// Queue frames without waiting. A full or closed link drops them, and
    /// so does a packet the peer would refuse as oversized.
    pub fn try_send(&self, frames: Frames) -> Result<()> {
        let len = packet_len(&frames);
        if len > self.max {
            return Err(CourierError::TransportSend(format!(
                "packet of {len} bytes to {} exceeds {}",
                self.peer, self.max
            )));
        }
        self.tx.try_send(frames).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                CourierError::TransportSend(format!("link to {} is full", self.peer))
            }
            mpsc::error::TrySendError::Closed(_) => {
                CourierError::TransportSend(format!("link to {} is closed", self.peer))
            }
        })
    }
}

/// Start reader and writer tasks for an established link.
///
/// The returned abort handle stops the reader; the writer stops once every
/// `LinkHandle` clone is dropped.
pub fn spawn_link(
    peer: HopId,
    mut rd: ReadHalf<BoxStream>,
    mut wr: WriteHalf<BoxStream>,
    mesh: &MeshSection,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> (LinkHandle, AbortHandle) {
    let id = NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed);
    let (tx, mut rx) = mpsc::channel::<Frames>(mesh.link_queue);
    let max = mesh.max_packet_bytes;

    let writer_peer = peer.clone();
    let writer = tokio::spawn(async move {
        while let Some(frames) = rx.recv().await {
            if let Err(e) = write_packet(&mut wr, &frames).await {
                tracing::warn!(peer = %writer_peer, error = %e, "link write failed");
                break;
            }
        }
        let _ = wr.shutdown().await;
    });

    let reader_peer = peer.clone();
    let reader = tokio::spawn(async move {
        loop {
            match read_packet(&mut rd, max).await {
                Ok(Some(packet)) => match decode_frames(packet) {
                    Ok(frames) => {
                        let ev = LinkEvent::Frames {
                            from: reader_peer.clone(),
                            frames,
                        };
                        if events.send(ev).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(peer = %reader_peer, error = %e, "dropping malformed packet");
                    }
                },
                Ok(None) => {
                    tracing::debug!(peer = %reader_peer, "link closed by peer");
                    break;
                }
                Err(e @ CourierError::MalformedEnvelope(_)) => {
                    tracing::warn!(peer = %reader_peer, error = %e, "dropping oversized packet");
                }
                Err(e) => {
                    tracing::warn!(peer = %reader_peer, error = %e, "link read failed");
                    break;
                }
            }
        }
        writer.abort();
        let _ = events.send(LinkEvent::Closed {
            peer: reader_peer,
            link_id: id,
        });
    });

    (LinkHandle { id, peer, tx, max }, reader.abort_handle())
}
