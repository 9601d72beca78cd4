//! Per-connection outbound path.
//!
//! Every accepted stream gets one writer task that owns its write half and
//! drains a bounded queue of encoded frames. All producers (tick broadcaster,
//! operator broadcaster, the connection's own handler) push whole frames into
//! that queue, so frames from different producers can never interleave on the
//! wire.

use std::{fmt, net::SocketAddr, time::Duration};

use bytes::Bytes;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc::{self, error::SendTimeoutError, error::TrySendError},
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Registry key of one accepted connection. Allocated by the accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Producer side of a connection.
///
/// Cheap to clone; the registry, broadcasters and the handler each hold one.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    id: ConnId,
    peer: SocketAddr,
    tx: mpsc::Sender<Bytes>,
    kick: CancellationToken,
}

/// Consumer side of a connection's frame queue, owned by the writer task.
#[derive(Debug)]
pub struct Outbox {
    id: ConnId,
    peer: SocketAddr,
    rx: mpsc::Receiver<Bytes>,
    kick: CancellationToken,
}

/// Why a frame was not queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// Queue at capacity; the peer is not keeping up.
    Full,
    /// Writer task is gone.
    Closed,
    /// No queue space within the allotted time.
    TimedOut,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Full => write!(f, "outbound queue full"),
            SendError::Closed => write!(f, "connection writer closed"),
            SendError::TimedOut => write!(f, "timed out waiting for outbound queue"),
        }
    }
}

impl std::error::Error for SendError {}

impl ConnHandle {
    /// Creates the handle/outbox pair for one connection.
    pub fn channel(id: ConnId, peer: SocketAddr, capacity: usize) -> (ConnHandle, Outbox) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let kick = CancellationToken::new();
        (
            ConnHandle {
                id,
                peer,
                tx,
                kick: kick.clone(),
            },
            Outbox { id, peer, rx, kick },
        )
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Queues a frame without waiting.
    pub fn try_send(&self, frame: Bytes) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Queues a frame, waiting at most `timeout` for space.
    pub async fn send(&self, frame: Bytes, timeout: Duration) -> Result<(), SendError> {
        self.tx.send_timeout(frame, timeout).await.map_err(|e| match e {
            SendTimeoutError::Timeout(_) => SendError::TimedOut,
            SendTimeoutError::Closed(_) => SendError::Closed,
        })
    }

    /// Closes the connection: the handler stops reading and the writer
    /// stops writing, dropping whatever is still queued.
    ///
    /// The request is latched, so it is not lost if either task is busy.
    pub fn kick(&self) {
        self.kick.cancel();
    }

    /// Resolves once [`ConnHandle::kick`] has been called.
    pub async fn kicked(&self) {
        self.kick.cancelled().await;
    }
}

impl Outbox {
    /// Next queued frame, `None` once every handle is dropped.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    /// Writes queued frames to `writer` until all handles are gone, the
    /// connection is kicked or a write fails. Each write is bounded by
    /// `write_timeout`; a failed or stalled write kicks the connection.
    pub async fn run<W>(mut self, mut writer: W, write_timeout: Duration)
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.kick.cancelled() => {
                    debug!(conn = %self.id, peer = %self.peer, backlog = self.rx.len(), "Writer kicked");
                    return;
                }
                frame = self.rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };
            let written = tokio::select! {
                biased;
                _ = self.kick.cancelled() => return,
                res = time::timeout(write_timeout, writer.write_all(&frame)) => res,
            };
            match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!(conn = %self.id, peer = %self.peer, error = %e, "Write failed");
                    self.kick.cancel();
                    return;
                }
                Err(_) => {
                    warn!(conn = %self.id, peer = %self.peer, ?write_timeout, "Write stalled, dropping client");
                    self.kick.cancel();
                    return;
                }
            }
        }
        let _ = time::timeout(write_timeout, writer.shutdown()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use tokio::io::AsyncReadExt;

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000)
    }

    #[tokio::test]
    async fn try_send_reports_full_queue() {
        let (handle, mut outbox) = ConnHandle::channel(ConnId(1), peer(), 2);
        handle.try_send(Bytes::from_static(b"a\n")).unwrap();
        handle.try_send(Bytes::from_static(b"b\n")).unwrap();
        assert_eq!(
            handle.try_send(Bytes::from_static(b"c\n")),
            Err(SendError::Full)
        );
        assert_eq!(outbox.recv().await.unwrap(), Bytes::from_static(b"a\n"));
    }

    #[tokio::test]
    async fn send_after_outbox_dropped_is_closed() {
        let (handle, outbox) = ConnHandle::channel(ConnId(1), peer(), 2);
        drop(outbox);
        assert_eq!(
            handle.try_send(Bytes::from_static(b"x\n")),
            Err(SendError::Closed)
        );
        assert_eq!(
            handle
                .send(Bytes::from_static(b"x\n"), Duration::from_millis(10))
                .await,
            Err(SendError::Closed)
        );
    }

    #[tokio::test]
    async fn send_times_out_on_full_queue() {
        let (handle, _outbox) = ConnHandle::channel(ConnId(1), peer(), 1);
        handle.try_send(Bytes::from_static(b"a\n")).unwrap();
        let res = handle
            .send(Bytes::from_static(b"b\n"), Duration::from_millis(20))
            .await;
        assert_eq!(res, Err(SendError::TimedOut));
    }

    #[tokio::test]
    async fn writer_preserves_frame_order_and_closes() {
        let (handle, outbox) = ConnHandle::channel(ConnId(1), peer(), 8);
        let (mut client, server) = tokio::io::duplex(1024);
        let writer = tokio::spawn(outbox.run(server, Duration::from_secs(1)));

        handle.try_send(Bytes::from_static(b"one\n")).unwrap();
        handle.try_send(Bytes::from_static(b"two\n")).unwrap();
        drop(handle);
        writer.await.unwrap();

        let mut received = String::new();
        client.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "one\ntwo\n");
    }

    #[tokio::test]
    async fn stalled_write_kicks_connection() {
        let (handle, outbox) = ConnHandle::channel(ConnId(1), peer(), 8);
        // Nobody reads the client end, so the 4-byte pipe fills immediately.
        let (_client, server) = tokio::io::duplex(4);
        let writer = tokio::spawn(outbox.run(server, Duration::from_millis(30)));

        handle
            .try_send(Bytes::from_static(b"this frame does not fit\n"))
            .unwrap();
        time::timeout(Duration::from_secs(2), handle.kicked())
            .await
            .expect("handler should be asked to close");
        writer.await.unwrap();
        assert_eq!(
            handle.try_send(Bytes::from_static(b"x\n")),
            Err(SendError::Closed)
        );
    }

    #[tokio::test]
    async fn kicked_writer_drops_its_backlog() {
        let (handle, outbox) = ConnHandle::channel(ConnId(2), peer(), 64);
        // The pipe holds one frame; the rest stays queued behind it.
        let (mut client, server) = tokio::io::duplex(8);
        for _ in 0..32 {
            handle.try_send(Bytes::from_static(b"frame!!\n")).unwrap();
        }
        let writer = tokio::spawn(outbox.run(server, Duration::from_secs(30)));

        time::sleep(Duration::from_millis(20)).await;
        handle.kick();
        time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("kicked writer should stop without draining")
            .unwrap();

        // The writer dropped the stream after at most the frames that fit.
        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.len() < 32 * 8, "{} bytes written", received.len());
        assert_eq!(
            handle.try_send(Bytes::from_static(b"x\n")),
            Err(SendError::Closed)
        );
    }

    #[tokio::test]
    async fn kick_is_latched() {
        let (handle, _outbox) = ConnHandle::channel(ConnId(3), peer(), 1);
        handle.clone().kick();
        // Both the handler and the writer observe the same kick.
        time::timeout(Duration::from_millis(100), handle.kicked())
            .await
            .unwrap();
        time::timeout(Duration::from_millis(100), handle.kicked())
            .await
            .unwrap();
    }
}
