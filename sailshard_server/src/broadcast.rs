//! Best-effort fan-out of one encoded frame to every registered connection.

use bytes::Bytes;
use tracing::{debug, warn};

use crate::{conn::SendError, registry::ConnectionRegistry};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Frames queued.
    pub delivered: usize,
    /// Connections kicked because their queue was full.
    pub dropped: usize,
    /// Connections whose writer had already gone away.
    pub closed: usize,
}

/// Queues `frame` on every connection in a fresh snapshot.
///
/// Never waits on a peer. A full queue means the peer cannot keep up, so the
/// connection is kicked; its handler then deregisters it. Nothing is retried.
pub fn broadcast(registry: &ConnectionRegistry, frame: &Bytes) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    for conn in registry.snapshot() {
        match conn.try_send(frame.clone()) {
            Ok(()) => report.delivered += 1,
            Err(SendError::Full) => {
                warn!(conn = %conn.id(), peer = %conn.peer(), "Outbound queue full, dropping client");
                conn.kick();
                report.dropped += 1;
            }
            Err(e) => {
                debug!(conn = %conn.id(), peer = %conn.peer(), error = %e, "Skipping client");
                report.closed += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::{ConnHandle, ConnId};
    use std::{
        net::{IpAddr, Ipv4Addr, SocketAddr},
        time::Duration,
    };

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    #[tokio::test]
    async fn every_connection_gets_the_same_frame() {
        let reg = ConnectionRegistry::new();
        let mut outboxes = Vec::new();
        for n in 0..5 {
            let (handle, outbox) = ConnHandle::channel(ConnId(n), peer(7000 + n as u16), 4);
            reg.register(handle).unwrap();
            outboxes.push(outbox);
        }

        let frame = Bytes::from_static(b"{\"type\":\"tick\",\"tick\":1,\"ts\":1}\n");
        let report = broadcast(&reg, &frame);
        assert_eq!(
            report,
            BroadcastReport {
                delivered: 5,
                dropped: 0,
                closed: 0
            }
        );
        for outbox in &mut outboxes {
            assert_eq!(outbox.recv().await.unwrap(), frame);
        }
    }

    #[tokio::test]
    async fn full_connection_is_kicked_without_affecting_others() {
        let reg = ConnectionRegistry::new();
        let (slow, _slow_outbox) = ConnHandle::channel(ConnId(1), peer(1), 1);
        let (fast, mut fast_outbox) = ConnHandle::channel(ConnId(2), peer(2), 4);
        reg.register(slow.clone()).unwrap();
        reg.register(fast).unwrap();

        broadcast(&reg, &Bytes::from_static(b"a\n"));
        let report = broadcast(&reg, &Bytes::from_static(b"b\n"));
        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);

        tokio::time::timeout(Duration::from_millis(100), slow.kicked())
            .await
            .unwrap();
        assert_eq!(fast_outbox.recv().await.unwrap(), Bytes::from_static(b"a\n"));
        assert_eq!(fast_outbox.recv().await.unwrap(), Bytes::from_static(b"b\n"));
    }

    #[tokio::test]
    async fn closed_connection_is_skipped() {
        let reg = ConnectionRegistry::new();
        let (gone, outbox) = ConnHandle::channel(ConnId(1), peer(1), 1);
        drop(outbox);
        reg.register(gone).unwrap();
        let report = broadcast(&reg, &Bytes::from_static(b"a\n"));
        assert_eq!(report.closed, 1);
        assert_eq!(report.delivered, 0);
        // Cleanup belongs to the handler, not the broadcaster.
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn empty_registry_is_fine() {
        let reg = ConnectionRegistry::new();
        assert_eq!(broadcast(&reg, &Bytes::new()), BroadcastReport::default());
    }
}
