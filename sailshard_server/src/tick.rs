//! Fixed-rate tick broadcaster.
//!
//! One instance per server. It owns the tick counter, so every client sees
//! the same sequence: 1, 2, 3, ... with no resets.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use sailshard_shared::net::{encode, now_millis, TickMsg, WireMsg};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::{
    broadcast::{broadcast, BroadcastReport},
    registry::ConnectionRegistry,
    shutdown::Shutdown,
};

/// Shortest period [`TickBroadcaster`] runs at; shorter ones are raised to it.
pub const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Emits a [`TickMsg`] to every registered connection once per period.
pub struct TickBroadcaster {
    registry: Arc<ConnectionRegistry>,
    period: Duration,
    tick: u64,
}

impl TickBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, period: Duration) -> Self {
        Self {
            registry,
            period: period.max(MIN_TICK_PERIOD),
            tick: 0,
        }
    }

    /// Last tick value sent, 0 before the first firing.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Sends exactly one tick. The frame is encoded once and shared by all
    /// connections, so every client sees the same `tick` and `ts`.
    pub fn fire(&mut self) -> anyhow::Result<(TickMsg, BroadcastReport)> {
        self.tick += 1;
        let msg = TickMsg {
            tick: self.tick,
            ts: now_millis(),
        };
        let frame = encode(&WireMsg::Tick(msg)).context("encode tick")?;
        let report = broadcast(&self.registry, &frame);
        Ok((msg, report))
    }

    /// Fires every period until shutdown. The first tick goes out one period
    /// after start.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        let mut interval = time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period = ?self.period, "Tick broadcaster started");

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = interval.tick() => {
                    match self.fire() {
                        Ok((msg, report)) => {
                            trace!(tick = msg.tick, delivered = report.delivered, "Tick");
                            if report.dropped > 0 {
                                debug!(tick = msg.tick, dropped = report.dropped, "Tick dropped slow clients");
                            }
                        }
                        Err(e) => warn!(tick = self.tick, error = %e, "Tick failed"),
                    }
                }
            }
        }

        info!(last_tick = self.tick, "Tick broadcaster stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        conn::{ConnHandle, ConnId, Outbox},
        shutdown,
    };
    use sailshard_shared::net::decode;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn register(reg: &ConnectionRegistry, n: u64, capacity: usize) -> Outbox {
        let peer = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8000 + n as u16);
        let (handle, outbox) = ConnHandle::channel(ConnId(n), peer, capacity);
        reg.register(handle).unwrap();
        outbox
    }

    async fn next_tick(outbox: &mut Outbox) -> TickMsg {
        let frame = outbox.recv().await.unwrap();
        let line = std::str::from_utf8(&frame[..frame.len() - 1]).unwrap();
        match decode(line).unwrap() {
            WireMsg::Tick(t) => t,
            other => panic!("expected tick, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_firing_reaches_every_connection_identically() {
        let reg = Arc::new(ConnectionRegistry::new());
        let mut outboxes: Vec<_> = (0..4).map(|n| register(&reg, n, 8)).collect();
        let mut ticker = TickBroadcaster::new(reg.clone(), Duration::from_millis(50));

        let (sent, report) = ticker.fire().unwrap();
        assert_eq!(sent.tick, 1);
        assert_eq!(report.delivered, 4);

        for outbox in &mut outboxes {
            assert_eq!(next_tick(outbox).await, sent);
        }
    }

    #[tokio::test]
    async fn counter_increments_without_gaps() {
        let reg = Arc::new(ConnectionRegistry::new());
        let mut outbox = register(&reg, 1, 16);
        let mut ticker = TickBroadcaster::new(reg, Duration::from_millis(50));

        for _ in 0..5 {
            ticker.fire().unwrap();
        }
        assert_eq!(ticker.current_tick(), 5);
        for expected in 1..=5 {
            assert_eq!(next_tick(&mut outbox).await.tick, expected);
        }
    }

    #[tokio::test]
    async fn counter_advances_with_no_clients() {
        let reg = Arc::new(ConnectionRegistry::new());
        let mut ticker = TickBroadcaster::new(reg.clone(), Duration::from_millis(50));
        ticker.fire().unwrap();
        ticker.fire().unwrap();

        let mut outbox = register(&reg, 1, 4);
        ticker.fire().unwrap();
        assert_eq!(next_tick(&mut outbox).await.tick, 3);
    }

    #[tokio::test]
    async fn zero_period_is_raised_to_minimum() {
        let reg = Arc::new(ConnectionRegistry::new());
        let mut outbox = register(&reg, 1, 256);
        let (trigger, shutdown) = shutdown::channel();
        let task = tokio::spawn(TickBroadcaster::new(reg.clone(), Duration::ZERO).run(shutdown));

        let t = tokio::time::timeout(Duration::from_secs(1), next_tick(&mut outbox))
            .await
            .unwrap();
        assert_eq!(t.tick, 1);

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn run_ticks_until_shutdown() {
        let reg = Arc::new(ConnectionRegistry::new());
        let mut outbox = register(&reg, 1, 256);
        let (trigger, shutdown) = shutdown::channel();
        let task = tokio::spawn(
            TickBroadcaster::new(reg.clone(), Duration::from_millis(10)).run(shutdown),
        );

        let mut last = 0;
        for _ in 0..5 {
            let t = tokio::time::timeout(Duration::from_secs(1), next_tick(&mut outbox))
                .await
                .unwrap();
            assert_eq!(t.tick, last + 1);
            last = t.tick;
        }

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
