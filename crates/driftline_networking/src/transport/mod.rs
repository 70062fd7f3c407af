//! # Transport Layer
//!
//! The replication stack only needs fire-and-forget datagrams on two
//! channels per peer, expressed by [`Transport`]. Sending never blocks and
//! receiving returns `None` when nothing is due.
//!
//! [`LoopbackEndpoint`] and [`LoopbackHub`] implement it in-process over
//! `crossbeam-channel`, with seeded latency, jitter, loss and duplication on
//! the unreliable channel.

use crate::error::{SyncError, SyncResult};
use crate::protocol::Delivery;
use crate::simulation::NetworkConditions;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use driftline_shared::ConnectionId;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

/// Address clients use for the authority.
pub const SERVER_CONNECTION: ConnectionId = ConnectionId(0);

/// Datagram transport.
pub trait Transport {
    /// Queues `payload` for `to`. `now` is the sender's clock (seconds).
    fn send(&mut self, now: f64, to: ConnectionId, delivery: Delivery, payload: &[u8]) -> SyncResult<()>;

    /// Next datagram due at `now`, with its sender.
    fn receive(&mut self, now: f64) -> Option<(ConnectionId, Vec<u8>)>;

    /// Traffic counters.
    fn stats(&self) -> TransportStats;
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Packets sent.
    pub packets_sent: u64,
    /// Packets received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Unreliable packets dropped by simulated loss.
    pub dropped: u64,
    /// Unreliable packets delivered twice.
    pub duplicated: u64,
}

impl TransportStats {
    fn merge(&mut self, other: &Self) {
        self.packets_sent += other.packets_sent;
        self.packets_received += other.packets_received;
        self.bytes_sent += other.bytes_sent;
        self.bytes_received += other.bytes_received;
        self.dropped += other.dropped;
        self.duplicated += other.duplicated;
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Datagram {
    deliver_at_us: u64,
    order: u64,
    payload: Vec<u8>,
}

fn to_micros(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1_000_000.0) as u64
    } else {
        0
    }
}

/// One side of an in-process link.
pub struct LoopbackEndpoint {
    peer: ConnectionId,
    tx: Sender<Datagram>,
    rx: Receiver<Datagram>,
    in_flight: BinaryHeap<Reverse<Datagram>>,
    conditions: NetworkConditions,
    rng: ChaCha8Rng,
    next_order: u64,
    reliable_tail_us: u64,
    stats: TransportStats,
}

impl LoopbackEndpoint {
    /// Creates a connected pair.
    ///
    /// `a` addresses its peer as `b_id`, and `b` addresses its peer as `a_id`.
    #[must_use]
    pub fn pair(a_id: ConnectionId, b_id: ConnectionId, conditions: NetworkConditions, seed: u64) -> (Self, Self) {
        let (a_tx, b_rx) = unbounded();
        let (b_tx, a_rx) = unbounded();
        let a = Self::new(b_id, a_tx, a_rx, conditions.clone(), seed);
        let b = Self::new(a_id, b_tx, b_rx, conditions, seed.wrapping_add(0x9E37_79B9));
        (a, b)
    }

    fn new(
        peer: ConnectionId,
        tx: Sender<Datagram>,
        rx: Receiver<Datagram>,
        conditions: NetworkConditions,
        seed: u64,
    ) -> Self {
        Self {
            peer,
            tx,
            rx,
            in_flight: BinaryHeap::new(),
            conditions,
            rng: ChaCha8Rng::seed_from_u64(seed),
            next_order: 0,
            reliable_tail_us: 0,
            stats: TransportStats::default(),
        }
    }

    /// Address of the other side.
    #[must_use]
    pub const fn peer(&self) -> ConnectionId {
        self.peer
    }

    /// Replaces the simulated network conditions.
    pub fn set_conditions(&mut self, conditions: NetworkConditions) {
        self.conditions = conditions;
    }

    fn push(&mut self, deliver_at_us: u64, payload: &[u8]) -> SyncResult<()> {
        let datagram = Datagram {
            deliver_at_us,
            order: self.next_order,
            payload: payload.to_vec(),
        };
        self.next_order += 1;
        self.tx
            .send(datagram)
            .map_err(|_| SyncError::TransportClosed(self.peer))?;
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += payload.len() as u64;
        Ok(())
    }
}

impl Transport for LoopbackEndpoint {
    fn send(&mut self, now: f64, to: ConnectionId, delivery: Delivery, payload: &[u8]) -> SyncResult<()> {
        if to != self.peer {
            return Err(SyncError::UnknownConnection(to));
        }
        let now_us = to_micros(now);

        match delivery {
            Delivery::Reliable => {
                // In order, never lost: no jitter, never before the previous one.
                let base = to_micros(f64::from(self.conditions.base_latency_ms) / 1_000.0);
                let at = (now_us + base).max(self.reliable_tail_us);
                self.reliable_tail_us = at;
                self.push(at, payload)
            }
            Delivery::Unreliable => {
                if self.conditions.should_drop(&mut self.rng) {
                    self.stats.dropped += 1;
                    return Ok(());
                }
                let at = now_us + to_micros(self.conditions.sample_latency(&mut self.rng));
                self.push(at, payload)?;
                if self.conditions.should_duplicate(&mut self.rng) {
                    self.stats.duplicated += 1;
                    let again = now_us + to_micros(self.conditions.sample_latency(&mut self.rng));
                    self.push(again, payload)?;
                }
                Ok(())
            }
        }
    }

    fn receive(&mut self, now: f64) -> Option<(ConnectionId, Vec<u8>)> {
        loop {
            match self.rx.try_recv() {
                Ok(datagram) => self.in_flight.push(Reverse(datagram)),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }

        let now_us = to_micros(now);
        if self.in_flight.peek()?.0.deliver_at_us > now_us {
            return None;
        }
        let Reverse(datagram) = self.in_flight.pop()?;
        self.stats.packets_received += 1;
        self.stats.bytes_received += datagram.payload.len() as u64;
        Some((self.peer, datagram.payload))
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}

/// Authority side of many loopback links.
#[derive(Default)]
pub struct LoopbackHub {
    links: BTreeMap<ConnectionId, LoopbackEndpoint>,
    cursor: Option<ConnectionId>,
}

impl LoopbackHub {
    /// Creates a hub with no links.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a link for `id` and returns the client's endpoint.
    pub fn connect(&mut self, id: ConnectionId, conditions: NetworkConditions, seed: u64) -> SyncResult<LoopbackEndpoint> {
        if self.links.contains_key(&id) || id == SERVER_CONNECTION {
            return Err(SyncError::AlreadyConnected(id));
        }
        let (server_side, client_side) = LoopbackEndpoint::pair(SERVER_CONNECTION, id, conditions, seed);
        self.links.insert(id, server_side);
        Ok(client_side)
    }

    /// Closes the link for `id`.
    pub fn disconnect(&mut self, id: ConnectionId) -> bool {
        self.links.remove(&id).is_some()
    }

    /// Number of open links.
    #[must_use]
    pub fn len(&self) -> usize {
        self.links.len()
    }

    /// True if no link is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl Transport for LoopbackHub {
    fn send(&mut self, now: f64, to: ConnectionId, delivery: Delivery, payload: &[u8]) -> SyncResult<()> {
        self.links
            .get_mut(&to)
            .ok_or(SyncError::UnknownConnection(to))?
            .send(now, to, delivery, payload)
    }

    fn receive(&mut self, now: f64) -> Option<(ConnectionId, Vec<u8>)> {
        // Round-robin so one chatty link cannot starve the others.
        let ids: Vec<ConnectionId> = self.links.keys().copied().collect();
        let split = self.cursor.map_or(0, |c| ids.partition_point(|id| *id <= c));
        for id in ids[split..].iter().chain(&ids[..split]) {
            let Some(link) = self.links.get_mut(id) else {
                continue;
            };
            if let Some((_, payload)) = link.receive(now) {
                self.cursor = Some(*id);
                return Some((*id, payload));
            }
        }
        None
    }

    fn stats(&self) -> TransportStats {
        let mut total = TransportStats::default();
        for link in self.links.values() {
            total.merge(&link.stats);
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_is_respected() {
        let conditions = NetworkConditions {
            base_latency_ms: 50,
            ..NetworkConditions::PERFECT
        };
        let (mut a, mut b) = LoopbackEndpoint::pair(ConnectionId(1), ConnectionId(2), conditions, 1);

        a.send(0.0, ConnectionId(2), Delivery::Unreliable, b"hello").expect("open");
        assert!(b.receive(0.049).is_none());
        let (from, payload) = b.receive(0.05).expect("due");
        assert_eq!(from, ConnectionId(1));
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn test_reliable_is_ordered_and_lossless() {
        let conditions = NetworkConditions {
            packet_loss_percent: 100,
            ..NetworkConditions::POOR
        };
        let (mut a, mut b) = LoopbackEndpoint::pair(ConnectionId(1), ConnectionId(2), conditions, 9);
        for i in 0..20u8 {
            a.send(f64::from(i) * 0.001, ConnectionId(2), Delivery::Reliable, &[i]).expect("open");
        }
        let received: Vec<u8> = std::iter::from_fn(|| b.receive(10.0)).map(|(_, p)| p[0]).collect();
        assert_eq!(received, (0..20).collect::<Vec<u8>>());
    }

    #[test]
    fn test_unreliable_loss() {
        let conditions = NetworkConditions {
            packet_loss_percent: 100,
            ..NetworkConditions::PERFECT
        };
        let (mut a, mut b) = LoopbackEndpoint::pair(ConnectionId(1), ConnectionId(2), conditions, 3);
        a.send(0.0, ConnectionId(2), Delivery::Unreliable, b"x").expect("open");
        assert!(b.receive(1.0).is_none());
        assert_eq!(a.stats().dropped, 1);
    }

    #[test]
    fn test_closed_and_unknown_peers() {
        let (mut a, b) = LoopbackEndpoint::pair(ConnectionId(1), ConnectionId(2), NetworkConditions::PERFECT, 0);
        assert!(matches!(
            a.send(0.0, ConnectionId(7), Delivery::Reliable, b"x"),
            Err(SyncError::UnknownConnection(ConnectionId(7)))
        ));
        drop(b);
        assert!(matches!(
            a.send(0.0, ConnectionId(2), Delivery::Reliable, b"x"),
            Err(SyncError::TransportClosed(ConnectionId(2)))
        ));
    }

    #[test]
    fn test_hub_routes_by_connection() {
        let mut hub = LoopbackHub::new();
        let mut c1 = hub.connect(ConnectionId(1), NetworkConditions::PERFECT, 1).expect("new");
        let mut c2 = hub.connect(ConnectionId(2), NetworkConditions::PERFECT, 2).expect("new");
        assert!(hub.connect(ConnectionId(1), NetworkConditions::PERFECT, 3).is_err());

        c1.send(0.0, SERVER_CONNECTION, Delivery::Reliable, b"one").expect("open");
        c2.send(0.0, SERVER_CONNECTION, Delivery::Reliable, b"two").expect("open");
        let mut got: Vec<(ConnectionId, Vec<u8>)> = std::iter::from_fn(|| hub.receive(1.0)).collect();
        got.sort();
        assert_eq!(got, vec![(ConnectionId(1), b"one".to_vec()), (ConnectionId(2), b"two".to_vec())]);

        hub.send(1.0, ConnectionId(2), Delivery::Reliable, b"back").expect("open");
        assert_eq!(c2.receive(2.0).map(|(_, p)| p), Some(b"back".to_vec()));
        assert!(c1.receive(2.0).is_none());
        assert_eq!(hub.stats().packets_received, 2);
    }
}
