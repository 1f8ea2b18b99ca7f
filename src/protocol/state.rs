//! Presence and identity negotiation
//!
//! A device announces itself and claims a device number before it joins the network:
//! initial presence, stage-1 presence with the MAC, the identity claim (with collision
//! avoidance when numbering is automatic) and finally the set-number frames. Each step
//! is sent `claim_attempts` times, `reply_wait` apart. Once active, the device keeps
//! defending its number against claims and keepalives from other hosts.

use std::fmt;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use crate::core::{
    Destination,
    Error,
    Event,
    NumberStore,
    Outbox,
    Port,
    Result,
    VirtualDevice,
    MAX_AUTO_NUMBER,
    MAX_DATAGRAM_SIZE,
};
use crate::network::backline::Upsert;

use super::builder;
use super::message::{DiscoveryFrame, DiscoveryKind, Frame};

/// Where a device is in claiming its number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationState {
    Unclaimed,
    BroadcastingPresence,
    ClaimingNumber,
    NegotiatingNumber,
    SettingNumber,
    /// Number claimed; keepalives and status are running
    Active,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NegotiationState::Unclaimed => "unclaimed",
            NegotiationState::BroadcastingPresence => "broadcasting-presence",
            NegotiationState::ClaimingNumber => "claiming-number",
            NegotiationState::NegotiatingNumber => "negotiating-number",
            NegotiationState::SettingNumber => "setting-number",
            NegotiationState::Active => "active",
        };
        f.write_str(name)
    }
}

/// Transport used while claiming a number
///
/// Claim frames go out as discovery broadcasts, and id-in-use replies arrive on the
/// unicast discovery socket.
#[allow(async_fn_in_trait)]
pub trait ClaimChannel {
    /// Broadcasts one frame on the discovery port
    async fn broadcast(&mut self, packet: &[u8]) -> Result<()>;

    /// Waits up to `wait` for one unicast discovery datagram, returning its length
    async fn recv_reply(&mut self, buf: &mut [u8], wait: Duration) -> Result<Option<usize>>;
}

/// Next candidate in automatic mode, wrapping after the last auto number
fn next_candidate(number: u8) -> u8 {
    if number >= MAX_AUTO_NUMBER {
        1
    } else {
        number + 1
    }
}

impl VirtualDevice {
    fn enter(&mut self, state: NegotiationState) {
        debug!(device = self.number, from = %self.state, to = %state, "negotiation step");
        self.state = state;
    }

    async fn broadcast_step<C: ClaimChannel>(&self, channel: &mut C, packet: &[u8]) {
        if let Err(e) = channel.broadcast(packet).await {
            warn!(device = self.number, state = %self.state, error = %e, "failed to send negotiation frame");
        }
    }

    /// Listens for the rest of one reply window for an id-in-use reply to `sequence`
    ///
    /// `answered` holds the last sequence that already moved the candidate, so a replayed
    /// reply can never move it twice.
    async fn await_id_in_use<C: ClaimChannel>(
        &self,
        channel: &mut C,
        sequence: u8,
        answered: &mut Option<u8>,
    ) -> bool {
        let deadline = Instant::now() + self.config.reply_wait;
        let mut buf = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }

            let len = match channel.recv_reply(&mut buf, remaining).await {
                Ok(Some(len)) => len,
                Ok(None) => return false,
                Err(e) => {
                    warn!(device = self.number, error = %e, "failed to receive id-in-use reply");
                    return false;
                }
            };

            match Frame::parse(&buf[..len], Port::Discovery) {
                Ok(Frame::Discovery(frame))
                    if frame.is_id_in_use(self.number, sequence) && *answered != Some(sequence) =>
                {
                    *answered = Some(sequence);
                    return true;
                }
                Ok(frame) => {
                    trace!(device = self.number, sequence, kind = %frame.type_name(), "ignored reply");
                }
                Err(e) => {
                    trace!(error = %e, "discarded reply");
                }
            }
        }
    }

    /// Claims a device number and moves the device to [`NegotiationState::Active`]
    ///
    /// With automatic numbering the stored number (if any) is the first candidate, and
    /// each matching id-in-use reply moves on to the next one, wrapping after 4. A fixed
    /// number is announced without listening for replies. The claimed number is saved to
    /// `store` in automatic mode only.
    pub async fn claim_number<C: ClaimChannel>(&mut self, channel: &mut C, store: &dyn NumberStore) -> Result<u8> {
        if self.state == NegotiationState::Active {
            return Err(Error::invalid_state(format!("device {} already holds its number", self.number)));
        }

        let model = self.identity.model;
        let attempts = self.config.claim_attempts;
        let wait = self.config.reply_wait;

        if self.auto_number {
            if let Some(stored) = store.load() {
                self.set_number(stored);
            }
        }
        info!(device = self.number, auto = self.auto_number, ?model, "claiming device number");

        self.enter(NegotiationState::BroadcastingPresence);
        let initial = builder::initial_discovery(model);
        for _ in 0..attempts {
            self.broadcast_step(channel, &initial).await;
            sleep(wait).await;
        }

        let mut stage1 = builder::stage1_discovery(model, self.identity.mac, 1);
        for attempt in 0..attempts {
            if attempt > 0 {
                stage1.increment_sequence();
            }
            self.broadcast_step(channel, stage1.bytes()).await;
            sleep(wait).await;
        }

        self.enter(NegotiationState::ClaimingNumber);
        let mut claim = builder::id_use_request(model, self.number, self.identity.ip, self.identity.mac, 1);
        let mut answered = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                claim.increment_sequence();
            }
            let sequence = claim.sequence();
            self.broadcast_step(channel, claim.bytes()).await;

            if self.auto_number {
                self.enter(NegotiationState::NegotiatingNumber);
                if self.await_id_in_use(channel, sequence, &mut answered).await {
                    let next = next_candidate(self.number);
                    info!(device = self.number, next, sequence, "device number in use");
                    self.set_number(next);
                    claim.set_device_number(next);
                }
                self.enter(NegotiationState::ClaimingNumber);
            } else {
                sleep(wait).await;
            }
        }

        self.enter(NegotiationState::SettingNumber);
        let mut set = builder::id_set_request(model, self.number, 1);
        for attempt in 0..attempts {
            if attempt > 0 {
                set.increment_sequence();
            }
            self.broadcast_step(channel, set.bytes()).await;
            sleep(wait).await;
        }

        if self.auto_number {
            if let Err(e) = store.save(self.number) {
                warn!(device = self.number, error = %e, "failed to store device number");
            }
        }

        self.enter(NegotiationState::Active);
        info!(device = self.number, ip = %self.identity.ip, "device number claimed");
        Ok(self.number)
    }

    /// Handles one discovery-port frame
    pub(crate) fn handle_discovery(
        &mut self,
        frame: &DiscoveryFrame<'_>,
        from: SocketAddr,
        now: Instant,
        out: &mut Outbox,
    ) {
        let kind = frame.kind();
        let device = frame.device_number();
        let ip = frame.ip();
        let own = (!ip.is_unspecified() && ip == self.identity.ip)
            || (frame.mac() != [0; 6] && frame.mac() == self.identity.mac);

        out.emit(Event::Discovery { kind, device, ip, from, own });

        let active = self.state == NegotiationState::Active;
        match kind {
            DiscoveryKind::IdUseRequest if active && device == self.number && ip != self.identity.ip => {
                let Some(claimant) = Self::reply_ip(ip, from) else {
                    return;
                };
                warn!(device, peer = %claimant, "claim for our device number, replying id in use");
                let reply = builder::id_use_response(self.identity.model, self.number, frame.sequence(), self.identity.ip);
                let dest = SocketAddrV4::new(claimant, self.config.ports.discovery);
                out.send(Destination::Unicast(dest), reply);
            }
            DiscoveryKind::KeepAlive if device == self.number => {
                // our own keepalive looping back
                if ip == self.identity.ip || !active {
                    return;
                }
                warn!(device, peer = %ip, "device number collision");
                out.send(
                    Destination::DiscoveryBroadcast,
                    builder::collision(self.identity.model, self.number, self.identity.ip),
                );
                out.emit(Event::Collision { device, ip });
            }
            DiscoveryKind::KeepAlive => match self.backline.upsert(device, ip, now) {
                Upsert::Joined => out.emit(Event::PeerJoined { device, ip, returned: false }),
                Upsert::Returned { .. } => out.emit(Event::PeerJoined { device, ip, returned: true }),
                Upsert::Refreshed | Upsert::Untracked => {}
            },
            DiscoveryKind::Collision if !own => {
                warn!(device, peer = %ip, "collision reported");
                out.emit(Event::Collision { device, ip });
            }
            _ => {
                trace!(%kind, device, peer = %from, "discovery frame");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashSet, VecDeque};
    use std::net::Ipv4Addr;

    use bytes::Bytes;
    use tokio_test::{assert_err, assert_ok};

    use crate::core::device::tests::{device, from};
    use crate::core::{DeviceFlags, MemoryStore, Model};

    const MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x09];
    const IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 50);
    const NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
    const HOLDER_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 60);

    /// Network with devices already holding some numbers
    struct FakeNetwork {
        holders: HashSet<u8>,
        /// Each reply is delivered this many times
        copies: usize,
        sent: Vec<Bytes>,
        replies: VecDeque<Bytes>,
        recv_calls: usize,
    }

    impl FakeNetwork {
        fn new(holders: &[u8]) -> Self {
            FakeNetwork {
                holders: holders.iter().copied().collect(),
                copies: 1,
                sent: Vec::new(),
                replies: VecDeque::new(),
                recv_calls: 0,
            }
        }

        fn sent_of(&self, kind: DiscoveryKind) -> Vec<(u8, u8)> {
            self.sent
                .iter()
                .filter_map(|p| match Frame::parse(p, Port::Discovery) {
                    Ok(Frame::Discovery(f)) if f.kind() == kind => Some((f.device_number(), f.sequence())),
                    _ => None,
                })
                .collect()
        }
    }

    impl ClaimChannel for FakeNetwork {
        async fn broadcast(&mut self, packet: &[u8]) -> Result<()> {
            self.sent.push(Bytes::copy_from_slice(packet));
            if let Ok(Frame::Discovery(frame)) = Frame::parse(packet, Port::Discovery) {
                if frame.kind() == DiscoveryKind::IdUseRequest && self.holders.contains(&frame.device_number()) {
                    let reply = builder::id_use_response(Model::Cdj, frame.device_number(), frame.sequence(), HOLDER_IP);
                    for _ in 0..self.copies {
                        self.replies.push_back(reply.clone());
                    }
                }
            }
            Ok(())
        }

        async fn recv_reply(&mut self, buf: &mut [u8], wait: Duration) -> Result<Option<usize>> {
            self.recv_calls += 1;
            match self.replies.pop_front() {
                Some(reply) => {
                    buf[..reply.len()].copy_from_slice(&reply);
                    Ok(Some(reply.len()))
                }
                None => {
                    sleep(wait).await;
                    Ok(None)
                }
            }
        }
    }

    fn auto_device() -> VirtualDevice {
        VirtualDevice::new(MAC, IP, NETMASK, Ipv4Addr::UNSPECIFIED, DeviceFlags::AUTO_NUMBER).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_claim() {
        let mut device = auto_device();
        let mut network = FakeNetwork::new(&[]);
        let store = MemoryStore::new();
        let start = Instant::now();

        let number = assert_ok!(device.claim_number(&mut network, &store).await);

        assert_eq!(number, 1);
        assert_eq!(device.state(), NegotiationState::Active);
        assert_eq!(store.line().as_deref(), Some("1"));
        assert!(start.elapsed() >= Duration::from_millis(3600));

        assert_eq!(network.sent_of(DiscoveryKind::Initial).len(), 3);
        let stage1: Vec<u8> = network.sent_of(DiscoveryKind::Stage1).iter().map(|(_, seq)| *seq).collect();
        assert_eq!(stage1, vec![1, 2, 3]);
        assert_eq!(network.sent_of(DiscoveryKind::IdUseRequest), vec![(1, 1), (1, 2), (1, 3)]);
        assert_eq!(network.sent_of(DiscoveryKind::IdSetRequest), vec![(1, 1), (1, 2), (1, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_moves_past_taken_number() {
        let mut device = auto_device();
        let mut network = FakeNetwork::new(&[1]);
        let store = MemoryStore::new();

        let number = assert_ok!(device.claim_number(&mut network, &store).await);

        assert_eq!(number, 2);
        assert_eq!(network.sent_of(DiscoveryKind::IdUseRequest), vec![(1, 1), (2, 2), (2, 3)]);
        assert_eq!(network.sent_of(DiscoveryKind::IdSetRequest)[0], (2, 1));
        assert_eq!(store.line().as_deref(), Some("2"));
        assert_eq!(device.backline().local(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replayed_reply_moves_number_once() {
        let mut device = auto_device();
        let mut network = FakeNetwork::new(&[1, 2]);
        network.copies = 2;
        let store = MemoryStore::new();

        let number = assert_ok!(device.claim_number(&mut network, &store).await);

        // one step per taken number, the duplicates are ignored
        assert_eq!(number, 3);
        assert_eq!(network.sent_of(DiscoveryKind::IdUseRequest), vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stored_number_is_first_candidate() {
        let mut device = auto_device();
        let mut network = FakeNetwork::new(&[4]);
        let store = MemoryStore::with_line("4\n");

        let number = assert_ok!(device.claim_number(&mut network, &store).await);

        // 4 is taken, so the candidate wraps
        assert_eq!(number, 1);
        assert_eq!(store.line().as_deref(), Some("1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_number_never_listens() {
        let mut device = VirtualDevice::new(MAC, IP, NETMASK, Ipv4Addr::UNSPECIFIED, 3).unwrap();
        let mut network = FakeNetwork::new(&[3]);
        let store = MemoryStore::with_line("2");
        let start = Instant::now();

        let number = assert_ok!(device.claim_number(&mut network, &store).await);

        assert_eq!(number, 3);
        assert_eq!(network.recv_calls, 0);
        assert_eq!(store.line().as_deref(), Some("2"));
        assert!(start.elapsed() >= Duration::from_millis(3600));

        assert_err!(device.claim_number(&mut network, &store).await);
    }

    #[test]
    fn test_next_candidate_wraps() {
        assert_eq!(next_candidate(1), 2);
        assert_eq!(next_candidate(3), 4);
        assert_eq!(next_candidate(4), 1);
    }

    fn discovery(buf: &[u8]) -> DiscoveryFrame<'_> {
        match Frame::parse(buf, Port::Discovery).unwrap() {
            Frame::Discovery(frame) => frame,
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_defends_number_against_claim() {
        let mut device = device(1);
        let claimant = Ipv4Addr::new(192, 168, 1, 77);
        let claim = builder::id_use_request(Model::Cdj, 1, claimant, [9; 6], 2);
        let mut out = Outbox::new();

        device.handle_discovery(&discovery(claim.bytes()), from(claimant, 50000), Instant::now(), &mut out);

        assert_eq!(out.packets.len(), 1);
        let reply = &out.packets[0];
        assert_eq!(reply.dest, Destination::Unicast(SocketAddrV4::new(claimant, 50000)));
        let frame = discovery(&reply.packet);
        assert!(frame.is_id_in_use(1, 2));
        assert_eq!(frame.ip(), device.identity().ip);
    }

    #[test]
    fn test_ignores_claims_for_other_numbers() {
        let mut device = device(1);
        let claimant = Ipv4Addr::new(192, 168, 1, 77);
        let claim = builder::id_use_request(Model::Cdj, 2, claimant, [9; 6], 1);
        let mut out = Outbox::new();
        device.handle_discovery(&discovery(claim.bytes()), from(claimant, 50000), Instant::now(), &mut out);
        assert!(out.packets.is_empty());
    }

    #[test]
    fn test_keepalive_collision() {
        let mut device = device(1);
        let other = Ipv4Addr::new(192, 168, 1, 77);
        let keepalive = builder::keepalive(Model::Cdj, 1, [9; 6], other, 2);
        let mut out = Outbox::new();

        device.handle_discovery(&discovery(&keepalive), from(other, 50000), Instant::now(), &mut out);

        assert_eq!(out.packets.len(), 1);
        assert_eq!(out.packets[0].dest, Destination::DiscoveryBroadcast);
        let frame = discovery(&out.packets[0].packet);
        assert_eq!(frame.kind(), DiscoveryKind::Collision);
        assert_eq!(frame.ip(), device.identity().ip);
        assert!(out.events.contains(&Event::Collision { device: 1, ip: other }));
        assert!(device.backline().get(1).is_none());
    }

    #[test]
    fn test_own_keepalive_is_ignored() {
        let mut device = device(1);
        let ip = device.identity().ip;
        let keepalive = builder::keepalive(Model::Vdj, 1, device.identity().mac, ip, 1);
        let mut out = Outbox::new();

        device.handle_discovery(&discovery(&keepalive), from(ip, 50000), Instant::now(), &mut out);

        assert!(out.packets.is_empty());
        assert!(matches!(out.events.as_slice(), [Event::Discovery { own: true, .. }]));
        assert_eq!(device.backline().count_active(), 0);
    }

    #[test]
    fn test_keepalive_registers_peer() {
        let mut device = device(1);
        let peer = Ipv4Addr::new(192, 168, 1, 12);
        let keepalive = builder::keepalive(Model::Cdj, 2, [9; 6], peer, 2);
        let mut out = Outbox::new();

        device.handle_discovery(&discovery(&keepalive), from(peer, 50000), Instant::now(), &mut out);
        device.handle_discovery(&discovery(&keepalive), from(peer, 50000), Instant::now(), &mut out);

        let joined: Vec<&Event> = out.events.iter().filter(|e| matches!(e, Event::PeerJoined { .. })).collect();
        assert_eq!(joined, vec![&Event::PeerJoined { device: 2, ip: peer, returned: false }]);
        assert_eq!(device.backline().get(2).map(|p| p.ip), Some(peer));
    }
}
