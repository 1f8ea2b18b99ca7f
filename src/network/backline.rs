use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::core::{MasterState, MAX_BACKLINE};

/// A device on the network, as last observed
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    /// Device number, also the slot key
    pub number: u8,
    /// Unicast address status frames are delivered to
    pub ip: Ipv4Addr,
    /// Tempo as played, pitch applied
    pub bpm: f32,
    pub pitch: u32,
    /// Status flag byte
    pub flags: u8,
    pub last_beat: Option<Instant>,
    pub last_keepalive: Instant,
    /// Present on the network; cleared together with `gone`
    pub active: bool,
    pub gone: bool,
    /// Activity byte of the last status frame: a track is loaded and running
    pub status_active: bool,
    /// Set once a status frame has been seen
    pub known: bool,
    pub master_state: MasterState,
    pub on_air: bool,
    pub sync_counter: u32,
}

impl Peer {
    fn new(number: u8, ip: Ipv4Addr, now: Instant) -> Self {
        Peer {
            number,
            ip,
            bpm: 0.0,
            pitch: 0,
            flags: 0,
            last_beat: None,
            last_keepalive: now,
            active: true,
            gone: false,
            status_active: false,
            known: false,
            master_state: MasterState::Off,
            on_air: false,
            sync_counter: 0,
        }
    }

    /// Address for unicast delivery on `port`
    pub fn addr(&self, port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, port)
    }

    pub fn is_master(&self) -> bool {
        matches!(self.master_state, MasterState::On | MasterState::NoBeatGrid)
    }
}

/// Outcome of recording a keepalive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First time we see this device number
    Joined,
    /// A gone peer is back; `moved` when it came back on a new address
    Returned { moved: bool },
    Refreshed,
    /// Our own number or outside the tracked range
    Untracked,
}

/// Fixed table of the other devices on the network, keyed by device number
///
/// Entries are never removed. A peer that stops sending keepalives is marked gone
/// and keeps its slot until the same number shows up again.
#[derive(Debug, Clone)]
pub struct Backline {
    local: u8,
    slots: Vec<Option<Peer>>,
    master_id: Option<u8>,
    sync_counter: u32,
}

impl Backline {
    /// Creates an empty backline for a device using number `local`
    pub fn new(local: u8) -> Self {
        Backline {
            local,
            slots: vec![None; MAX_BACKLINE],
            master_id: None,
            sync_counter: 0,
        }
    }

    pub fn local(&self) -> u8 {
        self.local
    }

    pub(crate) fn set_local(&mut self, number: u8) {
        self.local = number;
    }

    fn index(&self, number: u8) -> Option<usize> {
        if number == self.local || number == 0 || number as usize > MAX_BACKLINE {
            None
        } else {
            Some(number as usize - 1)
        }
    }

    /// Records a keepalive from `number` at `ip`
    pub fn upsert(&mut self, number: u8, ip: Ipv4Addr, now: Instant) -> Upsert {
        let Some(index) = self.index(number) else {
            return Upsert::Untracked;
        };

        let Some(peer) = self.slots[index].as_mut() else {
            self.slots[index] = Some(Peer::new(number, ip, now));
            info!(device = number, peer = %ip, "device joined");
            return Upsert::Joined;
        };

        let outcome = if peer.gone {
            let moved = peer.ip != ip;
            if moved {
                peer.ip = ip;
            }
            info!(device = number, peer = %ip, moved, "device returned");
            Upsert::Returned { moved }
        } else {
            Upsert::Refreshed
        };
        peer.gone = false;
        peer.active = true;
        peer.last_keepalive = now;
        outcome
    }

    /// The entry for `number`; never our own
    pub fn get(&self, number: u8) -> Option<&Peer> {
        self.index(number).and_then(|i| self.slots[i].as_ref())
    }

    pub fn get_mut(&mut self, number: u8) -> Option<&mut Peer> {
        self.index(number).and_then(move |i| self.slots[i].as_mut())
    }

    /// Every tracked peer, gone or not
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        let local = self.local;
        self.slots.iter().flatten().filter(move |p| p.number != local)
    }

    pub(crate) fn peers_mut(&mut self) -> impl Iterator<Item = &mut Peer> {
        let local = self.local;
        self.slots.iter_mut().flatten().filter(move |p| p.number != local)
    }

    /// Peers currently believed present
    pub fn live_peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers().filter(|p| !p.gone)
    }

    /// Number of present peers, excluding ourselves
    pub fn count_active(&self) -> usize {
        self.peers().filter(|p| p.active && !p.gone).count()
    }

    /// Marks peers silent for longer than `threshold` as gone, returning their numbers
    pub fn expire(&mut self, now: Instant, threshold: Duration) -> Vec<u8> {
        let mut expired = Vec::new();
        for peer in self.peers_mut() {
            if !peer.gone && now.saturating_duration_since(peer.last_keepalive) > threshold {
                peer.gone = true;
                peer.active = false;
                expired.push(peer.number);
            }
        }
        if !expired.is_empty() {
            debug!(devices = ?expired, "devices expired");
        }
        if let Some(master) = self.master_id {
            if expired.contains(&master) {
                self.master_id = None;
            }
        }
        expired
    }

    /// Device currently known to be tempo master
    pub fn master_id(&self) -> Option<u8> {
        self.master_id
    }

    pub(crate) fn set_master_id(&mut self, master: Option<u8>) {
        self.master_id = master;
    }

    /// Highest sync/handoff counter seen on the network
    pub fn sync_counter(&self) -> u32 {
        self.sync_counter
    }

    pub(crate) fn observe_sync_counter(&mut self, counter: u32) {
        self.sync_counter = self.sync_counter.max(counter);
    }

    pub(crate) fn bump_sync_counter(&mut self) -> u32 {
        self.sync_counter = self.sync_counter.wrapping_add(1);
        self.sync_counter
    }
}
