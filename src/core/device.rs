//! Local device state
//!
//! [`VirtualDevice`] is the single owner of everything the virtual player knows: its
//! identity, tempo and play state, master flags and the backline of peers. Handlers never
//! touch sockets. They take the current time and push outgoing frames and events into an
//! [`Outbox`], which the scheduler flushes after each wake-up.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::network::backline::{Backline, Peer};
use crate::protocol::builder::{self, StatusFields};
use crate::protocol::message::{Frame, FrameKind, MixerStatusFrame, StatusFrame};
use crate::protocol::{DiscoveryKind, NegotiationState};
use crate::util::{broadcast_address, clamp_bpm, PITCH_NORMAL};

use super::{Config, DeviceFlags, Error, Identity, MasterState, Port, Result};

/// Where an outgoing frame is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Broadcast on the discovery port
    DiscoveryBroadcast,
    /// Broadcast on the beat port
    BeatBroadcast,
    /// Unicast from the send socket
    Unicast(SocketAddrV4),
}

/// A frame waiting to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub dest: Destination,
    pub packet: Bytes,
}

/// Something that happened, reported after the device processed it
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Any discovery-port frame; `own` marks our own frames looping back
    Discovery {
        kind: DiscoveryKind,
        device: u8,
        ip: Ipv4Addr,
        from: SocketAddr,
        own: bool,
    },
    PeerJoined { device: u8, ip: Ipv4Addr, returned: bool },
    PeerGone { device: u8 },
    /// Another host is using `device`
    Collision { device: u8, ip: Ipv4Addr },
    Beat { device: u8, bpm: f32, pitch: u32, bar_pos: u8, next_beat_ms: u32 },
    Status {
        device: u8,
        bpm: f32,
        pitch: u32,
        flags: u8,
        master_state: MasterState,
        new_master: Option<u8>,
        sync_counter: u32,
        counter: u32,
    },
    MixerStatus { device: u8, bpm: f32 },
    /// A peer asked us, the master, for mastership
    MasterRequested { by: u8 },
    MasterResponse { from: u8, ok: bool },
    MasterAcquired { sync_counter: u32 },
    MasterReleased { to: u8 },
    SyncControl { from: u8, on: bool },
    /// Any other beat or status port frame
    Other { port: Port, kind: FrameKind, device: u8 },
    Stopped,
}

/// Frames and events produced while handling one input
#[derive(Debug, Default)]
pub struct Outbox {
    pub packets: Vec<Outbound>,
    pub events: Vec<Event>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, dest: Destination, packet: Bytes) {
        self.packets.push(Outbound { dest, packet });
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty() && self.events.is_empty()
    }
}

/// Copy of the observable device state
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    pub device_number: u8,
    pub state: NegotiationState,
    pub bpm: f32,
    pub pitch: u32,
    pub bar_index: u8,
    pub playing: bool,
    pub synced: bool,
    pub master: bool,
    pub master_requested: bool,
    pub master_req: Option<u8>,
    pub status_counter: u32,
    pub sync_counter: u32,
    pub master_id: Option<u8>,
    pub peers: Vec<Peer>,
}

/// A virtual ProLink player
#[derive(Debug)]
pub struct VirtualDevice {
    pub(crate) identity: Identity,
    pub(crate) config: Config,
    pub(crate) number: u8,
    pub(crate) auto_number: bool,
    pub(crate) state: NegotiationState,
    pub(crate) bpm: f32,
    pub(crate) pitch: u32,
    /// 0-based beat in the bar
    pub(crate) bar_index: u8,
    pub(crate) playing: bool,
    pub(crate) synced: bool,
    pub(crate) master: bool,
    /// Device we are handing mastership to
    pub(crate) master_req: Option<u8>,
    /// We asked the current master to hand over
    pub(crate) master_requested: bool,
    pub(crate) status_counter: u32,
    pub(crate) ticks: u32,
    pub(crate) last_beat: Option<Instant>,
    pub(crate) backline: Backline,
}

impl VirtualDevice {
    /// Creates a device with the default configuration
    ///
    /// An unspecified broadcast address is derived from `ip` and `netmask`.
    pub fn new(mac: [u8; 6], ip: Ipv4Addr, netmask: Ipv4Addr, broadcast: Ipv4Addr, flags: u32) -> Result<Self> {
        Self::with_config(mac, ip, netmask, broadcast, flags, Config::default())
    }

    pub fn with_config(
        mac: [u8; 6],
        ip: Ipv4Addr,
        netmask: Ipv4Addr,
        broadcast: Ipv4Addr,
        flags: u32,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        if ip.is_unspecified() {
            return Err(Error::config("device needs a unicast address"));
        }

        let flags = DeviceFlags(flags);
        let broadcast = if broadcast.is_unspecified() {
            broadcast_address(ip, netmask)
        } else {
            broadcast
        };
        let number = flags.device_number();

        debug!(device = number, %ip, %broadcast, auto = flags.auto_number(), "created virtual device");

        Ok(VirtualDevice {
            identity: Identity { mac, ip, netmask, broadcast, model: flags.model() },
            config,
            number,
            auto_number: flags.auto_number(),
            state: NegotiationState::Unclaimed,
            bpm: 120.0,
            pitch: PITCH_NORMAL,
            bar_index: 0,
            playing: false,
            synced: false,
            master: false,
            master_req: None,
            master_requested: false,
            status_counter: 1,
            ticks: 0,
            last_beat: None,
            backline: Backline::new(number),
        })
    }

    pub fn device_number(&self) -> u8 {
        self.number
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn backline(&self) -> &Backline {
        &self.backline
    }

    pub fn is_master(&self) -> bool {
        self.master
    }

    pub fn master_req(&self) -> Option<u8> {
        self.master_req
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    /// Sets the tempo, clamped to 0..=655.35 BPM
    pub fn set_bpm(&mut self, bpm: f32) {
        self.bpm = clamp_bpm(bpm);
    }

    /// Fixed-point pitch, 0x100000 meaning none
    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    /// Sets the pitch sent in status and beat frames
    pub fn set_pitch(&mut self, pitch: u32) {
        self.pitch = pitch;
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    pub fn set_synced(&mut self, synced: bool) {
        self.synced = synced;
    }

    pub(crate) fn set_number(&mut self, number: u8) {
        self.number = number;
        self.backline.set_local(number);
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            device_number: self.number,
            state: self.state,
            bpm: self.bpm,
            pitch: self.pitch,
            bar_index: self.bar_index,
            playing: self.playing,
            synced: self.synced,
            master: self.master,
            master_requested: self.master_requested,
            master_req: self.master_req,
            status_counter: self.status_counter,
            sync_counter: self.backline.sync_counter(),
            master_id: self.backline.master_id(),
            peers: self.backline.peers().cloned().collect(),
        }
    }

    /// Parses one datagram and routes it to the handler for its frame type
    pub fn handle_datagram(
        &mut self,
        port: Port,
        data: &[u8],
        from: SocketAddr,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<()> {
        match Frame::parse(data, port)? {
            Frame::Discovery(frame) => self.handle_discovery(&frame, from, now, out),
            Frame::Beat(frame) => self.handle_beat(&frame, now, out),
            Frame::Status(frame) => self.handle_status(&frame, now, out),
            Frame::MixerStatus(frame) => self.handle_mixer_status(&frame, out),
            Frame::Generic(frame) => match frame.kind() {
                FrameKind::MasterRequest => self.handle_master_request(&frame, from, out),
                FrameKind::MasterResponse => self.handle_master_response(&frame, out),
                FrameKind::SyncControl => self.handle_sync_control(&frame, out),
                kind => {
                    trace!(%port, %kind, device = frame.device_number(), "unhandled frame");
                    out.emit(Event::Other { port, kind, device: frame.device_number() });
                }
            },
        }
        Ok(())
    }

    fn handle_status(&mut self, frame: &StatusFrame<'_>, now: Instant, out: &mut Outbox) {
        let number = frame.device_number();
        let master_state = frame.master_state();
        self.backline.observe_sync_counter(frame.sync_counter());

        if let Some(peer) = self.backline.get_mut(number) {
            peer.bpm = frame.calculated_bpm();
            peer.pitch = frame.pitch();
            peer.flags = frame.flags();
            peer.on_air = frame.is_on_air();
            peer.status_active = frame.is_active();
            peer.master_state = master_state;
            peer.sync_counter = frame.sync_counter();
            peer.known = true;
            if !peer.gone {
                peer.active = true;
                peer.last_keepalive = now;
            }
        }

        self.observe_master(number, master_state, frame.new_master(), out);

        out.emit(Event::Status {
            device: number,
            bpm: frame.calculated_bpm(),
            pitch: frame.pitch(),
            flags: frame.flags(),
            master_state,
            new_master: frame.new_master(),
            sync_counter: frame.sync_counter(),
            counter: frame.counter(),
        });
    }

    fn handle_mixer_status(&mut self, frame: &MixerStatusFrame<'_>, out: &mut Outbox) {
        let number = frame.device_number();
        let bpm = frame.calculated_bpm();
        if let Some(peer) = self.backline.get_mut(number) {
            peer.bpm = bpm;
            peer.pitch = frame.pitch();
        }
        out.emit(Event::MixerStatus { device: number, bpm });
    }

    /// Status frame for the next round; bumps the send counter
    pub(crate) fn next_status_frame(&mut self) -> Bytes {
        let fields = StatusFields {
            device_number: self.number,
            bpm: self.bpm,
            pitch: self.pitch,
            bar_index: self.bar_index,
            active: self.playing,
            master: self.master,
            new_master: self.master_req,
            synced: self.synced,
            sync_counter: self.backline.sync_counter(),
            counter: self.status_counter,
        };
        self.status_counter = self.status_counter.wrapping_add(1);
        builder::status(self.identity.model, &fields)
    }

    /// Sends one status frame to every present peer
    pub fn send_status(&mut self, out: &mut Outbox) {
        let port = self.config.ports.status;
        let targets: Vec<SocketAddrV4> = self.backline.live_peers().map(|p| p.addr(port)).collect();
        if targets.is_empty() {
            return;
        }
        let packet = self.next_status_frame();
        for addr in targets {
            out.send(Destination::Unicast(addr), packet.clone());
        }
    }

    /// Expires silent peers and broadcasts a keepalive
    pub fn send_keepalive(&mut self, now: Instant, out: &mut Outbox) {
        for device in self.backline.expire(now, self.config.peer_timeout) {
            out.emit(Event::PeerGone { device });
        }

        let members = (self.backline.count_active() + 1).min(u8::MAX as usize) as u8;
        let packet = builder::keepalive(self.identity.model, self.number, self.identity.mac, self.identity.ip, members);
        out.send(Destination::DiscoveryBroadcast, packet);
    }

    /// One status-interval tick of the single-loop scheduler
    pub fn on_status_tick(&mut self, now: Instant, out: &mut Outbox) {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % self.config.keepalive_ticks == 0 {
            self.send_keepalive(now, out);
        }
        self.send_status(out);
        self.expire_play_state(now);
    }

    /// IPv4 source of a datagram, for replies when the frame carries no address
    pub(crate) fn reply_ip(carried: Ipv4Addr, from: SocketAddr) -> Option<Ipv4Addr> {
        if !carried.is_unspecified() {
            return Some(carried);
        }
        match from.ip() {
            IpAddr::V4(ip) => Some(ip),
            IpAddr::V6(_) => None,
        }
    }
}
