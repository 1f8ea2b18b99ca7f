//! Outbound frame construction
//!
//! Each builder allocates a zeroed buffer of the exact wire length for its frame type,
//! writes the header and model name, then fills in the fixed fields. Bytes we do not
//! understand keep the values real players were observed sending.

use std::net::Ipv4Addr;

use bytes::{Bytes, BytesMut};

use crate::core::{Model, Port, MAGIC};
use crate::util::{beat_millis, bpm_to_int, calculated_bpm, PITCH_NORMAL};

use super::codec::{put_u16_at, put_u32_at, MODEL_NAME_LEN, TYPE_OFFSET};
use super::flags;
use super::message::{DiscoveryKind, FrameKind};

fn frame(len: usize, type_byte: u8, model: Model, port: Port) -> BytesMut {
    let mut buf = BytesMut::zeroed(len);
    buf[..MAGIC.len()].copy_from_slice(MAGIC);
    buf[TYPE_OFFSET] = type_byte;
    let name_at = port.header_len();
    buf[name_at..name_at + MODEL_NAME_LEN].copy_from_slice(&model.name_field());
    buf
}

fn discovery_frame(len: usize, kind: DiscoveryKind, model: Model) -> BytesMut {
    let mut buf = frame(len, kind.as_byte(), model, Port::Discovery);
    buf[0x20] = 0x01;
    buf[0x21] = 0x02;
    put_u16_at(&mut buf, 0x22, len as u16);
    buf
}

/// A negotiation frame that is resent with a new sequence number
#[derive(Debug, Clone)]
pub struct HandshakePacket {
    buf: BytesMut,
    sequence_at: usize,
    device_at: Option<usize>,
}

impl HandshakePacket {
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn sequence(&self) -> u8 {
        self.buf[self.sequence_at]
    }

    /// Bumps the correlation sequence in place and returns the new value
    pub fn increment_sequence(&mut self) -> u8 {
        let next = self.sequence().wrapping_add(1);
        self.buf[self.sequence_at] = next;
        next
    }

    /// Device number carried by an identity claim
    pub fn device_number(&self) -> Option<u8> {
        self.device_at.map(|at| self.buf[at])
    }

    /// Rewrites the claimed device number; frames without one are unchanged
    pub fn set_device_number(&mut self, number: u8) {
        if let Some(at) = self.device_at {
            self.buf[at] = number;
        }
    }
}

/// Initial presence frame, sent before anything is known about us
pub fn initial_discovery(model: Model) -> Bytes {
    let mut buf = discovery_frame(0x25, DiscoveryKind::Initial, model);
    buf[0x24] = model.device_type() as u8;
    buf.freeze()
}

/// Stage-1 presence frame announcing our MAC
pub fn stage1_discovery(model: Model, mac: [u8; 6], sequence: u8) -> HandshakePacket {
    let mut buf = discovery_frame(0x2c, DiscoveryKind::Stage1, model);
    buf[0x24] = sequence;
    buf[0x25] = model.device_type() as u8;
    buf[0x26..0x2c].copy_from_slice(&mac);
    HandshakePacket { buf, sequence_at: 0x24, device_at: None }
}

/// Identity claim for `number`
pub fn id_use_request(model: Model, number: u8, ip: Ipv4Addr, mac: [u8; 6], sequence: u8) -> HandshakePacket {
    let mut buf = discovery_frame(0x32, DiscoveryKind::IdUseRequest, model);
    buf[0x24..0x28].copy_from_slice(&ip.octets());
    buf[0x28..0x2e].copy_from_slice(&mac);
    buf[0x2e] = number;
    buf[0x2f] = sequence;
    buf[0x30] = 0x01;
    buf[0x31] = 0x01;
    HandshakePacket { buf, sequence_at: 0x2f, device_at: Some(0x2e) }
}

/// Reply telling a claimant that `number` is ours, echoing its claim sequence
pub fn id_use_response(model: Model, number: u8, sequence: u8, ip: Ipv4Addr) -> Bytes {
    let mut buf = discovery_frame(0x2a, DiscoveryKind::IdUseResponse, model);
    buf[0x24] = number;
    buf[0x25] = sequence;
    buf[0x26..0x2a].copy_from_slice(&ip.octets());
    buf.freeze()
}

/// Final frame of a claim, asserting `number` is now set
pub fn id_set_request(model: Model, number: u8, sequence: u8) -> HandshakePacket {
    let mut buf = discovery_frame(0x26, DiscoveryKind::IdSetRequest, model);
    buf[0x24] = number;
    buf[0x25] = sequence;
    HandshakePacket { buf, sequence_at: 0x25, device_at: Some(0x24) }
}

/// Periodic presence frame
pub fn keepalive(model: Model, number: u8, mac: [u8; 6], ip: Ipv4Addr, member_count: u8) -> Bytes {
    let mut buf = discovery_frame(0x36, DiscoveryKind::KeepAlive, model);
    buf[0x24] = number;
    buf[0x25] = 0x02;
    buf[0x26..0x2c].copy_from_slice(&mac);
    buf[0x2c..0x30].copy_from_slice(&ip.octets());
    buf[0x30] = member_count;
    buf[0x34] = model.device_type() as u8;
    buf.freeze()
}

/// Broadcast when another host keeps alive with our number
pub fn collision(model: Model, number: u8, ip: Ipv4Addr) -> Bytes {
    let mut buf = discovery_frame(0x29, DiscoveryKind::Collision, model);
    buf[0x24] = number;
    buf[0x25..0x29].copy_from_slice(&ip.octets());
    buf.freeze()
}

fn beat_port_frame(len: usize, kind: FrameKind, model: Model, number: u8) -> BytesMut {
    let mut buf = frame(len, kind.as_byte(), model, Port::Beat);
    buf[0x1f] = 0x01;
    buf[0x21] = number;
    buf
}

/// Beat frame for a constant tempo, `bar_index` being the 0-based beat in the bar
///
/// `bpm` is the track tempo; `pitch` scales it to the tempo actually played, and the
/// beat offsets are spaced at that played tempo.
pub fn beat(model: Model, number: u8, bpm: f32, pitch: u32, bar_index: u8) -> Bytes {
    let len = 0x60;
    let bar_index = bar_index.min(3) as u32;
    let beat = beat_millis(calculated_bpm(bpm, pitch));

    let mut buf = beat_port_frame(len, FrameKind::Beat, model, number);
    put_u16_at(&mut buf, 0x22, len as u16);

    // very slow tempos saturate rather than wrap
    let offsets = [
        beat,                                  // next beat
        beat.saturating_mul(2),                // second beat
        beat.saturating_mul(4 - bar_index),    // next bar
        beat.saturating_mul(4),                // fourth beat
        beat.saturating_mul(8 - bar_index),    // second bar
        beat.saturating_mul(8),                // eighth beat
    ];
    for (i, millis) in offsets.iter().enumerate() {
        put_u32_at(&mut buf, 0x24 + 4 * i, *millis);
    }

    buf[0x3c..0x54].fill(0xff);
    put_u32_at(&mut buf, 0x54, pitch);
    put_u32_at(&mut buf, 0x58, bpm_to_int(bpm) as u32);
    buf[0x5c] = bar_index as u8 + 1;
    buf[0x5f] = number;
    buf.freeze()
}

/// Values that vary between status frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusFields {
    pub device_number: u8,
    pub bpm: f32,
    /// Fixed-point pitch, 0x100000 for none
    pub pitch: u32,
    /// 0-based beat in the bar
    pub bar_index: u8,
    pub active: bool,
    pub master: bool,
    /// Device we are handing mastership to
    pub new_master: Option<u8>,
    pub synced: bool,
    pub sync_counter: u32,
    pub counter: u32,
}

/// Player status frame
pub fn status(model: Model, fields: &StatusFields) -> Bytes {
    let len = 0xd4;
    let number = fields.device_number;

    let mut buf = frame(len, FrameKind::Status.as_byte(), model, Port::Status);
    buf[0x1f] = 0x01;
    buf[0x20] = 0x03;
    buf[0x21] = number;
    put_u16_at(&mut buf, 0x22, len as u16);
    buf[0x24] = number;

    // loaded track: ours, from usb, with a beat grid
    buf[0x27] = fields.active as u8;
    buf[0x28] = number;
    buf[0x29] = 0x03;
    buf[0x2a] = 0x01;
    put_u32_at(&mut buf, 0x2c, 1);
    put_u32_at(&mut buf, 0x30, 1);

    buf[0x37] = 0x05;
    buf[0x3a] = 0xa0;
    buf[0x47] = 0x08;
    buf[0x68] = 0x01;
    buf[0x73] = 0x04;
    // link available; XDJs refuse to sync without it
    buf[0x75] = 0x01;
    buf[0x78] = 0x01;
    buf[0x7b] = if fields.active { 0x04 } else { 0x05 };
    buf[0x7c..0x80].copy_from_slice(b"1.05");

    put_u32_at(&mut buf, 0x84, fields.sync_counter);

    let mut flag_byte = flags::BASE;
    if fields.active {
        flag_byte |= flags::PLAY;
    }
    if fields.master {
        flag_byte |= flags::MASTER;
    }
    if fields.synced {
        flag_byte |= flags::SYNC;
    }
    buf[0x89] = flag_byte;
    buf[0x8a] = 0xff;

    put_u32_at(&mut buf, 0x8c, fields.pitch);
    put_u16_at(&mut buf, 0x90, 0x8000);
    put_u16_at(&mut buf, 0x92, bpm_to_int(fields.bpm));
    put_u32_at(&mut buf, 0x94, 0x7fff_ffff);
    put_u32_at(&mut buf, 0x98, fields.pitch);

    buf[0x9e] = fields.master as u8;
    buf[0x9f] = fields.new_master.unwrap_or(0xff);
    buf[0xa6] = fields.bar_index.min(3) + 1;

    put_u32_at(&mut buf, 0xc0, PITCH_NORMAL);
    put_u32_at(&mut buf, 0xc4, PITCH_NORMAL);
    put_u32_at(&mut buf, 0xc8, fields.counter);
    buf[0xcc] = 0x0f;
    buf.freeze()
}

/// Asks the current master to hand over
pub fn master_request(model: Model, number: u8) -> Bytes {
    let mut buf = beat_port_frame(0x28, FrameKind::MasterRequest, model, number);
    buf[0x23] = 0x04;
    buf[0x27] = number;
    buf.freeze()
}

/// Grants a master request
pub fn master_response(model: Model, number: u8) -> Bytes {
    let mut buf = beat_port_frame(0x2c, FrameKind::MasterResponse, model, number);
    buf[0x23] = 0x08;
    buf[0x27] = number;
    buf[0x2b] = 0x01;
    buf.freeze()
}

/// Turns sync on or off on the receiving player
pub fn sync_control(model: Model, number: u8, on: bool) -> Bytes {
    let mut buf = beat_port_frame(0x2c, FrameKind::SyncControl, model, number);
    buf[0x23] = 0x08;
    buf[0x27] = number;
    buf[0x2b] = if on { 0x10 } else { 0x20 };
    buf.freeze()
}
