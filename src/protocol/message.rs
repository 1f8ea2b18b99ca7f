//! Typed views over received frames
//!
//! A [`Frame`] borrows the receive buffer it was parsed from and never outlives it.
//! Every accessor checks the buffer length against its own offset and returns a zero
//! (or documented sentinel) value for fields the sender did not include, so frames
//! from older devices with shorter payloads degrade instead of failing.

use std::borrow::Cow;
use std::fmt;
use std::net::Ipv4Addr;

use crate::core::{MasterState, Port, Result};
use crate::util::{bpm_from_wire, calculated_bpm};

use super::codec::{array_at, byte_at, field, u16_at, u32_at, validate_header, MODEL_NAME_LEN, SUB_TYPE_OFFSET, TYPE_OFFSET};
use super::flags;

/// Frame types seen on the discovery port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryKind {
    /// Stage-1 presence, carries the MAC
    Stage1,
    /// Claim of a device number
    IdUseRequest,
    /// Another device already uses the claimed number
    IdUseResponse,
    /// Claimed number is now set
    IdSetRequest,
    IdSetResponse,
    KeepAlive,
    /// Two devices are using the same number
    Collision,
    /// Initial presence, before any number is claimed
    Initial,
    Other(u8),
}

impl DiscoveryKind {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => DiscoveryKind::Stage1,
            0x02 => DiscoveryKind::IdUseRequest,
            0x03 => DiscoveryKind::IdUseResponse,
            0x04 => DiscoveryKind::IdSetRequest,
            0x05 => DiscoveryKind::IdSetResponse,
            0x06 => DiscoveryKind::KeepAlive,
            0x08 => DiscoveryKind::Collision,
            0x0a => DiscoveryKind::Initial,
            other => DiscoveryKind::Other(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            DiscoveryKind::Stage1 => 0x00,
            DiscoveryKind::IdUseRequest => 0x02,
            DiscoveryKind::IdUseResponse => 0x03,
            DiscoveryKind::IdSetRequest => 0x04,
            DiscoveryKind::IdSetResponse => 0x05,
            DiscoveryKind::KeepAlive => 0x06,
            DiscoveryKind::Collision => 0x08,
            DiscoveryKind::Initial => 0x0a,
            DiscoveryKind::Other(byte) => *byte,
        }
    }
}

impl fmt::Display for DiscoveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryKind::Stage1 => write!(f, "stage1-discovery"),
            DiscoveryKind::IdUseRequest => write!(f, "id-use-request"),
            DiscoveryKind::IdUseResponse => write!(f, "id-use-response"),
            DiscoveryKind::IdSetRequest => write!(f, "id-set-request"),
            DiscoveryKind::IdSetResponse => write!(f, "id-set-response"),
            DiscoveryKind::KeepAlive => write!(f, "keepalive"),
            DiscoveryKind::Collision => write!(f, "collision"),
            DiscoveryKind::Initial => write!(f, "discovery"),
            DiscoveryKind::Other(byte) => write!(f, "discovery-0x{:02x}", byte),
        }
    }
}

/// Frame types seen on the beat and status ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    FaderStart,
    ChannelsOnAir,
    Goodbye,
    MediaQuery,
    MediaResponse,
    Status,
    LoadTrack,
    LoadTrackAck,
    MasterRequest,
    MasterResponse,
    Beat,
    MixerStatus,
    SyncControl,
    Other(u8),
}

impl FrameKind {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x02 => FrameKind::FaderStart,
            0x03 => FrameKind::ChannelsOnAir,
            0x04 => FrameKind::Goodbye,
            0x05 => FrameKind::MediaQuery,
            0x06 => FrameKind::MediaResponse,
            0x0a => FrameKind::Status,
            0x19 => FrameKind::LoadTrack,
            0x1a => FrameKind::LoadTrackAck,
            0x26 => FrameKind::MasterRequest,
            0x27 => FrameKind::MasterResponse,
            0x28 => FrameKind::Beat,
            0x29 => FrameKind::MixerStatus,
            0x2a => FrameKind::SyncControl,
            other => FrameKind::Other(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            FrameKind::FaderStart => 0x02,
            FrameKind::ChannelsOnAir => 0x03,
            FrameKind::Goodbye => 0x04,
            FrameKind::MediaQuery => 0x05,
            FrameKind::MediaResponse => 0x06,
            FrameKind::Status => 0x0a,
            FrameKind::LoadTrack => 0x19,
            FrameKind::LoadTrackAck => 0x1a,
            FrameKind::MasterRequest => 0x26,
            FrameKind::MasterResponse => 0x27,
            FrameKind::Beat => 0x28,
            FrameKind::MixerStatus => 0x29,
            FrameKind::SyncControl => 0x2a,
            FrameKind::Other(byte) => *byte,
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameKind::FaderStart => "fader-start",
            FrameKind::ChannelsOnAir => "channels-on-air",
            FrameKind::Goodbye => "goodbye",
            FrameKind::MediaQuery => "media-query",
            FrameKind::MediaResponse => "media-response",
            FrameKind::Status => "status",
            FrameKind::LoadTrack => "load-track",
            FrameKind::LoadTrackAck => "load-track-ack",
            FrameKind::MasterRequest => "master-request",
            FrameKind::MasterResponse => "master-response",
            FrameKind::Beat => "beat",
            FrameKind::MixerStatus => "mixer-status",
            FrameKind::SyncControl => "sync-control",
            FrameKind::Other(byte) => return write!(f, "type-0x{:02x}", byte),
        };
        f.write_str(name)
    }
}

fn model_name(buf: &[u8], header_len: usize) -> Cow<'_, str> {
    match field(buf, header_len, MODEL_NAME_LEN) {
        Some(name) => {
            let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
            String::from_utf8_lossy(&name[..end])
        }
        None => Cow::Borrowed(""),
    }
}

/// A parsed frame, discriminated by port and type byte
#[derive(Debug, Clone, Copy)]
pub enum Frame<'a> {
    Discovery(DiscoveryFrame<'a>),
    Beat(BeatFrame<'a>),
    Status(StatusFrame<'a>),
    MixerStatus(MixerStatusFrame<'a>),
    Generic(GenericFrame<'a>),
}

impl<'a> Frame<'a> {
    /// Validates the header and picks the view for `port` and the frame type
    pub fn parse(buf: &'a [u8], port: Port) -> Result<Frame<'a>> {
        let type_byte = validate_header(buf)?;
        let frame = match (port, FrameKind::from_byte(type_byte)) {
            (Port::Discovery, _) => Frame::Discovery(DiscoveryFrame { buf }),
            (Port::Beat, FrameKind::Beat) => Frame::Beat(BeatFrame { buf }),
            (Port::Status, FrameKind::Status) => Frame::Status(StatusFrame { buf }),
            (Port::Status, FrameKind::MixerStatus) => Frame::MixerStatus(MixerStatusFrame { buf }),
            _ => Frame::Generic(GenericFrame { buf, port }),
        };
        Ok(frame)
    }

    pub fn bytes(&self) -> &'a [u8] {
        match self {
            Frame::Discovery(f) => f.buf,
            Frame::Beat(f) => f.buf,
            Frame::Status(f) => f.buf,
            Frame::MixerStatus(f) => f.buf,
            Frame::Generic(f) => f.buf,
        }
    }

    pub fn port(&self) -> Port {
        match self {
            Frame::Discovery(_) => Port::Discovery,
            Frame::Beat(_) => Port::Beat,
            Frame::Status(_) | Frame::MixerStatus(_) => Port::Status,
            Frame::Generic(f) => f.port,
        }
    }

    pub fn device_number(&self) -> u8 {
        match self {
            Frame::Discovery(f) => f.device_number(),
            Frame::Beat(f) => f.device_number(),
            Frame::Status(f) => f.device_number(),
            Frame::MixerStatus(f) => f.device_number(),
            Frame::Generic(f) => f.device_number(),
        }
    }

    pub fn model_name(&self) -> Cow<'a, str> {
        model_name(self.bytes(), self.port().header_len())
    }

    /// Human readable frame type
    pub fn type_name(&self) -> String {
        match self {
            Frame::Discovery(f) => f.kind().to_string(),
            Frame::Beat(_) => FrameKind::Beat.to_string(),
            Frame::Status(_) => FrameKind::Status.to_string(),
            Frame::MixerStatus(_) => FrameKind::MixerStatus.to_string(),
            Frame::Generic(f) => f.kind().to_string(),
        }
    }
}

mod discovery_offsets {
    pub const DEVICE: usize = 0x24;
    pub const ID_USE_DEVICE: usize = 0x2e;
    pub const FALLBACK_DEVICE: usize = 0x21;
    pub const ID_USE_IP: usize = 0x24;
    pub const ID_USE_MAC: usize = 0x28;
    pub const ID_USE_SEQUENCE: usize = 0x2f;
    pub const RESPONSE_SEQUENCE: usize = 0x25;
    pub const RESPONSE_IP: usize = 0x26;
    pub const SET_SEQUENCE: usize = 0x25;
    pub const STAGE1_SEQUENCE: usize = 0x24;
    pub const STAGE1_DEVICE_TYPE: usize = 0x25;
    pub const INITIAL_DEVICE_TYPE: usize = 0x24;
    pub const MAC: usize = 0x26;
    pub const KEEPALIVE_IP: usize = 0x2c;
    pub const MEMBER_COUNT: usize = 0x30;
    pub const KEEPALIVE_DEVICE_TYPE: usize = 0x34;
    pub const COLLISION_IP: usize = 0x25;
}

/// Presence and identity frame from the discovery port
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryFrame<'a> {
    buf: &'a [u8],
}

impl<'a> DiscoveryFrame<'a> {
    pub fn kind(&self) -> DiscoveryKind {
        DiscoveryKind::from_byte(byte_at(self.buf, TYPE_OFFSET))
    }

    /// Sub-type byte, 0xff when absent
    pub fn sub_type(&self) -> u8 {
        self.buf.get(SUB_TYPE_OFFSET).copied().unwrap_or(0xff)
    }

    pub fn model_name(&self) -> Cow<'a, str> {
        model_name(self.buf, Port::Discovery.header_len())
    }

    /// Device number asserted by the frame, 0 before one has been claimed
    pub fn device_number(&self) -> u8 {
        use discovery_offsets::*;
        match self.kind() {
            DiscoveryKind::Initial | DiscoveryKind::Stage1 => 0,
            DiscoveryKind::IdUseRequest => byte_at(self.buf, ID_USE_DEVICE),
            DiscoveryKind::IdUseResponse
            | DiscoveryKind::IdSetRequest
            | DiscoveryKind::KeepAlive
            | DiscoveryKind::Collision => byte_at(self.buf, DEVICE),
            _ => byte_at(self.buf, FALLBACK_DEVICE),
        }
    }

    /// Address carried in the frame, unspecified when the type has none
    pub fn ip(&self) -> Ipv4Addr {
        use discovery_offsets::*;
        let offset = match self.kind() {
            DiscoveryKind::IdUseRequest => ID_USE_IP,
            DiscoveryKind::IdUseResponse => RESPONSE_IP,
            DiscoveryKind::KeepAlive => KEEPALIVE_IP,
            DiscoveryKind::Collision => COLLISION_IP,
            _ => return Ipv4Addr::UNSPECIFIED,
        };
        Ipv4Addr::from(u32_at(self.buf, offset))
    }

    /// MAC carried in the frame, zeroes when the type has none
    pub fn mac(&self) -> [u8; 6] {
        use discovery_offsets::*;
        match self.kind() {
            DiscoveryKind::Stage1 | DiscoveryKind::KeepAlive => array_at(self.buf, MAC),
            DiscoveryKind::IdUseRequest => array_at(self.buf, ID_USE_MAC),
            _ => [0; 6],
        }
    }

    /// Correlation sequence of a negotiation frame, 0 for other types
    pub fn sequence(&self) -> u8 {
        use discovery_offsets::*;
        match self.kind() {
            DiscoveryKind::Stage1 => byte_at(self.buf, STAGE1_SEQUENCE),
            DiscoveryKind::IdUseRequest => byte_at(self.buf, ID_USE_SEQUENCE),
            DiscoveryKind::IdUseResponse => byte_at(self.buf, RESPONSE_SEQUENCE),
            DiscoveryKind::IdSetRequest => byte_at(self.buf, SET_SEQUENCE),
            _ => 0,
        }
    }

    /// Number of devices the sender believes are on the network (keepalive only)
    pub fn member_count(&self) -> u8 {
        match self.kind() {
            DiscoveryKind::KeepAlive => byte_at(self.buf, discovery_offsets::MEMBER_COUNT),
            _ => 0,
        }
    }

    /// Device type byte: 1 player, 2 mixer, 0 when absent
    pub fn device_type(&self) -> u8 {
        use discovery_offsets::*;
        match self.kind() {
            DiscoveryKind::Initial => byte_at(self.buf, INITIAL_DEVICE_TYPE),
            DiscoveryKind::Stage1 => byte_at(self.buf, STAGE1_DEVICE_TYPE),
            DiscoveryKind::KeepAlive => byte_at(self.buf, KEEPALIVE_DEVICE_TYPE),
            _ => 0,
        }
    }

    /// Whether this is a reply telling us `number` is taken, answering claim `sequence`
    pub fn is_id_in_use(&self, number: u8, sequence: u8) -> bool {
        use discovery_offsets::*;
        self.kind() == DiscoveryKind::IdUseResponse
            && self.sub_type() == 0x00
            && field(self.buf, DEVICE, 2) == Some(&[number, sequence][..])
    }
}

mod beat_offsets {
    pub const DEVICE: usize = 0x21;
    pub const NEXT_BEAT: usize = 0x24;
    pub const SECOND_BEAT: usize = 0x28;
    pub const NEXT_BAR: usize = 0x2c;
    pub const FOURTH_BEAT: usize = 0x30;
    pub const SECOND_BAR: usize = 0x34;
    pub const EIGHTH_BEAT: usize = 0x38;
    pub const PITCH: usize = 0x54;
    pub const BPM: usize = 0x5a;
    pub const BAR_POS: usize = 0x5c;
}

/// Beat frame broadcast on the beat port
#[derive(Debug, Clone, Copy)]
pub struct BeatFrame<'a> {
    buf: &'a [u8],
}

impl<'a> BeatFrame<'a> {
    pub fn device_number(&self) -> u8 {
        byte_at(self.buf, beat_offsets::DEVICE)
    }

    /// Milliseconds until the next beat
    pub fn next_beat(&self) -> u32 {
        u32_at(self.buf, beat_offsets::NEXT_BEAT)
    }

    pub fn second_beat(&self) -> u32 {
        u32_at(self.buf, beat_offsets::SECOND_BEAT)
    }

    /// Milliseconds until the next bar starts
    pub fn next_bar(&self) -> u32 {
        u32_at(self.buf, beat_offsets::NEXT_BAR)
    }

    pub fn fourth_beat(&self) -> u32 {
        u32_at(self.buf, beat_offsets::FOURTH_BEAT)
    }

    pub fn second_bar(&self) -> u32 {
        u32_at(self.buf, beat_offsets::SECOND_BAR)
    }

    pub fn eighth_beat(&self) -> u32 {
        u32_at(self.buf, beat_offsets::EIGHTH_BEAT)
    }

    pub fn pitch(&self) -> u32 {
        u32_at(self.buf, beat_offsets::PITCH)
    }

    /// Tempo on the wire, BPM x100
    pub fn bpm_raw(&self) -> u16 {
        u16_at(self.buf, beat_offsets::BPM)
    }

    /// Track tempo before pitch adjustment
    pub fn bpm(&self) -> f32 {
        bpm_from_wire(self.bpm_raw())
    }

    /// Tempo the device is actually playing at
    pub fn calculated_bpm(&self) -> f32 {
        calculated_bpm(self.bpm(), self.pitch())
    }

    /// Beat within the bar, 1..=4, or 0 when absent
    pub fn bar_pos(&self) -> u8 {
        byte_at(self.buf, beat_offsets::BAR_POS)
    }
}

mod status_offsets {
    pub const DEVICE: usize = 0x21;
    pub const ACTIVE: usize = 0x27;
    pub const LOADED_FROM: usize = 0x28;
    pub const SLOT: usize = 0x29;
    pub const TRACK_TYPE: usize = 0x2a;
    pub const TRACK_ID: usize = 0x2c;
    pub const TRACK_NUMBER: usize = 0x30;
    pub const PLAY_MODE: usize = 0x7b;
    pub const FIRMWARE: usize = 0x7c;
    pub const SYNC_COUNTER: usize = 0x84;
    pub const FLAGS: usize = 0x89;
    pub const PITCH: usize = 0x8c;
    pub const BPM: usize = 0x92;
    pub const MASTER_STATE: usize = 0x9e;
    pub const NEW_MASTER: usize = 0x9f;
    pub const BAR_POS: usize = 0xa6;
    pub const PITCH_PER_FADER: usize = 0xc0;
    pub const COUNTER: usize = 0xc8;
}

/// Shortest status frame current players send
pub const STATUS_MINIMUM_LEN: usize = 0xcc;

/// Player status frame from the status port
#[derive(Debug, Clone, Copy)]
pub struct StatusFrame<'a> {
    buf: &'a [u8],
}

impl<'a> StatusFrame<'a> {
    pub fn device_number(&self) -> u8 {
        byte_at(self.buf, status_offsets::DEVICE)
    }

    pub fn activity(&self) -> u8 {
        byte_at(self.buf, status_offsets::ACTIVE)
    }

    pub fn is_active(&self) -> bool {
        self.activity() != 0
    }

    /// Device the loaded track was read from
    pub fn loaded_from(&self) -> u8 {
        byte_at(self.buf, status_offsets::LOADED_FROM)
    }

    pub fn slot(&self) -> u8 {
        byte_at(self.buf, status_offsets::SLOT)
    }

    pub fn track_type(&self) -> u8 {
        byte_at(self.buf, status_offsets::TRACK_TYPE)
    }

    pub fn track_id(&self) -> u32 {
        u32_at(self.buf, status_offsets::TRACK_ID)
    }

    pub fn track_number(&self) -> u32 {
        u32_at(self.buf, status_offsets::TRACK_NUMBER)
    }

    pub fn play_mode(&self) -> u8 {
        byte_at(self.buf, status_offsets::PLAY_MODE)
    }

    /// Firmware version string, empty when absent
    pub fn firmware(&self) -> Cow<'a, str> {
        match field(self.buf, status_offsets::FIRMWARE, 4) {
            Some(version) => String::from_utf8_lossy(version),
            None => Cow::Borrowed(""),
        }
    }

    pub fn sync_counter(&self) -> u32 {
        u32_at(self.buf, status_offsets::SYNC_COUNTER)
    }

    pub fn flags(&self) -> u8 {
        byte_at(self.buf, status_offsets::FLAGS)
    }

    pub fn is_playing(&self) -> bool {
        self.flags() & flags::PLAY != 0
    }

    pub fn is_master(&self) -> bool {
        self.flags() & flags::MASTER != 0
    }

    pub fn is_synced(&self) -> bool {
        self.flags() & flags::SYNC != 0
    }

    pub fn is_on_air(&self) -> bool {
        self.flags() & flags::ON_AIR != 0
    }

    pub fn pitch(&self) -> u32 {
        u32_at(self.buf, status_offsets::PITCH)
    }

    pub fn pitch_per_fader(&self) -> u32 {
        u32_at(self.buf, status_offsets::PITCH_PER_FADER)
    }

    /// Tempo on the wire, BPM x100; 0xffff when no track is loaded
    pub fn bpm_raw(&self) -> u16 {
        u16_at(self.buf, status_offsets::BPM)
    }

    /// Track tempo before pitch adjustment, 0 when unknown
    pub fn bpm(&self) -> f32 {
        bpm_from_wire(self.bpm_raw())
    }

    pub fn calculated_bpm(&self) -> f32 {
        calculated_bpm(self.bpm(), self.pitch())
    }

    pub fn master_state(&self) -> MasterState {
        MasterState::from_byte(byte_at(self.buf, status_offsets::MASTER_STATE))
    }

    /// Device being handed mastership, if any
    pub fn new_master(&self) -> Option<u8> {
        match self.buf.get(status_offsets::NEW_MASTER) {
            Some(&n) if n != 0 && n != 0xff => Some(n),
            _ => None,
        }
    }

    pub fn bar_pos(&self) -> u8 {
        byte_at(self.buf, status_offsets::BAR_POS)
    }

    /// Send counter, incremented by the sender on every status frame
    pub fn counter(&self) -> u32 {
        u32_at(self.buf, status_offsets::COUNTER)
    }

    /// Whether the frame is as long as current firmware sends
    pub fn is_complete(&self) -> bool {
        self.buf.len() >= STATUS_MINIMUM_LEN
    }
}

mod mixer_offsets {
    pub const DEVICE: usize = 0x21;
    pub const FLAGS: usize = 0x27;
    pub const PITCH: usize = 0x28;
    pub const BPM: usize = 0x2e;
}

/// Mixer status frame from the status port
#[derive(Debug, Clone, Copy)]
pub struct MixerStatusFrame<'a> {
    buf: &'a [u8],
}

impl<'a> MixerStatusFrame<'a> {
    pub fn device_number(&self) -> u8 {
        byte_at(self.buf, mixer_offsets::DEVICE)
    }

    pub fn flags(&self) -> u8 {
        byte_at(self.buf, mixer_offsets::FLAGS)
    }

    pub fn pitch(&self) -> u32 {
        u32_at(self.buf, mixer_offsets::PITCH)
    }

    pub fn bpm_raw(&self) -> u16 {
        u16_at(self.buf, mixer_offsets::BPM)
    }

    pub fn bpm(&self) -> f32 {
        bpm_from_wire(self.bpm_raw())
    }

    pub fn calculated_bpm(&self) -> f32 {
        calculated_bpm(self.bpm(), self.pitch())
    }
}

mod generic_offsets {
    pub const DEVICE: usize = 0x21;
    pub const TARGET: usize = 0x27;
    pub const MASTER_OK: usize = 0x28;
    pub const SYNC: usize = 0x2b;
}

/// Any other frame on the beat or status ports
#[derive(Debug, Clone, Copy)]
pub struct GenericFrame<'a> {
    buf: &'a [u8],
    port: Port,
}

impl<'a> GenericFrame<'a> {
    pub fn kind(&self) -> FrameKind {
        FrameKind::from_byte(byte_at(self.buf, TYPE_OFFSET))
    }

    pub fn device_number(&self) -> u8 {
        byte_at(self.buf, generic_offsets::DEVICE)
    }

    /// Device named in a master request or response
    pub fn master_target(&self) -> u8 {
        byte_at(self.buf, generic_offsets::TARGET)
    }

    /// Whether a master response grants the request
    pub fn master_ok(&self) -> bool {
        u32_at(self.buf, generic_offsets::MASTER_OK) == 1
    }

    /// Requested sync state of a sync-control frame
    pub fn sync_request(&self) -> Option<bool> {
        match byte_at(self.buf, generic_offsets::SYNC) {
            0x10 => Some(true),
            0x20 => Some(false),
            _ => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::{MAGIC, Model};
    use crate::protocol::builder::{self, StatusFields};
    use crate::util::PITCH_NORMAL;

    const IP: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);
    const MAC: [u8; 6] = [0x00, 0x1b, 0x44, 0x11, 0x3a, 0xb7];

    fn status_fields() -> StatusFields {
        StatusFields {
            device_number: 3,
            bpm: 124.0,
            pitch: PITCH_NORMAL,
            bar_index: 2,
            active: true,
            master: true,
            new_master: Some(2),
            synced: false,
            sync_counter: 17,
            counter: 99,
        }
    }

    #[test]
    fn test_parse_routes_by_port_and_type() {
        let keepalive = builder::keepalive(Model::Vdj, 3, MAC, IP, 2);
        assert!(matches!(Frame::parse(&keepalive, Port::Discovery).unwrap(), Frame::Discovery(_)));

        let beat = builder::beat(Model::Vdj, 3, 120.0, PITCH_NORMAL, 0);
        assert!(matches!(Frame::parse(&beat, Port::Beat).unwrap(), Frame::Beat(_)));

        let request = builder::master_request(Model::Vdj, 3);
        let frame = Frame::parse(&request, Port::Beat).unwrap();
        assert_eq!(frame.type_name(), "master-request");
        assert!(matches!(frame, Frame::Generic(f) if f.kind() == FrameKind::MasterRequest));

        let status = builder::status(Model::Vdj, &status_fields());
        assert!(matches!(Frame::parse(&status, Port::Status).unwrap(), Frame::Status(_)));
        // status frames are only status frames on the status port
        assert!(matches!(Frame::parse(&status, Port::Beat).unwrap(), Frame::Generic(_)));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(Frame::parse(&[], Port::Status).is_err());
        assert!(Frame::parse(&MAGIC[..], Port::Status).is_err());

        let mut beat = builder::beat(Model::Vdj, 3, 120.0, PITCH_NORMAL, 0).to_vec();
        beat[0] = b'X';
        assert!(Frame::parse(&beat, Port::Beat).is_err());
    }

    #[test]
    fn test_model_name() {
        let keepalive = builder::keepalive(Model::Xdj, 3, MAC, IP, 2);
        let frame = Frame::parse(&keepalive, Port::Discovery).unwrap();
        assert_eq!(frame.model_name(), "XDJ-1000");

        let beat = builder::beat(Model::Cdj, 3, 120.0, PITCH_NORMAL, 0);
        assert_eq!(Frame::parse(&beat, Port::Beat).unwrap().model_name(), "CDJ-1000");

        // cut inside the name field
        assert_eq!(Frame::parse(&beat[..20], Port::Beat).unwrap().model_name(), "");
    }

    #[test]
    fn test_status_accessors_are_bounds_checked() {
        let status = builder::status(Model::Vdj, &status_fields());
        let checks: [(usize, fn(&StatusFrame<'_>) -> u32); 8] = [
            (0x21, |f| f.device_number() as u32),
            (0x2c + 3, |f| f.track_id()),
            (0x84 + 3, |f| f.sync_counter()),
            (0x89, |f| f.flags() as u32),
            (0x8c + 3, |f| f.pitch()),
            (0x92 + 1, |f| f.bpm_raw() as u32),
            (0x9e, |f| f.master_state().as_byte() as u32),
            (0xc8 + 3, |f| f.counter()),
        ];

        for (last_byte, read) in checks {
            let whole = match Frame::parse(&status, Port::Status).unwrap() {
                Frame::Status(f) => read(&f),
                other => panic!("unexpected frame {:?}", other),
            };
            assert_ne!(whole, 0, "field ending at 0x{:x} should be set", last_byte);

            for cut in 1..=4usize.min(last_byte - 11) {
                let len = last_byte + 1 - cut;
                match Frame::parse(&status[..len], Port::Status).unwrap() {
                    Frame::Status(f) => assert_eq!(read(&f), 0, "len 0x{:x}", len),
                    other => panic!("unexpected frame {:?}", other),
                }
            }
        }

        match Frame::parse(&status[..0x9f], Port::Status).unwrap() {
            Frame::Status(f) => {
                assert_eq!(f.new_master(), None);
                assert!(!f.is_complete());
                assert_eq!(f.bpm(), 124.0);
            }
            other => panic!("unexpected frame {:?}", other),
        }

        // tempo cut in half reads as unknown
        match Frame::parse(&status[..0x93], Port::Status).unwrap() {
            Frame::Status(f) => {
                assert_eq!(f.bpm_raw(), 0);
                assert_eq!(f.bpm(), 0.0);
                assert_eq!(f.calculated_bpm(), 0.0);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    /// Mixer status frame as a DJM sends it
    pub(crate) fn mixer_status(number: u8, bpm: f32, pitch: u32) -> Vec<u8> {
        let mut buf = vec![0u8; 0x38];
        buf[..MAGIC.len()].copy_from_slice(MAGIC);
        buf[TYPE_OFFSET] = FrameKind::MixerStatus.as_byte();
        buf[0x0b..0x0b + MODEL_NAME_LEN].copy_from_slice(&Model::Djm.name_field());
        buf[0x21] = number;
        buf[0x27] = 0xf0;
        buf[0x28..0x2c].copy_from_slice(&pitch.to_be_bytes());
        buf[0x2e..0x30].copy_from_slice(&crate::util::bpm_to_int(bpm).to_be_bytes());
        buf
    }

    #[test]
    fn test_mixer_status_accessors() {
        let mixer = mixer_status(33, 126.0, 0x0010_0000);
        let frame = Frame::parse(&mixer, Port::Status).unwrap();
        assert_eq!(frame.model_name(), "DDJ-1000");
        let Frame::MixerStatus(f) = frame else { panic!("not a mixer status frame") };
        assert_eq!(f.device_number(), 33);
        assert_eq!(f.flags(), 0xf0);
        assert_eq!(f.pitch(), 0x0010_0000);
        assert_eq!(f.bpm_raw(), 12600);
        assert_eq!(f.calculated_bpm(), 126.0);

        // mixer frames are only recognized on the status port
        assert!(matches!(Frame::parse(&mixer, Port::Beat).unwrap(), Frame::Generic(_)));

        for len in [0x2f, 0x2e] {
            let Frame::MixerStatus(cut) = Frame::parse(&mixer[..len], Port::Status).unwrap() else {
                panic!("not a mixer status frame")
            };
            assert_eq!(cut.bpm_raw(), 0, "len 0x{:x}", len);
            assert_eq!(cut.bpm(), 0.0);
            assert_eq!(cut.pitch(), 0x0010_0000);
        }

        let Frame::MixerStatus(cut) = Frame::parse(&mixer[..0x2b], Port::Status).unwrap() else {
            panic!("not a mixer status frame")
        };
        assert_eq!(cut.pitch(), 0);
        assert_eq!(cut.device_number(), 33);

        let Frame::MixerStatus(cut) = Frame::parse(&mixer[..0x21], Port::Status).unwrap() else {
            panic!("not a mixer status frame")
        };
        assert_eq!(cut.device_number(), 0);
        assert_eq!(cut.flags(), 0);
    }

    #[test]
    fn test_beat_accessors_are_bounds_checked() {
        let beat = builder::beat(Model::Vdj, 3, 120.0, PITCH_NORMAL, 1);
        let short = &beat[..0x5a];
        match Frame::parse(short, Port::Beat).unwrap() {
            Frame::Beat(f) => {
                assert_eq!(f.device_number(), 3);
                assert_eq!(f.pitch(), 0x0010_0000);
                assert_eq!(f.bpm_raw(), 0);
                assert_eq!(f.calculated_bpm(), 0.0);
                assert_eq!(f.bar_pos(), 0);
            }
            other => panic!("unexpected frame {:?}", other),
        }

        match Frame::parse(&beat[..0x21], Port::Beat).unwrap() {
            Frame::Beat(f) => {
                assert_eq!(f.device_number(), 0);
                assert_eq!(f.next_beat(), 0);
                assert_eq!(f.eighth_beat(), 0);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_discovery_accessors_are_bounds_checked() {
        let claim = builder::id_use_request(Model::Vdj, 2, IP, MAC, 1);
        let full = Frame::parse(claim.bytes(), Port::Discovery).unwrap();
        let Frame::Discovery(full) = full else { panic!("not a discovery frame") };
        assert_eq!(full.device_number(), 2);

        let Frame::Discovery(short) = Frame::parse(&claim.bytes()[..0x2e], Port::Discovery).unwrap() else {
            panic!("not a discovery frame")
        };
        assert_eq!(short.device_number(), 0);
        assert_eq!(short.sequence(), 0);
        assert_eq!(short.mac(), MAC);
        assert_eq!(short.ip(), IP);

        let Frame::Discovery(shorter) = Frame::parse(&claim.bytes()[..0x27], Port::Discovery).unwrap() else {
            panic!("not a discovery frame")
        };
        assert_eq!(shorter.ip(), Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn test_id_in_use_matching() {
        let reply = builder::id_use_response(Model::Xdj, 1, 1, Ipv4Addr::new(192, 168, 1, 30));
        let Frame::Discovery(frame) = Frame::parse(&reply, Port::Discovery).unwrap() else {
            panic!("not a discovery frame")
        };
        assert!(frame.is_id_in_use(1, 1));
        assert!(!frame.is_id_in_use(1, 2));
        assert!(!frame.is_id_in_use(2, 1));

        let Frame::Discovery(cut) = Frame::parse(&reply[..0x25], Port::Discovery).unwrap() else {
            panic!("not a discovery frame")
        };
        assert!(!cut.is_id_in_use(1, 1));
    }

    #[test]
    fn test_generic_accessors() {
        let response = builder::master_response(Model::Vdj, 4);
        let Frame::Generic(frame) = Frame::parse(&response, Port::Beat).unwrap() else {
            panic!("not a generic frame")
        };
        assert_eq!(frame.kind(), FrameKind::MasterResponse);
        assert_eq!(frame.master_target(), 4);
        assert!(frame.master_ok());
        let Frame::Generic(cut) = Frame::parse(&response[..0x2b], Port::Beat).unwrap() else {
            panic!("not a generic frame")
        };
        assert!(!cut.master_ok());

        let sync = builder::sync_control(Model::Vdj, 4, false);
        let Frame::Generic(frame) = Frame::parse(&sync, Port::Beat).unwrap() else {
            panic!("not a generic frame")
        };
        assert_eq!(frame.sync_request(), Some(false));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(DiscoveryKind::from_byte(0x06).to_string(), "keepalive");
        assert_eq!(DiscoveryKind::from_byte(0x0a), DiscoveryKind::Initial);
        assert_eq!(FrameKind::from_byte(0x7f).to_string(), "type-0x7f");
        for byte in 0..=0xffu8 {
            assert_eq!(FrameKind::from_byte(byte).as_byte(), byte);
            assert_eq!(DiscoveryKind::from_byte(byte).as_byte(), byte);
        }
    }
}
