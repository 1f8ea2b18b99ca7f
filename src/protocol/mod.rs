//! Protocol implementation for ProLink
//!
//! This module implements the wire format (header validation, typed frame views and
//! outbound frame builders) and the presence/identity state machine that claims a
//! device number on the network.

pub mod builder;
pub mod codec;
pub mod message;
pub mod state;

pub use self::builder::{HandshakePacket, StatusFields};
pub use self::codec::{Datagram, DatagramCodec};
pub use self::message::{
    BeatFrame,
    DiscoveryFrame,
    DiscoveryKind,
    Frame,
    FrameKind,
    GenericFrame,
    MixerStatusFrame,
    StatusFrame,
};
pub use self::state::{ClaimChannel, NegotiationState};

/// Bits of the status flag byte
pub mod flags {
    pub const BPM: u8 = 0x02;
    pub const ON_AIR: u8 = 0x08;
    pub const SYNC: u8 = 0x10;
    pub const MASTER: u8 = 0x20;
    pub const PLAY: u8 = 0x40;
    /// Always set by current players
    pub const BASE: u8 = 0x84;
}
