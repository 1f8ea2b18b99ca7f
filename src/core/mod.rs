//! Core types and traits for the ProLink virtual device
//!
//! This module contains the fundamental building blocks used throughout the library:
//! the error type, configuration, the local device state and the device-number store.

pub mod device;
pub mod error;
pub mod serde;
pub mod store;
pub mod types;

use std::time::Duration;

pub use self::device::{Destination, DeviceSnapshot, Event, Outbound, Outbox, VirtualDevice};
pub use self::error::{Error, Result};
pub use self::serde::parse_mac;
pub use self::store::{FileStore, MemoryStore, NumberStore};
pub use self::types::{
    Config,
    DeviceFlags,
    DeviceType,
    Identity,
    MasterState,
    Model,
    Port,
    Ports,
    Scheduling,
};

/// Magic sequence opening every ProLink frame
pub const MAGIC: &[u8; 10] = b"Qspt1WmJOL";

/// Port used for presence, identity negotiation and keepalives
pub const DISCOVERY_PORT: u16 = 50000;

/// Port used for beats and master handoff
pub const BEAT_PORT: u16 = 50001;

/// Port used for unicast status frames
pub const STATUS_PORT: u16 = 50002;

/// Interval between keepalive broadcasts
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(2000);

/// Interval between status rounds
pub const STATUS_INTERVAL: Duration = Duration::from_millis(200);

/// Spacing between negotiation steps, and how long to wait for an id-in-use reply
pub const REPLY_WAIT: Duration = Duration::from_millis(300);

/// A peer silent for longer than this is marked gone
pub const PEER_TIMEOUT: Duration = Duration::from_secs(7);

/// Without a local beat for this long the device stops playing
pub const PLAY_TIMEOUT: Duration = Duration::from_secs(1);

/// The single loop re-enters its wait after this long without traffic
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Number of device slots tracked by the backline
pub const MAX_BACKLINE: usize = 32;

/// Largest datagram we ever read
pub const MAX_DATAGRAM_SIZE: usize = 1500;

/// Device number used when none is configured
pub const DEFAULT_DEVICE_NUMBER: u8 = 5;

/// Automatic numbering cycles through 1..=MAX_AUTO_NUMBER
pub const MAX_AUTO_NUMBER: u8 = 4;

/// Where the last claimed device number is kept between runs
pub const DEFAULT_NUMBER_FILE: &str = "/var/tmp/vdj-player-id";
