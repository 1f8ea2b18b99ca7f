use std::fmt;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// Device model, written as the first character of the model name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Model {
    Cdj,
    Xdj,
    Vdj,
    Djm,
}

impl Model {
    /// The model character on the wire
    pub fn as_byte(&self) -> u8 {
        match self {
            Model::Cdj => b'C',
            Model::Xdj => b'X',
            Model::Vdj => b'V',
            Model::Djm => b'D',
        }
    }

    /// Whether this model identifies as a player or a mixer
    pub fn device_type(&self) -> DeviceType {
        match self {
            Model::Djm => DeviceType::Mixer,
            _ => DeviceType::Player,
        }
    }

    /// The 20 byte model name field
    pub fn name_field(&self) -> [u8; 20] {
        let mut name = [0u8; 20];
        name[..8].copy_from_slice(b"CDJ-1000");
        name[0] = self.as_byte();
        name
    }
}

/// Kind of device announced in stage-1 and keepalive frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Player = 0x01,
    Mixer = 0x02,
}

/// Flag bits passed when constructing a virtual device
///
/// Bits 0..=2 hold a fixed device number, the rest select the model
/// and whether the number is negotiated automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceFlags(pub u32);

impl DeviceFlags {
    pub const NUMBER_MASK: u32 = 0x07;
    pub const MIXER: u32 = 0x08;
    pub const XDJ: u32 = 0x10;
    pub const CDJ: u32 = 0x20;
    pub const AUTO_NUMBER: u32 = 0x40;

    /// The device number requested in the low bits, or the default
    pub fn device_number(&self) -> u8 {
        if self.auto_number() {
            return 1;
        }
        match (self.0 & Self::NUMBER_MASK) as u8 {
            0 => super::DEFAULT_DEVICE_NUMBER,
            n => n,
        }
    }

    pub fn auto_number(&self) -> bool {
        self.0 & Self::AUTO_NUMBER != 0
    }

    /// The model selected by the flags, VDJ when none is set
    pub fn model(&self) -> Model {
        if self.0 & Self::MIXER != 0 {
            Model::Djm
        } else if self.0 & Self::XDJ != 0 {
            Model::Xdj
        } else if self.0 & Self::CDJ != 0 {
            Model::Cdj
        } else {
            Model::Vdj
        }
    }
}

/// Master state byte reported in status frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MasterState {
    Off,
    On,
    /// Master but the loaded track has no beat grid
    NoBeatGrid,
    Unknown(u8),
}

impl MasterState {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x00 => MasterState::Off,
            0x01 => MasterState::On,
            0x02 => MasterState::NoBeatGrid,
            other => MasterState::Unknown(other),
        }
    }

    pub fn as_byte(&self) -> u8 {
        match self {
            MasterState::Off => 0x00,
            MasterState::On => 0x01,
            MasterState::NoBeatGrid => 0x02,
            MasterState::Unknown(byte) => *byte,
        }
    }
}

impl Default for MasterState {
    fn default() -> Self {
        MasterState::Off
    }
}

/// Logical port a datagram arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Port {
    Discovery,
    Beat,
    Status,
}

impl Port {
    /// Length of the fixed header before the model name
    pub fn header_len(&self) -> usize {
        match self {
            Port::Discovery => 12,
            _ => 11,
        }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Discovery => write!(f, "discovery"),
            Port::Beat => write!(f, "beat"),
            Port::Status => write!(f, "status"),
        }
    }
}

/// UDP port numbers for each logical port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ports {
    pub discovery: u16,
    pub beat: u16,
    pub status: u16,
}

impl Ports {
    pub fn number(&self, port: Port) -> u16 {
        match port {
            Port::Discovery => self.discovery,
            Port::Beat => self.beat,
            Port::Status => self.status,
        }
    }
}

impl Default for Ports {
    fn default() -> Self {
        Ports {
            discovery: super::DISCOVERY_PORT,
            beat: super::BEAT_PORT,
            status: super::STATUS_PORT,
        }
    }
}

/// How the device schedules its socket reads and periodic sends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scheduling {
    /// One task multiplexing every socket and the status timer
    SingleLoop,
    /// One task per socket class plus timer tasks, sharing state behind a mutex
    PerSocket,
}

impl Default for Scheduling {
    fn default() -> Self {
        Scheduling::SingleLoop
    }
}

/// Network identity of the local device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Hardware address announced during discovery
    #[serde(serialize_with = "super::serde::serialize_mac")]
    #[serde(deserialize_with = "super::serde::deserialize_mac")]
    pub mac: [u8; 6],
    /// Unicast address peers send status frames to
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    /// Address used for discovery and beat broadcasts
    pub broadcast: Ipv4Addr,
    pub model: Model,
}

/// Configuration for a virtual device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// UDP port numbers
    pub ports: Ports,
    /// Interval between keepalives in the per-socket scheduler
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub keepalive_interval: Duration,
    /// Interval between status rounds
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub status_interval: Duration,
    /// Negotiation step spacing and reply window
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub reply_wait: Duration,
    /// Liveness threshold for peers
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub peer_timeout: Duration,
    /// Playing is cleared when no local beat arrives within this window
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub play_timeout: Duration,
    /// Bound on a single wait of the single-loop scheduler
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub idle_timeout: Duration,
    /// Status ticks between keepalives in the single-loop scheduler
    pub keepalive_ticks: u32,
    /// Sends per negotiation step
    pub claim_attempts: u8,
    pub scheduling: Scheduling,
    /// File holding the last claimed device number
    pub number_file: Option<PathBuf>,
}

impl Config {
    /// Checks the configuration for values the schedulers cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.status_interval.is_zero() || self.keepalive_interval.is_zero() {
            return Err(Error::config("timer intervals must be non-zero"));
        }
        if self.keepalive_ticks == 0 {
            return Err(Error::config("keepalive_ticks must be at least 1"));
        }
        if self.claim_attempts == 0 {
            return Err(Error::config("claim_attempts must be at least 1"));
        }
        let ports = self.ports;
        if ports.discovery == ports.beat || ports.beat == ports.status || ports.discovery == ports.status {
            return Err(Error::config("discovery, beat and status ports must differ"));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            ports: Ports::default(),
            keepalive_interval: super::KEEPALIVE_INTERVAL,
            status_interval: super::STATUS_INTERVAL,
            reply_wait: super::REPLY_WAIT,
            peer_timeout: super::PEER_TIMEOUT,
            play_timeout: super::PLAY_TIMEOUT,
            idle_timeout: super::IDLE_TIMEOUT,
            keepalive_ticks: 8,
            claim_attempts: 3,
            scheduling: Scheduling::default(),
            number_file: Some(PathBuf::from(super::DEFAULT_NUMBER_FILE)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_select_number_and_model() {
        assert_eq!(DeviceFlags(0).device_number(), 5);
        assert_eq!(DeviceFlags(0).model(), Model::Vdj);
        assert_eq!(DeviceFlags(3 | DeviceFlags::XDJ).device_number(), 3);
        assert_eq!(DeviceFlags(3 | DeviceFlags::XDJ).model(), Model::Xdj);
        assert_eq!(DeviceFlags(DeviceFlags::MIXER).model().device_type(), DeviceType::Mixer);

        let auto = DeviceFlags(DeviceFlags::AUTO_NUMBER | 3);
        assert!(auto.auto_number());
        assert_eq!(auto.device_number(), 1);
    }

    #[test]
    fn test_model_name_field() {
        let name = Model::Vdj.name_field();
        assert_eq!(&name[..8], b"VDJ-1000");
        assert!(name[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_master_state_bytes() {
        for byte in [0u8, 1, 2, 9] {
            assert_eq!(MasterState::from_byte(byte).as_byte(), byte);
        }
        assert_eq!(MasterState::from_byte(1), MasterState::On);
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.ports.number(Port::Discovery), 50000);
        assert_eq!(config.ports.number(Port::Beat), 50001);
        assert_eq!(config.ports.number(Port::Status), 50002);
        assert_eq!(config.status_interval, Duration::from_millis(200));
        assert_eq!(config.peer_timeout, Duration::from_secs(7));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = Config {
            ports: Ports { discovery: 1, beat: 1, status: 2 },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = Config { keepalive_ticks: 0, ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = Config {
            scheduling: Scheduling::PerSocket,
            number_file: None,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"status_interval\":200"));
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back.scheduling, Scheduling::PerSocket);
        assert_eq!(back.reply_wait, Duration::from_millis(300));
        assert_eq!(back.number_file, None);
    }
}
