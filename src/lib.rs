//! prolink-vdj: a virtual player for the Pioneer ProLink DJ network
//!
//! This library joins a ProLink network as a player: it claims a device number, keeps
//! itself present with keepalives, tracks the other devices, sends status and beats, and
//! takes part in tempo master handoff.
pub mod core;

pub mod network;
pub mod protocol;
pub mod sync;
pub mod time;
pub mod util;

// Re-export commonly used items
pub use crate::core::{Config, Error, Event, Result, VirtualDevice};
pub use network::{start, DeviceHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
