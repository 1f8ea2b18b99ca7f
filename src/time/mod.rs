//! Beat timing
//!
//! This module covers the local beat: emitting beat frames, tracking whether the device
//! is still playing, comparing beat phase with peers and a [`BeatClock`] that drives a
//! running device at a constant tempo.
//!
//! # Examples
//!
//! ```no_run
//! use prolink_vdj::core::{MemoryStore, VirtualDevice};
//! use prolink_vdj::network;
//! use prolink_vdj::time::BeatClock;
//! use std::net::Ipv4Addr;
//!
//! #[tokio::main]
//! async fn main() -> prolink_vdj::Result<()> {
//!     let device = VirtualDevice::new(
//!         [0x02, 0, 0, 0, 0, 0x01],
//!         Ipv4Addr::new(192, 168, 1, 10),
//!         Ipv4Addr::new(255, 255, 255, 0),
//!         Ipv4Addr::UNSPECIFIED,
//!         0,
//!     )?;
//!     let handle = network::start(device, &MemoryStore::new()).await?;
//!
//!     let clock = BeatClock::spawn(handle.clone(), 124.0);
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     clock.stop().await;
//!     handle.shutdown().await
//! }
//! ```

mod beat;
mod clock;

pub use self::beat::BEATS_PER_BAR;
pub use self::clock::BeatClock;
