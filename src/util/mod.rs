//! Utility module
//!
//! This module provides tempo arithmetic, address helpers and the small formatting
//! functions used by log output throughout the library.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::time::Instant;

use crate::protocol::flags;

/// Pitch value meaning "no adjustment"
pub const PITCH_NORMAL: u32 = 0x0010_0000;

/// Fastest tempo the BPM x100 wire field can carry
pub const MAX_BPM: f32 = 655.35;

/// Beat timing differences are clamped to this many milliseconds either way
pub const MAX_TIME_DIFF_MS: i64 = 250;

/// Converts the fixed-point pitch field into a tempo multiplier
pub fn pitch_to_multiplier(pitch: u32) -> f32 {
    pitch as f32 / PITCH_NORMAL as f32
}

/// Converts the fixed-point pitch field into a pitch bend in percent
pub fn pitch_to_percentage(pitch: u32) -> f32 {
    100.0 * pitch_to_multiplier(pitch) - 100.0
}

/// Effective tempo for a base tempo played at the given pitch
pub fn calculated_bpm(base_bpm: f32, pitch: u32) -> f32 {
    base_bpm * pitch_to_multiplier(pitch)
}

/// Decodes the wire tempo (BPM x100); 0xffff means unknown and decodes to 0
pub fn bpm_from_wire(raw: u16) -> f32 {
    if raw == 0xffff {
        0.0
    } else {
        raw as f32 / 100.0
    }
}

/// Encodes a tempo as BPM x100, saturating at the field limits
pub fn bpm_to_int(bpm: f32) -> u16 {
    (bpm * 100.0).round().clamp(0.0, 65535.0) as u16
}

/// Clamps a requested tempo to what the wire can carry; NaN means stopped
pub fn clamp_bpm(bpm: f32) -> f32 {
    if bpm.is_nan() {
        0.0
    } else {
        bpm.clamp(0.0, MAX_BPM)
    }
}

/// Length of one beat, or None for a stopped tempo (or one too slow to represent)
pub fn beat_duration(bpm: f32) -> Option<Duration> {
    if bpm.is_finite() && bpm > 0.0 {
        Duration::try_from_secs_f64(60.0 / bpm as f64).ok()
    } else {
        None
    }
}

/// Length of one beat in whole milliseconds, 0 for a stopped tempo
///
/// Saturates at `u32::MAX` for tempos slow enough to overflow the field.
pub fn beat_millis(bpm: f32) -> u32 {
    beat_duration(bpm)
        .map(|d| u32::try_from(d.as_millis()).unwrap_or(u32::MAX))
        .unwrap_or(0)
}

/// Signed difference `a - b` in milliseconds, clamped to +/-250 ms
pub fn time_diff(a: Instant, b: Instant) -> i64 {
    let diff = if a >= b {
        a.duration_since(b).as_millis() as i64
    } else {
        -(b.duration_since(a).as_millis() as i64)
    };
    diff.clamp(-MAX_TIME_DIFF_MS, MAX_TIME_DIFF_MS)
}

/// Broadcast address for a host address and netmask
pub fn broadcast_address(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(netmask))
}

/// Formats a MAC address as lower-case colon separated hex
pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Renders a status flag byte as five characters: play, master, sync, on-air, bpm
pub fn flags_to_string(byte: u8) -> String {
    [
        (flags::PLAY, 'P'),
        (flags::MASTER, 'M'),
        (flags::SYNC, 'S'),
        (flags::ON_AIR, 'A'),
        (flags::BPM, 'B'),
    ]
    .iter()
    .map(|&(bit, c)| if byte & bit != 0 { c } else { '-' })
    .collect()
}

/// Renders a pitch as a signed percentage
pub fn pitch_to_string(pitch: u32) -> String {
    format!("{:+.2}%", pitch_to_percentage(pitch))
}
