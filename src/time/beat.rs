//! Beat emission and play state
//!
//! The local device only plays while beats keep coming: every call to
//! [`VirtualDevice::broadcast_beat`] marks it playing, and the status tick clears the flag
//! once no beat arrived within the play timeout. Beats from peers are copied into the
//! backline so callers can compare beat phase.

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::core::{Destination, Event, Outbox, VirtualDevice};
use crate::protocol::{builder, BeatFrame};
use crate::util::time_diff;

/// Beats in a bar
pub const BEATS_PER_BAR: u8 = 4;

impl VirtualDevice {
    /// Broadcasts one beat and marks the device playing
    ///
    /// `bpm` replaces the current tempo when given. `bar_pos` (1..=4) places the beat in
    /// the bar; without it the position advances from the previous beat, or starts at the
    /// downbeat when the device was not playing.
    pub fn broadcast_beat(&mut self, bpm: Option<f32>, bar_pos: Option<u8>, now: Instant, out: &mut Outbox) {
        if let Some(bpm) = bpm {
            self.set_bpm(bpm);
        }

        self.bar_index = match bar_pos {
            Some(pos) if (1..=BEATS_PER_BAR).contains(&pos) => pos - 1,
            _ if self.playing => (self.bar_index + 1) % BEATS_PER_BAR,
            _ => 0,
        };
        self.last_beat = Some(now);
        if !self.playing {
            debug!(device = self.number, bpm = self.bpm, "playing");
        }
        self.playing = true;

        trace!(device = self.number, bar_pos = self.bar_index + 1, "beat");
        let packet = builder::beat(self.identity.model, self.number, self.bpm, self.pitch, self.bar_index);
        out.send(Destination::BeatBroadcast, packet);
    }

    /// Clears the playing flag when the last local beat is older than the play timeout
    ///
    /// Returns true when the flag was cleared.
    pub fn expire_play_state(&mut self, now: Instant) -> bool {
        if !self.playing {
            return false;
        }
        let stale = match self.last_beat {
            Some(last) => now.saturating_duration_since(last) > self.config.play_timeout,
            None => true,
        };
        if stale {
            debug!(device = self.number, "no beat, stopped playing");
            self.playing = false;
        }
        stale
    }

    pub(crate) fn handle_beat(&mut self, frame: &BeatFrame<'_>, now: Instant, out: &mut Outbox) {
        let device = frame.device_number();
        let bpm = frame.calculated_bpm();
        if let Some(peer) = self.backline.get_mut(device) {
            peer.bpm = bpm;
            peer.pitch = frame.pitch();
            peer.last_beat = Some(now);
        }
        out.emit(Event::Beat {
            device,
            bpm,
            pitch: frame.pitch(),
            bar_pos: frame.bar_pos(),
            next_beat_ms: frame.next_beat(),
        });
    }

    /// Milliseconds between the last beat of `device` and our own last beat
    ///
    /// Positive when the peer's beat came later. Clamped to +/-250 ms.
    pub fn beat_offset(&self, device: u8) -> Option<i64> {
        let theirs = self.backline.get(device)?.last_beat?;
        let ours = self.last_beat?;
        Some(time_diff(theirs, ours))
    }
}
