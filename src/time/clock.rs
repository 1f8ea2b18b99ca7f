use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::network::DeviceHandle;
use crate::util::beat_duration;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ClockState {
    bpm: f32,
    running: bool,
    stopped: bool,
}

/// Emits beats through a device handle at a constant tempo
///
/// The first beat goes out immediately. Changing the tempo keeps the time of the
/// next beat and spaces the following ones at the new tempo.
#[derive(Debug)]
pub struct BeatClock {
    control: watch::Sender<ClockState>,
    task: JoinHandle<()>,
}

impl BeatClock {
    /// Starts a clock at `bpm`
    pub fn spawn(handle: DeviceHandle, bpm: f32) -> Self {
        let (control, state) = watch::channel(ClockState { bpm, running: true, stopped: false });
        let task = tokio::spawn(run(handle, state));
        BeatClock { control, task }
    }

    pub fn pause(&self) {
        self.control.send_modify(|state| state.running = false);
    }

    pub fn resume(&self) {
        self.control.send_modify(|state| state.running = true);
    }

    pub fn set_bpm(&self, bpm: f32) {
        self.control.send_modify(|state| state.bpm = bpm);
    }

    pub fn bpm(&self) -> f32 {
        self.control.borrow().bpm
    }

    /// Stops the clock and waits for its task to finish
    pub async fn stop(self) {
        self.control.send_modify(|state| state.stopped = true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "beat clock failed");
        }
    }
}

async fn run(handle: DeviceHandle, mut state: watch::Receiver<ClockState>) {
    let mut next = Instant::now();
    let mut sent_bpm = None;

    loop {
        let current = *state.borrow_and_update();
        if current.stopped {
            break;
        }

        let period = if current.running { beat_duration(current.bpm) } else { None };
        let Some(period) = period else {
            // paused or stopped tempo; wait for a change
            if state.changed().await.is_err() {
                break;
            }
            next = Instant::now();
            continue;
        };

        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = sleep_until(next) => {
                let bpm = (sent_bpm != Some(current.bpm)).then_some(current.bpm);
                if let Err(e) = handle.beat(bpm, None).await {
                    debug!(error = %e, "device gone, beat clock stopping");
                    break;
                }
                sent_bpm = Some(current.bpm);
                next += period;
                // fell behind, restart the grid from now
                let now = Instant::now();
                if next < now {
                    next = now;
                }
            }
        }
    }
}
