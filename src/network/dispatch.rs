//! Single-loop scheduler
//!
//! One task waits on all five receive sockets, the status timer and the command queue.
//! It is the only owner of the device, so nothing here needs a lock, and a datagram that
//! arrives before a timer tick is always processed before that tick's sends.

use std::io;
use std::net::SocketAddr;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::core::{Event, Outbox, Port, VirtualDevice, MAX_DATAGRAM_SIZE};

use super::{apply_command, flush, Command, Sockets};

fn ingest(
    device: &mut VirtualDevice,
    port: Port,
    received: io::Result<(usize, SocketAddr)>,
    buf: &[u8],
    out: &mut Outbox,
) {
    let (len, from) = match received {
        Ok(received) => received,
        Err(e) => {
            warn!(%port, error = %e, "failed to receive datagram");
            return;
        }
    };

    if let Err(e) = device.handle_datagram(port, &buf[..len], from, Instant::now(), out) {
        if e.is_recoverable() {
            trace!(%port, peer = %from, error = %e, "discarded datagram");
        } else {
            warn!(%port, peer = %from, error = %e, "failed to handle datagram");
        }
    }
}

pub(crate) async fn run(
    mut device: VirtualDevice,
    sockets: Sockets,
    mut commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<Event>,
) {
    let idle = device.config().idle_timeout;
    let mut ticker = interval(device.config().status_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut bufs = [[0u8; MAX_DATAGRAM_SIZE]; 5];
    info!(device = device.device_number(), "dispatch loop started");

    loop {
        let mut out = Outbox::new();
        let [discovery, discovery_unicast, beat, beat_unicast, status] = &mut bufs;

        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(command) => {
                    if !apply_command(&mut device, command, Instant::now(), &mut out) {
                        break;
                    }
                }
                None => {
                    debug!("all device handles dropped");
                    break;
                }
            },
            received = sockets.discovery.recv_from(discovery) => {
                ingest(&mut device, Port::Discovery, received, discovery, &mut out);
            }
            received = sockets.discovery_unicast.recv_from(discovery_unicast) => {
                ingest(&mut device, Port::Discovery, received, discovery_unicast, &mut out);
            }
            received = sockets.beat.recv_from(beat) => {
                ingest(&mut device, Port::Beat, received, beat, &mut out);
            }
            received = sockets.beat_unicast.recv_from(beat_unicast) => {
                ingest(&mut device, Port::Beat, received, beat_unicast, &mut out);
            }
            received = sockets.status.recv_from(status) => {
                ingest(&mut device, Port::Status, received, status, &mut out);
            }
            _ = ticker.tick() => {
                device.on_status_tick(Instant::now(), &mut out);
            }
            _ = sleep(idle) => {
                trace!(device = device.device_number(), "idle");
            }
        }

        flush(&sockets, &events, &mut out).await;
    }

    info!(device = device.device_number(), "dispatch loop stopped");
    sockets.close();
    // no subscribers is fine
    let _ = events.send(Event::Stopped);
}
