//! Per-socket scheduler
//!
//! Each receive socket gets its own task reading through a `UdpFramed` stream, and the
//! status round and keepalive run on their own timers. The device sits behind an async
//! mutex that every task takes for the duration of one handler call. Sends happen after
//! the lock is released.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::udp::UdpFramed;
use tracing::{debug, info, trace, warn};

use crate::core::{Event, Outbox, Port, VirtualDevice};
use crate::protocol::DatagramCodec;

use super::{apply_command, flush, Command, Sockets};

type SharedDevice = Arc<Mutex<VirtualDevice>>;

/// What every task needs to publish its results
#[derive(Clone)]
struct Context {
    device: SharedDevice,
    sockets: Sockets,
    events: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl Context {
    /// Runs `handle` on the locked device, then sends what it produced
    async fn with_device(&self, handle: impl FnOnce(&mut VirtualDevice, &mut Outbox)) {
        let mut out = Outbox::new();
        {
            let mut device = self.device.lock().await;
            handle(&mut *device, &mut out);
        }
        flush(&self.sockets, &self.events, &mut out).await;
    }
}

async fn receive(ctx: Context, port: Port, socket: Arc<UdpSocket>) {
    let mut frames = UdpFramed::new(socket, DatagramCodec::new(port));
    loop {
        let next = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            next = frames.next() => next,
        };

        match next {
            Some(Ok((datagram, from))) => {
                ctx.with_device(|device, out| {
                    if let Err(e) = device.handle_datagram(port, &datagram.payload, from, Instant::now(), out) {
                        trace!(%port, peer = %from, error = %e, "discarded datagram");
                    }
                })
                .await;
            }
            Some(Err(e)) => warn!(%port, error = %e, "failed to receive datagram"),
            None => break,
        }
    }
    trace!(%port, "receiver stopped");
}

async fn every<F>(ctx: Context, period: Duration, mut tick: F)
where
    F: FnMut(&mut VirtualDevice, Instant, &mut Outbox),
{
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // skip the immediate first tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = ticker.tick() => {
                ctx.with_device(|device, out| tick(device, Instant::now(), out)).await;
            }
        }
    }
}

pub(crate) async fn run(
    device: VirtualDevice,
    sockets: Sockets,
    mut commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<Event>,
) {
    let number = device.device_number();
    let status_interval = device.config().status_interval;
    let keepalive_interval = device.config().keepalive_interval;

    let ctx = Context {
        device: Arc::new(Mutex::new(device)),
        sockets: sockets.clone(),
        events,
        cancel: CancellationToken::new(),
    };

    let mut tasks: JoinSet<()> = JoinSet::new();
    let receivers = [
        (Port::Discovery, sockets.discovery.clone()),
        (Port::Discovery, sockets.discovery_unicast.clone()),
        (Port::Beat, sockets.beat.clone()),
        (Port::Beat, sockets.beat_unicast.clone()),
        (Port::Status, sockets.status.clone()),
    ];
    for (port, socket) in receivers {
        tasks.spawn(receive(ctx.clone(), port, socket));
    }
    tasks.spawn(every(ctx.clone(), status_interval, |device, now, out| {
        device.send_status(out);
        device.expire_play_state(now);
    }));
    tasks.spawn(every(ctx.clone(), keepalive_interval, |device, now, out| {
        device.send_keepalive(now, out)
    }));
    info!(device = number, tasks = tasks.len(), "socket tasks started");

    loop {
        let Some(command) = commands.recv().await else {
            debug!("all device handles dropped");
            break;
        };
        let mut running = true;
        ctx.with_device(|device, out| running = apply_command(device, command, Instant::now(), out))
            .await;
        if !running {
            break;
        }
    }

    ctx.cancel.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "socket task failed");
        }
    }

    info!(device = number, "socket tasks stopped");
    sockets.close();
    // no subscribers is fine
    let _ = ctx.events.send(Event::Stopped);
}
