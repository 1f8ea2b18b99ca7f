//! Network management and scheduling
//!
//! This module owns the device's sockets, the backline of peers and the two schedulers
//! that drive a [`VirtualDevice`]: a single task multiplexing every socket with the status
//! timer, or one task per socket class sharing the device behind a lock. Callers talk to
//! either through a [`DeviceHandle`].

pub mod backline;
mod connection;
mod dispatch;
mod tasks;

pub use self::backline::{Backline, Peer, Upsert};
pub use self::connection::Sockets;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::{
    DeviceSnapshot,
    Error,
    Event,
    NumberStore,
    Outbox,
    Result,
    Scheduling,
    VirtualDevice,
};

/// Capacity of the command queue
const COMMAND_CAPACITY: usize = 64;

/// Events buffered per subscriber before the slowest one starts lagging
const EVENT_CAPACITY: usize = 256;

/// Requests handled by the scheduler that owns the device
#[derive(Debug)]
pub enum Command {
    /// Stop the scheduler and close the sockets
    Stop,
    RequestMaster,
    /// Broadcast one beat, optionally changing tempo or bar position
    Beat { bpm: Option<f32>, bar_pos: Option<u8> },
    SetBpm(f32),
    /// Fixed-point pitch, 0x100000 for none
    SetPitch(u32),
    SetPlaying(bool),
    SetSync(bool),
    /// Turn sync on or off on another player
    SyncPeer { device: u8, on: bool },
    Snapshot(oneshot::Sender<DeviceSnapshot>),
}

/// Applies one command, returning false once the scheduler should stop
pub(crate) fn apply_command(device: &mut VirtualDevice, command: Command, now: Instant, out: &mut Outbox) -> bool {
    match command {
        Command::Stop => return false,
        Command::RequestMaster => device.request_master(out),
        Command::Beat { bpm, bar_pos } => device.broadcast_beat(bpm, bar_pos, now, out),
        Command::SetBpm(bpm) => device.set_bpm(bpm),
        Command::SetPitch(pitch) => device.set_pitch(pitch),
        Command::SetPlaying(playing) => device.set_playing(playing),
        Command::SetSync(synced) => device.set_synced(synced),
        Command::SyncPeer { device: target, on } => {
            if let Err(e) = device.send_sync_control(target, on, out) {
                warn!(device = target, error = %e, "sync control not sent");
            }
        }
        Command::Snapshot(reply) => {
            // the caller may have given up waiting
            let _ = reply.send(device.snapshot());
        }
    }
    true
}

/// Sends queued frames and publishes queued events
pub(crate) async fn flush(sockets: &Sockets, events: &broadcast::Sender<Event>, out: &mut Outbox) {
    for outbound in out.packets.drain(..) {
        if let Err(e) = sockets.send(&outbound).await {
            warn!(dest = ?outbound.dest, error = %e, "failed to send frame");
        }
    }
    for event in out.events.drain(..) {
        // no subscribers is fine
        let _ = events.send(event);
    }
}

/// Handle for controlling a running device
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<Event>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl DeviceHandle {
    /// Starts the scheduler selected by the device configuration
    ///
    /// The device must already hold its number.
    pub fn spawn(device: VirtualDevice, sockets: Sockets) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let scheduling = device.config().scheduling;
        debug!(device = device.device_number(), ?scheduling, "starting scheduler");
        let task = match scheduling {
            Scheduling::SingleLoop => tokio::spawn(dispatch::run(device, sockets, command_rx, events.clone())),
            Scheduling::PerSocket => tokio::spawn(tasks::run(device, sockets, command_rx, events.clone())),
        };

        DeviceHandle {
            commands,
            events,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    #[cfg(test)]
    pub(crate) fn from_parts(commands: mpsc::Sender<Command>, events: broadcast::Sender<Event>) -> Self {
        DeviceHandle { commands, events, task: Arc::new(Mutex::new(None)) }
    }

    /// Receiver for every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| Error::closed("device scheduler has stopped"))
    }

    pub async fn request_master(&self) -> Result<()> {
        self.send(Command::RequestMaster).await
    }

    pub async fn beat(&self, bpm: Option<f32>, bar_pos: Option<u8>) -> Result<()> {
        self.send(Command::Beat { bpm, bar_pos }).await
    }

    pub async fn set_bpm(&self, bpm: f32) -> Result<()> {
        self.send(Command::SetBpm(bpm)).await
    }

    pub async fn set_pitch(&self, pitch: u32) -> Result<()> {
        self.send(Command::SetPitch(pitch)).await
    }

    pub async fn set_playing(&self, playing: bool) -> Result<()> {
        self.send(Command::SetPlaying(playing)).await
    }

    pub async fn set_sync(&self, synced: bool) -> Result<()> {
        self.send(Command::SetSync(synced)).await
    }

    pub async fn sync_peer(&self, device: u8, on: bool) -> Result<()> {
        self.send(Command::SyncPeer { device, on }).await
    }

    /// Current device state, as seen by the scheduler
    pub async fn snapshot(&self) -> Result<DeviceSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Snapshot(reply)).await?;
        rx.await.map_err(|_| Error::closed("device scheduler has stopped"))
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Stops the scheduler and waits until it has closed the sockets
    pub async fn shutdown(&self) -> Result<()> {
        // already stopped is not an error here
        let _ = self.commands.send(Command::Stop).await;
        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.await
                .map_err(|e| Error::invalid_state(format!("device scheduler failed: {}", e)))?;
        }
        Ok(())
    }
}

/// Opens the sockets, claims a number and starts the scheduler
pub async fn start(mut device: VirtualDevice, store: &dyn NumberStore) -> Result<DeviceHandle> {
    let mut sockets = Sockets::open(device.identity(), device.config().ports).await?;
    device.claim_number(&mut sockets, store).await?;
    Ok(DeviceHandle::spawn(device, sockets))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use tokio::net::UdpSocket;
    use tokio::sync::broadcast::error::RecvError;
    use tokio::time::timeout;

    use super::connection::tests::{free_ports, loopback_identity};
    use super::*;
    use crate::core::{Config, MemoryStore, Model, Port};
    use crate::protocol::{builder, Frame, NegotiationState};

    const PEER_IP: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

    async fn next_event(events: &mut broadcast::Receiver<Event>, wanted: impl Fn(&Event) -> bool) -> Event {
        let wait = async {
            loop {
                match events.recv().await {
                    Ok(event) if wanted(&event) => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("event channel closed"),
                }
            }
        };
        timeout(Duration::from_secs(5), wait).await.expect("timed out waiting for event")
    }

    async fn run_against_peer(scheduling: Scheduling) {
        let identity = loopback_identity();
        let config = Config {
            ports: free_ports(),
            reply_wait: Duration::from_millis(10),
            scheduling,
            number_file: None,
            ..Config::default()
        };
        let ports = config.ports;
        let device =
            VirtualDevice::with_config(identity.mac, identity.ip, identity.netmask, identity.broadcast, 2, config)
                .unwrap();

        let handle = start(device, &MemoryStore::new()).await.unwrap();
        let mut events = handle.subscribe();

        // a player at another loopback address announces itself
        let peer = UdpSocket::bind((PEER_IP, ports.status)).await.unwrap();
        let keepalive = builder::keepalive(Model::Cdj, 3, [0x02, 0, 0, 0, 0, 0x03], PEER_IP, 2);
        peer.send_to(&keepalive, (Ipv4Addr::LOCALHOST, ports.discovery)).await.unwrap();

        let joined = next_event(&mut events, |e| matches!(e, Event::PeerJoined { .. })).await;
        assert_eq!(joined, Event::PeerJoined { device: 3, ip: PEER_IP, returned: false });

        let mut buf = [0u8; 512];
        let (len, _) = timeout(Duration::from_secs(2), peer.recv_from(&mut buf)).await.unwrap().unwrap();
        match Frame::parse(&buf[..len], Port::Status).unwrap() {
            Frame::Status(status) => assert_eq!(status.device_number(), 2),
            other => panic!("unexpected frame {:?}", other),
        }

        handle.request_master().await.unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.master);
        assert_eq!(snapshot.state, NegotiationState::Active);
        assert_eq!(snapshot.device_number, 2);
        assert_eq!(snapshot.peers.len(), 1);

        handle.shutdown().await.unwrap();
        next_event(&mut events, |e| *e == Event::Stopped).await;
        assert!(handle.request_master().await.is_err());
    }

    #[tokio::test]
    async fn test_single_loop_against_peer() {
        run_against_peer(Scheduling::SingleLoop).await;
    }

    #[tokio::test]
    async fn test_per_socket_tasks_against_peer() {
        run_against_peer(Scheduling::PerSocket).await;
    }

    #[tokio::test]
    async fn test_commands_apply_to_device() {
        let mut device = crate::core::device::tests::device(1);
        let mut out = Outbox::new();
        let now = Instant::now();

        assert!(apply_command(&mut device, Command::SetBpm(130.0), now, &mut out));
        assert!(apply_command(&mut device, Command::SetPitch(0x0011_0000), now, &mut out));
        assert!(apply_command(&mut device, Command::Beat { bpm: None, bar_pos: Some(2) }, now, &mut out));
        assert!(apply_command(&mut device, Command::SetSync(true), now, &mut out));

        let (reply, rx) = oneshot::channel();
        assert!(apply_command(&mut device, Command::Snapshot(reply), now, &mut out));
        let snapshot = rx.await.unwrap();
        assert_eq!(snapshot.bpm, 130.0);
        assert_eq!(snapshot.pitch, 0x0011_0000);
        assert_eq!(snapshot.bar_index, 1);
        assert!(snapshot.playing && snapshot.synced);
        assert_eq!(out.packets.len(), 1);

        assert!(!apply_command(&mut device, Command::Stop, now, &mut out));
    }
}
