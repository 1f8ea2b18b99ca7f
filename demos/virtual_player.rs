use std::env;
use std::net::Ipv4Addr;

use prolink_vdj::core::{parse_mac, Config, DeviceFlags, Event, FileStore, MemoryStore, NumberStore, Scheduling};
use prolink_vdj::time::BeatClock;
use prolink_vdj::util::{flags_to_string, pitch_to_string};
use prolink_vdj::{network, VirtualDevice};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[tokio::main]
async fn main() -> prolink_vdj::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Usage: virtual_player <ip> [netmask] [bpm]
    let mut args = env::args().skip(1);
    let ip: Ipv4Addr = args
        .next()
        .and_then(|a| a.parse().ok())
        .ok_or_else(|| prolink_vdj::Error::config("usage: virtual_player <ip> [netmask] [bpm]"))?;
    let netmask: Ipv4Addr = args.next().and_then(|a| a.parse().ok()).unwrap_or(Ipv4Addr::new(255, 255, 255, 0));
    let bpm: f32 = args.next().and_then(|a| a.parse().ok()).unwrap_or(120.0);

    let mac = env::var("VDJ_MAC").ok().and_then(|m| parse_mac(&m)).unwrap_or([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
    let flags = env_or("VDJ_FLAGS", DeviceFlags::AUTO_NUMBER);

    let mut config = Config::default();
    if env::var("VDJ_PER_SOCKET").is_ok() {
        config.scheduling = Scheduling::PerSocket;
    }
    let store: Box<dyn NumberStore> = match &config.number_file {
        Some(path) => Box::new(FileStore::new(path.clone())),
        None => Box::new(MemoryStore::new()),
    };

    let device = VirtualDevice::with_config(mac, ip, netmask, Ipv4Addr::UNSPECIFIED, flags, config)?;
    let handle = network::start(device, store.as_ref()).await?;
    let mut events = handle.subscribe();

    let clock = BeatClock::spawn(handle.clone(), bpm);
    handle.request_master().await?;

    let snapshot = handle.snapshot().await?;
    info!(device = snapshot.device_number, bpm, "virtual player running, ctrl-c to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(Event::PeerJoined { device, ip, returned }) => info!(device, %ip, returned, "peer joined"),
                Ok(Event::PeerGone { device }) => info!(device, "peer gone"),
                Ok(Event::Status { device, bpm, pitch, flags, .. }) => {
                    debug!(device, bpm, pitch = %pitch_to_string(pitch), flags = %flags_to_string(flags), "status")
                }
                Ok(Event::MasterAcquired { sync_counter }) => info!(sync_counter, "we are tempo master"),
                Ok(Event::MasterReleased { to }) => info!(to, "tempo master handed over"),
                Ok(Event::Collision { device, ip }) => warn!(device, %ip, "device number collision"),
                Ok(Event::Stopped) | Err(RecvError::Closed) => break,
                Ok(_) => {}
                Err(RecvError::Lagged(missed)) => warn!(missed, "event receiver lagging"),
            },
        }
    }

    clock.stop().await;
    handle.shutdown().await?;
    info!("stopped");
    Ok(())
}
