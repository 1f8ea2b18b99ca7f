use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::core::{Destination, Error, Identity, Outbound, Ports, Result};
use crate::protocol::ClaimChannel;

/// The device's UDP sockets
///
/// Broadcast traffic is received on sockets bound to the broadcast address and unicast
/// traffic on sockets bound to the device address. Status frames and other unicast
/// replies leave through a separate socket on an ephemeral port.
#[derive(Debug, Clone)]
pub struct Sockets {
    pub(crate) discovery: Arc<UdpSocket>,
    pub(crate) discovery_unicast: Arc<UdpSocket>,
    pub(crate) beat: Arc<UdpSocket>,
    pub(crate) beat_unicast: Arc<UdpSocket>,
    pub(crate) status: Arc<UdpSocket>,
    send: Arc<UdpSocket>,
    broadcast: Ipv4Addr,
    ports: Ports,
}

fn bind(addr: SocketAddrV4, broadcast: bool) -> Result<UdpSocket> {
    let open = || -> std::io::Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        if broadcast {
            socket.set_broadcast(true)?;
        }
        socket.set_nonblocking(true)?;
        socket.bind(&SockAddr::from(addr))?;
        UdpSocket::from_std(socket.into())
    };
    open().map_err(|e| Error::network(format!("failed to bind {}: {}", addr, e)))
}

impl Sockets {
    /// Opens and binds every socket for `identity`
    ///
    /// Any failure here is fatal to the device instance.
    pub async fn open(identity: &Identity, ports: Ports) -> Result<Self> {
        let ip = identity.ip;
        let broadcast = identity.broadcast;

        let sockets = Sockets {
            discovery: Arc::new(bind(SocketAddrV4::new(broadcast, ports.discovery), true)?),
            discovery_unicast: Arc::new(bind(SocketAddrV4::new(ip, ports.discovery), false)?),
            beat: Arc::new(bind(SocketAddrV4::new(broadcast, ports.beat), true)?),
            beat_unicast: Arc::new(bind(SocketAddrV4::new(ip, ports.beat), false)?),
            status: Arc::new(bind(SocketAddrV4::new(ip, ports.status), false)?),
            send: Arc::new(bind(SocketAddrV4::new(ip, 0), true)?),
            broadcast,
            ports,
        };

        info!(%ip, %broadcast, ?ports, "sockets open");
        Ok(sockets)
    }

    pub fn ports(&self) -> Ports {
        self.ports
    }

    /// Resolves a destination to the sending socket and target address
    fn route(&self, dest: Destination) -> (&UdpSocket, SocketAddr) {
        match dest {
            Destination::DiscoveryBroadcast => (
                self.discovery.as_ref(),
                SocketAddr::V4(SocketAddrV4::new(self.broadcast, self.ports.discovery)),
            ),
            Destination::BeatBroadcast => {
                (self.beat.as_ref(), SocketAddr::V4(SocketAddrV4::new(self.broadcast, self.ports.beat)))
            }
            Destination::Unicast(addr) => (self.send.as_ref(), SocketAddr::V4(addr)),
        }
    }

    /// Sends one outgoing frame
    pub async fn send(&self, outbound: &Outbound) -> Result<()> {
        let (socket, target) = self.route(outbound.dest);
        socket.send_to(&outbound.packet, target).await?;
        Ok(())
    }

    /// Releases the sockets held by this copy
    pub fn close(self) {
        debug!(broadcast = %self.broadcast, "closing sockets");
    }
}

impl ClaimChannel for Sockets {
    async fn broadcast(&mut self, packet: &[u8]) -> Result<()> {
        let target = SocketAddrV4::new(self.broadcast, self.ports.discovery);
        self.discovery.send_to(packet, target).await?;
        Ok(())
    }

    async fn recv_reply(&mut self, buf: &mut [u8], wait: Duration) -> Result<Option<usize>> {
        match timeout(wait, self.discovery_unicast.recv_from(buf)).await {
            Ok(Ok((len, _))) => Ok(Some(len)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }
}
