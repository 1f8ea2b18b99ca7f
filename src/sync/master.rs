//! Tempo master election
//!
//! Mastership moves between players with an indirect handshake. The requester unicasts
//! a master request to the current master's beat port. The master answers once and names
//! the requester in the new-master byte of its following status frames. The requester
//! takes over when it sees its own number there, and the old master steps down when the
//! requester's status reports master state on.

use std::net::{SocketAddr, SocketAddrV4};

use tracing::{debug, info, warn};

use crate::core::{Destination, Error, Event, MasterState, Outbox, Result, VirtualDevice};
use crate::protocol::{builder, GenericFrame};

impl VirtualDevice {
    fn take_master(&mut self, out: &mut Outbox) {
        self.master = true;
        self.master_requested = false;
        self.backline.set_master_id(Some(self.number));
        let sync_counter = self.backline.bump_sync_counter();
        info!(device = self.number, sync_counter, "became tempo master");
        out.emit(Event::MasterAcquired { sync_counter });
    }

    fn release_master(&mut self, to: u8, out: &mut Outbox) {
        self.master = false;
        self.master_req = None;
        self.backline.set_master_id(Some(to));
        info!(device = self.number, to, "handed over tempo master");
        out.emit(Event::MasterReleased { to });
    }

    /// Asks for tempo mastership
    ///
    /// Without a live master on the network the device takes over at once. Otherwise a
    /// master request goes to the current master and the handoff completes when its
    /// status frames name us.
    pub fn request_master(&mut self, out: &mut Outbox) {
        if self.master {
            return;
        }

        let port = self.config.ports.beat;
        let current = self
            .backline
            .master_id()
            .and_then(|id| self.backline.get(id))
            .filter(|peer| !peer.gone)
            .map(|peer| (peer.number, peer.addr(port)));

        match current {
            None => self.take_master(out),
            Some((master, addr)) => {
                debug!(device = self.number, master, "requesting tempo master");
                out.send(Destination::Unicast(addr), builder::master_request(self.identity.model, self.number));
                self.master_requested = true;
            }
        }
    }

    fn beat_addr(&self, device: u8, from: SocketAddr) -> Option<SocketAddrV4> {
        let port = self.config.ports.beat;
        match self.backline.get(device) {
            Some(peer) if !peer.gone => Some(peer.addr(port)),
            _ => match from {
                SocketAddr::V4(addr) => Some(SocketAddrV4::new(*addr.ip(), port)),
                SocketAddr::V6(_) => None,
            },
        }
    }

    pub(crate) fn handle_master_request(&mut self, frame: &GenericFrame<'_>, from: SocketAddr, out: &mut Outbox) {
        let requester = frame.device_number();
        if !self.master {
            debug!(device = self.number, requester, "master request while not master");
            return;
        }
        if self.master_req == Some(requester) {
            return;
        }
        let Some(addr) = self.beat_addr(requester, from) else {
            warn!(requester, peer = %from, "no address for master request");
            return;
        };

        info!(device = self.number, requester, "granting tempo master");
        out.send(Destination::Unicast(addr), builder::master_response(self.identity.model, self.number));
        self.master_req = Some(requester);
        out.emit(Event::MasterRequested { by: requester });
    }

    pub(crate) fn handle_master_response(&mut self, frame: &GenericFrame<'_>, out: &mut Outbox) {
        let from = frame.device_number();
        let ok = frame.master_ok();
        debug!(device = self.number, from, ok, "master response");
        if !ok {
            self.master_requested = false;
        }
        out.emit(Event::MasterResponse { from, ok });
    }

    /// Applies the master fields of a status frame from `sender`
    pub(crate) fn observe_master(
        &mut self,
        sender: u8,
        state: MasterState,
        new_master: Option<u8>,
        out: &mut Outbox,
    ) {
        if matches!(state, MasterState::On | MasterState::NoBeatGrid) {
            if self.master && self.master_req == Some(sender) {
                self.release_master(sender, out);
            } else if !self.master && self.backline.master_id() != Some(sender) {
                debug!(device = self.number, master = sender, "tempo master observed");
                self.backline.set_master_id(Some(sender));
            }
        }

        match new_master {
            Some(target) if target == self.number => {
                if !self.master {
                    self.take_master(out);
                }
            }
            Some(target) => {
                for peer in self.backline.peers_mut() {
                    if peer.number != target {
                        peer.master_state = MasterState::Off;
                    }
                }
            }
            None => {}
        }
    }

    pub(crate) fn handle_sync_control(&mut self, frame: &GenericFrame<'_>, out: &mut Outbox) {
        let from = frame.device_number();
        let Some(on) = frame.sync_request() else {
            debug!(device = self.number, from, "sync control without a state");
            return;
        };
        self.synced = on;
        info!(device = self.number, from, on, "sync control");
        out.emit(Event::SyncControl { from, on });
    }

    /// Tells a peer to turn sync on or off
    pub fn send_sync_control(&mut self, device: u8, on: bool, out: &mut Outbox) -> Result<()> {
        let port = self.config.ports.beat;
        let addr = self
            .backline
            .get(device)
            .filter(|peer| !peer.gone)
            .map(|peer| peer.addr(port))
            .ok_or_else(|| Error::invalid_state(format!("device {} is not on the network", device)))?;
        out.send(Destination::Unicast(addr), builder::sync_control(self.identity.model, self.number, on));
        Ok(())
    }
}
