// ABOUTME: The routing hub: wires bus-receive/bus-sent/bus-fault/tcp-receive/
// ABOUTME: client-close events between the serial transport, the network
// ABOUTME: manager, and the NTP broadcaster, and gates the writer on bus status

use crate::bus_status::BusStatus;
use crate::cache::PacketCache;
use crate::error::BridgeError;
use crate::events::{self, BridgeReceivers, BridgeSenders};
use crate::ntp::NtpBroadcaster;
use crate::packet::Frame;
use crate::serial::SerialTransport;
use crate::settings::Settings;
use crate::tcp::NetworkManager;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Owns every long-lived component and routes events between them.
pub struct Bridge {
    cache: PacketCache,
    senders: BridgeSenders,
    serial: Arc<SerialTransport>,
    network: Arc<NetworkManager>,
    ntp: Arc<NtpBroadcaster>,
    router: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Bridge {
    pub fn new(settings: Settings) -> Result<Arc<Bridge>, BridgeError> {
        let cache = PacketCache::new();
        let (senders, receivers) = events::channel();

        let serial = Arc::new(SerialTransport::new(settings.serial, cache.clone(), senders.clone()));
        let network = Arc::new(NetworkManager::new(&settings.connections, cache.clone(), senders.clone())?);
        let ntp = Arc::new(NtpBroadcaster::new(settings.ntp, senders.clone()));

        let bridge = Arc::new(Bridge {
            cache,
            senders,
            serial,
            network,
            ntp,
            router: Mutex::new(None),
        });

        bridge.spawn_router(receivers);
        Ok(bridge)
    }

    fn spawn_router(self: &Arc<Self>, receivers: BridgeReceivers) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move { this.route(receivers).await });
        // Fire-and-forget: every producer (including `self`) holds its own
        // sender clone for the process lifetime, so this task simply idles
        // once `stop()` silences its sources; it's reclaimed at process exit.
        drop(handle);
    }

    /// Central event loop: the single task that mutates `BusStatus` and
    /// decides what each inbound event fans out to.
    async fn route(self: Arc<Self>, mut receivers: BridgeReceivers) {
        let mut bus_status = BusStatus::new();

        loop {
            tokio::select! {
                Some(events::BusReceive(id)) = receivers.bus_receive.recv() => {
                    self.on_bus_receive(&mut bus_status, id).await;
                }
                Some(events::BusSent(id)) = receivers.bus_sent.recv() => {
                    self.network.send(id).await;
                    let _ = self.cache.remove(id);
                }
                Some(events::BusFault) = receivers.bus_fault.recv() => {
                    warn!("bus fault reported, reconnection supervisor will retry");
                }
                Some(events::TcpReceive(id)) = receivers.tcp_receive.recv() => {
                    self.on_tcp_receive(id).await;
                }
                Some(events::ClientClose(addr)) = receivers.client_close.recv() => {
                    info!(%addr, "client connection closed");
                }
                Some(events::NtpEmit(frame)) = receivers.ntp_emit.recv() => {
                    self.send(frame);
                }
                else => break,
            }
        }
    }

    async fn on_bus_receive(&self, bus_status: &mut BusStatus, id: crate::cache::FrameId) {
        let frame = match self.cache.get(id) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, "bus-receive event for a frame no longer in cache");
                return;
            }
        };

        let transition = bus_status.observe(&frame);
        if transition.became_dead() {
            info!("bus went inactive, locking serial writer");
            self.serial.lock();
        } else if transition.became_alive() {
            info!("bus became active, unlocking serial writer");
            self.serial.unlock();
        }

        self.network.send(id).await;
        let _ = self.cache.remove(id);
    }

    async fn on_tcp_receive(&self, id: crate::cache::FrameId) {
        if !self.serial.is_active() {
            return;
        }
        if let Err(err) = self.serial.send(id) {
            warn!(%err, "dropping TCP-origin frame");
        }
    }

    /// Registers a frame and enqueues it on the serial writer. Used by the
    /// NTP broadcaster's send-injection path.
    fn send(&self, frame: Frame) {
        let id = self.cache.insert(frame);
        if let Err(err) = self.serial.send(id) {
            warn!(%err, "dropping NTP frame");
        }
    }

    pub async fn start(self: &Arc<Self>) {
        self.serial.ensure().await;
        self.network.start().await;
        self.ntp.start();
    }

    pub async fn stop(&self) {
        self.ntp.stop().await;
        self.serial.stop().await;
        self.network.stop().await;
    }
}
