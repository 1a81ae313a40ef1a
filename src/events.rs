// ABOUTME: The fixed set of events that flow into the Bridge, wired up as
// ABOUTME: plain tokio channels connected at construction time rather than
// ABOUTME: through a generic pub/sub dispatcher

use crate::cache::FrameId;
use crate::packet::Frame;
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// A frame arrived from the serial bus.
#[derive(Debug, Clone, Copy)]
pub struct BusReceive(pub FrameId);

/// The serial writer actually committed a frame to the wire.
#[derive(Debug, Clone, Copy)]
pub struct BusSent(pub FrameId);

/// The serial reader or writer hit an I/O error.
#[derive(Debug, Clone, Copy)]
pub struct BusFault;

/// A frame arrived from a TCP client.
#[derive(Debug, Clone, Copy)]
pub struct TcpReceive(pub FrameId);

/// A TCP client's connection closed.
#[derive(Debug, Clone, Copy)]
pub struct ClientClose(pub SocketAddr);

/// The NTP broadcaster asking the Bridge to inject a frame onto the bus.
/// This is the "Bridge's send-injection entry point" the NTP module talks
/// about: the broadcaster never touches the serial transport directly.
#[derive(Debug, Clone)]
pub struct NtpEmit(pub Frame);

/// Sender handles for every event the Bridge subscribes to. Cloned into
/// whichever component produces each event (the serial transport, the
/// network manager, the NTP broadcaster) at construction time.
#[derive(Clone)]
pub struct BridgeSenders {
    pub bus_receive: mpsc::UnboundedSender<BusReceive>,
    pub bus_sent: mpsc::UnboundedSender<BusSent>,
    pub bus_fault: mpsc::UnboundedSender<BusFault>,
    pub tcp_receive: mpsc::UnboundedSender<TcpReceive>,
    pub client_close: mpsc::UnboundedSender<ClientClose>,
    pub ntp_emit: mpsc::UnboundedSender<NtpEmit>,
}

/// The Bridge's corresponding receive ends.
pub struct BridgeReceivers {
    pub bus_receive: mpsc::UnboundedReceiver<BusReceive>,
    pub bus_sent: mpsc::UnboundedReceiver<BusSent>,
    pub bus_fault: mpsc::UnboundedReceiver<BusFault>,
    pub tcp_receive: mpsc::UnboundedReceiver<TcpReceive>,
    pub client_close: mpsc::UnboundedReceiver<ClientClose>,
    pub ntp_emit: mpsc::UnboundedReceiver<NtpEmit>,
}

/// Builds a connected `(senders, receivers)` pair.
pub fn channel() -> (BridgeSenders, BridgeReceivers) {
    let (bus_receive_tx, bus_receive_rx) = mpsc::unbounded_channel();
    let (bus_sent_tx, bus_sent_rx) = mpsc::unbounded_channel();
    let (bus_fault_tx, bus_fault_rx) = mpsc::unbounded_channel();
    let (tcp_receive_tx, tcp_receive_rx) = mpsc::unbounded_channel();
    let (client_close_tx, client_close_rx) = mpsc::unbounded_channel();
    let (ntp_emit_tx, ntp_emit_rx) = mpsc::unbounded_channel();

    (
        BridgeSenders {
            bus_receive: bus_receive_tx,
            bus_sent: bus_sent_tx,
            bus_fault: bus_fault_tx,
            tcp_receive: tcp_receive_tx,
            client_close: client_close_tx,
            ntp_emit: ntp_emit_tx,
        },
        BridgeReceivers {
            bus_receive: bus_receive_rx,
            bus_sent: bus_sent_rx,
            bus_fault: bus_fault_rx,
            tcp_receive: tcp_receive_rx,
            client_close: client_close_rx,
            ntp_emit: ntp_emit_rx,
        },
    )
}
