// ABOUTME: The serial subsystem: port discovery plus the transport that owns
// ABOUTME: the open port, its reader/writer threads, and reconnection

mod discovery;
mod transport;

pub use discovery::find_port;
pub use transport::{SerialTransport, BAUD_RATE, MAX_BUFFER_LENGTH, SEND_DELAY};
