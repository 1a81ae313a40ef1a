// ABOUTME: The TCP side: per-connection Client handling, a listening Network,
// ABOUTME: and a NetworkManager composing several Networks behind one API

mod client;
mod manager;
mod network;

pub use manager::NetworkManager;
pub use network::Network;
