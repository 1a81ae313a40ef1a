// ABOUTME: Composes N Networks behind one API: start/stop/send fan out to
// ABOUTME: every configured endpoint with no cross-network ordering guarantee

use super::network::Network;
use crate::cache::{FrameId, PacketCache};
use crate::error::ClientError;
use crate::events::BridgeSenders;
use crate::settings::ConnectionSettings;
use std::sync::Arc;

pub struct NetworkManager {
    networks: Vec<Arc<Network>>,
}

impl NetworkManager {
    pub fn new(
        connections: &[ConnectionSettings],
        cache: PacketCache,
        senders: BridgeSenders,
    ) -> Result<Self, ClientError> {
        let networks = connections
            .iter()
            .map(|settings| {
                Network::new(settings.clone(), cache.clone(), senders.clone()).map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(NetworkManager { networks })
    }

    pub async fn start(&self) {
        for network in &self.networks {
            network.start().await;
        }
    }

    pub async fn stop(&self) {
        for network in &self.networks {
            network.stop().await;
        }
    }

    /// Forwards a cached frame to every Network for fan-out to its clients.
    pub async fn send(&self, id: FrameId) {
        let handles: Vec<_> = self
            .networks
            .iter()
            .cloned()
            .map(|network| tokio::spawn(async move { network.send(id).await }))
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}
