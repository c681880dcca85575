#![allow(
    clippy::allow_attributes,
    reason = "Needed for lints that don't follow expect"
)]

use libp2p::swarm::SwarmEvent;
use tracing::{debug, info, trace};

use crate::{BehaviourEvent, NetworkManager};

#[allow(
    clippy::multiple_inherent_impl,
    reason = "Swarm event handling is kept apart from the command loop"
)]
impl NetworkManager {
    pub(crate) fn handle_swarm_event(&mut self, event: SwarmEvent<BehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(%address, local_peer_id = %self.swarm.local_peer_id(), "Listening");
            }
            SwarmEvent::ConnectionEstablished {
                peer_id, endpoint, ..
            } => {
                debug!(
                    %peer_id,
                    address = %endpoint.get_remote_address(),
                    "Connection established"
                );
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                cause,
                ..
            } => {
                debug!(%peer_id, num_established, ?cause, "Connection closed");

                if num_established == 0 {
                    self.streams.forget_peer(&peer_id);
                }
            }
            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                debug!(?peer_id, %error, "Outgoing connection failed");
            }
            SwarmEvent::Behaviour(event) => trace!(?event, "Behaviour event"),
            _ => {}
        }
    }
}
