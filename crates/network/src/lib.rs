//! libp2p transport for the block sync protocol.
//!
//! [`Host`] is the seam the sync layer talks to. [`NetworkClient`] implements
//! it on top of a swarm driven by [`NetworkManager`].

use std::sync::Arc;

use eyre::Result as EyreResult;
use futures_util::StreamExt;
use libp2p::identify::{Behaviour as IdentifyBehaviour, Config as IdentifyConfig};
use libp2p::noise::Config as NoiseConfig;
use libp2p::ping::Behaviour as PingBehaviour;
use libp2p::swarm::{NetworkBehaviour, Swarm};
use libp2p::tcp::Config as TcpConfig;
use libp2p::yamux::Config as YamuxConfig;
use libp2p::SwarmBuilder;
use libp2p_stream::Behaviour as StreamBehaviour;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio::{select, spawn};
use tracing::{debug, warn};

use crate::client::{Command, NetworkClient};
use crate::config::NetworkConfig;
use crate::connections::ConnectionManager;
use crate::stream::StreamRegistry;

pub mod client;
pub mod config;
pub mod connections;
mod events;
pub mod host;
pub mod stream;

pub use host::{Host, SendError};
pub use libp2p::{PeerId, StreamProtocol};
pub use stream::{CodecError, SyncStream};

const PROTOCOL_VERSION: &str = concat!("/", env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

#[derive(NetworkBehaviour)]
struct Behaviour {
    identify: IdentifyBehaviour,
    ping: PingBehaviour,
    stream: StreamBehaviour,
}

/// Starts the network and returns a client together with the handle of the
/// task driving the swarm.
pub async fn run(config: &NetworkConfig) -> EyreResult<(NetworkClient, JoinHandle<()>)> {
    let (client, manager) = init(config)?;

    let handle = spawn(manager.run());

    for addr in &config.swarm.listen {
        client.listen_on(addr.clone()).await?;
    }

    for addr in &config.bootstrap.nodes.list {
        if let Err(err) = client.dial(addr.clone()).await {
            warn!(%addr, %err, "Failed to dial bootstrap node");
        }
    }

    Ok((client, handle))
}

fn init(config: &NetworkConfig) -> EyreResult<(NetworkClient, NetworkManager)> {
    let swarm = SwarmBuilder::with_existing_identity(config.identity.clone())
        .with_tokio()
        .with_tcp(
            TcpConfig::default(),
            NoiseConfig::new,
            YamuxConfig::default,
        )?
        .with_behaviour(|key| Behaviour {
            identify: IdentifyBehaviour::new(IdentifyConfig::new(
                PROTOCOL_VERSION.to_owned(),
                key.public(),
            )),
            ping: PingBehaviour::default(),
            stream: StreamBehaviour::new(),
        })?
        .with_swarm_config(|cfg| {
            cfg.with_idle_connection_timeout(config.connections.idle_timeout)
        })
        .build();

    let control = swarm.behaviour().stream.new_control();

    let (command_sender, command_receiver) = mpsc::channel(32);
    let streams = Arc::new(StreamRegistry::default());
    let connections = Arc::new(Mutex::new(ConnectionManager::new()));

    let client = NetworkClient::new(
        command_sender,
        control,
        Arc::clone(&streams),
        Arc::clone(&connections),
    );

    let manager = NetworkManager {
        swarm: Box::new(swarm),
        command_receiver,
        streams,
        connections,
        max_peers: config.connections.max_peers,
        prune_interval: config.connections.prune_interval,
    };

    Ok((client, manager))
}

/// Drives the swarm: executes client commands, tracks connections and prunes
/// unprotected peers above the configured limit.
pub struct NetworkManager {
    swarm: Box<Swarm<Behaviour>>,
    command_receiver: mpsc::Receiver<Command>,
    streams: Arc<StreamRegistry>,
    connections: Arc<Mutex<ConnectionManager>>,
    max_peers: usize,
    prune_interval: Duration,
}

impl core::fmt::Debug for NetworkManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NetworkManager")
            .field("local_peer_id", self.swarm.local_peer_id())
            .field("max_peers", &self.max_peers)
            .finish_non_exhaustive()
    }
}

impl NetworkManager {
    pub async fn run(mut self) {
        let mut prune_tick = interval(self.prune_interval);
        prune_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        #[expect(clippy::redundant_pub_crate, reason = "Needed for Tokio code")]
        loop {
            select! {
                event = self.swarm.next() => {
                    let Some(event) = event else { break };
                    self.handle_swarm_event(event);
                },
                command = self.command_receiver.recv() => {
                    let Some(command) = command else { break };
                    self.handle_command(command);
                },
                _ = prune_tick.tick() => self.prune_connections(),
            }
        }

        debug!("Network manager stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Dial { peer_addr, outcome } => {
                let result = self.swarm.dial(peer_addr).map_err(Into::into);
                let _ignored = outcome.send(result);
            }
            Command::ListenOn { addr, outcome } => {
                let result = self.swarm.listen_on(addr).map(drop).map_err(Into::into);
                let _ignored = outcome.send(result);
            }
            Command::Peers { outcome } => {
                let peers = self.swarm.connected_peers().copied().collect();
                let _ignored = outcome.send(peers);
            }
            Command::ListenAddrs { outcome } => {
                let addrs = self.swarm.listeners().cloned().collect();
                let _ignored = outcome.send(addrs);
            }
        }
    }

    fn prune_connections(&mut self) {
        let connected: Vec<PeerId> = self.swarm.connected_peers().copied().collect();
        let candidates = self
            .connections
            .lock()
            .prune_candidates(&connected, self.max_peers);

        for peer_id in candidates {
            debug!(%peer_id, "Pruning unprotected connection");
            let _ignored = self.swarm.disconnect_peer_id(peer_id);
        }
    }
}
