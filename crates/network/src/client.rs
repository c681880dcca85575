use core::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use eyre::{bail, Result as EyreResult};
use futures_util::{SinkExt, Stream as FuturesStream, StreamExt};
use libp2p::{Multiaddr, PeerId, StreamProtocol};
use libp2p_stream::Control;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::connections::ConnectionManager;
use crate::host::{Host, SendError};
use crate::stream::{Stream, StreamRegistry, SyncStream};

#[derive(Debug)]
pub(crate) enum Command {
    Dial {
        peer_addr: Multiaddr,
        outcome: oneshot::Sender<EyreResult<()>>,
    },
    ListenOn {
        addr: Multiaddr,
        outcome: oneshot::Sender<EyreResult<()>>,
    },
    Peers {
        outcome: oneshot::Sender<Vec<PeerId>>,
    },
    ListenAddrs {
        outcome: oneshot::Sender<Vec<Multiaddr>>,
    },
}

/// Handle to a running [`NetworkManager`](crate::NetworkManager).
#[derive(Clone)]
pub struct NetworkClient {
    sender: mpsc::Sender<Command>,
    control: Control,
    streams: Arc<StreamRegistry>,
    connections: Arc<Mutex<ConnectionManager>>,
}

impl fmt::Debug for NetworkClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkClient")
            .field("streams", &self.streams)
            .field("connections", &self.connections)
            .finish_non_exhaustive()
    }
}

impl NetworkClient {
    pub(crate) const fn new(
        sender: mpsc::Sender<Command>,
        control: Control,
        streams: Arc<StreamRegistry>,
        connections: Arc<Mutex<ConnectionManager>>,
    ) -> Self {
        Self {
            sender,
            control,
            streams,
            connections,
        }
    }

    pub async fn dial(&self, peer_addr: Multiaddr) -> EyreResult<()> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(Command::Dial {
                peer_addr,
                outcome: tx,
            })
            .await
            .is_err()
        {
            bail!(SendError::Closed);
        }

        rx.await?
    }

    pub async fn listen_on(&self, addr: Multiaddr) -> EyreResult<()> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(Command::ListenOn { addr, outcome: tx })
            .await
            .is_err()
        {
            bail!(SendError::Closed);
        }

        rx.await?
    }

    /// Addresses the swarm is currently listening on.
    pub async fn listen_addrs(&self) -> EyreResult<Vec<Multiaddr>> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(Command::ListenAddrs { outcome: tx })
            .await
            .is_err()
        {
            bail!(SendError::Closed);
        }

        Ok(rx.await?)
    }

    /// Streams opened by remote peers on `protocol`.
    ///
    /// Can only be called once per protocol.
    pub fn incoming(
        &self,
        protocol: StreamProtocol,
    ) -> EyreResult<impl FuturesStream<Item = SyncStream> + Send + 'static> {
        let incoming = match self.control.clone().accept(protocol.clone()) {
            Ok(incoming) => incoming,
            Err(err) => bail!("Failed to accept streams for {}: {:?}", protocol, err),
        };

        let streams = Arc::clone(&self.streams);

        Ok(incoming.map(move |(peer_id, stream)| {
            debug!(%peer_id, %protocol, "Accepted incoming stream");
            streams.register_inbound(peer_id, protocol.clone(), Stream::new(stream))
        }))
    }

    async fn open_stream(&self, peer: PeerId, protocol: &StreamProtocol) -> Result<Stream, SendError> {
        let stream = self
            .control
            .clone()
            .open_stream(peer, protocol.clone())
            .await
            .map_err(|err| SendError::OpenStream(err.to_string()))?;

        Ok(Stream::new(stream))
    }
}

#[async_trait]
impl Host for NetworkClient {
    async fn send(
        &self,
        peer: PeerId,
        protocol: &StreamProtocol,
        data: Bytes,
    ) -> Result<(), SendError> {
        let writer = match self.streams.writer(peer, protocol) {
            Some(writer) => writer,
            None => {
                let stream = self.open_stream(peer, protocol).await?;
                self.streams
                    .register_outbound(peer, protocol.clone(), stream)
            }
        };

        let result = writer.lock().await.send(data).await;

        if let Err(err) = result {
            debug!(%peer, %protocol, error = %err, "Discarding broken stream");
            self.streams.discard(peer, protocol, &writer);
            return Err(err.into());
        }

        Ok(())
    }

    async fn stream(&self, peer: PeerId, protocol: &StreamProtocol) -> Option<SyncStream> {
        self.streams.take_reader(peer, protocol)
    }

    async fn peers(&self) -> Vec<PeerId> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(Command::Peers { outcome: tx })
            .await
            .is_err()
        {
            warn!("Network manager is gone, reporting no peers");
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    fn protect(&self, peer: PeerId, tag: &str) {
        self.connections.lock().protect(peer, tag);
    }

    fn unprotect(&self, peer: PeerId, tag: &str) {
        let _still_protected = self.connections.lock().unprotect(peer, tag);
    }
}
