use core::fmt;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{BoxStream, SplitSink, SplitStream};
use futures_util::{Sink as FuturesSink, SinkExt, Stream as FuturesStream, StreamExt};
use libp2p::{PeerId, Stream as P2pStream, StreamProtocol};
use parking_lot::Mutex;
use tokio::io::BufStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::codec::Framed;
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt};

mod codec;

pub use codec::{CodecError, FrameCodec};

pub const MAX_FRAME_SIZE: usize = 8 * 1_024 * 1_024;

#[derive(Debug)]
pub struct Stream {
    inner: Framed<BufStream<Compat<P2pStream>>, FrameCodec>,
}

impl Stream {
    #[must_use]
    pub fn new(stream: P2pStream) -> Self {
        let stream = BufStream::new(stream.compat());
        let stream = Framed::new(stream, FrameCodec::new(MAX_FRAME_SIZE));
        Self { inner: stream }
    }
}

impl FuturesStream for Stream {
    type Item = Result<Bytes, CodecError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl FuturesSink<Bytes> for Stream {
    type Error = CodecError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready_unpin(cx)
    }

    fn start_send(mut self: Pin<&mut Self>, item: Bytes) -> Result<(), Self::Error> {
        self.inner.start_send_unpin(item)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_flush_unpin(cx)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_close_unpin(cx)
    }
}

/// The read side of a sync protocol stream.
///
/// `remote_peer` is `None` when the transport could not tell who is on the
/// other end; such streams are not processed.
pub struct SyncStream {
    remote_peer: Option<PeerId>,
    frames: BoxStream<'static, Result<Bytes, CodecError>>,
}

impl SyncStream {
    pub fn new<S>(remote_peer: Option<PeerId>, frames: S) -> Self
    where
        S: FuturesStream<Item = Result<Bytes, CodecError>> + Send + 'static,
    {
        Self {
            remote_peer,
            frames: frames.boxed(),
        }
    }

    #[must_use]
    pub const fn remote_peer(&self) -> Option<PeerId> {
        self.remote_peer
    }
}

impl fmt::Debug for SyncStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncStream")
            .field("remote_peer", &self.remote_peer)
            .finish_non_exhaustive()
    }
}

impl FuturesStream for SyncStream {
    type Item = Result<Bytes, CodecError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.frames.poll_next_unpin(cx)
    }
}

type StreamKey = (PeerId, StreamProtocol);

pub(crate) type FrameWriter = Arc<AsyncMutex<SplitSink<Stream, Bytes>>>;

/// Open streams per peer and protocol.
///
/// Every stream has one writer slot, shared by whoever sends to that peer,
/// and one reader, handed out once to the task that consumes replies.
#[derive(Default)]
pub(crate) struct StreamRegistry {
    writers: Mutex<HashMap<StreamKey, FrameWriter>>,
    readers: Mutex<HashMap<StreamKey, SplitStream<Stream>>>,
}

impl fmt::Debug for StreamRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRegistry")
            .field("writers", &self.writers.lock().len())
            .field("readers", &self.readers.lock().len())
            .finish()
    }
}

impl StreamRegistry {
    pub(crate) fn writer(&self, peer_id: PeerId, protocol: &StreamProtocol) -> Option<FrameWriter> {
        self.writers
            .lock()
            .get(&(peer_id, protocol.clone()))
            .map(Arc::clone)
    }

    /// Registers a stream we opened. If another task raced us and already
    /// registered one, its writer wins and `stream` is dropped.
    pub(crate) fn register_outbound(
        &self,
        peer_id: PeerId,
        protocol: StreamProtocol,
        stream: Stream,
    ) -> FrameWriter {
        let key = (peer_id, protocol);
        let mut writers = self.writers.lock();

        if let Some(writer) = writers.get(&key) {
            return Arc::clone(writer);
        }

        let (sink, reader) = stream.split();
        let writer = Arc::new(AsyncMutex::new(sink));

        drop(writers.insert(key.clone(), Arc::clone(&writer)));
        drop(self.readers.lock().insert(key, reader));

        writer
    }

    /// Registers a stream the remote opened. Replies to that peer travel on
    /// it unless we already have our own stream open to them.
    pub(crate) fn register_inbound(
        &self,
        peer_id: PeerId,
        protocol: StreamProtocol,
        stream: Stream,
    ) -> SyncStream {
        let (sink, reader) = stream.split();

        let _ignored = self
            .writers
            .lock()
            .entry((peer_id, protocol))
            .or_insert_with(|| Arc::new(AsyncMutex::new(sink)));

        SyncStream::new(Some(peer_id), reader)
    }

    pub(crate) fn take_reader(
        &self,
        peer_id: PeerId,
        protocol: &StreamProtocol,
    ) -> Option<SyncStream> {
        self.readers
            .lock()
            .remove(&(peer_id, protocol.clone()))
            .map(|reader| SyncStream::new(Some(peer_id), reader))
    }

    /// Drops `writer` if it is still the registered one, so the next send
    /// opens a fresh stream.
    pub(crate) fn discard(&self, peer_id: PeerId, protocol: &StreamProtocol, writer: &FrameWriter) {
        let key = (peer_id, protocol.clone());
        let mut writers = self.writers.lock();

        if writers
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, writer))
        {
            drop(writers.remove(&key));
            drop(self.readers.lock().remove(&key));
        }
    }

    pub(crate) fn forget_peer(&self, peer_id: &PeerId) {
        self.writers.lock().retain(|(peer, _), _| peer != peer_id);
        self.readers.lock().retain(|(peer, _), _| peer != peer_id);
    }
}
