use std::io;

use blocksync_network::{CodecError, PeerId, SyncStream};
use blocksync_primitives::message::{BlockRequest, MessageKind, SyncMessage};
use blocksync_sync::{DropReason, SyncEvent};
use bytes::Bytes;
use futures_util::stream;

use crate::harness::{blocks, wait_for, Harness, MockHost, MockSyncer};

fn frame(message: impl Into<SyncMessage>) -> Result<Bytes, CodecError> {
    let message: SyncMessage = message.into();
    Ok(Bytes::from(message.encode().unwrap()))
}

#[tokio::test]
async fn test_completion_ends_session() {
    let peer = PeerId::random();
    let harness = Harness::new(MockHost::with_peers(&[peer]), MockSyncer::new(0));

    harness
        .coordinator
        .begin_syncing(peer, BlockRequest::range(1, 10))
        .await
        .unwrap();
    harness.host.deliver(peer, blocks(1, 10));

    harness.wait_until_syncing(peer, false).await;

    assert_eq!(harness.syncer.responses(), vec![blocks(1, 10)]);
    assert_eq!(harness.host.protections(peer), (1, 1));
    assert_eq!(
        harness
            .diagnostics
            .count(|event| *event == SyncEvent::SessionEnded { peer }),
        1
    );

    harness.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_continuation_keeps_session() {
    let peer = PeerId::random();
    let syncer = MockSyncer::new(0).with_follow_ups([BlockRequest::range(11, 20)]);
    let harness = Harness::new(MockHost::with_peers(&[peer]), syncer);

    harness
        .coordinator
        .begin_syncing(peer, BlockRequest::range(1, 20))
        .await
        .unwrap();
    harness.host.deliver(peer, blocks(1, 10));

    wait_for(|| harness.host.sent_to(peer).len() == 2).await;

    assert!(harness.is_syncing(peer).await);
    assert_eq!(harness.coordinator.sessions().len().await, 1);
    assert_eq!(
        harness.host.requests_sent_to(peer),
        vec![BlockRequest::range(1, 20), BlockRequest::range(11, 20)]
    );
    assert_eq!(harness.host.protections(peer), (1, 0));

    harness.coordinator.shutdown().await;
}

#[tokio::test]
async fn test_unsolicited_response_is_ignored() {
    let peer = PeerId::random();
    let harness = Harness::new(MockHost::with_peers(&[peer]), MockSyncer::new(0));

    harness.coordinator.handle_response(peer, blocks(1, 10)).await;

    assert!(harness.syncer.responses().is_empty());
    assert_eq!(
        harness.diagnostics.events(),
        vec![SyncEvent::UnsolicitedResponse { peer }]
    );
    assert!(!harness.is_syncing(peer).await);
}

#[tokio::test]
async fn test_missing_and_anonymous_streams_are_dropped() {
    let harness = Harness::new(MockHost::default(), MockSyncer::new(0));

    harness.coordinator.handle_sync_stream(None).await;
    harness
        .coordinator
        .handle_sync_stream(Some(SyncStream::new(None, stream::iter([frame(blocks(1, 1))]))))
        .await;

    assert_eq!(
        harness.diagnostics.events(),
        vec![
            SyncEvent::StreamDropped {
                reason: DropReason::MissingStream
            },
            SyncEvent::StreamDropped {
                reason: DropReason::UnknownPeer
            },
        ]
    );
    assert_eq!(harness.host.total_sent(), 0);
}

#[tokio::test]
async fn test_decode_failure_keeps_reading() {
    let peer = PeerId::random();
    let harness = Harness::new(MockHost::with_peers(&[peer]), MockSyncer::new(100));

    let frames = stream::iter([
        Ok(Bytes::from_static(&[0xff, 0xff, 0xff])),
        frame(BlockRequest::range(1, 5)),
    ]);
    harness
        .coordinator
        .serve(stream::iter([SyncStream::new(Some(peer), frames)]));

    wait_for(|| harness.coordinator.active_readers() == 0).await;

    assert_eq!(harness.host.responses_sent_to(peer), vec![blocks(1, 5)]);
    assert_eq!(
        harness.diagnostics.count(|event| matches!(
            event,
            SyncEvent::DecodeFailed { kind: MessageKind::BlockRequest, .. }
        )),
        1
    );
    assert_eq!(
        harness
            .diagnostics
            .count(|event| *event == SyncEvent::StreamClosed { peer }),
        1
    );
}

#[tokio::test]
async fn test_unanswerable_request_sends_nothing() {
    let peer = PeerId::random();
    let harness = Harness::new(MockHost::with_peers(&[peer]), MockSyncer::new(50));

    harness
        .coordinator
        .handle_request(peer, BlockRequest::range(100, 200))
        .await;

    assert_eq!(harness.syncer.requests(), vec![BlockRequest::range(100, 200)]);
    assert_eq!(harness.host.total_sent(), 0);
    assert_eq!(
        harness.diagnostics.count(|event| matches!(
            event,
            SyncEvent::ResponseUnavailable { peer: p, .. } if *p == peer
        )),
        1
    );
}

#[tokio::test]
async fn test_response_send_failure_is_not_retried() {
    let (requester, bystander) = (PeerId::random(), PeerId::random());
    let harness = Harness::new(
        MockHost::with_peers(&[requester, bystander]),
        MockSyncer::new(10),
    );
    harness.host.fail(requester);

    harness
        .coordinator
        .handle_request(requester, BlockRequest::range(1, 5))
        .await;

    assert_eq!(harness.host.total_sent(), 0);
    assert!(harness.coordinator.sessions().is_empty().await);
    assert_eq!(
        harness.diagnostics.count(|event| matches!(
            event,
            SyncEvent::ResponseSendFailed { peer, .. } if *peer == requester
        )),
        1
    );
}

#[tokio::test]
async fn test_read_error_stops_loop() {
    let peer = PeerId::random();
    let harness = Harness::new(MockHost::with_peers(&[peer]), MockSyncer::new(10));

    let frames = stream::iter([
        Err(CodecError::StdIo(io::Error::other("connection reset"))),
        frame(BlockRequest::range(1, 5)),
    ]);
    harness
        .coordinator
        .handle_sync_stream(Some(SyncStream::new(Some(peer), frames)))
        .await;

    assert_eq!(harness.host.total_sent(), 0);
    assert_eq!(
        harness.diagnostics.count(|event| matches!(
            event,
            SyncEvent::StreamReadFailed { peer: p, .. } if *p == peer
        )),
        1
    );
}
