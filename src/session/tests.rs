//! Unit tests for session windows and link dispatch.

use std::sync::{Arc, Mutex};

use rstest::{fixture, rstest};

use super::*;
use crate::{
    performative::{Coordinator, Performative},
    pipeline::FrameQueue,
};

struct Begun {
    session: Session,
    queue: FrameQueue,
}

fn begun(incoming_capacity: u32, max_frame_size: u32) -> Begun {
    let mut session = Session::new(SessionId(0), incoming_capacity, max_frame_size, u32::MAX);
    let mut queue = FrameQueue::new();
    session.begin(max_frame_size, &mut queue).expect("begin");
    session
        .handle_begin(&Begin {
            remote_channel: Some(0),
            incoming_window: 100,
            outgoing_window: 100,
            handle_max: u32::MAX,
            ..Begin::default()
        })
        .expect("remote begin");
    queue.drain();
    Begun { session, queue }
}

#[fixture]
fn unbounded() -> Begun { begun(0, 0) }

fn transfers(queue: &mut FrameQueue) -> Vec<(Transfer, Option<Bytes>)> {
    queue
        .drain()
        .into_iter()
        .filter_map(|frame| match frame.performative {
            Performative::Transfer(transfer) => Some((transfer, frame.payload)),
            _ => None,
        })
        .collect()
}

fn flows(queue: &mut FrameQueue) -> Vec<Flow> {
    queue
        .drain()
        .into_iter()
        .filter_map(|frame| match frame.performative {
            Performative::Flow(flow) => Some(flow),
            _ => None,
        })
        .collect()
}

/// Attach a local sender and grant it `credit` from the peer.
fn open_sender(begun: &mut Begun, credit: u32) -> LinkHandle {
    let id = begun
        .session
        .create_link(LinkKind::Sender, "out")
        .expect("sender");
    begun
        .session
        .open_link(id.handle, &mut begun.queue)
        .expect("attach");
    begun
        .session
        .handle_attach(&Attach::new("out", 7, Role::Receiver), &mut begun.queue)
        .expect("remote attach");
    begun
        .session
        .handle_flow(
            &Flow {
                next_incoming_id: Some(SequenceNumber::new(0)),
                incoming_window: 100,
                handle: Some(7),
                delivery_count: Some(SequenceNumber::new(0)),
                link_credit: Some(credit),
                ..Flow::default()
            },
            &mut begun.queue,
        )
        .expect("credit");
    begun.queue.drain();
    id.handle
}

#[test]
fn begin_advertises_window_from_capacity() {
    let mut session = Session::new(SessionId(3), 1000, 100, 16);
    let mut queue = FrameQueue::new();
    session.begin(100, &mut queue).expect("begin");

    let frame = queue.pop().expect("begin written");
    assert_eq!(frame.channel, 3);
    let Performative::Begin(begin) = frame.performative else {
        panic!("expected begin, got {:?}", frame.performative);
    };
    assert_eq!(begin.incoming_window, 10);
    assert_eq!(begin.handle_max, 16);
    assert_eq!(begin.remote_channel, None);
    assert_eq!(session.local_state(), SessionState::Begun);
    assert_eq!(session.remote_state(), SessionState::Unmapped);
}

#[test]
fn incoming_bytes_shrink_the_window() {
    let mut begun = begun(1000, 100);
    assert_eq!(begun.session.incoming_window().incoming_window(), 10);
    begun
        .session
        .handle_attach(&Attach::new("in", 0, Role::Sender), &mut begun.queue)
        .expect("remote attach");
    let transfer = Transfer {
        handle: 0,
        delivery_id: Some(SequenceNumber::new(0)),
        delivery_tag: Some(Bytes::from_static(b"a")),
        ..Transfer::default()
    };
    begun
        .session
        .handle_transfer(&transfer, &[0; 400], &mut begun.queue)
        .expect("transfer");

    let window = begun.session.incoming_window();
    assert_eq!(window.incoming_bytes(), 400);
    assert_eq!(begun.session.incoming.update_incoming_window(), 6);
}

#[rstest]
fn remote_attach_creates_inverse_role(mut unbounded: Begun) {
    let opened = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        SessionEvent::SenderOpened,
        SessionEvent::ReceiverOpened,
        SessionEvent::CoordinatorOpened,
    ] {
        let sink = Arc::clone(&opened);
        unbounded
            .session
            .on_link_opened(kind, move |id| sink.lock().expect("lock").push((kind, id.handle)));
    }
    let mut controller = Attach::new("txn", 4, Role::Sender);
    controller.target = Some(Target::Coordinator(Coordinator::default()));
    unbounded
        .session
        .handle_attach(&Attach::new("a", 2, Role::Sender), &mut unbounded.queue)
        .expect("attach a");
    unbounded
        .session
        .handle_attach(&controller, &mut unbounded.queue)
        .expect("attach txn");
    unbounded
        .session
        .handle_attach(&Attach::new("b", 3, Role::Receiver), &mut unbounded.queue)
        .expect("attach b");

    assert_eq!(
        *opened.lock().expect("lock"),
        vec![
            (SessionEvent::ReceiverOpened, LinkHandle(0)),
            (SessionEvent::CoordinatorOpened, LinkHandle(1)),
            (SessionEvent::SenderOpened, LinkHandle(2)),
        ]
    );
    assert_eq!(
        unbounded.session.link(LinkHandle(1)).map(Link::kind),
        Some("coordinator")
    );
}

#[rstest]
fn remote_attach_pairs_with_local_link(mut unbounded: Begun) {
    let opened = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&opened);
    unbounded
        .session
        .on_link_opened(SessionEvent::ReceiverOpened, move |_| *sink.lock().expect("lock") += 1);
    let id = unbounded
        .session
        .create_link(LinkKind::Receiver, "inbox")
        .expect("receiver");
    unbounded
        .session
        .handle_attach(&Attach::new("inbox", 11, Role::Sender), &mut unbounded.queue)
        .expect("remote attach");

    assert_eq!(*opened.lock().expect("lock"), 0);
    let link = unbounded.session.link(id.handle).expect("paired link");
    assert_eq!(link.endpoint().remote_handle(), Some(11));
}

#[rstest]
fn handles_reuse_the_lowest_free_slot(mut unbounded: Begun) {
    let a = unbounded
        .session
        .create_link(LinkKind::Sender, "a")
        .expect("a");
    let b = unbounded
        .session
        .create_link(LinkKind::Sender, "b")
        .expect("b");
    assert_eq!((a.handle, b.handle), (LinkHandle(0), LinkHandle(1)));
    assert_eq!(
        unbounded.session.create_link(LinkKind::Sender, "a"),
        Err(EngineStateError::DuplicateLinkName(String::from("a")))
    );

    unbounded
        .session
        .open_link(a.handle, &mut unbounded.queue)
        .expect("attach a");
    unbounded
        .session
        .handle_attach(&Attach::new("a", 0, Role::Receiver), &mut unbounded.queue)
        .expect("remote attach a");
    unbounded
        .session
        .close_link(a.handle, true, None, &mut unbounded.queue)
        .expect("detach a");
    unbounded
        .session
        .handle_detach(Detach {
            handle: 0,
            closed: true,
            error: None,
        })
        .expect("remote detach a");

    assert!(unbounded.session.link(a.handle).is_none());
    let c = unbounded
        .session
        .create_link(LinkKind::Receiver, "c")
        .expect("c");
    assert_eq!(c.handle, LinkHandle(0));
}

#[test]
fn handle_max_bounds_link_creation() {
    let mut session = Session::new(SessionId(0), 0, 0, 0);
    session
        .create_link(LinkKind::Sender, "only")
        .expect("handle 0");
    assert_eq!(
        session.create_link(LinkKind::Sender, "more"),
        Err(EngineStateError::HandlesExhausted { handle_max: 0 })
    );
}

#[test]
fn payload_is_fragmented_by_max_frame_size() {
    let mut begun = begun(0, 4);
    let handle = open_sender(&mut begun, 1);

    let id = begun
        .session
        .send(
            handle,
            Bytes::from_static(b"tag"),
            Bytes::from_static(b"0123456789"),
            false,
            &mut begun.queue,
        )
        .expect("send");
    assert_eq!(id, SequenceNumber::new(0));

    let written = transfers(&mut begun.queue);
    let more: Vec<bool> = written.iter().map(|(t, _)| t.more).collect();
    assert_eq!(more, vec![true, true, false]);
    let payload: Vec<u8> = written
        .iter()
        .flat_map(|(_, p)| p.as_deref().unwrap_or_default().to_vec())
        .collect();
    assert_eq!(payload, b"0123456789");
    assert!(written.iter().all(|(t, _)| t.delivery_id == Some(id)));

    let outgoing = begun.session.outgoing_window();
    assert_eq!(outgoing.next_outgoing_id(), SequenceNumber::new(3));
    assert_eq!(outgoing.remote_incoming_window(), 97);
    assert!(outgoing.is_tracked(id));
}

#[test]
fn streamed_message_stays_open_until_complete() {
    let mut begun = begun(0, 0);
    let handle = open_sender(&mut begun, 2);
    begun
        .session
        .begin_message(handle, Bytes::from_static(b"s"), false)
        .expect("begin message");
    begun
        .session
        .stream_bytes(handle, Bytes::from_static(b"ab"), false, &mut begun.queue)
        .expect("first chunk");
    begun
        .session
        .stream_bytes(handle, Bytes::new(), true, &mut begun.queue)
        .expect("final chunk");

    let written = transfers(&mut begun.queue);
    assert_eq!(written.len(), 2);
    assert!(written[0].0.more);
    assert!(!written[1].0.more);
    assert_eq!(written[1].1, None);
    let sender = begun
        .session
        .link(handle)
        .and_then(Link::as_sender)
        .expect("sender");
    assert_eq!(sender.credit(), 1);
    assert_eq!(sender.current_delivery(), None);
}

#[test]
fn abort_after_first_frame_writes_aborted_transfer() {
    let mut begun = begun(0, 0);
    let handle = open_sender(&mut begun, 1);
    begun
        .session
        .begin_message(handle, Bytes::from_static(b"x"), false)
        .expect("begin message");
    let id = begun
        .session
        .stream_bytes(handle, Bytes::from_static(b"part"), false, &mut begun.queue)
        .expect("chunk");
    begun.session.abort(handle, &mut begun.queue).expect("abort");

    let written = transfers(&mut begun.queue);
    let (abort, payload) = written.last().expect("abort frame");
    assert!(abort.aborted);
    assert!(!abort.more);
    assert!(!abort.settled);
    assert_eq!(abort.state, None);
    assert_eq!(*payload, None);
    assert!(!begun.session.outgoing_window().is_tracked(id));
}

#[rstest]
fn inverted_disposition_range_is_a_violation(mut unbounded: Begun) {
    let disposition = Disposition {
        role: Role::Receiver,
        first: SequenceNumber::new(5),
        last: Some(SequenceNumber::new(3)),
        settled: true,
        state: None,
        batchable: false,
    };
    let err = unbounded
        .session
        .handle_disposition(&disposition)
        .expect_err("range must be ordered");
    assert_eq!(
        err.protocol_violation(),
        Some(&ProtocolViolation::InvalidDispositionRange {
            first: SequenceNumber::new(5),
            last: SequenceNumber::new(3),
        })
    );
}

#[rstest]
fn untracked_single_disposition_is_ignored(mut unbounded: Begun) {
    let disposition = Disposition {
        role: Role::Receiver,
        first: SequenceNumber::new(9),
        last: Some(SequenceNumber::new(9)),
        settled: true,
        state: Some(DeliveryState::Accepted),
        batchable: false,
    };
    unbounded
        .session
        .handle_disposition(&disposition)
        .expect("no-op");
    assert!(unbounded.queue.is_empty());
}

#[rstest]
fn credit_is_announced_only_once_both_ends_attached(mut unbounded: Begun) {
    let id = unbounded
        .session
        .create_link(LinkKind::Receiver, "in")
        .expect("receiver");
    unbounded
        .session
        .set_credit(id.handle, 5, &mut unbounded.queue)
        .expect("credit before attach");
    assert!(unbounded.queue.is_empty());

    unbounded
        .session
        .open_link(id.handle, &mut unbounded.queue)
        .expect("attach");
    assert!(flows(&mut unbounded.queue).is_empty());

    unbounded
        .session
        .handle_attach(&Attach::new("in", 0, Role::Sender), &mut unbounded.queue)
        .expect("remote attach");
    let written = flows(&mut unbounded.queue);
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].handle, Some(id.handle.0));
    assert_eq!(written[0].link_credit, Some(5));
    assert_eq!(written[0].next_incoming_id, Some(SequenceNumber::new(0)));

    unbounded
        .session
        .set_credit(id.handle, 5, &mut unbounded.queue)
        .expect("same credit");
    assert!(unbounded.queue.is_empty());
}

#[test]
fn reading_reopens_a_closed_window() {
    let mut begun = begun(200, 100);
    begun
        .session
        .handle_attach(&Attach::new("in", 0, Role::Sender), &mut begun.queue)
        .expect("remote attach");
    let first = Transfer {
        handle: 0,
        delivery_id: Some(SequenceNumber::new(0)),
        more: true,
        ..Transfer::default()
    };
    let last = Transfer {
        handle: 0,
        ..Transfer::default()
    };
    for transfer in [&first, &last] {
        begun
            .session
            .handle_transfer(transfer, &[1; 100], &mut begun.queue)
            .expect("transfer");
    }
    assert_eq!(begun.session.incoming_window().incoming_window(), 0);

    let body = begun
        .session
        .read_delivery(LinkHandle(0), SequenceNumber::new(0), &mut begun.queue)
        .expect("read");
    assert_eq!(body.len(), 200);
    let written = flows(&mut begun.queue);
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].handle, None);
    assert_eq!(written[0].incoming_window, 2);
}

#[rstest]
fn echo_flow_is_answered(mut unbounded: Begun) {
    unbounded
        .session
        .handle_flow(
            &Flow {
                next_incoming_id: Some(SequenceNumber::new(0)),
                incoming_window: 10,
                echo: true,
                ..Flow::default()
            },
            &mut unbounded.queue,
        )
        .expect("flow");
    let written = flows(&mut unbounded.queue);
    assert_eq!(written.len(), 1);
    assert!(!written[0].echo);
    assert_eq!(written[0].incoming_window, UNBOUNDED_WINDOW);
}

#[rstest]
fn flow_for_unknown_handle_is_a_violation(mut unbounded: Begun) {
    let err = unbounded
        .session
        .handle_flow(
            &Flow {
                handle: Some(42),
                ..Flow::default()
            },
            &mut unbounded.queue,
        )
        .expect_err("unknown handle");
    assert_eq!(
        err.protocol_violation(),
        Some(&ProtocolViolation::UnknownHandle { handle: 42 })
    );
}
