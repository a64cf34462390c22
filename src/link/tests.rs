//! Unit tests for link roles.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rstest::{fixture, rstest};

use super::*;
use crate::{
    delivery::DeliveryEvent,
    endpoint::{LinkHandle, SessionId},
    performative::Coordinator,
};

fn link_id(handle: u32) -> LinkId { LinkId::new(SessionId(0), LinkHandle(handle)) }

#[fixture]
fn receiver() -> Link {
    let mut receiver = Receiver::new(link_id(0), "inbox");
    receiver.endpoint_mut().open_locally().expect("open receiver");
    Link::Receiver(receiver)
}

#[fixture]
fn sender() -> Link {
    let mut sender = Sender::new(link_id(1), "outbox");
    sender.endpoint_mut().open_locally().expect("open sender");
    Link::Sender(sender)
}

fn remote_attach(role: Role) -> Attach {
    Attach {
        initial_delivery_count: (role == Role::Sender).then(|| SequenceNumber::new(5)),
        ..Attach::new("peer", 9, role)
    }
}

fn frame(id: Option<u32>, more: bool) -> Transfer {
    Transfer {
        delivery_id: id.map(SequenceNumber::new),
        delivery_tag: id.map(|id| Bytes::copy_from_slice(&id.to_be_bytes())),
        more,
        ..Transfer::default()
    }
}

#[rstest]
fn sender_attach_announces_initial_delivery_count(sender: Link) {
    let attach = sender.local_attach();
    assert_eq!(attach.role, Role::Sender);
    assert_eq!(attach.handle, 1);
    assert_eq!(attach.name, "outbox");
    assert_eq!(attach.initial_delivery_count, Some(SequenceNumber::new(0)));
}

#[rstest]
fn receiver_attach_adopts_remote_delivery_count(mut receiver: Link) {
    receiver
        .as_receiver_mut()
        .expect("receiver")
        .set_credit(3);
    let announce = receiver
        .handle_attach(&remote_attach(Role::Sender))
        .expect("first attach");
    assert!(announce);
    assert_eq!(receiver.endpoint().remote_handle(), Some(9));

    let mut flow = Flow::default();
    receiver.stamp_flow(&mut flow);
    assert_eq!(flow.handle, Some(0));
    assert_eq!(flow.link_credit, Some(3));
    assert_eq!(flow.delivery_count, Some(SequenceNumber::new(5)));
}

#[rstest]
fn second_remote_attach_is_a_violation(mut sender: Link) {
    sender
        .handle_attach(&remote_attach(Role::Receiver))
        .expect("first attach");
    assert_eq!(
        sender.handle_attach(&remote_attach(Role::Receiver)),
        Err(ProtocolViolation::DuplicateOpen { endpoint: "link" })
    );
}

#[rstest]
fn transfer_on_sender_is_a_violation(mut sender: Link) {
    let mut window = SessionIncomingWindow::new(0, 0);
    assert_eq!(
        sender.handle_transfer(&mut window, &frame(Some(0), false), b"x"),
        Err(ProtocolViolation::TransferOnSender { handle: 0 })
    );
}

#[rstest]
fn terminus_is_frozen_after_open(mut sender: Link) {
    assert_eq!(
        sender.endpoint_mut().set_target(Target::address("queue")),
        Err(EngineStateError::AlreadyOpen { endpoint: "link" })
    );
    let mut idle = Receiver::new(link_id(2), "txn");
    idle.endpoint_mut()
        .set_target(Target::Coordinator(Coordinator::default()))
        .expect("idle link accepts a target");
    assert!(idle.endpoint().target().is_some_and(Target::is_coordinator));
}

#[rstest]
fn receiver_fires_received_then_updated(mut receiver: Link) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in [DeliveryEvent::Received, DeliveryEvent::Updated] {
        let sink = Arc::clone(&seen);
        receiver
            .as_receiver_mut()
            .expect("receiver")
            .on_delivery(kind, move |delivery| {
                sink.lock()
                    .expect("lock")
                    .push((kind, delivery.is_partial()));
            });
    }
    let mut window = SessionIncomingWindow::new(0, 0);
    receiver
        .handle_transfer(&mut window, &frame(Some(0), true), b"ab")
        .expect("first frame");
    receiver
        .handle_transfer(&mut window, &frame(None, false), b"cd")
        .expect("last frame");

    assert_eq!(
        *seen.lock().expect("lock"),
        vec![(DeliveryEvent::Received, true), (DeliveryEvent::Updated, false)]
    );
    let delivery = receiver
        .as_receiver()
        .and_then(|r| r.delivery(SequenceNumber::new(0)))
        .expect("delivery kept until settled");
    assert_eq!(delivery.payload(), b"abcd");
    assert!(window.is_tracked(SequenceNumber::new(0)));
}

#[rstest]
fn remote_settlement_keeps_delivery_readable(mut receiver: Link) {
    let mut window = SessionIncomingWindow::new(0, 0);
    receiver
        .handle_transfer(&mut window, &frame(Some(0), false), b"body")
        .expect("transfer");
    let disposition = Disposition {
        role: Role::Sender,
        first: SequenceNumber::new(0),
        last: None,
        settled: true,
        state: Some(DeliveryState::Accepted),
        batchable: false,
    };
    receiver.handle_disposition(&disposition, SequenceNumber::new(0));

    let r = receiver.as_receiver_mut().expect("receiver");
    let delivery = r.delivery(SequenceNumber::new(0)).expect("still held");
    assert!(delivery.is_remotely_settled());
    assert_eq!(delivery.remote_state(), Some(&DeliveryState::Accepted));
    assert_eq!(r.read(SequenceNumber::new(0)), Ok(Bytes::from_static(b"body")));
}

#[rstest]
fn local_settlement_releases_buffered_bytes(mut receiver: Link) {
    let mut window = SessionIncomingWindow::new(0, 0);
    receiver
        .handle_transfer(&mut window, &frame(Some(0), false), b"12345")
        .expect("transfer");
    let r = receiver.as_receiver_mut().expect("receiver");
    let outcome = r
        .apply_local_disposition(SequenceNumber::new(0), Some(DeliveryState::Released), true)
        .expect("settle");
    assert_eq!(outcome.released, 5);
    assert!(outcome.settled);
    assert!(r.delivery(SequenceNumber::new(0)).is_none());
    assert_eq!(
        r.apply_local_disposition(SequenceNumber::new(0), None, true),
        Err(EngineStateError::UnknownDelivery {
            link: link_id(0),
            delivery_id: SequenceNumber::new(0),
        })
    );
}

#[rstest]
fn sender_needs_credit_to_begin(mut sender: Link) {
    sender
        .handle_attach(&remote_attach(Role::Receiver))
        .expect("attach");
    let s = sender.as_sender_mut().expect("sender");
    assert_eq!(
        s.begin(Bytes::from_static(b"t"), false),
        Err(EngineStateError::NoCredit(link_id(1)))
    );

    let flow = Flow {
        handle: Some(9),
        delivery_count: Some(SequenceNumber::new(0)),
        link_credit: Some(1),
        ..Flow::default()
    };
    assert!(!sender.handle_flow(&flow).expect("flow"));
    let s = sender.as_sender_mut().expect("sender");
    assert!(s.is_sendable());
    s.begin(Bytes::from_static(b"t"), false).expect("credit granted");
    assert_eq!(
        s.begin(Bytes::from_static(b"u"), false),
        Err(EngineStateError::DeliveryInProgress(link_id(1)))
    );
}

#[rstest]
fn aborting_before_any_frame_draws_no_id(mut sender: Link) {
    sender
        .handle_attach(&remote_attach(Role::Receiver))
        .expect("attach");
    sender
        .handle_flow(&Flow {
            handle: Some(9),
            delivery_count: Some(SequenceNumber::new(0)),
            link_credit: Some(2),
            ..Flow::default()
        })
        .expect("flow");
    let s = sender.as_sender_mut().expect("sender");
    s.begin(Bytes::from_static(b"t"), false).expect("begin");
    assert!(s.take_for_abort().expect("pending message").is_none());
    assert_eq!(s.credit(), 2);

    s.begin(Bytes::from_static(b"t"), false).expect("begin again");
    let mut next = SequenceNumber::new(40);
    let id = s
        .delivery_for_write(|| next.post_increment())
        .expect("delivery")
        .delivery_id();
    assert_eq!(id, SequenceNumber::new(40));
    let aborted = s.take_for_abort().expect("writing").expect("delivery");
    assert!(aborted.is_aborted());
    assert_eq!(s.credit(), 1);
    assert!(s.delivery(id).is_none());
}
