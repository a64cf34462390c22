//! Splitting deliveries into frames between two engines wired back to back.

use amqp_engine::{
    Engine,
    EngineConfig,
    LinkHandle,
    LinkId,
    SessionId,
    performative::Performative,
};
use amqp_engine_testing::{exchange, pump};
use bytes::Bytes;
use proptest::prelude::*;

struct Pair {
    sender: Engine,
    receiver: Engine,
    outgoing: LinkId,
    incoming: LinkId,
}

/// Engine `a` sending to engine `b` over one link, both capped at
/// `max_frame_size` bytes per frame.
fn linked(max_frame_size: u32) -> Pair {
    let config = |id: &str| EngineConfig::new(id).with_max_frame_size(max_frame_size);
    let mut a = Engine::new(config("a")).expect("engine a");
    let mut b = Engine::new(config("b")).expect("engine b");
    a.start().expect("start a");
    b.start().expect("start b");

    a.open().expect("open a");
    b.open().expect("open b");
    exchange(&mut a, &mut b).expect("open exchange");

    let session = a.create_session().expect("session");
    a.open_session(session).expect("begin");
    exchange(&mut a, &mut b).expect("begin");
    b.open_session(SessionId(0)).expect("answer begin");
    exchange(&mut a, &mut b).expect("begin answer");

    let outgoing = a.sender(session, "frag").expect("sender");
    a.open_link(outgoing).expect("attach");
    exchange(&mut a, &mut b).expect("attach");
    let incoming = LinkId::new(SessionId(0), LinkHandle(0));
    b.set_credit(incoming, 10).expect("credit");
    b.open_link(incoming).expect("answer attach");
    exchange(&mut a, &mut b).expect("attach answer");

    Pair {
        sender: a,
        receiver: b,
        outgoing,
        incoming,
    }
}

proptest! {
    #[test]
    fn deliveries_split_at_the_frame_limit(
        max_frame_size in 1_u32..64,
        payload in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let mut pair = linked(max_frame_size);
        let id = pair
            .sender
            .send(pair.outgoing, Bytes::from_static(b"t"), Bytes::from(payload.clone()), false)
            .expect("send");

        let frames = pair.sender.pipeline().iter().cloned().collect::<Vec<_>>();
        let transfers: Vec<_> = frames
            .iter()
            .filter_map(|frame| match &frame.performative {
                Performative::Transfer(transfer) => Some((transfer, frame.payload.clone())),
                _ => None,
            })
            .collect();

        let limit = usize::try_from(max_frame_size).expect("small");
        let expected = payload.len().div_ceil(limit).max(1);
        prop_assert_eq!(transfers.len(), expected);
        for (n, (transfer, body)) in transfers.iter().enumerate() {
            prop_assert_eq!(transfer.more, n + 1 < expected);
            prop_assert_eq!(transfer.delivery_id, Some(id));
            prop_assert!(body.as_ref().map_or(0, Bytes::len) <= limit);
        }

        pump(&mut pair.sender, &mut pair.receiver).expect("deliver");
        let receiver = pair
            .receiver
            .link(pair.incoming)
            .and_then(|link| link.as_receiver())
            .expect("receiver");
        let delivery = receiver.delivery(id).expect("delivery arrived");
        prop_assert!(!delivery.is_partial());
        prop_assert_eq!(delivery.payload(), payload.as_slice());
        prop_assert_eq!(delivery.transfer_count(), u32::try_from(expected).expect("small"));
    }
}

#[test]
fn frame_limit_is_the_smaller_of_both_ends() {
    let mut a = Engine::new(EngineConfig::new("a").with_max_frame_size(512)).expect("a");
    let mut b = Engine::new(EngineConfig::new("b").with_max_frame_size(128)).expect("b");
    a.start().expect("start a");
    b.start().expect("start b");
    a.open().expect("open a");
    b.open().expect("open b");
    exchange(&mut a, &mut b).expect("exchange");

    assert_eq!(a.connection().effective_max_frame_size(), 128);
    assert_eq!(b.connection().effective_max_frame_size(), 128);
}

#[test]
fn receiver_reads_and_releases_a_fragmented_delivery() {
    let mut pair = linked(4);
    let id = pair
        .sender
        .send(pair.outgoing, Bytes::from_static(b"t"), Bytes::from_static(b"abcdefghij"), false)
        .expect("send");
    exchange(&mut pair.sender, &mut pair.receiver).expect("deliver");

    let body = pair.receiver.read_delivery(pair.incoming, id).expect("read");
    assert_eq!(&body[..], b"abcdefghij");
    let session = pair.receiver.session(SessionId(0)).expect("session");
    assert_eq!(session.incoming_window().incoming_bytes(), 0);
}
