//! Terse constructors for performatives a remote peer would send.

use amqp_engine::{
    SequenceNumber,
    performative::{
        Attach,
        Begin,
        Close,
        Coordinator,
        DeliveryState,
        Detach,
        Disposition,
        End,
        Flow,
        Open,
        Performative,
        Role,
        Target,
        Transfer,
    },
};
use bytes::Bytes;

/// Open from a peer called `container_id` with unbounded frames.
#[must_use]
pub fn open(container_id: &str) -> Performative {
    Performative::Open(Open {
        container_id: container_id.to_owned(),
        max_frame_size: 0,
        channel_max: u16::MAX,
        ..Open::default()
    })
}

/// Open announcing `max_frame_size`.
#[must_use]
pub fn open_with_frame_size(container_id: &str, max_frame_size: u32) -> Performative {
    Performative::Open(Open {
        container_id: container_id.to_owned(),
        max_frame_size,
        channel_max: u16::MAX,
        ..Open::default()
    })
}

/// Begin answering the local session on `remote_channel`, or starting a new
/// one when `None`.
#[must_use]
pub fn begin(remote_channel: Option<u16>, incoming_window: u32) -> Performative {
    Performative::Begin(Begin {
        remote_channel,
        incoming_window,
        outgoing_window: u32::MAX,
        handle_max: u32::MAX,
        ..Begin::default()
    })
}

/// Attach for `name` on the peer's `handle`, playing `role`.
///
/// A sending peer announces an initial delivery-count of zero.
#[must_use]
pub fn attach(name: &str, handle: u32, role: Role) -> Performative {
    Performative::Attach(Attach {
        initial_delivery_count: (role == Role::Sender).then(|| SequenceNumber::new(0)),
        ..Attach::new(name, handle, role)
    })
}

/// Attach of a transaction controller's sending link.
#[must_use]
pub fn controller_attach(name: &str, handle: u32) -> Performative {
    Performative::Attach(Attach {
        target: Some(Target::Coordinator(Coordinator::default())),
        initial_delivery_count: Some(SequenceNumber::new(0)),
        ..Attach::new(name, handle, Role::Sender)
    })
}

fn link_flow(handle: u32, delivery_count: u32, credit: u32) -> Flow {
    Flow {
        next_incoming_id: Some(SequenceNumber::new(0)),
        incoming_window: u32::MAX,
        outgoing_window: u32::MAX,
        handle: Some(handle),
        delivery_count: Some(SequenceNumber::new(delivery_count)),
        link_credit: Some(credit),
        ..Flow::default()
    }
}

/// Link Flow granting `credit` at `delivery_count` on the peer's `handle`.
#[must_use]
pub fn credit(handle: u32, delivery_count: u32, credit: u32) -> Performative {
    Performative::Flow(link_flow(handle, delivery_count, credit))
}

/// Link Flow from a sender answering a drain request.
#[must_use]
pub fn drained(handle: u32, delivery_count: u32) -> Performative {
    Performative::Flow(Flow {
        drain: true,
        ..link_flow(handle, delivery_count, 0)
    })
}

/// Transfer frame. The first frame of a delivery carries `delivery_id`;
/// continuations pass `None`.
#[must_use]
pub fn transfer(handle: u32, delivery_id: Option<u32>, more: bool) -> Performative {
    Performative::Transfer(Transfer {
        handle,
        delivery_id: delivery_id.map(SequenceNumber::new),
        delivery_tag: delivery_id.map(|id| Bytes::copy_from_slice(&id.to_be_bytes())),
        message_format: delivery_id.map(|_| 0),
        more,
        ..Transfer::default()
    })
}

/// Disposition covering `first..=last` sent by a peer playing `role`.
#[must_use]
pub fn disposition(
    role: Role,
    first: u32,
    last: Option<u32>,
    settled: bool,
    state: Option<DeliveryState>,
) -> Performative {
    Performative::Disposition(Disposition {
        role,
        first: SequenceNumber::new(first),
        last: last.map(SequenceNumber::new),
        settled,
        state,
        batchable: false,
    })
}

#[must_use]
pub fn detach(handle: u32, closed: bool) -> Performative {
    Performative::Detach(Detach {
        handle,
        closed,
        error: None,
    })
}

#[must_use]
pub fn end() -> Performative { Performative::End(End::default()) }

#[must_use]
pub fn close() -> Performative { Performative::Close(Close::default()) }
