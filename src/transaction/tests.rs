//! Unit tests for the coordinator.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use rstest::{fixture, rstest};

use super::*;
use crate::{
    endpoint::{LinkHandle, SessionId},
    performative::{Declare, Discharge},
};

struct Harness {
    manager: TransactionManager,
    window: SessionIncomingWindow,
    next_id: u32,
}

impl Harness {
    fn deliver(&mut self, value: &AmqpValue) -> Result<TransferFollowUp, ProtocolViolation> {
        let body = BincodeValueCodec.encode(value).expect("encode control body");
        self.deliver_raw(&body)
    }

    fn deliver_raw(&mut self, body: &[u8]) -> Result<TransferFollowUp, ProtocolViolation> {
        let transfer = Transfer {
            delivery_id: Some(SequenceNumber::new(self.next_id)),
            delivery_tag: Some(Bytes::copy_from_slice(&self.next_id.to_be_bytes())),
            ..Transfer::default()
        };
        self.next_id += 1;
        self.manager
            .handle_transfer(&mut self.window, &transfer, body)
    }
}

#[fixture]
fn harness() -> Harness {
    let id = LinkId::new(SessionId(0), LinkHandle(0));
    let mut manager = TransactionManager::new(id, "txn-coordinator");
    manager.receiver_mut().set_credit(10);
    Harness {
        manager,
        window: SessionIncomingWindow::new(0, 0),
        next_id: 0,
    }
}

fn recorder(manager: &mut TransactionManager, kind: TransactionEvent) -> Arc<Mutex<Vec<Transaction>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    manager.on_event(kind, move |txn| sink.lock().expect("lock").push(txn.clone()));
    seen
}

#[rstest]
fn declare_then_discharge_reaches_the_same_transaction(mut harness: Harness) {
    let declares = recorder(&mut harness.manager, TransactionEvent::Declare);
    let discharges = recorder(&mut harness.manager, TransactionEvent::Discharge);

    let follow_up = harness
        .deliver(&AmqpValue::Declare(Declare::default()))
        .expect("declare accepted");
    assert_eq!(follow_up.settle, None);
    assert!(follow_up.released > 0);
    let declare_id = declares.lock().expect("lock")[0].declare_id();

    let txn_id = TxnId::new(b"T1".to_vec());
    let (settle_id, state) = harness
        .manager
        .declared(declare_id, txn_id.clone())
        .expect("pending declare");
    assert_eq!(settle_id, declare_id);
    assert_eq!(state, DeliveryState::Declared { txn_id: txn_id.clone() });

    let follow_up = harness
        .deliver(&AmqpValue::Discharge(Discharge {
            txn_id: txn_id.clone(),
            fail: false,
        }))
        .expect("discharge accepted");
    assert_eq!(follow_up.settle, None);

    let seen = discharges.lock().expect("lock");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].txn_id(), Some(&txn_id));
    assert_eq!(seen[0].declare_id(), declare_id);
    assert!(!seen[0].is_rollback());
    assert_eq!(seen[0].state(), TransactionState::Discharging);
}

#[rstest]
fn unknown_discharge_is_rejected_without_event(mut harness: Harness) {
    let discharges = recorder(&mut harness.manager, TransactionEvent::Discharge);
    let follow_up = harness
        .deliver(&AmqpValue::Discharge(Discharge {
            txn_id: TxnId::new(b"nope".to_vec()),
            fail: true,
        }))
        .expect("discharge processed");

    assert!(discharges.lock().expect("lock").is_empty());
    let (id, state) = follow_up.settle.expect("rejection");
    assert_eq!(id, SequenceNumber::new(0));
    let DeliveryState::Rejected(Some(condition)) = state else {
        panic!("expected rejection, got {state:?}");
    };
    assert_eq!(condition.condition.as_str(), UNKNOWN_ID);
}

#[rstest]
fn discharged_settles_with_accepted_and_forgets(mut harness: Harness) {
    harness
        .deliver(&AmqpValue::Declare(Declare::default()))
        .expect("declare");
    let txn_id = TxnId::new(vec![7]);
    harness
        .manager
        .declared(SequenceNumber::new(0), txn_id.clone())
        .expect("declared");
    harness
        .deliver(&AmqpValue::Discharge(Discharge {
            txn_id: txn_id.clone(),
            fail: true,
        }))
        .expect("discharge");
    assert_eq!(
        harness.manager.transaction(&txn_id).map(Transaction::is_rollback),
        Some(true)
    );

    let (id, state) = harness.manager.discharged(&txn_id).expect("discharging");
    assert_eq!(id, SequenceNumber::new(1));
    assert_eq!(state, DeliveryState::Accepted);
    assert_eq!(harness.manager.active_len(), 0);
    assert!(matches!(
        harness.manager.discharged(&txn_id),
        Err(EngineStateError::UnknownTransaction(_))
    ));
}

#[rstest]
fn discharge_before_answer_is_refused(mut harness: Harness) {
    harness
        .deliver(&AmqpValue::Declare(Declare::default()))
        .expect("declare");
    let txn_id = TxnId::new(vec![1]);
    harness
        .manager
        .declared(SequenceNumber::new(0), txn_id.clone())
        .expect("declared");
    assert_eq!(
        harness.manager.discharge_failed(
            &txn_id,
            ErrorCondition::new("amqp:internal-error", "late")
        ),
        Err(EngineStateError::TransactionState {
            txn: txn_id.to_string(),
            action: "discharge failed",
        })
    );
}

#[rstest]
fn declare_failed_rejects_with_condition(mut harness: Harness) {
    harness
        .deliver(&AmqpValue::Declare(Declare::default()))
        .expect("declare");
    let condition = ErrorCondition::new("amqp:not-implemented", "no transactions here");
    let (id, state) = harness
        .manager
        .declare_failed(SequenceNumber::new(0), condition.clone())
        .expect("pending declare");
    assert_eq!(id, SequenceNumber::new(0));
    assert_eq!(state, DeliveryState::Rejected(Some(condition)));
    assert_eq!(harness.manager.pending_declares().count(), 0);
}

#[rstest]
fn other_bodies_are_protocol_violations(mut harness: Harness) {
    let err = harness
        .deliver(&AmqpValue::Other(String::from("hello")))
        .expect_err("coordinator rejects other bodies");
    assert_eq!(
        err,
        ProtocolViolation::UnexpectedCoordinatorPayload { kind: "other" }
    );
}

#[rstest]
fn garbage_is_undecodable(mut harness: Harness) {
    let err = harness
        .deliver_raw(&[0xff, 0xff, 0xff])
        .expect_err("garbage body");
    assert!(matches!(err, ProtocolViolation::UndecodablePayload { .. }));
}

#[rstest]
fn aborted_control_message_is_dropped(mut harness: Harness) {
    let declares = recorder(&mut harness.manager, TransactionEvent::Declare);
    let first = Transfer {
        delivery_id: Some(SequenceNumber::new(0)),
        more: true,
        ..Transfer::default()
    };
    harness
        .manager
        .handle_transfer(&mut harness.window, &first, b"part")
        .expect("first frame");
    let abort = Transfer {
        aborted: true,
        ..Transfer::default()
    };
    let follow_up = harness
        .manager
        .handle_transfer(&mut harness.window, &abort, b"")
        .expect("abort frame");

    assert_eq!(follow_up.released, 4);
    assert_eq!(follow_up.settle, None);
    assert!(declares.lock().expect("lock").is_empty());
    assert!(harness.manager.receiver().delivery(SequenceNumber::new(0)).is_none());
    assert!(!harness.window.is_tracked(SequenceNumber::new(0)));
}
