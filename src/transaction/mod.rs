//! Transaction coordination over a receiver link.
//!
//! A [`TransactionManager`] wraps the [`Receiver`] the remote controller
//! attached with a coordinator target. Every completed delivery on that link
//! carries a Declare or Discharge body. The manager decodes it, tracks the
//! resulting [`Transaction`] and asks the application to answer through
//! [`TransactionEvent`] handlers; the answers settle the control deliveries.

mod codec;

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
};

pub use codec::{BincodeValueCodec, CodecError, ValueDecoder};
use tracing::{debug, warn};

use crate::{
    delivery::IncomingDelivery,
    endpoint::LinkId,
    error::{EngineStateError, ProtocolViolation},
    event::EventTable,
    link::{Receiver, TransferFollowUp},
    performative::{AmqpValue, DeliveryState, ErrorCondition, Transfer, TxnId},
    sequence::SequenceNumber,
    session::SessionIncomingWindow,
};

/// Error condition sent when a Discharge names no known transaction.
pub const UNKNOWN_ID: &str = "amqp:transaction:unknown-id";
/// Error condition sent when a Discharge arrives for a transaction that is
/// already being discharged.
pub const ILLEGAL_STATE: &str = "amqp:illegal-state";

/// Progress of a coordinated transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionState {
    /// Declare received, awaiting the application's answer.
    Declaring,
    Declared,
    /// Discharge received, awaiting the application's answer.
    Discharging,
}

/// Transaction notifications fired by a coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransactionEvent {
    Declare,
    Discharge,
}

/// One transaction as seen by the coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    declare_id: SequenceNumber,
    txn_id: Option<TxnId>,
    discharge_id: Option<SequenceNumber>,
    rollback: bool,
    state: TransactionState,
}

impl Transaction {
    fn declaring(declare_id: SequenceNumber) -> Self {
        Self {
            declare_id,
            txn_id: None,
            discharge_id: None,
            rollback: false,
            state: TransactionState::Declaring,
        }
    }

    /// Delivery-id of the Declare that opened the transaction.
    #[must_use]
    pub const fn declare_id(&self) -> SequenceNumber { self.declare_id }

    /// Identifier assigned by [`declared`](crate::Engine::declared).
    #[must_use]
    pub const fn txn_id(&self) -> Option<&TxnId> { self.txn_id.as_ref() }

    /// Delivery-id of the Discharge, once one arrived.
    #[must_use]
    pub const fn discharge_id(&self) -> Option<SequenceNumber> { self.discharge_id }

    /// Whether the controller asked for the work to be discarded.
    #[must_use]
    pub const fn is_rollback(&self) -> bool { self.rollback }

    #[must_use]
    pub const fn state(&self) -> TransactionState { self.state }
}

/// Coordinator end of a transactional control link.
pub struct TransactionManager {
    receiver: Receiver,
    decoder: Box<dyn ValueDecoder + Send>,
    declaring: BTreeMap<SequenceNumber, Transaction>,
    transactions: HashMap<TxnId, Transaction>,
    events: EventTable<TransactionEvent, Transaction>,
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("receiver", &self.receiver)
            .field("declaring", &self.declaring.len())
            .field("transactions", &self.transactions.len())
            .finish_non_exhaustive()
    }
}

impl TransactionManager {
    pub(crate) fn new(id: LinkId, name: impl Into<String>) -> Self {
        Self {
            receiver: Receiver::new(id, name),
            decoder: Box::new(BincodeValueCodec),
            declaring: BTreeMap::new(),
            transactions: HashMap::new(),
            events: EventTable::new(),
        }
    }

    /// The receiver carrying the control messages.
    #[must_use]
    pub const fn receiver(&self) -> &Receiver { &self.receiver }

    pub fn receiver_mut(&mut self) -> &mut Receiver { &mut self.receiver }

    /// Replace the payload decoder.
    pub fn set_decoder(&mut self, decoder: impl ValueDecoder + Send + 'static) {
        self.decoder = Box::new(decoder);
    }

    /// A declared transaction by identifier.
    #[must_use]
    pub fn transaction(&self, txn_id: &TxnId) -> Option<&Transaction> { self.transactions.get(txn_id) }

    /// Transactions whose Declare awaits an answer, in delivery order.
    pub fn pending_declares(&self) -> impl Iterator<Item = &Transaction> { self.declaring.values() }

    /// Number of declared, undischarged transactions.
    #[must_use]
    pub fn active_len(&self) -> usize { self.transactions.len() }

    /// Register a handler for [`TransactionEvent::Declare`] or
    /// [`TransactionEvent::Discharge`].
    pub fn on_event<F>(&mut self, kind: TransactionEvent, handler: F)
    where
        F: FnMut(&Transaction) + Send + 'static,
    {
        self.events.register(kind, handler);
    }

    pub(crate) fn handle_transfer(
        &mut self,
        window: &mut SessionIncomingWindow,
        transfer: &Transfer,
        payload: &[u8],
    ) -> Result<TransferFollowUp, ProtocolViolation> {
        let outcome = self.receiver.handle_transfer(window, transfer, payload)?;
        let dropped = TransferFollowUp {
            released: outcome.released,
            settle: None,
        };
        if !outcome.done {
            return Ok(dropped);
        }
        let id = outcome.delivery_id;
        let aborted = self
            .receiver
            .delivery(id)
            .is_some_and(IncomingDelivery::is_aborted);
        if aborted {
            let released = self
                .receiver
                .discard(id)
                .map_or(0, |delivery| delivery.available());
            window.untrack(id);
            debug!(link = %self.receiver.endpoint().id(), delivery_id = %id, "aborted control message dropped");
            return Ok(TransferFollowUp {
                released: dropped.released + released,
                settle: None,
            });
        }
        let Some(body) = self
            .receiver
            .delivery_mut(id)
            .map(IncomingDelivery::read_all)
        else {
            return Ok(dropped);
        };
        let released = body.len();
        let value = self
            .decoder
            .decode(&body)
            .map_err(|err| ProtocolViolation::UndecodablePayload {
                reason: err.to_string(),
            })?;
        let settle = match value {
            AmqpValue::Declare(_) => {
                self.declare(id);
                None
            }
            AmqpValue::Discharge(discharge) => self.discharge(id, &discharge.txn_id, discharge.fail),
            other => {
                return Err(ProtocolViolation::UnexpectedCoordinatorPayload { kind: other.kind() });
            }
        };
        Ok(TransferFollowUp { released, settle })
    }

    fn declare(&mut self, declare_id: SequenceNumber) {
        debug!(delivery_id = %declare_id, "declare received");
        let transaction = Transaction::declaring(declare_id);
        self.events.fire(TransactionEvent::Declare, &transaction);
        self.declaring.insert(declare_id, transaction);
    }

    /// Record a Discharge. Returns the rejection to send when it cannot be
    /// handed to the application.
    fn discharge(
        &mut self,
        discharge_id: SequenceNumber,
        txn_id: &TxnId,
        rollback: bool,
    ) -> Option<(SequenceNumber, DeliveryState)> {
        let Some(transaction) = self.transactions.get_mut(txn_id) else {
            warn!(%txn_id, delivery_id = %discharge_id, "discharge for unknown transaction");
            let condition = ErrorCondition::new(UNKNOWN_ID, format!("unknown transaction {txn_id}"));
            return Some((discharge_id, DeliveryState::Rejected(Some(condition))));
        };
        if transaction.state != TransactionState::Declared {
            warn!(%txn_id, delivery_id = %discharge_id, "discharge repeated");
            let condition =
                ErrorCondition::new(ILLEGAL_STATE, format!("transaction {txn_id} is already discharging"));
            return Some((discharge_id, DeliveryState::Rejected(Some(condition))));
        }
        transaction.discharge_id = Some(discharge_id);
        transaction.rollback = rollback;
        transaction.state = TransactionState::Discharging;
        debug!(%txn_id, rollback, "discharge received");
        self.events.fire(TransactionEvent::Discharge, transaction);
        None
    }

    /// Accept the Declare `declare_id` as transaction `txn_id`.
    pub(crate) fn declared(
        &mut self,
        declare_id: SequenceNumber,
        txn_id: TxnId,
    ) -> Result<(SequenceNumber, DeliveryState), EngineStateError> {
        if self.transactions.contains_key(&txn_id) {
            return Err(EngineStateError::TransactionState {
                txn: txn_id.to_string(),
                action: "declared",
            });
        }
        let mut transaction = self
            .declaring
            .remove(&declare_id)
            .ok_or_else(|| EngineStateError::UnknownTransaction(declare_id.to_string()))?;
        transaction.txn_id = Some(txn_id.clone());
        transaction.state = TransactionState::Declared;
        self.transactions.insert(txn_id.clone(), transaction);
        Ok((declare_id, DeliveryState::Declared { txn_id }))
    }

    pub(crate) fn declare_failed(
        &mut self,
        declare_id: SequenceNumber,
        condition: ErrorCondition,
    ) -> Result<(SequenceNumber, DeliveryState), EngineStateError> {
        self.declaring
            .remove(&declare_id)
            .ok_or_else(|| EngineStateError::UnknownTransaction(declare_id.to_string()))?;
        debug!(delivery_id = %declare_id, condition = %condition.condition, "declare failed");
        Ok((declare_id, DeliveryState::Rejected(Some(condition))))
    }

    fn take_discharging(
        &mut self,
        txn_id: &TxnId,
        action: &'static str,
    ) -> Result<SequenceNumber, EngineStateError> {
        let transaction = self
            .transactions
            .get(txn_id)
            .ok_or_else(|| EngineStateError::UnknownTransaction(txn_id.to_string()))?;
        let Some(discharge_id) = transaction
            .discharge_id
            .filter(|_| transaction.state == TransactionState::Discharging)
        else {
            return Err(EngineStateError::TransactionState {
                txn: txn_id.to_string(),
                action,
            });
        };
        self.transactions.remove(txn_id);
        Ok(discharge_id)
    }

    /// Confirm the pending Discharge of `txn_id`.
    pub(crate) fn discharged(
        &mut self,
        txn_id: &TxnId,
    ) -> Result<(SequenceNumber, DeliveryState), EngineStateError> {
        let discharge_id = self.take_discharging(txn_id, "discharged")?;
        debug!(%txn_id, "transaction discharged");
        Ok((discharge_id, DeliveryState::Accepted))
    }

    pub(crate) fn discharge_failed(
        &mut self,
        txn_id: &TxnId,
        condition: ErrorCondition,
    ) -> Result<(SequenceNumber, DeliveryState), EngineStateError> {
        let discharge_id = self.take_discharging(txn_id, "discharge failed")?;
        debug!(%txn_id, condition = %condition.condition, "discharge failed");
        Ok((discharge_id, DeliveryState::Rejected(Some(condition))))
    }
}

#[cfg(test)]
mod tests;
