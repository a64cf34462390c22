//! Tests for Display implementations on error types.

use std::sync::Arc;

use amqp_engine::{
    ConfigError,
    EngineError,
    EngineStateError,
    LinkHandle,
    LinkId,
    ProtocolViolation,
    SequenceNumber,
    SessionId,
};
use rstest::rstest;

#[rstest]
#[case(
    ProtocolViolation::MissingDeliveryId,
    "no delivery-id specified on first transfer of new delivery"
)]
#[case(
    ProtocolViolation::IllegalMultiplex { current: SequenceNumber::new(3), found: SequenceNumber::new(4) },
    "illegal multiplex of deliveries on same link with delivery-id 3 and 4"
)]
#[case(
    ProtocolViolation::DrainCreditNotZero { credit: 2 },
    "receiver read flow with drain set but credit was 2"
)]
#[case(
    ProtocolViolation::UnknownChannel { channel: 9 },
    "frame received on unmapped channel 9"
)]
#[case(
    ProtocolViolation::HandleMaxExceeded { handle_max: 3 },
    "remote attach exceeds handle-max 3"
)]
fn protocol_violation_messages(#[case] violation: ProtocolViolation, #[case] expected: &str) {
    assert_eq!(violation.to_string(), expected);
}

#[test]
fn state_errors_name_the_endpoint() {
    let link = LinkId::new(SessionId(1), LinkHandle(4));
    assert_eq!(
        EngineStateError::NoCredit(link).to_string(),
        "link channel 1/handle 4 has no credit"
    );
    assert_eq!(
        EngineStateError::AlreadyOpen { endpoint: "session" }.to_string(),
        "session is already open"
    );
}

#[test]
fn failed_engine_error_wraps_the_cause() {
    let cause = EngineError::from(ProtocolViolation::UnknownHandle { handle: 7 });
    let failed = EngineError::Failed(Arc::new(cause));
    assert_eq!(
        failed.to_string(),
        "engine failed: protocol violation: frame received for unattached handle 7"
    );
    assert_eq!(
        EngineError::from(ConfigError::EmptyContainerId).to_string(),
        "invalid configuration: container id must not be empty"
    );
}
