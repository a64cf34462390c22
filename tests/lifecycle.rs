//! Open/close handshakes and endpoint lifecycle notifications.

use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use amqp_engine::{
    EndpointEvent,
    Engine,
    EngineConfig,
    EngineStateError,
    ProtocolViolation,
    SessionId,
    SessionState,
    performative::{ErrorCondition, Performative, Role},
};
use amqp_engine_testing::{LoggerHandle, builders, connected, exchange, logger, written};
use rstest::rstest;

fn counter() -> (Arc<AtomicUsize>, impl FnMut(&amqp_engine::EndpointState) + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&count);
    (count, move |_: &amqp_engine::EndpointState| {
        sink.fetch_add(1, Ordering::SeqCst);
    })
}

fn pair() -> (Engine, Engine) {
    let mut a = Engine::new(EngineConfig::new("a")).expect("engine a");
    let mut b = Engine::new(EngineConfig::new("b")).expect("engine b");
    a.start().expect("start a");
    b.start().expect("start b");
    (a, b)
}

#[test]
fn two_engines_open_and_close_a_connection() {
    let (mut a, mut b) = pair();
    a.open().expect("open a");
    b.open().expect("open b");
    exchange(&mut a, &mut b).expect("open exchange");

    assert_eq!(a.connection().remote_container_id(), Some("b"));
    assert_eq!(b.connection().remote_container_id(), Some("a"));
    assert!(a.connection().state().is_remotely_open());

    a.close(None).expect("close a");
    exchange(&mut a, &mut b).expect("close a");
    assert!(b.connection().state().is_remotely_closed());
    assert!(!b.connection().state().is_locally_closed());

    b.close(None).expect("close b");
    exchange(&mut a, &mut b).expect("close b");
    assert!(a.connection().state().is_remotely_closed());
    assert!(a.state().is_running());
}

#[test]
fn remote_begin_is_announced_and_answered() {
    let (mut a, mut b) = pair();
    let begun = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&begun);
    b.connection_mut()
        .on_remote_begin(move |id| sink.lock().expect("lock").push(*id));

    a.open().expect("open a");
    b.open().expect("open b");
    exchange(&mut a, &mut b).expect("open");
    let session = a.create_session().expect("session");
    a.open_session(session).expect("begin");
    exchange(&mut a, &mut b).expect("begin");

    assert_eq!(*begun.lock().expect("lock"), vec![SessionId(0)]);
    let remote = b.session(SessionId(0)).expect("created by begin");
    assert_eq!(remote.remote_state(), SessionState::Begun);
    assert_eq!(remote.local_state(), SessionState::Unmapped);

    b.open_session(SessionId(0)).expect("answer");
    exchange(&mut a, &mut b).expect("answer");
    let local = a.session(session).expect("session");
    assert_eq!(local.remote_state(), SessionState::Begun);
    assert_eq!(local.remote_channel(), Some(0));
}

#[test]
fn ending_a_session_notifies_open_links() {
    let (mut engine, _peer, session) = connected(EngineConfig::new("local")).expect("connect");
    let link = engine.sender(session, "out").expect("sender");
    engine.open_link(link).expect("attach");
    let (closed, handler) = counter();
    engine
        .link_mut(link)
        .expect("link")
        .endpoint_mut()
        .on_event(EndpointEvent::ParentEndpointClosed, handler);

    engine
        .end_session(session, Some(ErrorCondition::new("amqp:internal-error", "bye")))
        .expect("end");

    assert_eq!(closed.load(Ordering::SeqCst), 1);
    let frames = written(&mut engine);
    assert!(frames.iter().any(|frame| matches!(
        &frame.performative,
        Performative::End(end) if end.error.is_some()
    )));
}

#[test]
fn closing_the_connection_notifies_open_sessions() {
    let (mut engine, _peer, session) = connected(EngineConfig::new("local")).expect("connect");
    let (closed, handler) = counter();
    engine
        .session_mut(session)
        .expect("session")
        .on_event(EndpointEvent::ParentEndpointClosed, handler);

    engine.close(None).expect("close");
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    let err = engine.create_session().expect_err("connection closed");
    assert!(matches!(
        err.state_error(),
        Some(EngineStateError::Closed { endpoint: "connection" })
    ));
}

#[rstest]
#[case::local_first(true)]
#[case::remote_first(false)]
fn link_is_released_after_both_detaches(#[case] local_first: bool) {
    let (mut engine, mut peer, session) = connected(EngineConfig::new("local")).expect("connect");
    let link = engine.receiver(session, "in").expect("receiver");
    engine.open_link(link).expect("attach");
    let handle = peer.attach(&mut engine, "in", Role::Sender).expect("peer attach");

    if local_first {
        engine.close_link(link, None).expect("detach");
        assert!(engine.link(link).is_some());
        peer.send(&mut engine, builders::detach(handle, true)).expect("peer detach");
    } else {
        peer.send(&mut engine, builders::detach(handle, true)).expect("peer detach");
        assert!(engine.link(link).is_some());
        engine.close_link(link, None).expect("detach");
    }
    assert!(engine.link(link).is_none());
    let frames = written(&mut engine);
    assert!(frames.iter().any(|frame| matches!(
        &frame.performative,
        Performative::Detach(detach) if detach.closed && detach.handle == link.handle.0
    )));
}

#[test]
fn session_is_released_after_both_ends() {
    let (mut engine, peer, session) = connected(EngineConfig::new("local")).expect("connect");
    engine.end_session(session, None).expect("end");
    assert!(engine.session(session).is_some());
    peer.send(&mut engine, builders::end()).expect("peer end");
    assert!(engine.session(session).is_none());
}

#[test]
fn shutdown_notifies_every_endpoint_once() {
    let (mut engine, _peer, session) = connected(EngineConfig::new("local")).expect("connect");
    let link = engine.sender(session, "out").expect("sender");
    let (connection_seen, on_connection) = counter();
    let (session_seen, on_session) = counter();
    let (link_seen, on_link) = counter();
    engine
        .connection_mut()
        .on_event(EndpointEvent::EngineShutdown, on_connection);
    engine
        .session_mut(session)
        .expect("session")
        .on_event(EndpointEvent::EngineShutdown, on_session);
    engine
        .link_mut(link)
        .expect("link")
        .endpoint_mut()
        .on_event(EndpointEvent::EngineShutdown, on_link);

    engine.shutdown().expect("shutdown");
    assert!(engine.shutdown().is_err());

    for seen in [&connection_seen, &session_seen, &link_seen] {
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
    let err = engine.open_link(link).expect_err("engine stopped");
    assert_eq!(err.state_error(), Some(&EngineStateError::Shutdown));
}

#[rstest]
fn failure_is_logged(mut logger: LoggerHandle) {
    let (mut engine, peer, _session) = connected(EngineConfig::new("local")).expect("connect");
    peer.send(&mut engine, builders::detach(77, true))
        .expect_err("unknown handle");

    assert!(logger.saw("engine failed"));
}

#[test]
fn remote_open_does_not_open_locally() {
    let (mut a, mut b) = pair();
    a.open().expect("open a");
    exchange(&mut a, &mut b).expect("deliver open");
    assert!(b.connection().state().is_remotely_open());
    assert!(!b.connection().state().is_locally_open());
    assert_eq!(b.pipeline().len(), 0);
}

#[test]
fn remote_attach_reusing_a_link_name_fails_the_engine() {
    let (mut engine, mut peer, _session) = connected(EngineConfig::new("local")).expect("connect");
    peer.attach(&mut engine, "x", Role::Sender).expect("first attach");

    let err = peer
        .attach(&mut engine, "x", Role::Sender)
        .expect_err("name already taken");
    assert_eq!(
        err.protocol_violation(),
        Some(&ProtocolViolation::DuplicateLinkName {
            name: String::from("x")
        })
    );
    assert!(engine.state().failure().is_some());
}

#[test]
fn remote_attach_beyond_handle_max_fails_the_engine() {
    let config = EngineConfig::new("local").with_handle_max(0);
    let (mut engine, mut peer, _session) = connected(config).expect("connect");
    peer.attach(&mut engine, "a", Role::Sender).expect("handle 0");

    let err = peer
        .attach(&mut engine, "b", Role::Sender)
        .expect_err("no handle left");
    assert_eq!(
        err.protocol_violation(),
        Some(&ProtocolViolation::HandleMaxExceeded { handle_max: 0 })
    );
    assert!(!engine.state().is_running());
}

#[test]
fn remote_begin_beyond_channel_max_fails_the_engine() {
    let config = EngineConfig::new("local").with_channel_max(0);
    let (mut engine, _peer, _session) = connected(config).expect("connect");

    let err = engine
        .ingest(1, builders::begin(None, 100), None)
        .expect_err("no channel left");
    assert_eq!(
        err.protocol_violation(),
        Some(&ProtocolViolation::ChannelMaxExceeded { channel_max: 0 })
    );
    assert!(engine.state().failure().is_some());
}
