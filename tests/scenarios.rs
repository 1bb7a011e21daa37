//! Black-box scenario tests driving the session controller against the
//! deterministic `testsupport` stubs, one per concrete scenario in the
//! controller's design notes (connect happy path, reconnect-on-yield-error,
//! parameter round trip, command response, resource success/failure).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use md5::{Digest, Md5};

use iotsoftbox::config::ClientConfig;
use iotsoftbox::controller::{Controller, ControllerState};
use iotsoftbox::identity::NoopResolver;
use iotsoftbox::named::{NamedCollection, NamedValue};
use iotsoftbox::queue::PublishQueue;
use iotsoftbox::registry::{AttachmentRegistry, ParameterSet};
use iotsoftbox::topics::TOPIC_CFG_UPD;
use iotsoftbox::transport::testsupport::{StubHttp, StubMqtt};
use iotsoftbox::value::{Tag, Value};
use iotsoftbox::Resolver;

fn new_controller(
    registry: Arc<AttachmentRegistry>,
    transport: StubMqtt,
    http: StubHttp,
) -> Controller {
    Controller::new(
        ClientConfig::new("dev1", "ns1"),
        registry,
        Arc::new(PublishQueue::new()),
        Arc::new(AtomicBool::new(true)),
        Arc::new(Mutex::new(ControllerState::Connecting)),
        Box::new(transport),
        Box::new(http),
        Arc::new(Mutex::new(Box::new(NoopResolver::default()) as Box<dyn Resolver>)),
    )
}

#[test]
fn s1_connect_happy_path_then_a_dirty_status_set_is_published_and_cleared() {
    let mut registry = AttachmentRegistry::new();
    let mut status = NamedCollection::new();
    status.push(NamedValue::new("up", Tag::Bool, 1, Value::from(true)));
    let status_handle = registry.attach_status(status).unwrap();
    registry.status(status_handle).unwrap().mark_dirty();
    let registry = Arc::new(registry);

    let mut c = new_controller(registry.clone(), StubMqtt::new(), StubHttp::new(vec![]));
    assert_eq!(c.cycle(10), ControllerState::Connected);
    assert_eq!(c.cycle(10), ControllerState::Connected);

    assert!(!registry.status(status_handle).unwrap().is_dirty());
}

#[test]
fn s2_connect_failure_keeps_status_dirty_for_the_next_attempt() {
    let mut registry = AttachmentRegistry::new();
    let mut status = NamedCollection::new();
    status.push(NamedValue::new("up", Tag::Bool, 1, Value::from(true)));
    let handle = registry.attach_status(status).unwrap();
    registry.status(handle).unwrap().mark_dirty();
    let registry = Arc::new(registry);

    let mut stub = StubMqtt::new();
    stub.connect_should_fail = true;
    let mut c = new_controller(registry.clone(), stub, StubHttp::new(vec![]));
    assert_eq!(c.cycle(10), ControllerState::Connecting);
    // No transport to publish over: the dirty set must still be dirty.
    assert!(registry.status(handle).unwrap().is_dirty());
}

#[test]
fn s3_parameter_update_round_trip_applies_the_accepted_value() {
    let mut registry = AttachmentRegistry::new();
    let mut params = NamedCollection::new();
    params.push(NamedValue::new("rate", Tag::U32, 1, Value::from(1u32)));
    registry.params = Some(ParameterSet::new(params, None));
    let registry = Arc::new(registry);

    let mut transport = StubMqtt::new();
    transport.push_inbound(TOPIC_CFG_UPD, br#"{"cfg":{"cid":7,"cfg":{"rate":{"t":"u32","v":10}}}}"#);

    let mut c = new_controller(registry.clone(), transport, StubHttp::new(vec![]));
    assert_eq!(c.cycle(10), ControllerState::Connected);
    // One more cycle: poll() delivers the inbound directive, applying it.
    c.cycle(10);

    let value = registry.params.as_ref().unwrap().collection.get("rate").unwrap().get();
    assert_eq!(value, Value::from(10u32));
}

#[test]
fn s4_command_with_positive_result_invokes_the_callback_once() {
    let mut registry = AttachmentRegistry::new();
    let invocations = Arc::new(AtomicU32::new(0));
    let counter = invocations.clone();
    registry
        .commands
        .attach(
            "reboot",
            Box::new(move |_args| {
                counter.fetch_add(1, Ordering::SeqCst);
                1
            }),
        )
        .unwrap();
    let registry = Arc::new(registry);

    let mut transport = StubMqtt::new();
    transport.push_inbound("dev/cmd", br#"{"req":"reboot","cid":42,"arg":{}}"#);
    let mut c = new_controller(registry, transport, StubHttp::new(vec![]));
    assert_eq!(c.cycle(10), ControllerState::Connected);
    c.cycle(10);

    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}

#[test]
fn s5_resource_success_notifies_once_with_code_1() {
    let mut registry = AttachmentRegistry::new();
    let code = Arc::new(AtomicU8::new(0));
    let code_cb = code.clone();
    registry
        .resources
        .attach(
            "firmware",
            "1.0",
            Box::new(move |c| code_cb.store(c, Ordering::SeqCst)),
            Box::new(|_bytes, _offset| {}),
        )
        .unwrap();
    let registry = Arc::new(registry);

    let body = b"abcdefgh".to_vec();
    let digest = format!("{:x}", Md5::digest(&body));
    let directive = format!(
        r#"{{"cid":9,"name":"firmware","old":"1.0","new":"1.1","uri":"http://h/f","size":{},"md5":"{}"}}"#,
        body.len(),
        digest
    );
    let mut transport = StubMqtt::new();
    transport.push_inbound("dev/rsc/upd", directive.as_bytes());
    let mut c = new_controller(registry.clone(), transport, StubHttp::new(body));
    assert_eq!(c.cycle(10), ControllerState::Connected);
    for _ in 0..64 {
        c.cycle(10);
        if code.load(Ordering::SeqCst) != 0 {
            break;
        }
    }
    assert_eq!(code.load(Ordering::SeqCst), 1);
    assert!(registry.resources.is_dirty());
}

#[test]
fn s6_resource_md5_mismatch_notifies_once_with_code_2() {
    let mut registry = AttachmentRegistry::new();
    let code = Arc::new(AtomicU8::new(0));
    let code_cb = code.clone();
    registry
        .resources
        .attach(
            "firmware",
            "1.0",
            Box::new(move |c| code_cb.store(c, Ordering::SeqCst)),
            Box::new(|_bytes, _offset| {}),
        )
        .unwrap();
    let registry = Arc::new(registry);

    let body = b"abcdefgh".to_vec();
    let directive = format!(
        r#"{{"cid":9,"name":"firmware","old":"1.0","new":"1.1","uri":"http://h/f","size":{},"md5":"00000000000000000000000000000000"}}"#,
        body.len(),
    );
    let mut transport = StubMqtt::new();
    transport.push_inbound("dev/rsc/upd", directive.as_bytes());
    let mut c = new_controller(registry.clone(), transport, StubHttp::new(body));
    assert_eq!(c.cycle(10), ControllerState::Connected);
    for _ in 0..64 {
        c.cycle(10);
        if code.load(Ordering::SeqCst) != 0 {
            break;
        }
    }
    assert_eq!(code.load(Ordering::SeqCst), 2);
}
