//! Phone Lifecycle Scenarios
//!
//! Allocation, hangup and deallocation of phones as seen through the
//! runtime, checked against the kernel's phone audit log.

use async_ipc::{AsyncError, Runtime};
use core_types::{PhoneEvent, PhoneState};
use kernel_api::KernelError;
use sim_kernel::{SimConfig, SimulatedKernel};
use std::cell::RefCell;
use std::rc::Rc;
use tests_ipc::{echo_server, run_all, Simulation, ECHO};

/// Test: a phone that never connected is destroyed on dealloc
///
/// This validates that:
/// 1. Nothing references the phone object after dealloc
/// 2. The freed handle is the next one handed out
#[test]
fn test_unconnected_phone_dealloc_reuses_handle() {
    let sim = Simulation::new();
    let owner = sim.task("owner");
    let runtime = Runtime::new(owner.clone()).expect("runtime");

    let (handle, hash) = sim
        .kernel
        .borrow_mut()
        .phone_alloc(owner.task(), false)
        .expect("alloc");
    assert_eq!(
        sim.kernel.borrow().phone_state(owner.task(), handle),
        Some(PhoneState::Connecting)
    );

    runtime.phone_dealloc(handle).expect("dealloc");

    let mut kernel = sim.kernel.borrow_mut();
    assert!(!kernel.phone_exists(hash));
    assert_eq!(kernel.phones_in_use(owner.task()), 0);

    let trail: Vec<_> = kernel
        .audit_log()
        .events_for(hash)
        .into_iter()
        .map(|e| e.event.clone())
        .collect();
    assert!(matches!(trail.first(), Some(PhoneEvent::Allocated { .. })));
    assert_eq!(trail.last(), Some(&PhoneEvent::Destroyed { hash }));

    let (reused, new_hash) = kernel.phone_alloc(owner.task(), true).expect("realloc");
    assert_eq!(reused, handle);
    assert_ne!(new_hash, hash);
}

/// Test: a connected phone outlives its handle until the hangup is acknowledged
#[test]
fn test_dealloc_connected_phone_waits_for_acknowledgement() {
    let sim = Simulation::new();
    let client = sim.task("client");
    let server = sim.task("server");
    let phone = sim.connect(&client, &server);
    let hash = sim
        .kernel
        .borrow()
        .phone_hash(client.task(), phone)
        .expect("bootstrap hash");

    let server_rt = echo_server(server);
    let client_rt = Runtime::new(client.clone()).expect("client runtime");

    let rt = client_rt.clone();
    client_rt
        .spawn(async move {
            rt.connect_me(phone).await.expect("connect");
            rt.phone_dealloc(phone).expect("dealloc");
        })
        .expect("spawn client");

    client_rt.run_until_idle().expect("client sends connect");
    server_rt.run_until_idle().expect("server accepts");
    client_rt.run_until_idle().expect("client deallocs");

    {
        let kernel = sim.kernel.borrow();
        assert_eq!(kernel.phones_in_use(client.task()), 0);
        assert!(kernel.phone_exists(hash));
    }

    server_rt.run_until_idle().expect("server acknowledges hangup");

    let kernel = sim.kernel.borrow();
    assert!(!kernel.phone_exists(hash));
    assert_eq!(server_rt.connection_count(), 0);
    let trail = kernel.audit_log().events_for(hash);
    assert!(trail
        .iter()
        .any(|e| matches!(e.event, PhoneEvent::HungUp { .. })));
    assert_eq!(
        trail.last().map(|e| e.event.clone()),
        Some(PhoneEvent::Destroyed { hash })
    );
}

/// Test: after a hangup new sends fail, in-flight calls still complete
#[test]
fn test_hangup_rejects_new_sends() {
    let sim = Simulation::new();
    let client = sim.task("client");
    let server = sim.task("server");
    let phone = sim.connect(&client, &server);

    let server_rt = echo_server(server);
    let client_rt = Runtime::new(client.clone()).expect("client runtime");

    let result = Rc::new(RefCell::new(None));
    let slot = result.clone();
    let rt = client_rt.clone();
    client_rt
        .spawn(async move {
            rt.connect_me(phone).await.expect("connect");
            let in_flight = rt.send(phone, ECHO, [10, 0, 0, 0, 0], true).expect("send");
            rt.hangup(phone).expect("hangup");
            let refused = rt.send(phone, ECHO, [0; 5], false);
            let reply = rt.wait(in_flight).await;
            *slot.borrow_mut() = Some((refused, reply));
        })
        .expect("spawn client");

    run_all(&[&client_rt, &server_rt]).expect("run");

    let (refused, reply) = result.borrow_mut().take().expect("client finished");
    assert_eq!(refused, Err(AsyncError::HungUp));
    assert_eq!(reply.expect("in-flight reply").arg(1), Some(11));
    assert_eq!(
        sim.kernel.borrow().phone_state(client.task(), phone),
        Some(PhoneState::Hungup)
    );
    assert_eq!(server_rt.stats().closed, 1);
}

/// Test: a full phone table refuses connect-me-to without leaking a send
#[test]
fn test_phone_table_exhaustion() {
    let config = SimConfig {
        phone_limit: 1,
        ..SimConfig::default()
    };
    let sim = Simulation::with_kernel(SimulatedKernel::with_config(config));
    let client = sim.task("client");
    let server = sim.task("server");
    let phone = sim.connect(&client, &server);

    let server_rt = echo_server(server);
    let client_rt = Runtime::new(client).expect("client runtime");

    let result = Rc::new(RefCell::new(None));
    let slot = result.clone();
    let rt = client_rt.clone();
    client_rt
        .spawn(async move {
            *slot.borrow_mut() = Some(rt.connect_me_to(phone, 0, 0, 0).await);
        })
        .expect("spawn client");

    run_all(&[&client_rt, &server_rt]).expect("run");

    assert_eq!(
        result.borrow_mut().take(),
        Some(Err(AsyncError::Kernel(KernelError::ResourceExhausted(
            "phone table"
        ))))
    );
    assert_eq!(client_rt.outstanding_sends(), 0);
    assert_eq!(server_rt.stats().opened, 0);
}
