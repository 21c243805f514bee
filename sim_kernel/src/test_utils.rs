//! Test utilities for IPC scenarios
//!
//! Helpers for building small task topologies and for playing a task's
//! side of the protocol by hand when a test needs exact interleaving.

use crate::endpoint::{shared, SharedKernel, SimEndpoint};
use crate::SimulatedKernel;
use core_types::{CallId, PhoneHandle, TaskId};
use ipc::IpcCall;
use kernel_api::{Instant, KernelEvent};

/// A client and a server task joined by one connected phone
pub struct TaskPair {
    /// The shared kernel
    pub kernel: SharedKernel,
    /// Endpoint of the calling task
    pub client: SimEndpoint,
    /// Endpoint of the answering task
    pub server: SimEndpoint,
    /// The client's phone to the server
    pub phone: PhoneHandle,
}

/// Creates two tasks on `kernel` and connects the first to the second
pub fn task_pair(kernel: SimulatedKernel) -> TaskPair {
    let kernel = shared(kernel);
    let (client, server, phone) = {
        let mut k = kernel.borrow_mut();
        let client = k.create_task("client");
        let server = k.create_task("server");
        let phone = k
            .connect_tasks(client, server)
            .unwrap_or_else(|err| panic!("bootstrap phone: {}", err));
        (client, server, phone)
    };
    TaskPair {
        client: SimEndpoint::new(kernel.clone(), client),
        server: SimEndpoint::new(kernel.clone(), server),
        kernel,
        phone,
    }
}

/// Receives the next call queued for `task`, without advancing time
///
/// Panics if anything other than a call is at the head of the answerbox.
pub fn take_call(kernel: &mut SimulatedKernel, task: TaskId) -> (CallId, IpcCall) {
    let now = kernel.now();
    match kernel.wait_cycle(task, Some(now)) {
        Ok(KernelEvent::Call { call_id, call }) => (call_id, call),
        other => panic!("expected a call for {}, got {:?}", task, other),
    }
}

/// Delivers every delayed event, jumping the clock to each due time
///
/// Returns the instant the last event was released at.
pub fn release_all_delayed(kernel: &mut SimulatedKernel) -> Instant {
    while let Some(due) = kernel.next_delivery() {
        kernel.advance_time(due.duration_since(kernel.now()));
    }
    kernel.now()
}
