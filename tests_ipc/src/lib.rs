//! IPC Scenario Utilities
//!
//! Shared helpers for the cross-crate scenarios under `tests/`.
//!
//! ## Test Philosophy
//!
//! - **One kernel, many runtimes**: every simulated task runs its own
//!   runtime over a single shared simulated kernel
//! - **Virtual time only**: nothing sleeps for real, so every run is
//!   reproducible
//! - **Observe from outside**: assertions look at phone states, the phone
//!   audit log and runtime statistics rather than runtime internals

use async_ipc::{AsyncError, IncomingCall, IncomingConnection, Runtime, RuntimeBuilder};
use core_types::{CallId, PhoneHandle};
use ipc::{IpcAnswer, Method};
use kernel_api::Instant;
use sim_kernel::endpoint::shared;
use sim_kernel::{SharedKernel, SimEndpoint, SimulatedKernel};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Method the echo handler answers with `arg1 + 1`
pub const ECHO: Method = Method::new(1025);

/// Rounds [`run_all`] tolerates before declaring a livelock
const MAX_ROUNDS: usize = 10_000;

/// Installs a test-friendly subscriber once per process
///
/// Filtering follows `RUST_LOG`, defaulting to warnings.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// A simulated kernel shared by the tasks of one scenario
pub struct Simulation {
    /// The shared kernel
    pub kernel: SharedKernel,
}

impl Simulation {
    /// Creates a simulation over a default kernel
    pub fn new() -> Self {
        Self::with_kernel(SimulatedKernel::new())
    }

    /// Creates a simulation over a prepared kernel (e.g. with a fault plan)
    pub fn with_kernel(kernel: SimulatedKernel) -> Self {
        init_tracing();
        Self {
            kernel: shared(kernel),
        }
    }

    /// Creates a task and returns its view of the kernel
    pub fn task(&self, name: &str) -> SimEndpoint {
        let task = self.kernel.borrow_mut().create_task(name);
        SimEndpoint::new(self.kernel.clone(), task)
    }

    /// Gives `from` a connected phone to `to`
    pub fn connect(&self, from: &SimEndpoint, to: &SimEndpoint) -> PhoneHandle {
        self.kernel
            .borrow_mut()
            .connect_tasks(from.task(), to.task())
            .unwrap_or_else(|err| panic!("bootstrap phone: {}", err))
    }

    /// Current virtual time
    pub fn now(&self) -> Instant {
        self.kernel.borrow().now()
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives several runtimes until a full round makes no progress
///
/// Runtimes run in the given order. A runtime waiting with a deadline moves
/// virtual time for everyone, so list servers before their clients when a
/// client waits with a timeout.
pub fn run_all(runtimes: &[&Runtime]) -> Result<usize, AsyncError> {
    let mut total = 0;
    for _ in 0..MAX_ROUNDS {
        let mut round = 0;
        for runtime in runtimes {
            round += runtime.run_until_idle()?;
        }
        if round == 0 {
            return Ok(total);
        }
        total += round;
    }
    panic!("runtimes still busy after {} rounds", MAX_ROUNDS);
}

/// Accepts the connection and answers every call until the peer hangs up
///
/// [`ECHO`] is answered with `arg1 + 1` in the first return word; any other
/// method gets a bare success.
pub async fn echo_handler(connection: IncomingConnection, opening: Option<IncomingCall>) {
    if let Some(opening) = opening {
        answer_or_warn(&connection, opening.call_id, IpcAnswer::ok());
    }
    while let Some(incoming) = connection.get_call(None).await {
        if incoming.call.is_hangup() {
            break;
        }
        let answer = if incoming.call.method == ECHO {
            IpcAnswer::ok().with_arg(1, incoming.call.arg(1) + 1)
        } else {
            IpcAnswer::ok()
        };
        answer_or_warn(&connection, incoming.call_id, answer);
    }
}

/// A runtime for `endpoint` serving every connection with [`echo_handler`]
pub fn echo_server(endpoint: SimEndpoint) -> Runtime {
    RuntimeBuilder::new(endpoint)
        .connection_handler(echo_handler)
        .build()
        .unwrap_or_else(|err| panic!("echo server: {}", err))
}

fn answer_or_warn(connection: &IncomingConnection, call_id: CallId, answer: IpcAnswer) {
    if let Err(err) = connection.answer(call_id, answer) {
        warn!(%call_id, %err, "echo answer not delivered");
    }
}
