//! # Async IPC Runtime
//!
//! Cooperative fibrils on top of a synchronous call/answer kernel.
//!
//! ## Philosophy
//!
//! - **One manager per task**: a single loop owns the kernel wait and
//!   decides which fibril runs next
//! - **Fibrils are futures**: a suspension point is an `.await`, and
//!   nothing else can run in between
//! - **Every call is answered once**: teardown answers what handlers left
//!   behind
//! - **Deterministic under simulation**: virtual time comes from the kernel,
//!   so a simulated kernel makes every run reproducible
//!
//! ## Shape
//!
//! A [`Runtime`] is built from an [`IpcKernel`](kernel_api::IpcKernel)
//! bound to one task. Incoming connection requests start the connection
//! handler in a fresh fibril with an [`IncomingConnection`]; calls through
//! the connected phone queue on it until the handler receives them.
//! Outgoing calls are [`Runtime::send`] followed by [`Runtime::wait`] or
//! [`Runtime::wait_timeout`].
//!
//! [`Runtime::run_until_idle`] drives everything. Against the simulated
//! kernel it returns once no event can ever arrive.

pub mod config;
mod connection;
mod correlation;
mod error;
mod executor;
mod handler;
mod registry;
mod runtime;
mod state;
pub mod stats;
pub mod timeout;
mod wait;

#[cfg(test)]
mod testing;

pub use config::RuntimeConfig;
pub use connection::IncomingConnection;
pub use correlation::Reply;
pub use error::AsyncError;
pub use executor::LocalBoxFuture;
pub use registry::IncomingCall;
pub use runtime::{ManagerState, Runtime, RuntimeBuilder};
pub use stats::RuntimeStats;
pub use timeout::TimeoutQueue;
