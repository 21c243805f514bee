//! # Kernel API
//!
//! This crate defines the interface between the user-space async runtime
//! and the kernel's IPC primitive.
//!
//! ## Philosophy
//!
//! The kernel provides **mechanisms**, not policies:
//! - Asynchronous call / answer / forward through phones
//! - A single blocking wait per task, bounded by an optional deadline
//! - Phone hangup and deallocation
//!
//! Everything else (which cooperative task a message belongs to, blocking
//! send/receive, timeouts) is built on top by the runtime.

pub mod error;
pub mod kernel;
pub mod time;

pub use error::KernelError;
pub use kernel::{IpcKernel, KernelEvent};
pub use time::{Duration, Instant};
