//! # Core Types
//!
//! This crate defines the identifiers and capability vocabulary shared by
//! the kernel interface, the simulated kernel and the async runtime.
//!
//! ## Key Types
//!
//! - [`TaskId`]: a kernel task (owner of an answerbox and a phone table)
//! - [`PhoneHandle`]: a per-task capability slot naming a phone
//! - [`PhoneHash`]: the kernel-wide identity of a phone object
//! - [`CallId`]: correlates a call with its answer
//! - [`SendId`], [`FibrilId`]: runtime-local identities
//! - [`PhoneState`]: the phone lifecycle

pub mod capability;
pub mod ids;

pub use capability::{CapabilityError, PhoneEvent, PhoneState};
pub use ids::{CallId, FibrilId, PhoneHandle, PhoneHash, SendId, TaskId};
