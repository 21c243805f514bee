//! # Inter-Process Communication (IPC)
//!
//! This crate defines the fixed-shape kernel message.
//!
//! ## Message shape
//!
//! A call carries an opaque call identity (assigned by the kernel), a method
//! code, five machine-word arguments and the hash of the phone it was sent
//! through. An answer carries a result code and five machine-word return
//! values. Nothing else travels through the kernel.
//!
//! Reserved method codes ([`Method::PHONE_HUNGUP`], [`Method::CONNECT_ME`],
//! [`Method::CONNECT_ME_TO`], [`Method::CONNECT_TO_ME`]) are interpreted by
//! the kernel and the async runtime; service protocols start at
//! [`Method::FIRST_USER`].

pub mod codes;
pub mod message;

pub use codes::{Method, ResultCode};
pub use message::{Args, IpcAnswer, IpcCall, Sysarg, IPC_CALL_LEN};
