//! Kernel error types

use core_types::{CallId, CapabilityError, PhoneHandle, TaskId};
use ipc::{Method, ResultCode};
use thiserror::Error;

/// Errors returned by the kernel IPC interface
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KernelError {
    /// The handle does not name a phone in the caller's table
    #[error("Invalid phone handle: {0}")]
    InvalidHandle(PhoneHandle),

    /// The phone was hung up or slammed
    #[error("Phone {0} is hung up")]
    HungUp(PhoneHandle),

    /// The phone has not finished connecting
    #[error("Phone {0} is not connected")]
    NotConnected(PhoneHandle),

    /// The call is not pending for the caller
    #[error("No such pending call: {0}")]
    NoSuchCall(CallId),

    /// The task does not exist
    #[error("No such task: {0}")]
    NoSuchTask(TaskId),

    /// The method may only be generated by the kernel
    #[error("Method {0} is reserved")]
    ReservedMethod(Method),

    /// A forward hit a disconnected phone; the call was answered with EFORWARD
    #[error("Forward failed through {0}")]
    ForwardFailed(PhoneHandle),

    /// A bounded kernel table is exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// Nothing can ever arrive without an outside event
    ///
    /// Only simulated kernels report this; a real kernel blocks instead.
    #[error("Wait would block forever")]
    WouldBlock,
}

impl KernelError {
    /// Maps the error onto the result code a peer would see
    pub fn to_result_code(&self) -> ResultCode {
        match self {
            KernelError::InvalidHandle(_) | KernelError::NoSuchTask(_) => ResultCode::NoEntry,
            KernelError::HungUp(_) | KernelError::NotConnected(_) => ResultCode::Hangup,
            KernelError::NoSuchCall(_) | KernelError::ReservedMethod(_) => ResultCode::Invalid,
            KernelError::ForwardFailed(_) => ResultCode::Forward,
            KernelError::ResourceExhausted(_) => ResultCode::Limit,
            KernelError::WouldBlock => ResultCode::Timeout,
        }
    }
}

impl From<CapabilityError> for KernelError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::TableFull => KernelError::ResourceExhausted("phone table"),
            CapabilityError::NotAllocated(handle) => KernelError::InvalidHandle(handle),
        }
    }
}
