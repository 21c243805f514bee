//! Runtime error types

use core_types::SendId;
use ipc::ResultCode;
use kernel_api::KernelError;
use thiserror::Error;

/// Errors surfaced by the async runtime
///
/// Every variant maps onto the result code the runtime answers with when
/// the error happens while handling an incoming call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AsyncError {
    /// A bounded runtime table (fibrils, outstanding sends, queue) is full
    #[error("Out of memory: {0}")]
    NoMemory(&'static str),

    /// The wait's deadline passed first
    #[error("Timed out")]
    TimedOut,

    /// A connection limit was hit or the connection already exists
    #[error("Limit exceeded: {0}")]
    LimitExceeded(&'static str),

    /// The phone was hung up or slammed
    #[error("Phone hung up")]
    HungUp,

    /// The kernel refused to forward through a disconnected phone
    #[error("Forward failed")]
    ForwardFailed,

    /// The peer answered with a failure code
    #[error("Refused by peer: {0}")]
    Refused(ResultCode),

    /// The send is unknown (never issued, already collected or discarded)
    #[error("No such outstanding send: {0}")]
    NoSuchSend(SendId),

    /// A blocking wait was attempted outside a fibril
    #[error("Not running inside a fibril")]
    NotInFibril,

    /// A configuration value is out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Any other kernel failure
    #[error("Kernel error: {0}")]
    Kernel(KernelError),
}

impl AsyncError {
    /// Maps the error onto the result code a peer would see
    pub fn to_result_code(&self) -> ResultCode {
        match self {
            AsyncError::NoMemory(_) => ResultCode::NoMemory,
            AsyncError::TimedOut => ResultCode::Timeout,
            AsyncError::LimitExceeded(_) => ResultCode::Limit,
            AsyncError::HungUp => ResultCode::Hangup,
            AsyncError::ForwardFailed => ResultCode::Forward,
            AsyncError::Refused(code) => *code,
            AsyncError::NoSuchSend(_) => ResultCode::NoEntry,
            AsyncError::NotInFibril | AsyncError::InvalidConfig(_) => ResultCode::Invalid,
            AsyncError::Kernel(err) => err.to_result_code(),
        }
    }
}

impl From<KernelError> for AsyncError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::HungUp(_) => AsyncError::HungUp,
            KernelError::ForwardFailed(_) => AsyncError::ForwardFailed,
            other => AsyncError::Kernel(other),
        }
    }
}
