//! Call and answer shapes

use crate::{Method, ResultCode};
use core_types::PhoneHash;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A machine-word IPC argument
pub type Sysarg = u64;

/// Number of argument words carried by a call or an answer
pub const IPC_CALL_LEN: usize = 5;

/// Argument words of a call or answer
pub type Args = [Sysarg; IPC_CALL_LEN];

/// Payload of a call as seen by the receiver
///
/// `in_phone_hash` is filled in by the kernel and identifies the phone the
/// call travelled through; it is the routing key of the async runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcCall {
    /// Method code
    pub method: Method,
    /// Argument words
    pub args: Args,
    /// Identity of the sending phone
    pub in_phone_hash: PhoneHash,
}

impl IpcCall {
    /// Creates a call with zeroed arguments
    pub fn new(method: Method, in_phone_hash: PhoneHash) -> Self {
        Self {
            method,
            args: [0; IPC_CALL_LEN],
            in_phone_hash,
        }
    }

    /// Sets all argument words
    pub fn with_args(mut self, args: Args) -> Self {
        self.args = args;
        self
    }

    /// Returns argument `n` (1-based, like the wire layout)
    ///
    /// # Panics
    ///
    /// Panics if `n` is not in `1..=5`.
    pub fn arg(&self, n: usize) -> Sysarg {
        self.args[n - 1]
    }

    /// Fifth argument; carries a phone hash or handle on connection calls
    pub fn arg5(&self) -> Sysarg {
        self.args[IPC_CALL_LEN - 1]
    }

    /// Returns true for the phone-hungup notification
    pub fn is_hangup(&self) -> bool {
        self.method == Method::PHONE_HUNGUP
    }
}

impl fmt::Display for IpcCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} via {}", self.method, self.args, self.in_phone_hash)
    }
}

/// Answer to a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpcAnswer {
    /// Result code
    pub retval: ResultCode,
    /// Return words
    pub args: Args,
}

impl IpcAnswer {
    /// Answer with a result code and no return words
    pub fn new(retval: ResultCode) -> Self {
        Self {
            retval,
            args: [0; IPC_CALL_LEN],
        }
    }

    /// Successful answer with no return words
    pub fn ok() -> Self {
        Self::new(ResultCode::Ok)
    }

    /// Sets all return words
    pub fn with_args(mut self, args: Args) -> Self {
        self.args = args;
        self
    }

    /// Sets return word `n` (1-based)
    pub fn with_arg(mut self, n: usize, value: Sysarg) -> Self {
        self.args[n - 1] = value;
        self
    }

    /// Fifth return word; carries the new phone on connection answers
    pub fn arg5(&self) -> Sysarg {
        self.args[IPC_CALL_LEN - 1]
    }
}

impl From<ResultCode> for IpcAnswer {
    fn from(retval: ResultCode) -> Self {
        Self::new(retval)
    }
}
