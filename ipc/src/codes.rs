//! Method and result codes
//!
//! Method codes below [`Method::FIRST_USER`] are reserved for the kernel
//! and the async runtime; everything at or above it is service-defined.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Method code of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Method(u64);

impl Method {
    /// The sender's phone was hung up
    pub const PHONE_HUNGUP: Method = Method(0);
    /// Opens a connection keyed by the caller's phone hash (no new phone)
    pub const CONNECT_ME: Method = Method(1);
    /// Asks the callee to connect a phone back to the caller
    pub const CONNECT_TO_ME: Method = Method(2);
    /// Asks the callee to accept a new phone from the caller
    pub const CONNECT_ME_TO: Method = Method(3);
    /// Lowest method code available to services
    pub const FIRST_USER: Method = Method(1024);

    /// Creates a method code
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw code
    pub const fn as_raw(&self) -> u64 {
        self.0
    }

    /// Returns true for the codes that open a new connection in the receiver
    pub fn opens_connection(&self) -> bool {
        matches!(*self, Method::CONNECT_ME | Method::CONNECT_ME_TO)
    }

    /// Returns true for reserved codes user code may not send directly
    pub fn is_kernel_only(&self) -> bool {
        *self == Method::PHONE_HUNGUP
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Method::PHONE_HUNGUP => f.write_str("PHONE_HUNGUP"),
            Method::CONNECT_ME => f.write_str("CONNECT_ME"),
            Method::CONNECT_TO_ME => f.write_str("CONNECT_TO_ME"),
            Method::CONNECT_ME_TO => f.write_str("CONNECT_ME_TO"),
            Method(raw) => write!(f, "M{}", raw),
        }
    }
}

/// Result code carried by an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultCode {
    /// Success
    Ok,
    /// Out of memory / resource allocation failed
    NoMemory,
    /// No such destination or service
    NoEntry,
    /// The phone or connection is no longer usable
    Hangup,
    /// A forward hit a disconnected phone
    Forward,
    /// A wait's deadline passed
    Timeout,
    /// A bounded table is exhausted or a key is already registered
    Limit,
    /// Malformed request
    Invalid,
    /// Service-defined code
    Other(i64),
}

impl ResultCode {
    const EOK: i64 = 0;
    const ENOENT: i64 = -1;
    const ENOMEM: i64 = -2;
    const ELIMIT: i64 = -3;
    const EHANGUP: i64 = -4;
    const EINVAL: i64 = -5;
    const EFORWARD: i64 = -6;
    const ETIMEOUT: i64 = -7;

    /// Encodes the code as a signed return word
    pub fn as_raw(&self) -> i64 {
        match self {
            ResultCode::Ok => Self::EOK,
            ResultCode::NoEntry => Self::ENOENT,
            ResultCode::NoMemory => Self::ENOMEM,
            ResultCode::Limit => Self::ELIMIT,
            ResultCode::Hangup => Self::EHANGUP,
            ResultCode::Invalid => Self::EINVAL,
            ResultCode::Forward => Self::EFORWARD,
            ResultCode::Timeout => Self::ETIMEOUT,
            ResultCode::Other(raw) => *raw,
        }
    }

    /// Decodes a signed return word
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            Self::EOK => ResultCode::Ok,
            Self::ENOENT => ResultCode::NoEntry,
            Self::ENOMEM => ResultCode::NoMemory,
            Self::ELIMIT => ResultCode::Limit,
            Self::EHANGUP => ResultCode::Hangup,
            Self::EINVAL => ResultCode::Invalid,
            Self::EFORWARD => ResultCode::Forward,
            Self::ETIMEOUT => ResultCode::Timeout,
            other => ResultCode::Other(other),
        }
    }

    /// Returns true for success
    pub fn is_ok(&self) -> bool {
        matches!(self, ResultCode::Ok)
    }

    /// Returns true for codes that mean the peer is gone
    pub fn is_hangup_class(&self) -> bool {
        matches!(self, ResultCode::Hangup | ResultCode::Forward)
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultCode::Ok => f.write_str("EOK"),
            ResultCode::NoMemory => f.write_str("ENOMEM"),
            ResultCode::NoEntry => f.write_str("ENOENT"),
            ResultCode::Hangup => f.write_str("EHANGUP"),
            ResultCode::Forward => f.write_str("EFORWARD"),
            ResultCode::Timeout => f.write_str("ETIMEOUT"),
            ResultCode::Limit => f.write_str("ELIMIT"),
            ResultCode::Invalid => f.write_str("EINVAL"),
            ResultCode::Other(raw) => write!(f, "E({})", raw),
        }
    }
}
