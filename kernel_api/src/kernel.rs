//! Kernel IPC interface consumed by the async runtime

use crate::{Instant, KernelError};
use core_types::{CallId, PhoneHandle};
use ipc::{Args, IpcAnswer, IpcCall, Method, Sysarg};
use serde::{Deserialize, Serialize};

/// Something the kernel delivered to a task's answerbox
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelEvent {
    /// An incoming call that must be answered exactly once
    Call { call_id: CallId, call: IpcCall },
    /// The answer to a call this task sent earlier
    Answer { call_id: CallId, answer: IpcAnswer },
    /// An interrupt-style notification; never answered
    Notification { call_id: CallId, call: IpcCall },
    /// The wait's deadline passed with nothing delivered
    Timeout,
}

/// The synchronous kernel call/answer primitive, as seen by one task
///
/// Every method acts on behalf of the task the implementation is bound to.
/// Calls are asynchronous at the kernel level: `call_async` returns the
/// call identity immediately and the answer later shows up as a
/// [`KernelEvent::Answer`] from [`IpcKernel::wait_cycle`].
///
/// Multiple implementations are possible:
/// - Simulated kernel (deterministic, virtual time)
/// - Real kernel (syscalls)
///
/// # Example
///
/// ```
/// use ipc::{Method, ResultCode};
/// use kernel_api::{IpcKernel, KernelError, KernelEvent};
/// use core_types::PhoneHandle;
///
/// fn ping<K: IpcKernel>(kernel: &mut K, phone: PhoneHandle) -> Result<ResultCode, KernelError> {
///     let call_id = kernel.call_async(phone, Method::FIRST_USER, [0; 5])?;
///     loop {
///         if let KernelEvent::Answer { call_id: id, answer } = kernel.wait_cycle(None)? {
///             if id == call_id {
///                 return Ok(answer.retval);
///             }
///         }
///     }
/// }
/// ```
pub trait IpcKernel {
    /// Current reading of the kernel's monotonic clock
    fn now(&self) -> Instant;

    /// Sends a call through a phone
    ///
    /// Fails locally, without contacting the peer, when the phone is hung
    /// up, slammed, or still connecting.
    fn call_async(
        &mut self,
        phone: PhoneHandle,
        method: Method,
        args: Args,
    ) -> Result<CallId, KernelError>;

    /// Answers an incoming call
    fn answer(&mut self, call_id: CallId, answer: IpcAnswer) -> Result<(), KernelError>;

    /// Forwards an incoming call through one of this task's phones
    ///
    /// The answer still goes to the original caller. If the phone is not
    /// connected the caller receives `EFORWARD` and this returns
    /// [`KernelError::ForwardFailed`].
    fn forward(
        &mut self,
        call_id: CallId,
        phone: PhoneHandle,
        method: Method,
        arg1: Sysarg,
        arg2: Sysarg,
    ) -> Result<(), KernelError>;

    /// Hangs up a phone; the peer receives a phone-hungup call
    fn hangup(&mut self, phone: PhoneHandle) -> Result<(), KernelError>;

    /// Releases a phone handle
    fn phone_dealloc(&mut self, phone: PhoneHandle) -> Result<(), KernelError>;

    /// Blocks until something is delivered or `deadline` passes
    fn wait_cycle(&mut self, deadline: Option<Instant>) -> Result<KernelEvent, KernelError>;
}

impl<K: IpcKernel + ?Sized> IpcKernel for Box<K> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn call_async(
        &mut self,
        phone: PhoneHandle,
        method: Method,
        args: Args,
    ) -> Result<CallId, KernelError> {
        (**self).call_async(phone, method, args)
    }

    fn answer(&mut self, call_id: CallId, answer: IpcAnswer) -> Result<(), KernelError> {
        (**self).answer(call_id, answer)
    }

    fn forward(
        &mut self,
        call_id: CallId,
        phone: PhoneHandle,
        method: Method,
        arg1: Sysarg,
        arg2: Sysarg,
    ) -> Result<(), KernelError> {
        (**self).forward(call_id, phone, method, arg1, arg2)
    }

    fn hangup(&mut self, phone: PhoneHandle) -> Result<(), KernelError> {
        (**self).hangup(phone)
    }

    fn phone_dealloc(&mut self, phone: PhoneHandle) -> Result<(), KernelError> {
        (**self).phone_dealloc(phone)
    }

    fn wait_cycle(&mut self, deadline: Option<Instant>) -> Result<KernelEvent, KernelError> {
        (**self).wait_cycle(deadline)
    }
}
