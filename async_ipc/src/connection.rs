//! The handler's side of a connection

use crate::registry::{IncomingCall, TrackedCall};
use crate::runtime::Suspend;
use crate::wait::Waiter;
use crate::{AsyncError, Runtime};
use core_types::{CallId, PhoneHandle, PhoneHash};
use ipc::{IpcAnswer, IpcCall, Method, Sysarg};
use kernel_api::{Duration, KernelError};
use tracing::{debug, warn};

/// Handle given to a connection handler
///
/// The connection stays registered until the handler's future completes.
/// Then an opening call the handler never answered is refused with
/// `EHANGUP`, every call still queued is answered with `EHANGUP` and the
/// closing phone-hungup, unless the handler answered it, is acknowledged.
#[derive(Clone)]
pub struct IncomingConnection {
    runtime: Runtime,
    hash: PhoneHash,
}

enum Receive {
    Message(IncomingCall),
    TimedOut,
    Suspend,
    Closed,
}

impl IncomingConnection {
    pub(crate) fn new(runtime: Runtime, hash: PhoneHash) -> Self {
        Self { runtime, hash }
    }

    /// The source phone hash the connection is keyed by
    pub fn phone_hash(&self) -> PhoneHash {
        self.hash
    }

    /// The runtime the connection lives in
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Receives the next call routed to this connection
    ///
    /// Calls come out in arrival order. After the peer hung up (or a forward
    /// through a disconnected phone failed) every receive that finds the
    /// queue empty returns a phone-hungup carrying the closing call id.
    /// Returns `None` if `timeout` passes first; a call that arrives in the
    /// same manager iteration as the deadline wins over the timeout.
    pub async fn get_call(&self, timeout: Option<Duration>) -> Option<IncomingCall> {
        let hash = self.hash;
        let deadline = timeout.map(|timeout| self.runtime.now() + timeout);
        let owner = self.runtime.current_fibril();

        loop {
            let step = self.runtime.with_state(|s| {
                let connection = match s.registry.get_mut(hash) {
                    Some(connection) => connection,
                    None => return Receive::Closed,
                };
                if !connection.forward_failed {
                    if let Some(message) = connection.queue.pop_front() {
                        connection.wait.fired = false;
                        return Receive::Message(message);
                    }
                }
                if let Some(closing) = connection.closing {
                    return Receive::Message(IncomingCall {
                        call_id: closing.call_id,
                        call: IpcCall::new(Method::PHONE_HUNGUP, hash),
                    });
                }
                if connection.wait.fired {
                    connection.wait.fired = false;
                    return Receive::TimedOut;
                }
                s.arm(Waiter::Connection(hash), owner, deadline);
                Receive::Suspend
            });

            match step {
                Receive::Message(message) => return Some(message),
                Receive::TimedOut | Receive::Closed => return None,
                Receive::Suspend => {
                    Suspend::new(self.runtime.clone(), Waiter::Connection(hash)).await
                }
            }
        }
    }

    /// Answers a call received on this connection
    pub fn answer(&self, call_id: CallId, answer: impl Into<IpcAnswer>) -> Result<(), AsyncError> {
        let answer = answer.into();
        self.runtime.kernel().answer(call_id, answer)?;
        self.mark_answered(call_id);
        Ok(())
    }

    fn mark_answered(&self, call_id: CallId) {
        self.runtime.with_state(|s| {
            if let Some(connection) = s.registry.get_mut(self.hash) {
                connection.mark_answered(call_id);
            }
        });
    }

    /// Forwards a call received on this connection through `phone`
    ///
    /// If the kernel refuses because the phone is disconnected, the original
    /// caller has already been answered with `EFORWARD` and this connection
    /// is closed: its next receive yields a phone-hungup.
    pub fn forward(
        &self,
        call_id: CallId,
        phone: PhoneHandle,
        method: Method,
        arg1: Sysarg,
        arg2: Sysarg,
    ) -> Result<(), AsyncError> {
        let forwarded = self
            .runtime
            .kernel()
            .forward(call_id, phone, method, arg1, arg2);
        match forwarded {
            Ok(()) => {
                debug!(hash = %self.hash, %call_id, %phone, "call forwarded");
                self.mark_answered(call_id);
                Ok(())
            }
            Err(KernelError::ForwardFailed(_)) => {
                warn!(hash = %self.hash, %call_id, %phone, "forward failed, closing connection");
                self.runtime.with_state(|s| {
                    if let Some(connection) = s.registry.get_mut(self.hash) {
                        connection.mark_answered(call_id);
                        connection.forward_failed = true;
                        let pending_hangup = connection
                            .closing
                            .map_or(false, |closing| !closing.answered);
                        if !pending_hangup {
                            connection.closing = Some(TrackedCall {
                                call_id,
                                answered: true,
                            });
                        }
                    }
                });
                Err(AsyncError::ForwardFailed)
            }
            Err(err) => Err(err.into()),
        }
    }
}
