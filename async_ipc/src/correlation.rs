//! Correlation table
//!
//! One entry per outstanding asynchronous send. The entry exists before the
//! kernel call is issued, so a reply can never arrive for a send the table
//! does not know about. It lives until the reply is collected by a wait or
//! the send is discarded.

use crate::timeout::TimeoutQueue;
use crate::wait::{WaitDescriptor, Waiter};
use crate::AsyncError;
use core_types::{CallId, SendId};
use ipc::{Args, IpcAnswer, ResultCode, Sysarg};
use std::collections::HashMap;
use tracing::{debug, trace};

/// The collected outcome of a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reply {
    /// Result code of the answer
    pub retval: ResultCode,
    /// Return words, if the send asked to keep them
    pub args: Option<Args>,
}

impl Reply {
    /// Returns true if the peer answered with success
    pub fn is_ok(&self) -> bool {
        self.retval.is_ok()
    }

    /// Returns word `n` (1-based) of a kept reply
    ///
    /// `None` if the words were not kept or `n` is outside `1..=5`.
    pub fn arg(&self, n: usize) -> Option<Sysarg> {
        self.args
            .and_then(|args| n.checked_sub(1).and_then(|i| args.get(i).copied()))
    }
}

#[derive(Debug)]
pub(crate) struct OutstandingSend {
    pub call: Option<CallId>,
    pub done: bool,
    pub retval: ResultCode,
    pub keep_reply: bool,
    pub payload: Option<Args>,
    pub wait: WaitDescriptor,
    /// The caller gave up; the reply is dropped on arrival
    pub abandoned: bool,
}

/// What happened to an arriving reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReplyOutcome {
    /// Stored; a suspended waiter was woken if there was one
    Delivered(SendId),
    /// The send had been discarded; the entry is gone now
    Discarded(SendId),
    /// No send is waiting for this call
    Unknown,
}

#[derive(Debug)]
pub(crate) struct CorrelationTable {
    entries: HashMap<SendId, OutstandingSend>,
    by_call: HashMap<CallId, SendId>,
    next_id: u64,
    limit: usize,
}

impl CorrelationTable {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_call: HashMap::new(),
            next_id: 1,
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reserves an entry for a send about to be issued
    pub fn allocate(&mut self, keep_reply: bool) -> Result<SendId, AsyncError> {
        if self.entries.len() >= self.limit {
            return Err(AsyncError::NoMemory("outstanding sends"));
        }
        let id = SendId::from_raw(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            OutstandingSend {
                call: None,
                done: false,
                retval: ResultCode::Ok,
                keep_reply,
                payload: None,
                wait: WaitDescriptor::new(),
                abandoned: false,
            },
        );
        Ok(id)
    }

    /// Associates an entry with the call the kernel assigned
    pub fn bind(&mut self, send: SendId, call_id: CallId) {
        if let Some(entry) = self.entries.get_mut(&send) {
            entry.call = Some(call_id);
            self.by_call.insert(call_id, send);
        }
    }

    /// Frees an entry
    pub fn release(&mut self, send: SendId) -> Option<OutstandingSend> {
        let entry = self.entries.remove(&send)?;
        if let Some(call_id) = entry.call {
            self.by_call.remove(&call_id);
        }
        Some(entry)
    }

    pub fn get(&self, send: SendId) -> Option<&OutstandingSend> {
        self.entries.get(&send)
    }

    pub fn get_mut(&mut self, send: SendId) -> Option<&mut OutstandingSend> {
        self.entries.get_mut(&send)
    }

    /// Stores an arriving answer in the entry waiting for it
    pub fn on_reply(
        &mut self,
        call_id: CallId,
        answer: IpcAnswer,
        timeouts: &mut TimeoutQueue<Waiter>,
    ) -> ReplyOutcome {
        let send = match self.by_call.get(&call_id) {
            Some(send) => *send,
            None => return ReplyOutcome::Unknown,
        };
        let abandoned = self.entries.get(&send).map_or(true, |entry| entry.abandoned);
        if abandoned {
            self.release(send);
            debug!(%send, %call_id, retval = %answer.retval, "late reply discarded");
            return ReplyOutcome::Discarded(send);
        }

        let entry = match self.entries.get_mut(&send) {
            Some(entry) => entry,
            None => return ReplyOutcome::Unknown,
        };
        entry.retval = answer.retval;
        if entry.keep_reply {
            entry.payload = Some(answer.args);
        }
        entry.done = true;
        if entry.wait.in_timeout_queue {
            timeouts.remove(&Waiter::Send(send));
            entry.wait.in_timeout_queue = false;
        }
        if entry.wait.is_suspended() {
            entry.wait.activate();
        }
        trace!(%send, %call_id, retval = %answer.retval, "reply stored");
        ReplyOutcome::Delivered(send)
    }

    /// Collects and frees a completed entry
    pub fn take_reply(&mut self, send: SendId) -> Option<Reply> {
        match self.entries.get(&send) {
            Some(entry) if entry.done => {}
            _ => return None,
        }
        let entry = self.release(send)?;
        Some(Reply {
            retval: entry.retval,
            args: entry.payload,
        })
    }

    /// Gives up on a send
    ///
    /// A completed entry is freed now; a pending one is freed when its reply
    /// arrives. Returns true if the entry was freed immediately.
    pub fn discard(&mut self, send: SendId) -> Result<bool, AsyncError> {
        let entry = self
            .entries
            .get_mut(&send)
            .ok_or(AsyncError::NoSuchSend(send))?;
        if entry.done {
            self.release(send);
            return Ok(true);
        }
        entry.abandoned = true;
        Ok(false)
    }
}
