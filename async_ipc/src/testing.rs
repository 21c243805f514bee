//! Scripted kernel for unit tests
//!
//! Delivers a fixed script of events, each no earlier than its timestamp,
//! and records everything the runtime sends back. Virtual time only moves
//! inside `wait_cycle`.

use core_types::{CallId, PhoneHandle};
use ipc::{Args, IpcAnswer, Method, Sysarg};
use kernel_api::{Instant, IpcKernel, KernelError, KernelEvent};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

struct Script {
    now: Instant,
    events: VecDeque<(Instant, KernelEvent)>,
    answers: Vec<(CallId, IpcAnswer)>,
    calls: Vec<(PhoneHandle, Method, Args)>,
    next_call: u64,
    refuse_calls: Option<KernelError>,
    fail_forwards: bool,
}

/// A kernel double shared between the test and the runtime
#[derive(Clone)]
pub(crate) struct ScriptedKernel {
    script: Rc<RefCell<Script>>,
}

impl ScriptedKernel {
    pub fn new() -> Self {
        Self {
            script: Rc::new(RefCell::new(Script {
                now: Instant::ZERO,
                events: VecDeque::new(),
                answers: Vec::new(),
                calls: Vec::new(),
                next_call: 0,
                refuse_calls: None,
                fail_forwards: false,
            })),
        }
    }

    /// Queues an event deliverable right away
    pub fn push(&self, event: KernelEvent) {
        let at = self.script.borrow().now;
        self.push_at(at, event);
    }

    /// Queues an event deliverable from `at` on
    pub fn push_at(&self, at: Instant, event: KernelEvent) {
        let mut script = self.script.borrow_mut();
        let index = script
            .events
            .iter()
            .position(|(time, _)| *time > at)
            .unwrap_or(script.events.len());
        script.events.insert(index, (at, event));
    }

    /// Every answer the runtime gave, in order
    pub fn answers(&self) -> Vec<(CallId, IpcAnswer)> {
        self.script.borrow().answers.clone()
    }

    /// Every call the runtime issued, in order
    pub fn calls(&self) -> Vec<(PhoneHandle, Method, Args)> {
        self.script.borrow().calls.clone()
    }

    /// Makes every following `call_async` fail with `err`
    pub fn refuse_calls(&self, err: KernelError) {
        self.script.borrow_mut().refuse_calls = Some(err);
    }

    /// Makes every following forward hit a disconnected phone
    pub fn fail_forwards(&self) {
        self.script.borrow_mut().fail_forwards = true;
    }
}

impl IpcKernel for ScriptedKernel {
    fn now(&self) -> Instant {
        self.script.borrow().now
    }

    fn call_async(
        &mut self,
        phone: PhoneHandle,
        method: Method,
        args: Args,
    ) -> Result<CallId, KernelError> {
        let mut script = self.script.borrow_mut();
        if let Some(err) = script.refuse_calls.clone() {
            return Err(err);
        }
        script.next_call += 1;
        script.calls.push((phone, method, args));
        Ok(CallId::from_raw(script.next_call))
    }

    fn answer(&mut self, call_id: CallId, answer: IpcAnswer) -> Result<(), KernelError> {
        self.script.borrow_mut().answers.push((call_id, answer));
        Ok(())
    }

    fn forward(
        &mut self,
        _call_id: CallId,
        phone: PhoneHandle,
        _method: Method,
        _arg1: Sysarg,
        _arg2: Sysarg,
    ) -> Result<(), KernelError> {
        if self.script.borrow().fail_forwards {
            return Err(KernelError::ForwardFailed(phone));
        }
        Ok(())
    }

    fn hangup(&mut self, _phone: PhoneHandle) -> Result<(), KernelError> {
        Ok(())
    }

    fn phone_dealloc(&mut self, _phone: PhoneHandle) -> Result<(), KernelError> {
        Ok(())
    }

    fn wait_cycle(&mut self, deadline: Option<Instant>) -> Result<KernelEvent, KernelError> {
        let mut script = self.script.borrow_mut();
        let due = match (script.events.front(), deadline) {
            (Some((at, _)), Some(deadline)) => *at <= deadline,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if due {
            if let Some((at, event)) = script.events.pop_front() {
                script.now = script.now.max(at);
                return Ok(event);
            }
        }
        match deadline {
            Some(deadline) => {
                script.now = script.now.max(deadline);
                Ok(KernelEvent::Timeout)
            }
            None => Err(KernelError::WouldBlock),
        }
    }
}
