//! Per-task view of a shared simulated kernel
//!
//! Several runtimes (one per simulated task) drive the same kernel. Each
//! one owns a [`SimEndpoint`] that binds the [`IpcKernel`] interface to its
//! task. The kernel is only borrowed for the duration of a single kernel
//! operation.

use crate::SimulatedKernel;
use core_types::{CallId, PhoneHandle, TaskId};
use ipc::{Args, IpcAnswer, Method, Sysarg};
use kernel_api::{Instant, IpcKernel, KernelError, KernelEvent};
use std::cell::RefCell;
use std::rc::Rc;

/// A simulated kernel shared between tasks of one test
pub type SharedKernel = Rc<RefCell<SimulatedKernel>>;

/// Wraps a kernel for sharing
pub fn shared(kernel: SimulatedKernel) -> SharedKernel {
    Rc::new(RefCell::new(kernel))
}

/// The kernel as seen by one task
#[derive(Clone)]
pub struct SimEndpoint {
    kernel: SharedKernel,
    task: TaskId,
}

impl SimEndpoint {
    /// Binds `task` to a shared kernel
    pub fn new(kernel: SharedKernel, task: TaskId) -> Self {
        Self { kernel, task }
    }

    /// Returns the task this endpoint acts for
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// Returns the shared kernel
    pub fn kernel(&self) -> &SharedKernel {
        &self.kernel
    }
}

impl IpcKernel for SimEndpoint {
    fn now(&self) -> Instant {
        self.kernel.borrow().now()
    }

    fn call_async(
        &mut self,
        phone: PhoneHandle,
        method: Method,
        args: Args,
    ) -> Result<CallId, KernelError> {
        self.kernel
            .borrow_mut()
            .call_async(self.task, phone, method, args)
    }

    fn answer(&mut self, call_id: CallId, answer: IpcAnswer) -> Result<(), KernelError> {
        self.kernel.borrow_mut().answer(self.task, call_id, answer)
    }

    fn forward(
        &mut self,
        call_id: CallId,
        phone: PhoneHandle,
        method: Method,
        arg1: Sysarg,
        arg2: Sysarg,
    ) -> Result<(), KernelError> {
        self.kernel
            .borrow_mut()
            .forward(self.task, call_id, phone, method, arg1, arg2)
    }

    fn hangup(&mut self, phone: PhoneHandle) -> Result<(), KernelError> {
        self.kernel.borrow_mut().hangup(self.task, phone)
    }

    fn phone_dealloc(&mut self, phone: PhoneHandle) -> Result<(), KernelError> {
        self.kernel.borrow_mut().phone_dealloc(self.task, phone)
    }

    fn wait_cycle(&mut self, deadline: Option<Instant>) -> Result<KernelEvent, KernelError> {
        self.kernel.borrow_mut().wait_cycle(self.task, deadline)
    }
}
