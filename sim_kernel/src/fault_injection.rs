//! Deterministic fault injection for testing
//!
//! Tests inject faults into the simulated kernel's delivery pipeline to
//! provoke lost calls and late answers without real timing.
//!
//! ## Example
//!
//! ```
//! use sim_kernel::fault_injection::{FaultPlan, MessageFault};
//! use kernel_api::Duration;
//!
//! let plan = FaultPlan::new()
//!     .with_message_fault(MessageFault::DropNextCalls { count: 1 })
//!     .with_message_fault(MessageFault::DelayNextAnswers {
//!         count: 1,
//!         duration: Duration::from_millis(15),
//!     });
//! ```

use kernel_api::Duration;

/// A fault to inject into event delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageFault {
    /// Lose the next N user calls; they are never delivered nor answered
    DropNextCalls { count: usize },

    /// Deliver the next N user calls after a delay
    DelayNextCalls { count: usize, duration: Duration },

    /// Deliver the next N answers after a delay
    DelayNextAnswers { count: usize, duration: Duration },
}

/// A plan describing all faults to inject
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    message_faults: Vec<MessageFault>,
}

impl FaultPlan {
    /// Creates a new empty fault plan
    pub fn new() -> Self {
        Self {
            message_faults: Vec::new(),
        }
    }

    /// Adds a message fault to the plan
    pub fn with_message_fault(mut self, fault: MessageFault) -> Self {
        self.message_faults.push(fault);
        self
    }

    /// Returns the message faults
    pub fn message_faults(&self) -> &[MessageFault] {
        &self.message_faults
    }
}

/// What to do with one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Deliver immediately
    Now,
    /// Never deliver
    Drop,
    /// Deliver after the given delay
    After(Duration),
}

/// Applies a fault plan, one event at a time
#[derive(Debug)]
pub struct FaultInjector {
    drop_calls: usize,
    delay_calls: usize,
    call_delay: Duration,
    delay_answers: usize,
    answer_delay: Duration,
    events_faulted: usize,
}

impl FaultInjector {
    /// Creates a new fault injector with the given plan
    pub fn new(plan: FaultPlan) -> Self {
        let mut injector = Self {
            drop_calls: 0,
            delay_calls: 0,
            call_delay: Duration::ZERO,
            delay_answers: 0,
            answer_delay: Duration::ZERO,
            events_faulted: 0,
        };

        for fault in plan.message_faults() {
            match fault {
                MessageFault::DropNextCalls { count } => {
                    injector.drop_calls += count;
                }
                MessageFault::DelayNextCalls { count, duration } => {
                    injector.delay_calls = *count;
                    injector.call_delay = *duration;
                }
                MessageFault::DelayNextAnswers { count, duration } => {
                    injector.delay_answers = *count;
                    injector.answer_delay = *duration;
                }
            }
        }

        injector
    }

    /// Decides the fate of a user call
    pub fn on_call(&mut self) -> Delivery {
        if self.drop_calls > 0 {
            self.drop_calls -= 1;
            self.events_faulted += 1;
            return Delivery::Drop;
        }
        if self.delay_calls > 0 {
            self.delay_calls -= 1;
            self.events_faulted += 1;
            return Delivery::After(self.call_delay);
        }
        Delivery::Now
    }

    /// Decides the fate of an answer
    pub fn on_answer(&mut self) -> Delivery {
        if self.delay_answers > 0 {
            self.delay_answers -= 1;
            self.events_faulted += 1;
            return Delivery::After(self.answer_delay);
        }
        Delivery::Now
    }

    /// Returns how many events were dropped or delayed
    pub fn events_faulted(&self) -> usize {
        self.events_faulted
    }
}
