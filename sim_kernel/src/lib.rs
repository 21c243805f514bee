//! # Simulated Kernel
//!
//! This crate provides a simulated implementation of the kernel IPC
//! primitive consumed by the async runtime.
//!
//! ## Purpose
//!
//! The simulated kernel allows testing the runtime without hardware:
//! - Runs under `cargo test`
//! - Deterministic (virtual time, no real concurrency)
//! - Inspectable (phone states, pending calls and an audit trail)
//!
//! ## Model
//!
//! Every task owns an answerbox (a FIFO of [`KernelEvent`]s) and a bounded
//! phone table. A call travels through one of the caller's phones into the
//! callee's answerbox and stays pending until the callee answers or
//! forwards it. Answers travel back into the caller's answerbox.
//!
//! Virtual time only moves inside [`SimulatedKernel::wait_cycle`] (when a
//! waiting task has nothing to receive) or through
//! [`SimulatedKernel::advance_time`].

pub mod endpoint;
pub mod fault_injection;
pub mod message_queue;
pub mod phone;
pub mod phone_audit;
pub mod test_utils;

pub use endpoint::{SharedKernel, SimEndpoint};

use core_types::{CallId, PhoneEvent, PhoneHandle, PhoneHash, PhoneState, TaskId};
use fault_injection::{Delivery, FaultInjector, FaultPlan};
use ipc::{Args, IpcAnswer, IpcCall, Method, ResultCode, Sysarg, IPC_CALL_LEN};
use kernel_api::{Duration, Instant, KernelError, KernelEvent};
use message_queue::MessageQueue;
use phone::{PhoneObject, PhoneTable};
use phone_audit::PhoneAuditLog;
use std::collections::HashMap;
use tracing::{debug, trace, warn};

/// Sizing of the simulated kernel's bounded tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    /// Phone slots per task
    pub phone_limit: usize,
    /// User calls an answerbox holds before senders are refused
    pub answerbox_capacity: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            phone_limit: 64,
            answerbox_capacity: 256,
        }
    }
}

/// Simulated kernel state
pub struct SimulatedKernel {
    config: SimConfig,
    /// Current simulated time
    current_time: Instant,
    tasks: HashMap<TaskId, TaskInfo>,
    /// Phone objects by kernel-wide identity
    phones: HashMap<PhoneHash, PhoneObject>,
    /// Calls delivered (or in delivery) and not yet answered
    calls: HashMap<CallId, CallRecord>,
    /// Events waiting for their delivery time
    delayed: Vec<DelayedEvent>,
    next_call: u64,
    next_phone: u64,
    fault_injector: Option<FaultInjector>,
    audit: PhoneAuditLog,
}

#[derive(Debug)]
struct TaskInfo {
    name: String,
    answerbox: MessageQueue,
    phones: PhoneTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Normal,
    /// The caller's new phone is connecting to whoever answers
    ConnectMeTo { new_phone: PhoneHash },
    /// The callee's new phone is connecting back to the caller
    ConnectToMe { new_phone: PhoneHash },
    /// Kernel-generated phone-hungup; its answer is consumed by the kernel
    Hangup,
}

#[derive(Debug, Clone)]
struct CallRecord {
    caller: TaskId,
    /// Phone the call was originally sent through
    origin: PhoneHash,
    /// Task currently holding the call
    callee: TaskId,
    call: IpcCall,
    kind: CallKind,
}

#[derive(Debug)]
struct DelayedEvent {
    task: TaskId,
    event: KernelEvent,
    deliver_at: Instant,
}

impl SimulatedKernel {
    /// Creates a new simulated kernel
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    /// Creates a simulated kernel with explicit table sizes
    pub fn with_config(config: SimConfig) -> Self {
        Self {
            config,
            current_time: Instant::ZERO,
            tasks: HashMap::new(),
            phones: HashMap::new(),
            calls: HashMap::new(),
            delayed: Vec::new(),
            next_call: 1,
            next_phone: 1,
            fault_injector: None,
            audit: PhoneAuditLog::new(),
        }
    }

    /// Sets the fault injector for this kernel
    pub fn with_fault_injector(mut self, injector: FaultInjector) -> Self {
        self.fault_injector = Some(injector);
        self
    }

    /// Convenience method that creates a fault injector from a plan
    pub fn with_fault_plan(self, plan: FaultPlan) -> Self {
        self.with_fault_injector(FaultInjector::new(plan))
    }

    /// Returns the current simulated time
    pub fn now(&self) -> Instant {
        self.current_time
    }

    /// Advances simulated time, delivering delayed events that became due
    pub fn advance_time(&mut self, duration: Duration) {
        self.current_time = self.current_time + duration;
        self.release_delayed();
    }

    /// Returns the phone audit log
    pub fn audit_log(&self) -> &PhoneAuditLog {
        &self.audit
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    /// Creates a task with an empty answerbox and phone table
    pub fn create_task(&mut self, name: &str) -> TaskId {
        let task = TaskId::new();
        self.tasks.insert(
            task,
            TaskInfo {
                name: name.to_string(),
                answerbox: MessageQueue::with_capacity(self.config.answerbox_capacity),
                phones: PhoneTable::with_capacity(self.config.phone_limit),
            },
        );
        debug!(%task, name, "task created");
        task
    }

    /// Returns the number of live tasks
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Returns the name a task was created with
    pub fn task_name(&self, task: TaskId) -> Option<&str> {
        self.tasks.get(&task).map(|info| info.name.as_str())
    }

    /// Terminates a task and cleans up its IPC state
    ///
    /// 1. Every phone the task owns is hung up and deallocated.
    /// 2. Every call pending in the task is answered with `EHANGUP`.
    /// 3. Every phone connected to the task's answerbox is slammed.
    ///
    /// Answers to calls the task sent are discarded when they arrive.
    pub fn terminate_task(&mut self, task: TaskId) {
        let own_phones = match self.tasks.get(&task) {
            Some(info) => info.phones.entries(),
            None => return,
        };
        for (handle, _) in own_phones {
            if let Err(err) = self.phone_dealloc(task, handle) {
                warn!(%task, %handle, %err, "phone cleanup failed");
            }
        }

        let mut pending: Vec<CallId> = self
            .calls
            .iter()
            .filter(|(_, record)| record.callee == task)
            .map(|(id, _)| *id)
            .collect();
        pending.sort();
        for call_id in pending {
            if let Some(record) = self.calls.remove(&call_id) {
                self.complete_call(call_id, record, IpcAnswer::new(ResultCode::Hangup));
            }
        }

        let mut inbound: Vec<PhoneHash> = self
            .phones
            .values()
            .filter(|phone| phone.callee == Some(task))
            .map(|phone| phone.hash)
            .collect();
        inbound.sort();
        for hash in inbound {
            self.slam(hash);
        }

        self.delayed.retain(|delayed| delayed.task != task);
        self.tasks.remove(&task);
        debug!(%task, "task terminated");
    }

    // ------------------------------------------------------------------
    // Phones
    // ------------------------------------------------------------------

    /// Allocates a phone in `task`, optionally publishing the handle
    pub fn phone_alloc(
        &mut self,
        task: TaskId,
        publish: bool,
    ) -> Result<(PhoneHandle, PhoneHash), KernelError> {
        let hash = PhoneHash::from_raw(self.next_phone);
        self.next_phone += 1;

        let info = self.task_mut(task)?;
        let handle = info.phones.allocate(hash)?;
        if publish {
            info.phones.publish(handle)?;
        }
        self.phones
            .insert(hash, PhoneObject::new(hash, task, handle));

        self.record(PhoneEvent::Allocated {
            owner: task,
            handle,
            hash,
        });
        if publish {
            self.record(PhoneEvent::Published {
                owner: task,
                handle,
            });
        }
        trace!(%task, %handle, %hash, publish, "phone allocated");
        Ok((handle, hash))
    }

    /// Makes an allocated handle visible to user code
    pub fn phone_publish(&mut self, task: TaskId, handle: PhoneHandle) -> Result<(), KernelError> {
        self.task_mut(task)?.phones.publish(handle)?;
        self.record(PhoneEvent::Published {
            owner: task,
            handle,
        });
        Ok(())
    }

    /// Bootstraps a connected, published phone from `from` to `to`
    ///
    /// This stands in for the phones a task is born with (e.g. to a naming
    /// service); all later phones are obtained through connection calls.
    pub fn connect_tasks(&mut self, from: TaskId, to: TaskId) -> Result<PhoneHandle, KernelError> {
        self.task_ref(to)?;
        let (handle, hash) = self.phone_alloc(from, true)?;
        if let Some(phone) = self.phones.get_mut(&hash) {
            phone.state = PhoneState::Connected;
            phone.callee = Some(to);
        }
        self.record(PhoneEvent::Connected {
            owner: from,
            hash,
            callee: to,
        });
        Ok(handle)
    }

    /// Releases a phone handle
    ///
    /// A connected phone is hung up first. The handle is free for reuse
    /// immediately; the phone object is destroyed once no call sent through
    /// it is still unanswered.
    pub fn phone_dealloc(&mut self, task: TaskId, handle: PhoneHandle) -> Result<(), KernelError> {
        let hash = self.task_mut(task)?.phones.free(handle)?;
        self.disconnect(hash);
        if let Some(phone) = self.phones.get_mut(&hash) {
            phone.handle = None;
        }
        self.record(PhoneEvent::Deallocated {
            owner: task,
            handle,
        });
        self.maybe_destroy(hash);
        Ok(())
    }

    /// Hangs up a phone
    ///
    /// The peer receives a phone-hungup call. Calls already sent through the
    /// phone still complete; new sends are refused.
    pub fn hangup(&mut self, task: TaskId, handle: PhoneHandle) -> Result<(), KernelError> {
        let hash = self.task_ref(task)?.phones.lookup(handle)?;
        match self.phones.get(&hash).map(|phone| phone.state) {
            Some(PhoneState::Connecting) => Err(KernelError::NotConnected(handle)),
            Some(_) => {
                self.disconnect(hash);
                Ok(())
            }
            None => Err(KernelError::InvalidHandle(handle)),
        }
    }

    /// Returns the state of the phone behind a handle, published or not
    pub fn phone_state(&self, task: TaskId, handle: PhoneHandle) -> Option<PhoneState> {
        self.phone_hash(task, handle)
            .and_then(|hash| self.phones.get(&hash))
            .map(|phone| phone.state)
    }

    /// Returns the kernel-wide identity of the phone behind a handle
    pub fn phone_hash(&self, task: TaskId, handle: PhoneHandle) -> Option<PhoneHash> {
        self.tasks.get(&task).and_then(|info| {
            info.phones
                .entries()
                .into_iter()
                .find(|(h, _)| *h == handle)
                .map(|(_, hash)| hash)
        })
    }

    /// Returns true while the phone object still exists
    pub fn phone_exists(&self, hash: PhoneHash) -> bool {
        self.phones.contains_key(&hash)
    }

    /// Returns the number of occupied phone slots of a task
    pub fn phones_in_use(&self, task: TaskId) -> usize {
        self.tasks
            .get(&task)
            .map_or(0, |info| info.phones.in_use())
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    /// Sends a call through one of `task`'s phones
    ///
    /// Connection methods are interpreted here:
    /// - `CONNECT_ME`: arg5 carries the sending phone's hash
    /// - `CONNECT_ME_TO`: a new unpublished phone is allocated in the caller
    ///   and its hash travels in arg5
    /// - `CONNECT_TO_ME`: a new unpublished phone back to the caller is
    ///   allocated in the callee and its handle travels in arg5
    pub fn call_async(
        &mut self,
        task: TaskId,
        handle: PhoneHandle,
        method: Method,
        args: Args,
    ) -> Result<CallId, KernelError> {
        if method.is_kernel_only() {
            return Err(KernelError::ReservedMethod(method));
        }

        let hash = self.task_ref(task)?.phones.lookup(handle)?;
        let phone = self
            .phones
            .get(&hash)
            .ok_or(KernelError::InvalidHandle(handle))?;
        let callee = match (phone.state, phone.callee) {
            (PhoneState::Connected, Some(callee)) => callee,
            (PhoneState::Hungup | PhoneState::Slammed, _) => {
                return Err(KernelError::HungUp(handle))
            }
            _ => return Err(KernelError::NotConnected(handle)),
        };
        if !self.task_ref(callee)?.answerbox.has_room() {
            return Err(KernelError::ResourceExhausted("answerbox"));
        }

        let mut args = args;
        let kind = match method {
            Method::CONNECT_ME => {
                args[IPC_CALL_LEN - 1] = hash.as_raw();
                CallKind::Normal
            }
            Method::CONNECT_ME_TO => {
                let (_, new_phone) = self.phone_alloc(task, false)?;
                args[IPC_CALL_LEN - 1] = new_phone.as_raw();
                CallKind::ConnectMeTo { new_phone }
            }
            Method::CONNECT_TO_ME => {
                let (new_handle, new_phone) = self.phone_alloc(callee, false)?;
                args[IPC_CALL_LEN - 1] = new_handle.to_word();
                CallKind::ConnectToMe { new_phone }
            }
            _ => CallKind::Normal,
        };

        if let Some(phone) = self.phones.get_mut(&hash) {
            phone.active_calls += 1;
        }
        let call_id = self.next_call_id();
        let call = IpcCall {
            method,
            args,
            in_phone_hash: hash,
        };
        self.calls.insert(
            call_id,
            CallRecord {
                caller: task,
                origin: hash,
                callee,
                call,
                kind,
            },
        );
        debug!(%task, %call_id, %call, "call sent");
        self.deliver_call(callee, call_id, call);
        Ok(call_id)
    }

    /// Answers a call pending in `task`
    ///
    /// Answering an ordinary call with `EHANGUP` slams the caller's phone.
    pub fn answer(
        &mut self,
        task: TaskId,
        call_id: CallId,
        answer: IpcAnswer,
    ) -> Result<(), KernelError> {
        let record = self.take_pending(task, call_id)?;
        trace!(%task, %call_id, retval = %answer.retval, "call answered");
        self.complete_call(call_id, record, answer);
        Ok(())
    }

    /// Forwards a call pending in `task` through one of its phones
    ///
    /// On success the call (with `method`, `arg1` and `arg2` replaced, and
    /// arg5 kept) lands in the phone's answerbox and its answer will go to
    /// the original caller. If the phone is not connected, the original
    /// caller is answered with `EFORWARD` instead. Phone-hungup calls cannot
    /// be forwarded.
    pub fn forward(
        &mut self,
        task: TaskId,
        call_id: CallId,
        handle: PhoneHandle,
        method: Method,
        arg1: Sysarg,
        arg2: Sysarg,
    ) -> Result<(), KernelError> {
        let mut record = self.take_pending(task, call_id)?;
        if record.kind == CallKind::Hangup {
            self.calls.insert(call_id, record);
            return Err(KernelError::ReservedMethod(Method::PHONE_HUNGUP));
        }

        let via = self
            .tasks
            .get(&task)
            .and_then(|info| info.phones.lookup(handle).ok());
        let target = via
            .and_then(|hash| self.phones.get(&hash))
            .filter(|phone| phone.state.accepts_calls())
            .and_then(|phone| phone.callee.map(|callee| (phone.hash, callee)))
            .filter(|(_, callee)| self.tasks.contains_key(callee));

        let (via, callee) = match target {
            Some(target) => target,
            None => {
                warn!(%task, %call_id, %handle, "forward through disconnected phone");
                if let Some(hash) = via {
                    self.record(PhoneEvent::ForwardFailed {
                        forwarder: task,
                        hash,
                    });
                }
                self.complete_call(call_id, record, IpcAnswer::new(ResultCode::Forward));
                return Err(KernelError::ForwardFailed(handle));
            }
        };

        if record.kind == CallKind::Normal && !record.call.method.opens_connection() {
            record.call.method = method;
        }
        record.call.args[0] = arg1;
        record.call.args[1] = arg2;
        record.call.in_phone_hash = via;
        record.callee = callee;
        let call = record.call;
        self.calls.insert(call_id, record);
        debug!(%task, %call_id, %call, "call forwarded");
        self.deliver_call(callee, call_id, call);
        Ok(())
    }

    /// Queues an interrupt-style notification for `task`
    pub fn notify(&mut self, task: TaskId, method: Method, args: Args) -> Result<CallId, KernelError> {
        self.task_ref(task)?;
        let call_id = self.next_call_id();
        let call = IpcCall::new(method, PhoneHash::from_raw(0)).with_args(args);
        self.push_event(task, KernelEvent::Notification { call_id, call });
        Ok(call_id)
    }

    /// Waits for the next event of `task`
    ///
    /// When nothing is queued, virtual time advances to the earlier of the
    /// deadline and the next delayed delivery addressed to `task`. Without a
    /// deadline and without anything scheduled for `task`, the wait could
    /// only be ended by another task, so [`KernelError::WouldBlock`] is
    /// returned instead of blocking.
    pub fn wait_cycle(
        &mut self,
        task: TaskId,
        deadline: Option<Instant>,
    ) -> Result<KernelEvent, KernelError> {
        loop {
            self.release_delayed();
            if let Some(event) = self.task_mut(task)?.answerbox.pop() {
                return Ok(event);
            }

            let next_delivery = self
                .delayed
                .iter()
                .filter(|delayed| delayed.task == task)
                .map(|delayed| delayed.deliver_at)
                .min();

            let target = match (deadline, next_delivery) {
                (Some(deadline), _) if deadline <= self.current_time => {
                    return Ok(KernelEvent::Timeout)
                }
                (Some(deadline), Some(next)) => deadline.min(next),
                (Some(deadline), None) => deadline,
                (None, Some(next)) => next,
                (None, None) => return Err(KernelError::WouldBlock),
            };
            trace!(%task, from = %self.current_time, to = %target, "advancing virtual time");
            self.current_time = self.current_time.max(target);
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Returns the number of calls not yet answered
    pub fn pending_call_count(&self) -> usize {
        self.calls.len()
    }

    /// Returns the number of events queued in a task's answerbox
    pub fn answerbox_len(&self, task: TaskId) -> usize {
        self.tasks.get(&task).map_or(0, |info| info.answerbox.len())
    }

    /// Returns the number of events waiting for their delivery time
    pub fn delayed_count(&self) -> usize {
        self.delayed.len()
    }

    /// Returns when the earliest delayed event becomes due
    pub fn next_delivery(&self) -> Option<Instant> {
        self.delayed.iter().map(|delayed| delayed.deliver_at).min()
    }

    /// Checks if nothing is queued or scheduled anywhere
    pub fn is_idle(&self) -> bool {
        self.tasks.values().all(|info| info.answerbox.is_empty()) && self.delayed.is_empty()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn task_ref(&self, task: TaskId) -> Result<&TaskInfo, KernelError> {
        self.tasks.get(&task).ok_or(KernelError::NoSuchTask(task))
    }

    fn task_mut(&mut self, task: TaskId) -> Result<&mut TaskInfo, KernelError> {
        self.tasks.get_mut(&task).ok_or(KernelError::NoSuchTask(task))
    }

    fn record(&mut self, event: PhoneEvent) {
        self.audit.record_event(self.current_time, event);
    }

    fn next_call_id(&mut self) -> CallId {
        let id = CallId::from_raw(self.next_call);
        self.next_call += 1;
        id
    }

    /// Removes a call record, provided it is pending in `task`
    fn take_pending(&mut self, task: TaskId, call_id: CallId) -> Result<CallRecord, KernelError> {
        match self.calls.remove(&call_id) {
            Some(record) if record.callee == task => Ok(record),
            Some(record) => {
                self.calls.insert(call_id, record);
                Err(KernelError::NoSuchCall(call_id))
            }
            None => Err(KernelError::NoSuchCall(call_id)),
        }
    }

    /// Finishes a call: phone bookkeeping, then the answer to the caller
    fn complete_call(&mut self, call_id: CallId, record: CallRecord, mut answer: IpcAnswer) {
        if let Some(phone) = self.phones.get_mut(&record.origin) {
            phone.active_calls = phone.active_calls.saturating_sub(1);
        }

        match record.kind {
            CallKind::Hangup => {
                trace!(%call_id, hash = %record.origin, "hangup acknowledged");
                self.maybe_destroy(record.origin);
                return;
            }
            CallKind::ConnectMeTo { new_phone } => {
                let accepted = answer.retval.is_ok();
                answer.args[IPC_CALL_LEN - 1] = self
                    .finish_connect(new_phone, record.callee, accepted)
                    .map_or(0, |handle| handle.to_word());
            }
            CallKind::ConnectToMe { new_phone } => {
                let accepted = answer.retval.is_ok();
                answer.args[IPC_CALL_LEN - 1] = self
                    .finish_connect(new_phone, record.caller, accepted)
                    .map_or(0, |_| new_phone.as_raw());
            }
            CallKind::Normal => {
                if answer.retval == ResultCode::Hangup {
                    self.slam(record.origin);
                }
            }
        }

        self.deliver_answer(record.caller, call_id, answer);
        self.maybe_destroy(record.origin);
    }

    /// Completes the connection of a phone allocated by a connection call
    ///
    /// Returns the published handle on success. A refused phone is freed.
    fn finish_connect(
        &mut self,
        hash: PhoneHash,
        callee: TaskId,
        accepted: bool,
    ) -> Option<PhoneHandle> {
        let (owner, handle) = {
            let phone = self.phones.get(&hash)?;
            (phone.owner, phone.handle)
        };
        let handle = match handle {
            Some(handle) => handle,
            None => {
                self.maybe_destroy(hash);
                return None;
            }
        };

        if accepted && self.tasks.contains_key(&callee) {
            let published = self
                .tasks
                .get_mut(&owner)
                .map_or(false, |info| info.phones.publish(handle).is_ok());
            if published {
                if let Some(phone) = self.phones.get_mut(&hash) {
                    phone.state = PhoneState::Connected;
                    phone.callee = Some(callee);
                }
                self.record(PhoneEvent::Connected {
                    owner,
                    hash,
                    callee,
                });
                self.record(PhoneEvent::Published { owner, handle });
                return Some(handle);
            }
        }

        if let Some(info) = self.tasks.get_mut(&owner) {
            if let Err(err) = info.phones.free(handle) {
                warn!(%owner, %handle, %hash, %err, "refused phone not freed");
            }
        }
        self.phones.remove(&hash);
        self.record(PhoneEvent::ConnectFailed { owner, hash });
        None
    }

    /// Moves a phone to `Hungup`, notifying the peer if it was connected
    fn disconnect(&mut self, hash: PhoneHash) {
        let (state, owner, callee) = match self.phones.get(&hash) {
            Some(phone) => (phone.state, phone.owner, phone.callee),
            None => return,
        };

        match state {
            PhoneState::Connected => {
                if let Some(phone) = self.phones.get_mut(&hash) {
                    phone.state = PhoneState::Hungup;
                }
                self.record(PhoneEvent::HungUp { owner, hash });

                let callee = match callee {
                    Some(callee) if self.tasks.contains_key(&callee) => callee,
                    _ => return,
                };
                if let Some(phone) = self.phones.get_mut(&hash) {
                    phone.active_calls += 1;
                }
                let call_id = self.next_call_id();
                let call = IpcCall::new(Method::PHONE_HUNGUP, hash);
                self.calls.insert(
                    call_id,
                    CallRecord {
                        caller: owner,
                        origin: hash,
                        callee,
                        call,
                        kind: CallKind::Hangup,
                    },
                );
                debug!(%owner, %hash, %call_id, "phone hung up");
                self.push_event(callee, KernelEvent::Call { call_id, call });
            }
            PhoneState::Slammed => {
                if let Some(phone) = self.phones.get_mut(&hash) {
                    phone.state = PhoneState::Hungup;
                }
                self.record(PhoneEvent::HungUp { owner, hash });
            }
            PhoneState::Connecting | PhoneState::Hungup => {}
        }
    }

    /// Marks a connected phone as refused by its peer
    fn slam(&mut self, hash: PhoneHash) {
        let owner = match self.phones.get_mut(&hash) {
            Some(phone) if phone.state == PhoneState::Connected => {
                phone.state = PhoneState::Slammed;
                phone.owner
            }
            _ => return,
        };
        debug!(%owner, %hash, "phone slammed");
        self.record(PhoneEvent::Slammed { owner, hash });
    }

    fn maybe_destroy(&mut self, hash: PhoneHash) {
        let reclaimable = self
            .phones
            .get(&hash)
            .map_or(false, PhoneObject::is_reclaimable);
        if reclaimable {
            self.phones.remove(&hash);
            self.record(PhoneEvent::Destroyed { hash });
            trace!(%hash, "phone destroyed");
        }
    }

    fn deliver_call(&mut self, callee: TaskId, call_id: CallId, call: IpcCall) {
        let delivery = self
            .fault_injector
            .as_mut()
            .map_or(Delivery::Now, FaultInjector::on_call);
        self.schedule(callee, KernelEvent::Call { call_id, call }, delivery);
    }

    fn deliver_answer(&mut self, caller: TaskId, call_id: CallId, answer: IpcAnswer) {
        let delivery = self
            .fault_injector
            .as_mut()
            .map_or(Delivery::Now, FaultInjector::on_answer);
        self.schedule(caller, KernelEvent::Answer { call_id, answer }, delivery);
    }

    fn schedule(&mut self, task: TaskId, event: KernelEvent, delivery: Delivery) {
        match delivery {
            Delivery::Now => self.push_event(task, event),
            Delivery::Drop => debug!(%task, ?event, "event dropped by fault plan"),
            Delivery::After(delay) => self.delayed.push(DelayedEvent {
                task,
                event,
                deliver_at: self.current_time + delay,
            }),
        }
    }

    fn push_event(&mut self, task: TaskId, event: KernelEvent) {
        match self.tasks.get_mut(&task) {
            Some(info) => info.answerbox.push_unbounded(event),
            None => trace!(%task, ?event, "recipient gone, event discarded"),
        }
    }

    /// Delivers delayed events that became due, earliest first
    fn release_delayed(&mut self) {
        let now = self.current_time;
        let mut ready = Vec::new();
        self.delayed.retain(|delayed| {
            if delayed.deliver_at <= now {
                ready.push((delayed.deliver_at, delayed.task, delayed.event));
                false
            } else {
                true
            }
        });
        ready.sort_by_key(|(deliver_at, _, _)| *deliver_at);
        for (_, task, event) in ready {
            self.push_event(task, event);
        }
    }
}

impl Default for SimulatedKernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault_injection::MessageFault;

    const PING: Method = Method::new(2000);

    fn pair() -> (SimulatedKernel, TaskId, TaskId, PhoneHandle) {
        let mut kernel = SimulatedKernel::new();
        let client = kernel.create_task("client");
        let server = kernel.create_task("server");
        let phone = kernel.connect_tasks(client, server).unwrap();
        (kernel, client, server, phone)
    }

    fn expect_call(kernel: &mut SimulatedKernel, task: TaskId) -> (CallId, IpcCall) {
        match kernel.wait_cycle(task, None).unwrap() {
            KernelEvent::Call { call_id, call } => (call_id, call),
            other => panic!("expected a call, got {:?}", other),
        }
    }

    fn expect_answer(kernel: &mut SimulatedKernel, task: TaskId) -> (CallId, IpcAnswer) {
        match kernel.wait_cycle(task, None).unwrap() {
            KernelEvent::Answer { call_id, answer } => (call_id, answer),
            other => panic!("expected an answer, got {:?}", other),
        }
    }

    #[test]
    fn test_call_and_answer_round_trip() {
        let (mut kernel, client, server, phone) = pair();
        let hash = kernel.phone_hash(client, phone).unwrap();

        let sent = kernel.call_async(client, phone, PING, [1, 2, 3, 4, 5]).unwrap();
        let (call_id, call) = expect_call(&mut kernel, server);
        assert_eq!(call_id, sent);
        assert_eq!(call.in_phone_hash, hash);
        assert_eq!(call.args, [1, 2, 3, 4, 5]);

        kernel
            .answer(server, call_id, IpcAnswer::ok().with_arg(1, 99))
            .unwrap();
        let (answered, answer) = expect_answer(&mut kernel, client);
        assert_eq!(answered, sent);
        assert_eq!(answer.args[0], 99);
        assert_eq!(kernel.pending_call_count(), 0);
    }

    #[test]
    fn test_answer_twice_is_rejected() {
        let (mut kernel, client, server, phone) = pair();
        kernel.call_async(client, phone, PING, [0; 5]).unwrap();
        let (call_id, _) = expect_call(&mut kernel, server);

        kernel.answer(server, call_id, IpcAnswer::ok()).unwrap();
        assert_eq!(
            kernel.answer(server, call_id, IpcAnswer::ok()),
            Err(KernelError::NoSuchCall(call_id))
        );
    }

    #[test]
    fn test_user_cannot_send_hangup_method() {
        let (mut kernel, client, _, phone) = pair();
        assert_eq!(
            kernel.call_async(client, phone, Method::PHONE_HUNGUP, [0; 5]),
            Err(KernelError::ReservedMethod(Method::PHONE_HUNGUP))
        );
    }

    #[test]
    fn test_hangup_notifies_peer_and_rejects_new_sends() {
        let (mut kernel, client, server, phone) = pair();
        let hash = kernel.phone_hash(client, phone).unwrap();

        kernel.hangup(client, phone).unwrap();
        assert_eq!(kernel.phone_state(client, phone), Some(PhoneState::Hungup));
        assert_eq!(
            kernel.call_async(client, phone, PING, [0; 5]),
            Err(KernelError::HungUp(phone))
        );

        let (call_id, call) = expect_call(&mut kernel, server);
        assert!(call.is_hangup());
        assert_eq!(call.in_phone_hash, hash);

        // The acknowledgement is consumed by the kernel
        kernel.answer(server, call_id, IpcAnswer::ok()).unwrap();
        assert_eq!(kernel.wait_cycle(client, None), Err(KernelError::WouldBlock));
    }

    #[test]
    fn test_in_flight_call_completes_after_hangup() {
        let (mut kernel, client, server, phone) = pair();
        let hash = kernel.phone_hash(client, phone).unwrap();

        let sent = kernel.call_async(client, phone, PING, [0; 5]).unwrap();
        kernel.phone_dealloc(client, phone).unwrap();
        assert!(kernel.phone_exists(hash));

        let (call_id, _) = expect_call(&mut kernel, server);
        assert_eq!(call_id, sent);
        let (hangup_id, hangup) = expect_call(&mut kernel, server);
        assert!(hangup.is_hangup());

        kernel.answer(server, call_id, IpcAnswer::ok()).unwrap();
        let (answered, _) = expect_answer(&mut kernel, client);
        assert_eq!(answered, sent);
        assert!(kernel.phone_exists(hash));

        kernel.answer(server, hangup_id, IpcAnswer::ok()).unwrap();
        assert!(!kernel.phone_exists(hash));
    }

    #[test]
    fn test_answer_with_hangup_slams_phone() {
        let (mut kernel, client, server, phone) = pair();
        kernel.call_async(client, phone, PING, [0; 5]).unwrap();
        let (call_id, _) = expect_call(&mut kernel, server);

        kernel
            .answer(server, call_id, IpcAnswer::new(ResultCode::Hangup))
            .unwrap();
        assert_eq!(kernel.phone_state(client, phone), Some(PhoneState::Slammed));
        assert_eq!(
            kernel.call_async(client, phone, PING, [0; 5]),
            Err(KernelError::HungUp(phone))
        );
    }

    #[test]
    fn test_connect_me_to_accepted() {
        let (mut kernel, client, server, phone) = pair();
        kernel
            .call_async(client, phone, Method::CONNECT_ME_TO, [7, 0, 0, 0, 0])
            .unwrap();
        let (call_id, call) = expect_call(&mut kernel, server);
        let new_hash = PhoneHash::from_raw(call.arg5());
        assert_eq!(call.arg(1), 7);

        kernel.answer(server, call_id, IpcAnswer::ok()).unwrap();
        let (_, answer) = expect_answer(&mut kernel, client);
        let new_phone = PhoneHandle::from_word(answer.arg5()).unwrap();
        assert_eq!(kernel.phone_state(client, new_phone), Some(PhoneState::Connected));
        assert_eq!(kernel.phone_hash(client, new_phone), Some(new_hash));

        kernel.call_async(client, new_phone, PING, [0; 5]).unwrap();
        let (_, call) = expect_call(&mut kernel, server);
        assert_eq!(call.in_phone_hash, new_hash);
    }

    #[test]
    fn test_connect_me_to_phone_deallocated_before_answer() {
        let (mut kernel, client, server, phone) = pair();
        kernel
            .call_async(client, phone, Method::CONNECT_ME_TO, [0; 5])
            .unwrap();
        let (call_id, call) = expect_call(&mut kernel, server);
        let new_hash = PhoneHash::from_raw(call.arg5());

        // The unpublished phone sits in the next slot
        kernel.phone_dealloc(client, PhoneHandle::new(1)).unwrap();
        assert_eq!(kernel.phones_in_use(client), 1);

        kernel.answer(server, call_id, IpcAnswer::ok()).unwrap();
        let (_, answer) = expect_answer(&mut kernel, client);
        assert_eq!(answer.retval, ResultCode::Ok);
        assert_eq!(answer.arg5(), 0);
        assert!(!kernel.phone_exists(new_hash));
        assert_eq!(kernel.phones_in_use(client), 1);
        assert_eq!(kernel.pending_call_count(), 0);
    }

    #[test]
    fn test_connect_me_to_refused_releases_phone() {
        let (mut kernel, client, server, phone) = pair();
        kernel
            .call_async(client, phone, Method::CONNECT_ME_TO, [0; 5])
            .unwrap();
        assert_eq!(kernel.phones_in_use(client), 2);
        let (call_id, call) = expect_call(&mut kernel, server);

        kernel
            .answer(server, call_id, IpcAnswer::new(ResultCode::Limit))
            .unwrap();
        let (_, answer) = expect_answer(&mut kernel, client);
        assert_eq!(answer.retval, ResultCode::Limit);
        assert_eq!(answer.arg5(), 0);
        assert_eq!(kernel.phones_in_use(client), 1);
        assert!(!kernel.phone_exists(PhoneHash::from_raw(call.arg5())));
        assert!(kernel
            .audit_log()
            .has_event(|e| matches!(e, PhoneEvent::ConnectFailed { .. })));
    }

    #[test]
    fn test_connect_to_me_gives_callee_a_phone_back() {
        let (mut kernel, client, server, phone) = pair();
        kernel
            .call_async(client, phone, Method::CONNECT_TO_ME, [0; 5])
            .unwrap();
        let (call_id, call) = expect_call(&mut kernel, server);
        let back = PhoneHandle::from_word(call.arg5()).unwrap();
        assert_eq!(kernel.phone_state(server, back), Some(PhoneState::Connecting));

        kernel.answer(server, call_id, IpcAnswer::ok()).unwrap();
        let (_, answer) = expect_answer(&mut kernel, client);
        assert_eq!(kernel.phone_state(server, back), Some(PhoneState::Connected));
        assert_eq!(
            kernel.phone_hash(server, back).map(|h| h.as_raw()),
            Some(answer.arg5())
        );

        kernel.call_async(server, back, PING, [0; 5]).unwrap();
        let (_, call) = expect_call(&mut kernel, client);
        assert_eq!(call.in_phone_hash.as_raw(), answer.arg5());
    }

    #[test]
    fn test_forward_reaches_third_task_and_answer_goes_to_caller() {
        let (mut kernel, client, server, phone) = pair();
        let backend = kernel.create_task("backend");
        let to_backend = kernel.connect_tasks(server, backend).unwrap();

        let sent = kernel.call_async(client, phone, PING, [1, 2, 3, 4, 5]).unwrap();
        let (call_id, _) = expect_call(&mut kernel, server);
        kernel
            .forward(server, call_id, to_backend, Method::new(3000), 10, 20)
            .unwrap();

        let (forwarded_id, call) = expect_call(&mut kernel, backend);
        assert_eq!(forwarded_id, sent);
        assert_eq!(call.method, Method::new(3000));
        assert_eq!(call.args, [10, 20, 3, 4, 5]);

        kernel.answer(backend, forwarded_id, IpcAnswer::ok()).unwrap();
        let (answered, _) = expect_answer(&mut kernel, client);
        assert_eq!(answered, sent);
        assert_eq!(kernel.answerbox_len(server), 0);
    }

    #[test]
    fn test_forward_through_hung_up_phone_answers_eforward() {
        let (mut kernel, client, server, phone) = pair();
        let backend = kernel.create_task("backend");
        let to_backend = kernel.connect_tasks(server, backend).unwrap();
        kernel.hangup(server, to_backend).unwrap();

        kernel.call_async(client, phone, PING, [0; 5]).unwrap();
        let (call_id, _) = expect_call(&mut kernel, server);
        assert_eq!(
            kernel.forward(server, call_id, to_backend, PING, 0, 0),
            Err(KernelError::ForwardFailed(to_backend))
        );

        let (_, answer) = expect_answer(&mut kernel, client);
        assert_eq!(answer.retval, ResultCode::Forward);
        assert!(kernel
            .audit_log()
            .has_event(|e| matches!(e, PhoneEvent::ForwardFailed { .. })));
    }

    #[test]
    fn test_hangup_call_cannot_be_forwarded() {
        let (mut kernel, client, server, phone) = pair();
        let backend = kernel.create_task("backend");
        let to_backend = kernel.connect_tasks(server, backend).unwrap();

        kernel.hangup(client, phone).unwrap();
        let (call_id, _) = expect_call(&mut kernel, server);
        assert_eq!(
            kernel.forward(server, call_id, to_backend, PING, 0, 0),
            Err(KernelError::ReservedMethod(Method::PHONE_HUNGUP))
        );
        // Still pending and answerable
        kernel.answer(server, call_id, IpcAnswer::ok()).unwrap();
    }

    #[test]
    fn test_unconnected_phone_dealloc_frees_handle_for_reuse() {
        let mut kernel = SimulatedKernel::new();
        let task = kernel.create_task("task");
        let (handle, hash) = kernel.phone_alloc(task, true).unwrap();
        assert_eq!(kernel.phone_state(task, handle), Some(PhoneState::Connecting));

        kernel.phone_dealloc(task, handle).unwrap();
        assert!(!kernel.phone_exists(hash));
        assert_eq!(kernel.phones_in_use(task), 0);
        assert_eq!(kernel.pending_call_count(), 0);

        let (reused, new_hash) = kernel.phone_alloc(task, true).unwrap();
        assert_eq!(reused, handle);
        assert_ne!(new_hash, hash);
    }

    #[test]
    fn test_phone_table_limit() {
        let mut kernel = SimulatedKernel::with_config(SimConfig {
            phone_limit: 1,
            ..SimConfig::default()
        });
        let task = kernel.create_task("task");
        kernel.phone_alloc(task, true).unwrap();
        assert_eq!(
            kernel.phone_alloc(task, true),
            Err(KernelError::ResourceExhausted("phone table"))
        );
    }

    #[test]
    fn test_full_answerbox_refuses_calls() {
        let mut kernel = SimulatedKernel::with_config(SimConfig {
            answerbox_capacity: 1,
            ..SimConfig::default()
        });
        let client = kernel.create_task("client");
        let server = kernel.create_task("server");
        let phone = kernel.connect_tasks(client, server).unwrap();

        kernel.call_async(client, phone, PING, [0; 5]).unwrap();
        assert_eq!(
            kernel.call_async(client, phone, PING, [0; 5]),
            Err(KernelError::ResourceExhausted("answerbox"))
        );
    }

    #[test]
    fn test_wait_cycle_times_out_at_deadline() {
        let (mut kernel, client, _, _) = pair();
        let deadline = Instant::ZERO + Duration::from_millis(10);
        assert_eq!(kernel.wait_cycle(client, Some(deadline)), Ok(KernelEvent::Timeout));
        assert_eq!(kernel.now(), deadline);
    }

    #[test]
    fn test_delayed_answer_arrives_after_deadline() {
        let mut kernel = SimulatedKernel::new().with_fault_plan(
            FaultPlan::new().with_message_fault(MessageFault::DelayNextAnswers {
                count: 1,
                duration: Duration::from_millis(15),
            }),
        );
        let client = kernel.create_task("client");
        let server = kernel.create_task("server");
        let phone = kernel.connect_tasks(client, server).unwrap();

        let sent = kernel.call_async(client, phone, PING, [0; 5]).unwrap();
        let (call_id, _) = expect_call(&mut kernel, server);
        kernel.answer(server, call_id, IpcAnswer::ok()).unwrap();

        let deadline = Instant::ZERO + Duration::from_millis(10);
        assert_eq!(kernel.wait_cycle(client, Some(deadline)), Ok(KernelEvent::Timeout));

        let (answered, _) = expect_answer(&mut kernel, client);
        assert_eq!(answered, sent);
        assert_eq!(kernel.now(), Instant::ZERO + Duration::from_millis(15));
    }

    #[test]
    fn test_notification_delivery() {
        let mut kernel = SimulatedKernel::new();
        let task = kernel.create_task("driver");
        kernel.notify(task, Method::new(5000), [1, 0, 0, 0, 0]).unwrap();
        match kernel.wait_cycle(task, None).unwrap() {
            KernelEvent::Notification { call, .. } => assert_eq!(call.arg(1), 1),
            other => panic!("expected a notification, got {:?}", other),
        }
    }

    #[test]
    fn test_terminate_task_cleans_up_both_directions() {
        let (mut kernel, client, server, phone) = pair();
        let back = kernel.connect_tasks(server, client).unwrap();
        let back_hash = kernel.phone_hash(server, back).unwrap();

        kernel.call_async(client, phone, PING, [0; 5]).unwrap();
        kernel.terminate_task(server);

        // The server's phone to the client was hung up first
        let (hangup_id, call) = expect_call(&mut kernel, client);
        assert!(call.is_hangup());
        assert_eq!(call.in_phone_hash, back_hash);
        // Then the pending call was answered with EHANGUP
        let (_, answer) = expect_answer(&mut kernel, client);
        assert_eq!(answer.retval, ResultCode::Hangup);
        assert_eq!(kernel.phone_state(client, phone), Some(PhoneState::Slammed));

        kernel.answer(client, hangup_id, IpcAnswer::ok()).unwrap();
        assert!(!kernel.phone_exists(back_hash));
        assert_eq!(kernel.task_count(), 1);
    }
}
