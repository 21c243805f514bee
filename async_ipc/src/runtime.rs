//! Runtime instance and async manager
//!
//! ## Manager loop
//!
//! One iteration of [`Runtime::run_until_idle`]:
//!
//! 1. Run every ready fibril until each one suspends or finishes.
//! 2. Compute the next deadline from the timeout queue.
//! 3. If it already passed, fire every expired wait and start over.
//! 4. Otherwise wait on the kernel, bounded by the deadline.
//! 5. Dispatch what arrived: replies to the correlation table, connection
//!    requests to a new handler fibril, notifications to the notification
//!    handler, everything else to the connection registry.
//!
//! Fibrils only ever run in step 1, so nothing they do can race with a
//! dispatch.

use crate::connection::IncomingConnection;
use crate::correlation::{Reply, ReplyOutcome};
use crate::executor::{Executor, LocalBoxFuture, YieldNow};
use crate::handler::{self, ConnectionHandler, NotificationHandler};
use crate::registry::{Connection, IncomingCall, RouteOutcome, TrackedCall};
use crate::state::AsyncState;
use crate::wait::{WaitDescriptor, Waiter};
use crate::{AsyncError, RuntimeConfig, RuntimeStats};
use core_types::{CallId, FibrilId, PhoneHandle, PhoneHash, SendId};
use ipc::{Args, IpcAnswer, IpcCall, Method, ResultCode, Sysarg};
use kernel_api::{Duration, Instant, IpcKernel, KernelError, KernelEvent};
use std::cell::{Cell, RefCell, RefMut};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use tracing::{debug, trace, warn};

/// What the manager is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    /// Running fibrils, or not running at all
    Idle,
    /// Looking at the timeout queue
    ComputingDeadline,
    /// Blocked in the kernel
    WaitingOnTransport,
    /// Handing an arrival to its consumer
    Dispatching,
}

/// Builds a [`Runtime`]
///
/// # Example
///
/// ```no_run
/// # use async_ipc::{RuntimeBuilder, RuntimeConfig};
/// # use ipc::{IpcAnswer};
/// # fn kernel() -> Box<dyn kernel_api::IpcKernel> { unimplemented!() }
/// let runtime = RuntimeBuilder::new(kernel())
///     .config(RuntimeConfig::new().with_max_connections(16))
///     .connection_handler(|connection, opening| async move {
///         if let Some(opening) = opening {
///             let _ = connection.answer(opening.call_id, IpcAnswer::ok());
///         }
///         while let Some(request) = connection.get_call(None).await {
///             if request.call.is_hangup() {
///                 break;
///             }
///             let _ = connection.answer(request.call_id, IpcAnswer::ok());
///         }
///     })
///     .build()
///     .unwrap();
/// ```
pub struct RuntimeBuilder {
    kernel: Box<dyn IpcKernel>,
    config: RuntimeConfig,
    connection_handler: ConnectionHandler,
    notification_handler: NotificationHandler,
}

impl RuntimeBuilder {
    /// Starts a runtime bound to one task's kernel interface
    pub fn new<K: IpcKernel + 'static>(kernel: K) -> Self {
        Self {
            kernel: Box::new(kernel),
            config: RuntimeConfig::default(),
            connection_handler: handler::refuse_connections(),
            notification_handler: handler::ignore_notifications(),
        }
    }

    /// Sets the table bounds
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the handler started for every incoming connection
    ///
    /// Without one, connections are refused with `ENOENT`.
    pub fn connection_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(IncomingConnection, Option<IncomingCall>) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.connection_handler = handler::connection_handler(handler);
        self
    }

    /// Sets the handler started for every notification
    ///
    /// Without one, notifications are ignored.
    pub fn notification_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Runtime, IncomingCall) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.notification_handler = handler::notification_handler(handler);
        self
    }

    /// Validates the configuration and creates the runtime
    pub fn build(self) -> Result<Runtime, AsyncError> {
        self.config.validate()?;
        Ok(Runtime {
            inner: Rc::new(Inner {
                kernel: RefCell::new(self.kernel),
                state: RefCell::new(AsyncState::new(self.config)),
                executor: Executor::new(),
                manager: Cell::new(ManagerState::Idle),
                connection_handler: self.connection_handler,
                notification_handler: self.notification_handler,
            }),
        })
    }
}

/// One async IPC runtime instance, serving one kernel task
///
/// Cloning gives another handle to the same instance.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<Inner>,
}

struct Inner {
    kernel: RefCell<Box<dyn IpcKernel>>,
    state: RefCell<AsyncState>,
    executor: Executor,
    manager: Cell<ManagerState>,
    connection_handler: ConnectionHandler,
    notification_handler: NotificationHandler,
}

impl Runtime {
    /// Creates a runtime with default configuration and handlers
    pub fn new<K: IpcKernel + 'static>(kernel: K) -> Result<Self, AsyncError> {
        RuntimeBuilder::new(kernel).build()
    }

    // ------------------------------------------------------------------
    // Fibrils
    // ------------------------------------------------------------------

    /// Starts a fibril
    pub fn spawn<F>(&self, future: F) -> Result<FibrilId, AsyncError>
    where
        F: Future<Output = ()> + 'static,
    {
        self.spawn_boxed(Box::pin(future))
    }

    /// Suspends the current fibril for `duration`
    pub async fn sleep(&self, duration: Duration) {
        let deadline = self.now() + duration;
        let owner = self.current_fibril();
        let id = self.with_state(|s| {
            let id = s.next_sleep;
            s.next_sleep += 1;
            s.sleepers.insert(id, WaitDescriptor::new());
            s.arm(Waiter::Sleep(id), owner, Some(deadline));
            id
        });

        // The entry is dropped when the timeout fires
        loop {
            Suspend::new(self.clone(), Waiter::Sleep(id)).await;
            if self.with_state(|s| !s.sleepers.contains_key(&id)) {
                break;
            }
        }
    }

    /// Lets every other ready fibril run before continuing
    pub async fn yield_now(&self) {
        YieldNow::new().await
    }

    // ------------------------------------------------------------------
    // Sends
    // ------------------------------------------------------------------

    /// Issues an asynchronous call without waiting for its answer
    ///
    /// The correlation entry is reserved first: if the table is full no
    /// call is issued. If the kernel refuses the call the entry is freed.
    /// With `keep_reply` the answer's return words are kept for the waiter.
    pub fn send(
        &self,
        phone: PhoneHandle,
        method: Method,
        args: Args,
        keep_reply: bool,
    ) -> Result<SendId, AsyncError> {
        let send = self.with_state(|s| s.sends.allocate(keep_reply))?;
        let issued = self.kernel().call_async(phone, method, args);
        match issued {
            Ok(call_id) => {
                self.with_state(|s| s.sends.bind(send, call_id));
                debug!(%send, %call_id, %phone, %method, "send issued");
                Ok(send)
            }
            Err(err) => {
                self.with_state(|s| s.sends.release(send));
                debug!(%send, %phone, %method, %err, "send refused");
                Err(err.into())
            }
        }
    }

    /// Waits for the answer to a send and collects it
    ///
    /// Returns without suspending if the answer is already there.
    pub async fn wait(&self, send: SendId) -> Result<Reply, AsyncError> {
        self.wait_until(send, None).await
    }

    /// Waits at most `timeout` for the answer to a send
    ///
    /// On [`AsyncError::TimedOut`] the send stays outstanding: wait again or
    /// [`discard`](Self::discard) it.
    pub async fn wait_timeout(&self, send: SendId, timeout: Duration) -> Result<Reply, AsyncError> {
        let deadline = self.now() + timeout;
        self.wait_until(send, Some(deadline)).await
    }

    /// Gives up on a send; a late answer is dropped on arrival
    pub fn discard(&self, send: SendId) -> Result<(), AsyncError> {
        let freed = self.with_state(|s| s.sends.discard(send))?;
        trace!(%send, freed, "send discarded");
        Ok(())
    }

    /// Sends a call and waits for its answer, keeping the return words
    pub async fn request(
        &self,
        phone: PhoneHandle,
        method: Method,
        args: Args,
    ) -> Result<Reply, AsyncError> {
        let send = self.send(phone, method, args, true)?;
        self.wait(send).await
    }

    async fn wait_until(&self, send: SendId, deadline: Option<Instant>) -> Result<Reply, AsyncError> {
        let owner = self.current_fibril();
        loop {
            let suspend = self.with_state(|s| {
                let (done, fired) = match s.sends.get(send) {
                    Some(entry) => (entry.done, entry.wait.fired),
                    None => return Err(AsyncError::NoSuchSend(send)),
                };
                if done {
                    return s
                        .sends
                        .take_reply(send)
                        .map(Some)
                        .ok_or(AsyncError::NoSuchSend(send));
                }
                if fired {
                    if let Some(entry) = s.sends.get_mut(send) {
                        entry.wait.fired = false;
                    }
                    return Err(AsyncError::TimedOut);
                }
                if owner.is_none() {
                    return Err(AsyncError::NotInFibril);
                }
                s.arm(Waiter::Send(send), owner, deadline);
                Ok(None)
            })?;

            match suspend {
                Some(reply) => return Ok(reply),
                None => Suspend::new(self.clone(), Waiter::Send(send)).await,
            }
        }
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Asks the server behind `phone` to open a connection keyed by the
    /// phone itself; later calls through `phone` reach that connection
    pub async fn connect_me(&self, phone: PhoneHandle) -> Result<(), AsyncError> {
        let reply = self.request(phone, Method::CONNECT_ME, [0; 5]).await?;
        if !reply.is_ok() {
            return Err(AsyncError::Refused(reply.retval));
        }
        Ok(())
    }

    /// Asks the server behind `phone` for a new connection and returns the
    /// new phone
    pub async fn connect_me_to(
        &self,
        phone: PhoneHandle,
        arg1: Sysarg,
        arg2: Sysarg,
        arg3: Sysarg,
    ) -> Result<PhoneHandle, AsyncError> {
        let reply = self
            .request(phone, Method::CONNECT_ME_TO, [arg1, arg2, arg3, 0, 0])
            .await?;
        if !reply.is_ok() {
            return Err(AsyncError::Refused(reply.retval));
        }
        reply
            .arg(5)
            .and_then(PhoneHandle::from_word)
            .ok_or(AsyncError::Refused(ResultCode::Invalid))
    }

    /// Asks the server behind `phone` to connect a phone back to this task
    ///
    /// Calls through that phone are served by `handler`, which receives no
    /// opening call. Returns the hash the connection is keyed by.
    pub async fn connect_to_me<F, Fut>(
        &self,
        phone: PhoneHandle,
        arg1: Sysarg,
        arg2: Sysarg,
        arg3: Sysarg,
        handler: F,
    ) -> Result<PhoneHash, AsyncError>
    where
        F: Fn(IncomingConnection, Option<IncomingCall>) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let reply = self
            .request(phone, Method::CONNECT_TO_ME, [arg1, arg2, arg3, 0, 0])
            .await?;
        if !reply.is_ok() {
            return Err(AsyncError::Refused(reply.retval));
        }
        let hash = reply
            .arg(5)
            .map(PhoneHash::from_raw)
            .ok_or(AsyncError::Refused(ResultCode::Invalid))?;
        self.new_connection(hash, None, handler)?;
        Ok(hash)
    }

    /// Registers a connection and starts `handler` for it
    ///
    /// Fails with [`AsyncError::LimitExceeded`] if `hash` is already
    /// registered or the connection limit is reached, and with
    /// [`AsyncError::NoMemory`] if no fibril can be started. Nothing is
    /// registered on failure.
    pub fn new_connection<F, Fut>(
        &self,
        hash: PhoneHash,
        opening: Option<IncomingCall>,
        handler: F,
    ) -> Result<FibrilId, AsyncError>
    where
        F: Fn(IncomingConnection, Option<IncomingCall>) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.open(hash, opening, handler::connection_handler(handler))
    }

    /// Hangs up a phone
    pub fn hangup(&self, phone: PhoneHandle) -> Result<(), AsyncError> {
        self.kernel().hangup(phone)?;
        Ok(())
    }

    /// Releases a phone handle
    pub fn phone_dealloc(&self, phone: PhoneHandle) -> Result<(), AsyncError> {
        self.kernel().phone_dealloc(phone)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Manager
    // ------------------------------------------------------------------

    /// Runs the manager until the kernel reports that nothing can arrive
    ///
    /// Returns the amount of work done: fibril polls, fired timeouts and
    /// dispatched arrivals. Only a simulated kernel ever reports that
    /// nothing can arrive; against a real kernel this runs forever.
    pub fn run_until_idle(&self) -> Result<usize, AsyncError> {
        let mut work = 0;
        loop {
            self.transition(ManagerState::Idle);
            work += self.inner.executor.run_ready();

            self.transition(ManagerState::ComputingDeadline);
            let deadline = self.with_state(|s| s.timeouts.earliest());
            if let Some(deadline) = deadline {
                let now = self.now();
                if deadline <= now {
                    work += self.with_state(|s| s.fire_expired(now));
                    continue;
                }
            }

            self.transition(ManagerState::WaitingOnTransport);
            let arrival = self.kernel().wait_cycle(deadline);
            match arrival {
                Ok(KernelEvent::Timeout) => {}
                Ok(event) => {
                    self.transition(ManagerState::Dispatching);
                    self.dispatch(event);
                    work += 1;
                }
                Err(KernelError::WouldBlock) => {
                    self.transition(ManagerState::Idle);
                    return Ok(work);
                }
                Err(err) => {
                    self.transition(ManagerState::Idle);
                    return Err(err.into());
                }
            }
        }
    }

    /// Runs the manager for as long as anything can arrive
    ///
    /// Returns `Ok(())` only when the transport reports that nothing can
    /// (`WouldBlock`); a blocking transport keeps this running.
    pub fn run(&self) -> Result<(), AsyncError> {
        self.run_until_idle().map(|_| ())
    }

    fn dispatch(&self, event: KernelEvent) {
        match event {
            KernelEvent::Answer { call_id, answer } => {
                let outcome = self.with_state(|s| {
                    let outcome = s.sends.on_reply(call_id, answer, &mut s.timeouts);
                    if let ReplyOutcome::Discarded(_) = outcome {
                        s.stats.replies_discarded += 1;
                    }
                    outcome
                });
                if outcome == ReplyOutcome::Unknown {
                    warn!(%call_id, retval = %answer.retval, "answer to unknown call dropped");
                }
            }
            KernelEvent::Call { call_id, call } if call.method.opens_connection() => {
                self.accept(call_id, call);
            }
            KernelEvent::Call { call_id, call } => self.route(call_id, call),
            KernelEvent::Notification { call_id, call } => {
                let body = (self.inner.notification_handler)(self.clone(), IncomingCall { call_id, call });
                self.with_state(|s| s.stats.notifications += 1);
                if let Err(err) = self.spawn_boxed(body) {
                    warn!(%call_id, %err, "notification dropped");
                }
            }
            KernelEvent::Timeout => {}
        }
    }

    fn accept(&self, call_id: CallId, call: IpcCall) {
        let hash = PhoneHash::from_raw(call.arg5());
        let handler = self.inner.connection_handler.clone();
        if let Err(err) = self.open(hash, Some(IncomingCall { call_id, call }), handler) {
            warn!(%hash, %call_id, %err, "connection refused");
            self.answer_or_log(call_id, err.to_result_code().into());
        }
    }

    fn route(&self, call_id: CallId, call: IpcCall) {
        let outcome = self.with_state(|s| {
            let limit = s.config.max_queued_messages;
            let outcome = s.registry.route(call_id, call, limit, &mut s.timeouts);
            match outcome {
                RouteOutcome::Queued { .. } => s.stats.routed += 1,
                RouteOutcome::Unmatched => s.stats.unmatched += 1,
                RouteOutcome::QueueFull => {}
            }
            outcome
        });

        match outcome {
            RouteOutcome::Queued { .. } => {}
            RouteOutcome::Unmatched => {
                warn!(hash = %call.in_phone_hash, %call_id, method = %call.method, "no connection for call");
                self.answer_or_log(call_id, IpcAnswer::new(ResultCode::Hangup));
            }
            RouteOutcome::QueueFull => {
                warn!(hash = %call.in_phone_hash, %call_id, "connection queue full");
                self.answer_or_log(call_id, IpcAnswer::new(ResultCode::NoMemory));
            }
        }
    }

    fn open(
        &self,
        hash: PhoneHash,
        opening: Option<IncomingCall>,
        handler: ConnectionHandler,
    ) -> Result<FibrilId, AsyncError> {
        self.with_state(|s| {
            if !s.registry.contains(hash) && s.registry.len() >= s.config.max_connections {
                return Err(AsyncError::LimitExceeded("connections"));
            }
            let mut connection = Connection::new(hash);
            connection.opening = opening.map(|call| TrackedCall::new(call.call_id));
            s.registry.insert(connection)
        })?;

        let body = handler(IncomingConnection::new(self.clone(), hash), opening);
        let runtime = self.clone();
        let spawned = self.spawn_boxed(Box::pin(async move {
            body.await;
            runtime.close(hash);
        }));

        match spawned {
            Ok(fibril) => {
                self.with_state(|s| {
                    if let Some(connection) = s.registry.get_mut(hash) {
                        connection.fibril = Some(fibril);
                    }
                    s.stats.opened += 1;
                });
                debug!(%hash, %fibril, "connection opened");
                Ok(fibril)
            }
            Err(err) => {
                self.with_state(|s| s.registry.remove(hash));
                Err(err)
            }
        }
    }

    /// Tears a connection down after its handler returned
    fn close(&self, hash: PhoneHash) {
        let removed = self.with_state(|s| {
            let connection = s.registry.remove(hash)?;
            s.timeouts.remove(&Waiter::Connection(hash));
            s.stats.closed += 1;
            Some(connection)
        });
        let connection = match removed {
            Some(connection) => connection,
            None => return,
        };

        if let Some(opening) = connection.opening {
            if !opening.answered {
                warn!(%hash, call_id = %opening.call_id, "handler left the opening call unanswered");
                self.answer_or_log(opening.call_id, IpcAnswer::new(ResultCode::Hangup));
            }
        }
        let closing_id = connection.closing.map(|closing| closing.call_id);
        for message in &connection.queue {
            if Some(message.call_id) == closing_id {
                continue;
            }
            self.answer_or_log(message.call_id, IpcAnswer::new(ResultCode::Hangup));
        }
        if let Some(closing) = connection.closing {
            if !closing.answered {
                self.answer_or_log(closing.call_id, IpcAnswer::ok());
            }
        }
        debug!(%hash, fibril = ?connection.fibril, drained = connection.queue.len(), "connection closed");
    }

    fn answer_or_log(&self, call_id: CallId, answer: IpcAnswer) {
        let answered = self.kernel().answer(call_id, answer);
        if let Err(err) = answered {
            warn!(%call_id, retval = %answer.retval, %err, "answer not delivered");
        }
    }

    fn transition(&self, next: ManagerState) {
        let previous = self.inner.manager.replace(next);
        if previous != next {
            trace!(from = ?previous, to = ?next, "manager state");
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Current kernel time
    pub fn now(&self) -> Instant {
        self.inner.kernel.borrow().now()
    }

    /// Counters since the runtime was built
    pub fn stats(&self) -> RuntimeStats {
        self.with_state(|s| s.stats)
    }

    /// The manager's current state
    pub fn manager_state(&self) -> ManagerState {
        self.inner.manager.get()
    }

    /// Registered connections
    pub fn connection_count(&self) -> usize {
        self.with_state(|s| s.registry.len())
    }

    /// Sends not yet collected or freed
    pub fn outstanding_sends(&self) -> usize {
        self.with_state(|s| s.sends.len())
    }

    /// Fibrils spawned and not finished
    pub fn fibril_count(&self) -> usize {
        self.inner.executor.live()
    }

    // ------------------------------------------------------------------
    // Crate internals
    // ------------------------------------------------------------------

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut AsyncState) -> R) -> R {
        f(&mut self.inner.state.borrow_mut())
    }

    pub(crate) fn kernel(&self) -> RefMut<'_, Box<dyn IpcKernel>> {
        self.inner.kernel.borrow_mut()
    }

    pub(crate) fn current_fibril(&self) -> Option<FibrilId> {
        self.inner.executor.current()
    }

    fn spawn_boxed(&self, future: LocalBoxFuture) -> Result<FibrilId, AsyncError> {
        let limit = self.with_state(|s| s.config.max_fibrils);
        self.inner.executor.spawn(future, limit)
    }
}

/// Suspends the current fibril until the wait descriptor is activated
pub(crate) struct Suspend {
    runtime: Runtime,
    waiter: Waiter,
}

impl Suspend {
    pub fn new(runtime: Runtime, waiter: Waiter) -> Self {
        Self { runtime, waiter }
    }
}

impl Future for Suspend {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let waiter = self.waiter;
        self.runtime
            .with_state(|s| match s.descriptor_mut(waiter) {
                Some(wait) if wait.is_suspended() => {
                    wait.register(cx.waker());
                    Poll::Pending
                }
                _ => Poll::Ready(()),
            })
    }
}
