//! Connection registry
//!
//! One [`Connection`] per live source phone hash. The manager routes every
//! call that is neither a reply nor a connection request into the queue of
//! the connection its phone hash names, waking the handler fibril if it is
//! suspended in `get_call`.

use crate::timeout::TimeoutQueue;
use crate::wait::{WaitDescriptor, Waiter};
use crate::AsyncError;
use core_types::{CallId, FibrilId, PhoneHash};
use ipc::IpcCall;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, error};

/// A call delivered to a connection handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingCall {
    /// Identity to answer or forward
    pub call_id: CallId,
    /// Method, arguments and source phone hash
    pub call: IpcCall,
}

/// A call the connection must see answered exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TrackedCall {
    pub call_id: CallId,
    /// Set once the call has been answered (by the handler or the kernel)
    pub answered: bool,
}

impl TrackedCall {
    pub fn new(call_id: CallId) -> Self {
        Self {
            call_id,
            answered: false,
        }
    }
}

/// Runtime-side state of one connection
#[derive(Debug)]
pub(crate) struct Connection {
    pub hash: PhoneHash,
    /// Routed calls the handler has not received yet
    pub queue: VecDeque<IncomingCall>,
    /// The call that opened the connection, handed to the handler directly
    pub opening: Option<TrackedCall>,
    /// The last phone-hungup seen, or the forward that failed
    pub closing: Option<TrackedCall>,
    /// A forward through a disconnected phone failed; no more receives
    pub forward_failed: bool,
    pub wait: WaitDescriptor,
    pub fibril: Option<FibrilId>,
}

impl Connection {
    pub fn new(hash: PhoneHash) -> Self {
        Self {
            hash,
            queue: VecDeque::new(),
            opening: None,
            closing: None,
            forward_failed: false,
            wait: WaitDescriptor::new(),
            fibril: None,
        }
    }

    /// Records that `call_id` was answered if it is the opening or closing call
    pub fn mark_answered(&mut self, call_id: CallId) {
        for tracked in [self.opening.as_mut(), self.closing.as_mut()]
            .into_iter()
            .flatten()
        {
            if tracked.call_id == call_id {
                tracked.answered = true;
            }
        }
    }
}

/// Outcome of routing one call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RouteOutcome {
    /// Queued; `woke` tells whether the handler was suspended
    Queued { woke: bool },
    /// The connection's queue is full
    QueueFull,
    /// No connection for the source phone hash
    Unmatched,
}

#[derive(Debug, Default)]
pub(crate) struct ConnectionRegistry {
    connections: HashMap<PhoneHash, Connection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: HashMap::new(),
        }
    }

    /// Registers a connection; a second one for the same hash is refused
    pub fn insert(&mut self, connection: Connection) -> Result<(), AsyncError> {
        let hash = connection.hash;
        if self.connections.contains_key(&hash) {
            error!(%hash, "connection already registered");
            return Err(AsyncError::LimitExceeded("connection already registered"));
        }
        self.connections.insert(hash, connection);
        Ok(())
    }

    pub fn get(&self, hash: PhoneHash) -> Option<&Connection> {
        self.connections.get(&hash)
    }

    pub fn get_mut(&mut self, hash: PhoneHash) -> Option<&mut Connection> {
        self.connections.get_mut(&hash)
    }

    pub fn remove(&mut self, hash: PhoneHash) -> Option<Connection> {
        self.connections.remove(&hash)
    }

    pub fn contains(&self, hash: PhoneHash) -> bool {
        self.connections.contains_key(&hash)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Appends a call to the queue of the connection it belongs to
    ///
    /// A suspended handler has its timeout cancelled before it is woken, so
    /// a message and a timeout never both end the same wait. Phone-hungup
    /// calls are always queued, whatever `queue_limit` says.
    pub fn route(
        &mut self,
        call_id: CallId,
        call: IpcCall,
        queue_limit: usize,
        timeouts: &mut TimeoutQueue<Waiter>,
    ) -> RouteOutcome {
        let hash = call.in_phone_hash;
        let connection = match self.connections.get_mut(&hash) {
            Some(connection) => connection,
            None => return RouteOutcome::Unmatched,
        };

        if !call.is_hangup() && connection.queue.len() >= queue_limit {
            return RouteOutcome::QueueFull;
        }

        connection.queue.push_back(IncomingCall { call_id, call });
        if call.is_hangup() {
            connection.closing = Some(TrackedCall::new(call_id));
        }
        debug!(%hash, %call_id, method = %call.method, queued = connection.queue.len(), "call routed");

        if !connection.wait.is_suspended() {
            return RouteOutcome::Queued { woke: false };
        }
        if connection.wait.in_timeout_queue {
            timeouts.remove(&Waiter::Connection(hash));
            connection.wait.in_timeout_queue = false;
        }
        connection.wait.activate();
        RouteOutcome::Queued { woke: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipc::Method;
    use kernel_api::Instant;

    const HASH: PhoneHash = PhoneHash::from_raw(7);

    fn call(method: u64) -> IpcCall {
        IpcCall::new(Method::new(method), HASH)
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ConnectionRegistry::new();
        registry.insert(Connection::new(HASH)).unwrap();
        assert_eq!(
            registry.insert(Connection::new(HASH)),
            Err(AsyncError::LimitExceeded("connection already registered"))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_route_keeps_fifo_order() {
        let mut registry = ConnectionRegistry::new();
        let mut timeouts = TimeoutQueue::new();
        registry.insert(Connection::new(HASH)).unwrap();

        for (id, method) in [(1, 2000), (2, 2001), (3, 2002)] {
            let outcome = registry.route(CallId::from_raw(id), call(method), 8, &mut timeouts);
            assert_eq!(outcome, RouteOutcome::Queued { woke: false });
        }

        let queue = &registry.get(HASH).unwrap().queue;
        let methods: Vec<u64> = queue.iter().map(|m| m.call.method.as_raw()).collect();
        assert_eq!(methods, vec![2000, 2001, 2002]);
    }

    #[test]
    fn test_route_unknown_hash_is_unmatched() {
        let mut registry = ConnectionRegistry::new();
        let mut timeouts = TimeoutQueue::new();
        assert_eq!(
            registry.route(CallId::from_raw(1), call(2000), 8, &mut timeouts),
            RouteOutcome::Unmatched
        );
    }

    #[test]
    fn test_route_wakes_suspended_owner_and_cancels_timeout() {
        let mut registry = ConnectionRegistry::new();
        let mut timeouts = TimeoutQueue::new();
        registry.insert(Connection::new(HASH)).unwrap();

        let deadline = Instant::from_nanos(1_000);
        let connection = registry.get_mut(HASH).unwrap();
        connection.wait.prepare(Some(FibrilId::from_raw(1)), Some(deadline));
        connection.wait.in_timeout_queue = true;
        timeouts.insert(Waiter::Connection(HASH), deadline);

        let outcome = registry.route(CallId::from_raw(1), call(2000), 8, &mut timeouts);
        assert_eq!(outcome, RouteOutcome::Queued { woke: true });
        assert!(timeouts.is_empty());

        let wait = &registry.get(HASH).unwrap().wait;
        assert!(!wait.is_suspended());
        assert!(!wait.fired);
        assert!(!wait.in_timeout_queue);
    }

    #[test]
    fn test_hangup_records_closing_call_and_bypasses_limit() {
        let mut registry = ConnectionRegistry::new();
        let mut timeouts = TimeoutQueue::new();
        registry.insert(Connection::new(HASH)).unwrap();

        registry.route(CallId::from_raw(1), call(2000), 1, &mut timeouts);
        assert_eq!(
            registry.route(CallId::from_raw(2), call(2001), 1, &mut timeouts),
            RouteOutcome::QueueFull
        );

        let hangup = IpcCall::new(Method::PHONE_HUNGUP, HASH);
        registry.route(CallId::from_raw(3), hangup, 1, &mut timeouts);
        registry.route(CallId::from_raw(4), hangup, 1, &mut timeouts);

        let connection = registry.get(HASH).unwrap();
        assert_eq!(connection.queue.len(), 3);
        assert_eq!(
            connection.closing,
            Some(TrackedCall::new(CallId::from_raw(4)))
        );
    }

    #[test]
    fn test_mark_answered_tracks_opening_and_closing() {
        let mut connection = Connection::new(HASH);
        connection.opening = Some(TrackedCall::new(CallId::from_raw(1)));
        connection.closing = Some(TrackedCall::new(CallId::from_raw(9)));

        connection.mark_answered(CallId::from_raw(5));
        assert_eq!(connection.opening.map(|c| c.answered), Some(false));
        assert_eq!(connection.closing.map(|c| c.answered), Some(false));

        connection.mark_answered(CallId::from_raw(1));
        assert_eq!(connection.opening.map(|c| c.answered), Some(true));
        assert_eq!(connection.closing.map(|c| c.answered), Some(false));

        connection.mark_answered(CallId::from_raw(9));
        assert_eq!(connection.closing.map(|c| c.answered), Some(true));
    }
}
