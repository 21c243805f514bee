//! Fibril executor
//!
//! Fibrils are `!Send` futures polled on the thread that owns the runtime.
//! A fibril runs until it reaches a suspension point; it is polled again
//! only after something wakes it, which puts it back on the ready queue.
//!
//! A fibril's future is taken out of the table while it is polled, so a
//! running fibril can spawn others without conflicting borrows.

use crate::AsyncError;
use core_types::FibrilId;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, Wake, Waker};
use tracing::trace;

/// A type-erased fibril body
pub type LocalBoxFuture = Pin<Box<dyn Future<Output = ()>>>;

type ReadyQueue = Arc<Mutex<VecDeque<FibrilId>>>;

/// Waker that re-enqueues a fibril
struct FibrilWaker {
    id: FibrilId,
    ready: ReadyQueue,
}

impl Wake for FibrilWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(self.id);
    }
}

pub(crate) struct Executor {
    fibrils: RefCell<HashMap<FibrilId, LocalBoxFuture>>,
    ready: ReadyQueue,
    next_id: Cell<u64>,
    current: Cell<Option<FibrilId>>,
    live: Cell<usize>,
}

impl Executor {
    pub fn new() -> Self {
        Self {
            fibrils: RefCell::new(HashMap::new()),
            ready: Arc::new(Mutex::new(VecDeque::new())),
            next_id: Cell::new(1),
            current: Cell::new(None),
            live: Cell::new(0),
        }
    }

    /// Starts a fibril; it runs at the next drain of the ready queue
    pub fn spawn(&self, future: LocalBoxFuture, limit: usize) -> Result<FibrilId, AsyncError> {
        if self.live.get() >= limit {
            return Err(AsyncError::NoMemory("fibrils"));
        }
        let id = FibrilId::from_raw(self.next_id.get());
        self.next_id.set(id.as_raw() + 1);
        self.live.set(self.live.get() + 1);
        self.fibrils.borrow_mut().insert(id, future);
        self.push_ready(id);
        trace!(fibril = %id, "fibril spawned");
        Ok(id)
    }

    /// The fibril being polled right now
    pub fn current(&self) -> Option<FibrilId> {
        self.current.get()
    }

    /// Fibrils spawned and not finished
    pub fn live(&self) -> usize {
        self.live.get()
    }

    /// Polls ready fibrils until none is ready; returns the number of polls
    pub fn run_ready(&self) -> usize {
        let mut polls = 0;
        while let Some(id) = self.pop_ready() {
            let future = self.fibrils.borrow_mut().remove(&id);
            let mut future = match future {
                Some(future) => future,
                // Finished, or woken twice before running
                None => continue,
            };

            let waker = Waker::from(Arc::new(FibrilWaker {
                id,
                ready: self.ready.clone(),
            }));
            let mut cx = Context::from_waker(&waker);

            let previous = self.current.replace(Some(id));
            let poll = future.as_mut().poll(&mut cx);
            self.current.set(previous);
            polls += 1;

            match poll {
                Poll::Ready(()) => {
                    self.live.set(self.live.get() - 1);
                    trace!(fibril = %id, "fibril finished");
                }
                Poll::Pending => {
                    self.fibrils.borrow_mut().insert(id, future);
                }
            }
        }
        polls
    }

    fn push_ready(&self, id: FibrilId) {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(id);
    }

    fn pop_ready(&self) -> Option<FibrilId> {
        self.ready
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

/// Suspends the current fibril once, letting every other ready fibril run
pub(crate) struct YieldNow {
    yielded: bool,
}

impl YieldNow {
    pub fn new() -> Self {
        Self { yielded: false }
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}
