use std::collections::VecDeque;

use log::debug;
use parking_lot::{Condvar, Mutex};

/// An unbounded blocking queue, many producers push and a single consumer pops.
///
/// Closing the queue wakes up a blocked consumer, pops keep draining whatever was left
/// and then report the queue as closed.
#[derive(Debug)]
pub struct BlockingQueue<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BlockingQueue<T> {
    /// Creates a new, open, empty `BlockingQueue`.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: VecDeque::new(),
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Pushes `item` and wakes up the consumer.
    ///
    /// # Returns
    /// `false` if the queue is closed, in which case `item` is dropped.
    pub fn push(&self, item: T) -> bool {
        let mut state = self.state.lock();

        if state.closed {
            return false;
        }

        state.items.push_back(item);
        drop(state);

        self.ready.notify_one();
        true
    }

    /// Pops the front item without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.state.lock().items.pop_front()
    }

    /// Pops the front item, blocking until there is one.
    ///
    /// # Returns
    /// `None` once the queue is closed and drained.
    pub fn pop(&self) -> Option<T> {
        self.pop_inner(None)
    }

    /// Same as `pop`, but logs `waiting` once if it has to block.
    pub fn pop_logged(&self, waiting: &str) -> Option<T> {
        self.pop_inner(Some(waiting))
    }

    fn pop_inner(&self, mut waiting: Option<&str>) -> Option<T> {
        let mut state = self.state.lock();

        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }

            if state.closed {
                return None;
            }

            if let Some(msg) = waiting.take() {
                debug!("{msg}");
            }

            self.ready.wait(&mut state);
        }
    }

    /// The amount of items waiting to be popped.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rejects every further push and wakes up the consumer.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
