//! The work queue distributing requests over the worker threads.
//!
//! The queue is a simple bounded FIFO of callable work items. The reactor
//! thread produces items, the worker threads consume them. Producers never
//! block: pushing onto a full queue fails immediately and leaves the item
//! with the caller. Consumers park on a condition variable until there is
//! work or the queue is interrupted.

use std::collections::VecDeque;
use crate::utils::sync::{Condvar, Mutex};


//------------ Work ----------------------------------------------------------

/// A single item of work.
pub trait Work: Send + 'static {
    /// Performs the work, consuming the item.
    fn run(self);
}


//------------ WorkQueue -----------------------------------------------------

/// A bounded queue of work items served by multiple threads.
pub struct WorkQueue<W> {
    /// The queue state protected by a single mutex.
    state: Mutex<State<W>>,

    /// Where the worker threads wait for new items.
    cond: Condvar,

    /// The maximum number of items waiting in the queue.
    max_depth: usize,
}

/// The mutable state of the queue.
struct State<W> {
    /// The pending items in arrival order.
    queue: VecDeque<W>,

    /// Cleared by [`WorkQueue::interrupt`] to make the workers exit.
    running: bool,
}

impl<W: Work> WorkQueue<W> {
    /// Creates a new queue accepting at most `max_depth` pending items.
    pub fn new(max_depth: usize) -> Self {
        WorkQueue {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                running: true,
            }),
            cond: Condvar::new(),
            max_depth: max_depth.max(1),
        }
    }

    /// Enqueues a work item.
    ///
    /// If the queue is full, the item is handed back to the caller via the
    /// error case and nothing else happens. An interrupted queue refuses
    /// items the same way: nothing consumes them any more, so accepting
    /// one would strand it past [`clear`][Self::clear].
    pub fn enqueue(&self, item: W) -> Result<(), W> {
        let mut state = self.state.lock();
        if !state.running || state.queue.len() >= self.max_depth {
            return Err(item)
        }
        state.queue.push_back(item);
        self.cond.notify_one();
        Ok(())
    }

    /// Serves the queue until it is interrupted.
    ///
    /// This is the worker thread function. It waits for items and runs
    /// them, one at a time, without holding the lock while doing so. It
    /// returns once [`interrupt`][Self::interrupt] has been called. Items
    /// still pending at that point are not run.
    pub fn run(&self) {
        loop {
            let item = {
                let mut state = self.state.lock();
                while state.running && state.queue.is_empty() {
                    state = self.cond.wait(state);
                }
                if !state.running {
                    break
                }
                state.queue.pop_front().expect(
                    "woken up with an empty work queue"
                )
            };
            item.run();
        }
    }

    /// Interrupts the queue, making all worker threads exit.
    pub fn interrupt(&self) {
        self.state.lock().running = false;
        self.cond.notify_all();
    }

    /// Drops all pending items.
    ///
    /// This must only be called after all worker threads have been joined.
    pub fn clear(&self) {
        // Take the items out first so their drop handlers run without
        // the queue lock held.
        let items: Vec<_> = self.state.lock().queue.drain(..).collect();
        drop(items);
    }

    /// Returns the number of currently pending items.
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Returns whether there are no pending items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


//============ Tests =========================================================
