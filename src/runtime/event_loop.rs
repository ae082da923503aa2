//! Cooperative task queue
//!
//! Every asynchronous step of the coordinator (request execution,
//! deactivation at the end of the creating task, commit, open processing)
//! is a task on this queue. Tasks run one at a time, in FIFO order, on the
//! thread that calls [`EventLoop::run_until_idle`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

type Task = Box<dyn FnOnce()>;

/// Single-threaded FIFO task queue
#[derive(Default)]
pub struct EventLoop {
    queue: RefCell<VecDeque<Task>>,
    executed: Cell<u64>,
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task behind everything already scheduled
    pub fn schedule(&self, task: impl FnOnce() + 'static) {
        self.queue.borrow_mut().push_back(Box::new(task));
    }

    /// Run tasks until the queue is empty; returns how many ran.
    ///
    /// Tasks may schedule further tasks. The queue is never borrowed while
    /// a task runs.
    pub fn run_until_idle(&self) -> u64 {
        let mut ran = 0;
        loop {
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => break,
            }
        }
        self.executed.set(self.executed.get() + ran);
        ran
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Total tasks executed since creation
    pub fn executed(&self) -> u64 {
        self.executed.get()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLoop")
            .field("pending", &self.pending())
            .field("executed", &self.executed())
            .finish()
    }
}
