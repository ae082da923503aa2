//! Per-database FIFO of open and delete requests
//!
//! Only the head entry of a name's queue is processed; the next entry
//! starts when the head releases the queue.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

pub(crate) type StartTask = Box<dyn FnOnce()>;

#[derive(Default)]
pub(crate) struct OpenQueue {
    queues: RefCell<HashMap<String, VecDeque<Option<StartTask>>>>,
}

impl OpenQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a request. Returns its start task if it is now at the head.
    pub(crate) fn enqueue(&self, name: &str, start: StartTask) -> Option<StartTask> {
        let mut queues = self.queues.borrow_mut();
        let queue = queues.entry(name.to_string()).or_default();
        if queue.is_empty() {
            queue.push_back(None);
            Some(start)
        } else {
            queue.push_back(Some(start));
            None
        }
    }

    /// Drop the head entry. Returns the start task of the next one.
    pub(crate) fn release(&self, name: &str) -> Option<StartTask> {
        let mut queues = self.queues.borrow_mut();
        let queue = queues.get_mut(name)?;
        queue.pop_front();
        let next = queue.front_mut().and_then(Option::take);
        if queue.is_empty() {
            queues.remove(name);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn test_head_starts_immediately() {
        let queue = OpenQueue::new();
        assert!(queue.enqueue("db", Box::new(|| {})).is_some());
        assert!(queue.enqueue("db", Box::new(|| {})).is_none());
        assert!(queue.release("db").is_some());
        assert!(queue.release("db").is_none());
    }

    #[test]
    fn test_release_hands_over_in_order() {
        let queue = OpenQueue::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let log = Rc::clone(&log);
            if let Some(start) = queue.enqueue("db", Box::new(move || log.borrow_mut().push(i))) {
                start();
            }
        }
        while let Some(start) = queue.release("db") {
            start();
        }

        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(queue.release("db").is_none());
    }

    #[test]
    fn test_names_are_independent() {
        let queue = OpenQueue::new();
        assert!(queue.enqueue("a", Box::new(|| {})).is_some());
        assert!(queue.enqueue("b", Box::new(|| {})).is_some());
    }
}
