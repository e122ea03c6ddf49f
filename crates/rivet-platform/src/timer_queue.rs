use std::cmp::Reverse;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent<T> {
    pub deadline_ns: u64,
    pub payload: T,
}

/// Min-heap of pending deadlines. Entries are never removed eagerly;
/// consumers re-validate on pop, so a stale entry costs one spurious
/// check.
#[derive(Debug)]
pub struct TimerQueue<T: Ord> {
    heap: BinaryHeap<Reverse<(u64, T)>>,
}

impl<T: Ord> TimerQueue<T> {
    pub fn new() -> Self {
        TimerQueue {
            heap: BinaryHeap::new(),
        }
    }

    pub fn push(&mut self, deadline_ns: u64, payload: T) {
        self.heap.push(Reverse((deadline_ns, payload)));
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline_ns(&self) -> Option<u64> {
        self.heap.peek().map(|Reverse((d, _))| *d)
    }

    /// Pop the earliest event with `deadline_ns <= now_ns`.
    pub fn pop_due(&mut self, now_ns: u64) -> Option<TimerEvent<T>> {
        match self.heap.peek() {
            Some(Reverse((d, _))) if *d <= now_ns => {
                let Reverse((deadline_ns, payload)) = self.heap.pop().unwrap();
                Some(TimerEvent {
                    deadline_ns,
                    payload,
                })
            }
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T: Ord> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
