//! Worker-task abstraction
//!
//! A [`Worker`] owns one named OS thread and the inbound [`MessageQueue`] it
//! drains. Messages may be posted for immediate or delayed delivery; delayed
//! messages are ordered by due time, then by post order. Dropping the worker
//! closes the queue and joins the thread, so whatever the thread owns is
//! released exactly once before the drop returns.
//!
//! If the last handle to a worker is dropped on the worker's own thread
//! (for example from inside a callback it is running), joining would
//! deadlock; the thread is detached instead and exits on its own once it
//! sees the closed queue.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct Entry<M> {
    due: Instant,
    seq: u64,
    message: M,
}

// Min-heap on (due, seq)
impl<M> Ord for Entry<M> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<M> PartialOrd for Entry<M> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<M> PartialEq for Entry<M> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<M> Eq for Entry<M> {}

struct QueueState<M> {
    entries: BinaryHeap<Entry<M>>,
    next_seq: u64,
    closed: bool,
}

/// Outcome of a bounded wait
#[derive(Debug, PartialEq, Eq)]
pub enum Received<M> {
    Message(M),
    Timeout,
    Closed,
}

/// Mutex + condvar message queue with delayed delivery
pub struct MessageQueue<M> {
    state: Mutex<QueueState<M>>,
    condvar: Condvar,
}

impl<M> Default for MessageQueue<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> MessageQueue<M> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: BinaryHeap::new(),
                next_seq: 0,
                closed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Post for immediate delivery; returns false once closed
    pub fn post(&self, message: M) -> bool {
        self.post_at(message, Instant::now())
    }

    /// Post for delivery after `delay`
    pub fn post_delayed(&self, message: M, delay: Duration) -> bool {
        self.post_at(message, Instant::now() + delay)
    }

    fn post_at(&self, message: M, due: Instant) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(Entry { due, seq, message });
        self.condvar.notify_one();
        true
    }

    /// Drop queued messages matching `predicate`; returns how many
    pub fn remove_if<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&M) -> bool,
    {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|entry| !predicate(&entry.message));
        before - state.entries.len()
    }

    /// Block until a message is due; `None` once the queue is closed
    pub fn recv(&self) -> Option<M> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            let now = Instant::now();
            match state.entries.peek().map(|e| e.due) {
                Some(due) if due <= now => return state.entries.pop().map(|e| e.message),
                Some(due) => {
                    self.condvar.wait_until(&mut state, due);
                }
                None => self.condvar.wait(&mut state),
            }
        }
    }

    /// Like [`recv`](Self::recv) but gives up after `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Received<M> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return Received::Closed;
            }
            let now = Instant::now();
            let next_due = state.entries.peek().map(|e| e.due);
            if let Some(due) = next_due {
                if due <= now {
                    if let Some(entry) = state.entries.pop() {
                        return Received::Message(entry.message);
                    }
                }
            }
            if now >= deadline {
                return Received::Timeout;
            }
            let wake = next_due.map_or(deadline, |due| due.min(deadline));
            self.condvar.wait_until(&mut state, wake);
        }
    }

    /// Take a due message without blocking
    pub fn try_recv(&self) -> Option<M> {
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        let due = state.entries.peek().map(|e| e.due)?;
        if due <= Instant::now() {
            state.entries.pop().map(|e| e.message)
        } else {
            None
        }
    }

    /// Stop accepting messages and wake every waiter
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.condvar.notify_all();
    }

    /// Close and hand back everything still queued
    pub fn close_and_drain(&self) -> Vec<M> {
        let mut state = self.state.lock();
        state.closed = true;
        self.condvar.notify_all();
        let mut entries = std::mem::take(&mut state.entries).into_sorted_vec();
        // into_sorted_vec is ascending by Ord, which is reversed due order
        entries.reverse();
        entries.into_iter().map(|e| e.message).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Owned thread draining a message queue
pub struct Worker<M: Send + 'static> {
    name: String,
    queue: Arc<MessageQueue<M>>,
    thread: Option<JoinHandle<()>>,
}

impl<M: Send + 'static> Worker<M> {
    /// Spawn a named thread running `body` over a fresh queue
    pub fn spawn<F>(name: impl Into<String>, body: F) -> Result<Self>
    where
        F: FnOnce(Arc<MessageQueue<M>>) + Send + 'static,
    {
        Self::spawn_with_queue(name, Arc::new(MessageQueue::new()), body)
    }

    /// Spawn over a queue created by the caller
    ///
    /// Lets other components hold the queue before the thread exists.
    pub fn spawn_with_queue<F>(
        name: impl Into<String>,
        queue: Arc<MessageQueue<M>>,
        body: F,
    ) -> Result<Self>
    where
        F: FnOnce(Arc<MessageQueue<M>>) + Send + 'static,
    {
        let name = name.into();
        let thread_queue = Arc::clone(&queue);
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || body(thread_queue))
            .map_err(|e| Error::Internal(format!("Failed to spawn {} thread: {}", name, e)))?;

        debug!("Worker thread {} started", name);

        Ok(Self {
            name,
            queue,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &Arc<MessageQueue<M>> {
        &self.queue
    }

    pub fn post(&self, message: M) -> bool {
        self.queue.post(message)
    }

    pub fn post_delayed(&self, message: M, delay: Duration) -> bool {
        self.queue.post_delayed(message, delay)
    }

    /// True when called from the worker's own thread
    pub fn is_current_thread(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }

    /// Close the queue and join the thread
    pub fn shutdown(&mut self) {
        self.queue.close();
        let Some(handle) = self.thread.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            debug!("Worker thread {} detached from itself", self.name);
            return;
        }
        if handle.join().is_err() {
            warn!("Worker thread {} panicked", self.name);
        } else {
            debug!("Worker thread {} joined", self.name);
        }
    }
}

impl<M: Send + 'static> Drop for Worker<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    #[test]
    fn test_fifo_for_immediate_messages() {
        let queue = MessageQueue::new();
        for i in 0..5 {
            queue.post(i);
        }
        let received: Vec<_> = (0..5).filter_map(|_| queue.try_recv()).collect();
        assert_eq!(received, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_delayed_message_is_not_due_early() {
        let queue = MessageQueue::new();
        queue.post_delayed("late", Duration::from_millis(50));
        queue.post("now");
        assert_eq!(queue.try_recv(), Some("now"));
        assert_eq!(queue.try_recv(), None);

        let start = Instant::now();
        assert_eq!(queue.recv(), Some("late"));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_recv_timeout() {
        let queue: MessageQueue<u8> = MessageQueue::new();
        assert_eq!(queue.recv_timeout(Duration::from_millis(10)), Received::Timeout);
        queue.post(7);
        assert_eq!(queue.recv_timeout(Duration::from_millis(10)), Received::Message(7));
        queue.close();
        assert_eq!(queue.recv_timeout(Duration::from_millis(10)), Received::Closed);
    }

    #[test]
    fn test_remove_if() {
        let queue = MessageQueue::new();
        for i in 0..6 {
            queue.post(i);
        }
        assert_eq!(queue.remove_if(|m| m % 2 == 0), 3);
        assert_eq!(queue.close_and_drain(), vec![1, 3, 5]);
    }

    #[test]
    fn test_closed_queue_rejects_posts() {
        let queue = MessageQueue::new();
        queue.close();
        assert!(!queue.post(1));
        assert_eq!(queue.recv(), None);
    }

    #[test]
    fn test_worker_processes_and_joins() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let worker = Worker::spawn("test-worker", move |queue: Arc<MessageQueue<usize>>| {
            while let Some(n) = queue.recv() {
                counter.fetch_add(n, AtomicOrdering::SeqCst);
            }
        })
        .unwrap();

        worker.post(2);
        worker.post(3);
        while seen.load(AtomicOrdering::SeqCst) < 5 {
            thread::sleep(Duration::from_millis(1));
        }
        drop(worker);
        assert_eq!(seen.load(AtomicOrdering::SeqCst), 5);
    }

    #[test]
    fn test_drop_wakes_blocked_thread() {
        let exited = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&exited);
        let worker = Worker::spawn("idle-worker", move |queue: Arc<MessageQueue<()>>| {
            while queue.recv().is_some() {}
            flag.store(1, AtomicOrdering::SeqCst);
        })
        .unwrap();

        drop(worker);
        assert_eq!(exited.load(AtomicOrdering::SeqCst), 1);
    }
}
