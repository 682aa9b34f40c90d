//! Bounded hand-off between the acceptor and the worker pool.
//!
//! The queue is a fixed ring of slots guarded by one mutex and two counting
//! semaphores: `empty` counts free slots, `full` counts occupied ones. A
//! producer waits on `empty`, a consumer on `full`; the mutex is held only
//! long enough to move one record in or out of the ring.

use std::path::PathBuf;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Counting semaphore built on a mutex and a condition variable.
#[derive(Debug)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    /// Takes one permit, sleeping until one is released.
    pub fn acquire(&self) {
        let mut permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        while *permits == 0 {
            permits = self
                .available
                .wait(permits)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *permits -= 1;
    }

    pub fn release(&self) {
        let mut permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        *permits += 1;
        self.available.notify_one();
    }

    pub fn available(&self) -> usize {
        *self.permits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An accepted connection waiting for a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Channel the client sends commands on.
    pub request_pipe: PathBuf,
    /// Channel the server sends state updates on.
    pub notify_pipe: PathBuf,
}

#[derive(Debug)]
struct Ring<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
}

/// Fixed-capacity FIFO shared by one producer and many consumers.
#[derive(Debug)]
pub struct DispatchQueue<T> {
    ring: Mutex<Ring<T>>,
    empty: Semaphore,
    full: Semaphore,
    capacity: usize,
}

impl<T> DispatchQueue<T> {
    /// Creates a queue with `capacity` slots. Callers validate that the
    /// capacity is non-zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(Ring {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
            }),
            empty: Semaphore::new(capacity),
            full: Semaphore::new(0),
            capacity,
        }
    }

    fn ring(&self) -> MutexGuard<'_, Ring<T>> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until a slot is free, then publishes `record`.
    pub fn enqueue(&self, record: T) {
        self.empty.acquire();
        {
            let mut ring = self.ring();
            let tail = ring.tail;
            ring.slots[tail] = Some(record);
            ring.tail = (tail + 1) % self.capacity;
        }
        self.full.release();
    }

    /// Blocks until a record is available and takes it.
    pub fn dequeue(&self) -> T {
        loop {
            self.full.acquire();
            let record = {
                let mut ring = self.ring();
                let head = ring.head;
                ring.head = (head + 1) % self.capacity;
                ring.slots[head].take()
            };
            self.empty.release();
            if let Some(record) = record {
                return record;
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records waiting for a worker.
    pub fn occupied(&self) -> usize {
        self.full.available()
    }

    /// Slots a producer could fill without blocking.
    pub fn free(&self) -> usize {
        self.empty.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let queue = DispatchQueue::new(3);
        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);

        assert_eq!(queue.dequeue(), 1);
        queue.enqueue(4);
        assert_eq!(queue.dequeue(), 2);
        assert_eq!(queue.dequeue(), 3);
        assert_eq!(queue.dequeue(), 4);
        assert_eq!(queue.occupied(), 0);
    }

    #[test]
    fn test_capacity_invariant() {
        let queue = DispatchQueue::new(2);
        assert_eq!((queue.occupied(), queue.free()), (0, 2));
        queue.enqueue("a");
        assert_eq!((queue.occupied(), queue.free()), (1, 1));
        queue.enqueue("b");
        assert_eq!((queue.occupied(), queue.free()), (2, 0));
        queue.dequeue();
        assert_eq!(queue.occupied() + queue.free(), queue.capacity());
    }

    #[test]
    fn test_enqueue_blocks_when_full() {
        let queue = Arc::new(DispatchQueue::new(1));
        let enqueued = Arc::new(AtomicUsize::new(0));
        queue.enqueue(0);

        let producer = {
            let queue = Arc::clone(&queue);
            let enqueued = Arc::clone(&enqueued);
            thread::spawn(move || {
                queue.enqueue(1);
                enqueued.fetch_add(1, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert_eq!(enqueued.load(Ordering::SeqCst), 0);

        assert_eq!(queue.dequeue(), 0);
        producer.join().unwrap();
        assert_eq!(enqueued.load(Ordering::SeqCst), 1);
        assert_eq!(queue.dequeue(), 1);
    }

    #[test]
    fn test_dequeue_blocks_until_enqueue() {
        let queue = Arc::new(DispatchQueue::new(2));
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.dequeue())
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!consumer.is_finished());
        queue.enqueue(SessionRecord {
            request_pipe: "/tmp/req".into(),
            notify_pipe: "/tmp/notif".into(),
        });
        let record = consumer.join().unwrap();
        assert_eq!(record.notify_pipe, PathBuf::from("/tmp/notif"));
    }

    #[test]
    fn test_every_record_delivered_once() {
        const RECORDS: usize = 500;
        let queue = Arc::new(DispatchQueue::new(4));
        let consumers: Vec<_> = (0..4)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    loop {
                        match queue.dequeue() {
                            None => break,
                            Some(n) => seen.push(n),
                        }
                    }
                    seen
                })
            })
            .collect();

        for n in 0..RECORDS {
            queue.enqueue(Some(n));
            let (occupied, free) = (queue.occupied(), queue.free());
            assert!(occupied <= queue.capacity() && free <= queue.capacity());
        }
        for _ in 0..consumers.len() {
            queue.enqueue(None);
        }

        let mut all = HashSet::new();
        let mut total = 0;
        for consumer in consumers {
            for n in consumer.join().unwrap() {
                total += 1;
                all.insert(n);
            }
        }
        assert_eq!(total, RECORDS);
        assert_eq!(all.len(), RECORDS);
    }
}
