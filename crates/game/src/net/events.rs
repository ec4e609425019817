use std::collections::VecDeque;
use std::sync::Mutex;

/// An unbounded FIFO queue for handing typed events between tasks.
///
/// The receive thread is the producer and the simulation is the consumer,
/// but nothing prevents multiple producers; ordering is preserved per
/// producer by the reliable stream underneath.
#[derive(Debug)]
pub struct EventQueue<T> {
    inner: Mutex<VecDeque<T>>,
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, event: T) {
        self.inner.lock().unwrap().push_back(event);
    }

    pub fn pop(&self) -> Option<T> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let queue = EventQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);

        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn shared_between_threads() {
        use std::sync::Arc;

        let queue = Arc::new(EventQueue::new());
        let producer = Arc::clone(&queue);

        let handle = std::thread::spawn(move || {
            for i in 0..100 {
                producer.push(i);
            }
        });
        handle.join().unwrap();

        let mut received = Vec::new();
        while let Some(event) = queue.pop() {
            received.push(event);
        }
        assert_eq!(received, (0..100).collect::<Vec<_>>());
    }
}
