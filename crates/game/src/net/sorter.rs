//! A ring of per-tick queues that sorts incoming messages by the tick
//! they're stamped with.
//!
//! The receive thread is the producer; the simulation consumes one tick's
//! queue at a time by calling [`TickSorter::start_receive`] and dropping the
//! returned guard when done. Pushes block while a receive is in progress.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// How far into the future we'll buffer messages for. The valid window is
/// `[current_tick, current_tick + SORTER_BUFFER_SIZE)`.
pub const SORTER_BUFFER_SIZE: usize = 10;

/// Validity of a pushed message's tick relative to the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    /// The message's tick has already been consumed.
    TooLow,
    Valid,
    /// The message's tick is beyond the end of the buffer.
    TooHigh,
}

/// The validity and tick diff from a push operation.
///
/// `diff` is `message tick - current tick`, the raw measurement fed into
/// the tick-adjustment controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushResult {
    pub validity: Validity,
    pub diff: i64,
}

#[derive(Debug)]
struct Slots<T> {
    queues: [VecDeque<T>; SORTER_BUFFER_SIZE],
    current_tick: u32,
}

impl<T> Slots<T> {
    fn validity(&self, tick: u32) -> Validity {
        if tick < self.current_tick {
            Validity::TooLow
        } else if tick >= self.current_tick + SORTER_BUFFER_SIZE as u32 {
            Validity::TooHigh
        } else {
            Validity::Valid
        }
    }
}

#[derive(Debug)]
pub struct TickSorter<T> {
    slots: Mutex<Slots<T>>,
}

impl<T> Default for TickSorter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TickSorter<T> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Slots {
                queues: std::array::from_fn(|_| VecDeque::new()),
                current_tick: 0,
            }),
        }
    }

    /// Buffers the message if its tick lies inside the valid window.
    ///
    /// Always returns the tick diff, even for dropped messages; drops are
    /// reported upstream so the offending client can be told. Blocks while
    /// a receive is in progress.
    pub fn push(&self, tick: u32, message: T) -> PushResult {
        let mut slots = self.slots.lock().unwrap();

        let validity = slots.validity(tick);
        if validity == Validity::Valid {
            let index = tick as usize % SORTER_BUFFER_SIZE;
            slots.queues[index].push_back(message);
        }

        PushResult {
            validity,
            diff: i64::from(tick) - i64::from(slots.current_tick),
        }
    }

    /// Locks the sorter and grants access to the queue for the current tick.
    ///
    /// `tick` must equal the sorter's current tick; anything else means the
    /// caller's tick counter and the sorter have diverged, which is a logic
    /// bug we can't recover from. Dropping the guard ends the receive: it
    /// frees the drained slot and advances the window by one tick.
    pub fn start_receive(&self, tick: u32) -> ReceiveGuard<'_, T> {
        let slots = self.slots.lock().unwrap();
        assert_eq!(
            tick, slots.current_tick,
            "start_receive for tick {tick} while the sorter is at {}",
            slots.current_tick
        );

        ReceiveGuard { slots }
    }

    /// The tick the window currently starts at. Exposed for tests; the sim
    /// should track its own tick counter.
    pub fn current_tick(&self) -> u32 {
        self.slots.lock().unwrap().current_tick
    }
}

/// Exclusive access to the current tick's queue; see
/// [`TickSorter::start_receive`].
pub struct ReceiveGuard<'a, T> {
    slots: MutexGuard<'a, Slots<T>>,
}

impl<T> ReceiveGuard<'_, T> {
    pub fn pop(&mut self) -> Option<T> {
        let index = self.slots.current_tick as usize % SORTER_BUFFER_SIZE;
        self.slots.queues[index].pop_front()
    }

    pub fn len(&self) -> usize {
        let index = self.slots.current_tick as usize % SORTER_BUFFER_SIZE;
        self.slots.queues[index].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Drop for ReceiveGuard<'_, T> {
    fn drop(&mut self) {
        // Anything the consumer left behind would otherwise leak into tick
        // current + SORTER_BUFFER_SIZE when the slot comes around again.
        let index = self.slots.current_tick as usize % SORTER_BUFFER_SIZE;
        self.slots.queues[index].clear();
        self.slots.current_tick += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_the_valid_window() {
        let sorter: TickSorter<u32> = TickSorter::new();

        let result = sorter.push(0, 1);
        assert_eq!(result.validity, Validity::Valid);
        assert_eq!(result.diff, 0);

        let result = sorter.push(SORTER_BUFFER_SIZE as u32 - 1, 2);
        assert_eq!(result.validity, Validity::Valid);
        assert_eq!(result.diff, SORTER_BUFFER_SIZE as i64 - 1);

        let result = sorter.push(SORTER_BUFFER_SIZE as u32, 3);
        assert_eq!(result.validity, Validity::TooHigh);
        assert_eq!(result.diff, SORTER_BUFFER_SIZE as i64);
    }

    #[test]
    fn late_pushes_report_negative_diff() {
        let sorter: TickSorter<u32> = TickSorter::new();
        for _ in 0..5 {
            drop(sorter.start_receive(sorter.current_tick()));
        }

        // Window is now [5, 15); tick 0 is 5 behind.
        let result = sorter.push(0, 1);
        assert_eq!(result.validity, Validity::TooLow);
        assert_eq!(result.diff, -5);
    }

    #[test]
    fn delivers_in_tick_order() {
        let sorter: TickSorter<&str> = TickSorter::new();
        sorter.push(1, "b");
        sorter.push(0, "a");
        sorter.push(0, "a2");
        sorter.push(2, "c");

        let mut guard = sorter.start_receive(0);
        assert_eq!(guard.pop(), Some("a"));
        assert_eq!(guard.pop(), Some("a2"));
        assert_eq!(guard.pop(), None);
        drop(guard);

        let mut guard = sorter.start_receive(1);
        assert_eq!(guard.pop(), Some("b"));
        drop(guard);

        let mut guard = sorter.start_receive(2);
        assert_eq!(guard.pop(), Some("c"));
        drop(guard);
    }

    #[test]
    fn ending_a_receive_advances_the_window() {
        let sorter: TickSorter<u32> = TickSorter::new();
        assert_eq!(sorter.current_tick(), 0);

        drop(sorter.start_receive(0));
        assert_eq!(sorter.current_tick(), 1);

        // Tick 0 is now too low, tick SORTER_BUFFER_SIZE is now valid.
        assert_eq!(sorter.push(0, 1).validity, Validity::TooLow);
        assert_eq!(
            sorter.push(SORTER_BUFFER_SIZE as u32, 2).validity,
            Validity::Valid
        );
    }

    #[test]
    fn undrained_messages_do_not_leak_into_a_later_tick() {
        let sorter: TickSorter<u32> = TickSorter::new();
        sorter.push(0, 7);

        // Consumer never drains the queue.
        drop(sorter.start_receive(0));

        // Wrap all the way around the ring to the slot tick 0 occupied.
        for tick in 1..SORTER_BUFFER_SIZE as u32 {
            drop(sorter.start_receive(tick));
        }
        sorter.push(SORTER_BUFFER_SIZE as u32, 8);

        let mut guard = sorter.start_receive(SORTER_BUFFER_SIZE as u32);
        assert_eq!(guard.pop(), Some(8));
        assert_eq!(guard.pop(), None);
    }

    #[test]
    #[should_panic(expected = "start_receive")]
    fn receiving_the_wrong_tick_panics() {
        let sorter: TickSorter<u32> = TickSorter::new();
        let _guard = sorter.start_receive(3);
    }

    #[test]
    fn pushes_block_while_a_receive_is_in_progress() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::time::Duration;

        let sorter: Arc<TickSorter<u32>> = Arc::new(TickSorter::new());
        let pushed = Arc::new(AtomicBool::new(false));

        let guard = sorter.start_receive(0);

        let producer = {
            let sorter = Arc::clone(&sorter);
            let pushed = Arc::clone(&pushed);
            std::thread::spawn(move || {
                sorter.push(1, 42);
                pushed.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(50));
        assert!(!pushed.load(Ordering::SeqCst));

        drop(guard);
        producer.join().unwrap();
        assert!(pushed.load(Ordering::SeqCst));
    }
}
