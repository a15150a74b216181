use crate::trace_if_enabled;
use parking_lot::Mutex;

struct InboxState<T> {
    slots: Vec<Option<T>>,
    head: usize,
    tail: usize,
    count: usize,
    enqueued: u64,
    dropped: u64,
    drain_scheduled: bool,
}

impl<T> InboxState<T> {
    fn pop(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let frame = self.slots[self.head].take();
        self.head = (self.head + 1) % self.slots.len();
        self.count -= 1;
        frame
    }
}

/// Bounded frame buffer between a capture producer and a single drain consumer.
///
/// When full, the oldest unconsumed frame is evicted so `enqueue` never blocks. A single
/// "drain scheduled" flag makes sure at most one drain runs per inbox. Evicted frames are
/// released after the lock is dropped.
pub struct FrameInbox<T> {
    state: Mutex<InboxState<T>>,
}

impl<T> FrameInbox<T> {
    /// Creates an inbox; a capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(InboxState {
                slots: (0..capacity).map(|_| None).collect(),
                head: 0,
                tail: 0,
                count: 0,
                enqueued: 0,
                dropped: 0,
                drain_scheduled: false,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn len(&self) -> usize {
        self.state.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_drain_scheduled(&self) -> bool {
        self.state.lock().drain_scheduled
    }

    /// Buffers a frame, evicting the oldest one when full.
    ///
    /// Returns true when the caller must schedule a drain: no drain was scheduled and this
    /// call has now marked one as scheduled.
    pub fn enqueue(&self, frame: T) -> bool {
        let (evicted, schedule) = {
            let mut state = self.state.lock();
            let capacity = state.slots.len();

            let evicted = if state.count == capacity {
                let oldest = state.pop();
                state.dropped += 1;
                oldest
            } else {
                None
            };

            let tail = state.tail;
            state.slots[tail] = Some(frame);
            state.tail = (tail + 1) % capacity;
            state.count += 1;
            state.enqueued += 1;

            let schedule = !state.drain_scheduled;
            state.drain_scheduled = true;
            (evicted, schedule)
        };

        if evicted.is_some() {
            trace_if_enabled!("Frame inbox full, dropped oldest frame");
        }
        drop(evicted);
        schedule
    }

    /// Pops the oldest buffered frame. Does not touch the drain flag.
    pub fn take_next(&self) -> Option<T> {
        self.state.lock().pop()
    }

    /// Ends the current drain pass so the next `enqueue` schedules a new one.
    pub fn mark_drain_complete(&self) {
        self.state.lock().drain_scheduled = false;
    }

    /// Ends the drain pass only if nothing is buffered. Returns true when frames arrived
    /// after the consumer's last `take_next`, in which case the drain stays scheduled and the
    /// consumer should keep going.
    pub fn finish_drain(&self) -> bool {
        let mut state = self.state.lock();
        if state.count == 0 {
            state.drain_scheduled = false;
            false
        } else {
            true
        }
    }

    pub fn consume_dropped_count(&self) -> u64 {
        std::mem::take(&mut self.state.lock().dropped)
    }

    pub fn consume_enqueued_count(&self) -> u64 {
        std::mem::take(&mut self.state.lock().enqueued)
    }

    /// Discards every buffered frame, counting each one as dropped.
    pub fn clear(&self) {
        let discarded: Vec<T> = {
            let mut state = self.state.lock();
            let mut discarded = Vec::with_capacity(state.count);
            while let Some(frame) = state.pop() {
                discarded.push(frame);
            }
            state.dropped += discarded.len() as u64;
            state.head = 0;
            state.tail = 0;
            discarded
        };
        drop(discarded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn capacity_is_at_least_one() {
        let inbox: FrameInbox<u32> = FrameInbox::new(0);
        assert_eq!(inbox.capacity(), 1);

        inbox.enqueue(1);
        inbox.enqueue(2);
        assert_eq!(inbox.take_next(), Some(2));
        assert_eq!(inbox.consume_dropped_count(), 1);
    }

    #[test]
    fn drop_oldest_keeps_most_recent_frames_in_order() {
        let capacity = 4;
        let overflow = 3;
        let inbox = FrameInbox::new(capacity);

        for frame in 0..(capacity + overflow) {
            inbox.enqueue(frame);
        }

        let drained: Vec<usize> = std::iter::from_fn(|| inbox.take_next()).collect();
        assert_eq!(drained, vec![3, 4, 5, 6]);
        assert_eq!(inbox.consume_dropped_count(), overflow as u64);
        assert_eq!(inbox.consume_dropped_count(), 0);
        assert_eq!(inbox.consume_enqueued_count(), (capacity + overflow) as u64);
    }

    #[test]
    fn take_next_on_empty_returns_none() {
        let inbox: FrameInbox<u8> = FrameInbox::new(2);
        assert!(inbox.take_next().is_none());
        assert!(inbox.is_empty());
    }

    #[test]
    fn only_first_enqueue_schedules_drain() {
        let inbox = FrameInbox::new(8);

        assert!(inbox.enqueue(1));
        assert!(!inbox.enqueue(2));
        assert!(!inbox.enqueue(3));

        // taking frames does not reset the flag
        while inbox.take_next().is_some() {}
        assert!(!inbox.enqueue(4));

        inbox.mark_drain_complete();
        assert!(inbox.enqueue(5));
    }

    #[test]
    fn concurrent_producers_schedule_once() {
        let inbox = Arc::new(FrameInbox::new(16));

        let producers: Vec<_> = (0..8)
            .map(|producer| {
                let inbox = Arc::clone(&inbox);
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|frame| inbox.enqueue(producer * 1000 + frame))
                        .count()
                })
            })
            .collect();

        let schedules: usize = producers.into_iter().map(|p| p.join().unwrap()).sum();
        assert_eq!(schedules, 1);
        assert_eq!(inbox.len(), 16);
        assert_eq!(inbox.consume_enqueued_count(), 800);
        assert_eq!(inbox.consume_dropped_count(), 800 - 16);
    }

    #[test]
    fn clear_counts_discarded_frames() {
        let inbox = FrameInbox::new(5);
        for frame in 0..3 {
            inbox.enqueue(frame);
        }
        inbox.take_next();

        inbox.clear();
        assert!(inbox.is_empty());
        assert_eq!(inbox.consume_dropped_count(), 2);

        inbox.enqueue(10);
        inbox.enqueue(11);
        assert_eq!(inbox.take_next(), Some(10));
        assert_eq!(inbox.take_next(), Some(11));
    }

    #[test]
    fn finish_drain_keeps_schedule_while_frames_remain() {
        let inbox = FrameInbox::new(4);
        assert!(inbox.enqueue(1));
        assert!(inbox.finish_drain());
        assert!(inbox.is_drain_scheduled());

        inbox.take_next();
        assert!(!inbox.finish_drain());
        assert!(!inbox.is_drain_scheduled());
        assert!(inbox.enqueue(2));
    }
}
