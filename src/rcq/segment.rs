use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

/// Value reserved for empty slots and removal gaps.
const EMPTY: i64 = 0;

struct Slot {
    sequence: AtomicI64,
    value: AtomicI64,
}

/// One lock-free array-based ring, linkable into a larger queue.
///
/// Slot sequences follow the bounded-MPMC protocol: a slot is
/// enqueue-able when `sequence == tail`, dequeue-able when
/// `sequence == head + 1`, and marked `head + size` once dequeued so the
/// next lap treats it as empty.
pub(crate) struct Segment {
    head: AtomicI64,
    tail: AtomicI64,
    mask: i64,
    slots: Box<[Slot]>,
    next: Mutex<Option<Arc<Segment>>>,
}

impl Segment {
    fn new(size: usize) -> Self {
        debug_assert!(size.is_power_of_two(), "segment size must be a power of two");
        let slots = (0..size)
            .map(|i| Slot {
                sequence: AtomicI64::new(i as i64),
                value: AtomicI64::new(EMPTY),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            head: AtomicI64::new(0),
            tail: AtomicI64::new(0),
            mask: size as i64 - 1,
            slots,
            next: Mutex::new(None),
        }
    }

    pub(crate) fn size(&self) -> usize {
        (self.mask + 1) as usize
    }

    fn try_enqueue(&self, value: i64) -> bool {
        assert_ne!(value, EMPTY, "empty value is reserved");

        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let index = (tail & self.mask) as usize;
            let diff = self.slots[index].sequence.load(Ordering::Acquire) - tail;

            if diff == 0 {
                // the slot is free; race for the tail
                if self
                    .tail
                    .compare_exchange(tail, tail + 1, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    self.slots[index].value.store(value, Ordering::Relaxed);
                    self.slots[index].sequence.store(tail + 1, Ordering::Release);
                    return true;
                }
            } else if diff < 0 {
                // either catching up with dequeued data or the slot is
                // still occupied: the segment is full
                return false;
            }
            // lost a race to another enqueuer, try again
        }
    }

    /// Null out the first occurrence of `value`, leaving a gap for the
    /// dequeue path to skip. Used when removals arrive in arbitrary order.
    fn try_remove(&self, value: i64) -> bool {
        assert_ne!(value, EMPTY, "empty value is reserved");

        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let index = (head & self.mask) as usize;
            let diff = self.slots[index].sequence.load(Ordering::Acquire) - (head + 1);

            if diff == 0 {
                // enqueued earlier
                if self.slots[index]
                    .value
                    .compare_exchange(value, EMPTY, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    return true;
                }
                head += 1;
            } else if diff < 0 {
                // empty (possibly transiently); treat as not found
                return false;
            } else {
                // the slot was dequeued under us; skip it
                head += 1;
            }
        }
    }

    fn try_dequeue(&self) -> Option<i64> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            let index = (head & self.mask) as usize;
            let diff = self.slots[index].sequence.load(Ordering::Acquire) - (head + 1);

            if diff == 0 {
                // reserve the slot
                if self
                    .head
                    .compare_exchange(head, head + 1, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    let value = self.slots[index].value.swap(EMPTY, Ordering::AcqRel);

                    // the next lap sees this slot as empty, and a racing
                    // dequeuer knows it has been taken
                    self.slots[index]
                        .sequence
                        .store(head + self.mask + 1, Ordering::Release);

                    if value == EMPTY {
                        // a removal nulled this slot earlier; skip the gap
                        continue;
                    }
                    return Some(value);
                }
            } else if diff < 0 {
                // empty (possibly transiently)
                return None;
            }
            // lost a race to another dequeuer, try again
        }
    }

    fn is_empty(&self) -> bool {
        let head = self.head.load(Ordering::Acquire);
        let index = (head & self.mask) as usize;
        self.slots[index].sequence.load(Ordering::Acquire) - (head + 1) < 0
    }

    fn get_next(&self) -> Option<Arc<Segment>> {
        self.next.lock().clone()
    }

    fn set_next_if_null(&self, segment: Arc<Segment>) -> bool {
        let mut next = self.next.lock();
        if next.is_some() {
            return false;
        }
        *next = Some(segment);
        true
    }
}

/// An unbounded MPMC queue of non-zero `i64` values built from linked
/// ring segments.
///
/// Grown segments double in size up to `max_segment_size`. Advancing the
/// head across a segment boundary happens under a writer lock so a
/// concurrent dequeuer can never observe a retired segment (the classic
/// ABA hazard of this structure); plain dequeues within a segment only
/// take the reader side.
pub struct SegmentQueue {
    head: RwLock<Arc<Segment>>,
    tail: RwLock<Arc<Segment>>,
    max_segment_size: usize,
}

impl std::fmt::Debug for SegmentQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentQueue")
            .field("segments", &self.segment_count())
            .finish_non_exhaustive()
    }
}

impl SegmentQueue {
    pub fn new(start_segment_size: usize, max_segment_size: usize) -> Self {
        let start = start_segment_size.max(2).next_power_of_two();
        let max = max_segment_size.max(start).next_power_of_two();
        let first = Arc::new(Segment::new(start));
        Self {
            head: RwLock::new(Arc::clone(&first)),
            tail: RwLock::new(first),
            max_segment_size: max,
        }
    }

    /// Append `value`; grows a new tail segment when the current one is
    /// full.
    pub fn enqueue(&self, value: i64) {
        let mut new_segment: Option<Arc<Segment>> = None;

        loop {
            // the tail pointer is read under the lock so a racing head
            // advance cannot hand us a retired segment
            let tail = Arc::clone(&*self.tail.read());

            if tail.try_enqueue(value) {
                return;
            }

            let segment = new_segment.take().unwrap_or_else(|| {
                let size = (tail.size() * 2).min(self.max_segment_size);
                Arc::new(Segment::new(size))
            });

            // link tail.next first so the chain stays consistent; only the
            // winner moves the tail pointer
            if tail.set_next_if_null(Arc::clone(&segment)) {
                *self.tail.write() = segment;
            } else {
                new_segment = Some(segment);
            }
        }
    }

    /// Pop the oldest value, skipping removal gaps.
    pub fn try_dequeue(&self) -> Option<i64> {
        loop {
            let head = Arc::clone(&*self.head.read());

            if let Some(value) = head.try_dequeue() {
                return Some(value);
            }

            // cross to the next segment; when there is none the queue is
            // empty. Head segments keep their next pointer when unlinked
            // so a racing dequeuer never observes null here spuriously.
            let next = head.get_next()?;

            let mut guard = self.head.write();
            if Arc::ptr_eq(&guard, &head) {
                *guard = next;
            }
            // lost the race: someone else advanced; retry either way
        }
    }

    /// Null out the first occurrence of `value` anywhere in the queue,
    /// reclaiming empty head segments on the way.
    pub fn remove(&self, value: i64) -> bool {
        loop {
            let head = Arc::clone(&*self.head.read());
            if !head.is_empty() {
                break;
            }
            let Some(next) = head.get_next() else {
                break;
            };
            let mut guard = self.head.write();
            if Arc::ptr_eq(&guard, &head) {
                *guard = next;
            }
        }

        let mut segment = Some(Arc::clone(&*self.head.read()));
        while let Some(current) = segment {
            if current.try_remove(value) {
                return true;
            }
            // removals on a secondary can target any segment because
            // enqueues arrived in arbitrary order
            segment = current.get_next();
        }
        false
    }

    /// Number of linked segments, including retired-but-linked ones ahead
    /// of the head.
    pub fn segment_count(&self) -> usize {
        let mut count = 1;
        let mut segment = Arc::clone(&*self.head.read());
        while let Some(next) = segment.get_next() {
            count += 1;
            segment = next;
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_within_one_segment() {
        let queue = SegmentQueue::new(8, 1024);
        for value in 1..=5 {
            queue.enqueue(value);
        }
        for value in 1..=5 {
            assert_eq!(queue.try_dequeue(), Some(value));
        }
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn crossing_segments_preserves_order() {
        let queue = SegmentQueue::new(8, 1024);
        for value in 1..=25 {
            queue.enqueue(value);
        }

        // 8 + 16 is not enough for 25 items, so a third segment exists
        let segments = queue.segment_count();
        assert!((2..=3).contains(&segments), "got {segments} segments");

        for value in 1..=25 {
            assert_eq!(queue.try_dequeue(), Some(value));
        }
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn segment_growth_is_capped() {
        let queue = SegmentQueue::new(2, 4);
        for value in 1..=64 {
            queue.enqueue(value);
        }
        for value in 1..=64 {
            assert_eq!(queue.try_dequeue(), Some(value));
        }
    }

    #[test]
    fn removed_values_leave_skippable_gaps() {
        let queue = SegmentQueue::new(8, 1024);
        for value in 1..=5 {
            queue.enqueue(value);
        }

        assert!(queue.remove(2));
        assert!(queue.remove(4));
        assert!(!queue.remove(99));

        assert_eq!(queue.try_dequeue(), Some(1));
        assert_eq!(queue.try_dequeue(), Some(3));
        assert_eq!(queue.try_dequeue(), Some(5));
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn remove_reaches_later_segments() {
        let queue = SegmentQueue::new(2, 2);
        for value in 1..=10 {
            queue.enqueue(value);
        }
        // value 9 lives several segments past the head
        assert!(queue.remove(9));
        let drained: Vec<i64> = std::iter::from_fn(|| queue.try_dequeue()).collect();
        assert_eq!(drained, vec![1, 2, 3, 4, 5, 6, 7, 8, 10]);
    }

    #[test]
    fn empty_head_segments_are_reclaimed() {
        let queue = SegmentQueue::new(2, 2);
        for value in 1..=9 {
            queue.enqueue(value);
        }
        for _ in 1..=8 {
            queue.try_dequeue();
        }

        let before = queue.segment_count();
        assert!(queue.remove(9));
        let after = queue.segment_count();
        assert!(after <= before, "{after} > {before}");
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn concurrent_producers_and_consumers_drain_exactly_once() {
        const PRODUCERS: i64 = 4;
        const PER_PRODUCER: i64 = 1000;

        let queue = Arc::new(SegmentQueue::new(8, 256));
        let mut handles = Vec::new();

        for producer in 0..PRODUCERS {
            let queue = Arc::clone(&queue);
            handles.push(std::thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    queue.enqueue(producer * PER_PRODUCER + i + 1);
                }
            }));
        }

        let drained = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = Arc::clone(&queue);
            let drained = Arc::clone(&drained);
            let done = Arc::clone(&done);
            consumers.push(std::thread::spawn(move || loop {
                match queue.try_dequeue() {
                    Some(value) => drained.lock().push(value),
                    None => {
                        if done.load(Ordering::SeqCst) {
                            return;
                        }
                        std::thread::yield_now();
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        for consumer in consumers {
            consumer.join().unwrap();
        }

        let mut values = drained.lock().clone();
        values.sort_unstable();
        let want: Vec<i64> = (1..=PRODUCERS * PER_PRODUCER).collect();
        assert_eq!(values, want);
    }
}
