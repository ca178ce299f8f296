use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use log::warn;

use crate::hit::ZeroCopyHit;

/// A hit tagged with the index of the module that produced it.
pub type Hit = (usize, ZeroCopyHit);

fn timestamp(hit: &Hit) -> f64 {
    hit.1.time
}

/// Min-heap key: the front timestamp of one per-module deque.
struct FrontKey {
    ts: f64,
    queue: usize,
}

impl PartialEq for FrontKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for FrontKey {}
impl PartialOrd for FrontKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for FrontKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the BinaryHeap pops the smallest stamp first;
        // total_cmp keeps a NaN calibration product from wedging the heap.
        other
            .ts
            .total_cmp(&self.ts)
            .then_with(|| other.queue.cmp(&self.queue))
    }
}

/// Accumulates hits from all modules in one globally time ordered deque and
/// releases them once the queue spans more than the emission window.
///
/// Storage is not managed here; whoever drains hits must free them.
pub struct HitManager {
    emit_window_ns: f64,
    sorted_hits: VecDeque<Hit>,
    flushing: bool,
}

impl HitManager {
    /// `window` is in seconds; timestamps are nanoseconds.
    pub fn new(window: f64) -> HitManager {
        HitManager {
            emit_window_ns: window * 1.0e9,
            sorted_hits: VecDeque::new(),
            flushing: false,
        }
    }

    /// Merges one deque of hits per module into the sorted queue.
    ///
    /// Each deque is sorted in place first (upstream order is usually but
    /// not dependably monotonic), the deques are k-way merged, and the
    /// result is spliced onto the sorted queue.
    pub fn add_hits(&mut self, new_hits: &mut Vec<VecDeque<Hit>>) {
        for queue in new_hits.iter_mut() {
            queue
                .make_contiguous()
                .sort_by(|a, b| timestamp(a).total_cmp(&timestamp(b)));
        }
        let merged = Self::kway_merge(new_hits);
        self.splice_merge(merged);
    }

    /// True when the front hit may be emitted: either we are flushing and
    /// have anything at all, or the queue spans more than the window.
    pub fn have_hit(&self) -> bool {
        match self.sorted_hits.len() {
            0 => false,
            1 => self.flushing,
            _ => {
                self.flushing
                    || timestamp(self.sorted_hits.back().unwrap())
                        - timestamp(self.sorted_hits.front().unwrap())
                        > self.emit_window_ns
            }
        }
    }

    /// Pops the earliest hit.  Calling this on an empty queue is a
    /// sequencing bug in the caller.
    pub fn get_hit(&mut self) -> Hit {
        self.sorted_hits
            .pop_front()
            .expect("get_hit on an empty hit queue")
    }

    pub fn set_flushing(&mut self, flushing: bool) {
        self.flushing = flushing;
    }

    pub fn len(&self) -> usize {
        self.sorted_hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorted_hits.is_empty()
    }

    /// Releases every queued hit.
    pub fn clear(&mut self) {
        if !self.sorted_hits.is_empty() {
            warn!("hit manager dropping {} residual hits", self.sorted_hits.len());
        }
        for (_, mut hit) in self.sorted_hits.drain(..) {
            hit.free_hit();
        }
    }

    /// K-way merge of the per-module deques, each already sorted, keyed on
    /// the front timestamps.  Once a single deque remains its tail is
    /// appended wholesale.
    fn kway_merge(queues: &mut Vec<VecDeque<Hit>>) -> VecDeque<Hit> {
        let mut heap: BinaryHeap<FrontKey> = queues
            .iter()
            .enumerate()
            .filter(|(_, q)| !q.is_empty())
            .map(|(i, q)| FrontKey {
                ts: timestamp(q.front().unwrap()),
                queue: i,
            })
            .collect();

        let mut result = VecDeque::new();
        while heap.len() > 1 {
            let key = heap.pop().unwrap();
            let queue = &mut queues[key.queue];
            result.push_back(queue.pop_front().unwrap());
            if let Some(front) = queue.front() {
                heap.push(FrontKey {
                    ts: timestamp(front),
                    queue: key.queue,
                });
            }
        }
        if let Some(last) = heap.pop() {
            result.extend(queues[last.queue].drain(..));
        }
        result
    }

    /// Merges sorted new hits onto the back of the sorted queue.  In the
    /// steady state per-module batches cover milliseconds while the queue
    /// spans the whole window, so the new front almost always lands after
    /// the existing back and the splice is O(1).
    fn splice_merge(&mut self, mut new_hits: VecDeque<Hit>) {
        if new_hits.is_empty() {
            return;
        }
        if self.sorted_hits.is_empty() {
            self.sorted_hits = new_hits;
            return;
        }
        let new_front = timestamp(new_hits.front().unwrap());
        if timestamp(self.sorted_hits.back().unwrap()) <= new_front {
            self.sorted_hits.append(&mut new_hits);
            return;
        }

        // Peel the overlapping tail off the queue, then two-way merge it
        // with the new hits back on.
        let mut tail = VecDeque::new();
        while let Some(back) = self.sorted_hits.back() {
            if timestamp(back) < new_front {
                break;
            }
            tail.push_front(self.sorted_hits.pop_back().unwrap());
        }
        while !tail.is_empty() && !new_hits.is_empty() {
            let take_tail =
                timestamp(tail.front().unwrap()) <= timestamp(new_hits.front().unwrap());
            let next = if take_tail {
                tail.pop_front().unwrap()
            } else {
                new_hits.pop_front().unwrap()
            };
            self.sorted_hits.push_back(next);
        }
        self.sorted_hits.append(&mut tail);
        self.sorted_hits.append(&mut new_hits);
    }
}

impl Drop for HitManager {
    fn drop(&mut self) {
        self.clear();
    }
}
