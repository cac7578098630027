// TickLoom - Virtual Timer Peripheral Simulation Engine
// Copyright (C) 2026 TickLoom Authors
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::metrics::EngineMetrics;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// Routing tag identifying the component that armed a schedule.
///
/// The upper half addresses the peripheral on the machine, the lower half a
/// sub-unit inside it (counter, compare channel N, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventSlot(u64);

impl EventSlot {
    pub fn new(device: u32, local: u32) -> Self {
        Self(((device as u64) << 32) | local as u64)
    }

    pub fn device(&self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn local(&self) -> u32 {
        self.0 as u32
    }
}

/// Tagged value delivered back to the scheduling component when its deadline
/// is reached. The epoch snapshots the owner's configuration version at arming
/// time; the owner ignores the event if its live epoch has moved on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventToken {
    pub slot: EventSlot,
    pub epoch: u64,
}

/// Opaque handle to one pending schedule, usable for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(u64);

/// A schedule whose deadline has been reached during an advance.
#[derive(Debug, Clone, Copy)]
pub struct DueEvent {
    pub at: u64,
    pub token: EventToken,
}

#[derive(Debug)]
struct Entry {
    deadline: u64,
    seq: u64,
    id: u64,
    token: EventToken,
}

// BinaryHeap is a max-heap; invert the ordering so the earliest deadline
// (ties broken by registration order) surfaces first.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Entry {}

/// Monotonic virtual tick counter plus an ordered one-shot callback queue.
///
/// This is the only time source in a machine: counters never tick in a loop,
/// they ask for exactly one callback at the next externally visible
/// transition. Advancing is a two-phase protocol so that handlers may mutate
/// the clock (re-arm, cancel) while the drain is in progress:
///
/// ```ignore
/// while let Some(due) = clock.pop_due(target) {
///     /* dispatch to owner, which may schedule_after() again */
/// }
/// clock.finish_advance(target);
/// ```
#[derive(Debug, Default)]
pub struct VirtualClock {
    now: u64,
    next_seq: u64,
    next_id: u64,
    queue: BinaryHeap<Entry>,
    cancelled: HashSet<u64>,
    metrics: EngineMetrics,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current virtual tick. Only moves forward.
    pub fn now(&self) -> u64 {
        self.now
    }

    /// Arm a one-shot callback `ticks` from now.
    pub fn schedule_after(&mut self, ticks: u64, token: EventToken) -> TimerHandle {
        let id = self.next_id;
        self.next_id += 1;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Entry {
            deadline: self.now.saturating_add(ticks),
            seq,
            id,
            token,
        });
        self.metrics.note_scheduled();
        TimerHandle(id)
    }

    /// Invalidate a pending schedule. Lazy: the entry is dropped when it
    /// surfaces from the queue.
    pub fn cancel(&mut self, handle: TimerHandle) {
        if self.cancelled.insert(handle.0) {
            self.metrics.note_cancelled();
        }
    }

    /// Pop the next due event with `deadline <= target`, moving `now` to its
    /// deadline. Returns `None` once no event is due within the window.
    pub fn pop_due(&mut self, target: u64) -> Option<DueEvent> {
        while let Some(head) = self.queue.peek() {
            if head.deadline > target {
                return None;
            }
            let entry = self.queue.pop().expect("peeked entry vanished");
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            if entry.deadline > self.now {
                self.now = entry.deadline;
            }
            self.metrics.note_fired();
            return Some(DueEvent {
                at: entry.deadline,
                token: entry.token,
            });
        }
        None
    }

    /// Commit the end of an advance window after the due events were drained.
    pub fn finish_advance(&mut self, target: u64) {
        if target > self.now {
            self.now = target;
        }
    }

    /// Earliest pending deadline, if any schedule is armed.
    pub fn next_deadline(&self) -> Option<u64> {
        self.queue
            .iter()
            .filter(|e| !self.cancelled.contains(&e.id))
            .map(|e| e.deadline)
            .min()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Record that an owner discarded a callback with an outdated epoch.
    pub fn note_stale_event(&mut self) {
        self.metrics.note_stale();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(local: u32, epoch: u64) -> EventToken {
        EventToken {
            slot: EventSlot::new(0, local),
            epoch,
        }
    }

    #[test]
    fn test_slot_packing() {
        let slot = EventSlot::new(7, 3);
        assert_eq!(slot.device(), 7);
        assert_eq!(slot.local(), 3);
    }

    #[test]
    fn test_events_fire_in_deadline_order() {
        let mut clock = VirtualClock::new();
        clock.schedule_after(20, token(1, 0));
        clock.schedule_after(10, token(2, 0));

        let first = clock.pop_due(100).unwrap();
        assert_eq!(first.at, 10);
        assert_eq!(first.token.slot.local(), 2);
        assert_eq!(clock.now(), 10);

        let second = clock.pop_due(100).unwrap();
        assert_eq!(second.at, 20);
        assert!(clock.pop_due(100).is_none());

        clock.finish_advance(100);
        assert_eq!(clock.now(), 100);
    }

    #[test]
    fn test_ties_break_by_registration_order() {
        let mut clock = VirtualClock::new();
        clock.schedule_after(5, token(1, 0));
        clock.schedule_after(5, token(2, 0));

        assert_eq!(clock.pop_due(5).unwrap().token.slot.local(), 1);
        assert_eq!(clock.pop_due(5).unwrap().token.slot.local(), 2);
    }

    #[test]
    fn test_cancelled_events_never_surface() {
        let mut clock = VirtualClock::new();
        let handle = clock.schedule_after(5, token(1, 0));
        clock.schedule_after(6, token(2, 0));
        clock.cancel(handle);

        let due = clock.pop_due(100).unwrap();
        assert_eq!(due.token.slot.local(), 2);
        assert!(clock.pop_due(100).is_none());
        assert_eq!(clock.metrics().events_cancelled, 1);
        assert_eq!(clock.metrics().events_fired, 1);
    }

    #[test]
    fn test_rearm_within_same_window_is_honored() {
        let mut clock = VirtualClock::new();
        clock.schedule_after(10, token(1, 0));

        let first = clock.pop_due(50).unwrap();
        assert_eq!(first.at, 10);
        // Periodic-style re-arm from the handler.
        clock.schedule_after(10, token(1, 1));

        let second = clock.pop_due(50).unwrap();
        assert_eq!(second.at, 20);
        assert!(clock.pop_due(25).is_none());
    }

    #[test]
    fn test_events_beyond_window_stay_queued() {
        let mut clock = VirtualClock::new();
        clock.schedule_after(100, token(1, 0));
        assert!(clock.pop_due(99).is_none());
        clock.finish_advance(99);
        assert_eq!(clock.now(), 99);
        assert_eq!(clock.next_deadline(), Some(100));

        let due = clock.pop_due(100).unwrap();
        assert_eq!(due.at, 100);
    }
}
