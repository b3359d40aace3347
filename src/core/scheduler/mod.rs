// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Global event scheduler
//!
//! A min-heap of timestamped events against which every peripheral
//! synchronizes. Each event carries an [`EventTarget`] naming the device
//! state machine that must run when the trigger time elapses; the bus owns
//! the dispatch, so devices never store callbacks or back-pointers.
//!
//! Invariants:
//! - event ids are unique and monotonically increasing
//! - the current timestamp never moves backwards
//! - when two events share a trigger timestamp they fire in insertion order
//! - a fired callback may schedule new events, including events with
//!   `trigger <= now` (the caller passes `ignore_overflow` while fast
//!   forwarding so such events see zero cycles-late instead of recursing
//!   into negative schedule offsets)

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Opaque event handle returned by [`Scheduler::schedule`]
pub type EventId = u64;

/// Sentinel id representing "no event"
pub const INVALID_EVENT: EventId = EventId::MAX;

/// Upper bound on simultaneously pending events. Blowing through this is an
/// invariant violation in device code, not a tunable; overflow halts the
/// simulation.
const MAX_EVENTS: usize = 64;

/// Which device state machine a fired event drives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTarget {
    /// GPU horizontal-blank entry (timer 0 sync, rescheduled per line)
    GpuHBlank,
    /// GPU end-of-scanline (scanline counter, VBlank detection)
    GpuLineEnd,
    /// Root counter hit its target value
    TimerTarget(u8),
    /// Root counter wrapped past 0xFFFF
    TimerOverflow(u8),
    /// CDROM drive response delivery
    CdromResponse,
    /// CDROM sector read completed
    CdromSector,
    /// SIO byte exchange completed (0 = SIO0, 1 = SIO1)
    SioTransfer(u8),
    /// SPU manual-mode FIFO drained into sound RAM
    SpuFifoTransfer,
}

/// A fired event handed back to the dispatcher
#[derive(Debug, Clone, Copy)]
pub struct FiredEvent {
    pub target: EventTarget,
    /// How far past the trigger timestamp the advance window reached
    /// (zero while fast-forwarding)
    pub cycles_late: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Event {
    trigger_timestamp: u64,
    /// Monotone id; doubles as the tie-breaker so that equal triggers pop in
    /// insertion order
    event_id: EventId,
    registered_timestamp: u64,
    target: EventTarget,
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.trigger_timestamp, self.event_id).cmp(&(other.trigger_timestamp, other.event_id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Timestamped priority queue of pending device events
pub struct Scheduler {
    current_timestamp: u64,
    last_id: EventId,
    events: BinaryHeap<Reverse<Event>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            current_timestamp: 0,
            last_id: 0,
            events: BinaryHeap::with_capacity(MAX_EVENTS),
        }
    }

    /// Current simulated time in system-clock cycles
    #[inline(always)]
    pub fn now(&self) -> u64 {
        self.current_timestamp
    }

    /// Register an event `cycles` from now, returning its id
    ///
    /// # Panics
    ///
    /// Queue overflow is a fatal invariant violation: no device ever keeps
    /// more than a handful of events in flight, so blowing past
    /// [`MAX_EVENTS`] means runaway rescheduling. The simulation halts with
    /// a diagnostic rather than silently dropping the event (the same way
    /// the bus treats a failed region remap).
    pub fn schedule(&mut self, cycles: u64, target: EventTarget) -> EventId {
        if self.events.len() == MAX_EVENTS {
            panic!(
                "invariant violation: scheduler overflow ({MAX_EVENTS} events pending, \
                 next {target:?} in {cycles} cycles)"
            );
        }

        let id = self.last_id;
        self.last_id += 1;

        self.events.push(Reverse(Event {
            trigger_timestamp: self.current_timestamp + cycles,
            event_id: id,
            registered_timestamp: self.current_timestamp,
            target,
        }));

        id
    }

    /// Remove a pending event by id
    ///
    /// Returns whether an entry was removed. Cancelling an already-fired (or
    /// invalid) event is a silent no-op returning `false`. O(n): the heap is
    /// drained, filtered and rebuilt.
    pub fn deschedule(&mut self, event_id: EventId) -> bool {
        if event_id == INVALID_EVENT {
            return false;
        }

        let before = self.events.len();
        let kept: Vec<Reverse<Event>> = self
            .events
            .drain()
            .filter(|Reverse(ev)| ev.event_id != event_id)
            .collect();
        self.events = BinaryHeap::from(kept);

        self.events.len() != before
    }

    /// Pop the next event due at or before `final_time`
    ///
    /// Advances the current timestamp to the event's effective fire time
    /// (`trigger + cycles_late`). With `ignore_overflow` the late count is
    /// forced to zero so cascaded reschedules cannot go negative.
    pub fn pop_due(&mut self, final_time: u64, ignore_overflow: bool) -> Option<FiredEvent> {
        let Reverse(ev) = *self.events.peek()?;

        if ev.trigger_timestamp > final_time {
            return None;
        }

        self.events.pop();

        let cycles_late = if ignore_overflow {
            0
        } else {
            final_time - ev.trigger_timestamp
        };
        self.current_timestamp = ev.trigger_timestamp + cycles_late;

        log::trace!(
            "[SCHEDULER] fire {:?} (registered @{}, trigger @{}, late {})",
            ev.target,
            ev.registered_timestamp,
            ev.trigger_timestamp,
            cycles_late
        );

        Some(FiredEvent {
            target: ev.target,
            cycles_late,
        })
    }

    /// Finish an advance window, moving the clock to `final_time`
    ///
    /// Time never moves backwards even if a callback already pushed the
    /// clock past the window.
    pub fn catch_up(&mut self, final_time: u64) {
        self.current_timestamp = self.current_timestamp.max(final_time);
    }

    /// Number of pending events (diagnostics)
    pub fn pending(&self) -> usize {
        self.events.len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(sched: &mut Scheduler, cycles: u64) -> Vec<FiredEvent> {
        let final_time = sched.now() + cycles;
        let mut fired = Vec::new();
        while let Some(ev) = sched.pop_due(final_time, false) {
            fired.push(ev);
        }
        sched.catch_up(final_time);
        fired
    }

    #[test]
    fn test_events_fire_in_trigger_order() {
        let mut sched = Scheduler::new();
        sched.schedule(30, EventTarget::GpuLineEnd);
        sched.schedule(10, EventTarget::GpuHBlank);
        sched.schedule(20, EventTarget::CdromResponse);

        let fired = drain(&mut sched, 100);
        let targets: Vec<_> = fired.iter().map(|f| f.target).collect();
        assert_eq!(
            targets,
            vec![
                EventTarget::GpuHBlank,
                EventTarget::CdromResponse,
                EventTarget::GpuLineEnd
            ]
        );
        assert_eq!(sched.now(), 100);
    }

    #[test]
    fn test_equal_triggers_fire_in_insertion_order() {
        let mut sched = Scheduler::new();
        sched.schedule(5, EventTarget::TimerTarget(2));
        sched.schedule(5, EventTarget::TimerTarget(0));
        sched.schedule(5, EventTarget::TimerTarget(1));

        let fired = drain(&mut sched, 5);
        let targets: Vec<_> = fired.iter().map(|f| f.target).collect();
        assert_eq!(
            targets,
            vec![
                EventTarget::TimerTarget(2),
                EventTarget::TimerTarget(0),
                EventTarget::TimerTarget(1)
            ]
        );
    }

    #[test]
    fn test_event_not_due_stays_pending() {
        let mut sched = Scheduler::new();
        sched.schedule(50, EventTarget::SpuFifoTransfer);

        assert!(drain(&mut sched, 49).is_empty());
        assert_eq!(sched.pending(), 1);

        let fired = drain(&mut sched, 1);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].cycles_late, 0);
    }

    #[test]
    fn test_cycles_late() {
        let mut sched = Scheduler::new();
        sched.schedule(10, EventTarget::CdromSector);

        let fired = drain(&mut sched, 25);
        assert_eq!(fired[0].cycles_late, 15);
        assert_eq!(sched.now(), 25);
    }

    #[test]
    fn test_ignore_overflow_forces_zero_late() {
        let mut sched = Scheduler::new();
        sched.schedule(10, EventTarget::CdromSector);

        let ev = sched.pop_due(sched.now() + 1000, true).unwrap();
        assert_eq!(ev.cycles_late, 0);
        // Clock sits at the trigger, not the window end, until catch_up
        assert_eq!(sched.now(), 10);
        sched.catch_up(1000);
        assert_eq!(sched.now(), 1000);
    }

    #[test]
    fn test_deschedule_prevents_firing() {
        let mut sched = Scheduler::new();
        let keep = sched.schedule(10, EventTarget::SioTransfer(0));
        let drop = sched.schedule(10, EventTarget::SioTransfer(1));

        assert!(sched.deschedule(drop));
        // Second cancel of the same id is a silent no-op
        assert!(!sched.deschedule(drop));
        assert!(!sched.deschedule(INVALID_EVENT));

        let fired = drain(&mut sched, 100);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].target, EventTarget::SioTransfer(0));
        let _ = keep;
    }

    #[test]
    fn test_ids_monotone() {
        let mut sched = Scheduler::new();
        let a = sched.schedule(1, EventTarget::GpuHBlank);
        let b = sched.schedule(1, EventTarget::GpuHBlank);
        let c = sched.schedule(1, EventTarget::GpuHBlank);
        assert!(a < b && b < c);
    }

    #[test]
    fn test_reentrant_schedule_same_window() {
        // A callback scheduling a zero-delay follow-up must fire within the
        // same advance window
        let mut sched = Scheduler::new();
        sched.schedule(10, EventTarget::CdromResponse);

        let final_time = sched.now() + 20;
        let mut fired = Vec::new();
        while let Some(ev) = sched.pop_due(final_time, false) {
            if fired.is_empty() {
                sched.schedule(0, EventTarget::CdromSector);
            }
            fired.push(ev.target);
        }
        sched.catch_up(final_time);

        assert_eq!(
            fired,
            vec![EventTarget::CdromResponse, EventTarget::CdromSector]
        );
    }

    #[test]
    #[should_panic(expected = "scheduler overflow")]
    fn test_queue_overflow_halts() {
        let mut sched = Scheduler::new();
        for _ in 0..64 {
            assert_ne!(sched.schedule(1, EventTarget::GpuHBlank), INVALID_EVENT);
        }
        // The 65th pending event is a Class-3 invariant violation
        sched.schedule(1, EventTarget::GpuHBlank);
    }
}
