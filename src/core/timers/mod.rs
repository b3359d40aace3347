// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Root counters (timers)
//!
//! Three 16-bit counters with value/mode/target triplets. Counter values
//! are never stepped: each timer keeps `cycles_per_inc` so the value can
//! be computed analytically from the elapsed cycle count, and scheduler
//! events are re-derived whenever mode/value/target (or a blanking edge)
//! changes.
//!
//! Clock sources: timer 0 counts the system clock or the dotclock, timer 1
//! the system clock or HBlanks, timer 2 the system clock or the system
//! clock divided by 8. Sync modes: timer 0 reacts to HBlank, timer 1 to
//! VBlank, timer 2 stops outright in modes 0 and 3.

use crate::core::gpu::{CLOCKS_SCANLINE, DOT_CYCLES};
use crate::core::interrupt::{Interrupt, InterruptController};
use crate::core::scheduler::{EventId, EventTarget, Scheduler, INVALID_EVENT};

const VALUE_ADDRESS: u32 = 0x0;
const MODE_ADDRESS: u32 = 0x4;
const TARGET_ADDRESS: u32 = 0x8;

/// Mode register with named accessors over the backing halfword
#[derive(Debug, Clone, Copy, Default)]
struct TimerMode(u16);

impl TimerMode {
    fn sync_enable(self) -> bool {
        self.0 & 1 != 0
    }
    fn sync_mode(self) -> u16 {
        (self.0 >> 1) & 3
    }
    fn reset_on_target(self) -> bool {
        (self.0 >> 3) & 1 != 0
    }
    fn irq_on_target(self) -> bool {
        (self.0 >> 4) & 1 != 0
    }
    fn irq_on_overflow(self) -> bool {
        (self.0 >> 5) & 1 != 0
    }
    fn irq_repeat(self) -> bool {
        (self.0 >> 6) & 1 != 0
    }
    fn irq_toggle(self) -> bool {
        (self.0 >> 7) & 1 != 0
    }
    fn clock_source(self) -> u16 {
        (self.0 >> 8) & 3
    }
    /// Bit 10, inverted sense: 0 = interrupt asserted
    fn irq_line(self) -> bool {
        (self.0 >> 10) & 1 != 0
    }
    fn set_irq_line(&mut self, level: bool) {
        if level {
            self.0 |= 1 << 10;
        } else {
            self.0 &= !(1 << 10);
        }
    }
    fn set_target_reached(&mut self, hit: bool) {
        if hit {
            self.0 |= 1 << 11;
        } else {
            self.0 &= !(1 << 11);
        }
    }
    fn set_overflow_reached(&mut self, hit: bool) {
        if hit {
            self.0 |= 1 << 12;
        } else {
            self.0 &= !(1 << 12);
        }
    }
    fn clear_sync_enable(&mut self) {
        self.0 &= !1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IrqSource {
    Overflow,
    Target,
}

/// One root counter
struct RootCounter {
    id: u8,
    value: u16,
    target: u16,
    mode: TimerMode,
    /// With repeat off, only the first IRQ fires until the mode is
    /// rewritten
    oneshot_fired: bool,
    partial: u32,
    dotclock_sel: u16,
    cycles_per_inc: u32,
    event_id: EventId,
    last_update: u64,
    stopped: bool,
    in_hblank: bool,
    in_vblank: bool,
}

impl RootCounter {
    fn new(id: u8) -> Self {
        Self {
            id,
            value: 0,
            target: 0,
            mode: TimerMode(0),
            oneshot_fired: false,
            partial: 0,
            dotclock_sel: 0,
            cycles_per_inc: 1,
            event_id: INVALID_EVENT,
            last_update: 0,
            stopped: false,
            in_hblank: false,
            in_vblank: false,
        }
    }

    fn compute_cycles_per_inc(&self) -> u32 {
        let alternate = self.mode.clock_source() & 1 != 0;
        match (self.id, alternate) {
            (_, false) => 1,
            (0, true) => DOT_CYCLES[self.dotclock_sel as usize] as u32,
            (1, true) => CLOCKS_SCANLINE as u32,
            _ => 8,
        }
    }

    /// Catch the analytic value up to the current timestamp
    fn update_counter(&mut self, now: u64) {
        let elapsed = now.saturating_sub(self.last_update);
        self.last_update = now;

        if self.stopped {
            return;
        }

        let total = self.partial as u64 + elapsed;
        let increments = total / self.cycles_per_inc as u64;
        self.partial = (total % self.cycles_per_inc as u64) as u32;
        self.value = self.value.wrapping_add(increments as u16);

        // Keep reads from ever exceeding the target in reset-on-target
        // mode
        if self.mode.reset_on_target() {
            self.value = self.value.min(self.target);
        }
    }

    fn cycles_till_overflow(&self) -> u64 {
        (0x10000 - self.value as u64) * self.cycles_per_inc as u64
    }

    /// `None` when the target already passed
    fn cycles_till_target(&self) -> Option<u64> {
        if self.target < self.value {
            return None;
        }
        Some((self.target - self.value) as u64 * self.cycles_per_inc as u64)
    }

    /// Sync-mode gating: whether this counter is held right now
    fn sync_stops_counting(&self) -> bool {
        if !self.mode.sync_enable() {
            return false;
        }
        match self.id {
            0 => {
                (self.in_hblank && self.mode.sync_mode() == 0)
                    || (!self.in_hblank && self.mode.sync_mode() == 2)
            }
            1 => {
                (self.in_vblank && self.mode.sync_mode() == 0)
                    || (!self.in_vblank && self.mode.sync_mode() == 2)
            }
            _ => self.mode.sync_mode() == 0 || self.mode.sync_mode() == 3,
        }
    }

    /// Deschedule and re-derive the pending event
    fn update_events(&mut self, scheduler: &mut Scheduler) {
        scheduler.deschedule(self.event_id);
        self.event_id = INVALID_EVENT;

        if self.sync_stops_counting() {
            self.stopped = true;
            return;
        }
        self.stopped = false;

        let till_overflow = self.cycles_till_overflow();

        if self.target == self.value || self.target == 0 {
            self.mode.set_target_reached(true);
            self.event_id =
                scheduler.schedule(till_overflow, EventTarget::TimerOverflow(self.id));
            return;
        }

        match self.cycles_till_target() {
            Some(till_target) if till_overflow > till_target => {
                self.event_id =
                    scheduler.schedule(till_target, EventTarget::TimerTarget(self.id));
            }
            _ => {
                self.event_id =
                    scheduler.schedule(till_overflow, EventTarget::TimerOverflow(self.id));
            }
        }
    }

    /// Latch the reached bit and maybe assert the interrupt line
    fn fire_irq(&mut self, source: IrqSource, interrupts: &mut InterruptController) {
        if self.stopped {
            log::warn!("[COUNTER{}] IRQ trigger on a stopped counter", self.id);
            return;
        }

        match source {
            IrqSource::Target => {
                self.mode.set_target_reached(true);
                if !self.mode.irq_on_target() {
                    return;
                }
            }
            IrqSource::Overflow => {
                self.mode.set_overflow_reached(true);
                if !self.mode.irq_on_overflow() {
                    return;
                }
            }
        }

        if !self.mode.irq_repeat() {
            if self.oneshot_fired {
                return;
            }
            self.oneshot_fired = true;
        }

        if self.mode.irq_toggle() {
            self.mode.set_irq_line(!self.mode.irq_line());
        } else {
            self.mode.set_irq_line(false);
        }

        // The CPU line asserts on the 1 -> 0 transition only
        if !self.mode.irq_line() {
            let irq = match self.id {
                0 => Interrupt::TIMER0,
                1 => Interrupt::TIMER1,
                _ => Interrupt::TIMER2,
            };
            interrupts.request(irq);
        }
    }
}

/// The three root counters
pub struct RootCounters {
    counters: [RootCounter; 3],
}

impl RootCounters {
    pub fn new() -> Self {
        Self {
            counters: [RootCounter::new(0), RootCounter::new(1), RootCounter::new(2)],
        }
    }

    /// Read a counter register (offset 0/4/8 relative to the counter base)
    pub fn read(&mut self, id: usize, offset: u32, scheduler: &mut Scheduler) -> u32 {
        let counter = &mut self.counters[id];
        match offset & !3 {
            VALUE_ADDRESS => {
                counter.update_counter(scheduler.now());
                counter.value as u32
            }
            MODE_ADDRESS => {
                let mode = counter.mode.0 as u32;
                // Reached latches clear on read
                counter.mode.set_target_reached(false);
                counter.mode.set_overflow_reached(false);
                mode
            }
            TARGET_ADDRESS => counter.target as u32,
            _ => {
                log::error!("[COUNTER{}] Reading invalid register 0x{:X}", id, offset);
                0
            }
        }
    }

    /// Write a counter register. 8/16-bit writes behave like 32-bit ones.
    pub fn write(
        &mut self,
        id: usize,
        offset: u32,
        value: u32,
        scheduler: &mut Scheduler,
        _interrupts: &mut InterruptController,
    ) {
        let counter = &mut self.counters[id];
        counter.update_counter(scheduler.now());

        match offset & !3 {
            VALUE_ADDRESS => {
                // Writing above the target triggers nothing by itself
                counter.value = value as u16;
            }
            MODE_ADDRESS => {
                let keep = counter.mode.0 & (0b11 << 11);
                counter.mode = TimerMode((value as u16 & !(0b11 << 11)) | keep);
                // Mode writes reset the count and re-arm the one-shot
                counter.value = 0;
                counter.partial = 0;
                counter.oneshot_fired = false;
                counter.mode.set_irq_line(true);
                counter.cycles_per_inc = counter.compute_cycles_per_inc();
            }
            TARGET_ADDRESS => {
                counter.target = value as u16;
            }
            _ => {
                log::error!("[COUNTER{}] Writing invalid register 0x{:X}", id, offset);
                return;
            }
        }

        counter.update_events(scheduler);
    }

    /// The GPU changed horizontal resolution: counter 0's dotclock period
    /// moves
    pub fn set_dotclock(&mut self, sel: u16, scheduler: &mut Scheduler) {
        let counter = &mut self.counters[0];
        counter.dotclock_sel = sel;

        if counter.mode.clock_source() & 1 == 0 {
            return;
        }

        counter.update_counter(scheduler.now());
        counter.cycles_per_inc = DOT_CYCLES[sel as usize] as u32;
        counter.partial = 0;
        counter.update_events(scheduler);
    }

    /// Horizontal blanking entered (counter 0 sync)
    pub fn hblank(&mut self, scheduler: &mut Scheduler) {
        self.blank_edge(0, true, scheduler);
    }

    /// Horizontal blanking left
    pub fn hblank_end(&mut self, scheduler: &mut Scheduler) {
        self.blank_edge(0, false, scheduler);
    }

    /// Vertical blanking entered (counter 1 sync)
    pub fn vblank(&mut self, scheduler: &mut Scheduler) {
        self.blank_edge(1, true, scheduler);
    }

    /// Vertical blanking left
    pub fn vblank_end(&mut self, scheduler: &mut Scheduler) {
        self.blank_edge(1, false, scheduler);
    }

    fn blank_edge(&mut self, id: usize, entering: bool, scheduler: &mut Scheduler) {
        let counter = &mut self.counters[id];
        counter.update_counter(scheduler.now());

        if id == 0 {
            counter.in_hblank = entering;
        } else {
            counter.in_vblank = entering;
        }

        if counter.mode.sync_enable() {
            if entering {
                match counter.mode.sync_mode() {
                    0 => counter.stopped = true,
                    1 => counter.value = 0,
                    2 => {
                        counter.stopped = false;
                        counter.value = 0;
                    }
                    _ => {
                        counter.stopped = false;
                        counter.mode.clear_sync_enable();
                    }
                }
            } else {
                match counter.mode.sync_mode() {
                    0 => counter.stopped = false,
                    2 => counter.stopped = true,
                    _ => {}
                }
            }
        }

        counter.update_events(scheduler);
    }

    /// Scheduler dispatch: the counter hit its target value
    pub fn target_event(
        &mut self,
        id: u8,
        cycles_late: u64,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) {
        let counter = &mut self.counters[id as usize];
        counter.fire_irq(IrqSource::Target, interrupts);

        counter.value = if counter.mode.reset_on_target() {
            0
        } else {
            counter.target.wrapping_add(1)
        };
        counter.partial = 0;
        counter.last_update = scheduler.now();

        Self::reschedule_after_event(counter, cycles_late, scheduler);
    }

    /// Scheduler dispatch: the counter wrapped past 0xFFFF
    pub fn overflow_event(
        &mut self,
        id: u8,
        cycles_late: u64,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) {
        let counter = &mut self.counters[id as usize];
        counter.fire_irq(IrqSource::Overflow, interrupts);

        counter.value = 0;
        counter.partial = 0;
        counter.last_update = scheduler.now();

        // The late window may have swallowed a target hit as well
        if (counter.target as u64 * counter.cycles_per_inc as u64) < cycles_late {
            counter.fire_irq(IrqSource::Target, interrupts);
        }

        Self::reschedule_after_event(counter, cycles_late, scheduler);
    }

    fn reschedule_after_event(
        counter: &mut RootCounter,
        cycles_late: u64,
        scheduler: &mut Scheduler,
    ) {
        if counter.stopped {
            counter.event_id = INVALID_EVENT;
            return;
        }

        let till_overflow = counter.cycles_till_overflow().saturating_sub(cycles_late);

        match counter.cycles_till_target() {
            Some(till_target) if counter.target != counter.value && till_overflow > till_target => {
                counter.event_id = scheduler.schedule(
                    till_target.saturating_sub(cycles_late),
                    EventTarget::TimerTarget(counter.id),
                );
            }
            _ => {
                counter.event_id =
                    scheduler.schedule(till_overflow, EventTarget::TimerOverflow(counter.id));
            }
        }
    }
}

impl Default for RootCounters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (RootCounters, Scheduler, InterruptController) {
        (
            RootCounters::new(),
            Scheduler::new(),
            InterruptController::new(),
        )
    }

    fn pump(timers: &mut RootCounters, sched: &mut Scheduler, irq: &mut InterruptController, cycles: u64) {
        let final_time = sched.now() + cycles;
        while let Some(ev) = sched.pop_due(final_time, false) {
            match ev.target {
                EventTarget::TimerTarget(id) => {
                    timers.target_event(id, ev.cycles_late, sched, irq)
                }
                EventTarget::TimerOverflow(id) => {
                    timers.overflow_event(id, ev.cycles_late, sched, irq)
                }
                _ => {}
            }
        }
        sched.catch_up(final_time);
    }

    #[test]
    fn test_value_tracks_system_clock() {
        let (mut timers, mut sched, mut irq) = fixture();
        timers.write(2, MODE_ADDRESS, 0, &mut sched, &mut irq);

        pump(&mut timers, &mut sched, &mut irq, 1234);
        assert_eq!(timers.read(2, VALUE_ADDRESS, &mut sched), 1234);
    }

    #[test]
    fn test_clock_source_divide_by_8() {
        let (mut timers, mut sched, mut irq) = fixture();
        timers.write(2, MODE_ADDRESS, 2 << 8, &mut sched, &mut irq);

        pump(&mut timers, &mut sched, &mut irq, 800);
        assert_eq!(timers.read(2, VALUE_ADDRESS, &mut sched), 100);
    }

    #[test]
    fn test_overflow_raises_timer2_interrupt() {
        let (mut timers, mut sched, mut irq) = fixture();
        // IRQ on overflow, no repeat
        timers.write(2, MODE_ADDRESS, 1 << 5, &mut sched, &mut irq);

        pump(&mut timers, &mut sched, &mut irq, 0x10000);
        assert_ne!(irq.read_status() & Interrupt::TIMER2.bits(), 0);

        // Overflow latch shows in the mode register, then clears on read
        let mode = timers.read(2, MODE_ADDRESS, &mut sched);
        assert_ne!(mode & (1 << 12), 0);
        let mode = timers.read(2, MODE_ADDRESS, &mut sched);
        assert_eq!(mode & (1 << 12), 0);
    }

    #[test]
    fn test_oneshot_fires_only_once() {
        let (mut timers, mut sched, mut irq) = fixture();
        timers.write(2, MODE_ADDRESS, 1 << 5, &mut sched, &mut irq);

        pump(&mut timers, &mut sched, &mut irq, 0x10000);
        irq.write_status(!Interrupt::TIMER2.bits());

        pump(&mut timers, &mut sched, &mut irq, 0x10000);
        assert_eq!(
            irq.read_status() & Interrupt::TIMER2.bits(),
            0,
            "second overflow must not interrupt without a mode rewrite"
        );

        // Rewriting the mode re-arms the one-shot
        timers.write(2, MODE_ADDRESS, 1 << 5, &mut sched, &mut irq);
        pump(&mut timers, &mut sched, &mut irq, 0x10000);
        assert_ne!(irq.read_status() & Interrupt::TIMER2.bits(), 0);
    }

    #[test]
    fn test_target_with_reset_wraps_at_target() {
        let (mut timers, mut sched, mut irq) = fixture();
        timers.write(2, TARGET_ADDRESS, 100, &mut sched, &mut irq);
        // Reset on target + IRQ on target + repeat
        timers.write(2, MODE_ADDRESS, (1 << 3) | (1 << 4) | (1 << 6), &mut sched, &mut irq);

        pump(&mut timers, &mut sched, &mut irq, 100);
        assert_ne!(irq.read_status() & Interrupt::TIMER2.bits(), 0);
        assert_eq!(timers.read(2, VALUE_ADDRESS, &mut sched), 0);

        // Counter keeps cycling with repeat on
        irq.write_status(!Interrupt::TIMER2.bits());
        pump(&mut timers, &mut sched, &mut irq, 100);
        assert_ne!(irq.read_status() & Interrupt::TIMER2.bits(), 0);
    }

    #[test]
    fn test_toggle_mode_asserts_every_other_hit() {
        let (mut timers, mut sched, mut irq) = fixture();
        timers.write(2, TARGET_ADDRESS, 10, &mut sched, &mut irq);
        timers.write(
            2,
            MODE_ADDRESS,
            (1 << 3) | (1 << 4) | (1 << 6) | (1 << 7),
            &mut sched,
            &mut irq,
        );

        // First hit: line toggles 1 -> 0, interrupt
        pump(&mut timers, &mut sched, &mut irq, 10);
        assert_ne!(irq.read_status() & Interrupt::TIMER2.bits(), 0);
        irq.write_status(!Interrupt::TIMER2.bits());

        // Second hit: line toggles 0 -> 1, no interrupt
        pump(&mut timers, &mut sched, &mut irq, 10);
        assert_eq!(irq.read_status() & Interrupt::TIMER2.bits(), 0);

        // Third hit: 1 -> 0 again
        pump(&mut timers, &mut sched, &mut irq, 10);
        assert_ne!(irq.read_status() & Interrupt::TIMER2.bits(), 0);
    }

    #[test]
    fn test_timer2_sync_mode_0_stops() {
        let (mut timers, mut sched, mut irq) = fixture();
        timers.write(2, MODE_ADDRESS, 1, &mut sched, &mut irq); // sync enable, mode 0

        pump(&mut timers, &mut sched, &mut irq, 5000);
        assert_eq!(timers.read(2, VALUE_ADDRESS, &mut sched), 0);
    }

    #[test]
    fn test_timer0_hblank_reset_mode() {
        let (mut timers, mut sched, mut irq) = fixture();
        // Sync enable, mode 1: reset to zero at each HBlank
        timers.write(0, MODE_ADDRESS, 1 | (1 << 1), &mut sched, &mut irq);

        pump(&mut timers, &mut sched, &mut irq, 500);
        assert_eq!(timers.read(0, VALUE_ADDRESS, &mut sched), 500);

        timers.hblank(&mut sched);
        assert_eq!(timers.read(0, VALUE_ADDRESS, &mut sched), 0);
    }

    #[test]
    fn test_mode_write_resets_value() {
        let (mut timers, mut sched, mut irq) = fixture();
        timers.write(2, MODE_ADDRESS, 0, &mut sched, &mut irq);
        pump(&mut timers, &mut sched, &mut irq, 999);
        assert_eq!(timers.read(2, VALUE_ADDRESS, &mut sched), 999);

        timers.write(2, MODE_ADDRESS, 0, &mut sched, &mut irq);
        assert_eq!(timers.read(2, VALUE_ADDRESS, &mut sched), 0);
    }
}
