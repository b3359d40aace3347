// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! SIO serial port
//!
//! A write to the transmit register queues one byte. When TX is enabled
//! and DTR is asserted, the port selects slot 1 or 2 (control.port_select)
//! and hands the byte to the connected device driver, which answers with a
//! response byte and an acknowledge flag. About a thousand cycles later
//! the RX-available bit rises and, when the device acknowledged and the
//! DSR interrupt is enabled, the PAD/memory-card interrupt fires.

pub mod controller;
pub mod memcard;
pub mod pad_card;

use crate::core::interrupt::{Interrupt, InterruptController};
use crate::core::scheduler::{EventId, EventTarget, Scheduler, INVALID_EVENT};

/// A byte exchanged with a serial device
#[derive(Debug, Clone, Copy)]
pub struct Exchange {
    pub response: u8,
    /// The device pulsed /ACK, meaning it expects more traffic
    pub ack: bool,
}

/// Anything that can sit on a SIO slot
pub trait SioDevice {
    fn exchange(&mut self, value: u8) -> Exchange;
    /// DTR dropped or the other slot was selected
    fn deselect(&mut self);
    /// Downcast hook so the host can reach a concrete driver (connecting
    /// cards, feeding input)
    fn as_any(&mut self) -> &mut dyn std::any::Any;
}

/// An empty slot: always high-impedance, never acknowledges
pub struct NullDevice;

impl SioDevice for NullDevice {
    fn exchange(&mut self, _value: u8) -> Exchange {
        Exchange {
            response: 0xFF,
            ack: false,
        }
    }

    fn deselect(&mut self) {}

    fn as_any(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

const DATA_ADDRESS: u32 = 0x0;
const STAT_ADDRESS: u32 = 0x4;
const MODE_ADDRESS: u32 = 0x8;
const CTRL_ADDRESS: u32 = 0xA;
const MISC_ADDRESS: u32 = 0xC;
const BAUD_ADDRESS: u32 = 0xE;

/// Completion delay covering one byte on the wire plus the device /ACK
const ACK_INT_DELAY: u64 = 1000;

const RX_FIFO_DEPTH: usize = 8;

/// SIO_STAT with named accessors
#[derive(Debug, Clone, Copy, Default)]
struct SioStat(u32);

impl SioStat {
    fn set(&mut self, bit: u32, level: bool) {
        if level {
            self.0 |= 1 << bit;
        } else {
            self.0 &= !(1 << bit);
        }
    }
    fn get(&self, bit: u32) -> bool {
        (self.0 >> bit) & 1 != 0
    }
}

/// SIO_CTRL with named accessors
#[derive(Debug, Clone, Copy, Default)]
struct SioControl(u16);

impl SioControl {
    fn tx_enable(self) -> bool {
        self.0 & 1 != 0
    }
    fn dtr(self) -> bool {
        (self.0 >> 1) & 1 != 0
    }
    fn rx_enable(self) -> bool {
        (self.0 >> 2) & 1 != 0
    }
    fn clear_rx_enable(&mut self) {
        self.0 &= !(1 << 2);
    }
    fn rx_irq_after(self) -> u32 {
        [1, 2, 4, 8][((self.0 >> 8) & 3) as usize]
    }
    fn rx_int_enable(self) -> bool {
        (self.0 >> 11) & 1 != 0
    }
    fn dsr_int_enable(self) -> bool {
        (self.0 >> 12) & 1 != 0
    }
    /// false = slot 1, true = slot 2
    fn port_select(self) -> bool {
        (self.0 >> 13) & 1 != 0
    }
}

/// One SIO port (SIO0 carries the pad/memory-card bus, SIO1 the link
/// cable)
pub struct SioPort {
    id: u8,

    pending_transfer: bool,
    queued_transfer: bool,
    tx_enable_latch: bool,
    tx_current: u8,
    tx_queued: u8,
    rx_pending: u8,
    has_ack: bool,

    rx_fifo: Vec<u8>,
    stat: SioStat,
    mode: u16,
    control: SioControl,
    baud_rate: u16,
    clocks_per_bit: u64,

    event_id: EventId,

    slot1: Box<dyn SioDevice>,
    slot2: Box<dyn SioDevice>,
}

impl SioPort {
    pub fn new(id: u8) -> Self {
        let mut stat = SioStat(0);
        stat.set(0, true); // TX not full
        stat.set(2, true); // TX idle

        Self {
            id,
            pending_transfer: false,
            queued_transfer: false,
            tx_enable_latch: false,
            tx_current: 0,
            tx_queued: 0,
            rx_pending: 0,
            has_ack: false,
            rx_fifo: Vec::with_capacity(RX_FIFO_DEPTH),
            stat,
            mode: 0,
            control: SioControl(0),
            baud_rate: 0,
            clocks_per_bit: 1,
            event_id: INVALID_EVENT,
            slot1: Box::new(NullDevice),
            slot2: Box::new(NullDevice),
        }
    }

    /// Plug a device driver into slot 1
    pub fn connect_slot1(&mut self, device: Box<dyn SioDevice>) {
        self.slot1 = device;
    }

    /// Plug a device driver into slot 2
    pub fn connect_slot2(&mut self, device: Box<dyn SioDevice>) {
        self.slot2 = device;
    }

    pub fn slot1_mut(&mut self) -> &mut dyn SioDevice {
        self.slot1.as_mut()
    }

    pub fn slot2_mut(&mut self) -> &mut dyn SioDevice {
        self.slot2.as_mut()
    }

    // ------------------------------------------------------------------
    // Register access
    // ------------------------------------------------------------------

    pub fn read8(&mut self, address: u32, scheduler: &Scheduler) -> u8 {
        if (DATA_ADDRESS..DATA_ADDRESS + 4).contains(&address) {
            let offset = (address - DATA_ADDRESS) as usize;
            if self.rx_fifo.len() <= offset {
                return 0;
            }
            let value = self.rx_fifo[offset];
            if offset == 0 {
                self.rx_fifo.remove(0);
                if self.rx_fifo.is_empty() {
                    self.stat.set(1, false);
                }
            }
            return value;
        }

        (self.read16(address & !1, scheduler) >> (8 * (address & 1))) as u8
    }

    pub fn read16(&mut self, address: u32, scheduler: &Scheduler) -> u16 {
        match address & !1 {
            DATA_ADDRESS | 0x2 => {
                let low = self.read8(DATA_ADDRESS, scheduler) as u16;
                let high = self.read8(DATA_ADDRESS, scheduler) as u16;
                low | (high << 8)
            }
            STAT_ADDRESS | 0x6 => self.read_stat(scheduler) as u16,
            MODE_ADDRESS => self.mode,
            CTRL_ADDRESS => self.control.0,
            MISC_ADDRESS => 0,
            BAUD_ADDRESS => self.baud_rate,
            _ => {
                log::error!("[SIO{}] Reading invalid register 0x{:X}", self.id, address);
                0
            }
        }
    }

    pub fn read32(&mut self, address: u32, scheduler: &Scheduler) -> u32 {
        if (STAT_ADDRESS..STAT_ADDRESS + 4).contains(&address) {
            return self.read_stat(scheduler);
        }
        let low = self.read16(address, scheduler) as u32;
        let high = self.read16(address + 2, scheduler) as u32;
        low | (high << 16)
    }

    fn read_stat(&mut self, scheduler: &Scheduler) -> u32 {
        self.stat.set(7, self.has_ack);
        let baud_timer = if self.baud_rate != 0 {
            (scheduler.now() % self.baud_rate as u64) as u32
        } else {
            0
        };
        self.stat.0 | (baud_timer << 11)
    }

    pub fn write8(&mut self, address: u32, value: u8, scheduler: &mut Scheduler) {
        // 8-bit writes behave like 16-bit writes of the widened value
        self.write16(address & !1, (value as u16) << (8 * (address & 1)), scheduler);
    }

    pub fn write16(&mut self, address: u32, value: u16, scheduler: &mut Scheduler) {
        match address & !1 {
            DATA_ADDRESS | 0x2 => self.write_data(value as u8, scheduler),
            STAT_ADDRESS | 0x6 => {}
            MODE_ADDRESS => {
                self.mode = value & 0x1FF;
                self.compute_clocks_per_bit();
            }
            CTRL_ADDRESS => self.write_control(value, scheduler),
            MISC_ADDRESS => {}
            BAUD_ADDRESS => {
                self.baud_rate = value;
                self.compute_clocks_per_bit();
            }
            _ => {
                log::error!("[SIO{}] Writing invalid register 0x{:X}", self.id, address);
            }
        }
    }

    pub fn write32(&mut self, address: u32, value: u32, scheduler: &mut Scheduler) {
        // 32-bit writes crop to the lower half
        self.write16(address, value as u16, scheduler);
    }

    fn write_data(&mut self, value: u8, scheduler: &mut Scheduler) {
        if !self.stat.get(0) {
            return;
        }

        self.tx_enable_latch = self.control.tx_enable();
        self.stat.set(0, false);

        if self.pending_transfer {
            self.queued_transfer = true;
            self.tx_queued = value;
        } else {
            self.pending_transfer = true;
            self.tx_current = value;
        }

        self.handle_pending_transfer(scheduler);
    }

    fn write_control(&mut self, value: u16, scheduler: &mut Scheduler) {
        let old_tx_enable = self.control.tx_enable();
        let old_port = self.control.port_select();
        self.control = SioControl(value);

        if old_port != self.control.port_select() {
            if old_port {
                self.slot2.deselect();
            } else {
                self.slot1.deselect();
            }
            self.rx_fifo.clear();
            self.stat.set(1, false);
        }

        if !self.control.dtr() {
            self.slot1.deselect();
            self.slot2.deselect();
        }

        if !old_tx_enable && self.control.tx_enable() {
            self.handle_pending_transfer(scheduler);
        }

        if (self.control.0 >> 4) & 1 != 0 {
            // ACK: clears the error and interrupt status bits
            self.control.0 &= !(1 << 4);
            self.stat.set(3, false);
            self.stat.set(4, false);
            self.stat.set(5, false);
            self.stat.set(9, false);
        }

        if (self.control.0 >> 6) & 1 != 0 {
            log::info!("[SIO{}] RESET", self.id);
            self.control.0 &= !(1 << 6);
        }
    }

    fn compute_clocks_per_bit(&mut self) {
        let factor = [1u64, 1, 16, 64][(self.mode & 3) as usize];
        let raw = (self.baud_rate as u64 * factor) & !1;
        self.clocks_per_bit = raw.max(if self.id == 0 { 1 } else { factor });

        log::debug!(
            "[SIO{}] BAUD={}, CLOCKS/BIT={}",
            self.id,
            self.baud_rate,
            self.clocks_per_bit
        );
    }

    // ------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------

    fn handle_pending_transfer(&mut self, scheduler: &mut Scheduler) {
        let ready = self.pending_transfer
            && (self.control.tx_enable() || self.tx_enable_latch)
            && self.stat.get(2)
            && self.control.dtr();
        if !ready {
            return;
        }

        self.stat.set(2, false); // TX busy
        self.stat.set(0, true); // TX buffer free again

        let device = if self.control.port_select() {
            self.slot2.as_mut()
        } else {
            self.slot1.as_mut()
        };
        let exchange = device.exchange(self.tx_current);
        self.rx_pending = exchange.response;
        self.has_ack = exchange.ack;

        self.event_id = scheduler.schedule(ACK_INT_DELAY, EventTarget::SioTransfer(self.id));
    }

    /// Scheduler dispatch: the byte exchange finished
    pub fn transfer_complete(
        &mut self,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) {
        self.event_id = INVALID_EVENT;
        self.stat.set(2, true);
        self.pending_transfer = self.queued_transfer;
        self.queued_transfer = false;
        self.tx_current = self.tx_queued;

        let mut request = self.has_ack && self.control.dsr_int_enable();

        // SIO0 latches receive data whenever DTR selects a pad; SIO1 only
        // with RX explicitly enabled
        let receive = if self.id == 0 {
            if self.control.rx_enable() {
                self.control.clear_rx_enable();
            }
            self.control.dtr() || self.control.rx_enable()
        } else {
            self.control.rx_enable()
        };

        if receive {
            if self.rx_fifo.len() == RX_FIFO_DEPTH {
                self.rx_fifo[RX_FIFO_DEPTH - 1] = self.rx_pending;
                if self.id == 1 {
                    self.stat.set(4, true); // overrun
                }
            } else {
                self.rx_fifo.push(self.rx_pending);
                if self.control.rx_int_enable()
                    && self.rx_fifo.len() as u32 == self.control.rx_irq_after()
                {
                    request = true;
                }
                self.stat.set(1, true);
            }
        }

        if request {
            self.stat.set(9, true);
            let irq = if self.id == 0 {
                Interrupt::PAD_CARD
            } else {
                Interrupt::SIO
            };
            interrupts.request(irq);
        }

        self.handle_pending_transfer(scheduler);
    }
}

#[cfg(test)]
mod tests {
    use super::controller::StandardController;
    use super::pad_card::PadCardDriver;
    use super::*;

    struct Fixture {
        port: SioPort,
        sched: Scheduler,
        irq: InterruptController,
    }

    impl Fixture {
        fn with_pad() -> Self {
            let mut driver = PadCardDriver::new();
            driver.connect_controller(Box::new(StandardController::new()));
            let mut port = SioPort::new(0);
            port.connect_slot1(Box::new(driver));
            Self {
                port,
                sched: Scheduler::new(),
                irq: InterruptController::new(),
            }
        }

        /// Exchange one byte end-to-end, returning the received response
        fn exchange(&mut self, value: u8) -> u8 {
            self.port.write8(DATA_ADDRESS, value, &mut self.sched);
            // Drain the completion event
            let final_time = self.sched.now() + ACK_INT_DELAY;
            while let Some(ev) = self.sched.pop_due(final_time, false) {
                if let EventTarget::SioTransfer(0) = ev.target {
                    self.port.transfer_complete(&mut self.sched, &mut self.irq);
                }
            }
            self.sched.catch_up(final_time);
            self.port.read8(DATA_ADDRESS, &self.sched)
        }
    }

    #[test]
    fn test_pad_poll_protocol() {
        let mut fx = Fixture::with_pad();
        // TX enable + DTR + DSR interrupt
        fx.port.write16(CTRL_ADDRESS, 0x1003, &mut fx.sched);

        assert_eq!(fx.exchange(0x01), 0xFF, "pad address byte floats");
        assert_eq!(fx.exchange(0x42), 0x41, "digital pad id low");
        assert_eq!(fx.exchange(0x00), 0x5A, "id high");
        // No buttons pressed: active-low state reads all ones
        assert_eq!(fx.exchange(0x00), 0xFF);
        assert_eq!(fx.exchange(0x00), 0xFF);
    }

    #[test]
    fn test_pressed_button_clears_its_bit() {
        let mut fx = Fixture::with_pad();
        fx.port.write16(CTRL_ADDRESS, 0x1003, &mut fx.sched);

        // Press START (bit 3 of the low byte)
        let driver = fx
            .port
            .slot1_mut()
            .as_any()
            .downcast_mut::<PadCardDriver>()
            .expect("pad/card driver in slot 1");
        driver
            .controller_mut()
            .expect("pad connected")
            .set_button(controller::Button::Start, true);

        fx.exchange(0x01);
        fx.exchange(0x42);
        fx.exchange(0x00);
        assert_eq!(fx.exchange(0x00), 0xF7, "START is active-low bit 3");
    }

    #[test]
    fn test_transfer_needs_dtr() {
        let mut fx = Fixture::with_pad();
        // TX enable only, no DTR: nothing moves
        fx.port.write16(CTRL_ADDRESS, 0x0001, &mut fx.sched);
        fx.port.write8(DATA_ADDRESS, 0x01, &mut fx.sched);
        assert_eq!(fx.sched.pending(), 0);
    }

    #[test]
    fn test_ack_raises_pad_interrupt() {
        let mut fx = Fixture::with_pad();
        fx.port.write16(CTRL_ADDRESS, 0x1003, &mut fx.sched);

        fx.exchange(0x01);
        assert_ne!(
            fx.irq.read_status() & Interrupt::PAD_CARD.bits(),
            0,
            "device /ACK with DSR interrupts enabled"
        );
    }

    #[test]
    fn test_null_device_never_acks() {
        let mut port = SioPort::new(0);
        let mut sched = Scheduler::new();
        let mut irq = InterruptController::new();
        port.write16(CTRL_ADDRESS, 0x1003, &mut sched);
        port.write8(DATA_ADDRESS, 0x01, &mut sched);

        let final_time = sched.now() + ACK_INT_DELAY;
        while sched.pop_due(final_time, false).is_some() {
            port.transfer_complete(&mut sched, &mut irq);
        }
        assert_eq!(irq.read_status() & Interrupt::PAD_CARD.bits(), 0);
    }

    #[test]
    fn test_control_ack_bit_clears_status() {
        let mut fx = Fixture::with_pad();
        fx.port.write16(CTRL_ADDRESS, 0x1003, &mut fx.sched);
        fx.exchange(0x01);
        assert!(fx.port.stat.get(9), "interrupt status latched");

        fx.port.write16(CTRL_ADDRESS, 0x1003 | (1 << 4), &mut fx.sched);
        assert!(!fx.port.stat.get(9));
        assert_eq!(fx.port.control.0 & (1 << 4), 0, "ACK bit self-clears");
    }
}
