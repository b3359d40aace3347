// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Interrupt controller (I_STAT / I_MASK)
//!
//! Raising an interrupt ORs its bit into I_STAT. Writing 0 to an I_STAT bit
//! acknowledges it; writing 1 has no effect. The CPU's CAUSE bit 10 is a
//! combinational AND of `(I_STAT & I_MASK) != 0`.
//!
//! ## Interrupt Sources (Bit Positions)
//!
//! ```text
//! Bit | Source
//! ----|---------
//! 0   | VBLANK
//! 1   | GPU
//! 2   | CDROM
//! 3   | DMA
//! 4   | TIMER0
//! 5   | TIMER1
//! 6   | TIMER2
//! 7   | PAD/CARD
//! 8   | SIO
//! 9   | SPU
//! 10  | PIO
//! ```

bitflags::bitflags! {
    /// Interrupt sources as laid out in I_STAT / I_MASK
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Interrupt: u32 {
        const VBLANK = 1 << 0;
        const GPU = 1 << 1;
        const CDROM = 1 << 2;
        const DMA = 1 << 3;
        const TIMER0 = 1 << 4;
        const TIMER1 = 1 << 5;
        const TIMER2 = 1 << 6;
        const PAD_CARD = 1 << 7;
        const SIO = 1 << 8;
        const SPU = 1 << 9;
        const PIO = 1 << 10;
    }
}

/// PlayStation interrupt controller
///
/// # Example
///
/// ```
/// use psxcore::core::interrupt::{Interrupt, InterruptController};
///
/// let mut ic = InterruptController::new();
/// ic.request(Interrupt::VBLANK);
/// ic.write_mask(Interrupt::VBLANK.bits());
/// assert!(ic.is_pending());
///
/// // Acknowledge: write 0 to the bit to clear
/// ic.write_status(!Interrupt::VBLANK.bits());
/// assert!(!ic.is_pending());
/// ```
pub struct InterruptController {
    /// I_STAT (0x1F801070)
    status: Interrupt,
    /// I_MASK (0x1F801074)
    mask: Interrupt,
}

impl InterruptController {
    pub fn new() -> Self {
        Self {
            status: Interrupt::empty(),
            mask: Interrupt::empty(),
        }
    }

    /// Raise an interrupt line
    pub fn request(&mut self, source: Interrupt) {
        self.status |= source;
        log::trace!(
            "IRQ requested: {:?}, I_STAT=0x{:04X}",
            source,
            self.status.bits()
        );
    }

    /// Whether any unmasked interrupt is pending (drives CAUSE bit 10)
    #[inline(always)]
    pub fn is_pending(&self) -> bool {
        self.status.intersects(self.mask)
    }

    /// Read I_STAT
    pub fn read_status(&self) -> u32 {
        self.status.bits()
    }

    /// Write I_STAT: writing 0 to a bit acknowledges it, writing 1 is a
    /// no-op for that bit
    pub fn write_status(&mut self, value: u32) {
        self.status &= Interrupt::from_bits_truncate(value);
    }

    /// Read I_MASK
    pub fn read_mask(&self) -> u32 {
        self.mask.bits()
    }

    /// Write I_MASK
    pub fn write_mask(&mut self, value: u32) {
        self.mask = Interrupt::from_bits_truncate(value);
        log::debug!("IRQ mask set: 0x{:04X}", self.mask.bits());
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_sets_status_bit() {
        let mut ic = InterruptController::new();
        ic.request(Interrupt::CDROM);
        ic.request(Interrupt::TIMER2);
        assert_eq!(
            ic.read_status(),
            (Interrupt::CDROM | Interrupt::TIMER2).bits()
        );
    }

    #[test]
    fn test_write_zero_acknowledges() {
        let mut ic = InterruptController::new();
        ic.request(Interrupt::VBLANK);
        ic.request(Interrupt::DMA);

        // Zero only the VBLANK bit
        ic.write_status(!Interrupt::VBLANK.bits());
        assert_eq!(ic.read_status(), Interrupt::DMA.bits());

        // Writing 1 bits changes nothing
        ic.write_status(Interrupt::all().bits());
        assert_eq!(ic.read_status(), Interrupt::DMA.bits());
    }

    #[test]
    fn test_pending_needs_unmasked_source() {
        let mut ic = InterruptController::new();
        ic.request(Interrupt::SPU);
        assert!(!ic.is_pending());

        ic.write_mask(Interrupt::SPU.bits());
        assert!(ic.is_pending());

        ic.write_mask(Interrupt::GPU.bits());
        assert!(!ic.is_pending());
    }

    #[test]
    fn test_mask_limited_to_source_bits() {
        let mut ic = InterruptController::new();
        ic.write_mask(0xFFFF_FFFF);
        assert_eq!(ic.read_mask(), Interrupt::all().bits());
    }
}
