// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! MDEC (movie decoder) register echo
//!
//! The decoder proper is an external collaborator; the bus only needs the
//! command/status register pair and the DMA word ports to behave. Status
//! reports the FIFOs empty and the unit idle so software never blocks on
//! it.

pub struct Mdec {
    status: u32,
    control: u32,
    last_command: u32,
}

/// Data-out FIFO empty | data-in FIFO (not) full reported idle
const STATUS_IDLE: u32 = 0x8004_0000;

impl Mdec {
    pub fn new() -> Self {
        Self {
            status: STATUS_IDLE,
            control: 0,
            last_command: 0,
        }
    }

    pub fn write_command(&mut self, value: u32) {
        log::debug!("[MDEC] Command 0x{:08X}", value);
        self.last_command = value;
    }

    pub fn write_control(&mut self, value: u32) {
        log::debug!("[MDEC] Control 0x{:08X}", value);
        self.control = value;
        if (value >> 31) & 1 != 0 {
            // Reset aborts the current command and clears the FIFOs
            self.status = STATUS_IDLE;
        }
    }

    pub fn read_data(&mut self) -> u32 {
        log::trace!(
            "[MDEC] Data read after command 0x{:08X}",
            self.last_command
        );
        0
    }

    pub fn read_stat(&self) -> u32 {
        // DMA request bits mirror the enables from the control register
        self.status
            | (((self.control >> 30) & 1) << 28)
            | (((self.control >> 29) & 1) << 27)
    }

    /// Word arriving over DMA channel 0
    pub fn dma_in(&mut self, word: u32) {
        self.last_command = word;
    }

    /// Word leaving over DMA channel 1
    pub fn dma_out(&mut self) -> u32 {
        0
    }
}

impl Default for Mdec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_reports_idle() {
        let mdec = Mdec::new();
        assert_eq!(mdec.read_stat(), STATUS_IDLE);
    }

    #[test]
    fn test_reset_restores_idle() {
        let mut mdec = Mdec::new();
        mdec.write_command(0x3000_0000);
        mdec.write_control(1 << 31);
        assert_eq!(mdec.read_stat(), STATUS_IDLE);
    }
}
