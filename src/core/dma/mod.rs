// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! DMA controller
//!
//! Seven channels (0 MDEC-in, 1 MDEC-out, 2 GPU, 3 CDROM, 4 SPU, 5 PIO,
//! 6 OTC) with per-channel MADR/BCR/CHCR, the DPCR priority/enable packing
//! and the DICR interrupt ladder. Transfers drain one word (or one
//! linked-list header) per emulation step while active; linked lists can
//! pause on a fallen DREQ and resume on its rising edge.
//!
//! The per-step engine receives the RAM window and the target devices as
//! parameters; the controller holds no device references of its own.

use crate::core::cdrom::CdromDrive;
use crate::core::gpu::Gpu;
use crate::core::mdec::Mdec;
use crate::core::memory::RamView;
use crate::core::spu::Spu;

/// Channel ids
pub mod channel {
    pub const MDEC_IN: usize = 0;
    pub const MDEC_OUT: usize = 1;
    pub const GPU: usize = 2;
    pub const CDROM: usize = 3;
    pub const SPU: usize = 4;
    pub const PIO: usize = 5;
    pub const OTC: usize = 6;
}

/// Linked-list end marker bit in a header's next pointer
const END_MARKER: u32 = 0x80_0000;

/// Channel control register (CHCR)
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelControl(pub u32);

impl ChannelControl {
    /// false = device to RAM, true = RAM to device
    pub fn from_ram(self) -> bool {
        self.0 & 1 != 0
    }
    /// Address step: false = +4, true = -4
    pub fn decrement(self) -> bool {
        (self.0 >> 1) & 1 != 0
    }
    pub fn chopping(self) -> bool {
        (self.0 >> 8) & 1 != 0
    }
    /// 0 burst, 1 slice, 2 linked list, 3 reserved
    pub fn sync_mode(self) -> u32 {
        (self.0 >> 9) & 3
    }
    pub fn start_busy(self) -> bool {
        (self.0 >> 24) & 1 != 0
    }
    pub fn force_start(self) -> bool {
        (self.0 >> 28) & 1 != 0
    }

    fn clear_start_busy(&mut self) {
        self.0 &= !(1 << 24);
    }

    fn clear_force_start(&mut self) {
        self.0 &= !(1 << 28);
    }
}

const SYNC_BURST: u32 = 0;
const SYNC_SLICE: u32 = 1;
const SYNC_LINKED: u32 = 2;

bitflags::bitflags! {
    /// One bit per channel, as packed into the DICR block/enable/flag
    /// fields
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelSet: u32 {
        const MDEC_IN = 1 << 0;
        const MDEC_OUT = 1 << 1;
        const GPU = 1 << 2;
        const CDROM = 1 << 3;
        const SPU = 1 << 4;
        const PIO = 1 << 5;
        const OTC = 1 << 6;
    }
}

impl ChannelSet {
    /// The set containing only channel `id`
    fn of(id: usize) -> Self {
        Self::from_bits_truncate(1 << id)
    }
}

/// One DMA channel: registers plus live transfer state
#[derive(Debug, Clone, Copy, Default)]
struct DmaChannel {
    base_address: u32,
    block_control: u32,
    control: ChannelControl,

    curr_address: u32,
    words_remaining: u32,
    blocks_remaining: u32,
    next_block_address: u32,
    /// Start/busy latched until the final block completes
    transfer_active: bool,
    /// Currently in the arbitration list
    running: bool,
    dreq: bool,
}

/// The DMA controller register bank and arbitration state
pub struct DmaController {
    channels: [DmaChannel; 7],
    /// DPCR: 3-bit priority + enable per channel
    control: u32,
    /// DICR bits 0..=6: IRQ at every block end for that channel
    irq_on_block: ChannelSet,
    /// DICR bit 15
    bus_error: bool,
    /// DICR bits 16..=22
    irq_enable: ChannelSet,
    /// DICR bit 23
    master_enable: bool,
    /// DICR bits 24..=30
    irq_flags: ChannelSet,
    /// DICR bit 31 (computed)
    master_flag: bool,

    /// Channel ids with words left to move, highest priority first
    active: Vec<usize>,
}

const DPCR_INIT: u32 = 0x0765_4321;

/// DPCR and DICR offsets relative to the DMA register window (0x1F801080)
const DPCR_OFFSET: u32 = 0x70;
const DICR_OFFSET: u32 = 0x74;

impl DmaController {
    pub fn new() -> Self {
        let mut channels = [DmaChannel::default(); 7];
        // Channels without a request line are always ready
        for id in [channel::MDEC_IN, channel::MDEC_OUT, channel::PIO, channel::OTC] {
            channels[id].dreq = true;
        }

        Self {
            channels,
            control: DPCR_INIT,
            irq_on_block: ChannelSet::empty(),
            bus_error: false,
            irq_enable: ChannelSet::empty(),
            master_enable: false,
            irq_flags: ChannelSet::empty(),
            master_flag: false,
            active: Vec::with_capacity(7),
        }
    }

    // ------------------------------------------------------------------
    // Register file
    // ------------------------------------------------------------------

    /// Read a DMA register (offset relative to 0x1F801080)
    pub fn read(&mut self, offset: u32) -> u32 {
        if offset == DPCR_OFFSET {
            return self.control;
        }
        if offset == DICR_OFFSET {
            self.update_master_flag();
            return self.dicr();
        }

        let id = (offset >> 4) as usize;
        if id < 7 {
            let chan = &self.channels[id];
            return match offset & 0xF {
                0x0 => chan.base_address,
                0x4 => chan.block_control,
                0x8 => chan.control.0,
                _ => {
                    log::error!("[DMA{}] Reading invalid register 0x{:02X}", id, offset);
                    0
                }
            };
        }

        log::error!("[DMA] Reading invalid register 0x{:02X}", offset);
        0
    }

    /// Write a DMA register. `mask` selects the affected byte lanes of
    /// sub-word writes. `ram` is needed because starting a linked-list
    /// transfer reads its first header.
    pub fn write(&mut self, offset: u32, value: u32, mask: u32, ram: RamView) {
        if offset == DPCR_OFFSET {
            self.control = value;
            log::debug!("[DMA] DPCR = 0x{:08X}", value);
            return;
        }

        if offset == DICR_OFFSET {
            let ack = ChannelSet::from_bits_truncate(value >> 24);
            self.irq_flags.remove(ack);

            self.irq_on_block = ChannelSet::from_bits_truncate(value);
            self.bus_error = (value >> 15) & 1 != 0;
            self.irq_enable = ChannelSet::from_bits_truncate(value >> 16);
            self.master_enable = (value >> 23) & 1 != 0;

            self.update_master_flag();
            log::debug!("[DMA] DICR = 0x{:08X}", self.dicr());
            return;
        }

        let id = (offset >> 4) as usize;
        if id >= 7 {
            log::error!("[DMA] Writing invalid register 0x{:02X}", offset);
            return;
        }

        match offset & 0xF {
            0x0 => self.channels[id].base_address = value & 0xFF_FFFF,
            0x4 => {
                let chan = &mut self.channels[id];
                chan.block_control = (chan.block_control & !mask) | (value & mask);
            }
            0x8 => {
                let old = self.channels[id].control;
                self.channels[id].control = ChannelControl(value);
                let new = self.channels[id].control;

                let start_edge = !old.start_busy() && new.start_busy();
                let force_edge = !old.force_start() && new.force_start();

                let ready = self.channels[id].dreq;
                if force_edge
                    || (start_edge && new.sync_mode() == SYNC_BURST)
                    || (start_edge && ready)
                {
                    self.transfer_start(id, false, ram);
                }
            }
            _ => log::error!("[DMA{}] Writing invalid register 0x{:02X}", id, offset),
        }
    }

    fn dicr(&self) -> u32 {
        self.irq_on_block.bits()
            | (u32::from(self.bus_error) << 15)
            | (self.irq_enable.bits() << 16)
            | (u32::from(self.master_enable) << 23)
            | (self.irq_flags.bits() << 24)
            | (u32::from(self.master_flag) << 31)
    }

    fn update_master_flag(&mut self) {
        self.master_flag =
            self.bus_error || (self.master_enable && self.irq_enable.intersects(self.irq_flags));
    }

    /// Latch a channel's completion IRQ. Returns true when the master flag
    /// rises and the CPU interrupt line must be pulled.
    fn interrupt_request(&mut self, id: usize, last_block: bool) -> bool {
        if !last_block && !self.irq_on_block.contains(ChannelSet::of(id)) {
            return false;
        }

        self.update_master_flag();

        if self.irq_enable.contains(ChannelSet::of(id)) {
            self.irq_flags.insert(ChannelSet::of(id));
            if !self.master_flag {
                self.master_flag = true;
                return true;
            }
        }
        false
    }

    // ------------------------------------------------------------------
    // Arbitration
    // ------------------------------------------------------------------

    fn channel_enabled(&self, id: usize) -> bool {
        (self.control >> (id * 4 + 3)) & 1 != 0
    }

    fn add_active(&mut self, id: usize) {
        if self.active.contains(&id) {
            return;
        }
        self.active.push(id);
        let control = self.control;
        self.active
            .sort_by_key(|&id| (((control >> (id * 4)) & 0x7), id));
        self.channels[id].running = true;
    }

    fn remove_active(&mut self, id: usize) {
        self.active.retain(|&other| other != id);
        self.channels[id].running = false;
    }

    /// Whether a burn-down is in progress (the outer loop advances us
    /// instead of the CPU)
    pub fn has_active_transfer(&self) -> bool {
        !self.active.is_empty()
    }

    /// Level-set a channel's device request line; a rising edge resumes a
    /// paused transfer
    pub fn set_dreq(&mut self, id: usize, level: bool) {
        let rising = !self.channels[id].dreq && level;
        self.channels[id].dreq = level;

        if rising && self.channels[id].transfer_active && !self.channels[id].running {
            self.add_active(id);
        }
    }

    // ------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------

    fn transfer_start(&mut self, id: usize, resume: bool, ram: RamView) {
        if !self.channel_enabled(id) {
            return;
        }

        if self.channels[id].control.chopping() {
            log::warn!("[DMA{}] Chopping mode requested; treated as plain sync", id);
        }

        let chan = &mut self.channels[id];
        chan.transfer_active = true;
        chan.curr_address = chan.base_address;

        let mut block_control = chan.block_control;
        if block_control & 0xFFFF == 0 && chan.control.sync_mode() == SYNC_BURST {
            block_control = 0x1_0000;
        }

        match chan.control.sync_mode() {
            SYNC_BURST => {
                chan.words_remaining = block_control & 0x1_FFFF;
            }
            SYNC_SLICE => {
                chan.words_remaining = block_control & 0xFFFF;
                if !resume {
                    chan.blocks_remaining = block_control >> 16;
                }
            }
            SYNC_LINKED => {
                if !resume {
                    let header = ram.read32(chan.curr_address);
                    chan.words_remaining = header >> 24;
                    chan.next_block_address = header & 0xFF_FFFC;
                    chan.curr_address = chan.curr_address.wrapping_add(4);
                } else {
                    let header = ram.read32(chan.next_block_address);
                    chan.curr_address = chan.next_block_address.wrapping_add(4);
                    chan.words_remaining = header >> 24;
                    chan.next_block_address = header & 0xFF_FFFC;
                }
            }
            _ => {
                log::error!("[DMA{}] Reserved sync mode", id);
                return;
            }
        }

        chan.control.clear_force_start();
        self.add_active(id);
    }

    fn transfer_end(&mut self, id: usize, last_block: bool) -> bool {
        if last_block {
            self.channels[id].control.clear_start_busy();
            self.channels[id].transfer_active = false;
        }
        self.remove_active(id);
        self.interrupt_request(id, last_block)
    }

    /// Advance the highest-priority active transfer by one word (or one
    /// linked-list hop). Returns true when a DMA interrupt must be raised.
    pub fn advance(
        &mut self,
        ram: RamView,
        gpu: &mut Gpu,
        cdrom: &mut CdromDrive,
        spu: &mut Spu,
        mdec: &mut Mdec,
    ) -> bool {
        let Some(&id) = self.active.first() else {
            return false;
        };

        match self.channels[id].control.sync_mode() {
            SYNC_LINKED => self.step_linked(id, ram, gpu),
            _ => self.step_word(id, ram, gpu, cdrom, spu, mdec),
        }
    }

    fn step_linked(&mut self, id: usize, ram: RamView, gpu: &mut Gpu) -> bool {
        let chan = self.channels[id];

        if chan.words_remaining == 0 {
            if chan.next_block_address & END_MARKER != 0 {
                return self.transfer_end(id, true);
            }
            if chan.dreq {
                let irq = self.interrupt_request(id, false);
                let chan = &mut self.channels[id];
                let header = ram.read32(chan.next_block_address);
                chan.curr_address = chan.next_block_address.wrapping_add(4);
                chan.words_remaining = header >> 24;
                chan.next_block_address = header & 0xFF_FFFC;
                return irq;
            }
            // DREQ fell: yield back to the CPU until it rises again
            return self.transfer_end(id, false);
        }

        if !chan.control.from_ram() {
            log::error!("[DMA{}] Linked-list transfer towards RAM", id);
            return self.transfer_end(id, true);
        }

        let word = ram.read32(chan.curr_address);
        gpu.dma_write_gp0(word, self);

        let chan = &mut self.channels[id];
        if chan.control.decrement() {
            chan.curr_address = chan.curr_address.wrapping_sub(4);
        } else {
            chan.curr_address = chan.curr_address.wrapping_add(4);
        }
        chan.words_remaining -= 1;
        false
    }

    fn step_word(
        &mut self,
        id: usize,
        ram: RamView,
        gpu: &mut Gpu,
        cdrom: &mut CdromDrive,
        spu: &mut Spu,
        mdec: &mut Mdec,
    ) -> bool {
        let chan = self.channels[id];
        let addr = chan.curr_address & 0xFF_FFFC;

        if id == channel::OTC {
            // Ordering-table clear: write the previous-entry pointer,
            // terminating the lowest entry with the end marker
            let value = if chan.words_remaining == 1 {
                0xFF_FFFF
            } else {
                addr.wrapping_sub(4) & 0xFF_FFFF
            };
            ram.write32(addr, value);
        } else if chan.control.from_ram() {
            let word = ram.read32(addr);
            match id {
                channel::GPU => gpu.dma_write_gp0(word, self),
                channel::SPU => spu.dma_write32(word),
                channel::MDEC_IN => mdec.dma_in(word),
                _ => log::error!("[DMA{}] Unexpected RAM-to-device transfer", id),
            }
        } else {
            let word = match id {
                channel::GPU => gpu.dma_read_gpuread(),
                channel::CDROM => cdrom.dma_read32(),
                channel::SPU => spu.dma_read32(),
                channel::MDEC_OUT => mdec.dma_out(),
                _ => {
                    log::error!("[DMA{}] Unexpected device-to-RAM transfer", id);
                    0
                }
            };
            ram.write32(addr, word);
        }

        let chan = &mut self.channels[id];
        if chan.control.decrement() {
            chan.curr_address = chan.curr_address.wrapping_sub(4);
        } else {
            chan.curr_address = chan.curr_address.wrapping_add(4);
        }
        chan.words_remaining -= 1;

        if chan.words_remaining == 0 {
            match chan.control.sync_mode() {
                SYNC_SLICE => {
                    chan.blocks_remaining = chan.blocks_remaining.saturating_sub(1);
                    chan.base_address = chan.curr_address & 0xFF_FFFF;
                    if chan.blocks_remaining == 0 {
                        return self.transfer_end(id, true);
                    }
                    chan.words_remaining = chan.block_control & 0xFFFF;
                    if !chan.dreq {
                        return self.transfer_end(id, false);
                    }
                    return self.interrupt_request(id, false);
                }
                _ => return self.transfer_end(id, true),
            }
        }

        false
    }
}

impl Default for DmaController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dicr_master_flag_formula() {
        let mut dma = DmaController::new();
        assert_eq!(dma.read(DICR_OFFSET) >> 31, 0);

        // Enable channel 6 IRQs with the master enable set
        let ram_less = |dma: &mut DmaController| {
            dma.irq_enable = ChannelSet::OTC;
            dma.master_enable = true;
            dma.irq_flags = ChannelSet::OTC;
            dma.update_master_flag();
        };
        ram_less(&mut dma);
        assert_eq!(dma.read(DICR_OFFSET) >> 31, 1);

        // Bus error forces the master flag regardless
        dma.irq_flags = ChannelSet::empty();
        dma.bus_error = true;
        assert_eq!(dma.read(DICR_OFFSET) >> 31, 1);
    }

    #[test]
    fn test_dicr_ack_clears_flags() {
        let mut dma = DmaController::new();
        dma.irq_flags = ChannelSet::all();
        // Writing 1 bits into 24..=30 acknowledges those flags
        let write = (1u32 << 24) | (1 << 26);
        // Use a dummy RAM view; DICR writes never touch it
        let mut backing = [0u32; 16];
        let ram = test_ram(&mut backing);
        dma.write(DICR_OFFSET, write, 0xFFFF_FFFF, ram);
        assert_eq!(
            dma.irq_flags,
            ChannelSet::all().difference(ChannelSet::MDEC_IN | ChannelSet::GPU)
        );
    }

    fn test_ram(words: &mut [u32; 16]) -> RamView {
        RamView::from_raw_parts(words.as_mut_ptr() as *mut u8, 64)
    }

    #[test]
    fn test_priority_orders_active_channels() {
        let mut dma = DmaController::new();
        // DPCR: all enabled, GPU priority 1, OTC priority 3
        dma.control = 0xFFFF_FFFF;
        dma.control = (dma.control & !(0x7 << (2 * 4))) | (1 << (2 * 4));
        dma.add_active(channel::OTC);
        dma.add_active(channel::GPU);
        assert_eq!(dma.active[0], channel::GPU);
    }

    #[test]
    fn test_otc_burst_clears_ordering_table() {
        let mut backing = [0u32; 16];
        let ram = test_ram(&mut backing);
        let mut dma = DmaController::new();

        // Enable channel 6, then MADR = 0x3C (last word of our 16-word
        // window), BCR = 16 words, CHCR = start | decrement
        dma.write(0x70, 0x0F65_4321, 0xFFFF_FFFF, ram);
        dma.write(0x60, 0x3C, 0xFFFF_FFFF, ram);
        dma.write(0x64, 16, 0xFFFF_FFFF, ram);
        dma.write(0x68, (1 << 24) | (1 << 1), 0xFFFF_FFFF, ram);
        assert!(dma.has_active_transfer());

        let mut gpu = Gpu::new();
        let mut cdrom = CdromDrive::new();
        let mut spu = Spu::new();
        let mut mdec = Mdec::new();
        for _ in 0..16 {
            dma.advance(ram, &mut gpu, &mut cdrom, &mut spu, &mut mdec);
        }
        assert!(!dma.has_active_transfer());

        // Every entry points at the previous one; the lowest entry holds
        // the end marker
        for i in 1..16 {
            assert_eq!(backing[i], ((i as u32) - 1) * 4);
        }
        assert_eq!(backing[0], 0xFF_FFFF);

        // Channel goes idle with start/busy cleared
        assert_eq!((dma.read(0x68) >> 24) & 1, 0);
    }

    #[test]
    fn test_burst_zero_count_means_0x10000() {
        let mut backing = [0u32; 16];
        let ram = test_ram(&mut backing);
        let mut dma = DmaController::new();

        dma.write(0x70, 0x0F65_4321, 0xFFFF_FFFF, ram);
        dma.write(0x60, 0x0, 0xFFFF_FFFF, ram);
        dma.write(0x64, 0, 0xFFFF_FFFF, ram);
        dma.write(0x68, 1 << 24, 0xFFFF_FFFF, ram);
        assert_eq!(dma.channels[channel::OTC].words_remaining, 0x1_0000);
    }

    #[test]
    fn test_disabled_channel_does_not_start() {
        let mut backing = [0u32; 16];
        let ram = test_ram(&mut backing);
        let mut dma = DmaController::new();

        dma.control = 0; // everything disabled
        dma.write(0x68, 1 << 24, 0xFFFF_FFFF, ram);
        assert!(!dma.has_active_transfer());
    }
}
