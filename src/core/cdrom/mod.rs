// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! CDROM drive
//!
//! Four byte-wide ports behind an index register, exactly as on hardware:
//! ports 1..3 read/write different sub-registers depending on the current
//! index (0..3). Commands queue parameters, execute when the drive is
//! idle, and produce one or more responses, each carrying up to 16 bytes
//! plus one of the five interrupt codes and a delivery delay in system
//! clocks. Acknowledging an interrupt dequeues the current response and
//! promotes the next with its residual delay.
//!
//! After READN the drive reads one sector per period and posts INT1; the
//! host moves the current sector into the data FIFO with the want-data
//! bit. A sector arriving before the previous is drained queues as
//! pending until the host acknowledges.

pub mod commands;
pub mod disc;

use std::collections::VecDeque;
use std::path::Path;

use disc::{CdLocation, Disc, DATA_SIZE, WHOLE_SECTOR_SIZE};

use crate::core::dma::{channel, DmaController};
use crate::core::error::Result;
use crate::core::interrupt::{Interrupt, InterruptController};
use crate::core::scheduler::{EventId, EventTarget, Scheduler, INVALID_EVENT};

/// Drive interrupt codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CdInterrupt {
    /// Sector data ready
    Int1Data = 1,
    /// Second (completion) response
    Int2Second = 2,
    /// First (acknowledge) response
    Int3First = 3,
    /// End of data
    Int4DataEnd = 4,
    /// Error response
    Int5Error = 5,
}

/// Error bits carried in INT5 responses
pub mod error_code {
    pub const SEEK_FAILED: u8 = 0x04;
    pub const DRIVE_DOOR_OPEN: u8 = 0x08;
    pub const INVALID_SUB_FUNCTION: u8 = 0x10;
    pub const WRONG_NUM_OF_PARAMS: u8 = 0x20;
    pub const INVALID_COMMAND: u8 = 0x40;
    pub const NOT_READY: u8 = 0x80;
}

/// Drive status byte with named accessors
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveStat(pub u8);

impl DriveStat {
    pub fn set_err(&mut self, on: bool) {
        self.set_bit(0, on);
    }
    pub fn set_motor_on(&mut self, on: bool) {
        self.set_bit(1, on);
    }
    pub fn set_seek_err(&mut self, on: bool) {
        self.set_bit(2, on);
    }
    pub fn set_shell_open(&mut self, on: bool) {
        self.set_bit(4, on);
    }
    pub fn set_reading(&mut self, on: bool) {
        self.set_bit(5, on);
    }
    pub fn set_seeking(&mut self, on: bool) {
        self.set_bit(6, on);
    }
    pub fn set_playing(&mut self, on: bool) {
        self.set_bit(7, on);
    }

    fn set_bit(&mut self, bit: u8, on: bool) {
        if on {
            self.0 |= 1 << bit;
        } else {
            self.0 &= !(1 << bit);
        }
    }
}

/// Mode register (SETMODE)
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveMode(pub u8);

impl DriveMode {
    /// Bit 5: stream 0x924-byte sectors instead of 0x800
    pub fn whole_sector(self) -> bool {
        (self.0 >> 5) & 1 != 0
    }
    /// Bit 7: double-speed reads
    pub fn double_speed(self) -> bool {
        (self.0 >> 7) & 1 != 0
    }
}

/// One queued response: payload, interrupt code, delivery delay
#[derive(Debug, Clone)]
struct Response {
    data: Vec<u8>,
    read_pos: usize,
    interrupt: CdInterrupt,
    delay: u64,
    timestamp: u64,
}

const RESPONSE_FIFO_DEPTH: usize = 3;
const PARAM_FIFO_DEPTH: usize = 16;

/// The drive register file and command state machine
pub struct CdromDrive {
    index: u8,
    transmission_busy: bool,

    curr_cmd: u8,
    next_cmd: u8,
    has_next_cmd: bool,
    idle: bool,

    response_fifo: VecDeque<Response>,
    param_fifo: VecDeque<u8>,

    int_enable: u8,
    int_flag: u8,

    pub(super) stat: DriveStat,
    pub(super) mode: DriveMode,
    pub(super) lid_open: bool,
    pub(super) motor_on: bool,
    pub(super) read_paused: bool,

    volume_ll: u8,
    volume_lr: u8,
    volume_rl: u8,
    volume_rr: u8,
    mute_adpcm: bool,
    sound_coding: u8,
    soundmap_enable: bool,

    pub(super) seek_loc: CdLocation,
    pub(super) pending_seek: Option<CdLocation>,

    disc: Option<Disc>,

    response_event: EventId,
    pub(super) read_event: EventId,

    // Sector streaming
    curr_sector: Vec<u8>,
    curr_sector_pos: usize,
    has_data_to_load: bool,
    has_loaded_data: bool,
    pending_sector: Option<Vec<u8>>,
}

impl CdromDrive {
    pub fn new() -> Self {
        let mut stat = DriveStat(0);
        stat.set_motor_on(true);

        Self {
            index: 0,
            transmission_busy: false,
            curr_cmd: 0,
            next_cmd: 0,
            has_next_cmd: false,
            idle: true,
            response_fifo: VecDeque::with_capacity(RESPONSE_FIFO_DEPTH),
            param_fifo: VecDeque::with_capacity(PARAM_FIFO_DEPTH),
            int_enable: 0,
            int_flag: 0,
            stat,
            mode: DriveMode(0),
            lid_open: false,
            motor_on: true,
            read_paused: false,
            volume_ll: 0,
            volume_lr: 0,
            volume_rl: 0,
            volume_rr: 0,
            mute_adpcm: true,
            sound_coding: 0,
            soundmap_enable: false,
            seek_loc: CdLocation::default(),
            pending_seek: None,
            disc: None,
            response_event: INVALID_EVENT,
            read_event: INVALID_EVENT,
            curr_sector: Vec::new(),
            curr_sector_pos: 0,
            has_data_to_load: false,
            has_loaded_data: false,
            pending_sector: None,
        }
    }

    /// Insert a cue/bin disc; closes the lid and spins the motor up
    pub fn insert_disc(&mut self, path: &Path) -> Result<()> {
        let disc = Disc::open(path)?;
        self.disc = Some(disc);
        self.lid_open = false;
        self.motor_on = true;
        self.stat.set_shell_open(false);
        self.stat.set_motor_on(true);
        Ok(())
    }

    pub fn has_disc(&self) -> bool {
        self.disc.is_some()
    }

    /// Filesystem views borrow the disc through here
    pub fn disc_mut(&mut self) -> Option<&mut disc::Disc> {
        self.disc.as_mut()
    }

    /// XA-ADPCM mixer volumes (LL, LR, RL, RR) for the audio back-end
    pub fn adpcm_volumes(&self) -> [u8; 4] {
        [self.volume_ll, self.volume_lr, self.volume_rl, self.volume_rr]
    }

    pub fn adpcm_muted(&self) -> bool {
        self.mute_adpcm
    }

    /// Raw sound-coding byte of the current XA stream
    pub fn sound_coding(&self) -> u8 {
        self.sound_coding
    }

    /// Sound-map playback requested through the request register
    pub fn soundmap_enabled(&self) -> bool {
        self.soundmap_enable
    }

    /// Open the drive lid: errors out pending work
    pub fn open_lid(&mut self, scheduler: &mut Scheduler, interrupts: &mut InterruptController) {
        self.lid_open = true;
        self.motor_on = false;
        self.stat.set_shell_open(true);
        self.stat.set_seek_err(true);
        self.stat.set_motor_on(false);
        self.push_response(
            CdInterrupt::Int5Error,
            &[error_code::DRIVE_DOOR_OPEN],
            0,
            scheduler,
            interrupts,
        );
    }

    pub fn close_lid(&mut self) {
        self.lid_open = false;
        self.motor_on = true;
        self.stat.set_motor_on(true);
    }

    // ------------------------------------------------------------------
    // Port access
    // ------------------------------------------------------------------

    pub fn read8(&mut self, address: u32, _scheduler: &mut Scheduler) -> u8 {
        let value = match address {
            0 => self.index_register(),
            1 => self.pop_response_byte(),
            2 => self.read_data_byte(),
            3 => match self.index & 1 {
                0 => self.int_enable | (0b111 << 5),
                _ => self.int_flag | (0b111 << 5),
            },
            _ => {
                log::error!("[CDROM] Reading invalid register {address}");
                0
            }
        };
        log::trace!("[CDROM] read port {}.{} -> 0x{:02X}", address, self.index, value);
        value
    }

    pub fn read16(&mut self, address: u32, scheduler: &mut Scheduler) -> u16 {
        let low = self.read8(address, scheduler) as u16;
        let high = self.read8(address, scheduler) as u16;
        low | (high << 8)
    }

    pub fn read32(&mut self, address: u32, scheduler: &mut Scheduler) -> u32 {
        let low = self.read16(address, scheduler) as u32;
        let high = self.read16(address, scheduler) as u32;
        low | (high << 16)
    }

    pub fn write8(
        &mut self,
        address: u32,
        value: u8,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
        dma: &mut DmaController,
    ) {
        match address {
            0 => self.index = value & 3,
            1 => self.write_port1(value, scheduler, interrupts),
            2 => self.write_port2(value, scheduler, interrupts),
            3 => self.write_port3(value, scheduler, interrupts, dma),
            _ => log::error!("[CDROM] Writing invalid register {address}"),
        }
    }

    pub fn write16(
        &mut self,
        address: u32,
        value: u16,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
        dma: &mut DmaController,
    ) {
        self.write8(address, value as u8, scheduler, interrupts, dma);
        self.write8(address + 1, (value >> 8) as u8, scheduler, interrupts, dma);
    }

    pub fn write32(
        &mut self,
        address: u32,
        value: u32,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
        dma: &mut DmaController,
    ) {
        self.write16(address, value as u16, scheduler, interrupts, dma);
        self.write16(address + 2, (value >> 16) as u16, scheduler, interrupts, dma);
    }

    /// Port 0: the index plus FIFO status summary
    fn index_register(&mut self) -> u8 {
        let param_empty = self.param_fifo.is_empty();
        let param_not_full = self.param_fifo.len() < PARAM_FIFO_DEPTH;
        let response_not_empty = self
            .response_fifo
            .front()
            .is_some_and(|r| r.read_pos < r.data.len());
        let data_not_empty =
            self.has_loaded_data && self.curr_sector_pos < self.curr_sector.len();

        self.index
            | (u8::from(param_empty) << 3)
            | (u8::from(param_not_full) << 4)
            | (u8::from(response_not_empty) << 5)
            | (u8::from(data_not_empty) << 6)
            | (u8::from(self.transmission_busy) << 7)
    }

    fn write_port1(
        &mut self,
        value: u8,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) {
        match self.index {
            0 => {
                log::debug!("[CDROM] Command 0x{:02X}", value);
                if self.idle {
                    self.curr_cmd = value;
                    self.idle = false;
                    self.execute_command(scheduler, interrupts);
                    self.transmission_busy = false;
                } else {
                    if self.has_next_cmd {
                        log::warn!("[CDROM] Dropping queued command 0x{:02X}", self.next_cmd);
                    }
                    self.next_cmd = value;
                    self.has_next_cmd = true;
                    self.transmission_busy = true;
                }
            }
            1 => log::debug!("[CDROM] Sound-map data write"),
            2 => self.sound_coding = value,
            _ => self.volume_rr = value,
        }
    }

    fn write_port2(
        &mut self,
        value: u8,
        _scheduler: &mut Scheduler,
        _interrupts: &mut InterruptController,
    ) {
        match self.index {
            0 => {
                if self.param_fifo.len() == PARAM_FIFO_DEPTH {
                    log::warn!("[CDROM] Parameter FIFO full");
                    return;
                }
                self.param_fifo.push_back(value);
            }
            1 => self.int_enable = value & 0x1F,
            2 => self.volume_ll = value,
            _ => self.volume_rl = value,
        }
    }

    fn write_port3(
        &mut self,
        value: u8,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
        dma: &mut DmaController,
    ) {
        match self.index {
            0 => {
                self.soundmap_enable = (value >> 5) & 1 != 0;

                if (value >> 7) & 1 != 0 {
                    self.request_data(dma);
                } else {
                    self.has_loaded_data = false;
                    self.curr_sector_pos = 0;
                    dma.set_dreq(channel::CDROM, false);
                }
            }
            1 => {
                if (value >> 6) & 1 != 0 {
                    self.param_fifo.clear();
                }
                let ack = value & 0x7;
                if ack != 0 && self.int_flag & 0x7 != 0 {
                    self.interrupt_acknowledged(scheduler, interrupts);
                }
                self.int_flag &= !ack;
            }
            2 => self.volume_lr = value,
            _ => {
                self.mute_adpcm = value & 1 != 0;
            }
        }
    }

    /// Want-data: move the current sector into the data FIFO
    fn request_data(&mut self, dma: &mut DmaController) {
        // A second request before the buffer drains must not reset the
        // read position
        let fully_read = self.curr_sector_pos == self.curr_sector.len();
        if (!self.has_data_to_load && !fully_read) || self.curr_sector.is_empty() {
            log::warn!("[CDROM] Data request with no sector available");
            return;
        }

        if self.has_data_to_load || fully_read {
            self.has_data_to_load = false;
            self.has_loaded_data = true;
            self.curr_sector_pos = 0;
            dma.set_dreq(channel::CDROM, true);
        }
    }

    /// Data FIFO byte reads (any index)
    fn read_data_byte(&mut self) -> u8 {
        if !self.has_loaded_data {
            // Reads past the end return the padding bytes the hardware
            // exposes
            if self.curr_sector.is_empty() {
                return 0;
            }
            let idx = if self.curr_sector.len() == WHOLE_SECTOR_SIZE {
                0x920
            } else {
                DATA_SIZE - 0x8
            };
            return self.curr_sector.get(idx).copied().unwrap_or(0);
        }

        let value = self.curr_sector[self.curr_sector_pos];
        self.curr_sector_pos += 1;
        if self.curr_sector_pos == self.curr_sector.len() {
            self.curr_sector_pos = 0;
            self.has_loaded_data = false;
        }
        value
    }

    /// Data word leaving over DMA channel 3
    pub fn dma_read32(&mut self) -> u32 {
        let b0 = self.read_data_byte() as u32;
        let b1 = self.read_data_byte() as u32;
        let b2 = self.read_data_byte() as u32;
        let b3 = self.read_data_byte() as u32;
        b0 | (b1 << 8) | (b2 << 16) | (b3 << 24)
    }

    // ------------------------------------------------------------------
    // Response FIFO and interrupt ladder
    // ------------------------------------------------------------------

    pub(super) fn push_response(
        &mut self,
        interrupt: CdInterrupt,
        data: &[u8],
        delay: u64,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) {
        if self.response_fifo.len() == RESPONSE_FIFO_DEPTH {
            log::error!("[CDROM] Response FIFO is full!");
            return;
        }

        self.response_fifo.push_back(Response {
            data: data.to_vec(),
            read_pos: 0,
            interrupt,
            delay,
            timestamp: scheduler.now(),
        });

        if self.response_fifo.len() == 1 {
            if delay == 0 {
                self.raise_drive_interrupt(interrupt, interrupts);
            } else {
                self.response_event = scheduler.schedule(delay, EventTarget::CdromResponse);
            }
        }
    }

    fn raise_drive_interrupt(
        &mut self,
        interrupt: CdInterrupt,
        interrupts: &mut InterruptController,
    ) {
        self.int_flag = (self.int_flag & !0x7) | interrupt as u8;

        if self.int_enable & (interrupt as u8) == 0 {
            // (HINTMSK & HINTSTS) == 0: delivery is silent
            return;
        }
        interrupts.request(Interrupt::CDROM);
    }

    /// Scheduler dispatch: the head response's delay elapsed
    pub fn deliver_interrupt(&mut self, interrupts: &mut InterruptController) {
        self.response_event = INVALID_EVENT;
        if let Some(front) = self.response_fifo.front() {
            let interrupt = front.interrupt;
            self.raise_drive_interrupt(interrupt, interrupts);
        }
    }

    fn interrupt_acknowledged(
        &mut self,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) {
        let Some(front) = self.response_fifo.front() else {
            return;
        };

        if front.timestamp + front.delay > scheduler.now() {
            log::warn!("[CDROM] Acknowledge of an undelivered interrupt");
            return;
        }

        self.response_fifo.pop_front();

        // A pending sector stalls delivery until the previous INT1 clears
        if let Some(sector) = self.pending_sector.take() {
            self.curr_sector = sector;
            self.curr_sector_pos = 0;
            self.has_data_to_load = true;
            let stat = self.stat.0;
            self.push_response(CdInterrupt::Int1Data, &[stat], 0, scheduler, interrupts);
            return;
        }

        if let Some(next) = self.response_fifo.front() {
            let due = next.timestamp + next.delay;
            let now = scheduler.now();
            if next.delay == 0 || due <= now {
                let interrupt = next.interrupt;
                self.raise_drive_interrupt(interrupt, interrupts);
            } else {
                // Promote with the residual delay
                scheduler.deschedule(self.response_event);
                self.response_event = scheduler.schedule(due - now, EventTarget::CdromResponse);
            }
        } else {
            self.idle = true;
            self.handle_pending_command(scheduler, interrupts);
        }
    }

    fn pop_response_byte(&mut self) -> u8 {
        let Some(front) = self.response_fifo.front_mut() else {
            return 0;
        };

        let value = front.data.get(front.read_pos).copied().unwrap_or(0);
        front.read_pos = (front.read_pos + 1).min(16);
        value
    }

    fn handle_pending_command(
        &mut self,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) {
        if self.idle && self.has_next_cmd {
            self.transmission_busy = false;
            self.curr_cmd = self.next_cmd;
            self.has_next_cmd = false;
            self.idle = false;
            self.execute_command(scheduler, interrupts);
        }
    }

    // ------------------------------------------------------------------
    // Sector streaming
    // ------------------------------------------------------------------

    /// Scheduler dispatch: one sector-read period elapsed
    pub fn sector_read_event(
        &mut self,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
        _dma: &mut DmaController,
    ) {
        self.read_event = INVALID_EVENT;
        if self.read_paused {
            return;
        }

        self.stat.set_seeking(false);
        self.stat.set_reading(true);

        let whole = self.mode.whole_sector();
        let loc = self.seek_loc;
        let sector = match self.disc.as_mut() {
            Some(disc) => {
                let read = if whole {
                    disc.read_sector_whole(loc)
                } else {
                    disc.read_sector_data(loc)
                };
                match read {
                    Ok(sector) => sector,
                    Err(err) => {
                        log::error!("[CDROM] Sector read failed: {err}");
                        self.stat.set_err(true);
                        return;
                    }
                }
            }
            None => {
                self.stat.set_err(true);
                return;
            }
        };

        let int1_waiting = self
            .response_fifo
            .iter()
            .any(|r| r.interrupt == CdInterrupt::Int1Data);

        if self.response_fifo.len() == RESPONSE_FIFO_DEPTH
            || self.pending_sector.is_some()
            || int1_waiting
        {
            self.pending_sector = Some(sector);
        } else {
            let stat = self.stat.0;
            self.push_response(CdInterrupt::Int1Data, &[stat], 0, scheduler, interrupts);
            self.curr_sector = sector;
            self.curr_sector_pos = 0;
            self.has_data_to_load = true;
        }

        self.read_event = scheduler.schedule(
            commands::read_period(self.mode),
            EventTarget::CdromSector,
        );
        self.seek_loc.advance();
    }
}

impl Default for CdromDrive {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        pub drive: CdromDrive,
        pub sched: Scheduler,
        pub irq: InterruptController,
        pub dma: DmaController,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                drive: CdromDrive::new(),
                sched: Scheduler::new(),
                irq: InterruptController::new(),
                dma: DmaController::new(),
            }
        }

        fn write(&mut self, port: u32, value: u8) {
            self.drive
                .write8(port, value, &mut self.sched, &mut self.irq, &mut self.dma);
        }

        fn read(&mut self, port: u32) -> u8 {
            self.drive.read8(port, &mut self.sched)
        }

        /// Advance time, dispatching drive events
        fn pump(&mut self, cycles: u64) {
            let final_time = self.sched.now() + cycles;
            while let Some(ev) = self.sched.pop_due(final_time, false) {
                match ev.target {
                    EventTarget::CdromResponse => {
                        self.drive.deliver_interrupt(&mut self.irq);
                    }
                    EventTarget::CdromSector => {
                        self.drive.sector_read_event(
                            &mut self.sched,
                            &mut self.irq,
                            &mut self.dma,
                        );
                    }
                    _ => {}
                }
            }
            self.sched.catch_up(final_time);
        }

        fn ack(&mut self) {
            self.write(0, 1); // index 1
            self.write(3, 0x07);
            self.write(0, 0); // back to index 0
        }
    }

    #[test]
    fn test_index_register_reflects_fifo_state() {
        let mut fx = Fixture::new();
        let status = fx.read(0);
        assert_ne!(status & (1 << 3), 0, "param FIFO empty");
        assert_ne!(status & (1 << 4), 0, "param FIFO not full");
        assert_eq!(status & (1 << 5), 0, "no response yet");

        fx.write(2, 0x12); // parameter
        let status = fx.read(0);
        assert_eq!(status & (1 << 3), 0);
    }

    #[test]
    fn test_getstat_delivers_int3_after_delay() {
        let mut fx = Fixture::new();
        fx.write(0, 1);
        fx.write(2, 0x1F); // enable all interrupts
        fx.write(0, 0);

        fx.write(1, 0x01); // GETSTAT

        // Not delivered yet
        assert_eq!(fx.drive.int_flag & 7, 0);
        fx.pump(commands::timing::GETSTAT_NORMAL + 1);
        assert_eq!(fx.drive.int_flag & 7, 3, "INT3 first response");
        assert_ne!(fx.irq.read_status() & Interrupt::CDROM.bits(), 0);

        // One byte: motor on, nothing else
        assert_eq!(fx.read(1), 0x02);
    }

    #[test]
    fn test_wrong_param_count_yields_int5() {
        let mut fx = Fixture::new();
        fx.write(0, 1);
        fx.write(2, 0x1F);
        fx.write(0, 0);

        fx.write(2, 0xAA); // GETSTAT takes no parameters
        fx.write(1, 0x01);
        fx.pump(1);

        assert_eq!(fx.drive.int_flag & 7, 5);
        let _stat = fx.read(1);
        assert_eq!(fx.read(1), error_code::WRONG_NUM_OF_PARAMS);
    }

    #[test]
    fn test_invalid_command_yields_int5() {
        let mut fx = Fixture::new();
        fx.write(0, 1);
        fx.write(2, 0x1F);
        fx.write(0, 0);

        fx.write(1, 0x5F);
        fx.pump(1);
        assert_eq!(fx.drive.int_flag & 7, 5);
        let _stat = fx.read(1);
        assert_eq!(fx.read(1), error_code::INVALID_COMMAND);
    }

    #[test]
    fn test_ack_promotes_second_response() {
        let mut fx = Fixture::new();
        fx.write(0, 1);
        fx.write(2, 0x1F);
        fx.write(0, 0);

        fx.write(1, 0x0A); // INIT: INT3 then INT2
        fx.pump(commands::timing::GETSTAT_NORMAL + 1);
        assert_eq!(fx.drive.int_flag & 7, 3);

        fx.ack();
        assert_eq!(fx.drive.int_flag & 7, 0);

        // Second response still owes its residual delay
        fx.pump(commands::timing::INIT + 1);
        assert_eq!(fx.drive.int_flag & 7, 2, "INT2 completion");
    }

    #[test]
    fn test_test_command_returns_bios_date() {
        let mut fx = Fixture::new();
        fx.write(0, 1);
        fx.write(2, 0x1F);
        fx.write(0, 0);

        fx.write(2, 0x20); // sub-function: BIOS date
        fx.write(1, 0x19);
        fx.pump(commands::timing::GETSTAT_NORMAL + 1);

        assert_eq!(fx.drive.int_flag & 7, 3);
        let date: Vec<u8> = (0..4).map(|_| fx.read(1)).collect();
        assert_eq!(date, vec![0x94, 0x09, 0x19, 0xC0]);
    }

    #[test]
    fn test_getid_without_disc_reports_error() {
        let mut fx = Fixture::new();
        fx.write(0, 1);
        fx.write(2, 0x1F);
        fx.write(0, 0);

        fx.write(1, 0x1A); // GETID
        fx.pump(commands::timing::GETSTAT_NORMAL + 1);
        assert_eq!(fx.drive.int_flag & 7, 3);
        fx.ack();
        fx.pump(commands::timing::GET_ID + 1);
        assert_eq!(fx.drive.int_flag & 7, 5, "no disc: INT5");
    }

    #[test]
    fn test_setmode_applies_mode_byte() {
        let mut fx = Fixture::new();
        fx.write(0, 1);
        fx.write(2, 0x1F);
        fx.write(0, 0);

        fx.write(2, 0xA0); // whole sector + double speed
        fx.write(1, 0x0E); // SETMODE
        fx.pump(commands::timing::GETSTAT_NORMAL + 1);

        assert!(fx.drive.mode.whole_sector());
        assert!(fx.drive.mode.double_speed());
    }

    #[test]
    fn test_lid_open_fails_disc_commands() {
        let mut fx = Fixture::new();
        fx.write(0, 1);
        fx.write(2, 0x1F);
        fx.write(0, 0);

        fx.drive.open_lid(&mut fx.sched, &mut fx.irq);
        fx.ack();

        fx.write(1, 0x06); // READN
        fx.pump(1);
        assert_eq!(fx.drive.int_flag & 7, 5);
        let _stat = fx.read(1);
        assert_eq!(fx.read(1), error_code::DRIVE_DOOR_OPEN);
    }
}
