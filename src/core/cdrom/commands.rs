// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Drive command implementations
//!
//! The host writes a command code to (index 0, port 1), optionally
//! preceded by parameter bytes into (index 0, port 2). Each command
//! produces one or more responses with their documented delivery delays.

use super::disc::CdLocation;
use super::{error_code, CdInterrupt, CdromDrive, DriveMode};
use crate::core::interrupt::InterruptController;
use crate::core::scheduler::{EventTarget, Scheduler, INVALID_EVENT};

/// PS1 system clock in Hz
pub const SYSTEM_CLOCK: u64 = 33_868_800;

/// Response delays in system clocks, from the no$psx documentation
pub mod timing {
    use super::SYSTEM_CLOCK;

    pub const GETSTAT_STOPPED: u64 = 0x0005_CF4;
    pub const GETSTAT_NORMAL: u64 = 0x000C_4E1;
    pub const INIT: u64 = 0x0013_CCE;
    pub const READ_TOC: u64 = INIT;
    pub const GET_ID: u64 = 0x0004_A00;
    pub const PAUSE: u64 = 0x0021_181C;
    pub const PAUSE_PAUSED: u64 = 0x0001_DF2;
    pub const STOP: u64 = 0x00D3_8ACA;
    pub const STOP_STOPPED: u64 = 0x0001_D7B;
    /// One sector period at single speed
    pub const READ: u64 = SYSTEM_CLOCK * 0x930 / 4 / 44100;
}

/// Sector period for the current drive mode
pub fn read_period(mode: DriveMode) -> u64 {
    if mode.double_speed() {
        timing::READ / 2
    } else {
        timing::READ
    }
}

/// Command codes
mod cmd {
    pub const GETSTAT: u8 = 0x01;
    pub const SETLOC: u8 = 0x02;
    pub const READN: u8 = 0x06;
    pub const STOP: u8 = 0x08;
    pub const PAUSE: u8 = 0x09;
    pub const INIT: u8 = 0x0A;
    pub const DEMUTE: u8 = 0x0C;
    pub const SETMODE: u8 = 0x0E;
    pub const SEEKL: u8 = 0x15;
    pub const TEST: u8 = 0x19;
    pub const GETID: u8 = 0x1A;
    pub const READTOC: u8 = 0x1E;
}

impl CdromDrive {
    pub(super) fn execute_command(
        &mut self,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) {
        match self.curr_cmd {
            cmd::GETSTAT => self.command_getstat(scheduler, interrupts),
            cmd::SETLOC => self.command_setloc(scheduler, interrupts),
            cmd::READN => self.command_readn(scheduler, interrupts),
            cmd::STOP => self.command_stop(scheduler, interrupts),
            cmd::PAUSE => self.command_pause(scheduler, interrupts),
            cmd::INIT => self.command_init(scheduler, interrupts),
            cmd::DEMUTE => self.command_demute(scheduler, interrupts),
            cmd::SETMODE => self.command_setmode(scheduler, interrupts),
            cmd::SEEKL => self.command_seekl(scheduler, interrupts),
            cmd::TEST => self.command_test(scheduler, interrupts),
            cmd::GETID => self.command_getid(scheduler, interrupts),
            cmd::READTOC => self.command_readtoc(scheduler, interrupts),
            other => {
                log::error!("[CDROM] Unknown/invalid command 0x{:02X}", other);
                self.stat.set_err(true);
                let stat = self.stat.0;
                self.push_response(
                    CdInterrupt::Int5Error,
                    &[stat, error_code::INVALID_COMMAND],
                    0,
                    scheduler,
                    interrupts,
                );
            }
        }
        self.param_fifo.clear();
    }

    fn validate_params(
        &mut self,
        expected: usize,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) -> bool {
        if self.param_fifo.len() == expected {
            return true;
        }
        self.stat.set_err(true);
        let stat = self.stat.0;
        self.push_response(
            CdInterrupt::Int5Error,
            &[stat, error_code::WRONG_NUM_OF_PARAMS],
            0,
            scheduler,
            interrupts,
        );
        false
    }

    /// Commands touching the disc fail outright with the lid open (or no
    /// disc present)
    fn check_disc_ready(
        &mut self,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) -> bool {
        if !self.lid_open && self.has_disc() {
            return true;
        }
        self.stat.set_err(true);
        let stat = self.stat.0;
        self.push_response(
            CdInterrupt::Int5Error,
            &[stat, error_code::DRIVE_DOOR_OPEN],
            0,
            scheduler,
            interrupts,
        );
        false
    }

    fn ack_delay(&self) -> u64 {
        if self.motor_on {
            timing::GETSTAT_NORMAL
        } else {
            timing::GETSTAT_STOPPED
        }
    }

    fn command_getstat(
        &mut self,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) {
        if !self.validate_params(0, scheduler, interrupts) {
            return;
        }

        let stat = self.stat.0;
        let delay = self.ack_delay();
        self.push_response(CdInterrupt::Int3First, &[stat], delay, scheduler, interrupts);

        // GetStat clears the shell-open latch once the lid is physically
        // closed again
        if !self.lid_open {
            self.stat.set_shell_open(false);
        }
    }

    fn command_setloc(
        &mut self,
        scheduler: &mut Scheduler,
        interrupts: &mut InterruptController,
    ) {
        if !self.validate_params(3, scheduler, interrupts) {
            return;
        }

        let mm = self.param_fifo.pop_front().unwrap_or(0);
        let ss = self.param_fifo.pop_front().unwrap_or(0);
        let sect = self.param_fifo.pop_front().unwrap_or(0);

        match CdLocation::from_bcd(mm, ss, sect) {
            Some(loc) => {
                log::debug!(
                    "[CDROM] SETLOC {:02}:{:02}:{:02}",
                    loc.mm,
                    loc.ss,
                    loc.sect
                );
                self.pending_seek = Some(loc);
                let stat = self.stat.0;
                let delay = self.ack_delay();
                self.push_response(CdInterrupt::Int3First, &[stat], delay, scheduler, interrupts);
            }
            None => {
                self.stat.set_err(true);
                let stat = self.stat.0;
                self.push_response(
                    CdInterrupt::Int5Error,
                    &[stat, error_code::INVALID_SUB_FUNCTION],
                    0,
                    scheduler,
                    interrupts,
                );
            }
        }
    }

    fn command_seekl(&mut self, scheduler: &mut Scheduler, interrupts: &mut InterruptController) {
        if !self.validate_params(0, scheduler, interrupts)
            || !self.check_disc_ready(scheduler, interrupts)
        {
            return;
        }

        if let Some(target) = self.pending_seek.take() {
            self.seek_loc = target;
        }
        self.stat.set_seeking(true);
        self.stat.set_reading(false);

        let stat = self.stat.0;
        let delay = self.ack_delay();
        self.push_response(CdInterrupt::Int3First, &[stat], delay, scheduler, interrupts);

        // Completion after roughly one sector period
        self.stat.set_seeking(false);
        let stat = self.stat.0;
        self.push_response(
            CdInterrupt::Int2Second,
            &[stat],
            read_period(self.mode),
            scheduler,
            interrupts,
        );
    }

    fn command_readn(&mut self, scheduler: &mut Scheduler, interrupts: &mut InterruptController) {
        if !self.validate_params(0, scheduler, interrupts)
            || !self.check_disc_ready(scheduler, interrupts)
        {
            return;
        }

        if let Some(target) = self.pending_seek.take() {
            self.seek_loc = target;
        }

        self.read_paused = false;
        self.stat.set_seeking(true);

        let stat = self.stat.0;
        let delay = self.ack_delay();
        self.push_response(CdInterrupt::Int3First, &[stat], delay, scheduler, interrupts);

        scheduler.deschedule(self.read_event);
        self.read_event = scheduler.schedule(read_period(self.mode), EventTarget::CdromSector);
    }

    fn command_pause(&mut self, scheduler: &mut Scheduler, interrupts: &mut InterruptController) {
        if !self.validate_params(0, scheduler, interrupts) {
            return;
        }

        let was_paused = self.read_paused || self.read_event == INVALID_EVENT;

        scheduler.deschedule(self.read_event);
        self.read_event = INVALID_EVENT;
        self.read_paused = true;

        let stat = self.stat.0;
        let delay = self.ack_delay();
        self.push_response(CdInterrupt::Int3First, &[stat], delay, scheduler, interrupts);

        self.stat.set_reading(false);
        self.stat.set_seeking(false);
        let stat = self.stat.0;
        let complete_delay = if was_paused {
            timing::PAUSE_PAUSED
        } else {
            timing::PAUSE
        };
        self.push_response(
            CdInterrupt::Int2Second,
            &[stat],
            complete_delay,
            scheduler,
            interrupts,
        );
    }

    fn command_stop(&mut self, scheduler: &mut Scheduler, interrupts: &mut InterruptController) {
        if !self.validate_params(0, scheduler, interrupts) {
            return;
        }

        let was_stopped = !self.motor_on;

        scheduler.deschedule(self.read_event);
        self.read_event = INVALID_EVENT;
        self.read_paused = true;

        let stat = self.stat.0;
        let delay = self.ack_delay();
        self.push_response(CdInterrupt::Int3First, &[stat], delay, scheduler, interrupts);

        self.motor_on = false;
        self.stat.set_motor_on(false);
        self.stat.set_reading(false);
        self.stat.set_seeking(false);
        let stat = self.stat.0;
        let complete_delay = if was_stopped {
            timing::STOP_STOPPED
        } else {
            timing::STOP
        };
        self.push_response(
            CdInterrupt::Int2Second,
            &[stat],
            complete_delay,
            scheduler,
            interrupts,
        );
    }

    fn command_init(&mut self, scheduler: &mut Scheduler, interrupts: &mut InterruptController) {
        if !self.validate_params(0, scheduler, interrupts) {
            return;
        }

        scheduler.deschedule(self.read_event);
        self.read_event = INVALID_EVENT;
        self.read_paused = false;
        self.mode = DriveMode(0);
        self.motor_on = true;
        self.stat.set_motor_on(true);
        self.stat.set_reading(false);
        self.stat.set_seeking(false);

        let stat = self.stat.0;
        let delay = self.ack_delay();
        self.push_response(CdInterrupt::Int3First, &[stat], delay, scheduler, interrupts);

        let stat = self.stat.0;
        self.push_response(
            CdInterrupt::Int2Second,
            &[stat],
            timing::INIT,
            scheduler,
            interrupts,
        );
    }

    fn command_demute(&mut self, scheduler: &mut Scheduler, interrupts: &mut InterruptController) {
        if !self.validate_params(0, scheduler, interrupts) {
            return;
        }
        self.mute_adpcm = false;

        let stat = self.stat.0;
        let delay = self.ack_delay();
        self.push_response(CdInterrupt::Int3First, &[stat], delay, scheduler, interrupts);
    }

    fn command_setmode(&mut self, scheduler: &mut Scheduler, interrupts: &mut InterruptController) {
        if !self.validate_params(1, scheduler, interrupts) {
            return;
        }

        let mode = self.param_fifo.pop_front().unwrap_or(0);
        self.mode = DriveMode(mode);
        log::debug!("[CDROM] SETMODE 0x{:02X}", mode);

        let stat = self.stat.0;
        let delay = self.ack_delay();
        self.push_response(CdInterrupt::Int3First, &[stat], delay, scheduler, interrupts);
    }

    fn command_test(&mut self, scheduler: &mut Scheduler, interrupts: &mut InterruptController) {
        if !self.validate_params(1, scheduler, interrupts) {
            return;
        }

        let sub = self.param_fifo.pop_front().unwrap_or(0);
        match sub {
            0x20 => {
                // BIOS BCD date and version: yy mm dd ver
                self.push_response(
                    CdInterrupt::Int3First,
                    &[0x94, 0x09, 0x19, 0xC0],
                    self.ack_delay(),
                    scheduler,
                    interrupts,
                );
            }
            other => {
                log::error!("[CDROM] TEST sub-function 0x{:02X} not supported", other);
                self.stat.set_err(true);
                let stat = self.stat.0;
                self.push_response(
                    CdInterrupt::Int5Error,
                    &[stat, error_code::INVALID_SUB_FUNCTION],
                    0,
                    scheduler,
                    interrupts,
                );
            }
        }
    }

    fn command_getid(&mut self, scheduler: &mut Scheduler, interrupts: &mut InterruptController) {
        if !self.validate_params(0, scheduler, interrupts) {
            return;
        }

        let stat = self.stat.0;
        let delay = self.ack_delay();
        self.push_response(CdInterrupt::Int3First, &[stat], delay, scheduler, interrupts);

        if self.has_disc() && !self.lid_open {
            // Licensed disc, region SCEA
            self.push_response(
                CdInterrupt::Int2Second,
                &[0x02, 0x00, 0x20, 0x00, b'S', b'C', b'E', b'A'],
                timing::GET_ID,
                scheduler,
                interrupts,
            );
        } else {
            self.push_response(
                CdInterrupt::Int5Error,
                &[0x08, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
                timing::GET_ID,
                scheduler,
                interrupts,
            );
        }
    }

    fn command_readtoc(&mut self, scheduler: &mut Scheduler, interrupts: &mut InterruptController) {
        if !self.validate_params(0, scheduler, interrupts)
            || !self.check_disc_ready(scheduler, interrupts)
        {
            return;
        }

        let stat = self.stat.0;
        let delay = self.ack_delay();
        self.push_response(CdInterrupt::Int3First, &[stat], delay, scheduler, interrupts);

        let stat = self.stat.0;
        self.push_response(
            CdInterrupt::Int2Second,
            &[stat],
            timing::READ_TOC,
            scheduler,
            interrupts,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_period_halves_at_double_speed() {
        assert_eq!(read_period(DriveMode(0)), timing::READ);
        assert_eq!(read_period(DriveMode(0x80)), timing::READ / 2);
    }

    #[test]
    fn test_single_speed_period_matches_spec_formula() {
        assert_eq!(timing::READ, SYSTEM_CLOCK * 0x930 / 4 / 44100);
    }
}
