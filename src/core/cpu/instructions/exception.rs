// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! SYSCALL, BREAK and reserved encodings

use crate::core::cpu::{Cpu, Excode};
use crate::core::memory::Bus;

pub fn op_syscall(cpu: &mut Cpu, _bus: &mut Bus, _instruction: u32) {
    // a0 carries the conventional function selector
    match cpu.reg(4) {
        0x0 => log::debug!("[CPU] SYSCALL NoFunction()"),
        0x1 => log::debug!("[CPU] SYSCALL EnterCriticalSection()"),
        0x2 => log::debug!("[CPU] SYSCALL ExitCriticalSection()"),
        0x3 => log::debug!(
            "[CPU] SYSCALL ChangeThreadSubFunction(addr=0x{:08X})",
            cpu.reg(5)
        ),
        _ => log::debug!("[CPU] SYSCALL DeliverEvent(0xF0000010, 0x4000)"),
    }
    cpu.raise_exception(Excode::Syscall);
}

pub fn op_break(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let comment = (instruction >> 6) & 0xFFFFF;
    log::error!(
        "[CPU] BREAK at 0x{:08X} with arg 0x{:X}",
        cpu.pc(),
        comment
    );
    cpu.raise_exception(Excode::Bp);
}

pub fn op_reserved(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    log::error!(
        "[CPU] Reserved instruction 0x{:08X} at 0x{:08X}",
        instruction,
        cpu.pc()
    );
    cpu.raise_exception(Excode::RI);
}
