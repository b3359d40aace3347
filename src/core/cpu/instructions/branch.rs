// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Conditional branches
//!
//! Every branch marks the following instruction as a delay slot, taken or
//! not; the transfer itself happens one commit later.

use super::{imm16_se, rs, rt};
use crate::core::cpu::Cpu;
use crate::core::memory::Bus;

pub fn op_beq(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    cpu.branch_delay = true;
    let dest = branch_dest(cpu, instruction);
    if cpu.reg(rs(instruction)) == cpu.reg(rt(instruction)) {
        cpu.jump(dest);
    }
}

pub fn op_bne(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    cpu.branch_delay = true;
    let dest = branch_dest(cpu, instruction);
    if cpu.reg(rs(instruction)) != cpu.reg(rt(instruction)) {
        cpu.jump(dest);
    }
}

pub fn op_blez(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    cpu.branch_delay = true;
    let dest = branch_dest(cpu, instruction);
    if (cpu.reg(rs(instruction)) as i32) <= 0 {
        cpu.jump(dest);
    }
}

pub fn op_bgtz(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    cpu.branch_delay = true;
    let dest = branch_dest(cpu, instruction);
    if (cpu.reg(rs(instruction)) as i32) > 0 {
        cpu.jump(dest);
    }
}

/// BLTZ/BGEZ/BLTZAL/BGEZAL and their likely aliases, selected by
/// `rt & 0b10001`
pub fn op_bcondz(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    cpu.branch_delay = true;

    let rs_val = cpu.reg(rs(instruction)) as i32;
    let dest = branch_dest(cpu, instruction);
    let link_pc = cpu.pc().wrapping_add(8);

    match rt(instruction) & 0b10001 {
        0x00 => {
            // BLTZ / BLTZL
            if rs_val < 0 {
                cpu.jump(dest);
            }
        }
        0x01 => {
            // BGEZ
            if rs_val >= 0 {
                cpu.jump(dest);
            }
        }
        0x10 => {
            // BLTZAL / BLTZALL: the link happens whether or not taken
            if rs_val < 0 {
                cpu.jump(dest);
            }
            cpu.add_writeback(link_pc, 31);
        }
        0x11 => {
            // BGEZAL
            if rs_val >= 0 {
                cpu.jump(dest);
            }
            cpu.add_writeback(link_pc, 31);
        }
        other => {
            log::info!("[CPU] Invalid BCONDZ 0x{:X}, ignored", other);
        }
    }
}

#[inline(always)]
fn branch_dest(cpu: &Cpu, instruction: u32) -> u32 {
    cpu.pc()
        .wrapping_add(4)
        .wrapping_add((imm16_se(instruction) * 4) as u32)
}
