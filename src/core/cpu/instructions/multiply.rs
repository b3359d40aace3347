// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Multiply/divide unit and HI/LO traffic
//!
//! Products take 9 cycles, quotients 36. Readers arriving early stall by
//! adding the difference to the current instruction's cycle count.

use super::{rd, rs, rt};
use crate::core::cpu::Cpu;
use crate::core::memory::Bus;

const MUL_CYCLES: u64 = 9;
const DIV_CYCLES: u64 = 36;

pub fn op_mult(cpu: &mut Cpu, bus: &mut Bus, instruction: u32) {
    cpu.set_hi_lo_ready(bus.scheduler.now() + MUL_CYCLES);

    let product =
        (cpu.reg(rs(instruction)) as i32 as i64) * (cpu.reg(rt(instruction)) as i32 as i64);
    cpu.set_lo(product as u32);
    cpu.set_hi((product as u64 >> 32) as u32);
}

pub fn op_multu(cpu: &mut Cpu, bus: &mut Bus, instruction: u32) {
    cpu.set_hi_lo_ready(bus.scheduler.now() + MUL_CYCLES);

    let product = (cpu.reg(rs(instruction)) as u64) * (cpu.reg(rt(instruction)) as u64);
    cpu.set_lo(product as u32);
    cpu.set_hi((product >> 32) as u32);
}

pub fn op_div(cpu: &mut Cpu, bus: &mut Bus, instruction: u32) {
    cpu.set_hi_lo_ready(bus.scheduler.now() + DIV_CYCLES);

    let dividend = cpu.reg(rs(instruction)) as i32;
    let divisor = cpu.reg(rt(instruction)) as i32;

    if divisor == 0 {
        // LO holds -1 for non-negative dividends, +1 otherwise; HI keeps
        // the dividend
        cpu.set_hi(dividend as u32);
        cpu.set_lo(if dividend >= 0 { u32::MAX } else { 1 });
    } else if dividend == i32::MIN && divisor == -1 {
        cpu.set_lo(0x8000_0000);
        cpu.set_hi(0);
    } else {
        cpu.set_lo((dividend / divisor) as u32);
        cpu.set_hi((dividend % divisor) as u32);
    }
}

pub fn op_divu(cpu: &mut Cpu, bus: &mut Bus, instruction: u32) {
    cpu.set_hi_lo_ready(bus.scheduler.now() + DIV_CYCLES);

    let dividend = cpu.reg(rs(instruction));
    let divisor = cpu.reg(rt(instruction));

    if divisor == 0 {
        cpu.set_lo(u32::MAX);
        cpu.set_hi(dividend);
    } else {
        cpu.set_lo(dividend / divisor);
        cpu.set_hi(dividend % divisor);
    }
}

pub fn op_mfhi(cpu: &mut Cpu, bus: &mut Bus, instruction: u32) {
    cpu.interlock_hi_lo(bus);
    cpu.add_writeback(cpu.hi(), rd(instruction));
}

pub fn op_mflo(cpu: &mut Cpu, bus: &mut Bus, instruction: u32) {
    cpu.interlock_hi_lo(bus);
    cpu.add_writeback(cpu.lo(), rd(instruction));
}

pub fn op_mthi(cpu: &mut Cpu, bus: &mut Bus, instruction: u32) {
    cpu.interlock_hi_lo(bus);
    let value = cpu.reg(rs(instruction));
    cpu.set_hi(value);
}

pub fn op_mtlo(cpu: &mut Cpu, bus: &mut Bus, instruction: u32) {
    cpu.interlock_hi_lo(bus);
    let value = cpu.reg(rs(instruction));
    cpu.set_lo(value);
}
