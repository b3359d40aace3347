// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Shifts, immediate and variable

use super::{rd, rs, rt, shamt};
use crate::core::cpu::Cpu;
use crate::core::memory::Bus;

pub fn op_sll(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let result = cpu.reg(rt(instruction)) << shamt(instruction);
    cpu.add_writeback(result, rd(instruction));
}

pub fn op_srl(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let result = cpu.reg(rt(instruction)) >> shamt(instruction);
    cpu.add_writeback(result, rd(instruction));
}

pub fn op_sra(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let result = (cpu.reg(rt(instruction)) as i32) >> shamt(instruction);
    cpu.add_writeback(result as u32, rd(instruction));
}

pub fn op_sllv(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let amount = cpu.reg(rs(instruction)) & 0x1F;
    let result = cpu.reg(rt(instruction)) << amount;
    cpu.add_writeback(result, rd(instruction));
}

pub fn op_srlv(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let amount = cpu.reg(rs(instruction)) & 0x1F;
    let result = cpu.reg(rt(instruction)) >> amount;
    cpu.add_writeback(result, rd(instruction));
}

pub fn op_srav(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let amount = cpu.reg(rs(instruction)) & 0x1F;
    let result = (cpu.reg(rt(instruction)) as i32) >> amount;
    cpu.add_writeback(result as u32, rd(instruction));
}
