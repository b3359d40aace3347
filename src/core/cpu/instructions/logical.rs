// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Bitwise operations and LUI

use super::{imm16, rd, rs, rt};
use crate::core::cpu::Cpu;
use crate::core::memory::Bus;

pub fn op_lui(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let dest = rt(instruction);
    if dest != 0 {
        cpu.add_writeback(imm16(instruction) << 16, dest);
    }
}

pub fn op_andi(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let result = cpu.reg(rs(instruction)) & imm16(instruction);
    cpu.add_writeback(result, rt(instruction));
}

pub fn op_ori(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let result = cpu.reg(rs(instruction)) | imm16(instruction);
    cpu.add_writeback(result, rt(instruction));
}

pub fn op_xori(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let result = cpu.reg(rs(instruction)) ^ imm16(instruction);
    cpu.add_writeback(result, rt(instruction));
}

pub fn op_and(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let result = cpu.reg(rs(instruction)) & cpu.reg(rt(instruction));
    cpu.add_writeback(result, rd(instruction));
}

pub fn op_or(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let result = cpu.reg(rs(instruction)) | cpu.reg(rt(instruction));
    cpu.add_writeback(result, rd(instruction));
}

pub fn op_xor(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let result = cpu.reg(rs(instruction)) ^ cpu.reg(rt(instruction));
    cpu.add_writeback(result, rd(instruction));
}

pub fn op_nor(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let result = !(cpu.reg(rs(instruction)) | cpu.reg(rt(instruction)));
    cpu.add_writeback(result, rd(instruction));
}
