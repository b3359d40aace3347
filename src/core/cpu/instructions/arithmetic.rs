// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Add/subtract/compare, immediate and register forms
//!
//! `ADD`, `ADDI` and `SUB` raise `Ov` on signed overflow without committing
//! the destination.

use super::{imm16_se, rd, rs, rt};
use crate::core::cpu::{Cpu, Excode};
use crate::core::memory::Bus;

#[inline(always)]
fn add_overflows(l: u32, r: u32) -> bool {
    let sum = l.wrapping_add(r);
    (!(l ^ r) & (l ^ sum)) & 0x8000_0000 != 0
}

#[inline(always)]
fn sub_overflows(l: u32, r: u32) -> bool {
    let diff = l.wrapping_sub(r);
    ((l ^ r) & (l ^ diff)) & 0x8000_0000 != 0
}

pub fn op_addi(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let rs_val = cpu.reg(rs(instruction));
    let imm = imm16_se(instruction) as u32;
    if add_overflows(rs_val, imm) {
        cpu.raise_exception(Excode::Ov);
        return;
    }
    cpu.add_writeback(rs_val.wrapping_add(imm), rt(instruction));
}

pub fn op_addiu(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let rs_val = cpu.reg(rs(instruction));
    let imm = imm16_se(instruction) as u32;
    cpu.add_writeback(rs_val.wrapping_add(imm), rt(instruction));
}

pub fn op_slti(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let rs_val = cpu.reg(rs(instruction)) as i32;
    let result = (rs_val < imm16_se(instruction)) as u32;
    cpu.add_writeback(result, rt(instruction));
}

pub fn op_sltiu(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let rs_val = cpu.reg(rs(instruction));
    // The immediate is sign-extended, then compared unsigned
    let result = (rs_val < imm16_se(instruction) as u32) as u32;
    cpu.add_writeback(result, rt(instruction));
}

pub fn op_add(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let rs_val = cpu.reg(rs(instruction));
    let rt_val = cpu.reg(rt(instruction));
    if add_overflows(rs_val, rt_val) {
        cpu.raise_exception(Excode::Ov);
        return;
    }
    cpu.add_writeback(rs_val.wrapping_add(rt_val), rd(instruction));
}

pub fn op_addu(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let result = cpu.reg(rs(instruction)).wrapping_add(cpu.reg(rt(instruction)));
    cpu.add_writeback(result, rd(instruction));
}

pub fn op_sub(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let rs_val = cpu.reg(rs(instruction));
    let rt_val = cpu.reg(rt(instruction));
    if sub_overflows(rs_val, rt_val) {
        cpu.raise_exception(Excode::Ov);
        return;
    }
    cpu.add_writeback(rs_val.wrapping_sub(rt_val), rd(instruction));
}

pub fn op_subu(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let result = cpu.reg(rs(instruction)).wrapping_sub(cpu.reg(rt(instruction)));
    cpu.add_writeback(result, rd(instruction));
}

pub fn op_slt(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let result = ((cpu.reg(rs(instruction)) as i32) < (cpu.reg(rt(instruction)) as i32)) as u32;
    cpu.add_writeback(result, rd(instruction));
}

pub fn op_sltu(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    let result = (cpu.reg(rs(instruction)) < cpu.reg(rt(instruction))) as u32;
    cpu.add_writeback(result, rd(instruction));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_predicates() {
        assert!(add_overflows(0x7FFF_FFFF, 1));
        assert!(add_overflows(0x8000_0000, 0x8000_0000));
        assert!(!add_overflows(0x7FFF_FFFF, 0));
        assert!(!add_overflows(0xFFFF_FFFF, 1));

        assert!(sub_overflows(0x8000_0000, 1));
        assert!(sub_overflows(0x7FFF_FFFF, 0xFFFF_FFFF));
        assert!(!sub_overflows(5, 3));
        assert!(!sub_overflows(3, 5));
    }
}
