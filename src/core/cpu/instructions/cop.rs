// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Coprocessor traffic
//!
//! COP0 moves, RFE, GTE (COP2) register moves and commands, and the word
//! transfers LWC2/SWC2. COP1 and COP3 do not exist on this chip and always
//! raise the coprocessor-unusable exception.

use super::{data_access, imm16_se, rd, rs, rt};
use crate::core::cpu::{Cpu, Excode};
use crate::core::memory::address::GuestAddress;
use crate::core::memory::Bus;

pub fn op_cop0(cpu: &mut Cpu, _bus: &mut Bus, instruction: u32) {
    if (instruction >> 25) & 1 != 0 {
        if instruction & 0x3F == 0x10 {
            // RFE pops the mode/interrupt-enable stack
            cpu.cop0.rfe();
        } else {
            log::error!(
                "[CPU] Invalid COP0 instruction 0x{:08X} at 0x{:08X}",
                instruction,
                cpu.pc()
            );
            cpu.raise_exception(Excode::RI);
        }
        return;
    }

    let action = (instruction >> 21) & 0xF;
    let cop_reg = rd(instruction);
    let gpr = rt(instruction);

    match action {
        0x0 => {
            // MFC0
            if cpu.cop0.user_mode() && !cpu.cop0.cop0_enable() {
                cpu.raise_cop_unusable(0);
                return;
            }
            match cpu.cop0.read(cop_reg) {
                Some(value) => cpu.add_load_delay(value, gpr),
                None => cpu.raise_exception(Excode::RI),
            }
        }
        0x4 => {
            // MTC0
            if cpu.cop0.user_mode() && !cpu.cop0.cop0_enable() {
                cpu.raise_cop_unusable(0);
                return;
            }
            let value = cpu.reg(gpr);
            if !cpu.cop0.write(cop_reg, value) {
                cpu.raise_exception(Excode::RI);
            }
        }
        0x2 | 0x6 => {
            // CFC0/CTC0 do not exist
            log::error!("[CPU] Invalid COP0 opcode 0x{:X} at 0x{:08X}", action, cpu.pc());
            cpu.raise_exception(Excode::RI);
        }
        _ => {
            log::error!("[CPU] Invalid COP0 opcode 0x{:X} at 0x{:08X}", action, cpu.pc());
            cpu.raise_cop_unusable(0);
        }
    }
}

pub fn op_cop2(cpu: &mut Cpu, bus: &mut Bus, instruction: u32) {
    if !cpu.cop0.cop2_enable() {
        cpu.raise_cop_unusable(2);
        return;
    }

    if (instruction >> 25) & 1 != 0 {
        cpu.interlock_gte(bus);
        let now = bus.scheduler.now();
        cpu.gte.command(instruction & 0x01FF_FFFF, now);
        return;
    }

    let action = (instruction >> 21) & 0xF;
    let cop_reg = rd(instruction);
    let gpr = rt(instruction);

    match action {
        0x0 => {
            // MFC2
            cpu.interlock_gte(bus);
            let value = cpu.gte.read_data(cop_reg);
            cpu.add_load_delay(value, gpr);
        }
        0x2 => {
            // CFC2
            cpu.interlock_gte(bus);
            let value = cpu.gte.read_control(cop_reg);
            cpu.add_load_delay(value, gpr);
        }
        0x4 => {
            // MTC2
            let value = cpu.reg(gpr);
            cpu.gte.write_data(cop_reg, value);
        }
        0x6 => {
            // CTC2
            let value = cpu.reg(gpr);
            cpu.gte.write_control(cop_reg, value);
        }
        0x8 => {
            // BC2F/BC2T: no game is known to use the GTE condition line
            log::error!("[CPU] Unimplemented COP2 branch at 0x{:08X}", cpu.pc());
        }
        _ => {
            log::error!("[CPU] Invalid COP2 opcode 0x{:X} at 0x{:08X}", action, cpu.pc());
            cpu.raise_cop_unusable(2);
        }
    }
}

pub fn op_cop1(cpu: &mut Cpu, _bus: &mut Bus, _instruction: u32) {
    cpu.raise_cop_unusable(1);
}

pub fn op_cop3(cpu: &mut Cpu, _bus: &mut Bus, _instruction: u32) {
    cpu.raise_cop_unusable(3);
}

#[inline(always)]
fn transfer_address(cpu: &Cpu, instruction: u32) -> u32 {
    cpu.reg(rs(instruction))
        .wrapping_add(imm16_se(instruction) as u32)
}

pub fn op_lwc0(cpu: &mut Cpu, bus: &mut Bus, instruction: u32) {
    let addr = transfer_address(cpu, instruction);
    let value = match bus.read::<u32>(GuestAddress(addr), data_access(cpu)) {
        Ok(v) => v,
        Err(fault) => {
            cpu.apply_fault(fault);
            return;
        }
    };
    cpu.cop0.write(rt(instruction), value);
}

pub fn op_lwc2(cpu: &mut Cpu, bus: &mut Bus, instruction: u32) {
    if !cpu.cop0.cop2_enable() {
        cpu.raise_cop_unusable(2);
        return;
    }

    let addr = transfer_address(cpu, instruction);
    let value = match bus.read::<u32>(GuestAddress(addr), data_access(cpu)) {
        Ok(v) => v,
        Err(fault) => {
            cpu.apply_fault(fault);
            return;
        }
    };
    cpu.gte.write_data(rt(instruction), value);
}

pub fn op_swc0(cpu: &mut Cpu, bus: &mut Bus, instruction: u32) {
    let addr = transfer_address(cpu, instruction);
    let value = cpu.cop0.read(rt(instruction)).unwrap_or(0);
    if let Err(fault) = bus.write::<u32>(GuestAddress(addr), value, data_access(cpu)) {
        cpu.apply_fault(fault);
    }
}

pub fn op_swc2(cpu: &mut Cpu, bus: &mut Bus, instruction: u32) {
    if !cpu.cop0.cop2_enable() {
        cpu.raise_cop_unusable(2);
        return;
    }

    let addr = transfer_address(cpu, instruction);
    let value = cpu.gte.read_data(rt(instruction));
    if let Err(fault) = bus.write::<u32>(GuestAddress(addr), value, data_access(cpu)) {
        cpu.apply_fault(fault);
    }
}

pub fn op_lwc1(cpu: &mut Cpu, _bus: &mut Bus, _instruction: u32) {
    cpu.raise_cop_unusable(1);
}

pub fn op_lwc3(cpu: &mut Cpu, _bus: &mut Bus, _instruction: u32) {
    cpu.raise_cop_unusable(3);
}

pub fn op_swc1(cpu: &mut Cpu, _bus: &mut Bus, _instruction: u32) {
    cpu.raise_cop_unusable(1);
}

pub fn op_swc3(cpu: &mut Cpu, _bus: &mut Bus, _instruction: u32) {
    cpu.raise_cop_unusable(3);
}
