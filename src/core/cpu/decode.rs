// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Decoded-opcode lookup table
//!
//! 4096 entries keyed by `(primary_opcode << 6) | secondary_opcode`. Built
//! once at CPU construction; entries with no architected meaning map to the
//! reserved-instruction handler.

use super::instructions::{
    arithmetic, branch, cop, exception, jump, load_store, logical, multiply, shift,
};
use super::InstructionHandler;

/// Table index for a primary/secondary opcode pair
#[inline(always)]
fn hash(primary: u16, secondary: u16) -> usize {
    ((primary << 6) | secondary) as usize
}

/// Build the full 4096-entry handler table
pub(super) fn build_handler_table() -> Box<[InstructionHandler; 4096]> {
    let mut table: Vec<InstructionHandler> = vec![exception::op_reserved; 4096];

    // Primary 0x00: SPECIAL, dispatched by the secondary opcode
    for secondary in 0u16..64 {
        table[hash(0x00, secondary)] = match secondary {
            0x00 => shift::op_sll,
            0x02 => shift::op_srl,
            0x03 => shift::op_sra,
            0x04 => shift::op_sllv,
            0x06 => shift::op_srlv,
            0x07 => shift::op_srav,
            0x08 => jump::op_jr,
            0x09 => jump::op_jalr,
            0x0C => exception::op_syscall,
            0x0D => exception::op_break,
            0x10 => multiply::op_mfhi,
            0x11 => multiply::op_mthi,
            0x12 => multiply::op_mflo,
            0x13 => multiply::op_mtlo,
            0x18 => multiply::op_mult,
            0x19 => multiply::op_multu,
            0x1A => multiply::op_div,
            0x1B => multiply::op_divu,
            0x20 => arithmetic::op_add,
            0x21 => arithmetic::op_addu,
            0x22 => arithmetic::op_sub,
            0x23 => arithmetic::op_subu,
            0x24 => logical::op_and,
            0x25 => logical::op_or,
            0x26 => logical::op_xor,
            0x27 => logical::op_nor,
            0x2A => arithmetic::op_slt,
            0x2B => arithmetic::op_sltu,
            _ => exception::op_reserved,
        };
    }

    // Remaining primaries ignore the secondary field
    for primary in 1u16..64 {
        let handler: InstructionHandler = match primary {
            0x01 => branch::op_bcondz,
            0x02 => jump::op_j,
            0x03 => jump::op_jal,
            0x04 => branch::op_beq,
            0x05 => branch::op_bne,
            0x06 => branch::op_blez,
            0x07 => branch::op_bgtz,
            0x08 => arithmetic::op_addi,
            0x09 => arithmetic::op_addiu,
            0x0A => arithmetic::op_slti,
            0x0B => arithmetic::op_sltiu,
            0x0C => logical::op_andi,
            0x0D => logical::op_ori,
            0x0E => logical::op_xori,
            0x0F => logical::op_lui,
            0x10 => cop::op_cop0,
            0x11 => cop::op_cop1,
            0x12 => cop::op_cop2,
            0x13 => cop::op_cop3,
            0x20 => load_store::op_lb,
            0x21 => load_store::op_lh,
            0x22 => load_store::op_lwl,
            0x23 => load_store::op_lw,
            0x24 => load_store::op_lbu,
            0x25 => load_store::op_lhu,
            0x26 => load_store::op_lwr,
            0x28 => load_store::op_sb,
            0x29 => load_store::op_sh,
            0x2A => load_store::op_swl,
            0x2B => load_store::op_sw,
            0x2E => load_store::op_swr,
            0x30 => cop::op_lwc0,
            0x31 => cop::op_lwc1,
            0x32 => cop::op_lwc2,
            0x33 => cop::op_lwc3,
            0x38 => cop::op_swc0,
            0x39 => cop::op_swc1,
            0x3A => cop::op_swc2,
            0x3B => cop::op_swc3,
            _ => exception::op_reserved,
        };
        for secondary in 0u16..64 {
            table[hash(primary, secondary)] = handler;
        }
    }

    table
        .into_boxed_slice()
        .try_into()
        .unwrap_or_else(|_| unreachable!("table is always 4096 entries"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_has_4096_entries() {
        let table = build_handler_table();
        assert_eq!(table.len(), 4096);
    }

    #[test]
    fn test_special_entries_dispatch_by_secondary() {
        let table = build_handler_table();
        assert!(std::ptr::fn_addr_eq(
            table[hash(0x00, 0x20)],
            arithmetic::op_add as InstructionHandler
        ));
        assert!(std::ptr::fn_addr_eq(
            table[hash(0x00, 0x08)],
            jump::op_jr as InstructionHandler
        ));
        // Holes inside SPECIAL are reserved
        assert!(std::ptr::fn_addr_eq(
            table[hash(0x00, 0x01)],
            exception::op_reserved as InstructionHandler
        ));
    }

    #[test]
    fn test_immediate_entries_ignore_secondary() {
        let table = build_handler_table();
        for secondary in 0..64 {
            assert!(std::ptr::fn_addr_eq(
                table[hash(0x0D, secondary)],
                logical::op_ori as InstructionHandler
            ));
        }
    }

    #[test]
    fn test_unused_primaries_are_reserved() {
        let table = build_handler_table();
        for secondary in 0..64 {
            assert!(std::ptr::fn_addr_eq(
                table[hash(0x3F, secondary)],
                exception::op_reserved as InstructionHandler
            ));
        }
    }
}
