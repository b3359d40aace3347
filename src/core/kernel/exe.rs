// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! PS-EXE format
//!
//! 0x800-byte header (magic `"PS-X EXE"`, program counter, GP, destination
//! address, file size, memfill range, initial SP) followed by the payload.
//! Loading performs the optional memfill, copies the payload to its
//! destination, flushes caches, and sets PC/GP/SP.

use crate::core::cpu::Cpu;
use crate::core::error::{EmulatorError, Result};
use crate::core::memory::{region, Bus};

pub const HEADER_SIZE: usize = 0x800;
const MAGIC: &[u8; 8] = b"PS-X EXE";

/// SP when the header leaves it zero
pub const DEFAULT_SP: u32 = 0x801F_FF00;

/// Guest address command-line arguments are copied to
const ARGS_DEST: u32 = 0x180;

/// Parsed PS-EXE header
#[derive(Debug, Clone, Copy)]
pub struct ExeHeader {
    pub start_pc: u32,
    pub start_gp: u32,
    pub dest_address: u32,
    pub file_size: u32,
    pub memfill_start: u32,
    pub memfill_size: u32,
    pub sp_base: u32,
    pub sp_offset: u32,
}

impl ExeHeader {
    /// Parse and validate a header block
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(EmulatorError::LoaderError(format!(
                "executable truncated: {} bytes",
                data.len()
            )));
        }
        if &data[0..8] != MAGIC {
            return Err(EmulatorError::LoaderError("missing PS-X EXE magic".into()));
        }

        let word = |offset: usize| -> u32 {
            u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap())
        };

        Ok(Self {
            start_pc: word(0x10),
            start_gp: word(0x14),
            dest_address: word(0x18),
            file_size: word(0x1C),
            memfill_start: word(0x28),
            memfill_size: word(0x2C),
            sp_base: word(0x30),
            sp_offset: word(0x34),
        })
    }

    /// Initial SP, defaulting when the header leaves it zero
    pub fn initial_sp(&self) -> u32 {
        let sp = self.sp_base.wrapping_add(self.sp_offset);
        if sp == 0 {
            DEFAULT_SP
        } else {
            sp
        }
    }
}

/// Copy an executable into RAM and point the CPU at its entry
///
/// `args`, when given, lands at the conventional 0x180 argument area.
pub fn load(bus: &mut Bus, cpu: &mut Cpu, image: &[u8], args: Option<&[u8]>) -> Result<ExeHeader> {
    let header = ExeHeader::parse(image)?;

    let payload = &image[HEADER_SIZE..];
    if (header.file_size as usize) > payload.len() {
        return Err(EmulatorError::LoaderError(format!(
            "payload shorter than header file size (0x{:X} > 0x{:X})",
            header.file_size,
            payload.len()
        )));
    }

    // Destination and memfill must land inside the mapped RAM window; a
    // raw copy anywhere else would leave the guest space inconsistent
    let window = bus.ram_window_size() as u64;
    let in_ram = move |base: u32, len: u32| {
        let phys = (base & region::SEGMENT_MASK) as u64;
        base < region::KSEG2_START && phys + len as u64 <= window
    };
    if !in_ram(header.dest_address, header.file_size) {
        return Err(EmulatorError::LoaderError(format!(
            "destination 0x{:08X}+0x{:X} outside main RAM",
            header.dest_address, header.file_size
        )));
    }
    if header.memfill_size != 0 && !in_ram(header.memfill_start, header.memfill_size) {
        return Err(EmulatorError::LoaderError(format!(
            "memfill 0x{:08X}+0x{:X} outside main RAM",
            header.memfill_start, header.memfill_size
        )));
    }

    if header.memfill_size != 0 {
        bus.fill_raw(header.memfill_start, header.memfill_size, 0);
    }

    bus.copy_raw(&payload[..header.file_size as usize], header.dest_address);

    if let Some(args) = args {
        bus.copy_raw(args, ARGS_DEST);
    }

    let sp = header.initial_sp();
    cpu.set_pc(header.start_pc);
    cpu.set_reg(28, header.start_gp); // gp
    cpu.set_reg(29, sp); // sp
    cpu.set_reg(30, sp); // fp

    log::info!("[KERNEL] Loaded executable");
    log::info!("         Destination : 0x{:08X}", header.dest_address);
    log::info!("         Entry PC    : 0x{:08X}", header.start_pc);
    log::info!("         GP          : 0x{:08X}", header.start_gp);
    log::info!("         SP          : 0x{:08X}", sp);
    log::info!("         Size        : 0x{:X}", header.file_size);

    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_exe(pc: u32, dest: u32, payload: &[u8]) -> Vec<u8> {
        let mut image = vec![0u8; HEADER_SIZE + payload.len()];
        image[0..8].copy_from_slice(MAGIC);
        image[0x10..0x14].copy_from_slice(&pc.to_le_bytes());
        image[0x14..0x18].copy_from_slice(&0x8001_0000u32.to_le_bytes());
        image[0x18..0x1C].copy_from_slice(&dest.to_le_bytes());
        image[0x1C..0x20].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        image[HEADER_SIZE..].copy_from_slice(payload);
        image
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let image = vec![0u8; HEADER_SIZE];
        assert!(ExeHeader::parse(&image).is_err());
    }

    #[test]
    fn test_parse_rejects_truncated() {
        assert!(ExeHeader::parse(&[0u8; 16]).is_err());
    }

    #[test]
    fn test_default_sp_applies_when_zero() {
        let image = build_exe(0x8001_0000, 0x8001_0000, &[0, 0, 0, 0]);
        let header = ExeHeader::parse(&image).unwrap();
        assert_eq!(header.initial_sp(), DEFAULT_SP);
    }

    #[test]
    fn test_load_copies_payload_and_sets_registers() {
        let mut bus = Bus::new().unwrap();
        let mut cpu = Cpu::new();

        let payload = 0x2402_002Au32.to_le_bytes(); // addiu v0, zero, 42
        let image = build_exe(0x8001_0000, 0x8001_0000, &payload);

        let header = load(&mut bus, &mut cpu, &image, Some(b"arg=1")).unwrap();
        assert_eq!(header.file_size, 4);

        assert_eq!(cpu.pc(), 0x8001_0000);
        assert_eq!(cpu.reg(28), 0x8001_0000);
        assert_eq!(cpu.reg(29), DEFAULT_SP);
        assert_eq!(bus.peek::<u32>(0x8001_0000), 0x2402_002A);
        assert_eq!(bus.peek::<u8>(ARGS_DEST), b'a');
    }

    #[test]
    fn test_memfill_zeroes_range() {
        let mut bus = Bus::new().unwrap();
        let mut cpu = Cpu::new();
        bus.poke::<u32>(0x0010_0000, 0xFFFF_FFFF);

        let mut image = build_exe(0x8001_0000, 0x8001_0000, &[0; 4]);
        image[0x28..0x2C].copy_from_slice(&0x0010_0000u32.to_le_bytes());
        image[0x2C..0x30].copy_from_slice(&0x100u32.to_le_bytes());

        load(&mut bus, &mut cpu, &image, None).unwrap();
        assert_eq!(bus.peek::<u32>(0x0010_0000), 0);
    }

    #[test]
    fn test_header_size_mismatch_rejected() {
        let mut image = build_exe(0x8001_0000, 0x8001_0000, &[0; 4]);
        // Claim more payload than the file carries
        image[0x1C..0x20].copy_from_slice(&0x1000u32.to_le_bytes());
        let mut bus = Bus::new().unwrap();
        let mut cpu = Cpu::new();
        assert!(load(&mut bus, &mut cpu, &image, None).is_err());
    }
}
