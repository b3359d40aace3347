// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! GTE (Geometry Transformation Engine, coprocessor 2)
//!
//! Thirty-two data registers (vertices, colors, the screen-XY/Z/color
//! FIFOs, MAC0..MAC3, IRGB, the leading-zero counter) and thirty-two
//! control registers (rotation/light/color matrices, translation and
//! background/far color vectors, screen offset, projection distance,
//! depth-queue coefficients, Z scale factors, and the sticky flag
//! register).
//!
//! Command encoding: bits [0:5] opcode, bit 10 lm (IR saturation mode),
//! bits [13:14] translation selector, [15:16] vector selector, [17:18]
//! matrix selector, bit 19 shift-fraction selector. Writing the command
//! register clears every flag before execution. Flag bit 31 reads as the
//! OR-reduction of bits 23..=30 and 13..=18.

mod divider;
mod ops;

pub use divider::unr_divide_raw;

/// Data register indices worth naming
mod dreg {
    pub const OTZ: usize = 7;
    pub const IR0: usize = 8;
    pub const IR1: usize = 9;
    pub const SXY0: usize = 12;
    pub const SXY2: usize = 14;
    pub const SZ0: usize = 16;
    pub const SZ3: usize = 19;
    pub const RGB0: usize = 20;
    pub const RGB2: usize = 22;
    pub const MAC0: usize = 24;
    pub const MAC1: usize = 25;
    pub const IRGB: usize = 28;
    pub const ORGB: usize = 29;
    pub const LZCS: usize = 30;
    pub const LZCR: usize = 31;
}

/// Control register indices (offset by 32 in the flat file)
mod creg {
    pub const ROTATION: usize = 32;
    pub const TRX: usize = 37;
    pub const LIGHT: usize = 40;
    pub const RBK: usize = 45;
    pub const COLOR: usize = 48;
    pub const RFC: usize = 53;
    pub const OFX: usize = 56;
    pub const OFY: usize = 57;
    pub const H: usize = 58;
    pub const DQA: usize = 59;
    pub const DQB: usize = 60;
    pub const ZSF3: usize = 61;
    pub const ZSF4: usize = 62;
    pub const FLAG: usize = 63;
}

/// Sticky flag bits
mod flag {
    pub const IR0_SATURATED: u32 = 1 << 12;
    pub const SY2_SATURATED: u32 = 1 << 13;
    pub const SX2_SATURATED: u32 = 1 << 14;
    pub const MAC0_NEGATIVE: u32 = 1 << 15;
    pub const MAC0_POSITIVE: u32 = 1 << 16;
    pub const DIV_OVERFLOW: u32 = 1 << 17;
    pub const OTZ_SATURATED: u32 = 1 << 18;
    pub const FIFO_B_SATURATED: u32 = 1 << 19;
    pub const FIFO_G_SATURATED: u32 = 1 << 20;
    pub const FIFO_R_SATURATED: u32 = 1 << 21;

    /// OR-reduced into bit 31 on read
    pub const SUMMARY_MASK: u32 = (0xFF << 23) | (0x3F << 13);
}

#[inline(always)]
fn sign_extend16(value: u32) -> u32 {
    value as u16 as i16 as i32 as u32
}

#[inline(always)]
fn lo16(value: u32) -> i32 {
    value as u16 as i16 as i32
}

#[inline(always)]
fn hi16(value: u32) -> i32 {
    (value >> 16) as u16 as i16 as i32
}

/// Decoded command word
#[derive(Debug, Clone, Copy)]
pub(super) struct CommandWord(pub u32);

impl CommandWord {
    pub fn opcode(self) -> u32 {
        self.0 & 0x3F
    }
    /// IR saturation mode: true clamps to 0..0x7FFF
    pub fn lm(self) -> bool {
        (self.0 >> 10) & 1 != 0
    }
    /// MVMVA translation vector selector
    pub fn translation(self) -> u32 {
        (self.0 >> 13) & 3
    }
    /// MVMVA multiply vector selector
    pub fn vector(self) -> u32 {
        (self.0 >> 15) & 3
    }
    /// MVMVA matrix selector
    pub fn matrix(self) -> u32 {
        (self.0 >> 17) & 3
    }
    /// Shift fraction: 0 keeps full precision, 1 shifts right by 12
    pub fn sf(self) -> u32 {
        (self.0 >> 19) & 1
    }
}

/// The GTE register file and command unit
pub struct Gte {
    /// Flat 64-word register file; data registers first, control registers
    /// from index 32
    regs: [u32; 64],
    /// Timestamp until which the previous command occupies the unit
    interlock_until: u64,
}

impl Gte {
    pub fn new() -> Self {
        Self {
            regs: [0u32; 64],
            interlock_until: 0,
        }
    }

    /// When the in-flight command retires (readers stall until then)
    #[inline(always)]
    pub fn interlock_until(&self) -> u64 {
        self.interlock_until
    }

    /// MFC2
    pub fn read_data(&mut self, index: u8) -> u32 {
        let reg = index as usize & 0x1F;
        match reg {
            // VZ0/VZ1/VZ2 and the IR registers sign-extend
            1 | 3 | 5 | 8 | 9 | 10 | 11 => sign_extend16(self.regs[reg]),
            // OTZ and the SZ FIFO are plain 16-bit
            7 | 16..=19 => self.regs[reg] & 0xFFFF,
            // SXYP mirrors SXY2
            15 => self.regs[dreg::SXY2],
            dreg::ORGB => self.regs[dreg::IRGB],
            _ => self.regs[reg],
        }
    }

    /// MTC2
    pub fn write_data(&mut self, index: u8, value: u32) {
        let reg = index as usize & 0x1F;
        match reg {
            dreg::IR1 | 10 | 11 => {
                self.regs[reg] = sign_extend16(value);
                self.update_orgb();
                return;
            }
            15 => {
                // SXYP pushes the screen FIFO
                self.push_sxy(lo16(value), hi16(value));
                return;
            }
            dreg::IRGB => {
                let value = value & 0x7FFF;
                self.regs[9] = (((value & 0x1F) * 0x80) as i32) as u32;
                self.regs[10] = ((((value >> 5) & 0x1F) * 0x80) as i32) as u32;
                self.regs[11] = ((((value >> 10) & 0x1F) * 0x80) as i32) as u32;
                self.regs[dreg::IRGB] = value;
                return;
            }
            dreg::LZCS => {
                let count = if (value as i32) >= 0 {
                    value.leading_zeros()
                } else {
                    value.leading_ones()
                };
                self.regs[dreg::LZCR] = count;
                self.regs[dreg::LZCS] = value;
                return;
            }
            7 | 16..=19 => {
                self.regs[reg] = value & 0xFFFF;
                return;
            }
            dreg::ORGB | dreg::LZCR => return, // read-only
            _ => {}
        }
        self.regs[reg] = value;
    }

    /// CFC2
    pub fn read_control(&mut self, index: u8) -> u32 {
        let reg = 32 + (index as usize & 0x1F);
        match reg {
            // Last matrix cell and the 16-bit coefficients sign-extend;
            // H does too even though it is unsigned (hardware quirk)
            36 | 44 | 52 | creg::H | creg::DQA | creg::ZSF3 | creg::ZSF4 => {
                sign_extend16(self.regs[reg])
            }
            creg::FLAG => {
                let raw = self.regs[creg::FLAG] & !(1 << 31);
                if raw & flag::SUMMARY_MASK != 0 {
                    self.regs[creg::FLAG] = raw | (1 << 31);
                } else {
                    self.regs[creg::FLAG] = raw;
                }
                self.regs[creg::FLAG]
            }
            _ => self.regs[reg],
        }
    }

    /// CTC2
    pub fn write_control(&mut self, index: u8, value: u32) {
        let reg = 32 + (index as usize & 0x1F);
        let value = if reg == creg::FLAG {
            value & !0xFFF & !(1 << 31)
        } else {
            value
        };
        self.regs[reg] = value;
    }

    /// Execute one GTE command; `now` is the current scheduler timestamp
    /// used to arm the interlock
    pub fn command(&mut self, raw: u32, now: u64) {
        let cmd = CommandWord(raw);

        // Every flag clears before the command runs
        self.regs[creg::FLAG] = 0;

        let cycles = match cmd.opcode() {
            0x01 => {
                self.rtps(cmd);
                15
            }
            0x06 => {
                self.nclip();
                8
            }
            0x0C => {
                self.op(cmd);
                6
            }
            0x10 => {
                self.dpcs(cmd, false);
                8
            }
            0x11 => {
                self.intpl(cmd);
                8
            }
            0x12 => {
                self.mvmva(cmd);
                8
            }
            0x13 => {
                self.ncds(cmd, 0);
                19
            }
            0x14 => {
                self.cdp(cmd);
                13
            }
            0x16 => {
                self.ncdt(cmd);
                44
            }
            0x1B => {
                self.nccs(cmd, 0);
                17
            }
            0x1C => {
                self.cc(cmd);
                11
            }
            0x1E => {
                self.ncs(cmd, 0);
                14
            }
            0x20 => {
                self.nct(cmd);
                30
            }
            0x28 => {
                self.sqr(cmd);
                5
            }
            0x29 => {
                self.dpcl(cmd);
                8
            }
            0x2A => {
                self.dpct(cmd);
                17
            }
            0x2D => {
                self.avsz3();
                5
            }
            0x2E => {
                self.avsz4();
                6
            }
            0x30 => {
                self.rtpt(cmd);
                23
            }
            0x3D => {
                self.gpf(cmd);
                5
            }
            0x3E => {
                self.gpl(cmd);
                5
            }
            0x3F => {
                self.ncct(cmd);
                39
            }
            other => {
                log::error!("[COP2] Unknown command 0x{:02X}", other);
                1
            }
        };

        self.interlock_until = now + cycles;
    }

    // ------------------------------------------------------------------
    // Typed views of the register file
    // ------------------------------------------------------------------

    /// Vertex 0..2 as a signed 16-bit triple
    fn vertex(&self, n: usize) -> [i32; 3] {
        let xy = self.regs[n * 2];
        let z = self.regs[n * 2 + 1];
        [lo16(xy), hi16(xy), lo16(z)]
    }

    /// IR1..IR3
    fn ir_vector(&self) -> [i32; 3] {
        [
            self.regs[9] as i32,
            self.regs[10] as i32,
            self.regs[11] as i32,
        ]
    }

    fn ir0(&self) -> i32 {
        self.regs[dreg::IR0] as i32
    }

    /// 3x3 signed matrix packed two cells per word starting at `base`
    fn matrix(&self, base: usize) -> [[i32; 3]; 3] {
        [
            [
                lo16(self.regs[base]),
                hi16(self.regs[base]),
                lo16(self.regs[base + 1]),
            ],
            [
                hi16(self.regs[base + 1]),
                lo16(self.regs[base + 2]),
                hi16(self.regs[base + 2]),
            ],
            [
                lo16(self.regs[base + 3]),
                hi16(self.regs[base + 3]),
                lo16(self.regs[base + 4]),
            ],
        ]
    }

    fn rotation(&self) -> [[i32; 3]; 3] {
        self.matrix(creg::ROTATION)
    }

    fn light(&self) -> [[i32; 3]; 3] {
        self.matrix(creg::LIGHT)
    }

    fn light_color(&self) -> [[i32; 3]; 3] {
        self.matrix(creg::COLOR)
    }

    fn translation(&self) -> [i64; 3] {
        [
            self.regs[creg::TRX] as i32 as i64,
            self.regs[creg::TRX + 1] as i32 as i64,
            self.regs[creg::TRX + 2] as i32 as i64,
        ]
    }

    fn background_color(&self) -> [i64; 3] {
        [
            self.regs[creg::RBK] as i32 as i64,
            self.regs[creg::RBK + 1] as i32 as i64,
            self.regs[creg::RBK + 2] as i32 as i64,
        ]
    }

    fn far_color(&self) -> [i64; 3] {
        [
            self.regs[creg::RFC] as i32 as i64,
            self.regs[creg::RFC + 1] as i32 as i64,
            self.regs[creg::RFC + 2] as i32 as i64,
        ]
    }

    /// R, G, B of the working color plus the code byte
    fn rgbc(&self) -> (i64, i64, i64, u32) {
        let rgbc = self.regs[6];
        (
            (rgbc & 0xFF) as i64,
            ((rgbc >> 8) & 0xFF) as i64,
            ((rgbc >> 16) & 0xFF) as i64,
            rgbc >> 24,
        )
    }

    fn mac_vector(&self) -> [i64; 3] {
        [
            self.regs[dreg::MAC1] as i32 as i64,
            self.regs[dreg::MAC1 + 1] as i32 as i64,
            self.regs[dreg::MAC1 + 2] as i32 as i64,
        ]
    }

    // ------------------------------------------------------------------
    // Saturating setters and FIFOs
    // ------------------------------------------------------------------

    #[inline(always)]
    fn set_flag(&mut self, bit: u32) {
        self.regs[creg::FLAG] |= bit;
    }

    /// Flag a 44-bit overflow and sign-extend the running sum back into
    /// 44 bits (the MAC adder chain wraps, it does not clamp)
    fn check_mac(&mut self, which: usize, value: i64) -> i64 {
        const LIMIT: i64 = 1 << 43;
        if value >= LIMIT {
            self.set_flag(1 << (31 - which as u32));
        } else if value < -LIMIT {
            self.set_flag(1 << (28 - which as u32));
        }
        (value << 20) >> 20
    }

    /// Store MACn (n in 1..=3) with overflow flags, returning the full
    /// unshifted value
    fn set_mac(&mut self, which: usize, value: i64) -> i64 {
        const LIMIT: i64 = 1 << 43;
        if value >= LIMIT {
            self.set_flag(1 << (31 - which as u32));
        } else if value < -LIMIT {
            self.set_flag(1 << (28 - which as u32));
        }
        self.regs[dreg::MAC0 + which] = value as i32 as u32;
        value
    }

    fn set_mac0(&mut self, value: i64) -> i64 {
        const LIMIT: i64 = 1 << 31;
        if value >= LIMIT {
            self.set_flag(flag::MAC0_POSITIVE);
        } else if value < -LIMIT {
            self.set_flag(flag::MAC0_NEGATIVE);
        }
        self.regs[dreg::MAC0] = value as i32 as u32;
        value
    }

    /// Saturate into IRn (n in 1..=3), updating the ORGB mirror
    fn saturate_ir(&mut self, which: usize, value: i32, lm: bool) -> i32 {
        let low = if lm { 0 } else { -0x8000 };
        let clamped = value.clamp(low, 0x7FFF);
        if clamped != value {
            self.set_flag(1 << (25 - which as u32));
        }
        self.regs[dreg::IR0 + which] = clamped as u32;
        self.update_orgb();
        clamped
    }

    /// Saturation check without a register write (MVMVA's discarded first
    /// product, the interpolation temporaries)
    fn flag_ir_range(&mut self, which: usize, value: i64, lm: bool) -> i32 {
        let low: i64 = if lm { 0 } else { -0x8000 };
        let clamped = value.clamp(low, 0x7FFF);
        if clamped != value {
            self.set_flag(1 << (25 - which as u32));
        }
        clamped as i32
    }

    fn saturate_ir0(&mut self, value: i64) -> i32 {
        let clamped = value.clamp(0, 0x1000);
        if clamped != value {
            self.set_flag(flag::IR0_SATURATED);
        }
        self.regs[dreg::IR0] = clamped as u32;
        clamped as i32
    }

    fn saturate_sz3(&mut self, value: i64) -> u32 {
        let clamped = value.clamp(0, 0xFFFF);
        if clamped != value {
            self.set_flag(flag::OTZ_SATURATED);
        }
        clamped as u32
    }

    fn saturate_otz(&mut self, value: i64) {
        let clamped = value.clamp(0, 0xFFFF);
        if clamped != value {
            self.set_flag(flag::OTZ_SATURATED);
        }
        self.regs[dreg::OTZ] = clamped as u32;
    }

    fn saturate_sx2(&mut self, value: i64) -> i32 {
        let clamped = value.clamp(-0x400, 0x3FF);
        if clamped != value {
            self.set_flag(flag::SX2_SATURATED);
        }
        clamped as i32
    }

    fn saturate_sy2(&mut self, value: i64) -> i32 {
        let clamped = value.clamp(-0x400, 0x3FF);
        if clamped != value {
            self.set_flag(flag::SY2_SATURATED);
        }
        clamped as i32
    }

    fn push_sxy(&mut self, x: i32, y: i32) {
        self.regs[dreg::SXY0] = self.regs[dreg::SXY0 + 1];
        self.regs[dreg::SXY0 + 1] = self.regs[dreg::SXY2];
        self.regs[dreg::SXY2] = ((x as u32) & 0xFFFF) | ((y as u32) << 16);
    }

    fn push_sz(&mut self, z: u32) {
        self.regs[dreg::SZ0] = self.regs[dreg::SZ0 + 1];
        self.regs[dreg::SZ0 + 1] = self.regs[dreg::SZ0 + 2];
        self.regs[dreg::SZ0 + 2] = self.regs[dreg::SZ3];
        self.regs[dreg::SZ3] = z & 0xFFFF;
    }

    /// Push MAC1..3 >> 4 into the color FIFO with per-component saturation
    fn push_color_from_mac(&mut self) {
        let (r, g, b) = (
            self.regs[dreg::MAC1] as i32 >> 4,
            self.regs[dreg::MAC1 + 1] as i32 >> 4,
            self.regs[dreg::MAC1 + 2] as i32 >> 4,
        );

        let r = self.clamp_color(r, flag::FIFO_R_SATURATED);
        let g = self.clamp_color(g, flag::FIFO_G_SATURATED);
        let b = self.clamp_color(b, flag::FIFO_B_SATURATED);
        let code = self.regs[6] & 0xFF00_0000;

        self.regs[dreg::RGB0] = self.regs[dreg::RGB0 + 1];
        self.regs[dreg::RGB0 + 1] = self.regs[dreg::RGB2];
        self.regs[dreg::RGB2] = code | (b << 16) | (g << 8) | r;
    }

    fn clamp_color(&mut self, value: i32, overflow_flag: u32) -> u32 {
        let clamped = value.clamp(0, 0xFF);
        if clamped != value {
            self.set_flag(overflow_flag);
        }
        clamped as u32
    }

    fn update_orgb(&mut self) {
        let r = ((self.regs[9] as i32) / 0x80).clamp(0, 0x1F) as u32;
        let g = ((self.regs[10] as i32) / 0x80).clamp(0, 0x1F) as u32;
        let b = ((self.regs[11] as i32) / 0x80).clamp(0, 0x1F) as u32;
        self.regs[dreg::IRGB] = r | (g << 5) | (b << 10);
    }

    /// UNR reciprocal division with the overflow flag
    fn divide(&mut self, h: u32, sz: u32) -> u32 {
        match divider::unr_divide_raw(h, sz) {
            Some(quotient) => quotient,
            None => {
                self.set_flag(flag::DIV_OVERFLOW);
                0x1FFFF
            }
        }
    }
}

impl Default for Gte {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_clears_flags_before_execution() {
        let mut gte = Gte::new();
        gte.regs[creg::FLAG] = 0xFFFF_F000;
        // AVSZ3 with zero inputs sets no flags
        gte.command(0x2D, 0);
        assert_eq!(gte.read_control(31), 0);
    }

    #[test]
    fn test_flag_bit31_is_or_reduction() {
        let mut gte = Gte::new();
        gte.write_control(31, 0); // clear
        gte.regs[creg::FLAG] = flag::DIV_OVERFLOW; // bit 17
        let value = gte.read_control(31);
        assert_ne!(value & (1 << 31), 0);

        gte.regs[creg::FLAG] = flag::IR0_SATURATED; // bit 12, outside the mask
        let value = gte.read_control(31);
        assert_eq!(value & (1 << 31), 0);
    }

    #[test]
    fn test_ir_reads_sign_extend() {
        let mut gte = Gte::new();
        gte.write_data(9, 0xFFFF_8000);
        assert_eq!(gte.read_data(9), 0xFFFF_8000);
        gte.write_data(11, 0x7FFF);
        assert_eq!(gte.read_data(11), 0x7FFF);
    }

    #[test]
    fn test_h_reads_sign_extended_despite_being_unsigned() {
        let mut gte = Gte::new();
        gte.write_control((creg::H - 32) as u8, 0x9000);
        assert_eq!(gte.read_control((creg::H - 32) as u8), 0xFFFF_9000);
    }

    #[test]
    fn test_sxyp_write_pushes_fifo() {
        let mut gte = Gte::new();
        gte.write_data(15, 0x0001_0002);
        gte.write_data(15, 0x0003_0004);
        gte.write_data(15, 0x0005_0006);
        assert_eq!(gte.read_data(12), 0x0001_0002);
        assert_eq!(gte.read_data(13), 0x0003_0004);
        assert_eq!(gte.read_data(14), 0x0005_0006);
        // Reading SXYP mirrors SXY2
        assert_eq!(gte.read_data(15), 0x0005_0006);
    }

    #[test]
    fn test_irgb_write_expands_to_ir() {
        let mut gte = Gte::new();
        gte.write_data(28, 0x7FFF);
        assert_eq!(gte.read_data(9), 0x1F * 0x80);
        assert_eq!(gte.read_data(10), 0x1F * 0x80);
        assert_eq!(gte.read_data(11), 0x1F * 0x80);
        assert_eq!(gte.read_data(29), 0x7FFF);
    }

    #[test]
    fn test_lzcs_counts_leading_bits() {
        let mut gte = Gte::new();
        gte.write_data(30, 0x0000_0001);
        assert_eq!(gte.read_data(31), 31);
        gte.write_data(30, 0xFFFF_FFFE);
        assert_eq!(gte.read_data(31), 31);
        gte.write_data(30, 0);
        assert_eq!(gte.read_data(31), 32);
        gte.write_data(30, 0xFFFF_FFFF);
        assert_eq!(gte.read_data(31), 32);
    }

    #[test]
    fn test_orgb_and_lzcr_are_read_only() {
        let mut gte = Gte::new();
        gte.write_data(29, 0x1234);
        gte.write_data(31, 0x5678);
        assert_eq!(gte.regs[dreg::IRGB], 0);
        assert_eq!(gte.regs[dreg::LZCR], 0);
    }

    #[test]
    fn test_interlock_armed_by_command() {
        let mut gte = Gte::new();
        gte.command(0x01, 100); // RTPS takes 15 cycles
        assert_eq!(gte.interlock_until(), 115);
    }
}
