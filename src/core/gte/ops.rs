// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! GTE command implementations
//!
//! Formulas follow the no$psx documentation. MAC sums run through the
//! 44-bit overflow chain; IR/SZ/SXY/color results saturate with their
//! sticky flags.

use super::{dreg, CommandWord, Gte};

impl Gte {
    /// Shared matrix * vector + translation, storing MAC1..3 and IR1..3
    ///
    /// `translation` is pre-scaled (already shifted by 12 where the formula
    /// wants it).
    fn mac_transform(
        &mut self,
        translation: [i64; 3],
        matrix: [[i32; 3]; 3],
        vector: [i32; 3],
        sf: u32,
        lm: bool,
    ) {
        for row in 0..3 {
            let which = row + 1;
            let mut sum = self.check_mac(
                which,
                translation[row] + matrix[row][0] as i64 * vector[0] as i64,
            );
            sum = self.check_mac(which, sum + matrix[row][1] as i64 * vector[1] as i64);
            sum = self.check_mac(which, sum + matrix[row][2] as i64 * vector[2] as i64);
            let mac = self.set_mac(which, sum >> (sf * 12));
            self.saturate_ir(which, mac as i32, lm);
        }
    }

    /// Depth-cue interpolation towards the far color:
    /// `MAC = MAC + (FC SHL 12 - MAC) * IR0`, then shift/saturate/push
    fn interpolate_to_far_color(&mut self, mac: [i64; 3], sf: u32, lm: bool) {
        let fc = self.far_color();
        let ir0 = self.ir0() as i64;

        let mut shifted = [0i64; 3];
        for row in 0..3 {
            let which = row + 1;
            let diff = self.check_mac(which, (fc[row] << 12) - mac[row]);
            // The temporary saturates ignoring lm
            let temp = self.flag_ir_range(which, diff >> (sf * 12), false) as i64;
            let sum = self.check_mac(which, mac[row] + temp * ir0);
            shifted[row] = self.set_mac(which, sum >> (sf * 12));
        }

        for row in 0..3 {
            self.saturate_ir(row + 1, shifted[row] as i32, lm);
        }
        self.push_color_from_mac();
    }

    /// Perspective transform of one vertex; depth cueing runs when
    /// `depth_cue` (RTPS always, RTPT only for the last vertex)
    fn rtp_single(&mut self, cmd: CommandWord, vertex_index: usize, depth_cue: bool) {
        let sf = cmd.sf();
        let lm = cmd.lm();

        let tr = self.translation();
        let rt = self.rotation();
        let v = self.vertex(vertex_index);

        for row in 0..2 {
            let which = row + 1;
            let mut sum =
                self.check_mac(which, (tr[row] << 12) + rt[row][0] as i64 * v[0] as i64);
            sum = self.check_mac(which, sum + rt[row][1] as i64 * v[1] as i64);
            sum = self.check_mac(which, sum + rt[row][2] as i64 * v[2] as i64);
            let mac = self.set_mac(which, sum >> (sf * 12));
            self.saturate_ir(which, mac as i32, lm);
        }

        // The third row keeps its unshifted sum: SZ3 comes from
        // MAC3 >> 12 regardless of the shift-fraction selector
        let mut sum3 = self.check_mac(3, (tr[2] << 12) + rt[2][0] as i64 * v[0] as i64);
        sum3 = self.check_mac(3, sum3 + rt[2][1] as i64 * v[1] as i64);
        sum3 = self.check_mac(3, sum3 + rt[2][2] as i64 * v[2] as i64);
        let mac3 = self.set_mac(3, sum3 >> (sf * 12));

        // IR3 saturation flags follow the 12-bit-shifted value, the stored
        // result clamps the stored MAC3
        let fract = sum3 >> 12;
        if !(-0x8000..=0x7FFF).contains(&fract) {
            self.set_flag(1 << 22);
        }
        let low = if lm { 0 } else { -0x8000 };
        let ir3 = (mac3 as i32).clamp(low, 0x7FFF);
        self.regs[dreg::IR0 + 3] = ir3 as u32;
        self.update_orgb();

        let sz3 = self.saturate_sz3(sum3 >> 12);
        self.push_sz(sz3);

        let h = self.regs[super::creg::H] & 0xFFFF;
        let div = self.divide(h, sz3) as i64;

        let ofx = self.regs[super::creg::OFX] as i32 as i64;
        let ofy = self.regs[super::creg::OFY] as i32 as i64;
        let ir1 = self.regs[dreg::IR1] as i32 as i64;
        let ir2 = self.regs[dreg::IR1 + 1] as i32 as i64;

        let mac0 = self.set_mac0(div * ir1 + ofx);
        let sx2 = self.saturate_sx2(mac0 >> 16);
        let mac0 = self.set_mac0(div * ir2 + ofy);
        let sy2 = self.saturate_sy2(mac0 >> 16);
        self.push_sxy(sx2, sy2);

        if depth_cue {
            let dqa = super::lo16(self.regs[super::creg::DQA]) as i64;
            let dqb = self.regs[super::creg::DQB] as i32 as i64;
            let mac0 = self.set_mac0(div * dqa + dqb);
            self.saturate_ir0(mac0 >> 12);
        }
    }

    pub(super) fn rtps(&mut self, cmd: CommandWord) {
        self.rtp_single(cmd, 0, true);
    }

    pub(super) fn rtpt(&mut self, cmd: CommandWord) {
        self.rtp_single(cmd, 0, false);
        self.rtp_single(cmd, 1, false);
        self.rtp_single(cmd, 2, true);
    }

    /// Winding of the screen-XY triangle (sign selects front/back face)
    pub(super) fn nclip(&mut self) {
        let (x0, y0) = (
            super::lo16(self.regs[dreg::SXY0]) as i64,
            super::hi16(self.regs[dreg::SXY0]) as i64,
        );
        let (x1, y1) = (
            super::lo16(self.regs[dreg::SXY0 + 1]) as i64,
            super::hi16(self.regs[dreg::SXY0 + 1]) as i64,
        );
        let (x2, y2) = (
            super::lo16(self.regs[dreg::SXY2]) as i64,
            super::hi16(self.regs[dreg::SXY2]) as i64,
        );

        self.set_mac0(x0 * y1 + x1 * y2 + x2 * y0 - x0 * y2 - x1 * y0 - x2 * y1);
    }

    /// Cross product of IR with the rotation-matrix diagonal
    pub(super) fn op(&mut self, cmd: CommandWord) {
        let sf = cmd.sf();
        let lm = cmd.lm();

        let rt = self.rotation();
        let (d1, d2, d3) = (rt[0][0] as i64, rt[1][1] as i64, rt[2][2] as i64);
        let [ir1, ir2, ir3] = self.ir_vector().map(|v| v as i64);

        let products = [
            ir3 * d2 - ir2 * d3,
            ir1 * d3 - ir3 * d1,
            ir2 * d1 - ir1 * d2,
        ];

        for (row, product) in products.into_iter().enumerate() {
            let which = row + 1;
            let checked = self.check_mac(which, product);
            let mac = self.set_mac(which, checked >> (sf * 12));
            self.saturate_ir(which, mac as i32, lm);
        }
    }

    /// Depth cue the working color (`use_fifo` takes RGB0 instead of RGBC)
    pub(super) fn dpcs(&mut self, cmd: CommandWord, use_fifo: bool) {
        let source = if use_fifo {
            self.regs[dreg::RGB0]
        } else {
            self.regs[6]
        };
        let (r, g, b) = (
            (source & 0xFF) as i64,
            ((source >> 8) & 0xFF) as i64,
            ((source >> 16) & 0xFF) as i64,
        );

        let mac = [r << 16, g << 16, b << 16];
        for (row, value) in mac.into_iter().enumerate() {
            self.set_mac(row + 1, value);
        }
        self.interpolate_to_far_color(mac, cmd.sf(), cmd.lm());
    }

    pub(super) fn dpct(&mut self, cmd: CommandWord) {
        for _ in 0..3 {
            self.dpcs(cmd, true);
        }
    }

    /// Interpolate IR towards the far color
    pub(super) fn intpl(&mut self, cmd: CommandWord) {
        let [ir1, ir2, ir3] = self.ir_vector().map(|v| v as i64);
        let mac = [ir1 << 12, ir2 << 12, ir3 << 12];
        for (row, value) in mac.into_iter().enumerate() {
            self.set_mac(row + 1, value);
        }
        self.interpolate_to_far_color(mac, cmd.sf(), cmd.lm());
    }

    /// Generic matrix * vector + translation
    pub(super) fn mvmva(&mut self, cmd: CommandWord) {
        let sf = cmd.sf();
        let lm = cmd.lm();

        let matrix = match cmd.matrix() {
            0 => self.rotation(),
            1 => self.light(),
            2 => self.light_color(),
            _ => {
                // Selector 3 reads garbage: a matrix built from the color
                // value and stray rotation cells
                let (r, ..) = self.rgbc();
                let rt = self.rotation();
                [
                    [-((r as i32) << 4), (r as i32) << 4, self.ir0()],
                    [rt[0][2], rt[0][2], rt[0][2]],
                    [rt[1][1], rt[1][1], rt[1][1]],
                ]
            }
        };

        let vector = match cmd.vector() {
            0 => self.vertex(0),
            1 => self.vertex(1),
            2 => self.vertex(2),
            _ => self.ir_vector(),
        };

        match cmd.translation() {
            0 => {
                let tr = self.translation().map(|t| t << 12);
                self.mac_transform(tr, matrix, vector, sf, lm);
            }
            1 => {
                let bk = self.background_color().map(|t| t << 12);
                self.mac_transform(bk, matrix, vector, sf, lm);
            }
            2 => {
                // Far-color translation is broken in silicon: the first
                // product saturates into the flags and is discarded, the
                // result keeps only the last two products
                let fc = self.far_color();
                for row in 0..3 {
                    let which = row + 1;
                    let first = self.check_mac(
                        which,
                        (fc[row] << 12) + matrix[row][0] as i64 * vector[0] as i64,
                    );
                    self.flag_ir_range(which, first >> (sf * 12), false);

                    let mut sum =
                        self.check_mac(which, matrix[row][1] as i64 * vector[1] as i64);
                    sum = self.check_mac(which, sum + matrix[row][2] as i64 * vector[2] as i64);
                    let mac = self.set_mac(which, sum >> (sf * 12));
                    self.saturate_ir(which, mac as i32, lm);
                }
            }
            _ => {
                self.mac_transform([0, 0, 0], matrix, vector, sf, lm);
            }
        }
    }

    /// Light a vertex normal: MAC = light-matrix * V, then the color matrix
    /// against the background color
    fn normal_color_base(&mut self, cmd: CommandWord, vertex_index: usize) {
        let sf = cmd.sf();
        let lm = cmd.lm();

        let llm = self.light();
        let v = self.vertex(vertex_index);
        self.mac_transform([0, 0, 0], llm, v, sf, lm);

        let lcm = self.light_color();
        let bk = self.background_color().map(|t| t << 12);
        let ir = self.ir_vector();
        self.mac_transform(bk, lcm, ir, sf, lm);
    }

    pub(super) fn ncs(&mut self, cmd: CommandWord, vertex_index: usize) {
        self.normal_color_base(cmd, vertex_index);
        self.push_color_from_mac();
    }

    pub(super) fn nct(&mut self, cmd: CommandWord) {
        for vertex in 0..3 {
            self.ncs(cmd, vertex);
        }
    }

    /// Multiply the lit normal by the working color
    fn apply_primary_color(&mut self, sf: u32) -> [i64; 3] {
        let (r, g, b, _) = self.rgbc();
        let [ir1, ir2, ir3] = self.ir_vector().map(|v| v as i64);

        let mut shifted = [0i64; 3];
        let products = [(r << 4) * ir1, (g << 4) * ir2, (b << 4) * ir3];
        for (row, product) in products.into_iter().enumerate() {
            let which = row + 1;
            let checked = self.check_mac(which, product);
            shifted[row] = checked;
            self.set_mac(which, checked >> (sf * 12));
        }
        shifted
    }

    pub(super) fn nccs(&mut self, cmd: CommandWord, vertex_index: usize) {
        self.normal_color_base(cmd, vertex_index);
        let sf = cmd.sf();
        let lm = cmd.lm();
        self.apply_primary_color(sf);
        let mac = self.mac_vector();
        for row in 0..3 {
            self.saturate_ir(row + 1, mac[row] as i32, lm);
        }
        self.push_color_from_mac();
    }

    pub(super) fn ncct(&mut self, cmd: CommandWord) {
        for vertex in 0..3 {
            self.nccs(cmd, vertex);
        }
    }

    pub(super) fn ncds(&mut self, cmd: CommandWord, vertex_index: usize) {
        self.normal_color_base(cmd, vertex_index);
        let unshifted = self.apply_primary_color(0);
        self.interpolate_to_far_color(unshifted, cmd.sf(), cmd.lm());
    }

    pub(super) fn ncdt(&mut self, cmd: CommandWord) {
        for vertex in 0..3 {
            self.ncds(cmd, vertex);
        }
    }

    /// Color the current IR vector (no light matrix pass)
    pub(super) fn cc(&mut self, cmd: CommandWord) {
        let sf = cmd.sf();
        let lm = cmd.lm();

        let lcm = self.light_color();
        let bk = self.background_color().map(|t| t << 12);
        let ir = self.ir_vector();
        self.mac_transform(bk, lcm, ir, sf, lm);

        self.apply_primary_color(sf);
        let mac = self.mac_vector();
        for row in 0..3 {
            self.saturate_ir(row + 1, mac[row] as i32, lm);
        }
        self.push_color_from_mac();
    }

    pub(super) fn cdp(&mut self, cmd: CommandWord) {
        let sf = cmd.sf();
        let lm = cmd.lm();

        let lcm = self.light_color();
        let bk = self.background_color().map(|t| t << 12);
        let ir = self.ir_vector();
        self.mac_transform(bk, lcm, ir, sf, lm);

        let unshifted = self.apply_primary_color(0);
        self.interpolate_to_far_color(unshifted, sf, lm);
    }

    /// Depth cue the working color against the light (RGB * IR then far
    /// color)
    pub(super) fn dpcl(&mut self, cmd: CommandWord) {
        let unshifted = self.apply_primary_color(0);
        self.interpolate_to_far_color(unshifted, cmd.sf(), cmd.lm());
    }

    /// Square of the IR vector (results are non-negative, lm is moot)
    pub(super) fn sqr(&mut self, cmd: CommandWord) {
        let sf = cmd.sf();
        let lm = cmd.lm();

        let ir = self.ir_vector();
        for row in 0..3 {
            let which = row + 1;
            let product = ir[row] as i64 * ir[row] as i64;
            let mac = self.set_mac(which, product >> (sf * 12));
            self.saturate_ir(which, mac as i32, lm);
        }
    }

    pub(super) fn avsz3(&mut self) {
        let zsf3 = super::lo16(self.regs[super::creg::ZSF3]) as i64;
        let sum = (self.regs[dreg::SZ0 + 1] & 0xFFFF) as i64
            + (self.regs[dreg::SZ0 + 2] & 0xFFFF) as i64
            + (self.regs[dreg::SZ3] & 0xFFFF) as i64;
        let mac0 = self.set_mac0(zsf3 * sum);
        self.saturate_otz(mac0 >> 12);
    }

    pub(super) fn avsz4(&mut self) {
        let zsf4 = super::lo16(self.regs[super::creg::ZSF4]) as i64;
        let sum = (self.regs[dreg::SZ0] & 0xFFFF) as i64
            + (self.regs[dreg::SZ0 + 1] & 0xFFFF) as i64
            + (self.regs[dreg::SZ0 + 2] & 0xFFFF) as i64
            + (self.regs[dreg::SZ3] & 0xFFFF) as i64;
        let mac0 = self.set_mac0(zsf4 * sum);
        self.saturate_otz(mac0 >> 12);
    }

    /// General-purpose interpolation: MAC = IR * IR0
    pub(super) fn gpf(&mut self, cmd: CommandWord) {
        let sf = cmd.sf();
        let lm = cmd.lm();
        let ir0 = self.ir0() as i64;
        let ir = self.ir_vector();

        for row in 0..3 {
            let which = row + 1;
            let product = ir[row] as i64 * ir0;
            let mac = self.set_mac(which, product >> (sf * 12));
            self.saturate_ir(which, mac as i32, lm);
        }
        self.push_color_from_mac();
    }

    /// Interpolation with base: MAC = (MAC SHL sf*12) + IR * IR0
    pub(super) fn gpl(&mut self, cmd: CommandWord) {
        let sf = cmd.sf();
        let lm = cmd.lm();
        let ir0 = self.ir0() as i64;
        let ir = self.ir_vector();
        let mac = self.mac_vector();

        for row in 0..3 {
            let which = row + 1;
            let base = self.check_mac(which, mac[row] << (sf * 12));
            let sum = self.check_mac(which, base + ir[row] as i64 * ir0);
            let shifted = self.set_mac(which, sum >> (sf * 12));
            self.saturate_ir(which, shifted as i32, lm);
        }
        self.push_color_from_mac();
    }
}

#[cfg(test)]
mod tests {
    use super::super::Gte;

    /// Identity rotation, H = 0x100, projection sandbox used by the RTPS
    /// tests
    fn gte_with_identity_setup() -> Gte {
        let mut gte = Gte::new();
        // RT = identity * 0x1000 (1.0 in 4.12)
        gte.write_control(0, 0x1000); // RT11=0x1000, RT12=0
        gte.write_control(1, 0);
        gte.write_control(2, 0x1000); // RT22 in word2 low half
        gte.write_control(3, 0);
        gte.write_control(4, 0x1000); // RT33
        gte.write_control(26, 0x100); // H
        gte
    }

    #[test]
    fn test_rtps_pushes_unshifted_sz() {
        // sf=1: IR results shift by 12, SZ3 must still come from MAC3>>12
        let mut gte = gte_with_identity_setup();
        gte.write_data(0, 0); // VX0=0, VY0=0
        gte.write_data(1, 0x0200); // VZ0=0x200

        gte.command((1 << 19) | 0x01, 0); // RTPS, sf=1
        assert_eq!(gte.read_data(19), 0x200, "SZ3 = MAC3 fraction");
        // And with sf=0 the same SZ3 lands
        let mut gte = gte_with_identity_setup();
        gte.write_data(0, 0);
        gte.write_data(1, 0x0200);
        gte.command(0x01, 0);
        assert_eq!(gte.read_data(19), 0x200);
    }

    #[test]
    fn test_rtps_depth_cue_unity() {
        // h == sz: the divider returns 1.0 and IR0 = DQA + DQB>>12 shape
        let mut gte = gte_with_identity_setup();
        gte.write_data(0, 0);
        gte.write_data(1, 0x0100); // VZ0 == H
        gte.write_control(27, 0x1000); // DQA
        gte.write_control(28, 0); // DQB

        gte.command((1 << 19) | 0x01, 0);
        // MAC0 = 0x10000 * 0x1000; IR0 = MAC0>>12 clamped to 0x1000
        assert_eq!(gte.read_data(8), 0x1000);
    }

    #[test]
    fn test_rtps_divide_overflow_sets_flag() {
        let mut gte = gte_with_identity_setup();
        gte.write_control(26, 0xFFFF); // H far beyond 2*SZ3
        gte.write_data(0, 0);
        gte.write_data(1, 0x10); // small z

        gte.command((1 << 19) | 0x01, 0);
        let flags = gte.read_control(31);
        assert_ne!(flags & (1 << 17), 0, "div_overflow latches");
        assert_ne!(flags & (1 << 31), 0, "summary bit follows");
    }

    #[test]
    fn test_nclip_sign() {
        let mut gte = Gte::new();
        // Counter-clockwise triangle: (0,0), (10,0), (0,10)
        gte.write_data(12, 0x0000_0000);
        gte.write_data(13, 0x0000_000A);
        gte.write_data(14, 0x000A_0000);
        gte.command(0x06, 0);
        assert_eq!(gte.read_data(24) as i32, 100);

        // Swap two vertices: the winding (and sign) flips
        gte.write_data(12, 0x0000_000A);
        gte.write_data(13, 0x0000_0000);
        gte.command(0x06, 0);
        assert_eq!(gte.read_data(24) as i32, -100);
    }

    #[test]
    fn test_sqr_squares_ir() {
        let mut gte = Gte::new();
        gte.write_data(9, 0x100);
        gte.write_data(10, 0xFFFF_FFF0u32); // -0x10
        gte.write_data(11, 3);

        gte.command(0x28, 0); // SQR, sf=0
        assert_eq!(gte.read_data(25), 0x10000);
        assert_eq!(gte.read_data(26), 0x100);
        assert_eq!(gte.read_data(27), 9);
    }

    #[test]
    fn test_avsz3_weighted_average() {
        let mut gte = Gte::new();
        gte.write_data(17, 0x1000); // SZ1
        gte.write_data(18, 0x2000); // SZ2
        gte.write_data(19, 0x3000); // SZ3
        gte.write_control(29, 0x555); // ZSF3 ~ 1/3 in 4.12

        gte.command(0x2D, 0);
        // MAC0 = 0x555 * 0x6000 = 0x1FFE000; OTZ = >>12 = 0x1FFE
        assert_eq!(gte.read_data(24), 0x1FFE000);
        assert_eq!(gte.read_data(7), 0x1FFE);
    }

    #[test]
    fn test_avsz4_saturates_otz() {
        let mut gte = Gte::new();
        for reg in 16..=19 {
            gte.write_data(reg, 0xFFFF);
        }
        gte.write_control(30, 0x7FFF); // ZSF4 large

        gte.command(0x2E, 0);
        assert_eq!(gte.read_data(7), 0xFFFF);
        assert_ne!(gte.read_control(31) & (1 << 18), 0, "otz saturation flag");
    }

    #[test]
    fn test_gpf_interpolates_and_pushes_color() {
        let mut gte = Gte::new();
        gte.write_data(8, 0x1000); // IR0 = 1.0
        gte.write_data(9, 0x40 << 4);
        gte.write_data(10, 0x80 << 4);
        gte.write_data(11, 0xFF << 4);
        gte.write_data(6, 0x2000_0000); // code byte 0x20

        gte.command((1 << 19) | 0x3D, 0); // GPF sf=1
        // MAC = IR*0x1000 >> 12 = IR; color = MAC >> 4
        assert_eq!(gte.read_data(22), 0x2000_0000 | 0xFF << 16 | 0x80 << 8 | 0x40);
    }

    #[test]
    fn test_mac_overflow_flags_44_bits() {
        let mut gte = Gte::new();
        // IR1 = 0x7FFF, IR0 = 0x7FFF (via direct write they stay 16-bit)
        gte.write_data(9, 0x7FFF);
        gte.write_data(8, 0x7FFF);
        // GPL with MAC1 primed huge: shifting left by 12 overflows 44 bits
        gte.write_data(25, 0x7FFF_FFFF);
        gte.command((1 << 19) | 0x3E, 0); // GPL sf=1

        let flags = gte.read_control(31);
        assert_ne!(flags & (1 << 30), 0, "MAC1 positive overflow");
    }

    #[test]
    fn test_ir_saturation_modes() {
        let mut gte = Gte::new();
        gte.write_data(9, 0xFFFF_F000u32); // IR1 negative
        gte.write_data(8, 0x1000); // IR0 = 1.0

        // lm=1 clamps negatives to zero
        gte.command((1 << 19) | (1 << 10) | 0x3D, 0); // GPF sf=1 lm=1
        assert_eq!(gte.read_data(9), 0);
        assert_ne!(gte.read_control(31) & (1 << 24), 0, "IR1 saturation flag");
    }
}
