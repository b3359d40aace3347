// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! System integration and the outer run loop
//!
//! One step of the outer loop either advances a DMA transfer by one word
//! (while a burn-down is active) or fetches and executes one CPU
//! instruction. Afterwards the bus reports the cycles consumed, the
//! scheduler advances by that amount dispatching due events, and deferred
//! kernel callbacks drain. "Run until breakpoint" exits on a hardware PC
//! breakpoint, the stopped flag, or one completed VBlank.

use std::path::Path;

use crate::core::config::{ControllerKind, SystemConfig};
use crate::core::cpu::{Cpu, StepResult};
use crate::core::error::{EmulatorError, Result};
use crate::core::jit::CodeCache;
use crate::core::kernel::{cdfs, exe, Kernel};
use crate::core::memory::Bus;
use crate::core::sio::controller::StandardController;
use crate::core::sio::memcard::MemoryCard;
use crate::core::sio::pad_card::PadCardDriver;

/// Index-bucket granularity for the (data-only) JIT block cache
const CODE_CACHE_BUCKET: u32 = 0x1000;

/// Warm-up bound for EXE loading: if the BIOS never reaches its idle
/// state in this many steps, the image is not a usable kernel
const EXE_WARMUP_MAX_STEPS: u64 = 200_000_000;

/// One emulated PS1
pub struct System {
    cpu: Cpu,
    bus: Bus,
    kernel: Kernel,
    code_cache: CodeCache,

    hbreaks: Vec<u32>,
    break_enable: bool,
    stopped: bool,

    config: SystemConfig,
}

impl System {
    /// Build a machine from configuration, loading the BIOS from disk
    pub fn new(config: SystemConfig) -> Result<Self> {
        let bios = std::fs::read(&config.bios_path).map_err(|err| {
            EmulatorError::BiosError(format!("{}: {err}", config.bios_path))
        })?;
        Self::with_bios_image(config, &bios)
    }

    /// Build a machine around an in-memory BIOS image
    pub fn with_bios_image(config: SystemConfig, bios: &[u8]) -> Result<Self> {
        let mut bus = Bus::new()?;
        bus.load_bios(bios)?;

        let mut kernel = Kernel::new();
        kernel.set_hle_enabled(config.enable_hle);
        kernel.set_syscall_logging(config.logger.log_syscalls);
        for name in &config.logger.silence_syscalls {
            kernel.silence_syscall(name);
        }

        let mut system = Self {
            cpu: Cpu::new(),
            bus,
            kernel,
            code_cache: CodeCache::new(CODE_CACHE_BUCKET)?,
            hbreaks: Vec::new(),
            break_enable: config.enable_breakpoints,
            stopped: false,
            config,
        };

        // Both pad ports carry a driver even when empty, like the console
        system.bus.sio0.connect_slot1(Box::new(PadCardDriver::new()));
        system.bus.sio0.connect_slot2(Box::new(PadCardDriver::new()));

        if system.config.controller_1.connected {
            system.connect_controller(0, system.config.controller_1.kind);
        }
        if system.config.controller_2.connected {
            system.connect_controller(1, system.config.controller_2.kind);
        }
        if system.config.memcard_1.connected {
            let path = system.config.memcard_1.path.clone();
            system.connect_card(0, Path::new(&path))?;
        }
        if system.config.memcard_2.connected {
            let path = system.config.memcard_2.path.clone();
            system.connect_card(1, Path::new(&path))?;
        }
        if let Some(disc) = system.config.disc_path.clone() {
            system.insert_disc(Path::new(&disc))?;
        }

        log::debug!(
            "[SYSTEM] Kernel: {} {} ({})",
            system.kernel.kernel_maker(&mut system.bus),
            system.kernel.kernel_version(&mut system.bus),
            system.kernel.kernel_bcd_date(&mut system.bus),
        );

        system.reset_vector();
        Ok(system)
    }

    pub fn cpu(&self) -> &Cpu {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu {
        &mut self.cpu
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn kernel_mut(&mut self) -> &mut Kernel {
        &mut self.kernel
    }

    pub fn code_cache_mut(&mut self) -> &mut CodeCache {
        &mut self.code_cache
    }

    // ------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------

    fn slot_driver(&mut self, slot: u32) -> &mut PadCardDriver {
        let device = if slot == 0 {
            self.bus.sio0.slot1_mut()
        } else {
            self.bus.sio0.slot2_mut()
        };
        device
            .as_any()
            .downcast_mut::<PadCardDriver>()
            .expect("pad ports always carry the pad/card driver")
    }

    /// Plug a controller into a pad slot
    pub fn connect_controller(&mut self, slot: u32, kind: ControllerKind) {
        if slot > 1 {
            log::warn!("[SYSTEM] Invalid controller slot {slot}");
            return;
        }
        match kind {
            ControllerKind::None => {}
            ControllerKind::Standard => {
                self.slot_driver(slot)
                    .connect_controller(Box::new(StandardController::new()));
                log::info!("[SYSTEM] Standard controller in slot {slot}");
            }
        }
    }

    /// Connect a memory card image (created empty when missing)
    pub fn connect_card(&mut self, slot: u32, path: &Path) -> Result<()> {
        if slot > 1 {
            log::warn!("[SYSTEM] Invalid memory card slot {slot}");
            return Ok(());
        }
        let card = MemoryCard::load(path)?;
        self.slot_driver(slot).connect_card(Box::new(card));
        log::info!("[SYSTEM] Memory card {} in slot {slot}", path.display());
        Ok(())
    }

    /// Insert a cue/bin disc
    pub fn insert_disc(&mut self, path: &Path) -> Result<()> {
        self.bus.cdrom.insert_disc(path)?;
        log::info!("[SYSTEM] Disc {} inserted", path.display());

        if let Some(disc) = self.bus.cdrom.disc_mut() {
            if let Ok(license) = cdfs::read_license_string(disc) {
                log::info!("[SYSTEM] License string: {license}");
            }
            match cdfs::read_primary_volume(disc) {
                Ok(volume) => log::info!("[SYSTEM] Volume: {}", volume.volume_identifier),
                Err(err) => log::warn!("[SYSTEM] No ISO 9660 volume: {err}"),
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Jump the CPU back to the reset vector
    pub fn reset_vector(&mut self) {
        self.cpu.set_pc(crate::core::cpu::cop0::RESET_VECTOR);
    }

    pub fn set_stopped(&mut self, stopped: bool) {
        self.stopped = stopped;
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    pub fn add_hardware_break(&mut self, address: u32) {
        if !self.hbreaks.contains(&address) {
            self.hbreaks.push(address);
        }
    }

    pub fn remove_hardware_break(&mut self, address: u32) {
        self.hbreaks.retain(|&a| a != address);
    }

    pub fn set_breakpoints_enabled(&mut self, enabled: bool) {
        self.break_enable = enabled;
    }

    /// One step of the outer loop: a DMA word or a CPU instruction, then
    /// the scheduler and the deferred callbacks
    pub fn step(&mut self) {
        if self.bus.dma_active() {
            self.bus.advance_dma();
            self.bus.curr_cycles += 1;
        } else {
            let result = self.cpu.step(&mut self.bus);
            self.handle_step_result(result);
        }

        let cycles = std::mem::take(&mut self.bus.curr_cycles);
        self.bus.advance_time(cycles);

        self.kernel.drain_deferred();
    }

    fn handle_step_result(&mut self, result: StepResult) {
        match result {
            StepResult::Normal => {}
            StepResult::VectorCall { vector } => {
                let enter = self
                    .kernel
                    .on_vector_call(&mut self.cpu, &mut self.bus, vector);
                if enter {
                    self.kernel.record_frame(&mut self.cpu, vector);
                } else {
                    // Handled in host code: skip the ROM and resume at the
                    // caller's return address
                    let return_pc = self.cpu.reg(31);
                    self.cpu.set_pc(return_pc);
                }
            }
            StepResult::VectorReturn { address } => {
                self.kernel
                    .on_vector_return(&mut self.cpu, &mut self.bus, address);
            }
        }
    }

    /// Execute a fixed number of steps
    pub fn run_steps(&mut self, count: u64) {
        for _ in 0..count {
            self.step();
        }
    }

    /// Run until a hardware PC breakpoint (true), the stopped flag, or
    /// one completed VBlank (false)
    pub fn run_until_breakpoint(&mut self) -> bool {
        loop {
            self.step();

            if self.stopped {
                return false;
            }
            if self.bus.gpu.take_vblank() {
                return false;
            }
            if self.break_enable && self.hbreaks.contains(&self.cpu.pc()) {
                return true;
            }
        }
    }

    /// Load and launch a PS-EXE
    ///
    /// The BIOS runs first until its timer/VBlank dispatcher is installed
    /// (exit hook on `EnqueueTimerAndVBlankIrqs`), then the image replaces
    /// the shell.
    pub fn load_exe(&mut self, path: &Path, args: Option<&[u8]>) -> Result<()> {
        let image = std::fs::read(path)
            .map_err(|err| EmulatorError::LoaderError(format!("{}: {err}", path.display())))?;
        self.load_exe_image(&image, args)
    }

    /// In-memory variant of [`System::load_exe`]
    pub fn load_exe_image(&mut self, image: &[u8], args: Option<&[u8]>) -> Result<()> {
        use std::cell::Cell;
        use std::rc::Rc;

        let header = exe::ExeHeader::parse(image)?;

        let ready = Rc::new(Cell::new(false));
        let flag = ready.clone();
        let hook = self.kernel.insert_exit_hook(
            0xC00,
            Box::new(move |_, _, _| flag.set(true)),
        );
        self.kernel.set_hooks_enabled(true);

        let mut steps: u64 = 0;
        while !ready.get() {
            self.step();
            steps += 1;
            if steps > EXE_WARMUP_MAX_STEPS {
                self.kernel.remove_exit_hook(hook);
                self.kernel.drain_deferred();
                return Err(EmulatorError::LoaderError(
                    "BIOS never reached its idle state; cannot launch executable".into(),
                ));
            }
        }

        self.kernel.remove_exit_hook(hook);
        self.kernel.drain_deferred();

        // Stale translations over the destination range die with the old
        // code
        self.code_cache
            .invalidate_range(header.dest_address, header.file_size);

        exe::load(&mut self.bus, &mut self.cpu, image, args)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interrupt::Interrupt;
    use crate::core::memory::region;

    fn test_config() -> SystemConfig {
        SystemConfig {
            controller_1: Default::default(),
            controller_2: Default::default(),
            memcard_1: Default::default(),
            memcard_2: Default::default(),
            disc_path: None,
            ..Default::default()
        }
    }

    fn system_with_bios(words: &[u32]) -> System {
        let mut image = vec![0u8; region::sizes::BIOS as usize];
        for (i, word) in words.iter().enumerate() {
            image[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        System::with_bios_image(test_config(), &image).unwrap()
    }

    #[test]
    fn test_reset_vector_entry() {
        // After construction PC sits at 0xBFC00000 and the first fetch
        // reads the first BIOS word
        let mut system = system_with_bios(&[0x3C08_1234]); // lui r8, 0x1234
        assert_eq!(system.cpu().pc(), 0xBFC0_0000);

        system.step();
        assert_eq!(system.cpu().pc(), 0xBFC0_0004);
        assert_eq!(system.cpu().reg(8), 0x1234_0000);
    }

    #[test]
    fn test_bios_size_rejected() {
        let err = System::with_bios_image(test_config(), &[0u8; 1024]);
        assert!(err.is_err());
    }

    #[test]
    fn test_cache_isolation_suppresses_stores() {
        let mut system = system_with_bios(&[0]);

        // Pre-store value in RAM
        system.bus_mut().poke::<u32>(0, 0x0BAD_F00D);

        // Program at 0x100: SW $1, 0($0) ; LW $2, 0($0) ; NOP
        let bus = system.bus_mut();
        bus.poke::<u32>(0x100, 0xAC01_0000);
        bus.poke::<u32>(0x104, 0x8C02_0000);
        bus.poke::<u32>(0x108, 0);
        bus.poke::<u32>(0x10C, 0);

        system.cpu_mut().set_pc(0x100);
        system.cpu_mut().set_reg(1, 0xDEAD_BEEF);
        // SR.isolate_cache
        system.cpu_mut().cop0.regs[crate::core::cpu::cop0::reg::SR] |= 1 << 16;

        system.run_steps(4);
        assert_eq!(
            system.cpu().reg(2),
            0x0BAD_F00D,
            "store must only touch the isolated cache"
        );

        // With isolation off the same store lands
        system.cpu_mut().cop0.regs[crate::core::cpu::cop0::reg::SR] &= !(1 << 16);
        system.cpu_mut().set_pc(0x100);
        system.run_steps(4);
        assert_eq!(system.cpu().reg(2), 0xDEAD_BEEF);
    }

    #[test]
    fn test_dma_otc_clear_via_outer_loop() {
        let mut system = system_with_bios(&[0]);

        // Enable DMA6 in DPCR, then program the channel:
        // MADR=0x100000, BCR=16, CHCR=start|decrement
        let bus = system.bus_mut();
        bus.poke::<u32>(0x1F80_10F0, 0x0F65_4321);
        bus.poke::<u32>(0x1F80_10E0, 0x10_0000);
        bus.poke::<u32>(0x1F80_10E4, 16);
        bus.poke::<u32>(0x1F80_10E8, (1 << 24) | (1 << 1));
        assert!(bus.dma_active());

        // The outer loop advances the transfer one word per step
        system.run_steps(16);
        assert!(!system.bus().dma_active());

        let bus = system.bus_mut();
        for i in 0..15u32 {
            let addr = 0x10_0000 - i * 4;
            assert_eq!(
                bus.peek::<u32>(addr),
                addr - 4,
                "entry 0x{addr:X} points at the previous entry"
            );
        }
        assert_eq!(bus.peek::<u32>(0x10_0000 - 15 * 4), 0xFF_FFFF);
    }

    #[test]
    fn test_timer2_overflow_interrupt() {
        let mut system = system_with_bios(&[0]);

        // TMR2: system clock source, IRQ on overflow, no repeat
        let bus = system.bus_mut();
        bus.poke::<u32>(0x1F80_1120, 0); // value
        bus.poke::<u32>(0x1F80_1128, 0); // target
        bus.poke::<u32>(0x1F80_1124, 1 << 5); // mode

        bus.advance_time(0x10000);

        assert_ne!(
            bus.peek::<u32>(0x1F80_1070) & Interrupt::TIMER2.bits(),
            0,
            "I_STAT bit 6 after 0x10000 cycles"
        );
        let mode = bus.peek::<u32>(0x1F80_1124);
        assert_ne!(mode & (1 << 12), 0, "overflow latch in TMR2 mode");
    }

    #[test]
    fn test_vector_call_records_frame_and_returns() {
        let mut system = system_with_bios(&[0]);

        // Program: JR $1 (to 0xA0) ; NOP. The A0 vector holds JR $31 ; NOP
        let bus = system.bus_mut();
        bus.poke::<u32>(0x100, 0x0020_0008);
        bus.poke::<u32>(0x104, 0);
        bus.poke::<u32>(0xA0, 0x03E0_0008);
        bus.poke::<u32>(0xA4, 0);

        system.cpu_mut().set_pc(0x100);
        system.cpu_mut().set_reg(1, 0xA0);
        system.cpu_mut().set_reg(9, 0x3F); // printf
        system.cpu_mut().set_reg(31, 0x108);

        system.run_steps(2);
        assert_eq!(system.cpu().pc(), 0xA0);
        assert_eq!(system.cpu().syscall_depth(), 1, "call frame recorded");

        system.run_steps(2);
        assert_eq!(system.cpu().pc(), 0x108);
        assert_eq!(system.cpu().syscall_depth(), 0, "frame popped on return");
    }

    #[test]
    fn test_run_until_breakpoint_stops_at_pc() {
        let mut system = system_with_bios(&[0]);
        // An infinite NOP slide through RAM
        system.cpu_mut().set_pc(0x100);
        system.add_hardware_break(0x140);

        let hit = system.run_until_breakpoint();
        assert!(hit);
        assert_eq!(system.cpu().pc(), 0x140);
    }

    #[test]
    fn test_run_until_breakpoint_exits_on_vblank() {
        let mut system = system_with_bios(&[0]);
        system.cpu_mut().set_pc(0x100);

        // No breakpoints set: the only exit is one completed VBlank
        let hit = system.run_until_breakpoint();
        assert!(!hit);
    }

    #[test]
    fn test_load_exe_image_after_bios_idle() {
        // A BIOS whose reset code calls the C0 dispatcher with r9 = 0x00
        // (EnqueueTimerAndVBlankIrqs) and then loops: enough for the
        // warm-up hook to fire
        let mut system = system_with_bios(&[
            0x2409_0000, // addiu r9, zero, 0
            0x3C1F_BFC0, // lui ra, 0xBFC0
            0x37FF_0014, // ori ra, ra, 0x14   (return lands on the loop)
            0x2401_00C0, // addiu r1, zero, 0xC0
            0x0020_0008, // jr r1
            0x0000_0000, // nop (delay)
            0x1000_FFFF, // loop: beq zero, zero, loop
            0x0000_0000, // nop
        ]);

        // The C0 vector immediately returns
        let bus = system.bus_mut();
        bus.poke::<u32>(0xC0, 0x03E0_0008);
        bus.poke::<u32>(0xC4, 0);

        // Minimal EXE: ADDIU $2, $0, 42 at 0x80010000
        let mut image = vec![0u8; exe::HEADER_SIZE + 4];
        image[0..8].copy_from_slice(b"PS-X EXE");
        image[0x10..0x14].copy_from_slice(&0x8001_0000u32.to_le_bytes());
        image[0x18..0x1C].copy_from_slice(&0x8001_0000u32.to_le_bytes());
        image[0x1C..0x20].copy_from_slice(&4u32.to_le_bytes());
        image[exe::HEADER_SIZE..].copy_from_slice(&0x2402_002Au32.to_le_bytes());

        system.load_exe_image(&image, None).unwrap();
        assert_eq!(system.cpu().pc(), 0x8001_0000);

        system.step();
        assert_eq!(system.cpu().reg(2), 42);
    }
}
