// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! System bus
//!
//! Routes every load/store to RAM, BIOS, scratchpad or one of the
//! memory-mapped device register files, honoring region-specific access
//! timing. RAM-class accesses go straight through the host-backed guest
//! address space ("fastmem"): the mirrors set up by [`mapper`] make
//! `base + guest_addr` valid for every KUSEG/KSEG0/KSEG1 view.
//!
//! Dispatch order by physical address: main RAM, BIOS, I/O bank,
//! scratchpad (a KSEG1 scratchpad access is a bus error), expansion 2 when
//! enabled, expansion 1, expansion 3. Anything else is a bus error.

pub mod address;
pub mod mapper;
pub mod region;

use address::{GuestAddress, Segment};
use mapper::{AddressSpace, PageProtection, PosixMirror};

use crate::core::cdrom::CdromDrive;
use crate::core::cpu::cop0::Excode;
use crate::core::dma::DmaController;
use crate::core::error::{EmulatorError, Result};
use crate::core::gpu::Gpu;
use crate::core::interrupt::InterruptController;
use crate::core::mdec::Mdec;
use crate::core::scheduler::{EventTarget, Scheduler};
use crate::core::sio::SioPort;
use crate::core::spu::Spu;
use crate::core::timers::RootCounters;

/// Cycles charged for a RAM read
pub const RAM_DELAY: u64 = 5;

/// Boot values for the delay/size registers (512 KiB, 8-bit bus for
/// BIOS/EXP1; small 8-bit EXP2; one byte EXP3)
const BIOS_CONFIG_INIT: u32 = 0x0013_243F;
const EXP1_CONFIG_INIT: u32 = 0x0013_243F;
const EXP2_CONFIG_INIT: u32 = 0x0007_0777;
const EXP3_CONFIG_INIT: u32 = 0x0000_3022;
const RAM_SIZE_INIT: u32 = 0xB88;

const KUSEG_VOID_START: u32 = 0x2000_0000;
const KUSEG_VOID_END: u32 = 0x7FFF_FFFF;

/// A failed bus access, reported as a simulated CPU exception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault {
    pub excode: Excode,
    /// Latched into COP0 BadVAddr for address errors (never for bus errors)
    pub badvaddr: Option<u32>,
}

/// Attributes of one bus access
#[derive(Debug, Clone, Copy)]
pub struct Access {
    /// SR current-mode bit: user-mode accesses to KSEG fault
    pub user_mode: bool,
    /// Charge region access time into [`Bus::curr_cycles`]
    pub add_cycles: bool,
}

impl Access {
    /// Kernel-mode access with cycle accounting (the common CPU data path)
    pub const CPU_KERNEL: Access = Access {
        user_mode: false,
        add_cycles: true,
    };
    /// Internal access: no faults escalated, no cycles charged
    pub const INTERNAL: Access = Access {
        user_mode: false,
        add_cycles: false,
    };
}

/// Primitive bus widths (u8/u16/u32)
pub trait Primitive: Copy {
    const SIZE: u32;
    fn from_u32(value: u32) -> Self;
    fn to_u32(self) -> u32;
    /// # Safety
    /// `ptr` must be valid for `SIZE` bytes and suitably aligned
    unsafe fn read_host(ptr: *const u8) -> Self;
    /// # Safety
    /// `ptr` must be valid for `SIZE` bytes and suitably aligned
    unsafe fn write_host(self, ptr: *mut u8);
}

macro_rules! impl_primitive {
    ($ty:ty, $size:expr) => {
        impl Primitive for $ty {
            const SIZE: u32 = $size;
            #[inline(always)]
            fn from_u32(value: u32) -> Self {
                value as $ty
            }
            #[inline(always)]
            fn to_u32(self) -> u32 {
                self as u32
            }
            #[inline(always)]
            unsafe fn read_host(ptr: *const u8) -> Self {
                (ptr as *const $ty).read()
            }
            #[inline(always)]
            unsafe fn write_host(self, ptr: *mut u8) {
                (ptr as *mut $ty).write(self)
            }
        }
    };
}

impl_primitive!(u8, 1);
impl_primitive!(u16, 2);
impl_primitive!(u32, 4);

/// Delay/size configuration word for one external region
///
/// Named accessors over a single backing integer; the bit layout matches
/// the hardware register exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelaySizeConfig(pub u32);

impl DelaySizeConfig {
    pub fn write_delay(self) -> u32 {
        self.0 & 0xF
    }
    pub fn read_delay(self) -> u32 {
        (self.0 >> 4) & 0xF
    }
    pub fn use_com0(self) -> bool {
        (self.0 >> 8) & 1 != 0
    }
    pub fn use_com1(self) -> bool {
        (self.0 >> 9) & 1 != 0
    }
    pub fn use_com2(self) -> bool {
        (self.0 >> 10) & 1 != 0
    }
    pub fn use_com3(self) -> bool {
        (self.0 >> 11) & 1 != 0
    }
    /// false = 8-bit bus, true = 16-bit bus
    pub fn bus_width(self) -> bool {
        (self.0 >> 12) & 1 != 0
    }
    pub fn size_shift(self) -> u32 {
        (self.0 >> 16) & 0x1F
    }
}

/// COM0..COM3 common delays packed in one register
#[derive(Debug, Clone, Copy, Default)]
pub struct ComDelay(pub u32);

impl ComDelay {
    pub fn com0(self) -> u32 {
        self.0 & 0xF
    }
    pub fn com1(self) -> u32 {
        (self.0 >> 4) & 0xF
    }
    pub fn com2(self) -> u32 {
        (self.0 >> 8) & 0xF
    }
    pub fn com3(self) -> u32 {
        (self.0 >> 12) & 0xF
    }
}

/// Cache-control register (0xFFFE0130)
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheControl(pub u32);

impl CacheControl {
    pub fn scratchpad_enable_1(self) -> bool {
        (self.0 >> 3) & 1 != 0
    }
    pub fn scratchpad_enable_2(self) -> bool {
        (self.0 >> 7) & 1 != 0
    }
    pub fn cache_enable(self) -> bool {
        (self.0 >> 11) & 1 != 0
    }
}

/// Resolved timing and extent of one external region
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionConfig {
    pub delay_size: DelaySizeConfig,
    pub base: u32,
    pub end: u32,
    pub read_nonseq: u64,
    pub read_seq: u64,
    pub write_nonseq: u64,
    pub write_seq: u64,
}

impl RegionConfig {
    fn new(base: u32, init: u32, max_size: u32) -> Self {
        let delay_size = DelaySizeConfig(init);
        Self {
            delay_size,
            base,
            end: Self::window_end(base, delay_size, max_size),
            read_nonseq: 0,
            read_seq: 0,
            write_nonseq: 0,
            write_seq: 0,
        }
    }

    /// End address from the size shift, clamped to what the region can
    /// physically decode
    fn window_end(base: u32, delay_size: DelaySizeConfig, max_size: u32) -> u32 {
        let size = (1u64 << delay_size.size_shift()).min(max_size as u64);
        base + size as u32
    }
}

/// Hard decode limits per region (the delay/size registers cannot grow a
/// region past these)
mod region_max {
    pub const EXPANSION1: u32 = 0x80_0000;
    pub const EXPANSION2: u32 = 0x2000;
    pub const EXPANSION3: u32 = 0x20_0000;
    pub const BIOS: u32 = 0x40_0000;
}

/// Copyable window into main RAM for engines (DMA) that bypass dispatch
#[derive(Debug, Clone, Copy)]
pub struct RamView {
    base: *mut u8,
    /// Power-of-two mapped window size in bytes
    window: u32,
}

impl RamView {
    /// Window over arbitrary host memory (engine tests drive DMA against a
    /// plain buffer this way). `window` must be a power of two.
    pub fn from_raw_parts(base: *mut u8, window: u32) -> Self {
        Self { base, window }
    }

    #[inline(always)]
    fn host(&self, addr: u32) -> *mut u8 {
        // Word aligned, wrapped into the mapped window
        let off = addr & (self.window - 1) & !3;
        unsafe { self.base.add(off as usize) }
    }

    #[inline(always)]
    pub fn read32(&self, addr: u32) -> u32 {
        unsafe { (self.host(addr) as *const u32).read() }
    }

    #[inline(always)]
    pub fn write32(&self, addr: u32, value: u32) {
        unsafe { (self.host(addr) as *mut u32).write(value) }
    }
}

/// The system bus: guest memory plus every device register bank
pub struct Bus {
    space: AddressSpace<PosixMirror>,
    guest_base: *mut u8,

    ram_window: region::RamWindow,
    ram_end: u32,
    ram_config: u32,
    bios_mapped: u32,
    bios_read_only: bool,
    scratchpad_mapped: bool,

    cache_control: CacheControl,
    bios_config: RegionConfig,
    exp1_config: RegionConfig,
    exp2_config: RegionConfig,
    exp3_config: RegionConfig,
    spu_config: RegionConfig,
    cdrom_config: RegionConfig,
    exp1_base: u32,
    exp2_base: u32,
    exp2_enable: bool,
    com_delays: ComDelay,

    /// Cycles accumulated during the current instruction
    pub curr_cycles: u64,
    /// Tells the scheduler to pass zero cycles-late to callbacks while the
    /// bus fast-forwards through an instant transfer
    pub event_ignore_overflow_cycles: bool,

    pub scheduler: Scheduler,
    pub interrupts: InterruptController,
    pub dma: DmaController,
    pub gpu: Gpu,
    pub cdrom: CdromDrive,
    pub sio0: SioPort,
    pub sio1: SioPort,
    pub timers: RootCounters,
    pub spu: Spu,
    pub mdec: Mdec,
}

/// I/O page register offsets (relative to 0x1F801000)
mod io {
    pub const MEM_CONTROL_START: u32 = 0x00;
    pub const MEM_CONTROL_END: u32 = 0x24;
    pub const EXP1_BASE: u32 = 0x00;
    pub const EXP2_BASE: u32 = 0x04;
    pub const EXP1_CONFIG: u32 = 0x08;
    pub const EXP3_CONFIG: u32 = 0x0C;
    pub const BIOS_CONFIG: u32 = 0x10;
    pub const SPU_CONFIG: u32 = 0x14;
    pub const CDROM_CONFIG: u32 = 0x18;
    pub const EXP2_CONFIG: u32 = 0x1C;
    pub const COM_DELAY: u32 = 0x20;
    pub const SIO0_START: u32 = 0x40;
    pub const SIO0_END: u32 = 0x50;
    pub const SIO1_START: u32 = 0x50;
    pub const SIO1_END: u32 = 0x60;
    pub const RAM_SIZE: u32 = 0x60;
    pub const INTERRUPT_STAT: u32 = 0x70;
    pub const INTERRUPT_MASK: u32 = 0x74;
    pub const DMA_START: u32 = 0x80;
    pub const DMA_END: u32 = 0x100;
    pub const TIMER_0: u32 = 0x100;
    pub const TIMER_1: u32 = 0x110;
    pub const TIMER_2: u32 = 0x120;
    pub const CDROM_START: u32 = 0x800;
    pub const CDROM_END: u32 = 0x803;
    pub const GP0: u32 = 0x810;
    pub const GP1: u32 = 0x814;
    pub const MDEC_CMD: u32 = 0x820;
    pub const MDEC_CTRL: u32 = 0x824;
    pub const SPU_START: u32 = 0xC00;
    pub const SPU_END: u32 = 0xE00;
}

const SEGMENT_BASES: [u32; 3] = [
    region::KUSEG_START,
    region::KSEG0_START,
    region::KSEG1_START,
];

const MIB: u64 = 1024 * 1024;

impl Bus {
    /// Build the bus: reserve the 4 GiB space, map RAM (8 MiB window at
    /// boot), scratchpad and a writable BIOS window, and construct every
    /// device bank
    pub fn new() -> Result<Self> {
        let mirror = PosixMirror::new(region::sizes::EFFECTIVE_MEMORY)?;
        let space = AddressSpace::new(mirror);
        let guest_base = space.base();

        let mut bus = Self {
            space,
            guest_base,
            ram_window: region::RamWindow::Ram8MbA,
            ram_end: 0,
            ram_config: RAM_SIZE_INIT,
            bios_mapped: 0,
            bios_read_only: false,
            scratchpad_mapped: false,
            cache_control: CacheControl(0),
            bios_config: RegionConfig::new(region::offsets::BIOS, BIOS_CONFIG_INIT, region_max::BIOS),
            exp1_config: RegionConfig::new(
                region::offsets::EXPANSION1,
                EXP1_CONFIG_INIT,
                region_max::EXPANSION1,
            ),
            exp2_config: RegionConfig::new(
                region::offsets::EXPANSION2,
                EXP2_CONFIG_INIT,
                region_max::EXPANSION2,
            ),
            exp3_config: RegionConfig::new(
                region::offsets::EXPANSION3,
                EXP3_CONFIG_INIT,
                region_max::EXPANSION3,
            ),
            spu_config: RegionConfig::default(),
            cdrom_config: RegionConfig::default(),
            exp1_base: region::offsets::EXPANSION1,
            exp2_base: region::offsets::EXPANSION2,
            exp2_enable: true,
            com_delays: ComDelay(0),
            curr_cycles: 0,
            event_ignore_overflow_cycles: false,
            scheduler: Scheduler::new(),
            interrupts: InterruptController::new(),
            dma: DmaController::new(),
            gpu: Gpu::new(),
            cdrom: CdromDrive::new(),
            sio0: SioPort::new(0),
            sio1: SioPort::new(1),
            timers: RootCounters::new(),
            spu: Spu::new(),
            mdec: Mdec::new(),
        };

        bus.recompute_delays();
        bus.map_ram(region::RamWindow::Ram8MbA)?;
        bus.map_scratchpad()?;
        bus.map_bios(region::sizes::BIOS as u32, false)?;
        bus.gpu.init_events(&mut bus.scheduler);

        Ok(bus)
    }

    /// Base pointer of the guest address space
    #[inline(always)]
    pub fn guest_base(&self) -> *mut u8 {
        self.guest_base
    }

    /// Bytes of RAM currently mapped (the mirrors repeat the bottom 2 MiB)
    pub fn ram_window_size(&self) -> u32 {
        self.ram_end
    }

    /// Snapshot of the mapped RAM window for engines that bypass dispatch
    pub fn ram_view(&self) -> RamView {
        RamView {
            base: self.guest_base,
            window: self.ram_end,
        }
    }

    /// Whether instruction fetches use the I-cache timing path
    #[inline(always)]
    pub fn cache_enabled(&self) -> bool {
        self.cache_control.cache_enable()
    }

    // ------------------------------------------------------------------
    // Region mapping
    // ------------------------------------------------------------------

    fn map_ram(&mut self, window: region::RamWindow) -> Result<()> {
        let size_mb = window.mapped_mib();
        // 1 MiB windows take one 1 MiB view; larger windows tile 2 MiB
        // mirrors of the same file offset
        let step_mb = if size_mb == 1 { 1 } else { 2 };

        for seg in SEGMENT_BASES {
            let mut mapped = 0;
            while mapped < size_mb {
                let offset = seg as u64 + mapped * MIB;
                self.space.reserve(offset, step_mb * MIB)?;
                self.space.map(
                    offset,
                    step_mb * MIB,
                    region::file_layout::MAIN_RAM,
                    PageProtection::ReadWrite,
                )?;
                mapped += step_mb;
            }
        }

        self.ram_window = window;
        self.ram_end = (size_mb * MIB) as u32;
        Ok(())
    }

    fn unmap_ram(&mut self) -> Result<()> {
        let size = self.ram_window.mapped_mib() * MIB;
        for seg in SEGMENT_BASES {
            self.space.unmap_range(seg as u64, size)?;
            let step = if self.ram_window.mapped_mib() == 1 { 1 } else { 2 };
            let mut freed = 0;
            while freed < size {
                self.space.release(seg as u64 + freed)?;
                freed += step * MIB;
            }
        }
        Ok(())
    }

    fn map_scratchpad(&mut self) -> Result<()> {
        // No KSEG1 view: the scratchpad is not visible uncached
        for seg in &SEGMENT_BASES[..2] {
            let offset = *seg as u64 + region::offsets::SCRATCHPAD as u64;
            self.space
                .reserve(offset, region::sizes::SCRATCHPAD_PADDED)?;
            self.space.map(
                offset,
                region::sizes::SCRATCHPAD_PADDED,
                region::file_layout::SCRATCHPAD,
                PageProtection::ReadWrite,
            )?;
        }
        self.scratchpad_mapped = true;
        Ok(())
    }

    fn unmap_scratchpad(&mut self) -> Result<()> {
        for seg in &SEGMENT_BASES[..2] {
            let offset = *seg as u64 + region::offsets::SCRATCHPAD as u64;
            self.space
                .unmap_range(offset, region::sizes::SCRATCHPAD_PADDED)?;
            self.space.release(offset)?;
        }
        self.scratchpad_mapped = false;
        Ok(())
    }

    /// Map the BIOS window: `window` bytes filled with 512 KiB mirrors of
    /// the ROM image (the delay/size registers can expose up to 4 MiB)
    fn map_bios(&mut self, window: u32, read_only: bool) -> Result<()> {
        let prot = if read_only {
            PageProtection::Read
        } else {
            PageProtection::ReadWrite
        };

        let rom = region::sizes::BIOS;
        let copies = (window as u64).div_ceil(rom).clamp(1, 8);

        for seg in SEGMENT_BASES {
            for copy in 0..copies {
                let offset = seg as u64 + region::offsets::BIOS as u64 + copy * rom;
                self.space.reserve(offset, rom)?;
                self.space.map(offset, rom, region::file_layout::BIOS, prot)?;
            }
        }
        self.bios_mapped = (copies * rom) as u32;
        self.bios_read_only = read_only;
        Ok(())
    }

    fn unmap_bios(&mut self) -> Result<()> {
        if self.bios_mapped == 0 {
            return Ok(());
        }
        let rom = region::sizes::BIOS;
        let copies = self.bios_mapped as u64 / rom;
        for seg in SEGMENT_BASES {
            for copy in 0..copies {
                let offset = seg as u64 + region::offsets::BIOS as u64 + copy * rom;
                self.space.unmap_range(offset, rom)?;
                self.space.release(offset)?;
            }
        }
        self.bios_mapped = 0;
        Ok(())
    }

    /// Copy a BIOS image into the BIOS region, then leave it mapped
    /// read-only
    pub fn load_bios(&mut self, data: &[u8]) -> Result<()> {
        if data.len() as u64 != region::sizes::BIOS {
            return Err(EmulatorError::BiosError(format!(
                "expected {} bytes, got {}",
                region::sizes::BIOS,
                data.len()
            )));
        }

        let window = self.bios_config.end - self.bios_config.base;
        self.unmap_bios()?;
        self.map_bios(window, false)?;
        self.copy_raw(data, region::offsets::BIOS);
        self.unmap_bios()?;
        self.map_bios(window, true)?;
        Ok(())
    }

    /// Copy raw data into the guest address space at a guest offset
    pub fn copy_raw(&mut self, data: &[u8], dest: u32) {
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.guest_base.add(dest as usize),
                data.len(),
            );
        }
    }

    /// Read raw bytes from the guest address space
    pub fn read_raw(&self, src: u32, dest: &mut [u8]) {
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.guest_base.add(src as usize),
                dest.as_mut_ptr(),
                dest.len(),
            );
        }
    }

    /// Zero a guest range (kernel memfill)
    pub fn fill_raw(&mut self, dest: u32, len: u32, value: u8) {
        unsafe {
            std::ptr::write_bytes(self.guest_base.add(dest as usize), value, len as usize);
        }
    }

    /// Read a NUL-terminated guest string of at most `max_len` bytes
    pub fn read_string(&mut self, mut addr: u32, max_len: u32) -> String {
        let mut out = String::new();
        for _ in 0..max_len {
            let byte: u8 = self.peek(addr);
            if byte == 0 {
                break;
            }
            out.push(byte as char);
            addr = addr.wrapping_add(1);
        }
        out
    }

    // ------------------------------------------------------------------
    // Timing
    // ------------------------------------------------------------------

    fn compute_region_delays(conf: &mut RegionConfig, com: ComDelay) {
        let ds = conf.delay_size;
        let com0 = if ds.use_com0() { com.com0() } else { 0 } as u64;
        let com1 = if ds.use_com1() { com.com1() } else { 0 } as u64;
        let com2 = if ds.use_com2() { com.com2() } else { 0 } as u64;
        let com3 = if ds.use_com3() { com.com3() } else { 0 } as u64;

        conf.read_nonseq = ds.read_delay() as u64 + com0 + com2 + 2;
        conf.read_seq = ds.read_delay() as u64 + com1 + 1;
        conf.write_nonseq = ds.write_delay() as u64 + com0 + com3 + 2;
        conf.write_seq = ds.write_delay() as u64 + com1 + 1;
    }

    fn recompute_delays(&mut self) {
        let com = self.com_delays;
        Self::compute_region_delays(&mut self.bios_config, com);
        Self::compute_region_delays(&mut self.exp1_config, com);
        Self::compute_region_delays(&mut self.exp2_config, com);
        Self::compute_region_delays(&mut self.exp3_config, com);
        Self::compute_region_delays(&mut self.spu_config, com);
        Self::compute_region_delays(&mut self.cdrom_config, com);
    }

    fn charge_access(&mut self, conf: RegionConfig, size: u32, write: bool) {
        let bus_width_bytes = if conf.delay_size.bus_width() { 2 } else { 1 };
        let seq_count = (size / bus_width_bytes).saturating_sub(1) as u64;
        if write {
            self.curr_cycles += conf.write_nonseq + conf.write_seq * seq_count;
        } else {
            self.curr_cycles += conf.read_nonseq + conf.read_seq * seq_count;
        }
    }

    // ------------------------------------------------------------------
    // Typed dispatch
    // ------------------------------------------------------------------

    /// Typed aligned read dispatched by guest address
    pub fn read<T: Primitive>(
        &mut self,
        addr: GuestAddress,
        acc: Access,
    ) -> std::result::Result<T, BusFault> {
        if T::SIZE > 1 && addr.0 & (T::SIZE - 1) != 0 {
            log::error!("[MEMORY] Unaligned read at 0x{:08X}", addr.0);
            return Err(BusFault {
                excode: Excode::AdEL,
                badvaddr: Some(addr.0),
            });
        }

        if addr.virtual_in(KUSEG_VOID_START, KUSEG_VOID_END) {
            log::error!(
                "[MEMORY] Reading unused upper 1.5 GB of KUSEG at 0x{:08X}",
                addr.0
            );
            // BadVAddr is not latched for bus errors
            return Err(BusFault {
                excode: Excode::DBE,
                badvaddr: None,
            });
        }

        if addr.0 >= region::KSEG2_START {
            if addr.0 == region::CACHE_CONTROL_ADDRESS {
                return Ok(T::from_u32(self.cache_control.0));
            }
            log::error!("[MEMORY] KSEG2 access at 0x{:08X}", addr.0);
            return Ok(T::from_u32(0));
        }

        if acc.user_mode && addr.segment() != Segment::Kuseg {
            log::error!("[MEMORY] Reading KSEG in USER mode at 0x{:08X}", addr.0);
            return Err(BusFault {
                excode: Excode::AdEL,
                badvaddr: Some(addr.0),
            });
        }

        let phys = addr.physical();

        if phys < self.ram_end {
            if acc.add_cycles {
                self.curr_cycles += RAM_DELAY;
            }
            return Ok(unsafe { T::read_host(self.guest_base.add(addr.0 as usize)) });
        }

        if addr.physical_in(self.bios_config.base, self.bios_config.end - 1) {
            if acc.add_cycles {
                self.charge_access(self.bios_config, T::SIZE, false);
            }
            return Ok(unsafe { T::read_host(self.guest_base.add(addr.0 as usize)) });
        }

        if addr.physical_in(region::offsets::IO, region::offsets::IO + region::sizes::IO as u32 - 1)
        {
            return Ok(T::from_u32(self.io_read::<T>(phys & 0xFFF, acc)));
        }

        if addr.physical_in(
            region::offsets::SCRATCHPAD,
            region::offsets::SCRATCHPAD + region::sizes::SCRATCHPAD_PADDED as u32 - 1,
        ) {
            if addr.segment() == Segment::Kseg1 {
                log::error!("[MEMORY] Reading scratchpad in KSEG1 at 0x{:08X}", addr.0);
                return Err(BusFault {
                    excode: Excode::DBE,
                    badvaddr: None,
                });
            }
            return Ok(unsafe { T::read_host(self.guest_base.add(addr.0 as usize)) });
        }

        if self.exp2_enable
            && addr.physical_in(self.exp2_config.base, self.exp2_config.end - 1)
        {
            if acc.add_cycles {
                self.charge_access(self.exp2_config, T::SIZE, false);
            }
            return Ok(T::from_u32(self.read_exp2(phys - self.exp2_config.base)));
        }

        if addr.physical_in(self.exp1_config.base, self.exp1_config.end - 1) {
            if acc.add_cycles {
                self.charge_access(self.exp1_config, T::SIZE, false);
            }
            return Ok(T::from_u32(self.read_exp1(phys - self.exp1_config.base)));
        }

        if addr.physical_in(self.exp3_config.base, self.exp3_config.end - 1) {
            if acc.add_cycles {
                self.charge_access(self.exp3_config, T::SIZE, false);
            }
            return Ok(T::from_u32(self.read_exp3(phys - self.exp3_config.base)));
        }

        log::error!("[MEMORY] Reading unused memory at 0x{:08X}", addr.0);
        Err(BusFault {
            excode: Excode::DBE,
            badvaddr: None,
        })
    }

    /// Typed aligned write dispatched by guest address
    pub fn write<T: Primitive>(
        &mut self,
        addr: GuestAddress,
        value: T,
        acc: Access,
    ) -> std::result::Result<(), BusFault> {
        if T::SIZE > 1 && addr.0 & (T::SIZE - 1) != 0 {
            log::error!("[MEMORY] Unaligned write at 0x{:08X}", addr.0);
            return Err(BusFault {
                excode: Excode::AdES,
                badvaddr: Some(addr.0),
            });
        }

        if addr.virtual_in(KUSEG_VOID_START, KUSEG_VOID_END) {
            log::error!(
                "[MEMORY] Writing unused upper 1.5 GB of KUSEG at 0x{:08X}",
                addr.0
            );
            return Err(BusFault {
                excode: Excode::DBE,
                badvaddr: None,
            });
        }

        if addr.0 >= region::KSEG2_START {
            if addr.0 == region::CACHE_CONTROL_ADDRESS {
                self.write_cache_control(value.to_u32());
            } else {
                log::error!("[MEMORY] KSEG2 write at 0x{:08X}", addr.0);
            }
            return Ok(());
        }

        if acc.user_mode && addr.segment() != Segment::Kuseg {
            log::error!("[MEMORY] Writing KSEG in USER mode at 0x{:08X}", addr.0);
            return Err(BusFault {
                excode: Excode::AdES,
                badvaddr: Some(addr.0),
            });
        }

        let phys = addr.physical();

        if phys < self.ram_end {
            // With a write buffer there is nothing to charge here
            unsafe { value.write_host(self.guest_base.add(addr.0 as usize)) };
            return Ok(());
        }

        if addr.physical_in(region::offsets::IO, region::offsets::IO + region::sizes::IO as u32 - 1)
        {
            self.io_write::<T>(phys & 0xFFF, value.to_u32(), acc);
            return Ok(());
        }

        if addr.physical_in(
            region::offsets::SCRATCHPAD,
            region::offsets::SCRATCHPAD + region::sizes::SCRATCHPAD_PADDED as u32 - 1,
        ) {
            if addr.segment() == Segment::Kseg1 {
                log::error!("[MEMORY] Writing scratchpad in KSEG1 at 0x{:08X}", addr.0);
                return Err(BusFault {
                    excode: Excode::DBE,
                    badvaddr: None,
                });
            }
            unsafe { value.write_host(self.guest_base.add(addr.0 as usize)) };
            return Ok(());
        }

        if self.exp2_enable
            && addr.physical_in(self.exp2_config.base, self.exp2_config.end - 1)
        {
            self.write_exp2(phys - self.exp2_config.base, value.to_u32());
            return Ok(());
        }

        if addr.physical_in(self.exp1_config.base, self.exp1_config.end - 1) {
            self.write_exp1(phys - self.exp1_config.base, value.to_u32());
            return Ok(());
        }

        if addr.physical_in(self.exp3_config.base, self.exp3_config.end - 1) {
            self.write_exp3(phys - self.exp3_config.base, value.to_u32());
            return Ok(());
        }

        if addr.physical_in(self.bios_config.base, self.bios_config.end - 1) {
            // ROM: stores are dropped
            return Ok(());
        }

        log::error!("[MEMORY] Writing unused memory at 0x{:08X}", addr.0);
        Err(BusFault {
            excode: Excode::DBE,
            badvaddr: None,
        })
    }

    /// Internal read: kernel mode, no cycle charge, faults read as zero
    pub fn peek<T: Primitive>(&mut self, addr: u32) -> T {
        self.read(GuestAddress(addr), Access::INTERNAL)
            .unwrap_or(T::from_u32(0))
    }

    /// Internal write: kernel mode, no cycle charge, faults ignored
    pub fn poke<T: Primitive>(&mut self, addr: u32, value: T) {
        let _ = self.write(GuestAddress(addr), value, Access::INTERNAL);
    }

    // ------------------------------------------------------------------
    // I/O fan-out
    // ------------------------------------------------------------------

    fn io_read<T: Primitive>(&mut self, address: u32, acc: Access) -> u32 {
        let shift = (address & 3) * 8;

        if (io::MEM_CONTROL_START..io::MEM_CONTROL_END).contains(&address) {
            return self.read_mem_control(address & !3) >> shift;
        }

        if (io::RAM_SIZE..io::RAM_SIZE + 4).contains(&address) {
            return self.ram_config >> shift;
        }

        if (io::INTERRUPT_STAT..io::INTERRUPT_STAT + 4).contains(&address) {
            return self.interrupts.read_status() >> shift;
        }

        if (io::INTERRUPT_MASK..io::INTERRUPT_MASK + 4).contains(&address) {
            return self.interrupts.read_mask() >> shift;
        }

        if address & 0xFF0 == io::TIMER_0 {
            return self
                .timers
                .read(0, address - io::TIMER_0, &mut self.scheduler)
                >> shift;
        }
        if address & 0xFF0 == io::TIMER_1 {
            return self
                .timers
                .read(1, address - io::TIMER_1, &mut self.scheduler)
                >> shift;
        }
        if address & 0xFF0 == io::TIMER_2 {
            return self
                .timers
                .read(2, address - io::TIMER_2, &mut self.scheduler)
                >> shift;
        }

        if (io::DMA_START..io::DMA_END).contains(&address) {
            return self.dma.read(address - io::DMA_START) >> shift;
        }

        if (io::GP0..io::GP0 + 4).contains(&address) {
            return self.gpu.read_data() >> shift;
        }

        if (io::GP1..io::GP1 + 4).contains(&address) {
            return self.gpu.read_stat(&mut self.dma) >> shift;
        }

        if (io::CDROM_START..=io::CDROM_END).contains(&address) {
            if acc.add_cycles {
                self.charge_access(self.cdrom_config, T::SIZE, false);
            }
            let offset = address - io::CDROM_START;
            return match T::SIZE {
                1 => self.cdrom.read8(offset, &mut self.scheduler) as u32,
                2 => self.cdrom.read16(offset, &mut self.scheduler) as u32,
                _ => self.cdrom.read32(offset, &mut self.scheduler),
            };
        }

        if (io::SIO0_START..io::SIO0_END).contains(&address) {
            let offset = address - io::SIO0_START;
            return match T::SIZE {
                1 => self.sio0.read8(offset, &self.scheduler) as u32,
                2 => self.sio0.read16(offset, &self.scheduler) as u32,
                _ => self.sio0.read32(offset, &self.scheduler),
            };
        }

        if (io::SIO1_START..io::SIO1_END).contains(&address) {
            let offset = address - io::SIO1_START;
            return match T::SIZE {
                1 => self.sio1.read8(offset, &self.scheduler) as u32,
                2 => self.sio1.read16(offset, &self.scheduler) as u32,
                _ => self.sio1.read32(offset, &self.scheduler),
            };
        }

        if (io::MDEC_CMD..io::MDEC_CMD + 4).contains(&address) {
            return self.mdec.read_data() >> shift;
        }
        if (io::MDEC_CTRL..io::MDEC_CTRL + 4).contains(&address) {
            return self.mdec.read_stat() >> shift;
        }

        if (io::SPU_START..io::SPU_END).contains(&address) {
            if acc.add_cycles {
                self.charge_access(self.spu_config, T::SIZE, false);
            }
            return match T::SIZE {
                1 => self.spu.read8(address) as u32,
                2 => self.spu.read16(address) as u32,
                _ => self.spu.read32(address),
            };
        }

        log::error!(
            "[MEMORY] Reading invalid/unused/unimplemented register 0x{:03X}",
            address
        );
        0
    }

    fn io_write<T: Primitive>(&mut self, address: u32, value: u32, acc: Access) {
        // Sub-word writes land at the register's byte lane
        let to_write = if T::SIZE != 4 {
            value << ((address & 3) * 8)
        } else {
            value
        };

        if (io::MEM_CONTROL_START..io::MEM_CONTROL_END).contains(&address) {
            self.write_mem_control(address & !3, to_write);
            return;
        }

        if (io::RAM_SIZE..io::RAM_SIZE + 4).contains(&address) {
            self.reconfigure_ram(to_write);
            return;
        }

        if (io::INTERRUPT_STAT..io::INTERRUPT_STAT + 4).contains(&address) {
            self.interrupts.write_status(to_write);
            return;
        }

        if (io::INTERRUPT_MASK..io::INTERRUPT_MASK + 4).contains(&address) {
            self.interrupts.write_mask(to_write);
            return;
        }

        if address & 0xFF0 == io::TIMER_0 {
            self.timers.write(
                0,
                address - io::TIMER_0,
                to_write,
                &mut self.scheduler,
                &mut self.interrupts,
            );
            return;
        }
        if address & 0xFF0 == io::TIMER_1 {
            self.timers.write(
                1,
                address - io::TIMER_1,
                to_write,
                &mut self.scheduler,
                &mut self.interrupts,
            );
            return;
        }
        if address & 0xFF0 == io::TIMER_2 {
            self.timers.write(
                2,
                address - io::TIMER_2,
                to_write,
                &mut self.scheduler,
                &mut self.interrupts,
            );
            return;
        }

        if (io::DMA_START..io::DMA_END).contains(&address) {
            let mask = match T::SIZE {
                1 => 0xFFu32 << ((address & 3) * 8),
                2 => 0xFFFFu32 << ((address & 3) * 8),
                _ => 0xFFFF_FFFF,
            };
            let ram = self.ram_view();
            self.dma
                .write(address - io::DMA_START, to_write, mask, ram);
            return;
        }

        if (io::GP0..io::GP0 + 4).contains(&address) {
            self.gpu.write_gp0(to_write, &mut self.dma);
            return;
        }

        if (io::GP1..io::GP1 + 4).contains(&address) {
            self.gpu
                .write_gp1(to_write, &mut self.dma, &mut self.timers, &mut self.scheduler);
            return;
        }

        if (io::CDROM_START..=io::CDROM_END).contains(&address) {
            if acc.add_cycles {
                self.charge_access(self.cdrom_config, T::SIZE, true);
            }
            let offset = address - io::CDROM_START;
            match T::SIZE {
                1 => self.cdrom.write8(
                    offset,
                    value as u8,
                    &mut self.scheduler,
                    &mut self.interrupts,
                    &mut self.dma,
                ),
                2 => self.cdrom.write16(
                    offset,
                    value as u16,
                    &mut self.scheduler,
                    &mut self.interrupts,
                    &mut self.dma,
                ),
                _ => self.cdrom.write32(
                    offset,
                    value,
                    &mut self.scheduler,
                    &mut self.interrupts,
                    &mut self.dma,
                ),
            }
            return;
        }

        if (io::SIO0_START..io::SIO0_END).contains(&address) {
            let offset = address - io::SIO0_START;
            match T::SIZE {
                1 => self.sio0.write8(offset, value as u8, &mut self.scheduler),
                2 => self.sio0.write16(offset, value as u16, &mut self.scheduler),
                _ => self.sio0.write32(offset, value, &mut self.scheduler),
            }
            return;
        }

        if (io::SIO1_START..io::SIO1_END).contains(&address) {
            let offset = address - io::SIO1_START;
            match T::SIZE {
                1 => self.sio1.write8(offset, value as u8, &mut self.scheduler),
                2 => self.sio1.write16(offset, value as u16, &mut self.scheduler),
                _ => self.sio1.write32(offset, value, &mut self.scheduler),
            }
            return;
        }

        if (io::MDEC_CMD..io::MDEC_CMD + 4).contains(&address) {
            self.mdec.write_command(to_write);
            return;
        }
        if (io::MDEC_CTRL..io::MDEC_CTRL + 4).contains(&address) {
            self.mdec.write_control(to_write);
            return;
        }

        if (io::SPU_START..io::SPU_END).contains(&address) {
            if acc.add_cycles {
                self.charge_access(self.spu_config, T::SIZE, true);
            }
            match T::SIZE {
                1 => self.spu.write8(address, value as u8, &mut self.scheduler),
                2 => self.spu.write16(address, value as u16, &mut self.scheduler),
                _ => self.spu.write32(address, value, &mut self.scheduler),
            }
            return;
        }

        log::error!(
            "[MEMORY] Write to invalid/unused/unimplemented register 0x{:03X}",
            address
        );
    }

    // ------------------------------------------------------------------
    // Memory control
    // ------------------------------------------------------------------

    fn read_mem_control(&self, address: u32) -> u32 {
        match address {
            io::EXP1_BASE => self.exp1_base,
            io::EXP2_BASE => self.exp2_base,
            io::EXP1_CONFIG => self.exp1_config.delay_size.0,
            io::EXP3_CONFIG => self.exp3_config.delay_size.0,
            io::BIOS_CONFIG => self.bios_config.delay_size.0,
            io::SPU_CONFIG => self.spu_config.delay_size.0,
            io::CDROM_CONFIG => self.cdrom_config.delay_size.0,
            io::EXP2_CONFIG => self.exp2_config.delay_size.0,
            io::COM_DELAY => self.com_delays.0,
            _ => 0,
        }
    }

    fn write_mem_control(&mut self, address: u32, value: u32) {
        match address {
            io::EXP1_BASE => self.exp1_base = (value & 0x00FF_FFFF) | 0x1F00_0000,
            io::EXP2_BASE => self.exp2_base = (value & 0x00FF_FFFF) | 0x1F00_0000,
            io::EXP1_CONFIG => {
                self.exp1_config.delay_size = DelaySizeConfig(value);
                self.exp1_config.end = RegionConfig::window_end(
                    self.exp1_config.base,
                    self.exp1_config.delay_size,
                    region_max::EXPANSION1,
                );
            }
            io::EXP3_CONFIG => {
                self.exp3_config.delay_size = DelaySizeConfig(value);
                self.exp3_config.end = RegionConfig::window_end(
                    self.exp3_config.base,
                    self.exp3_config.delay_size,
                    region_max::EXPANSION3,
                );
            }
            io::BIOS_CONFIG => {
                self.bios_config.delay_size = DelaySizeConfig(value);
                self.bios_config.end = RegionConfig::window_end(
                    self.bios_config.base,
                    self.bios_config.delay_size,
                    region_max::BIOS,
                );
                log::debug!(
                    "[MEMORY] BIOS reconfigured: end=0x{:08X} width16={}",
                    self.bios_config.end,
                    self.bios_config.delay_size.bus_width()
                );

                // Growing the decoded window re-maps the ROM mirrors
                let window = self.bios_config.end - self.bios_config.base;
                let read_only = self.bios_read_only;
                if let Err(err) = self
                    .unmap_bios()
                    .and_then(|_| self.map_bios(window, read_only))
                {
                    panic!("BIOS remap failed: {err}");
                }
            }
            io::SPU_CONFIG => self.spu_config.delay_size = DelaySizeConfig(value),
            io::CDROM_CONFIG => self.cdrom_config.delay_size = DelaySizeConfig(value),
            io::EXP2_CONFIG => {
                self.exp2_config.delay_size = DelaySizeConfig(value);
                self.exp2_config.end = RegionConfig::window_end(
                    self.exp2_config.base,
                    self.exp2_config.delay_size,
                    region_max::EXPANSION2,
                );
            }
            io::COM_DELAY => self.com_delays = ComDelay(value),
            _ => {
                log::error!("[MEMORY] Unknown mem-control register 0x{:03X}", address);
                return;
            }
        }
        self.recompute_delays();
    }

    /// Writes to 0x1F801060 may grow/shrink the RAM window, which unmaps
    /// and re-maps the mirrors
    fn reconfigure_ram(&mut self, value: u32) {
        self.ram_config = value;
        let window = region::RamWindow::from_register(value);
        if window.mapped_mib() == self.ram_window.mapped_mib() {
            self.ram_window = window;
            return;
        }

        log::info!(
            "[MEMORY] RAM window change {:?} -> {:?}",
            self.ram_window,
            window
        );
        if let Err(err) = self.unmap_ram().and_then(|_| self.map_ram(window)) {
            // Remapping failure leaves the guest space unusable
            panic!("RAM remap failed: {err}");
        }
    }

    fn write_cache_control(&mut self, value: u32) {
        let new = CacheControl(value);
        let want_scratch = new.scratchpad_enable_1() && new.scratchpad_enable_2();

        if want_scratch != self.scratchpad_mapped {
            let result = if want_scratch {
                self.map_scratchpad()
            } else {
                self.unmap_scratchpad()
            };
            if let Err(err) = result {
                panic!("scratchpad remap failed: {err}");
            }
        }

        self.cache_control = new;
        log::debug!("[MEMORY] CACHE_CONTROL = 0x{:08X}", value);
    }

    // ------------------------------------------------------------------
    // Expansion regions (no devices attached: open bus)
    // ------------------------------------------------------------------

    fn read_exp1(&self, address: u32) -> u32 {
        log::debug!("[MEMORY] EXP1 read 0x{:08X}", address);
        0xFFFF_FFFF
    }

    fn write_exp1(&mut self, address: u32, value: u32) {
        log::debug!("[MEMORY] EXP1 write 0x{:08X} = 0x{:08X}", address, value);
    }

    fn read_exp2(&self, address: u32) -> u32 {
        log::debug!("[MEMORY] EXP2 read 0x{:08X}", address);
        0xFFFF_FFFF
    }

    fn write_exp2(&mut self, address: u32, value: u32) {
        // 0x41 is the POST 7-segment display
        if address == 0x41 {
            log::info!("[MEMORY] POST = {:X}", value & 0xF);
        } else {
            log::debug!("[MEMORY] EXP2 write 0x{:08X} = 0x{:08X}", address, value);
        }
    }

    fn read_exp3(&self, address: u32) -> u32 {
        log::debug!("[MEMORY] EXP3 read 0x{:08X}", address);
        0xFFFF_FFFF
    }

    fn write_exp3(&mut self, address: u32, value: u32) {
        log::debug!("[MEMORY] EXP3 write 0x{:08X} = 0x{:08X}", address, value);
    }

    // ------------------------------------------------------------------
    // Scheduler integration
    // ------------------------------------------------------------------

    /// Advance simulated time, dispatching every event whose trigger has
    /// elapsed. The `event_ignore_overflow_cycles` latch is consumed here.
    pub fn advance_time(&mut self, cycles: u64) {
        let ignore = self.event_ignore_overflow_cycles;
        self.event_ignore_overflow_cycles = false;

        let final_time = self.scheduler.now() + cycles;
        while let Some(fired) = self.scheduler.pop_due(final_time, ignore) {
            self.dispatch_event(fired.target, fired.cycles_late);
        }
        self.scheduler.catch_up(final_time);
    }

    fn dispatch_event(&mut self, target: EventTarget, cycles_late: u64) {
        match target {
            EventTarget::GpuHBlank => {
                self.gpu
                    .hblank(cycles_late, &mut self.scheduler, &mut self.timers);
            }
            EventTarget::GpuLineEnd => {
                self.gpu.line_end(
                    cycles_late,
                    &mut self.scheduler,
                    &mut self.interrupts,
                    &mut self.timers,
                );
            }
            EventTarget::TimerTarget(id) => {
                self.timers.target_event(
                    id,
                    cycles_late,
                    &mut self.scheduler,
                    &mut self.interrupts,
                );
            }
            EventTarget::TimerOverflow(id) => {
                self.timers.overflow_event(
                    id,
                    cycles_late,
                    &mut self.scheduler,
                    &mut self.interrupts,
                );
            }
            EventTarget::CdromResponse => {
                self.cdrom.deliver_interrupt(&mut self.interrupts);
            }
            EventTarget::CdromSector => {
                self.cdrom.sector_read_event(
                    &mut self.scheduler,
                    &mut self.interrupts,
                    &mut self.dma,
                );
            }
            EventTarget::SioTransfer(id) => {
                let port = if id == 0 { &mut self.sio0 } else { &mut self.sio1 };
                port.transfer_complete(&mut self.scheduler, &mut self.interrupts);
            }
            EventTarget::SpuFifoTransfer => {
                self.spu.fifo_transfer_complete();
            }
        }
    }

    // ------------------------------------------------------------------
    // DMA integration
    // ------------------------------------------------------------------

    /// Whether a DMA burn-down is active (the outer loop then advances the
    /// transfer instead of stepping the CPU)
    pub fn dma_active(&self) -> bool {
        self.dma.has_active_transfer()
    }

    /// Advance the highest-priority active transfer by one word/packet
    pub fn advance_dma(&mut self) {
        let ram = self.ram_view();
        let irq = self.dma.advance(
            ram,
            &mut self.gpu,
            &mut self.cdrom,
            &mut self.spu,
            &mut self.mdec,
        );
        if irq {
            self.interrupts.request(crate::core::interrupt::Interrupt::DMA);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus() -> Bus {
        Bus::new().unwrap()
    }

    #[test]
    fn test_ram_mirrors_share_contents() {
        let mut bus = bus();
        bus.poke::<u32>(0x0000_0100, 0xDEAD_BEEF);
        assert_eq!(bus.peek::<u32>(0x8000_0100), 0xDEAD_BEEF);
        assert_eq!(bus.peek::<u32>(0xA000_0100), 0xDEAD_BEEF);
        // In-segment mirror of the 2 MiB module
        assert_eq!(bus.peek::<u32>(0x0020_0100), 0xDEAD_BEEF);
    }

    #[test]
    fn test_unaligned_read_faults_with_badvaddr() {
        let mut bus = bus();
        let fault = bus
            .read::<u32>(GuestAddress(0x0000_0002), Access::CPU_KERNEL)
            .unwrap_err();
        assert_eq!(fault.excode, Excode::AdEL);
        assert_eq!(fault.badvaddr, Some(0x0000_0002));

        let fault = bus
            .write::<u16>(GuestAddress(0x0000_0001), 0u16, Access::CPU_KERNEL)
            .unwrap_err();
        assert_eq!(fault.excode, Excode::AdES);
        assert_eq!(fault.badvaddr, Some(0x0000_0001));
    }

    #[test]
    fn test_kuseg_void_is_bus_error_without_badvaddr() {
        let mut bus = bus();
        let fault = bus
            .read::<u32>(GuestAddress(0x3000_0000), Access::CPU_KERNEL)
            .unwrap_err();
        assert_eq!(fault.excode, Excode::DBE);
        assert_eq!(fault.badvaddr, None);
    }

    #[test]
    fn test_user_mode_kseg_access_faults() {
        let mut bus = bus();
        let acc = Access {
            user_mode: true,
            add_cycles: false,
        };
        let fault = bus.read::<u32>(GuestAddress(0x8000_0000), acc).unwrap_err();
        assert_eq!(fault.excode, Excode::AdEL);
        assert_eq!(fault.badvaddr, Some(0x8000_0000));
    }

    #[test]
    fn test_kseg1_scratchpad_is_bus_error() {
        let mut bus = bus();
        // Cached views work
        bus.poke::<u32>(0x1F80_0010, 0x1234_5678);
        assert_eq!(bus.peek::<u32>(0x9F80_0010), 0x1234_5678);
        // The uncached view does not exist
        let fault = bus
            .read::<u32>(GuestAddress(0xBF80_0010), Access::CPU_KERNEL)
            .unwrap_err();
        assert_eq!(fault.excode, Excode::DBE);
    }

    #[test]
    fn test_bios_loads_and_rejects_writes() {
        let mut bus = bus();
        let mut image = vec![0u8; region::sizes::BIOS as usize];
        image[0] = 0x13;
        image[1] = 0x37;
        bus.load_bios(&image).unwrap();

        assert_eq!(bus.peek::<u16>(0xBFC0_0000), 0x3713);
        assert_eq!(bus.peek::<u16>(0x9FC0_0000), 0x3713);

        // Stores to ROM are dropped silently
        bus.poke::<u32>(0xBFC0_0000, 0xFFFF_FFFF);
        assert_eq!(bus.peek::<u16>(0xBFC0_0000), 0x3713);
    }

    #[test]
    fn test_bios_rejects_bad_size() {
        let mut bus = bus();
        assert!(bus.load_bios(&[0u8; 1024]).is_err());
    }

    #[test]
    fn test_ram_read_charges_five_cycles() {
        let mut bus = bus();
        bus.curr_cycles = 0;
        let _ = bus.read::<u32>(GuestAddress(0x0000_0000), Access::CPU_KERNEL);
        assert_eq!(bus.curr_cycles, RAM_DELAY);
    }

    #[test]
    fn test_bios_access_time_uses_region_config() {
        let mut bus = bus();
        bus.curr_cycles = 0;
        let _ = bus.read::<u32>(GuestAddress(0xBFC0_0000), Access::CPU_KERNEL);
        // 8-bit bus: 1 nonseq + 3 seq accesses
        let expected = bus.bios_config.read_nonseq + 3 * bus.bios_config.read_seq;
        assert_eq!(bus.curr_cycles, expected);
    }

    #[test]
    fn test_interrupt_registers_via_bus() {
        let mut bus = bus();
        bus.interrupts.request(crate::core::interrupt::Interrupt::VBLANK);
        bus.interrupts.request(crate::core::interrupt::Interrupt::TIMER2);

        assert_eq!(bus.peek::<u32>(0x1F80_1070), 0x41);

        // Writing 0 acknowledges, writing 1 keeps
        bus.poke::<u32>(0x1F80_1070, !0x1u32);
        assert_eq!(bus.peek::<u32>(0x1F80_1070), 0x40);

        bus.poke::<u32>(0x1F80_1074, 0x40);
        assert_eq!(bus.peek::<u32>(0x1F80_1074), 0x40);
        assert!(bus.interrupts.is_pending());
    }

    #[test]
    fn test_cache_control_register() {
        let mut bus = bus();
        bus.poke::<u32>(0xFFFE_0130, 0x0000_0804);
        assert_eq!(bus.peek::<u32>(0xFFFE_0130), 0x0000_0804);
        assert!(bus.cache_enabled());
    }

    #[test]
    fn test_ram_size_register_roundtrip() {
        let mut bus = bus();
        assert_eq!(bus.peek::<u32>(0x1F80_1060), RAM_SIZE_INIT);
        // Switch to the 8 MiB window and back
        bus.poke::<u32>(0x1F80_1060, 5 << 9);
        bus.poke::<u32>(0x0060_0000, 0xCAFE_F00D);
        assert_eq!(bus.peek::<u32>(0x0020_0000), 0xCAFE_F00D);
        bus.poke::<u32>(0x1F80_1060, RAM_SIZE_INIT);
        assert_eq!(bus.peek::<u32>(0x1F80_1060), RAM_SIZE_INIT);
    }

    #[test]
    fn test_read_string() {
        let mut bus = bus();
        for (i, b) in b"cdrom:\\TEST;1\0".iter().enumerate() {
            bus.poke::<u8>(0x100 + i as u32, *b);
        }
        assert_eq!(bus.read_string(0x100, 64), "cdrom:\\TEST;1");
    }
}
