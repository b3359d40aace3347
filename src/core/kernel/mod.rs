// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Kernel HLE
//!
//! Syscall hooks at the BIOS vectors 0xA0/0xB0/0xC0: call sites are
//! intercepted at jump time with function identity `(vector << 4) | r9`,
//! entry hooks fire on the way in, and exit hooks fire when the CPU
//! returns through the recorded exit PC. Hook removal is deferred so a
//! hook may remove itself; the drain happens between steps. The module
//! also carries the in-RAM/ROM kernel introspection helpers and the
//! filesystem views for save-file mounting.

pub mod cdfs;
pub mod exe;
pub mod mcfs;
pub mod syscalls;

use std::collections::HashSet;

use crate::core::cpu::{Cpu, SyscallFrame};
use crate::core::memory::{region, Bus};

/// `ReturnFromException` never returns; it must not enter the frame stack
const RETURN_FROM_EXCEPTION: u32 = 0xB17;

/// Handle for removing a registered hook
pub type HookId = u64;

/// Hook callback: `(function_id, cpu, bus)`
pub type HookFn = Box<dyn FnMut(u32, &mut Cpu, &mut Bus)>;

struct Hook {
    id: HookId,
    function_id: u32,
    callback: HookFn,
}

/// BIOS-vector HLE state
pub struct Kernel {
    hle_enabled: bool,
    hooks_enabled: bool,
    log_syscalls: bool,
    silenced_syscalls: HashSet<u32>,

    entry_hooks: Vec<Hook>,
    exit_hooks: Vec<Hook>,
    next_hook_id: HookId,

    /// Removals deferred until the next drain so hooks can remove
    /// themselves while firing
    entry_hooks_scheduled_for_removal: Vec<HookId>,
    exit_hooks_scheduled_for_removal: Vec<HookId>,
}

impl Kernel {
    pub fn new() -> Self {
        Self {
            hle_enabled: true,
            hooks_enabled: true,
            log_syscalls: false,
            silenced_syscalls: HashSet::new(),
            entry_hooks: Vec::new(),
            exit_hooks: Vec::new(),
            next_hook_id: 0,
            entry_hooks_scheduled_for_removal: Vec::new(),
            exit_hooks_scheduled_for_removal: Vec::new(),
        }
    }

    pub fn set_hle_enabled(&mut self, enabled: bool) {
        self.hle_enabled = enabled;
    }

    pub fn set_hooks_enabled(&mut self, enabled: bool) {
        self.hooks_enabled = enabled;
    }

    pub fn set_syscall_logging(&mut self, enabled: bool) {
        self.log_syscalls = enabled;
    }

    /// Keep `name`'s ids out of the syscall trace (printf spam and the
    /// like)
    pub fn silence_syscall(&mut self, name: &str) {
        for id in syscalls::ids_by_name(name) {
            self.silenced_syscalls.insert(id);
        }
    }

    pub fn set_syscall_silent(&mut self, function_id: u32, silent: bool) {
        if silent {
            self.silenced_syscalls.insert(function_id);
        } else {
            self.silenced_syscalls.remove(&function_id);
        }
    }

    pub fn is_syscall_silent(&self, function_id: u32) -> bool {
        self.silenced_syscalls.contains(&function_id)
    }

    // ------------------------------------------------------------------
    // Hooks
    // ------------------------------------------------------------------

    pub fn insert_entry_hook(&mut self, function_id: u32, callback: HookFn) -> HookId {
        let id = self.next_hook_id;
        self.next_hook_id += 1;
        self.entry_hooks.push(Hook {
            id,
            function_id,
            callback,
        });
        id
    }

    pub fn insert_exit_hook(&mut self, function_id: u32, callback: HookFn) -> HookId {
        let id = self.next_hook_id;
        self.next_hook_id += 1;
        self.exit_hooks.push(Hook {
            id,
            function_id,
            callback,
        });
        id
    }

    /// Deferred: the hook disappears at the next drain
    pub fn remove_entry_hook(&mut self, id: HookId) {
        self.entry_hooks_scheduled_for_removal.push(id);
    }

    /// Deferred: the hook disappears at the next drain
    pub fn remove_exit_hook(&mut self, id: HookId) {
        self.exit_hooks_scheduled_for_removal.push(id);
    }

    /// Apply deferred hook removals; the outer loop calls this between
    /// steps
    pub fn drain_deferred(&mut self) {
        if !self.entry_hooks_scheduled_for_removal.is_empty() {
            let doomed = std::mem::take(&mut self.entry_hooks_scheduled_for_removal);
            self.entry_hooks.retain(|hook| !doomed.contains(&hook.id));
        }
        if !self.exit_hooks_scheduled_for_removal.is_empty() {
            let doomed = std::mem::take(&mut self.exit_hooks_scheduled_for_removal);
            self.exit_hooks.retain(|hook| !doomed.contains(&hook.id));
        }
    }

    // ------------------------------------------------------------------
    // Vector traffic
    // ------------------------------------------------------------------

    /// A jump landed on a BIOS vector. Returns whether the call should
    /// enter the ROM (the HLE layer here traces and hooks; the ROM still
    /// does the work).
    pub fn on_vector_call(&mut self, cpu: &mut Cpu, bus: &mut Bus, vector: u32) -> bool {
        if !self.hle_enabled {
            return true;
        }

        let function_id = (vector << 4) | (cpu.reg(9) & 0xFF);

        if self.log_syscalls && !self.silenced_syscalls.contains(&function_id) {
            log::info!(
                "[SYSCALL] 0x{:03X} {}",
                function_id,
                syscalls::format_call(function_id, cpu, bus)
            );
        }

        if self.hooks_enabled {
            for hook in self
                .entry_hooks
                .iter_mut()
                .filter(|hook| hook.function_id == function_id)
            {
                (hook.callback)(function_id, cpu, bus);
            }
        }

        true
    }

    /// Record the frame for a call that entered the ROM
    pub fn record_frame(&self, cpu: &mut Cpu, vector: u32) {
        let function_id = (vector << 4) | (cpu.reg(9) & 0xFF);
        if function_id == RETURN_FROM_EXCEPTION {
            return;
        }

        let return_pc = cpu.reg(31) & region::SEGMENT_MASK;
        cpu.push_syscall_frame(SyscallFrame {
            exit_pc: return_pc,
            function_id,
            caller_pc: return_pc.wrapping_sub(8),
        });
    }

    /// Control returned through recorded exit PCs; pop every matching
    /// frame and fire its exit hooks
    pub fn on_vector_return(&mut self, cpu: &mut Cpu, bus: &mut Bus, address: u32) {
        while let Some(frame) = cpu.pop_syscall_frame(address) {
            if !self.hooks_enabled {
                continue;
            }
            let doomed = &self.exit_hooks_scheduled_for_removal;
            for hook in self
                .exit_hooks
                .iter_mut()
                .filter(|hook| hook.function_id == frame.function_id && !doomed.contains(&hook.id))
            {
                (hook.callback)(frame.function_id, cpu, bus);
            }
        }
    }

    // ------------------------------------------------------------------
    // ROM introspection
    // ------------------------------------------------------------------

    /// Kernel build date from the BCD word at BIOS+0x100
    pub fn kernel_bcd_date(&self, bus: &mut Bus) -> String {
        let base = region::KSEG1_START + region::offsets::BIOS;
        let date: u32 = bus.peek(base + 0x100);
        format!(
            "{:04X}-{:02X}-{:02X}",
            date >> 16,
            (date >> 8) & 0xFF,
            date & 0xFF
        )
    }

    /// ASCII maker string at BIOS+0x108
    pub fn kernel_maker(&self, bus: &mut Bus) -> String {
        let base = region::KSEG1_START + region::offsets::BIOS;
        bus.read_string(base + 0x108, 0x80)
    }

    /// ASCII version string following the maker
    pub fn kernel_version(&self, bus: &mut Bus) -> String {
        let base = region::KSEG1_START + region::offsets::BIOS;
        bus.read_string(base + 0x12C, 0x80)
    }

    /// Walk an exception priority chain in guest RAM
    ///
    /// Each element: `[next, second_function, handler_function, unused]`.
    /// The chain heads live in the table pointed to by 0x100 in the kernel
    /// table-of-tables.
    pub fn dump_exception_chain(&self, bus: &mut Bus, head: u32) -> Vec<(u32, u32, u32)> {
        let mut out = Vec::new();
        let mut element = head;
        // A corrupt chain must not spin us forever
        let mut guard = 0;
        while element != 0 && element & region::SEGMENT_MASK < 0x20_0000 && guard < 64 {
            let next: u32 = bus.peek(element);
            let second: u32 = bus.peek(element + 4);
            let handler: u32 = bus.peek(element + 8);
            out.push((element, second, handler));
            element = next;
            guard += 1;
        }
        out
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn fixture() -> (Kernel, Cpu, Bus) {
        (Kernel::new(), Cpu::new(), Bus::new().unwrap())
    }

    #[test]
    fn test_entry_hook_fires_on_matching_id() {
        let (mut kernel, mut cpu, mut bus) = fixture();
        let hits = Rc::new(Cell::new(0));

        let seen = hits.clone();
        kernel.insert_entry_hook(
            0xA3F,
            Box::new(move |id, _cpu, _bus| {
                assert_eq!(id, 0xA3F);
                seen.set(seen.get() + 1);
            }),
        );

        cpu.set_reg(9, 0x3F);
        assert!(kernel.on_vector_call(&mut cpu, &mut bus, 0xA0));
        assert_eq!(hits.get(), 1);

        // Different r9: no hit
        cpu.set_reg(9, 0x00);
        kernel.on_vector_call(&mut cpu, &mut bus, 0xA0);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_exit_hook_fires_on_frame_return() {
        let (mut kernel, mut cpu, mut bus) = fixture();
        let hits = Rc::new(Cell::new(0));

        let seen = hits.clone();
        kernel.insert_exit_hook(
            0xC00,
            Box::new(move |_, _, _| seen.set(seen.get() + 1)),
        );

        cpu.set_reg(9, 0x00);
        cpu.set_reg(31, 0x8001_2345 + 8);
        kernel.record_frame(&mut cpu, 0xC0);
        assert_eq!(cpu.syscall_depth(), 1);

        kernel.on_vector_return(&mut cpu, &mut bus, (0x8001_2345 + 8) & 0x1FFF_FFFF);
        assert_eq!(hits.get(), 1);
        assert_eq!(cpu.syscall_depth(), 0);
    }

    #[test]
    fn test_return_from_exception_skips_frame_stack() {
        let (kernel, mut cpu, _bus) = fixture();
        cpu.set_reg(9, 0x17);
        kernel.record_frame(&mut cpu, 0xB0);
        assert_eq!(cpu.syscall_depth(), 0);
    }

    #[test]
    fn test_hook_removal_is_deferred() {
        let (mut kernel, mut cpu, mut bus) = fixture();
        let hits = Rc::new(Cell::new(0));

        let seen = hits.clone();
        let hook = kernel.insert_entry_hook(
            0xB00,
            Box::new(move |_, _, _| seen.set(seen.get() + 1)),
        );

        kernel.remove_entry_hook(hook);
        // Not drained yet: still fires
        cpu.set_reg(9, 0x00);
        kernel.on_vector_call(&mut cpu, &mut bus, 0xB0);
        assert_eq!(hits.get(), 1);

        kernel.drain_deferred();
        kernel.on_vector_call(&mut cpu, &mut bus, 0xB0);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_silencing_by_name_covers_both_vectors() {
        let mut kernel = Kernel::new();
        kernel.silence_syscall("open");
        assert!(kernel.is_syscall_silent(0xA00));
        assert!(kernel.is_syscall_silent(0xB32));
        assert!(!kernel.is_syscall_silent(0xA02));
    }

    #[test]
    fn test_kernel_rom_strings() {
        let (kernel, _cpu, mut bus) = fixture();
        let mut image = vec![0u8; region::sizes::BIOS as usize];
        image[0x100..0x104].copy_from_slice(&0x1995_1204u32.to_le_bytes());
        image[0x108..0x108 + 4].copy_from_slice(b"CEX\0");
        bus.load_bios(&image).unwrap();

        assert_eq!(kernel.kernel_bcd_date(&mut bus), "1995-12-04");
        assert_eq!(kernel.kernel_maker(&mut bus), "CEX");
    }
}
