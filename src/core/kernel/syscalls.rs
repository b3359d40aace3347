// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! BIOS syscall descriptors
//!
//! Function identity is `(vector << 4) | r9`: 0xA__, 0xB__ and 0xC__ ids
//! for the three dispatch vectors. Each descriptor names the function and
//! types its parameters so call-site traces read like source.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::core::cpu::Cpu;
use crate::core::memory::Bus;

/// Parameter types a descriptor can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Uint,
    Char,
    CharPtr,
    VoidPtr,
    Bool,
    AccessMode,
    SeekMode,
    EventClass,
    EventMode,
}

/// One syscall descriptor
#[derive(Debug, Clone)]
pub struct Syscall {
    pub name: &'static str,
    pub params: &'static [(&'static str, ParamType)],
}

use ParamType::*;

/// `(function id, name, parameters)` for every call the tracer knows
const DESCRIPTORS: &[(u32, &str, &[(&str, ParamType)])] = &[
    (0xA00, "open", &[("filename", CharPtr), ("accessmode", AccessMode)]),
    (0xA01, "lseek", &[("fd", Int), ("offset", Int), ("seekmode", SeekMode)]),
    (0xA02, "read", &[("fd", Int), ("dst", VoidPtr), ("len", Uint)]),
    (0xA03, "write", &[("fd", Int), ("src", VoidPtr), ("len", Uint)]),
    (0xA04, "close", &[("fd", Int)]),
    (0xA05, "ioctl", &[("fd", Int), ("cmd", Int), ("arg", Int)]),
    (0xA06, "exit", &[("exitcode", Int)]),
    (0xA07, "isatty", &[("fd", Int)]),
    (0xA08, "getc", &[("fd", Int)]),
    (0xA09, "putch", &[("char", Char), ("fd", Int)]),
    (0xA2F, "rand", &[]),
    (0xA33, "malloc", &[("size", Uint)]),
    (0xA39, "InitHeap", &[("addr", VoidPtr), ("size", Uint)]),
    (0xA3B, "getchar", &[]),
    (0xA3C, "putchar", &[("char", Char)]),
    (0xA3F, "printf", &[("str", CharPtr)]),
    (0xA42, "Load", &[("filename", CharPtr), ("headerbuf", VoidPtr)]),
    (0xA43, "Exec", &[("headerbuf", VoidPtr), ("param1", Uint), ("param2", Uint)]),
    (0xA44, "FlushCache", &[]),
    (0xA49, "GPU_cw", &[("cmd", Uint)]),
    (0xA70, "_bu_init", &[]),
    (0xA96, "AddCDROMDevice", &[]),
    (0xA97, "AddMemcardDevice", &[]),
    (0xA99, "add_nullcon_driver", &[]),
    (0xAA1, "SystemError", &[("type", Char), ("code", Uint)]),
    (0xAA3, "DequeueCdIntr", &[]),
    (0xAA7, "bufs_cb_0", &[]),
    (0xAA9, "bufs_cb_2", &[]),
    (0xAAB, "_card_info", &[("port", Uint)]),
    (0xAAD, "_card_auto", &[("flag", Bool)]),
    (0xB00, "alloc_kernel_memory", &[("size", Uint)]),
    (0xB07, "DeliverEvent", &[("class", EventClass), ("spec", Uint)]),
    (0xB08, "OpenEvent", &[("class", EventClass), ("spec", Uint), ("mode", EventMode), ("func", VoidPtr)]),
    (0xB09, "CloseEvent", &[("event", Uint)]),
    (0xB0A, "WaitEvent", &[("event", Uint)]),
    (0xB0B, "TestEvent", &[("event", Uint)]),
    (0xB0C, "EnableEvent", &[("event", Uint)]),
    (0xB0E, "OpenThread", &[("pc", Uint), ("sp", Uint), ("gp", Uint)]),
    (0xB0F, "CloseThread", &[("handle", Uint)]),
    (0xB10, "ChangeThread", &[("handle", Uint)]),
    (0xB12, "InitPAD2", &[("buf1", VoidPtr), ("size1", Uint), ("buf2", VoidPtr), ("size2", Uint)]),
    (0xB13, "StartPAD2", &[]),
    (0xB17, "ReturnFromException", &[]),
    (0xB18, "ResetEntryInt", &[]),
    (0xB19, "HookEntryInt", &[("addr", VoidPtr)]),
    (0xB20, "UnDeliverEvent", &[("class", EventClass), ("spec", Uint)]),
    (0xB32, "open", &[("filename", CharPtr), ("accessmode", AccessMode)]),
    (0xB33, "lseek", &[("fd", Int), ("offset", Int), ("seekmode", SeekMode)]),
    (0xB34, "read", &[("fd", Int), ("dst", VoidPtr), ("len", Uint)]),
    (0xB35, "write", &[("fd", Int), ("src", VoidPtr), ("len", Uint)]),
    (0xB36, "close", &[("fd", Int)]),
    (0xB37, "ioctl", &[("fd", Int), ("cmd", Int), ("arg", Int)]),
    (0xB38, "exit", &[("exitcode", Int)]),
    (0xB39, "isatty", &[("fd", Int)]),
    (0xB3A, "getc", &[("fd", Int)]),
    (0xB3B, "putch", &[("char", Char), ("fd", Int)]),
    (0xB3C, "getchar", &[]),
    (0xB3D, "putchar", &[("char", Char)]),
    (0xB3F, "puts", &[("str", CharPtr)]),
    (0xB45, "erase", &[("filename", CharPtr)]),
    (0xB47, "AddDrv", &[("dev_info", Uint)]),
    (0xB4A, "InitCARD2", &[("pad_enable", Bool)]),
    (0xB4B, "StartCARD2", &[]),
    (0xB4D, "_card_info_subfunc", &[("port", Uint)]),
    (0xB4E, "_card_write", &[("port", Uint), ("sector", Uint), ("src", VoidPtr)]),
    (0xB4F, "_card_read", &[("port", Uint), ("sector", Uint), ("dst", VoidPtr)]),
    (0xB50, "_new_card", &[]),
    (0xB58, "_card_chan", &[]),
    (0xB5B, "ChangeClearPAD", &[("int", Int)]),
    (0xB5C, "_card_status", &[("port", Uint)]),
    (0xB5D, "_card_wait", &[("port", Uint)]),
    (0xC00, "EnqueueTimerAndVBlankIrqs", &[("priority", Uint)]),
    (0xC01, "EnqueueSyscallHandler", &[("priority", Uint)]),
    (0xC02, "SysEnqIntRP", &[("priority", Uint), ("struc", VoidPtr)]),
    (0xC03, "SysDeqIntRP", &[("priority", Uint), ("struc", VoidPtr)]),
    (0xC07, "InstallExceptionHandlers", &[]),
    (0xC08, "SysInitMemory", &[("addr", VoidPtr), ("size", Uint)]),
    (0xC0A, "ChangeClearRCnt", &[("timer", Uint), ("flag", Uint)]),
    (0xC0C, "InitDefInt", &[("priority", Uint)]),
    (0xC12, "InstallDevices", &[("ttyflag", Uint)]),
    (0xC1A, "set_card_find_mode", &[("mode", Bool)]),
    (0xC1C, "AdjustA0Table", &[]),
    (0xC1D, "get_card_find_mode", &[]),
];

fn table() -> &'static HashMap<u32, Syscall> {
    static TABLE: OnceLock<HashMap<u32, Syscall>> = OnceLock::new();
    TABLE.get_or_init(|| {
        DESCRIPTORS
            .iter()
            .map(|&(id, name, params)| (id, Syscall { name, params }))
            .collect()
    })
}

/// Descriptor lookup; unknown ids get a placeholder
pub fn descriptor(function_id: u32) -> Syscall {
    table().get(&function_id).cloned().unwrap_or(Syscall {
        name: "UNKNOWN",
        params: &[],
    })
}

/// Every id carrying `name` (open/read/... exist on both the A and B
/// vectors)
pub fn ids_by_name(name: &str) -> Vec<u32> {
    table()
        .iter()
        .filter(|(_, syscall)| syscall.name == name)
        .map(|(&id, _)| id)
        .collect()
}

fn escape_char(value: u8) -> String {
    match value {
        b'\n' => "\\n".to_string(),
        b'\t' => "\\t".to_string(),
        b'\r' => "\\r".to_string(),
        0x20..=0x7E => (value as char).to_string(),
        other => format!("\\x{other:02X}"),
    }
}

/// Render one call site: `name(param=value, ...)` with arguments pulled
/// from a0..a3
pub fn format_call(function_id: u32, cpu: &Cpu, bus: &mut Bus) -> String {
    let syscall = descriptor(function_id);

    let mut rendered = format!("{}(", syscall.name);
    for (index, (name, ty)) in syscall.params.iter().enumerate() {
        // Arguments beyond a3 would live on the stack; no descriptor
        // reaches that far
        let raw = cpu.reg(4 + index as u8);
        let value = match ty {
            Int => format!("{}", raw as i32),
            Uint | AccessMode | SeekMode | EventClass | EventMode => format!("0x{raw:X}"),
            Char => format!("'{}'", escape_char(raw as u8)),
            CharPtr => format!("\"{}\"", bus.read_string(raw, 64)),
            VoidPtr => format!("0x{raw:08X}"),
            Bool => format!("{}", raw != 0),
        };
        if index > 0 {
            rendered.push_str(", ");
        }
        rendered.push_str(name);
        rendered.push('=');
        rendered.push_str(&value);
    }
    rendered.push(')');
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_descriptor() {
        let desc = descriptor(0xA00);
        assert_eq!(desc.name, "open");
        assert_eq!(desc.params.len(), 2);
        assert_eq!(desc.params[0].1, ParamType::CharPtr);
    }

    #[test]
    fn test_unknown_descriptor() {
        assert_eq!(descriptor(0xAFF).name, "UNKNOWN");
    }

    #[test]
    fn test_ids_by_name_finds_both_vectors() {
        let mut ids = ids_by_name("open");
        ids.sort();
        assert_eq!(ids, vec![0xA00, 0xB32]);
    }

    #[test]
    fn test_format_call_renders_arguments() {
        let mut bus = Bus::new().unwrap();
        let mut cpu = Cpu::new();

        // putch('A', 1)
        cpu.set_reg(4, b'A' as u32);
        cpu.set_reg(5, 1);
        assert_eq!(format_call(0xA09, &cpu, &mut bus), "putch(char='A', fd=1)");

        // printf with a guest string
        for (i, b) in b"hi\0".iter().enumerate() {
            bus.poke::<u8>(0x1000 + i as u32, *b);
        }
        cpu.set_reg(4, 0x1000);
        assert_eq!(format_call(0xA3F, &cpu, &mut bus), "printf(str=\"hi\")");
    }
}
