// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! System configuration
//!
//! A JSON document describing the machine to build: BIOS path, controller
//! and memory-card slots, optional disc, and debugging/logging switches.
//! Loaded with `serde_json`; every field has a default so partial documents
//! are accepted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::Result;

/// Controller type connected to a pad slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ControllerKind {
    /// Nothing plugged in
    #[default]
    None,
    /// Standard digital controller
    Standard,
}

/// One controller slot
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ControllerSlot {
    pub connected: bool,
    pub kind: ControllerKind,
}

/// One memory-card slot
///
/// If `path` names a file that does not exist, an empty (zero-filled)
/// 128 KiB image is created on connect.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemcardSlot {
    pub connected: bool,
    pub path: String,
}

/// Logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// One of ERROR/WARN/INFO/DEBUG
    pub level: String,
    /// Category tags to keep (empty = all)
    pub filters: Vec<String>,
    pub log_to_console: bool,
    pub log_to_file: bool,
    pub file_path: String,
    /// Trace BIOS syscalls at call sites
    pub log_syscalls: bool,
    /// Syscall names to keep out of the trace
    pub silence_syscalls: Vec<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "WARN".to_string(),
            filters: Vec::new(),
            log_to_console: true,
            log_to_file: false,
            file_path: String::new(),
            log_syscalls: false,
            silence_syscalls: Vec::new(),
        }
    }
}

/// Top-level system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Path to a 512 KiB BIOS image. Any other size is rejected at load.
    pub bios_path: String,

    pub controller_1: ControllerSlot,
    pub controller_2: ControllerSlot,

    pub memcard_1: MemcardSlot,
    pub memcard_2: MemcardSlot,

    /// Optional `.cue` sheet (with its `.bin` next to it)
    pub disc_path: Option<String>,

    /// Honor hardware PC breakpoints in the run loop
    pub enable_breakpoints: bool,
    /// Intercept BIOS vectors 0xA0/0xB0/0xC0
    pub enable_hle: bool,

    pub logger: LoggerConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            bios_path: "bios/SCPH1001.BIN".to_string(),
            controller_1: ControllerSlot {
                connected: true,
                kind: ControllerKind::Standard,
            },
            controller_2: ControllerSlot::default(),
            memcard_1: MemcardSlot {
                connected: true,
                path: "memcards/card1.mc".to_string(),
            },
            memcard_2: MemcardSlot::default(),
            disc_path: None,
            enable_breakpoints: true,
            enable_hle: true,
            logger: LoggerConfig::default(),
        }
    }
}

impl SystemConfig {
    /// Load a configuration document from a JSON file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let conf = serde_json::from_str(&text)?;
        Ok(conf)
    }

    /// Serialize the configuration back to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrip() {
        let conf = SystemConfig::default();
        let json = conf.to_json().unwrap();
        let back: SystemConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.bios_path, conf.bios_path);
        assert_eq!(back.controller_1.kind, ControllerKind::Standard);
        assert!(back.enable_hle);
    }

    #[test]
    fn test_partial_document_uses_defaults() {
        // Missing fields are not an error as long as the required ones exist
        let json = r#"{
            "bios_path": "roms/bios.bin",
            "controller_1": {"connected": false, "kind": "None"},
            "controller_2": {"connected": false, "kind": "None"},
            "memcard_1": {"connected": false, "path": ""},
            "memcard_2": {"connected": false, "path": ""},
            "disc_path": null,
            "enable_breakpoints": true,
            "enable_hle": false,
            "logger": {
                "level": "DEBUG",
                "filters": [],
                "log_to_console": true,
                "log_to_file": false,
                "file_path": "",
                "log_syscalls": true,
                "silence_syscalls": ["putchar"]
            }
        }"#;
        let conf: SystemConfig = serde_json::from_str(json).unwrap();
        assert_eq!(conf.bios_path, "roms/bios.bin");
        assert!(!conf.enable_hle);
        assert_eq!(conf.logger.silence_syscalls, vec!["putchar".to_string()]);
    }
}
