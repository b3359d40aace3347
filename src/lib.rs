// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! psxcore: a cycle-level PlayStation (PSX) core emulation engine
//!
//! This crate implements the subsystems required to execute a PS1 software
//! image at a cycle level: the host-backed guest address space, the MIPS
//! R3000A interpreter with COP0 and the GTE, the system bus, the global
//! event scheduler, and the peripheral state machines (DMA, GPU front-end,
//! CDROM drive, SIO, root counters, SPU).
//!
//! # Architecture
//!
//! - [`core::memory`]: guest address space, mirror mapper, system bus
//! - [`core::cpu`]: MIPS R3000A interpreter and COP0
//! - [`core::gte`]: COP2 geometry engine
//! - [`core::scheduler`]: timestamped event queue
//! - [`core::dma`], [`core::gpu`], [`core::cdrom`], [`core::sio`],
//!   [`core::timers`], [`core::spu`]: peripherals
//! - [`core::kernel`]: BIOS HLE hooks and filesystem views
//! - [`core::system`]: wiring and the outer run loop
//!
//! # Getting Started
//!
//! 1. Build a [`core::config::SystemConfig`] (or load one from JSON)
//! 2. Create a [`core::system::System`] from it
//! 3. Run the emulation loop
//!
//! # Error Handling
//!
//! All fallible operations return [`core::error::Result<T>`], an alias for
//! `Result<T, EmulatorError>`. Simulated CPU exceptions are not host errors;
//! they are data handled inside one CPU step.

pub mod core;

// Re-export commonly used types
pub use core::error::{EmulatorError, Result};
