// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Error types for the emulator
//!
//! The core distinguishes three error classes:
//!
//! 1. Simulated CPU exceptions (interrupts, address errors, overflow, ...)
//!    are *data*, not host errors. They never appear here; the CPU enters its
//!    exception vector and simulation continues.
//! 2. Configuration and loading errors (bad BIOS size, missing file,
//!    malformed cue sheet) surface to the caller through [`EmulatorError`].
//! 3. Invariant violations (mapper failure, scheduler overflow, duplicate
//!    JIT block) are fatal: the run loop terminates with the diagnostic.
//!    Construction-time checks report them as [`EmulatorError::Invariant`];
//!    hot-path checks (scheduler capacity, region remaps) halt by panicking
//!    with the same diagnostic instead of threading a `Result` through
//!    every device step.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EmulatorError>;

/// Error type covering configuration/loading failures and fatal invariant
/// violations
#[derive(Error, Debug)]
pub enum EmulatorError {
    /// BIOS image problems (wrong size, unreadable file)
    #[error("BIOS error: {0}")]
    BiosError(String),

    /// Configuration document problems
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Executable (PS-EXE) loading problems
    #[error("loader error: {0}")]
    LoaderError(String),

    /// Disc image problems (missing bin, malformed cue sheet, bad track mode)
    #[error("disc error: {0}")]
    DiscError(String),

    /// Memory card image problems
    #[error("memory card error: {0}")]
    MemcardError(String),

    /// Host address-space mapper failure (misaligned range, double map, OS
    /// mapping refusal). Fatal: the guest address space is unusable.
    #[error("mapper error: {0}")]
    MapperError(String),

    /// A core invariant was violated (duplicate JIT block, bad code-cache
    /// geometry, inconsistent device state). Fatal. Hot-path invariants
    /// like scheduler overflow panic with the same "invariant violation"
    /// diagnostic instead of allocating an error.
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Wrapped I/O error from file loading
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped JSON error from configuration parsing
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
