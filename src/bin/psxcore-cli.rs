// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Headless runner for the core engine
//!
//! Loads a configuration (JSON), builds the machine, optionally launches a
//! PS-EXE or inserts a disc, and runs frame-by-frame until a breakpoint
//! fires or the frame limit is reached.

use std::path::PathBuf;

use clap::Parser;

use psxcore::core::config::SystemConfig;
use psxcore::core::system::System;
use psxcore::Result;

#[derive(Parser, Debug)]
#[command(name = "psxcore-cli", about = "Headless PSX core runner")]
struct Args {
    /// JSON configuration document
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// BIOS image path (overrides the configuration)
    #[arg(long)]
    bios: Option<PathBuf>,

    /// PS-EXE to launch after the BIOS settles
    #[arg(long)]
    exe: Option<PathBuf>,

    /// Cue sheet to insert (overrides the configuration)
    #[arg(long)]
    disc: Option<PathBuf>,

    /// How many frames (VBlanks) to run; 0 runs until a breakpoint stops
    /// the machine
    #[arg(long, default_value_t = 0)]
    frames: u64,

    /// Hardware PC breakpoints (hex)
    #[arg(long, value_parser = parse_hex)]
    breakpoint: Vec<u32>,
}

fn parse_hex(value: &str) -> std::result::Result<u32, String> {
    let trimmed = value.trim_start_matches("0x");
    u32::from_str_radix(trimmed, 16).map_err(|err| err.to_string())
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SystemConfig::load(path)?,
        None => SystemConfig::default(),
    };
    if let Some(bios) = &args.bios {
        config.bios_path = bios.display().to_string();
    }
    if let Some(disc) = &args.disc {
        config.disc_path = Some(disc.display().to_string());
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logger.level.to_lowercase()),
    )
    .init();

    let mut system = System::new(config)?;

    for &address in &args.breakpoint {
        system.add_hardware_break(address);
    }

    if let Some(exe) = &args.exe {
        system.load_exe(exe, None)?;
        log::info!("Launched {}", exe.display());
    }

    let mut frame: u64 = 0;
    loop {
        let hit_break = system.run_until_breakpoint();
        if hit_break {
            log::warn!(
                "Hardware breakpoint at PC=0x{:08X} after {frame} frames",
                system.cpu().pc()
            );
            system.cpu().dump_registers();
            break;
        }
        if system.stopped() {
            log::info!("Machine stopped after {frame} frames");
            break;
        }

        frame += 1;
        if args.frames != 0 && frame >= args.frames {
            log::info!("Frame limit of {} reached", args.frames);
            break;
        }
    }

    Ok(())
}
