// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 psxcore contributors
//

//! Interpreter hot-loop benchmark

use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

use psxcore::core::cpu::Cpu;
use psxcore::core::memory::Bus;

/// A small arithmetic loop: 64 iterations of add/branch
fn setup() -> (Cpu, Bus) {
    let mut bus = Bus::new().unwrap();

    let program: &[u32] = &[
        0x2401_0040, // addiu r1, zero, 64
        0x2402_0000, // addiu r2, zero, 0
        // loop:
        0x2442_0003, // addiu r2, r2, 3
        0x2421_FFFF, // addiu r1, r1, -1
        0x1420_FFFD, // bne r1, zero, loop
        0x0000_0000, // nop (delay)
        0x0800_0040, // j 0x100 (restart)
        0x0000_0000, // nop
    ];
    for (i, word) in program.iter().enumerate() {
        bus.poke::<u32>(0x100 + (i as u32) * 4, *word);
    }

    let mut cpu = Cpu::new();
    cpu.set_pc(0x100);
    (cpu, bus)
}

fn interpreter_benchmark(c: &mut Criterion) {
    c.bench_function("cpu_step_loop", |b| {
        let (mut cpu, mut bus) = setup();
        b.iter(|| {
            for _ in 0..1000 {
                black_box(cpu.step(&mut bus));
            }
            bus.curr_cycles = 0;
        });
    });

    c.bench_function("cpu_step_with_scheduler", |b| {
        let (mut cpu, mut bus) = setup();
        b.iter(|| {
            for _ in 0..1000 {
                cpu.step(&mut bus);
                let cycles = std::mem::take(&mut bus.curr_cycles);
                bus.advance_time(black_box(cycles));
            }
        });
    });
}

criterion_group!(benches, interpreter_benchmark);
criterion_main!(benches);
