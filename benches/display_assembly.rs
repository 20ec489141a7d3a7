//! Benchmarks for inbound display handling
//!
//! Measures the path from a raw SysEx message to an updated frame buffer:
//! - envelope parsing and sub-command dispatch
//! - full frame application (parse + unpack + copy)
//! - delta application for a two-page update
//!
//! Platform: Cross-platform (synthetic data, CI-safe)

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use sysex_bridge::codec::pack;
use sysex_bridge::display::DisplayAssembler;
use sysex_bridge::sysex::{self, SubCommand, outbound};
use sysex_bridge::types::DisplayGeometry;

fn full_frame_message(screen: &[u8]) -> Vec<u8> {
    let mut payload = vec![0, 0];
    payload.extend(pack(screen));
    outbound::build(&[0x02, 0x40, 0x01], &payload).expect("7-bit payload")
}

fn bench_parse(c: &mut Criterion) {
    let geometry = DisplayGeometry::default();
    let screen: Vec<u8> = (0..geometry.frame_size()).map(|i| (i % 251) as u8).collect();
    let message = full_frame_message(&screen);

    let mut group = c.benchmark_group("sysex_parse");
    group.throughput(Throughput::Bytes(message.len() as u64));
    group.bench_function("full_frame", |b| {
        b.iter(|| sysex::parse(black_box(&message)).map(|e| e.command.name()))
    });
    group.finish();
}

fn bench_apply_full(c: &mut Criterion) {
    let geometry = DisplayGeometry::default();
    let screen: Vec<u8> = (0..geometry.frame_size()).map(|i| if i % 9 < 4 { 0 } else { 0xC3 }).collect();
    let message = full_frame_message(&screen);
    let mut assembler = DisplayAssembler::new(geometry);

    let mut group = c.benchmark_group("display_apply");
    group.throughput(Throughput::Bytes(geometry.frame_size() as u64));
    group.bench_function("full_frame", |b| {
        b.iter(|| {
            let envelope = sysex::parse(black_box(&message)).expect("framed message");
            if let SubCommand::DisplayFull { row, col, packed } = envelope.command {
                assembler.apply_full(row, col, packed).expect("valid frame");
            }
        })
    });

    let patch = pack(&vec![0x81; 2 * geometry.width]);
    group.bench_function("two_page_delta", |b| {
        b.iter(|| assembler.apply_delta(black_box(2), black_box(2), black_box(&patch)).expect("fits frame"))
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_apply_full);
criterion_main!(benches);
