//! Benchmark for identifier parsing on the correlation hot path
//!
//! Datastore and host scans parse one identifier per candidate, so these run
//! once per volume or host on every array.

use array_orchestrator::correlation::identifiers::{
    naa_to_volume_serial, serial_eq, split_wwns, storage_host_name, vvol_array_serial, wwn_eq,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

fn bench_naa(c: &mut Criterion) {
    let mut group = c.benchmark_group("identifiers");
    group.throughput(Throughput::Elements(1));

    group.bench_function("naa_to_volume_serial", |b| {
        b.iter(|| naa_to_volume_serial(black_box("naa.624a93702dcf29ad6aca4913000113d5")));
    });

    group.bench_function("naa_rejects_foreign_disk", |b| {
        b.iter(|| naa_to_volume_serial(black_box("naa.600508b1001c4d4e5f6a7b8c9d0e1f20")));
    });

    group.bench_function("vvol_array_serial", |b| {
        b.iter(|| vvol_array_serial(black_box("vvol:2dcf29ad6aca4913-b62ea15875c6635d")));
    });

    group.finish();
}

fn bench_serial_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("identifiers");

    // One array's worth of volume serials
    let serials: Vec<String> = (0..5000u64)
        .map(|i| format!("2DCF29AD6ACA{:012X}", i))
        .collect();
    group.throughput(Throughput::Elements(serials.len() as u64));

    group.bench_function("serial_scan_5000", |b| {
        b.iter(|| {
            serials
                .iter()
                .any(|s| serial_eq(s, black_box("2dcf29ad6aca000000001387")))
        });
    });

    group.finish();
}

fn bench_wwn(c: &mut Criterion) {
    let mut group = c.benchmark_group("identifiers");
    group.throughput(Throughput::Elements(1));

    let raw = "2100001b32a0c1d2\n2100001b32a0c1d3 2100001b32a0c1d4\r\n2100001b32a0c1d5";
    group.bench_function("split_wwns_4", |b| {
        b.iter(|| split_wwns(black_box(raw)));
    });

    group.bench_function("wwn_eq_separated", |b| {
        b.iter(|| wwn_eq(black_box("21:00:00:1b:32:a0:c1:d2"), black_box("2100001B32A0C1D2")));
    });

    group.bench_function("storage_host_name", |b| {
        b.iter(|| storage_host_name(black_box("esxi-01.wd1.lab.example.com")));
    });

    group.finish();
}

criterion_group!(benches, bench_naa, bench_serial_scan, bench_wwn);
criterion_main!(benches);
