//! Benchmark: first-fit scans over a full-block bitmap.
//!
//! Measures `bitmap_count_set` and `bitmap_find_clear` on a 4096-byte
//! bitmap (32768 bits) with the free space scattered the way a
//! long-lived volume leaves it.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use vdisk_alloc::{bitmap_count_set, bitmap_find_clear};

/// Build a worn bitmap: 4096 bytes, ~5% free bits in small clusters.
fn make_bitmap() -> Vec<u8> {
    let mut bm = vec![0xFF_u8; 4096];
    // Free a 32-bit cluster every ~650 bits.
    let mut pos = 100_usize;
    while pos + 32 < 32768 {
        for i in pos..pos + 32 {
            bm[i / 8] &= !(1 << (i % 8));
        }
        pos += 650;
    }
    bm
}

fn bench_count_set(c: &mut Criterion) {
    let bm = make_bitmap();
    c.bench_function("bitmap_count_set_full_block", |b| {
        b.iter(|| black_box(bitmap_count_set(black_box(&bm), 32768)));
    });
}

fn bench_find_clear(c: &mut Criterion) {
    let bm = make_bitmap();
    c.bench_function("bitmap_find_clear_worn", |b| {
        b.iter(|| black_box(bitmap_find_clear(black_box(&bm), 32768)));
    });

    // Fully used bitmap: the scan has to walk every bit and fail.
    let full = vec![0xFF_u8; 4096];
    c.bench_function("bitmap_find_clear_exhausted", |b| {
        b.iter(|| black_box(bitmap_find_clear(black_box(&full), 32768)));
    });
}

criterion_group!(benches, bench_count_set, bench_find_clear);
criterion_main!(benches);
