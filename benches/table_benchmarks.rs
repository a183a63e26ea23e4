//! Benchmarks for the indexed table: construction, slicing, matching.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kbpress::atom::{record, Record};
use kbpress::table::IntTable;

fn synthetic_rows(n: usize, spread: i32) -> Vec<Record> {
    /* Deterministic pseudo-random rows without duplicate collisions:
     * a simple LCG over the row index */
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        state = state.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
        let a = (state >> 33) as i32 % spread;
        rows.push(record(&[a.abs() + 1, i as i32 + 1]));
    }
    rows
}

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("int_table_new");
    for &n in &[1_000usize, 10_000, 100_000] {
        let rows = synthetic_rows(n, 1_000);
        group.bench_with_input(BenchmarkId::from_parameter(n), &rows, |b, rows| {
            b.iter(|| IntTable::new(black_box(rows.clone()), 2));
        });
    }
    group.finish();
}

fn bench_get_slice(c: &mut Criterion) {
    let rows = synthetic_rows(100_000, 1_000);
    let table = IntTable::new(rows, 2);
    c.bench_function("int_table_get_slice", |b| {
        b.iter(|| {
            for val in 1..100 {
                black_box(table.get_slice(0, black_box(val)));
            }
        });
    });
}

fn bench_match_slices(c: &mut Criterion) {
    let table_a = IntTable::new(synthetic_rows(50_000, 500), 2);
    let table_b = IntTable::new(synthetic_rows(50_000, 500), 2);
    c.bench_function("int_table_match_two_tables", |b| {
        b.iter(|| IntTable::match_slices(black_box(&table_a), 0, black_box(&table_b), 0));
    });
}

criterion_group!(benches, bench_construction, bench_get_slice, bench_match_slices);
criterion_main!(benches);
