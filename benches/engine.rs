// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Benchmarks for the circulation engine.
//!
//! Run with: cargo bench
//!
//! Benchmarks include:
//! - Single checkout/return cycle
//! - Sequential circulation throughput
//! - Parallel circulation over disjoint and shared copies
//! - Returnable-copy queries and consistency checks over a busy ledger

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use library_ledger_rs::{
    CopyId, CustomerId, Engine, NewBook, NewCustomer, RequestContext,
};
use rayon::prelude::*;

// =============================================================================
// Helper Functions
// =============================================================================

/// Engine with one book, `copies` copies and `customers` customers.
fn populated(copies: usize, customers: usize) -> (Engine, Vec<CopyId>, Vec<CustomerId>) {
    let engine = Engine::new();
    let ctx = RequestContext::new("bench");
    let book = engine
        .add_book(&ctx, NewBook::new("Dune", "Herbert", "Sci-Fi"))
        .unwrap();
    let copies = (0..copies)
        .map(|_| engine.add_copy(&ctx, book).unwrap())
        .collect();
    let customers = (0..customers)
        .map(|i| {
            engine
                .add_customer(
                    &ctx,
                    NewCustomer::new("Reader", format!("No{i}"), format!("reader{i}@example.org")),
                )
                .unwrap()
        })
        .collect();
    (engine, copies, customers)
}

// =============================================================================
// Single-Threaded Benchmarks
// =============================================================================

fn bench_checkout_return_cycle(c: &mut Criterion) {
    let (engine, copies, customers) = populated(1, 1);
    let ctx = RequestContext::new("bench");

    c.bench_function("checkout_return_cycle", |b| {
        b.iter(|| {
            engine
                .checkout(&ctx, black_box(copies[0]), customers[0])
                .unwrap();
            engine
                .return_book(&ctx, black_box(copies[0]), customers[0])
                .unwrap();
        })
    });
}

fn bench_sequential_circulation(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequential_circulation");

    for count in [100, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let (engine, copies, customers) = populated(count, 10);
                let ctx = RequestContext::new("bench");
                for (i, copy) in copies.iter().enumerate() {
                    engine
                        .checkout(&ctx, *copy, customers[i % customers.len()])
                        .unwrap();
                }
                black_box(&engine);
            })
        });
    }
    group.finish();
}

// =============================================================================
// Multi-Threaded Benchmarks
// =============================================================================

fn bench_parallel_disjoint_copies(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_disjoint_copies");

    for count in [1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter_batched(
                || populated(count, count),
                |(engine, copies, customers)| {
                    copies
                        .par_iter()
                        .zip(customers.par_iter())
                        .for_each(|(copy, customer)| {
                            let ctx = RequestContext::new("bench");
                            engine.checkout(&ctx, *copy, *customer).unwrap();
                        });
                    black_box(&engine);
                },
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn bench_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("contention");

    // Few copies, many requesters: most checkouts are rejected under lock.
    for copies in [1, 8, 64].iter() {
        let total_ops = 10_000;
        group.throughput(Throughput::Elements(total_ops as u64));
        group.bench_with_input(BenchmarkId::from_parameter(copies), copies, |b, &copies| {
            let (engine, copy_ids, customers) = populated(copies, 64);
            b.iter(|| {
                (0..total_ops).into_par_iter().for_each(|i| {
                    let ctx = RequestContext::new("bench");
                    let copy = copy_ids[i % copy_ids.len()];
                    let customer = customers[i % customers.len()];
                    if engine.checkout(&ctx, copy, customer).is_ok() {
                        engine.return_book(&ctx, copy, customer).unwrap();
                    }
                });
            })
        });
    }
    group.finish();
}

// =============================================================================
// Query Benchmarks
// =============================================================================

fn bench_open_transactions_for(c: &mut Criterion) {
    let mut group = c.benchmark_group("open_transactions_for");

    for history in [1_000, 10_000].iter() {
        // Busy ledger: many closed transactions and a few open ones.
        let (engine, copies, customers) = populated(100, 10);
        let ctx = RequestContext::new("bench");
        for i in 0..*history {
            let copy = copies[i % copies.len()];
            let customer = customers[i % customers.len()];
            engine.checkout(&ctx, copy, customer).unwrap();
            engine.return_book(&ctx, copy, customer).unwrap();
        }
        for (i, copy) in copies.iter().take(10).enumerate() {
            engine.checkout(&ctx, *copy, customers[i]).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(history), history, |b, _| {
            b.iter(|| {
                let open = engine.open_transactions_for(customers[0]).unwrap();
                black_box(open.count());
            })
        });
    }
    group.finish();
}

fn bench_consistency_check(c: &mut Criterion) {
    let (engine, copies, customers) = populated(1_000, 100);
    let ctx = RequestContext::new("bench");
    for (i, copy) in copies.iter().enumerate().filter(|(i, _)| i % 2 == 0) {
        engine
            .checkout(&ctx, *copy, customers[i % customers.len()])
            .unwrap();
    }

    c.bench_function("check_consistency_1000_copies", |b| {
        b.iter(|| engine.check_consistency().unwrap())
    });
}

criterion_group!(
    benches,
    bench_checkout_return_cycle,
    bench_sequential_circulation,
    bench_parallel_disjoint_copies,
    bench_contention,
    bench_open_transactions_for,
    bench_consistency_check,
);
criterion_main!(benches);
