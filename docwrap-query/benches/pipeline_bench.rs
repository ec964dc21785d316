//! Benchmarks for filter, update and pipeline construction.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use docwrap_query::expression::{self, math};
use docwrap_query::pipeline::{Pipeline, SortDirection};
use docwrap_query::{Filter, Update, document, filter, update};

fn create_and_filter(count: usize) -> Filter {
    filter::and((0..count).map(|i| filter::equal(&format!("field_{}", i), i as i64)))
}

fn create_nested_filter(depth: usize) -> Filter {
    if depth == 0 {
        filter::equal("leaf", true)
    } else {
        filter::or([
            create_nested_filter(depth - 1),
            filter::not(filter::greater_than(&format!("level_{}", depth), depth as i64)),
        ])
    }
}

fn bench_filter_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_construction");

    group.bench_function("equal", |b| {
        b.iter(|| black_box(filter::equal(black_box("email"), black_box("a@b.com"))))
    });

    for count in [2, 10, 50] {
        group.bench_with_input(BenchmarkId::new("and", count), &count, |b, &count| {
            b.iter(|| black_box(create_and_filter(count)))
        });
    }

    for depth in [2, 5, 10] {
        group.bench_with_input(BenchmarkId::new("nested", depth), &depth, |b, &depth| {
            b.iter(|| black_box(create_nested_filter(depth)))
        });
    }

    group.finish();
}

fn bench_update_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_merge");

    for count in [2, 10, 50] {
        group.bench_with_input(BenchmarkId::new("disjoint", count), &count, |b, &count| {
            b.iter(|| {
                let fragments = (0..count).map(|i| {
                    if i % 2 == 0 {
                        update::set(&format!("field_{}", i), i as i64)
                    } else {
                        update::increment(&format!("counter_{}", i), 1)
                    }
                });
                black_box(Update::merge(fragments))
            })
        });
    }

    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");

    let prefix = Pipeline::matching(filter::exists("email", true))
        .sort([("createdAt", SortDirection::Descending)])
        .join("orders", "_id", "customer", "orders");

    group.bench_function("branch_from_prefix", |b| {
        b.iter(|| {
            let left = black_box(&prefix).limit(10);
            let right = black_box(&prefix).skip(10).count("rest");
            black_box((left, right))
        })
    });

    for stages in [5, 20, 100] {
        group.bench_with_input(
            BenchmarkId::new("to_documents", stages),
            &stages,
            |b, &stages| {
                let pipeline = (0..stages).fold(Pipeline::all(), |p, i| {
                    p.add_fields(document! {
                        format!("f{}", i) => math::multiply([expression::field("price"), expression::field("qty")])
                    })
                });
                b.iter(|| black_box(pipeline.to_documents()))
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_filter_construction,
    bench_update_merge,
    bench_pipeline
);
criterion_main!(benches);
