//! Benchmarks for attribute resolution

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use megamorph_engine::prelude::*;
use serde_json::json;
use std::sync::Arc;

const CONFIG: &str = r#"
models:
  book:
    aliases: { name: title }
    array_references: [related]
"#;

fn setup_store(related: usize) -> (Store, Arc<MegamorphicModel>) {
    let config = SchemaConfig::from_yaml(CONFIG).expect("valid config");
    let store = Store::with_config(&config).expect("valid schema");

    let refs: Vec<_> = (0..related).map(|i| json!(format!("urn:book:{}", i + 1))).collect();
    for i in 0..related {
        let attributes = json!({ "title": format!("Book {}", i + 1) });
        let attributes = attributes.as_object().cloned().unwrap_or_default();
        store
            .materialize(RawRecord::new((i + 1).to_string(), "book", attributes))
            .expect("included type");
    }

    let attributes = json!({ "title": "Dune", "author": "urn:author:1", "related": refs });
    let attributes = attributes.as_object().cloned().unwrap_or_default();
    let book = store
        .materialize(RawRecord::new("0", "book", attributes))
        .expect("included type");
    (store, book)
}

fn bench_scalar_reads(c: &mut Criterion) {
    let (_store, book) = setup_store(0);

    c.bench_function("scalar_read_cold", |b| {
        b.iter(|| {
            book.invalidate("title");
            black_box(book.get(black_box("title")).expect("live model"));
        })
    });

    book.get("title").expect("live model");

    c.bench_function("scalar_read_hot", |b| {
        b.iter(|| {
            black_box(book.get(black_box("title")).expect("live model"));
        })
    });

    c.bench_function("alias_read_hot", |b| {
        b.iter(|| {
            black_box(book.get(black_box("name")).expect("live model"));
        })
    });
}

fn bench_reference_reads(c: &mut Criterion) {
    let (_store, book) = setup_store(0);

    c.bench_function("unloaded_reference_cold", |b| {
        b.iter(|| {
            book.invalidate("author");
            black_box(book.get(black_box("author")).expect("live model"));
        })
    });
}

fn bench_array_references(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_reference_cold");

    for size in [10, 100, 1000] {
        let (_store, book) = setup_store(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                book.invalidate("related");
                black_box(book.get(black_box("related")).expect("live model"));
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_scalar_reads,
    bench_reference_reads,
    bench_array_references
);
criterion_main!(benches);
