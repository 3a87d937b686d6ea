//! Benchmarks for content patches.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pdfgen_core::events::patch::{apply, diff, serialize_content};
use pdfgen_core::events::TemplateContent;
use serde_json::json;

fn content(components: usize, edited: Option<usize>) -> TemplateContent {
    TemplateContent {
        components: (0..components)
            .map(|i| {
                let text = if Some(i) == edited { "edited".to_string() } else { format!("Line {}", i) };
                json!({"id": format!("c{}", i), "type": "text", "props": {"text": text, "x": i % 12, "y": i}})
            })
            .collect(),
        ..TemplateContent::default()
    }
}

fn bench_diff(c: &mut Criterion) {
    let mut group = c.benchmark_group("patch_diff");
    for n in [10, 100, 1_000] {
        let old = serialize_content(&content(n, None)).unwrap();
        let new = serialize_content(&content(n, Some(n / 2))).unwrap();
        group.throughput(Throughput::Bytes(old.len() as u64));
        group.bench_with_input(BenchmarkId::new("single_edit", n), &(old, new), |b, (old, new)| {
            b.iter(|| black_box(diff(old, new)));
        });
    }
    group.finish();
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("patch_apply");
    for n in [10, 100, 1_000] {
        let old = serialize_content(&content(n, None)).unwrap();
        let new = serialize_content(&content(n, Some(n / 2))).unwrap();
        let patch = diff(&old, &new);
        group.throughput(Throughput::Bytes(old.len() as u64));
        group.bench_with_input(BenchmarkId::new("single_edit", n), &(old, patch), |b, (old, patch)| {
            b.iter(|| black_box(apply(old, patch).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_diff, bench_apply);
criterion_main!(benches);
