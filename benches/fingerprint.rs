//! Fingerprint and document benchmarks.
//!
//! Measures the cost of the no-op check that every merge pays: parsing the
//! target, fingerprinting its template region, and the full merge of an
//! unchanged template.
//!
//! # Running
//!
//! ```bash
//! cargo bench --bench fingerprint
//! # With a custom filter:
//! cargo bench --bench fingerprint -- parse
//! ```

use std::hint::black_box;

use chrono::{TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use tmerge::document::Document;
use tmerge::fingerprint::fingerprint_body;
use tmerge::{MergeConfig, Merger};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A template body of `n` lines with the occasional blank line.
fn template_of(n: usize) -> String {
    let mut out = String::with_capacity(n * 48);
    for i in 0..n {
        if i % 10 == 9 {
            out.push('\n');
        } else {
            out.push_str(&format!("- rule {i}: keep functions under fifty lines\n"));
        }
    }
    out
}

const SIZES: &[usize] = &[10, 100, 1_000];

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_fingerprint_body(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint_body");
    for &n in SIZES {
        let body = template_of(n);
        group.throughput(Throughput::Bytes(body.len() as u64));
        group.bench_with_input(BenchmarkId::new("lines", n), &body, |b, body| {
            b.iter(|| fingerprint_body(black_box(body)));
        });
    }
    group.finish();
}

fn bench_parse_and_fingerprint(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let mut group = c.benchmark_group("parse_and_fingerprint");
    for &n in SIZES {
        let text = Document::assemble("# notes\nkeep me\n", &template_of(n), now).render();
        group.throughput(Throughput::Bytes(text.len() as u64));
        group.bench_with_input(BenchmarkId::new("lines", n), &text, |b, text| {
            b.iter(|| Document::parse(black_box(text)).fingerprint());
        });
    }
    group.finish();
}

/// Full merge where the template is unchanged (the common case).
fn bench_noop_merge(c: &mut Criterion) {
    let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let mut group = c.benchmark_group("noop_merge");
    for &n in SIZES {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = dir.path().join("template.md");
        let target = dir.path().join("CLAUDE.md");
        std::fs::write(&source, template_of(n)).expect("write source");
        std::fs::write(&target, "# notes\n").expect("write target");

        let mut config = MergeConfig::default();
        config.lock.path = Some(dir.path().join("tmerge.lock"));
        let merger = Merger::new(config);
        merger.merge_at(&source, &target, now).expect("initial merge");

        group.bench_with_input(BenchmarkId::new("lines", n), &n, |b, _| {
            b.iter(|| merger.merge_at(&source, &target, now).expect("noop merge"));
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_fingerprint_body,
    bench_parse_and_fingerprint,
    bench_noop_merge,
);
criterion_main!(benches);
