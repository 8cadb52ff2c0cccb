//! Dependency resolver benchmarks.
//!
//! Measures requirement parsing and the bootstrap merge against sets of
//! growing size.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use modelpack::env::{DependencySet, InstalledSnapshot, ModelDependency, Requirement};

fn user_requirements(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("package-{}>=1.{}", i, i % 7)).collect()
}

fn installed(count: usize) -> InstalledSnapshot {
    let mut snapshot = InstalledSnapshot::new();
    for i in 0..count {
        snapshot
            .insert(&format!("package-{}", i), &format!("1.{}.0", i % 9))
            .expect("valid version");
    }
    snapshot
}

fn bench_requirement_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("requirement_parse");
    for (name, raw) in [
        ("bare", "numpy"),
        ("pinned", "numpy==1.26.4"),
        ("ranged", "pandas[parquet,excel]>=1.5,<3,!=2.0.1"),
    ] {
        group.throughput(Throughput::Elements(1));
        group.bench_function(BenchmarkId::new("parse", name), |b| {
            b.iter(|| black_box(raw).parse::<Requirement>())
        });
    }
    group.finish();
}

fn bench_include_if_absent(c: &mut Criterion) {
    let mut group = c.benchmark_group("include_if_absent");
    let candidates: Vec<ModelDependency> = (0..16)
        .map(|i| ModelDependency::same(&format!("package-{}", i * 3)))
        .collect();

    for size in [8usize, 64, 256] {
        let (base, _) =
            DependencySet::from_user(&user_requirements(size), &[] as &[&str]).expect("valid");
        let snapshot = installed(size * 2);

        group.throughput(Throughput::Elements(candidates.len() as u64));
        group.bench_function(BenchmarkId::new("merge", size), |b| {
            b.iter(|| {
                let mut set = base.clone();
                let warnings = set
                    .include_if_absent(black_box(&candidates), &snapshot)
                    .expect("merge");
                black_box((set, warnings))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_requirement_parse, bench_include_if_absent);
criterion_main!(benches);
