/// Aggregation throughput
///
/// Measures percentile reduction of raw sample vectors at CI-typical sizes
/// and the cost of a full compare against a long suite history.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use perfledger::aggregate::{aggregate, AggregationPolicy, SampleSummary};
use perfledger::compare::{compare, BaselinePolicy, CompareOptions};
use perfledger::model::{Bench, CommitInfo, Entry};

fn samples(n: usize) -> Vec<f64> {
    // deterministic jitter around 0.7s
    (0..n)
        .map(|i| 0.7 + ((i * 7919) % 100) as f64 / 1000.0)
        .collect()
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate");
    let policy = AggregationPolicy::new(90.0, 1);

    for n in [10usize, 100, 1_000, 10_000] {
        let data = samples(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("p90", n), &data, |b, data| {
            b.iter(|| aggregate("pull", "Seconds", black_box(data), &policy))
        });
        group.bench_with_input(BenchmarkId::new("summary", n), &data, |b, data| {
            b.iter(|| SampleSummary::from_samples(black_box(data), 1))
        });
    }

    group.finish();
}

fn bench_compare(c: &mut Criterion) {
    let mut group = c.benchmark_group("compare");

    for len in [10usize, 1_000] {
        let history: Vec<Entry> = (0..len)
            .map(|i| Entry {
                commit: CommitInfo::new(format!("commit-{i}")),
                date: 1_700_000_000_000 + i as u64,
                tool: "customSmallerIsBetter".to_string(),
                benches: (0..20)
                    .map(|b| Bench::new(format!("bench-{b}"), 0.7 + i as f64 * 1e-4, "Seconds"))
                    .collect(),
            })
            .collect();
        let newest = &history[len - 1];

        for (label, baseline) in [
            ("previous", BaselinePolicy::Previous),
            ("median10", BaselinePolicy::MedianOfLast(10)),
        ] {
            let options = CompareOptions {
                threshold: 20.0,
                baseline,
            };
            group.bench_with_input(BenchmarkId::new(label, len), &history, |b, history| {
                b.iter(|| compare("soci", black_box(newest), history, &options))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_aggregate, bench_compare);
criterion_main!(benches);
