//! トライの構築と検索のベンチマーク

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use xtrie::{Trie, TrieKind};

const NUM_KEYS: usize = 10_000;

/// 長さの揃っていない決定的なキー集合を生成します。
fn keys(n: usize) -> Vec<Vec<u8>> {
    (0..n)
        .map(|i| {
            let h = (i as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15);
            format!("{:012x}/{}", h >> 16, i % 97).into_bytes()
        })
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let keys = keys(NUM_KEYS);
    let mut group = c.benchmark_group("build");
    group.throughput(Throughput::Elements(keys.len() as u64));
    for (kind, name) in [(TrieKind::Tail, "tail"), (TrieKind::Two, "two")] {
        group.bench_with_input(BenchmarkId::from_parameter(name), &kind, |b, &kind| {
            b.iter(|| {
                let mut trie = Trie::new(kind, 4096);
                for (i, key) in keys.iter().enumerate() {
                    trie.insert(key, i as i32 + 1);
                }
                trie
            });
        });
    }
    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let keys = keys(NUM_KEYS);
    let mut group = c.benchmark_group("search");
    group.throughput(Throughput::Elements(keys.len() as u64));
    for (kind, name) in [(TrieKind::Tail, "tail"), (TrieKind::Two, "two")] {
        let mut trie = Trie::new(kind, 4096);
        for (i, key) in keys.iter().enumerate() {
            trie.insert(key, i as i32 + 1);
        }
        group.bench_with_input(BenchmarkId::from_parameter(name), &trie, |b, trie| {
            b.iter(|| {
                let mut hits = 0usize;
                for key in &keys {
                    if trie.search(key).is_some() {
                        hits += 1;
                    }
                }
                hits
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_search);
criterion_main!(benches);
