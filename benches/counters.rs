use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use rand::prelude::*;
use tempfile::tempdir;

use mergecounter::workload::counter_key;
use mergecounter::{
    AddStrategy, Counters, Engine, EngineOptions, MemoryEngine, MergeOperatorKind, RocksEngine,
};

const ADDS_PER_ITER: usize = 1000;
const KEY_SPACE: u64 = 64;
const CHAIN_LENGTH: u64 = 10_000;

fn deterministic_adds() -> Vec<(Vec<u8>, u64)> {
    let mut rng = rand::rngs::StdRng::from_seed([42_u8; 32]);
    (0..ADDS_PER_ITER)
        .map(|_| (counter_key(rng.gen_range(0..KEY_SPACE)), rng.gen_range(1..100)))
        .collect()
}

fn bench_add<E: Engine>(counters: &Counters<E>, adds: &[(Vec<u8>, u64)]) {
    for (key, delta) in adds {
        counters.add(key, *delta).expect("add");
    }
}

fn bench_add_strategies(c: &mut Criterion) {
    let adds = deterministic_adds();

    for strategy in [AddStrategy::ReadModifyWrite, AddStrategy::Merge] {
        c.bench_function(&format!("memory {:?} add", strategy), |b| {
            let options = EngineOptions::default().with_max_successive_merges(64);
            let engine = MemoryEngine::new(&options);
            let counters = Counters::new(engine, 0, strategy);
            b.iter(|| bench_add(&counters, &adds))
        });

        c.bench_function(&format!("rocksdb {:?} add", strategy), |b| {
            let dir = tempdir().unwrap();
            let engine = RocksEngine::open(&dir, &EngineOptions::default()).unwrap();
            let counters = Counters::new(engine, 0, strategy);
            b.iter(|| bench_add(&counters, &adds))
        });
    }
}

fn bench_unresolved_chain(c: &mut Criterion) {
    for kind in [MergeOperatorKind::Associative, MergeOperatorKind::FullPartial] {
        c.bench_function(&format!("memory get over {:?} chain", kind), |b| {
            let engine = MemoryEngine::new(&EngineOptions::default().with_merge_operator(kind));
            let counters = Counters::merge_based(engine);
            for _ in 0..CHAIN_LENGTH {
                counters.add(b"chain", 1).unwrap();
            }
            b.iter(|| assert_eq!(counters.get(b"chain").unwrap(), CHAIN_LENGTH))
        });

        c.bench_function(&format!("rocksdb get over {:?} chain", kind), |b| {
            let dir = tempdir().unwrap();
            let options = EngineOptions::default().with_merge_operator(kind);
            let engine = RocksEngine::open(&dir, &options).unwrap();
            let counters = Counters::merge_based(engine);
            b.iter_batched(
                || {
                    counters.set(b"chain", 0).unwrap();
                    for _ in 0..CHAIN_LENGTH / 10 {
                        counters.add(b"chain", 1).unwrap();
                    }
                },
                |()| counters.get(b"chain").unwrap(),
                BatchSize::SmallInput,
            )
        });
    }
}

criterion_group!(benches, bench_add_strategies, bench_unresolved_chain);
criterion_main!(benches);
