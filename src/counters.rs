use std::sync::Arc;

use log::*;

#[cfg(feature = "tracing-enable")]
use tracing::instrument;

use crate::codec::{deserialize_counter, serialize_counter, COUNTER_SIZE};
use crate::engine::Engine;
use crate::error::Error;
use crate::stats::{self, Statistics, Ticker};
use crate::Result;

/// How [`Counters::add`] updates a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddStrategy {
    /// Read the counter, add, write it back. Concurrent adds on one key race.
    ReadModifyWrite,
    /// Append one merge operand; the engine folds it in later.
    Merge,
}

/// Unsigned 64 bit counters stored in an [`Engine`].
#[derive(Debug)]
pub struct Counters<E> {
    engine: E,
    default: u64,
    strategy: AddStrategy,
    stats: Option<Arc<Statistics>>,
}

impl<E: Engine> Counters<E> {
    pub fn new(engine: E, default: u64, strategy: AddStrategy) -> Self {
        Self {
            engine,
            default,
            strategy,
            stats: None,
        }
    }

    pub fn read_modify_write(engine: E) -> Self {
        Self::new(engine, 0, AddStrategy::ReadModifyWrite)
    }

    /// Counters updated through merge operands. The engine must be configured
    /// with a counter merge operator.
    pub fn merge_based(engine: E) -> Self {
        Self::new(engine, 0, AddStrategy::Merge)
    }

    pub fn with_statistics(mut self, stats: Arc<Statistics>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn strategy(&self) -> AddStrategy {
        self.strategy
    }

    fn record(&self, ticker: Ticker) {
        stats::record(self.stats.as_deref(), ticker, 1)
    }

    #[cfg_attr(feature = "tracing-enable", instrument(skip(self)))]
    pub fn set(&self, key: &[u8], value: u64) -> Result<()> {
        self.record(Ticker::CounterWrite);
        self.engine
            .put(key, &serialize_counter(value))
            .map_err(|e| {
                error!("set {:?} failed: {}", key, e);
                e
            })
    }

    /// Current value of the counter, or the default if it was never set.
    #[cfg_attr(feature = "tracing-enable", instrument(skip(self)))]
    pub fn get(&self, key: &[u8]) -> Result<u64> {
        self.record(Ticker::CounterRead);
        let value = match self.engine.get(key) {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(self.default),
            Err(e) => {
                error!("get {:?} failed: {}", key, e);
                return Err(e);
            }
        };
        deserialize_counter(&value).ok_or_else(|| {
            error!(
                "counter {:?} holds {} bytes instead of {}",
                key,
                value.len(),
                COUNTER_SIZE
            );
            Error::Corruption {
                key: key.to_vec(),
                len: value.len(),
            }
        })
    }

    #[cfg_attr(feature = "tracing-enable", instrument(skip(self)))]
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.record(Ticker::CounterWrite);
        self.engine.delete(key).map_err(|e| {
            error!("remove {:?} failed: {}", key, e);
            e
        })
    }

    /// Adds `delta`, wrapping on overflow.
    #[cfg_attr(feature = "tracing-enable", instrument(skip(self)))]
    pub fn add(&self, key: &[u8], delta: u64) -> Result<()> {
        match self.strategy {
            AddStrategy::ReadModifyWrite => {
                let base = self.get(key)?;
                self.set(key, base.wrapping_add(delta))
            }
            AddStrategy::Merge => {
                self.record(Ticker::CounterWrite);
                self.engine
                    .merge(key, &serialize_counter(delta))
                    .map_err(|e| {
                        error!("add {:?} failed: {}", key, e);
                        e
                    })
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;
    use std::thread;

    use quickcheck_macros::quickcheck;

    use super::*;
    use crate::config::{EngineOptions, MergeOperatorKind};
    use crate::engine::memory::MemoryEngine;
    use crate::engine::WriteBatch;

    #[cfg(feature = "tracing-enable")]
    fn tracing_sub_init() {
        use tracing::metadata::LevelFilter;
        use tracing_subscriber::fmt::format::FmtSpan;
        let _ = tracing_subscriber::fmt()
            .with_span_events(FmtSpan::ENTER)
            .with_max_level(LevelFilter::TRACE)
            .try_init();
    }
    #[cfg(not(feature = "tracing-enable"))]
    fn tracing_sub_init() {}

    const KINDS: [MergeOperatorKind; 2] = [
        MergeOperatorKind::Associative,
        MergeOperatorKind::FullPartial,
    ];
    const STRATEGIES: [AddStrategy; 2] = [AddStrategy::ReadModifyWrite, AddStrategy::Merge];

    fn memory_counters(kind: MergeOperatorKind, strategy: AddStrategy) -> Counters<MemoryEngine> {
        let options = EngineOptions::default().with_merge_operator(kind);
        Counters::new(MemoryEngine::new(&options), 0, strategy)
    }

    fn run_scenario<E: Engine>(counters: &Counters<E>) {
        counters.set(b"a", 1).unwrap();
        counters.engine().flush().unwrap();
        assert_eq!(counters.get(b"a").unwrap(), 1);

        counters.remove(b"b").unwrap();
        assert_eq!(counters.get(b"b").unwrap(), 0);

        counters.add(b"a", 2).unwrap();
        counters.engine().flush().unwrap();
        assert_eq!(counters.get(b"a").unwrap(), 3);

        for i in 1..50 {
            counters.add(b"b", i).unwrap();
        }
        assert_eq!(counters.get(b"b").unwrap(), 1225);

        counters.engine().flush().unwrap();
        counters.engine().compact_range().unwrap();
        assert_eq!(counters.get(b"a").unwrap(), 3);
        assert_eq!(counters.get(b"b").unwrap(), 1225);
    }

    #[test]
    fn scenario_on_memory_engine() {
        let _ = env_logger::Builder::new().parse_filters("info").try_init();
        tracing_sub_init();
        for kind in KINDS {
            for strategy in STRATEGIES {
                run_scenario(&memory_counters(kind, strategy));
            }
        }
        run_scenario(&Counters::read_modify_write(MemoryEngine::new(
            &EngineOptions::default().without_merge_operator(),
        )));
    }

    #[cfg(feature = "rocksdb")]
    #[test]
    fn scenario_on_rocksdb() {
        use crate::engine::rocksdb::RocksEngine;

        for kind in KINDS {
            for strategy in STRATEGIES {
                let dir = tempfile::tempdir().unwrap();
                let options = EngineOptions::default().with_merge_operator(kind);
                let engine = RocksEngine::open(&dir, &options).unwrap();
                run_scenario(&Counters::new(engine, 0, strategy));
            }
        }
    }

    #[test]
    fn absent_keys_read_default() {
        for strategy in STRATEGIES {
            let engine = MemoryEngine::new(&EngineOptions::default());
            let counters = Counters::new(engine, 42, strategy);
            assert_eq!(counters.get(b"missing").unwrap(), 42);

            counters.set(b"k", 5).unwrap();
            counters.remove(b"k").unwrap();
            assert_eq!(counters.get(b"k").unwrap(), 42);
        }
    }

    #[test]
    fn add_on_absent_key_starts_from_zero() {
        let counters = memory_counters(MergeOperatorKind::FullPartial, AddStrategy::Merge);
        counters.set(b"k", 10).unwrap();
        counters.remove(b"k").unwrap();
        counters.add(b"k", 4).unwrap();
        assert_eq!(counters.get(b"k").unwrap(), 4);
        counters.engine().compact_range().unwrap();
        assert_eq!(counters.get(b"k").unwrap(), 4);
    }

    #[test]
    fn merge_add_on_absent_key_ignores_default() {
        for kind in KINDS {
            let options = EngineOptions::default().with_merge_operator(kind);
            let merged = Counters::new(MemoryEngine::new(&options), 42, AddStrategy::Merge);
            assert_eq!(merged.get(b"k").unwrap(), 42);
            merged.add(b"k", 4).unwrap();
            assert_eq!(merged.get(b"k").unwrap(), 4);
            merged.engine().compact_range().unwrap();
            assert_eq!(merged.get(b"k").unwrap(), 4);

            let rmw = Counters::new(MemoryEngine::new(&options), 42, AddStrategy::ReadModifyWrite);
            rmw.add(b"k", 4).unwrap();
            assert_eq!(rmw.get(b"k").unwrap(), 46);
        }
    }

    #[test]
    fn repeated_set_keeps_last_value() {
        for strategy in STRATEGIES {
            let counters = memory_counters(MergeOperatorKind::Associative, strategy);
            for value in [10u64, 3, u64::MAX, 7] {
                counters.set(b"a", value).unwrap();
            }
            counters.engine().flush().unwrap();
            counters.set(b"a", 9).unwrap();
            assert_eq!(counters.get(b"a").unwrap(), 9);
        }
    }

    #[test]
    fn add_wraps_on_overflow() {
        for strategy in STRATEGIES {
            let counters = memory_counters(MergeOperatorKind::FullPartial, strategy);
            counters.set(b"a", u64::MAX).unwrap();
            counters.add(b"a", 2).unwrap();
            assert_eq!(counters.get(b"a").unwrap(), 1);
        }
    }

    #[test]
    fn successive_merges_stay_exact() {
        for kind in KINDS {
            let options = EngineOptions::default()
                .with_merge_operator(kind)
                .with_max_successive_merges(5);
            let counters = Counters::merge_based(MemoryEngine::new(&options));
            for i in 1..=20u64 {
                counters.add(b"z", 1).unwrap();
                assert_eq!(counters.get(b"z").unwrap(), i);
            }
            assert!(counters.engine().memtable_operands(b"z") <= 5);
        }
    }

    #[test]
    fn concurrent_merge_adds_are_not_lost() {
        let counters = Arc::new(memory_counters(
            MergeOperatorKind::Associative,
            AddStrategy::Merge,
        ));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counters = counters.clone();
                thread::spawn(move || {
                    for _ in 0..250 {
                        counters.add(b"shared", 1).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counters.get(b"shared").unwrap(), 2000);
    }

    #[test]
    fn truncated_operand_contributes_zero() {
        for kind in KINDS {
            let counters = memory_counters(kind, AddStrategy::Merge);
            counters.add(b"c", 5).unwrap();
            counters.engine().merge(b"c", &[1, 2, 3]).unwrap();
            counters.add(b"c", 7).unwrap();
            assert_eq!(counters.get(b"c").unwrap(), 12);

            counters.engine().flush().unwrap();
            counters.engine().compact_range().unwrap();
            assert_eq!(counters.get(b"c").unwrap(), 12);
        }
    }

    #[test]
    fn malformed_base_is_reported() {
        let counters =
            memory_counters(MergeOperatorKind::Associative, AddStrategy::ReadModifyWrite);
        counters.engine().put(b"bad", &[1, 2, 3]).unwrap();
        match counters.get(b"bad") {
            Err(Error::Corruption { key, len }) => {
                assert_eq!(key, b"bad".to_vec());
                assert_eq!(len, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(counters.add(b"bad", 1), Err(Error::Corruption { .. })));
    }

    #[test]
    fn statistics_count_facade_calls() {
        let stats = Arc::new(Statistics::new());
        let counters =
            memory_counters(MergeOperatorKind::Associative, AddStrategy::ReadModifyWrite)
                .with_statistics(stats.clone());
        counters.add(b"a", 1).unwrap();
        counters.get(b"a").unwrap();
        assert_eq!(stats.get(Ticker::CounterRead), 2);
        assert_eq!(stats.get(Ticker::CounterWrite), 1);
    }

    #[derive(Debug)]
    pub(crate) struct FailingEngine;

    impl Engine for FailingEngine {
        fn put(&self, _: &[u8], _: &[u8]) -> Result<()> {
            Err(Error::EngineWrite("disk full".into()))
        }
        fn get(&self, _: &[u8]) -> Result<Option<Vec<u8>>> {
            Err(Error::EngineRead("io error".into()))
        }
        fn delete(&self, _: &[u8]) -> Result<()> {
            Err(Error::EngineWrite("disk full".into()))
        }
        fn merge(&self, _: &[u8], _: &[u8]) -> Result<()> {
            Err(Error::EngineWrite("disk full".into()))
        }
        fn write(&self, _: WriteBatch) -> Result<()> {
            Err(Error::EngineWrite("disk full".into()))
        }
        fn flush(&self) -> Result<()> {
            Ok(())
        }
        fn compact_range(&self) -> Result<()> {
            Ok(())
        }
        fn dump(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
            Ok(vec![])
        }
    }

    #[test]
    fn engine_failures_propagate() {
        for strategy in STRATEGIES {
            let counters = Counters::new(FailingEngine, 0, strategy);
            assert!(matches!(counters.set(b"a", 1), Err(Error::EngineWrite(_))));
            assert!(matches!(counters.get(b"a"), Err(Error::EngineRead(_))));
            assert!(matches!(counters.remove(b"a"), Err(Error::EngineWrite(_))));
        }
        assert!(matches!(
            Counters::read_modify_write(FailingEngine).add(b"a", 1),
            Err(Error::EngineRead(_))
        ));
        assert!(matches!(
            Counters::merge_based(FailingEngine).add(b"a", 1),
            Err(Error::EngineWrite(_))
        ));
    }

    #[quickcheck]
    fn qc_set_then_get(key: Vec<u8>, value: u64) -> bool {
        STRATEGIES.iter().all(|strategy| {
            let counters = memory_counters(MergeOperatorKind::FullPartial, *strategy);
            counters.set(&key, value).unwrap();
            counters.get(&key).unwrap() == value
        })
    }

    #[quickcheck]
    fn qc_adds_survive_flush_and_compaction(ops: Vec<(u8, u64, u8)>) -> bool {
        let mut expected: HashMap<u8, u64> = HashMap::new();
        for (key, delta, _) in &ops {
            let total = expected.entry(key % 4).or_default();
            *total = total.wrapping_add(*delta);
        }

        KINDS.iter().all(|kind| {
            STRATEGIES.iter().all(|strategy| {
                let counters = memory_counters(*kind, *strategy);
                for (key, delta, action) in &ops {
                    counters.add(&[key % 4], *delta).unwrap();
                    match action % 8 {
                        0 => counters.engine().flush().unwrap(),
                        1 => counters.engine().compact_range().unwrap(),
                        _ => {}
                    }
                }
                (0..4u8).all(|key| {
                    counters.get(&[key]).unwrap() == expected.get(&key).copied().unwrap_or_default()
                })
            })
        })
    }
}
