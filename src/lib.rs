//! Unsigned 64 bit counters over log-structured key/value engines.
//!
//! Counters are updated either by read-modify-write or by appending merge
//! operands that the engine folds into the stored value lazily, on read, on
//! flush or during compaction.

pub mod codec;
pub mod config;
pub mod counters;
pub mod engine;
pub mod merge;
pub mod stats;
pub mod workload;

mod error;

pub use codec::{deserialize_counter, serialize_counter, COUNTER_SIZE};
pub use config::{EngineOptions, MergeOperatorKind};
pub use counters::{AddStrategy, Counters};
pub use engine::memory::{MemoryEngine, MemoryStore};
#[cfg(feature = "rocksdb")]
pub use engine::rocksdb::RocksEngine;
pub use engine::{Engine, WriteBatch};
pub use error::Error;
pub use merge::{
    Associative, AssociativeMergeOperator, CountMergeOperator, MergeOperator, UInt64AddOperator,
};
pub use stats::{Statistics, Ticker};

pub type Result<T> = std::result::Result<T, error::Error>;
