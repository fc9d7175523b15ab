//! RocksDB adaptor for counters.
//!
//! Counters live in the default column family with the configured merge
//! operator. The operator identity is recorded in the `meta` column family
//! and checked every time the database is opened.

use std::path::Path;
use std::sync::Arc;

use derivative::Derivative;
use log::*;
use rocksdb_lib::{ColumnFamilyDescriptor, IteratorMode, MergeOperands, Options, DB};

use super::{check_merge_operator, BatchOp, Engine, WriteBatch};
use crate::config::EngineOptions;
use crate::error::Error;
use crate::merge::MergeOperator;
use crate::stats::{self, Statistics, Ticker};
use crate::Result;

pub use rocksdb_lib;

const DEFAULT_CF: &str = "default";
const META_CF: &str = "meta";
const MERGE_OPERATOR_KEY: &[u8] = b"merge_operator";

fn write_err(e: rocksdb_lib::Error) -> Error {
    error!("{}", e);
    Error::EngineWrite(e.into_string())
}

fn read_err(e: rocksdb_lib::Error) -> Error {
    error!("{}", e);
    Error::EngineRead(e.into_string())
}

fn collect_operands(operands: &MergeOperands) -> Vec<&[u8]> {
    operands.iter().collect()
}

fn default_opts(options: &EngineOptions) -> Options {
    let mut opts = Options::default();
    opts.create_if_missing(options.create_if_missing);
    opts.create_missing_column_families(true);
    opts
}

fn partial_merge(
    operator: &dyn MergeOperator,
    stats: Option<&Statistics>,
    key: &[u8],
    operands: &[&[u8]],
) -> Option<Vec<u8>> {
    let merged = match operands {
        [single] if !operator.allow_single_operand() => Some(single.to_vec()),
        [left, right] => operator.partial_merge(key, left, right),
        _ => operator.partial_merge_multi(key, operands),
    };
    if merged.is_some() {
        stats::record(stats, Ticker::PartialMerge, 1);
    }
    merged
}

/// Column family options of the counter data, with `operator` installed.
fn counter_cf_opts(
    options: &EngineOptions,
    operator: Option<Arc<dyn MergeOperator>>,
    stats: Option<Arc<Statistics>>,
) -> Options {
    let mut opts = default_opts(options);
    let operator = match operator {
        Some(operator) => operator,
        None => return opts,
    };
    if options.max_successive_merges > 0 {
        opts.set_max_successive_merges(options.max_successive_merges);
    }

    let name = operator.name();
    let full_operator = operator.clone();
    let full_stats = stats.clone();
    let full_fn = move |key: &[u8], existing: Option<&[u8]>, operands: &MergeOperands| {
        stats::record(full_stats.as_deref(), Ticker::FullMerge, 1);
        full_operator.full_merge(key, existing, &collect_operands(operands))
    };
    // RocksDB calls the partial callback without a base value.
    let partial_fn = move |key: &[u8], _existing: Option<&[u8]>, operands: &MergeOperands| {
        partial_merge(operator.as_ref(), stats.as_deref(), key, &collect_operands(operands))
    };
    opts.set_merge_operator(name, full_fn, partial_fn);
    opts
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct RocksEngine {
    #[derivative(Debug = "ignore")]
    db: DB,
    stats: Option<Arc<Statistics>>,
}

impl RocksEngine {
    pub fn open<P: AsRef<Path>>(path: P, options: &EngineOptions) -> Result<Self> {
        Self::open_with_statistics(path, options, None)
    }

    /// Opens or creates the database at `path`. Fails with
    /// [`Error::ConfigurationMismatch`] if it was written under another merge
    /// operator, or under one while `options` configures none.
    pub fn open_with_statistics<P: AsRef<Path>>(
        path: P,
        options: &EngineOptions,
        stats: Option<Arc<Statistics>>,
    ) -> Result<Self> {
        let operator = options.merge_operator.map(|kind| kind.build(stats.clone()));
        let configured = operator.as_ref().map(|op| op.name());

        let counter_cf = ColumnFamilyDescriptor::new(
            DEFAULT_CF,
            counter_cf_opts(options, operator.clone(), stats.clone()),
        );
        let meta_cf = ColumnFamilyDescriptor::new(META_CF, default_opts(options));
        let db = DB::open_cf_descriptors(
            &default_opts(options),
            path.as_ref(),
            [counter_cf, meta_cf],
        )
        .map_err(|e| Error::Open(e.into_string()))?;

        let meta = db
            .cf_handle(META_CF)
            .ok_or_else(|| Error::Open(format!("column family {} is missing", META_CF)))?;
        let stored = db
            .get_cf(meta, MERGE_OPERATOR_KEY)
            .map_err(read_err)?
            .map(|name| String::from_utf8_lossy(&name).into_owned());
        check_merge_operator(stored.as_deref(), configured)?;

        if stored.is_none() {
            if let Some(name) = configured {
                debug!("recording merge operator {} for {:?}", name, path.as_ref());
                db.put_cf(meta, MERGE_OPERATOR_KEY, name).map_err(write_err)?;
            }
        }

        Ok(Self { db, stats })
    }

    pub fn destroy<P: AsRef<Path>>(path: P) -> Result<()> {
        DB::destroy(&Options::default(), path).map_err(write_err)
    }

    pub fn db(&self) -> &DB {
        &self.db
    }
}

impl Engine for RocksEngine {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put(key, value).map_err(write_err)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.db.get(key).map_err(read_err)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.db.delete(key).map_err(write_err)
    }

    fn merge(&self, key: &[u8], operand: &[u8]) -> Result<()> {
        self.db.merge(key, operand).map_err(write_err)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut write_batch = rocksdb_lib::WriteBatch::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, value } => write_batch.put(key, value),
                BatchOp::Merge { key, operand } => write_batch.merge(key, operand),
                BatchOp::Delete { key } => write_batch.delete(key),
            }
        }
        self.db.write(write_batch).map_err(write_err)
    }

    fn flush(&self) -> Result<()> {
        self.db.flush().map_err(write_err)?;
        stats::record(self.stats.as_deref(), Ticker::Flush, 1);
        Ok(())
    }

    fn compact_range(&self) -> Result<()> {
        self.db.compact_range(None::<&[u8]>, None::<&[u8]>);
        stats::record(self.stats.as_deref(), Ticker::Compaction, 1);
        Ok(())
    }

    fn dump(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.db
            .iterator(IteratorMode::Start)
            .map(|item| {
                item.map(|(key, value)| (key.into_vec(), value.into_vec()))
                    .map_err(read_err)
            })
            .collect()
    }
}
