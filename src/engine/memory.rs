//! In-memory log-structured engine.
//!
//! Writes land in a memtable as raw records. `flush` turns the memtable into
//! an immutable run, `compact_range` merges every run into a single
//! bottommost run. Merge operands are resolved exactly where a log-structured
//! engine would resolve them: on read, when a flush finds the base value
//! under a chain, at the bottom level during compaction, and eagerly when a
//! chain exceeds `max_successive_merges`.

use std::collections::{BTreeMap, BTreeSet};
use std::iter;
use std::sync::Arc;

use derivative::Derivative;
use log::*;
use parking_lot::Mutex;

use super::{check_merge_operator, BatchOp, Engine, WriteBatch};
use crate::config::EngineOptions;
use crate::error::Error;
use crate::merge::MergeOperator;
use crate::stats::{self, Statistics, Ticker};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Record {
    Put(Vec<u8>),
    Merge(Vec<u8>),
    Delete,
}

impl Record {
    fn operand(&self) -> Option<&[u8]> {
        match self {
            Record::Merge(operand) => Some(operand),
            _ => None,
        }
    }
}

// Records of one key are kept oldest first.
type Run = BTreeMap<Vec<u8>, Vec<Record>>;

/// Splits a key history (oldest first) into the newest base record and the
/// operands written after it.
fn split_chain<'r>(records: &[&'r Record]) -> (Option<&'r Record>, Vec<&'r [u8]>) {
    let base_at = records.iter().rposition(|record| record.operand().is_none());
    let base = base_at.map(|at| records[at]);
    let operands = records[base_at.map_or(0, |at| at + 1)..]
        .iter()
        .filter_map(|record| Record::operand(*record))
        .collect();
    (base, operands)
}

fn raw_operands(operands: &[&[u8]]) -> Vec<Record> {
    operands
        .iter()
        .map(|operand| Record::Merge(operand.to_vec()))
        .collect()
}

/// Persistent part of a [`MemoryEngine`], handed back by [`MemoryEngine::close`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    runs: Vec<Run>,
    merge_operator: Option<String>,
}

impl MemoryStore {
    /// Identity of the merge operator the data was written with.
    pub fn merge_operator(&self) -> Option<&str> {
        self.merge_operator.as_deref()
    }
}

#[derive(Debug, Default)]
struct State {
    memtable: Run,
    // oldest first
    runs: Vec<Run>,
}

impl State {
    fn layers(&self) -> impl Iterator<Item = &Run> {
        self.runs.iter().chain(iter::once(&self.memtable))
    }

    fn history(&self, key: &[u8]) -> Vec<&Record> {
        self.layers()
            .filter_map(|run| run.get(key))
            .flatten()
            .collect()
    }
}

#[derive(Derivative)]
#[derivative(Debug)]
pub struct MemoryEngine {
    state: Mutex<State>,
    #[derivative(Debug = "ignore")]
    operator: Option<Arc<dyn MergeOperator>>,
    recorded_operator: Option<String>,
    max_successive_merges: usize,
    stats: Option<Arc<Statistics>>,
}

impl MemoryEngine {
    /// Empty engine.
    pub fn new(options: &EngineOptions) -> Self {
        Self::build(MemoryStore::default(), options, None)
    }

    /// Reopens a closed store. Fails if the store was written under a
    /// different merge operator than `options` configures.
    pub fn open(
        store: MemoryStore,
        options: &EngineOptions,
        stats: Option<Arc<Statistics>>,
    ) -> Result<Self> {
        check_merge_operator(
            store.merge_operator(),
            options.merge_operator.map(|kind| kind.name()),
        )?;
        Ok(Self::build(store, options, stats))
    }

    fn build(store: MemoryStore, options: &EngineOptions, stats: Option<Arc<Statistics>>) -> Self {
        let operator = options.merge_operator.map(|kind| kind.build(stats.clone()));
        let recorded_operator = store
            .merge_operator
            .or_else(|| operator.as_ref().map(|op| op.name().to_owned()));
        Self {
            state: Mutex::new(State {
                memtable: Run::new(),
                runs: store.runs,
            }),
            operator,
            recorded_operator,
            max_successive_merges: options.max_successive_merges,
            stats,
        }
    }

    /// Closes the engine. The memtable is kept unresolved, as a log replay would.
    pub fn close(self) -> MemoryStore {
        let State { memtable, mut runs } = self.state.into_inner();
        if !memtable.is_empty() {
            runs.push(memtable);
        }
        MemoryStore {
            runs,
            merge_operator: self.recorded_operator,
        }
    }

    /// Unresolved operands currently stored for `key`, across all layers.
    pub fn pending_operands(&self, key: &[u8]) -> usize {
        let state = self.state.lock();
        split_chain(&state.history(key)).1.len()
    }

    /// Unresolved operands for `key` in the memtable only.
    pub fn memtable_operands(&self, key: &[u8]) -> usize {
        let state = self.state.lock();
        state
            .memtable
            .get(key)
            .map(|records| split_chain(&records.iter().collect::<Vec<_>>()).1.len())
            .unwrap_or_default()
    }

    pub fn run_count(&self) -> usize {
        self.state.lock().runs.len()
    }

    fn stats(&self) -> Option<&Statistics> {
        self.stats.as_deref()
    }

    fn full_merge(&self, key: &[u8], base: Option<&[u8]>, operands: &[&[u8]]) -> Result<Vec<u8>> {
        let operator = self.operator.as_deref().ok_or_else(|| {
            error!("operands found for key {:?} without a merge operator", key);
            Error::EngineRead(format!(
                "merge operands for key {:?} but no merge operator configured",
                key
            ))
        })?;
        stats::record(self.stats(), Ticker::FullMerge, 1);
        operator
            .full_merge(key, base, operands)
            .ok_or_else(|| Error::MergeFailed { key: key.to_vec() })
    }

    /// `None` leaves the operands as they are.
    fn partial_merge(
        &self,
        operator: &dyn MergeOperator,
        key: &[u8],
        operands: &[&[u8]],
    ) -> Option<Vec<u8>> {
        let merged = match operands {
            [] => None,
            [single] if operator.allow_single_operand() => {
                operator.partial_merge_multi(key, &[*single])
            }
            [_] => None,
            [left, right] => operator.partial_merge(key, left, right),
            _ => operator.partial_merge_multi(key, operands),
        };
        if merged.is_some() {
            stats::record(self.stats(), Ticker::PartialMerge, 1);
        }
        merged
    }

    fn resolve(&self, key: &[u8], records: &[&Record]) -> Result<Option<Vec<u8>>> {
        let (base, operands) = split_chain(records);
        let base = match base {
            Some(Record::Put(value)) => Some(value.as_slice()),
            _ => None,
        };
        if operands.is_empty() {
            return Ok(base.map(<[u8]>::to_vec));
        }
        self.full_merge(key, base, &operands).map(Some)
    }

    /// Rewrites one key history into the records a flush or compaction keeps.
    fn collapse(&self, key: &[u8], records: &[&Record], bottommost: bool) -> Result<Vec<Record>> {
        let (base, operands) = split_chain(records);
        if operands.is_empty() {
            return Ok(match base {
                Some(Record::Delete) if bottommost => vec![],
                Some(record) => vec![record.clone()],
                None => vec![],
            });
        }

        let operator = match self.operator.as_deref() {
            Some(operator) => operator,
            None => {
                warn!("keeping {} unresolved operands for key {:?}", operands.len(), key);
                return Ok(base
                    .cloned()
                    .into_iter()
                    .chain(raw_operands(&operands))
                    .collect());
            }
        };

        Ok(match base {
            Some(Record::Put(value)) => {
                vec![Record::Put(self.full_merge(key, Some(value.as_slice()), &operands)?)]
            }
            // tombstone under the chain: operands start from nothing
            Some(_) => vec![Record::Put(self.full_merge(key, None, &operands)?)],
            None if bottommost => vec![Record::Put(self.full_merge(key, None, &operands)?)],
            None => {
                let merged = if operator.should_merge(&operands) {
                    self.partial_merge(operator, key, &operands)
                } else {
                    None
                };
                match merged {
                    Some(operand) => vec![Record::Merge(operand)],
                    None => raw_operands(&operands),
                }
            }
        })
    }

    fn enforce_chain_limit(&self, state: &mut State, key: &[u8]) -> Result<()> {
        if self.max_successive_merges == 0 {
            return Ok(());
        }
        let operator = match self.operator.as_deref() {
            Some(operator) => operator,
            None => return Ok(()),
        };
        let records = match state.memtable.get_mut(key) {
            Some(records) => records,
            None => return Ok(()),
        };

        let history: Vec<&Record> = records.iter().collect();
        let (base, operands) = split_chain(&history);
        if operands.len() <= self.max_successive_merges {
            return Ok(());
        }
        debug!(
            "key {:?} reached {} successive merges, resolving",
            key,
            operands.len()
        );
        let collapsed = match base {
            Some(Record::Put(value)) => {
                vec![Record::Put(self.full_merge(key, Some(value.as_slice()), &operands)?)]
            }
            Some(_) => vec![Record::Put(self.full_merge(key, None, &operands)?)],
            None => match self.partial_merge(operator, key, &operands) {
                Some(operand) => vec![Record::Merge(operand)],
                None => return Ok(()),
            },
        };
        stats::record(self.stats(), Ticker::ChainLimitMerge, 1);
        *records = collapsed;
        Ok(())
    }

    fn flush_locked(&self, state: &mut State) -> Result<()> {
        if state.memtable.is_empty() {
            return Ok(());
        }
        let memtable = std::mem::take(&mut state.memtable);
        let mut run = Run::new();
        for (key, records) in &memtable {
            let history: Vec<&Record> = records.iter().collect();
            run.insert(key.clone(), self.collapse(key, &history, false)?);
        }
        debug!("flushed {} keys into run #{}", run.len(), state.runs.len());
        state.runs.push(run);
        stats::record(self.stats(), Ticker::Flush, 1);
        Ok(())
    }
}

impl Engine for MemoryEngine {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.put(key, value);
        self.write(batch)
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let state = self.state.lock();
        self.resolve(key, &state.history(key))
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.delete(key);
        self.write(batch)
    }

    fn merge(&self, key: &[u8], operand: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::default();
        batch.merge(key, operand);
        self.write(batch)
    }

    fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut state = self.state.lock();
        let mut merged_keys = BTreeSet::new();
        for op in batch.into_ops() {
            let (key, record) = match op {
                BatchOp::Put { key, value } => (key, Record::Put(value)),
                BatchOp::Delete { key } => (key, Record::Delete),
                BatchOp::Merge { key, operand } => {
                    merged_keys.insert(key.clone());
                    (key, Record::Merge(operand))
                }
            };
            state.memtable.entry(key).or_default().push(record);
        }
        for key in merged_keys {
            self.enforce_chain_limit(&mut state, &key)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    fn compact_range(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)?;

        let keys: BTreeSet<Vec<u8>> = state
            .runs
            .iter()
            .flat_map(|run| run.keys().cloned())
            .collect();
        let mut bottom = Run::new();
        for key in keys {
            let records = self.collapse(&key, &state.history(&key), true)?;
            if !records.is_empty() {
                bottom.insert(key, records);
            }
        }
        debug!(
            "compacted {} runs into {} keys",
            state.runs.len(),
            bottom.len()
        );
        state.runs = if bottom.is_empty() { vec![] } else { vec![bottom] };
        stats::record(self.stats(), Ticker::Compaction, 1);
        Ok(())
    }

    fn dump(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let state = self.state.lock();
        let keys: BTreeSet<&Vec<u8>> = state.layers().flat_map(|run| run.keys()).collect();
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.resolve(key, &state.history(key))? {
                entries.push((key.clone(), value));
            }
        }
        Ok(entries)
    }
}
