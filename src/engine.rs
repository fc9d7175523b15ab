//! Key/value engines counters are stored in.
//!
//! The engine owns durability, ordering and merge resolution; counters only
//! issue point operations through [`Engine`].

use std::sync::Arc;

use log::*;

use crate::error::Error;
use crate::Result;

pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocksdb;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Merge { key: Vec<u8>, operand: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Operations applied atomically by [`Engine::write`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) {
        self.ops.push(BatchOp::Put {
            key: key.as_ref().to_vec(),
            value: value.as_ref().to_vec(),
        })
    }

    pub fn merge(&mut self, key: impl AsRef<[u8]>, operand: impl AsRef<[u8]>) {
        self.ops.push(BatchOp::Merge {
            key: key.as_ref().to_vec(),
            operand: operand.as_ref().to_vec(),
        })
    }

    pub fn delete(&mut self, key: impl AsRef<[u8]>) {
        self.ops.push(BatchOp::Delete {
            key: key.as_ref().to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Data written under one merge operator must not be resolved by another.
pub(crate) fn check_merge_operator(stored: Option<&str>, configured: Option<&str>) -> Result<()> {
    match (stored, configured) {
        (Some(stored), Some(configured)) if stored == configured => Ok(()),
        (None, _) => Ok(()),
        (stored, configured) => {
            error!(
                "merge operator mismatch: stored {:?}, configured {:?}",
                stored, configured
            );
            Err(Error::ConfigurationMismatch {
                stored: stored.map(str::to_owned),
                configured: configured.map(str::to_owned),
            })
        }
    }
}

pub trait Engine: Send + Sync {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Resolved value for `key`, `None` when the key does not exist.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Appends a merge operand without reading the current value.
    fn merge(&self, key: &[u8], operand: &[u8]) -> Result<()>;

    fn write(&self, batch: WriteBatch) -> Result<()>;

    /// Persists the memtable.
    fn flush(&self) -> Result<()>;

    /// Compacts the whole key space, resolving every operand chain.
    fn compact_range(&self) -> Result<()>;

    /// Resolved key/value pairs in key order. Diagnostic only.
    fn dump(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>>;
}

impl<'a, E: Engine + ?Sized> Engine for &'a E {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        E::put(*self, key, value)
    }
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        E::get(*self, key)
    }
    fn delete(&self, key: &[u8]) -> Result<()> {
        E::delete(*self, key)
    }
    fn merge(&self, key: &[u8], operand: &[u8]) -> Result<()> {
        E::merge(*self, key, operand)
    }
    fn write(&self, batch: WriteBatch) -> Result<()> {
        E::write(*self, batch)
    }
    fn flush(&self) -> Result<()> {
        E::flush(*self)
    }
    fn compact_range(&self) -> Result<()> {
        E::compact_range(*self)
    }
    fn dump(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        E::dump(*self)
    }
}

impl<E: Engine + ?Sized> Engine for Arc<E> {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        E::put(self.as_ref(), key, value)
    }
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        E::get(self.as_ref(), key)
    }
    fn delete(&self, key: &[u8]) -> Result<()> {
        E::delete(self.as_ref(), key)
    }
    fn merge(&self, key: &[u8], operand: &[u8]) -> Result<()> {
        E::merge(self.as_ref(), key, operand)
    }
    fn write(&self, batch: WriteBatch) -> Result<()> {
        E::write(self.as_ref(), batch)
    }
    fn flush(&self) -> Result<()> {
        E::flush(self.as_ref())
    }
    fn compact_range(&self) -> Result<()> {
        E::compact_range(self.as_ref())
    }
    fn dump(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        E::dump(self.as_ref())
    }
}
