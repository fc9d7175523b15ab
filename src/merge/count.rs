use std::sync::Arc;

use log::*;

use super::{decode_or_zero, MergeOperator};
use crate::codec::serialize_counter;
use crate::stats::Statistics;

/// Sums any number of operands, with or without a base value.
///
/// Partial merges collapse operand chains before the base value is known,
/// which lets compaction shrink chains in levels that do not hold the base.
#[derive(Debug, Default, Clone)]
pub struct CountMergeOperator {
    stats: Option<Arc<Statistics>>,
}

impl CountMergeOperator {
    pub const NAME: &'static str = "CountBaseOriginalMergeOperator";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statistics(stats: Arc<Statistics>) -> Self {
        Self { stats: Some(stats) }
    }

    fn sum<'a>(&self, key: &[u8], operands: impl IntoIterator<Item = &'a [u8]>) -> u64 {
        operands.into_iter().fold(0u64, |total, operand| {
            total.wrapping_add(decode_or_zero(key, operand, self.stats.as_deref()))
        })
    }
}

impl MergeOperator for CountMergeOperator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn full_merge(
        &self,
        key: &[u8],
        existing: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Option<Vec<u8>> {
        let total = self.sum(key, existing.into_iter().chain(operands.iter().copied()));
        trace!(
            "full merge {:?}: existing {:?}, {} operands, total {}",
            key,
            existing.map(<[u8]>::len),
            operands.len(),
            total
        );
        Some(serialize_counter(total).to_vec())
    }

    fn partial_merge(&self, key: &[u8], left: &[u8], right: &[u8]) -> Option<Vec<u8>> {
        let total = self.sum(key, [left, right]);
        trace!("partial merge {:?}: total {}", key, total);
        Some(serialize_counter(total).to_vec())
    }

    fn partial_merge_multi(&self, key: &[u8], operands: &[&[u8]]) -> Option<Vec<u8>> {
        let total = self.sum(key, operands.iter().copied());
        trace!(
            "partial merge {:?}: {} operands, total {}",
            key,
            operands.len(),
            total
        );
        Some(serialize_counter(total).to_vec())
    }

    fn allow_single_operand(&self) -> bool {
        true
    }

    // Flush sweeps never pre-merge; only the successive merge threshold does.
    fn should_merge(&self, _operands: &[&[u8]]) -> bool {
        false
    }
}
