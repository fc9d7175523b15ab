use std::sync::Arc;

use log::*;

use super::{decode_or_zero, AssociativeMergeOperator};
use crate::codec::serialize_counter;
use crate::stats::Statistics;

/// Adds one operand at a time to the existing value.
///
/// Without an existing value the operand is passed through untouched.
/// Malformed inputs are folded as zero, so a merge never fails.
#[derive(Debug, Default, Clone)]
pub struct UInt64AddOperator {
    stats: Option<Arc<Statistics>>,
}

impl UInt64AddOperator {
    pub const NAME: &'static str = "UInt64AddOperator";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statistics(stats: Arc<Statistics>) -> Self {
        Self { stats: Some(stats) }
    }
}

impl AssociativeMergeOperator for UInt64AddOperator {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn merge(&self, key: &[u8], existing: Option<&[u8]>, value: &[u8]) -> Option<Vec<u8>> {
        let stats = self.stats.as_deref();
        let existing = match existing {
            Some(existing) => existing,
            None => {
                trace!("merge {:?}: no existing value, operand {:?}", key, value);
                return Some(value.to_vec());
            }
        };

        let base = decode_or_zero(key, existing, stats);
        let operand = decode_or_zero(key, value, stats);
        trace!("merge {:?}: existing {} operand {}", key, base, operand);

        Some(serialize_counter(base.wrapping_add(operand)).to_vec())
    }
}
