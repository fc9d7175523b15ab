//! Merge operators that fold counter operands.
//!
//! An engine only ever sees [`MergeOperator`]. Operators that can only
//! combine one operand at a time implement [`AssociativeMergeOperator`] and
//! are registered through the [`Associative`] adapter, which derives full and
//! partial resolution from the single combine step.
//!
//! Both shipped operators sum with wrapping `u64` arithmetic, so the resolved
//! value only depends on the multiset of operands and the base value, never
//! on how the engine groups or orders the folds.

use log::*;

use crate::codec::deserialize_counter;
use crate::stats::{self, Statistics, Ticker};

mod count;
mod uint64_add;

pub use count::CountMergeOperator;
pub use uint64_add::UInt64AddOperator;

pub trait MergeOperator: Send + Sync {
    /// Stable identity persisted by engines and checked on reopen.
    fn name(&self) -> &'static str;

    /// Resolves `operands` (oldest first) on top of `existing`.
    /// `None` reports a failed merge.
    fn full_merge(
        &self,
        key: &[u8],
        existing: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Option<Vec<u8>>;

    /// Combines two adjacent operands into one replacement operand.
    /// `None` means the engine should keep both operands.
    fn partial_merge(&self, key: &[u8], left: &[u8], right: &[u8]) -> Option<Vec<u8>>;

    fn partial_merge_multi(&self, key: &[u8], operands: &[&[u8]]) -> Option<Vec<u8>> {
        let (first, rest) = operands.split_first()?;
        let mut merged = first.to_vec();
        for operand in rest {
            merged = self.partial_merge(key, &merged, operand)?;
        }
        Some(merged)
    }

    /// Whether a partial merge may be invoked with a single operand.
    fn allow_single_operand(&self) -> bool {
        false
    }

    /// Whether the engine may partially merge `operands` during a flush sweep.
    /// The successive merge threshold applies regardless of this answer.
    fn should_merge(&self, _operands: &[&[u8]]) -> bool {
        false
    }
}

pub trait AssociativeMergeOperator: Send + Sync {
    fn name(&self) -> &'static str;

    fn merge(&self, key: &[u8], existing: Option<&[u8]>, value: &[u8]) -> Option<Vec<u8>>;
}

/// Exposes an [`AssociativeMergeOperator`] as a [`MergeOperator`].
#[derive(Debug, Default, Clone)]
pub struct Associative<A>(pub A);

impl<A: AssociativeMergeOperator> MergeOperator for Associative<A> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn full_merge(
        &self,
        key: &[u8],
        existing: Option<&[u8]>,
        operands: &[&[u8]],
    ) -> Option<Vec<u8>> {
        let mut merged = existing.map(<[u8]>::to_vec);
        for operand in operands {
            merged = Some(self.0.merge(key, merged.as_deref(), operand)?);
        }
        merged
    }

    fn partial_merge(&self, key: &[u8], left: &[u8], right: &[u8]) -> Option<Vec<u8>> {
        self.0.merge(key, Some(left), right)
    }
}

/// Decodes a counter inside a merge; malformed input is reported and counted as zero.
fn decode_or_zero(key: &[u8], value: &[u8], stats: Option<&Statistics>) -> u64 {
    deserialize_counter(value).unwrap_or_else(|| {
        warn!(
            "malformed counter operand for key {:?}: {} bytes, folded as 0",
            key,
            value.len()
        );
        stats::record(stats, Ticker::CorruptOperand, 1);
        0
    })
}
