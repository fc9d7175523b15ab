use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::merge::{Associative, CountMergeOperator, MergeOperator, UInt64AddOperator};
use crate::stats::Statistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOperatorKind {
    /// [`UInt64AddOperator`], one operand per merge call.
    Associative,
    /// [`CountMergeOperator`], full and partial resolution over operand lists.
    FullPartial,
}

impl MergeOperatorKind {
    pub fn name(self) -> &'static str {
        match self {
            MergeOperatorKind::Associative => UInt64AddOperator::NAME,
            MergeOperatorKind::FullPartial => CountMergeOperator::NAME,
        }
    }

    pub fn build(self, stats: Option<Arc<Statistics>>) -> Arc<dyn MergeOperator> {
        match (self, stats) {
            (MergeOperatorKind::Associative, Some(stats)) => {
                Arc::new(Associative(UInt64AddOperator::with_statistics(stats)))
            }
            (MergeOperatorKind::Associative, None) => {
                Arc::new(Associative(UInt64AddOperator::new()))
            }
            (MergeOperatorKind::FullPartial, Some(stats)) => {
                Arc::new(CountMergeOperator::with_statistics(stats))
            }
            (MergeOperatorKind::FullPartial, None) => Arc::new(CountMergeOperator::new()),
        }
    }
}

/// Options shared by every engine implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// `None` opens the engine without a merge operator.
    pub merge_operator: Option<MergeOperatorKind>,
    /// Unresolved operands per key kept in the memtable before they are
    /// merged eagerly. Zero disables the limit.
    pub max_successive_merges: usize,
    pub create_if_missing: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            merge_operator: Some(MergeOperatorKind::Associative),
            max_successive_merges: 0,
            create_if_missing: true,
        }
    }
}

impl EngineOptions {
    pub fn with_merge_operator(mut self, kind: MergeOperatorKind) -> Self {
        self.merge_operator = Some(kind);
        self
    }

    pub fn without_merge_operator(mut self) -> Self {
        self.merge_operator = None;
        self
    }

    pub fn with_max_successive_merges(mut self, max: usize) -> Self {
        self.max_successive_merges = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_partial_options() {
        let json = r#"{"merge_operator": "full_partial", "max_successive_merges": 5}"#;
        let options: EngineOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.merge_operator, Some(MergeOperatorKind::FullPartial));
        assert_eq!(options.max_successive_merges, 5);
        assert!(options.create_if_missing);

        let options: EngineOptions = serde_json::from_str(r#"{"merge_operator": null}"#).unwrap();
        assert_eq!(options.merge_operator, None);

        let options: EngineOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, EngineOptions::default());
    }

    #[test]
    fn it_builds_named_operators() {
        for kind in [MergeOperatorKind::Associative, MergeOperatorKind::FullPartial] {
            assert_eq!(kind.build(None).name(), kind.name());
            assert_eq!(kind.build(Some(Arc::new(Statistics::new()))).name(), kind.name());
        }
    }
}
