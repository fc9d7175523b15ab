//! Advisory statistics shared by engines, merge operators and counters.
//!
//! Every ticker is declared once in [`TICKERS`]; recording and reporting go
//! through the same generic routines, so adding a ticker means adding a
//! variant and one table row.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ticker {
    FullMerge,
    PartialMerge,
    ChainLimitMerge,
    CorruptOperand,
    Flush,
    Compaction,
    CounterRead,
    CounterWrite,
}

#[derive(Debug, Clone, Copy)]
pub struct TickerInfo {
    pub ticker: Ticker,
    pub name: &'static str,
    pub help: &'static str,
}

pub const TICKERS: &[TickerInfo] = &[
    TickerInfo {
        ticker: Ticker::FullMerge,
        name: "merge_full_total",
        help: "Full merge resolutions performed",
    },
    TickerInfo {
        ticker: Ticker::PartialMerge,
        name: "merge_partial_total",
        help: "Partial merge resolutions performed",
    },
    TickerInfo {
        ticker: Ticker::ChainLimitMerge,
        name: "merge_chain_limit_total",
        help: "Resolutions triggered by the successive merge threshold",
    },
    TickerInfo {
        ticker: Ticker::CorruptOperand,
        name: "merge_corrupt_operand_total",
        help: "Malformed operands or base values folded as zero",
    },
    TickerInfo {
        ticker: Ticker::Flush,
        name: "engine_flush_total",
        help: "Memtable flushes",
    },
    TickerInfo {
        ticker: Ticker::Compaction,
        name: "engine_compaction_total",
        help: "Full range compactions",
    },
    TickerInfo {
        ticker: Ticker::CounterRead,
        name: "counter_read_total",
        help: "Point reads issued by counters",
    },
    TickerInfo {
        ticker: Ticker::CounterWrite,
        name: "counter_write_total",
        help: "Puts, deletes and merges issued by counters",
    },
];

impl Ticker {
    // table rows follow declaration order
    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug)]
pub struct Statistics {
    values: Vec<AtomicU64>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            values: TICKERS.iter().map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, ticker: Ticker, count: u64) {
        self.values[ticker.index()].fetch_add(count, Ordering::Relaxed);
    }

    pub fn get(&self, ticker: Ticker) -> u64 {
        self.values[ticker.index()].load(Ordering::Relaxed)
    }

    /// Rows of `(name, help, value)` in table order.
    pub fn snapshot(&self) -> Vec<(&'static str, &'static str, u64)> {
        TICKERS
            .iter()
            .zip(&self.values)
            .map(|(info, value)| (info.name, info.help, value.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn reset(&self) {
        for value in &self.values {
            value.store(0, Ordering::Relaxed);
        }
    }
}

/// Records into an optional sink; `None` means statistics are disabled.
pub(crate) fn record(stats: Option<&Statistics>, ticker: Ticker, count: u64) {
    if let Some(stats) = stats {
        stats.record(ticker, count)
    }
}
