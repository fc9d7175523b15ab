//! Parallel add workloads over [`Counters`], for benches and soak tests.

use std::collections::BTreeMap;

use anyhow::Context;
use log::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::counters::Counters;
use crate::engine::Engine;

const UNIQUE_RANDOM_SEED: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Random,
    Sequential,
    /// Every key once, in a shuffled order shared by all generators.
    UniqueRandom,
}

/// Deterministic source of key indexes in `0..num`.
#[derive(Debug)]
pub struct KeyGenerator {
    mode: WriteMode,
    num: u64,
    next: u64,
    rng: StdRng,
    shuffled: Vec<u64>,
}

impl KeyGenerator {
    pub fn new(mode: WriteMode, num: u64, seed: u64) -> Self {
        let num = num.max(1);
        let shuffled = match mode {
            WriteMode::UniqueRandom => {
                let mut keys: Vec<u64> = (0..num).collect();
                keys.shuffle(&mut StdRng::seed_from_u64(UNIQUE_RANDOM_SEED));
                keys
            }
            _ => Vec::new(),
        };
        Self {
            mode,
            num,
            next: 0,
            rng: StdRng::seed_from_u64(seed),
            shuffled,
        }
    }

    /// Sequential and unique modes start over after `num` keys.
    pub fn next_key(&mut self) -> u64 {
        match self.mode {
            WriteMode::Random => self.rng.gen_range(0..self.num),
            WriteMode::Sequential => {
                let key = self.next;
                self.next = (self.next + 1) % self.num;
                key
            }
            WriteMode::UniqueRandom => {
                let key = self.shuffled[self.next as usize];
                self.next = (self.next + 1) % self.num;
                key
            }
        }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

/// Storage key of counter index `index`.
pub fn counter_key(index: u64) -> Vec<u8> {
    format!("counter{:016}", index).into_bytes()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub workers: usize,
    pub ops_per_worker: usize,
    pub key_space: u64,
    pub mode: WriteMode,
    pub seed: u64,
    /// Deltas are drawn from `1..=max_delta`.
    pub max_delta: u64,
    /// Abort a worker on its first failed add instead of counting it.
    pub stop_on_error: bool,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            ops_per_worker: 1000,
            key_space: 100,
            mode: WriteMode::Random,
            seed: 0,
            max_delta: 1,
            stop_on_error: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadReport {
    pub operations: u64,
    pub failures: u64,
    /// Sum of successful deltas per key, wrapping.
    pub expected: BTreeMap<Vec<u8>, u64>,
}

impl WorkloadReport {
    fn absorb(&mut self, other: WorkloadReport) {
        self.operations += other.operations;
        self.failures += other.failures;
        for (key, delta) in other.expected {
            let total = self.expected.entry(key).or_default();
            *total = total.wrapping_add(delta);
        }
    }

    /// Keys whose stored value differs from the expected total, as
    /// `(key, expected, stored)`. `base` is the value every key held before
    /// the workload ran.
    pub fn mismatches<E: Engine>(
        &self,
        counters: &Counters<E>,
        base: u64,
    ) -> crate::Result<Vec<(Vec<u8>, u64, u64)>> {
        let mut mismatches = Vec::new();
        for (key, delta) in &self.expected {
            let expected = base.wrapping_add(*delta);
            let stored = counters.get(key)?;
            if stored != expected {
                mismatches.push((key.clone(), expected, stored));
            }
        }
        Ok(mismatches)
    }
}

fn run_worker<E: Engine>(
    counters: &Counters<E>,
    config: &WorkloadConfig,
    worker: usize,
) -> anyhow::Result<WorkloadReport> {
    let seed = config.seed.wrapping_add(worker as u64);
    let mut keys = KeyGenerator::new(config.mode, config.key_space, seed);
    let mut report = WorkloadReport::default();
    for op in 0..config.ops_per_worker {
        let key = counter_key(keys.next_key());
        let delta = keys.rng().gen_range(1..=config.max_delta);
        report.operations += 1;
        match counters.add(&key, delta) {
            Ok(()) => {
                let total = report.expected.entry(key).or_default();
                *total = total.wrapping_add(delta);
            }
            Err(e) if config.stop_on_error => {
                return Err(e)
                    .with_context(|| format!("worker {} failed at operation {}", worker, op));
            }
            Err(e) => {
                warn!("worker {} operation {} failed: {}", worker, op, e);
                report.failures += 1;
            }
        }
    }
    Ok(report)
}

/// Runs `config.workers` workers in parallel, each issuing
/// `config.ops_per_worker` adds.
pub fn run_add_workload<E: Engine>(
    counters: &Counters<E>,
    config: &WorkloadConfig,
) -> anyhow::Result<WorkloadReport> {
    anyhow::ensure!(config.workers > 0, "workload needs at least one worker");
    anyhow::ensure!(config.key_space > 0, "workload needs a non empty key space");
    anyhow::ensure!(config.max_delta > 0, "max_delta must be positive");

    debug!(
        "running {} workers x {} adds over {} keys ({:?})",
        config.workers, config.ops_per_worker, config.key_space, config.mode
    );
    let reports = (0..config.workers)
        .into_par_iter()
        .map(|worker| run_worker(counters, config, worker))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut total = WorkloadReport::default();
    for report in reports {
        total.absorb(report);
    }
    Ok(total)
}
