//! Campaign runner: many seeds, one verdict.
//!
//! Executes the simulator across a seed range, collecting violations and
//! identifying the first failing seed for replay with
//! `SimConfig { seed, .. }`.

use std::ops::Range;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::oracle::InvariantViolation;
use crate::{SimConfig, Simulator};

/// Campaign-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Seeds to execute, e.g. `0..100`.
    pub seed_range: Range<u64>,
    /// Editors per seed.
    pub editors: usize,
    /// Rounds per seed.
    pub rounds: u64,
    /// Per-editor edit probability (percent).
    pub edit_percent: u8,
    /// Per-round gossip-merge probability (percent).
    pub merge_percent: u8,
    /// Per-round branch-cycle probability (percent).
    pub branch_percent: u8,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let base = SimConfig::default();
        Self {
            seed_range: 0..25,
            editors: base.editors,
            rounds: base.rounds,
            edit_percent: base.edit_percent,
            merge_percent: base.merge_percent,
            branch_percent: base.branch_percent,
        }
    }
}

/// Violations recorded for one failing seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<InvariantViolation>,
}

/// Aggregate campaign outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignResult {
    /// Seeds executed.
    pub executed: u64,
    /// Failing seeds with their violations, in seed order.
    pub failures: Vec<SeedFailure>,
}

impl CampaignResult {
    /// `true` when every seed passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// The first failing seed, for deterministic replay.
    #[must_use]
    pub fn first_failing_seed(&self) -> Option<u64> {
        self.failures.first().map(|f| f.seed)
    }
}

/// Run one simulation per seed in the configured range.
///
/// # Errors
///
/// Engine errors only (harness bugs); invariant violations are collected,
/// not raised.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignResult> {
    let mut failures = Vec::new();
    let mut executed = 0;
    for seed in config.seed_range.clone() {
        let mut simulator = Simulator::new(SimConfig {
            seed,
            editors: config.editors,
            rounds: config.rounds,
            edit_percent: config.edit_percent,
            merge_percent: config.merge_percent,
            branch_percent: config.branch_percent,
        })?;
        let result = simulator.run()?;
        executed += 1;
        if !result.converged {
            info!(seed, violations = result.checks.violations.len(), "seed failed");
            failures.push(SeedFailure {
                seed,
                violations: result.checks.violations,
            });
        }
    }
    Ok(CampaignResult { executed, failures })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
