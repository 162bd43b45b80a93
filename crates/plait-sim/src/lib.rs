//! Deterministic simulation harness for plait.
//!
//! Drives N concurrent editors over cloned replicas of one document:
//! random edits, gossip merges, and full branch create/edit/merge-back
//! cycles, all from a single seed. After the run, replicas perform a full
//! exchange and the [`oracle`] battery checks convergence, merge
//! idempotence, diff reconstruction, and clustering partition.
//!
//! # Conventions
//!
//! - **Errors**: `anyhow::Result` for return types.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `debug!`).

pub mod campaign;
pub mod oracle;
pub mod rng;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use plait_core::branch::{CreateBranchOptions, create_branch, merge_branch};
use plait_core::engine::memory::MemoryEngine;
use plait_core::engine::{ChangeRequest, DocumentEngine, Heads, Identity, Op};

use crate::oracle::{CONTENT_PROP, OracleResult, check_all};
use crate::rng::SimRng;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Parameters for one simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    /// RNG seed; same seed, same run.
    pub seed: u64,
    /// Number of concurrent editors (each with its own replica).
    pub editors: usize,
    /// Simulation rounds.
    pub rounds: u64,
    /// Per-editor chance of editing each round (percent).
    pub edit_percent: u8,
    /// Per-round chance of a gossip merge between two replicas (percent).
    pub merge_percent: u8,
    /// Per-round chance of a branch create/edit/merge-back cycle (percent).
    pub branch_percent: u8,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            editors: 3,
            rounds: 12,
            edit_percent: 80,
            merge_percent: 40,
            branch_percent: 15,
        }
    }
}

/// Outcome of one simulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimResult {
    /// Rounds executed.
    pub rounds: u64,
    /// Changes applied across all replicas.
    pub edits: u64,
    /// Branch cycles completed.
    pub branches: u64,
    /// Whether every oracle check passed.
    pub converged: bool,
    /// Full oracle diagnostics.
    pub checks: OracleResult,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

/// One deterministic simulation over an in-memory engine.
pub struct Simulator {
    config: SimConfig,
    rng: SimRng,
    engine: MemoryEngine,
    replicas: Vec<String>,
    snapshots: Vec<Heads>,
    clock: i64,
    edits: u64,
    branches: u64,
}

fn editor_identity(editor: usize) -> Identity {
    Identity::new(format!("editor-{editor}"), format!("contact:editor-{editor}"))
}

impl Simulator {
    /// Seed the document, clone one replica per editor.
    ///
    /// # Errors
    ///
    /// Fails only on engine errors, which indicate a harness bug.
    pub fn new(config: SimConfig) -> Result<Self> {
        anyhow::ensure!(config.editors > 0, "need at least one editor");
        let mut engine = MemoryEngine::new();
        let root = engine.create_doc();
        engine
            .apply(
                &root,
                ChangeRequest {
                    actor: "editor-0".into(),
                    author: Some("contact:editor-0".into()),
                    time: 1_000,
                    message: None,
                    ops: vec![Op::Splice {
                        prop: CONTENT_PROP.into(),
                        index: 0,
                        delete: 0,
                        insert: "the quick brown fox ".into(),
                    }],
                },
            )
            .context("seeding root document")?;

        let mut replicas = vec![root.clone()];
        for _ in 1..config.editors {
            replicas.push(engine.clone_doc(&root).context("cloning replica")?);
        }
        let snapshots = vec![engine.heads(&root).context("initial heads")?];

        Ok(Self {
            rng: SimRng::new(config.seed),
            config,
            engine,
            replicas,
            snapshots,
            clock: 1_000,
            edits: 0,
            branches: 0,
        })
    }

    fn tick(&mut self) -> i64 {
        self.clock += 1_000;
        self.clock
    }

    fn random_edit(&mut self, editor: usize) -> Result<()> {
        let replica = self.replicas[editor].clone();
        let len = self.engine.view(&replica)?.text_len(CONTENT_PROP);
        let index = usize::try_from(self.rng.below(len as u64 + 1)).unwrap_or(0);
        let delete = usize::try_from(self.rng.below(3)).unwrap_or(0);
        let insert = self.rng.word(0, 5);
        let who = editor_identity(editor);
        let time = self.tick();
        self.engine.apply(
            &replica,
            ChangeRequest {
                actor: who.actor,
                author: Some(who.contact),
                time,
                message: None,
                ops: vec![Op::Splice {
                    prop: CONTENT_PROP.into(),
                    index,
                    delete,
                    insert,
                }],
            },
        )?;
        self.edits += 1;
        Ok(())
    }

    fn gossip_merge(&mut self) -> Result<()> {
        let count = self.replicas.len() as u64;
        let a = usize::try_from(self.rng.below(count)).unwrap_or(0);
        let b = usize::try_from(self.rng.below(count)).unwrap_or(0);
        if a != b {
            let target = self.replicas[a].clone();
            let source = self.replicas[b].clone();
            self.engine.merge_docs(&target, &source)?;
        }
        Ok(())
    }

    fn branch_cycle(&mut self) -> Result<()> {
        let editor = usize::try_from(self.rng.below(self.replicas.len() as u64)).unwrap_or(0);
        let who = editor_identity(editor);
        let doc = self.replicas[0].clone();
        let branch = create_branch(
            &mut self.engine,
            &doc,
            CreateBranchOptions {
                name: format!("sim-branch-{}", self.branches),
                heads: None,
            },
            &who,
        )?;
        let len = self.engine.view(&branch.url)?.text_len(CONTENT_PROP);
        let index = usize::try_from(self.rng.below(len as u64 + 1)).unwrap_or(0);
        let insert = self.rng.word(1, 6);
        let time = self.tick();
        self.engine.apply(
            &branch.url,
            ChangeRequest {
                actor: who.actor.clone(),
                author: Some(who.contact.clone()),
                time,
                message: None,
                ops: vec![Op::Splice {
                    prop: CONTENT_PROP.into(),
                    index,
                    delete: 0,
                    insert,
                }],
            },
        )?;
        merge_branch(&mut self.engine, &doc, &branch.url, &who)?;
        self.branches += 1;
        Ok(())
    }

    /// Run the configured rounds, then the full exchange and oracle battery.
    ///
    /// # Errors
    ///
    /// Engine errors only (a harness bug, not an invariant violation).
    pub fn run(&mut self) -> Result<SimResult> {
        for round in 0..self.config.rounds {
            for editor in 0..self.replicas.len() {
                if self.rng.percent(self.config.edit_percent) {
                    self.random_edit(editor)?;
                }
            }
            if self.rng.percent(self.config.merge_percent) {
                self.gossip_merge()?;
            }
            if self.rng.percent(self.config.branch_percent) {
                self.branch_cycle()?;
            }
            let heads = self.engine.heads(&self.replicas[0])?;
            self.snapshots.push(heads);
            debug!(round, edits = self.edits, "simulation round complete");
        }

        // Full exchange: everyone's changes reach everyone.
        let first = self.replicas[0].clone();
        for replica in self.replicas[1..].to_vec() {
            self.engine.merge_docs(&first, &replica)?;
        }
        for replica in self.replicas[1..].to_vec() {
            self.engine.merge_docs(&replica, &first)?;
        }

        let checks = check_all(&mut self.engine, &self.replicas, &self.snapshots);
        Ok(SimResult {
            rounds: self.config.rounds,
            edits: self.edits,
            branches: self.branches,
            converged: checks.passed,
            checks,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_simulation_converges() {
        let mut simulator = Simulator::new(SimConfig::default()).expect("simulator");
        let result = simulator.run().expect("run");
        assert!(result.converged, "violations: {:?}", result.checks.violations);
        assert!(result.edits > 0);
    }

    #[test]
    fn same_seed_reproduces_the_run() {
        let run = |seed: u64| {
            let mut simulator = Simulator::new(SimConfig {
                seed,
                ..SimConfig::default()
            })
            .expect("simulator");
            simulator.run().expect("run")
        };
        let a = run(7);
        let b = run(7);
        assert_eq!(a.edits, b.edits);
        assert_eq!(a.branches, b.branches);
        assert_eq!(a.converged, b.converged);
    }

    #[test]
    fn heavy_merge_traffic_still_converges() {
        let mut simulator = Simulator::new(SimConfig {
            seed: 3,
            editors: 4,
            rounds: 20,
            edit_percent: 90,
            merge_percent: 80,
            branch_percent: 60,
        })
        .expect("simulator");
        let result = simulator.run().expect("run");
        assert!(result.converged, "violations: {:?}", result.checks.violations);
        assert!(result.branches > 0, "branch cycles should have run");
    }

    #[test]
    fn zero_editor_config_is_rejected() {
        assert!(Simulator::new(SimConfig {
            editors: 0,
            ..SimConfig::default()
        })
        .is_err());
    }
}
