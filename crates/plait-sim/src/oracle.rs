//! Invariant oracles for simulated branch/merge histories.
//!
//! Each checker returns an [`OracleResult`]; [`check_all`] runs the full
//! battery. The checks mirror the engine's testable properties: replicas
//! converge after full exchange, merges are idempotent, diffs reconstruct
//! any recorded version pair, and annotation clustering partitions its
//! input.

use serde::Serialize;

use plait_core::annotations::project_annotations;
use plait_core::caps::DocKind;
use plait_core::diff::diff_with_provenance;
use plait_core::engine::memory::{MemoryEngine, apply_text_patches};
use plait_core::engine::{DocumentEngine, Heads};

/// Text property the simulator edits.
pub const CONTENT_PROP: &str = "content";

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Outcome of one or more invariant checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    /// Every invariant violation, in check order.
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    fn fail(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: false,
            violations,
        }
    }

    /// Fold another result into this one; failures accumulate.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

/// Diagnostic for a single failed invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum InvariantViolation {
    /// Two replicas differ after full exchange.
    Convergence {
        replica_a: String,
        replica_b: String,
        text_a: String,
        text_b: String,
    },
    /// Re-merging an already-merged replica changed state.
    MergeIdempotence { target: String, source: String },
    /// A diff failed to reconstruct the target version.
    DiffReconstruction {
        from: Heads,
        to: Heads,
        expected: String,
        got: String,
    },
    /// Annotation groups did not exactly partition the annotation set.
    ClusterPartition { flat: usize, grouped: usize },
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// All replicas hold identical content and heads.
#[must_use]
pub fn check_convergence(engine: &MemoryEngine, replicas: &[String]) -> OracleResult {
    let mut violations = Vec::new();
    let Some((first, rest)) = replicas.split_first() else {
        return OracleResult::pass();
    };
    let Ok(reference) = engine.view(first) else {
        return OracleResult::pass();
    };
    let reference_text = reference.text(CONTENT_PROP);
    for replica in rest {
        let Ok(view) = engine.view(replica) else {
            continue;
        };
        let text = view.text(CONTENT_PROP);
        if text != reference_text {
            violations.push(InvariantViolation::Convergence {
                replica_a: first.clone(),
                replica_b: replica.clone(),
                text_a: reference_text.clone(),
                text_b: text,
            });
        }
    }
    if violations.is_empty() {
        OracleResult::pass()
    } else {
        OracleResult::fail(violations)
    }
}

fn merged_state(
    engine: &MemoryEngine,
    doc: &str,
) -> Result<(String, usize), plait_core::engine::EngineError> {
    let text = engine.view(doc)?.text(CONTENT_PROP);
    let len = engine.log(doc)?.len();
    Ok((text, len))
}

/// Merging the same source twice is a no-op the second time.
pub fn check_merge_idempotence(
    engine: &mut MemoryEngine,
    target: &str,
    source: &str,
) -> OracleResult {
    if engine.merge_docs(target, source).is_err() {
        return OracleResult::pass();
    }
    let Ok((text_once, len_once)) = merged_state(engine, target) else {
        return OracleResult::pass();
    };
    if engine.merge_docs(target, source).is_err() {
        return OracleResult::pass();
    }
    let Ok((text_twice, len_twice)) = merged_state(engine, target) else {
        return OracleResult::pass();
    };
    if text_once == text_twice && len_once == len_twice {
        OracleResult::pass()
    } else {
        OracleResult::fail(vec![InvariantViolation::MergeIdempotence {
            target: target.to_string(),
            source: source.to_string(),
        }])
    }
}

/// Every recorded version pair reconstructs through the diff.
#[must_use]
pub fn check_diff_reconstruction(
    engine: &MemoryEngine,
    doc: &str,
    snapshots: &[Heads],
) -> OracleResult {
    let mut violations = Vec::new();
    for from in snapshots {
        for to in snapshots {
            let (Ok(before), Ok(after)) =
                (engine.view_at(doc, from), engine.view_at(doc, to))
            else {
                continue;
            };
            let Ok(patches) = engine.diff(doc, from, to) else {
                continue;
            };
            let expected = after.text(CONTENT_PROP);
            let got = apply_text_patches(&before.text(CONTENT_PROP), CONTENT_PROP, &patches);
            if got != expected {
                violations.push(InvariantViolation::DiffReconstruction {
                    from: from.clone(),
                    to: to.clone(),
                    expected,
                    got,
                });
            }
        }
    }
    if violations.is_empty() {
        OracleResult::pass()
    } else {
        OracleResult::fail(violations)
    }
}

/// Projecting the diff between two versions yields groups that exactly
/// partition the annotation set.
#[must_use]
pub fn check_cluster_partition(
    engine: &MemoryEngine,
    doc: &str,
    from: &Heads,
    to: &Heads,
) -> OracleResult {
    let Ok(diff) = diff_with_provenance(engine, doc, from, to) else {
        return OracleResult::pass();
    };
    let Ok(view) = engine.view_at(doc, to) else {
        return OracleResult::pass();
    };
    let out = project_annotations(&view, Some(&diff), &[], &DocKind::Text.capabilities());
    let grouped: usize = out.groups.iter().map(|g| g.annotations.len()).sum();
    if grouped == out.annotations.len() {
        OracleResult::pass()
    } else {
        OracleResult::fail(vec![InvariantViolation::ClusterPartition {
            flat: out.annotations.len(),
            grouped,
        }])
    }
}

/// Run the full battery against a finished simulation.
pub fn check_all(
    engine: &mut MemoryEngine,
    replicas: &[String],
    snapshots: &[Heads],
) -> OracleResult {
    let mut result = check_convergence(engine, replicas);
    if let Some((first, rest)) = replicas.split_first() {
        for source in rest {
            result = result.merge(check_merge_idempotence(engine, first, source));
        }
        result = result.merge(check_diff_reconstruction(engine, first, snapshots));
        if let (Some(from), Some(to)) = (snapshots.first(), snapshots.last()) {
            result = result.merge(check_cluster_partition(engine, first, from, to));
        }
    }
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
