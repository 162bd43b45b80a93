//! Branch lifecycle over replicated documents.
//!
//! A branch is an independent, full-history replica forked from a point in
//! another document's history. Branch bookkeeping lives in the *source*
//! document's [`crate::meta::BranchMetadata`] — the single source of truth for
//! "does this branch exist" — while the branch document carries only an
//! informational back-pointer. Creating a branch therefore performs two
//! independent mutations on two documents with no transaction between
//! them; a race that leaves one written and the other pending is tolerated
//! because both sides are replicated state that converges on its own.
//!
//! The only failure this module must itself absorb is a branch record that
//! is expected but not yet visible (metadata and log propagation can race).
//! That case is logged and the operation continues; nothing here throws in
//! a way that could corrupt shared document state.

use std::collections::HashSet;

use chrono::Utc;
use tracing::warn;

use crate::engine::dag::ChangeDag;
use crate::engine::{
    Change, DocumentEngine, EngineError, Heads, Identity, normalize_heads,
};
use crate::meta::{
    Branch, MergeMetadata, SourcePointer, read_branch_metadata, write_branch_source,
    write_branches,
};

/// Options for [`create_branch`].
#[derive(Debug, Clone, Default)]
pub struct CreateBranchOptions {
    /// Display name of the new branch.
    pub name: String,
    /// Fork point; defaults to the source document's current head-set.
    pub heads: Option<Heads>,
}

/// Fork a new branch off `source`.
///
/// Clones the source document's entire history into a new, independent
/// replica, prepends a [`Branch`] record to the source's branch list, and
/// writes the clone's own `source` back-pointer. Returns the record
/// synchronously without waiting for remote acknowledgement.
///
/// # Errors
///
/// Engine errors (unknown document, unknown heads) only.
pub fn create_branch<E: DocumentEngine>(
    engine: &mut E,
    source: &str,
    opts: CreateBranchOptions,
    who: &Identity,
) -> Result<Branch, EngineError> {
    let branch_heads = match opts.heads {
        Some(heads) => normalize_heads(heads),
        None => engine.heads(source)?,
    };
    let url = engine.clone_doc(source)?;

    let branch = Branch {
        url: url.clone(),
        name: opts.name,
        created_at: Utc::now(),
        created_by: who.contact.clone(),
        branch_heads: branch_heads.clone(),
        merge_metadata: None,
    };

    // Mutation 1: the source's branch list (source of truth), newest first.
    let mut branches = read_branch_metadata(&engine.view(source)?).branches;
    branches.insert(0, branch.clone());
    write_branches(engine, source, &branches, who)?;

    // Mutation 2: the clone's informational back-pointer.
    write_branch_source(
        engine,
        &url,
        &SourcePointer {
            url: source.to_string(),
            branch_heads,
        },
        who,
    )?;

    Ok(branch)
}

/// Merge a branch's full log back into `target`.
///
/// The log merge is a commutative, idempotent union — re-merging an
/// already-merged branch is a no-op. The matching branch record (located by
/// url) gets its `merge_metadata` set exactly once; a missing record is
/// logged and skipped, since metadata and log propagation can race.
///
/// # Errors
///
/// Engine errors only.
pub fn merge_branch<E: DocumentEngine>(
    engine: &mut E,
    target: &str,
    branch_url: &str,
    who: &Identity,
) -> Result<(), EngineError> {
    let merge_heads = engine.heads(branch_url)?;
    engine.merge_docs(target, branch_url)?;

    let mut branches = read_branch_metadata(&engine.view(target)?).branches;
    match branches.iter_mut().find(|b| b.url == branch_url) {
        Some(record) => {
            if record.merge_metadata.is_none() {
                record.merge_metadata = Some(MergeMetadata {
                    merged_at: Utc::now(),
                    merge_heads,
                    merged_by: who.contact.clone(),
                });
                write_branches(engine, target, &branches, who)?;
            }
        }
        None => {
            warn!(
                branch = branch_url,
                target, "merge_branch: no matching branch record; metadata may still be propagating"
            );
        }
    }
    Ok(())
}

/// Remove a branch record from `doc`'s branch list.
///
/// Removes only the record; the branch document itself is untouched and may
/// remain reachable by link. All other records are left unchanged.
///
/// # Errors
///
/// Engine errors only.
pub fn delete_branch<E: DocumentEngine>(
    engine: &mut E,
    doc: &str,
    branch_url: &str,
    who: &Identity,
) -> Result<(), EngineError> {
    let mut branches = read_branch_metadata(&engine.view(doc)?).branches;
    let before = branches.len();
    branches.retain(|b| b.url != branch_url);
    if branches.len() == before {
        warn!(branch = branch_url, doc, "delete_branch: no matching branch record");
        return Ok(());
    }
    write_branches(engine, doc, &branches, who)
}

/// Rename the branch record matching `branch_url`.
///
/// # Errors
///
/// Engine errors only.
pub fn rename_branch<E: DocumentEngine>(
    engine: &mut E,
    doc: &str,
    branch_url: &str,
    new_name: &str,
    who: &Identity,
) -> Result<(), EngineError> {
    let mut branches = read_branch_metadata(&engine.view(doc)?).branches;
    match branches.iter_mut().find(|b| b.url == branch_url) {
        Some(record) => {
            record.name = new_name.to_string();
            write_branches(engine, doc, &branches, who)
        }
        None => {
            warn!(branch = branch_url, doc, "rename_branch: no matching branch record");
            Ok(())
        }
    }
}

/// Rebase a branch onto `target`'s current state.
///
/// Merges the target's current log into the branch, then moves the branch's
/// own `source.branch_heads` to the target's current head-set — a
/// three-way-diff base update, not history rewriting.
///
/// # Errors
///
/// Engine errors only.
pub fn rebase_branch<E: DocumentEngine>(
    engine: &mut E,
    branch_url: &str,
    target: &str,
    who: &Identity,
) -> Result<(), EngineError> {
    let target_heads = engine.heads(target)?;
    engine.merge_docs(branch_url, target)?;

    let meta = read_branch_metadata(&engine.view(branch_url)?);
    match meta.source {
        Some(mut source) => {
            source.branch_heads = target_heads;
            write_branch_source(engine, branch_url, &source, who)
        }
        None => {
            warn!(branch = branch_url, "rebase_branch: branch has no source pointer");
            Ok(())
        }
    }
}

/// The changes that originated on a merged branch.
///
/// Walks backward from `main_heads`, stopping at `base_heads ∪ branch_heads`,
/// and separately from `branch_heads`, stopping at `base_heads`, each
/// following every change's declared causal-parent list. Returns
/// (reachable-from-branch) minus (reachable-from-main), in `log` order.
/// A stop-set hash is neither emitted nor expanded, even as a start hash.
///
/// Cost is proportional to the changes actually visited, not full history.
#[must_use]
pub fn changes_from_merged_branch(
    log: &[Change],
    branch_heads: &[String],
    main_heads: &[String],
    base_heads: &[String],
) -> Vec<Change> {
    let dag = ChangeDag::from_changes(log);

    let mut main_stop: HashSet<String> = base_heads.iter().cloned().collect();
    main_stop.extend(branch_heads.iter().cloned());
    let from_main = dag.reachable_with_stop(main_heads, &main_stop);

    let branch_stop: HashSet<String> = base_heads.iter().cloned().collect();
    let from_branch = dag.reachable_with_stop(branch_heads, &branch_stop);

    log.iter()
        .filter(|c| from_branch.contains(&c.hash) && !from_main.contains(&c.hash))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
