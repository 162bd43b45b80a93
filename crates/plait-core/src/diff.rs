//! Attributed diffs between two points in a document's history.
//!
//! The engine produces raw patches; this module maps each patch back to the
//! people responsible for it, using an author index built once per document
//! from change authorship metadata, and normalizes adjacent delete+insert
//! pairs into replace patches.

use std::collections::HashMap;

use crate::engine::{Change, DocumentEngine, EngineError, Patch, PatchAction};

/// A raw patch plus the stable contact references responsible for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributedPatch {
    pub patch: Patch,
    /// Responsible authors, deduplicated, in first-seen order. Usually one;
    /// empty when the source change is unknown.
    pub authors: Vec<String>,
}

/// Maps change hashes to author contact references.
///
/// Built once per document from the decoded log. Changes without an author
/// fall back to their actor id, so attribution never silently disappears
/// just because a device was not linked to a contact.
#[derive(Debug, Clone, Default)]
pub struct AuthorIndex {
    by_change: HashMap<String, String>,
}

impl AuthorIndex {
    /// Build the index from a document's decoded log.
    #[must_use]
    pub fn from_log(log: &[Change]) -> Self {
        let by_change = log
            .iter()
            .map(|c| {
                let author = c.author.clone().unwrap_or_else(|| c.actor.clone());
                (c.hash.clone(), author)
            })
            .collect();
        Self { by_change }
    }

    /// The author responsible for a change hash, if known.
    #[must_use]
    pub fn author_of(&self, change_hash: &str) -> Option<&str> {
        self.by_change.get(change_hash).map(String::as_str)
    }
}

/// Compute the patch set between two head-sets and attribute each patch.
///
/// # Errors
///
/// Engine errors (unknown document or heads) only.
pub fn diff_with_provenance<E: DocumentEngine>(
    engine: &E,
    doc: &str,
    from: &[String],
    to: &[String],
) -> Result<Vec<AttributedPatch>, EngineError> {
    let patches = engine.diff(doc, from, to)?;
    let index = AuthorIndex::from_log(&engine.log(doc)?);
    Ok(patches
        .into_iter()
        .map(|patch| {
            let authors = patch
                .source
                .as_deref()
                .and_then(|hash| index.author_of(hash))
                .map(|a| vec![a.to_string()])
                .unwrap_or_default();
            AttributedPatch { patch, authors }
        })
        .collect())
}

/// Coalesce an adjacent delete-then-insert pair touching the same range
/// into one replace patch.
///
/// Pure and order-preserving: patches that do not match the pattern pass
/// through untouched. Idempotent: a `Replace` never re-combines, so
/// `combine_patches(combine_patches(p)) == combine_patches(p)`.
#[must_use]
pub fn combine_patches(patches: Vec<AttributedPatch>) -> Vec<AttributedPatch> {
    let mut out: Vec<AttributedPatch> = Vec::with_capacity(patches.len());
    for next in patches {
        let combined = match (out.last(), &next.patch.action) {
            (Some(prev), PatchAction::Splice { index, text })
                if prev.patch.prop == next.patch.prop =>
            {
                match &prev.patch.action {
                    PatchAction::Del {
                        index: del_index,
                        removed,
                    } if del_index == index => Some(PatchAction::Replace {
                        index: *index,
                        removed: removed.clone(),
                        inserted: text.clone(),
                    }),
                    _ => None,
                }
            }
            _ => None,
        };
        match combined {
            Some(action) => {
                // Replace the pending Del with the merged patch, keeping
                // both sides' authors in first-seen order.
                let prev = out.pop().unwrap_or_else(|| unreachable!("guarded by last()"));
                let mut authors = prev.authors;
                for author in next.authors {
                    if !authors.contains(&author) {
                        authors.push(author);
                    }
                }
                out.push(AttributedPatch {
                    patch: Patch {
                        prop: next.patch.prop,
                        action,
                        source: prev.patch.source.or(next.patch.source),
                    },
                    authors,
                });
            }
            None => out.push(next),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
