//! Per-document-type capabilities.
//!
//! Grouping, projection, and ordering all have a document-type-specific
//! piece: which changes count as content edits, how a patch renders as an
//! annotation, what a change group's fallback summary says, and how anchors
//! order. Each document type supplies one [`DocCapabilities`] value —
//! plain function pointers selected by a [`DocKind`] tag at load time, not
//! inheritance.

use serde::{Deserialize, Serialize};

use crate::annotations::{Annotation, Region, anchor_at};
use crate::diff::AttributedPatch;
use crate::engine::{Change, DocView, Patch, PatchAction};
use crate::meta::is_bookkeeping_prop;

/// Ordering key for anchors: property, then start, then end.
pub type AnchorSortKey = (String, usize, usize);

/// The capability bundle of one document type.
#[derive(Debug, Clone, Copy)]
pub struct DocCapabilities {
    /// Does this change count as a content edit (it may start or extend a
    /// change group)?
    pub change_filter: fn(&Change) -> bool,
    /// Is this patch shape modeled by the document type? Unrecognized
    /// shapes are filtered out before grouping and annotation.
    pub patch_filter: fn(&Patch) -> bool,
    /// Render one patch as an annotation anchored in the given view.
    pub patch_projector: fn(&AttributedPatch, &DocView) -> Option<Annotation>,
    /// Human-readable summary used until a better one is supplied.
    pub fallback_summary: fn(&[AttributedPatch]) -> String,
    /// Anchor ordering key for group sorting.
    pub anchor_sort_key: fn(&str, Region) -> AnchorSortKey,
}

/// Document type tag, selected at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    /// Plain prose: one or more text properties plus map fields.
    Text,
}

impl DocKind {
    /// The capability bundle for this document type.
    #[must_use]
    pub fn capabilities(self) -> DocCapabilities {
        match self {
            Self::Text => DocCapabilities {
                change_filter: text_change_filter,
                patch_filter: text_patch_filter,
                patch_projector: text_patch_projector,
                fallback_summary: text_fallback_summary,
                anchor_sort_key: text_anchor_sort_key,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Text document capabilities
// ---------------------------------------------------------------------------

/// A change counts when it touches anything beyond private bookkeeping.
fn text_change_filter(change: &Change) -> bool {
    change.ops.iter().any(|op| !is_bookkeeping_prop(op.prop()))
}

/// Text documents model splice/del/replace on content props; map writes
/// and bookkeeping props are unrecognized shapes here.
fn text_patch_filter(patch: &Patch) -> bool {
    if is_bookkeeping_prop(&patch.prop) {
        return false;
    }
    !matches!(patch.action, PatchAction::Put { .. })
}

fn text_patch_projector(patch: &AttributedPatch, view: &DocView) -> Option<Annotation> {
    let prop = &patch.patch.prop;
    match &patch.patch.action {
        PatchAction::Splice { index, text } => Some(Annotation::Added {
            anchor: anchor_at(view, prop, *index, index + text.chars().count()),
            text: text.clone(),
        }),
        PatchAction::Del { index, removed } => Some(Annotation::Deleted {
            // Zero-width anchor at the deletion point.
            anchor: anchor_at(view, prop, *index, *index),
            text: removed.clone(),
        }),
        PatchAction::Replace {
            index,
            removed,
            inserted,
        } => Some(Annotation::Changed {
            anchor: anchor_at(view, prop, *index, index + inserted.chars().count()),
            before: removed.clone(),
            after: inserted.clone(),
        }),
        PatchAction::Put { .. } => None,
    }
}

fn text_fallback_summary(patches: &[AttributedPatch]) -> String {
    let mut inserted = 0usize;
    let mut removed = 0usize;
    for patch in patches {
        match &patch.patch.action {
            PatchAction::Splice { text, .. } => inserted += text.chars().count(),
            PatchAction::Del { removed: r, .. } => removed += r.chars().count(),
            PatchAction::Replace {
                removed: r,
                inserted: i,
                ..
            } => {
                inserted += i.chars().count();
                removed += r.chars().count();
            }
            PatchAction::Put { .. } => {}
        }
    }
    match (inserted, removed) {
        (0, 0) => "no visible changes".to_string(),
        (i, 0) => format!("added {i} characters"),
        (0, r) => format!("removed {r} characters"),
        (i, r) => format!("added {i}, removed {r} characters"),
    }
}

fn text_anchor_sort_key(prop: &str, region: Region) -> AnchorSortKey {
    (prop.to_string(), region.start, region.end)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
