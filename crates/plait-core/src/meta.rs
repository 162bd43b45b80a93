//! Version-control metadata stored inside the document it describes.
//!
//! Branch records, discussions, tags, and change-group summaries live as
//! ordinary replicated fields of the document itself — there is no side
//! index. Every write goes through the same engine mutation path as content,
//! so a document and its own version-control metadata can never diverge.
//!
//! Reads are infallible: unparseable or missing metadata degrades to the
//! empty default and is logged, never surfaced as a failed view.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use crate::engine::{
    AnchorRange, DocView, DocumentEngine, EngineError, Heads, Identity, Op,
};

/// Prop holding the list of [`Branch`] records of this document.
pub const BRANCHES_PROP: &str = "branches";
/// Prop holding this document's [`SourcePointer`], when it is a branch.
///
/// Kept separate from [`BRANCHES_PROP`] so the two independent mutations of
/// a branch creation (record on the source, back-pointer on the clone)
/// touch disjoint fields and survive a later merge in either direction.
pub const BRANCH_SOURCE_PROP: &str = "branchSource";
/// Prop holding the list of [`Discussion`]s.
pub const DISCUSSIONS_PROP: &str = "discussions";
/// Prop holding the list of [`Tag`]s.
pub const TAGS_PROP: &str = "tags";
/// Prop holding persisted change-group summaries, keyed by group id.
pub const SUMMARIES_PROP: &str = "changeGroupSummaries";

/// Returns `true` for props that are private bookkeeping rather than
/// user-visible content (version-control metadata and underscore-prefixed
/// fields).
#[must_use]
pub fn is_bookkeeping_prop(prop: &str) -> bool {
    prop.starts_with('_')
        || matches!(
            prop,
            BRANCHES_PROP | BRANCH_SOURCE_PROP | DISCUSSIONS_PROP | TAGS_PROP | SUMMARIES_PROP
        )
}

// ---------------------------------------------------------------------------
// Branch metadata
// ---------------------------------------------------------------------------

/// Merge bookkeeping on a branch record. Immutable once set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeMetadata {
    pub merged_at: DateTime<Utc>,
    pub merge_heads: Heads,
    pub merged_by: String,
}

/// One branch of a document: an independent full-history replica forked at
/// `branch_heads`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Branch {
    pub url: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    /// Head-set of the source document at fork time; always reachable in
    /// the source's history.
    pub branch_heads: Heads,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_metadata: Option<MergeMetadata>,
}

/// Back-pointer from a branch document to the document it was forked from.
/// Informational; the source's branch list is the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePointer {
    pub url: String,
    pub branch_heads: Heads,
}

/// The branch metadata of one document, assembled from the
/// [`BRANCHES_PROP`] and [`BRANCH_SOURCE_PROP`] fields at read time.
/// Exactly one per document; `source` is `None` for a root document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchMetadata {
    #[serde(default)]
    pub source: Option<SourcePointer>,
    #[serde(default)]
    pub branches: Vec<Branch>,
}

// ---------------------------------------------------------------------------
// Discussions and tags
// ---------------------------------------------------------------------------

/// One comment in a discussion thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub content: String,
    /// Stable contact reference of the comment author.
    pub contact: String,
    pub timestamp: DateTime<Utc>,
}

/// A persisted comment thread anchored to positions, or to the whole
/// document when `anchors` is empty. Never deleted, only marked resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discussion {
    pub id: String,
    /// Head-set at creation time.
    pub heads: Heads,
    pub resolved: bool,
    pub comments: Vec<Comment>,
    #[serde(default)]
    pub anchors: Vec<AnchorRange>,
}

/// An immutable named marker on a history point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub name: String,
    pub heads: Heads,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Reads (infallible, degrade to default)
// ---------------------------------------------------------------------------

fn read_prop<T: for<'de> Deserialize<'de> + Default>(view: &DocView, prop: &str) -> T {
    match view.value(prop) {
        None => T::default(),
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            warn!(prop, error = %e, "unparseable metadata prop; using default");
            T::default()
        }),
    }
}

/// The document's branch metadata (empty default when absent/unparseable).
#[must_use]
pub fn read_branch_metadata(view: &DocView) -> BranchMetadata {
    BranchMetadata {
        source: read_prop(view, BRANCH_SOURCE_PROP),
        branches: read_prop(view, BRANCHES_PROP),
    }
}

/// The document's discussions (empty when absent/unparseable).
#[must_use]
pub fn read_discussions(view: &DocView) -> Vec<Discussion> {
    read_prop(view, DISCUSSIONS_PROP)
}

/// The document's tags (empty when absent/unparseable).
#[must_use]
pub fn read_tags(view: &DocView) -> Vec<Tag> {
    read_prop(view, TAGS_PROP)
}

/// Persisted change-group summaries keyed by group id.
#[must_use]
pub fn read_summaries(view: &DocView) -> BTreeMap<String, String> {
    read_prop(view, SUMMARIES_PROP)
}

// ---------------------------------------------------------------------------
// Writes (through the engine, same path as content)
// ---------------------------------------------------------------------------

fn put_prop<E: DocumentEngine>(
    engine: &mut E,
    doc: &str,
    prop: &str,
    value: Value,
    who: &Identity,
    message: &str,
) -> Result<(), EngineError> {
    engine.apply(
        doc,
        crate::engine::ChangeRequest {
            actor: who.actor.clone(),
            author: Some(who.contact.clone()),
            time: Utc::now().timestamp_micros(),
            message: Some(message.to_string()),
            ops: vec![Op::Put {
                prop: prop.to_string(),
                value,
            }],
        },
    )?;
    Ok(())
}

/// Write the document's branch record list.
///
/// # Errors
///
/// Engine errors only; serialization of the typed records cannot fail.
pub fn write_branches<E: DocumentEngine>(
    engine: &mut E,
    doc: &str,
    branches: &[Branch],
    who: &Identity,
) -> Result<(), EngineError> {
    let value =
        serde_json::to_value(branches).map_err(|e| EngineError::Encode(e.to_string()))?;
    put_prop(engine, doc, BRANCHES_PROP, value, who, "update branch list")
}

/// Write the document's source back-pointer.
///
/// # Errors
///
/// Engine errors only.
pub fn write_branch_source<E: DocumentEngine>(
    engine: &mut E,
    doc: &str,
    source: &SourcePointer,
    who: &Identity,
) -> Result<(), EngineError> {
    let value =
        serde_json::to_value(source).map_err(|e| EngineError::Encode(e.to_string()))?;
    put_prop(engine, doc, BRANCH_SOURCE_PROP, value, who, "update branch source")
}

fn content_id(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1f");
    }
    let hex = hasher.finalize().to_hex();
    format!("{prefix}:{}", &hex.as_str()[..12])
}

/// Start a new discussion anchored at `anchors` (empty = whole document).
///
/// # Errors
///
/// Engine errors only.
pub fn create_discussion<E: DocumentEngine>(
    engine: &mut E,
    doc: &str,
    anchors: Vec<AnchorRange>,
    content: &str,
    who: &Identity,
) -> Result<Discussion, EngineError> {
    let heads = engine.heads(doc)?;
    let now = Utc::now();
    let stamp = now.timestamp_micros().to_string();
    let discussion = Discussion {
        id: content_id("disc", &[&who.contact, &stamp, content]),
        heads,
        resolved: false,
        comments: vec![Comment {
            id: content_id("cmt", &[&who.contact, &stamp, content]),
            content: content.to_string(),
            contact: who.contact.clone(),
            timestamp: now,
        }],
        anchors,
    };

    let mut discussions = read_discussions(&engine.view(doc)?);
    discussions.push(discussion.clone());
    let value = serde_json::to_value(&discussions)
        .map_err(|e| EngineError::Encode(e.to_string()))?;
    put_prop(engine, doc, DISCUSSIONS_PROP, value, who, "create discussion")?;
    Ok(discussion)
}

/// Append a reply to an existing discussion.
///
/// Returns `None` (after a warning) when the discussion is not visible yet —
/// the same metadata race as a missing branch record.
///
/// # Errors
///
/// Engine errors only.
pub fn add_comment<E: DocumentEngine>(
    engine: &mut E,
    doc: &str,
    discussion_id: &str,
    content: &str,
    who: &Identity,
) -> Result<Option<Comment>, EngineError> {
    let mut discussions = read_discussions(&engine.view(doc)?);
    let Some(discussion) = discussions.iter_mut().find(|d| d.id == discussion_id) else {
        warn!(discussion_id, "add_comment: no such discussion; metadata may still be propagating");
        return Ok(None);
    };
    let now = Utc::now();
    let comment = Comment {
        id: content_id(
            "cmt",
            &[&who.contact, &now.timestamp_micros().to_string(), content],
        ),
        content: content.to_string(),
        contact: who.contact.clone(),
        timestamp: now,
    };
    discussion.comments.push(comment.clone());
    let value = serde_json::to_value(&discussions)
        .map_err(|e| EngineError::Encode(e.to_string()))?;
    put_prop(engine, doc, DISCUSSIONS_PROP, value, who, "add comment")?;
    Ok(Some(comment))
}

/// Mark a discussion resolved. Resolving twice is a no-op.
///
/// Returns `false` (after a warning) when the discussion is not visible.
///
/// # Errors
///
/// Engine errors only.
pub fn resolve_discussion<E: DocumentEngine>(
    engine: &mut E,
    doc: &str,
    discussion_id: &str,
    who: &Identity,
) -> Result<bool, EngineError> {
    let mut discussions = read_discussions(&engine.view(doc)?);
    let Some(discussion) = discussions.iter_mut().find(|d| d.id == discussion_id) else {
        warn!(discussion_id, "resolve_discussion: no such discussion");
        return Ok(false);
    };
    if discussion.resolved {
        return Ok(true);
    }
    discussion.resolved = true;
    let value = serde_json::to_value(&discussions)
        .map_err(|e| EngineError::Encode(e.to_string()))?;
    put_prop(engine, doc, DISCUSSIONS_PROP, value, who, "resolve discussion")?;
    Ok(true)
}

/// Create an immutable tag on the document's current heads.
///
/// # Errors
///
/// Engine errors only.
pub fn create_tag<E: DocumentEngine>(
    engine: &mut E,
    doc: &str,
    name: &str,
    who: &Identity,
) -> Result<Tag, EngineError> {
    let tag = Tag {
        name: name.to_string(),
        heads: engine.heads(doc)?,
        timestamp: Utc::now(),
    };
    let mut tags = read_tags(&engine.view(doc)?);
    tags.push(tag.clone());
    let value =
        serde_json::to_value(&tags).map_err(|e| EngineError::Encode(e.to_string()))?;
    put_prop(engine, doc, TAGS_PROP, value, who, "create tag")?;
    Ok(tag)
}

/// Persist a change-group summary keyed by group id. First write wins;
/// a summary already present for the id is left untouched.
///
/// # Errors
///
/// Engine errors only.
pub fn persist_summary<E: DocumentEngine>(
    engine: &mut E,
    doc: &str,
    group_id: &str,
    summary: &str,
    who: &Identity,
) -> Result<(), EngineError> {
    let mut summaries = read_summaries(&engine.view(doc)?);
    if summaries.contains_key(group_id) {
        return Ok(());
    }
    summaries.insert(group_id.to_string(), summary.to_string());
    let value = serde_json::to_value(&summaries)
        .map_err(|e| EngineError::Encode(e.to_string()))?;
    put_prop(engine, doc, SUMMARIES_PROP, value, who, "persist summary")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
