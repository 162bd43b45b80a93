//! Document-engine interface and the decoded change-log data model.
//!
//! Everything above this module (branches, timelines, diffs, annotations)
//! consumes a replicated document only through the [`DocumentEngine`] trait:
//! head-set computation, historical views, diffs between head-sets, stable
//! cursors, full-history clones, and log union merges. The trait is the
//! subsystem's entire view of the replication layer.
//!
//! # Change identity
//!
//! Every change is identified by a BLAKE3 hash of its decoded fields,
//! including its causal parent hashes, in `blake3:<hex>` format. Parent
//! references therefore form a Merkle-DAG: the minimal set of changes no
//! other change depends on is the document's **head-set** (causal frontier).
//!
//! # Sub-modules
//!
//! - [`dag`]: hash-indexed DAG over decoded changes with frontier, bounded
//!   reachability, and deterministic topological order.
//! - [`memory`]: the reference in-memory engine used by tests and the
//!   simulation harness.

pub mod dag;
pub mod memory;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Head-sets
// ---------------------------------------------------------------------------

/// A head-set: the causal frontier of a document, as sorted change hashes.
pub type Heads = Vec<String>;

/// Normalize a head-set to its canonical form (sorted, deduplicated).
#[must_use]
pub fn normalize_heads(mut heads: Heads) -> Heads {
    heads.sort();
    heads.dedup();
    heads
}

/// Set equality for two head-sets, ignoring order and duplicates.
#[must_use]
pub fn same_heads(a: &[String], b: &[String]) -> bool {
    normalize_heads(a.to_vec()) == normalize_heads(b.to_vec())
}

// ---------------------------------------------------------------------------
// Changes and operations
// ---------------------------------------------------------------------------

/// A low-level operation inside a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    /// Text edit: delete `delete` characters at `index`, then insert `insert`.
    Splice {
        prop: String,
        index: usize,
        delete: usize,
        insert: String,
    },
    /// Map-field write: set `prop` to `value`.
    Put { prop: String, value: Value },
}

impl Op {
    /// The property this operation touches.
    #[must_use]
    pub fn prop(&self) -> &str {
        match self {
            Self::Splice { prop, .. } | Self::Put { prop, .. } => prop,
        }
    }
}

/// A decoded change record from a document's log.
///
/// The in-memory analogue of a raw replicated-log entry: who made it
/// (`actor`, plus an optional stable contact reference in `author`), when
/// (`time`, wall-clock microseconds since the Unix epoch), its causal
/// parents (`deps`, sorted hashes), and the operations it applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// BLAKE3 content hash of all other fields, `blake3:<hex>`.
    pub hash: String,
    /// Identifier of the device/session that produced the change.
    pub actor: String,
    /// Stable contact reference of the human behind the actor, when known.
    pub author: Option<String>,
    /// Parent change hashes, sorted lexicographically. Empty for a root.
    pub deps: Vec<String>,
    /// Wall-clock microseconds since the Unix epoch.
    pub time: i64,
    /// Optional human-entered message.
    pub message: Option<String>,
    /// The operations this change applied, in order.
    pub ops: Vec<Op>,
}

impl Change {
    /// Comma-joined parents field, empty for roots.
    #[must_use]
    pub fn deps_str(&self) -> String {
        self.deps.join(",")
    }
}

/// Compute the BLAKE3 content hash for a change's fields.
///
/// The hash input is the tab-joined decoded fields (time, actor, author,
/// sorted deps, message, canonical ops JSON), newline-terminated, so the
/// same change always produces the same identity on every replica.
///
/// # Errors
///
/// Returns an error if the ops fail to serialize (malformed `Value`s only).
pub fn compute_change_hash(
    time: i64,
    actor: &str,
    author: Option<&str>,
    deps: &[String],
    message: Option<&str>,
    ops: &[Op],
) -> Result<String, serde_json::Error> {
    let ops_json = serde_json::to_string(ops)?;
    let input = format!(
        "{}\t{}\t{}\t{}\t{}\t{}\n",
        time,
        actor,
        author.unwrap_or(""),
        deps.join(","),
        message.unwrap_or(""),
        ops_json,
    );
    let hash = blake3::hash(input.as_bytes());
    Ok(format!("blake3:{hash}"))
}

/// A request to append one local change to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    pub actor: String,
    pub author: Option<String>,
    pub time: i64,
    pub message: Option<String>,
    pub ops: Vec<Op>,
}

/// The current actor's stable identity, as supplied by the identity layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Device/session identifier recorded as the change actor.
    pub actor: String,
    /// Stable contact reference (e.g. `contact:alice`) recorded as author.
    pub contact: String,
}

impl Identity {
    #[must_use]
    pub fn new(actor: impl Into<String>, contact: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            contact: contact.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Cursors and anchors
// ---------------------------------------------------------------------------

/// Stable identity of a single inserted character.
///
/// A character is identified by the change that inserted it, the index of
/// the inserting op within that change, and the offset into that op's
/// inserted run. The identity never changes as the document mutates, which
/// is what makes cursors stable across concurrent edits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CharId {
    pub change: String,
    pub op: u32,
    pub offset: u32,
}

/// A stable position reference inside one text property.
///
/// Resolved to a live index only at render time; a `Char` cursor whose
/// character was deleted no longer resolves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cursor {
    /// Points at the character with the given identity.
    Char(CharId),
    /// Points past the last character.
    End,
}

/// A stable range reference: a property plus start/end cursors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorRange {
    pub prop: String,
    pub start: Cursor,
    pub end: Cursor,
}

// ---------------------------------------------------------------------------
// Views
// ---------------------------------------------------------------------------

/// One character of a materialized text property, with its stable identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChar {
    pub ch: char,
    pub id: CharId,
}

/// A materialized document view at some head-set.
///
/// Text properties keep per-character identities (for cursor resolution and
/// diff alignment); map properties are plain JSON values.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DocView {
    pub texts: BTreeMap<String, Vec<TextChar>>,
    pub values: BTreeMap<String, Value>,
}

impl DocView {
    /// The plain string content of a text property (empty if absent).
    #[must_use]
    pub fn text(&self, prop: &str) -> String {
        self.texts
            .get(prop)
            .map(|chars| chars.iter().map(|c| c.ch).collect())
            .unwrap_or_default()
    }

    /// Character length of a text property (0 if absent).
    #[must_use]
    pub fn text_len(&self, prop: &str) -> usize {
        self.texts.get(prop).map_or(0, Vec::len)
    }

    /// A map property's value, if set.
    #[must_use]
    pub fn value(&self, prop: &str) -> Option<&Value> {
        self.values.get(prop)
    }
}

/// A consistent in-memory snapshot of one document.
///
/// This is the unit every derivation in this crate runs against: the
/// decoded log, the current head-set, and the materialized view, captured
/// together so no derivation ever sees a torn state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocSnapshot {
    pub url: String,
    pub heads: Heads,
    pub log: Vec<Change>,
    pub view: DocView,
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// What a diff patch does to its property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchAction {
    /// Insert `text` at `index`.
    Splice { index: usize, text: String },
    /// Delete `removed` at `index`.
    Del { index: usize, removed: String },
    /// Set the property to `value`.
    Put { value: Value },
    /// Replace `removed` with `inserted` at `index`.
    ///
    /// Never produced by an engine diff; only by
    /// [`crate::diff::combine_patches`].
    Replace {
        index: usize,
        removed: String,
        inserted: String,
    },
}

/// One patch of a diff between two head-sets.
///
/// Patches are ordered: applying them sequentially to the view at the
/// diff's `from` heads reconstructs the view at its `to` heads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub prop: String,
    pub action: PatchAction,
    /// Hash of the change held responsible for this patch, when known.
    pub source: Option<String>,
}

// ---------------------------------------------------------------------------
// Engine interface
// ---------------------------------------------------------------------------

/// Errors from document-engine operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The document url is not known to this engine.
    #[error("document not found: {0}")]
    DocNotFound(String),
    /// A requested head hash is not present in the document's log.
    #[error("head not found in document history: {0}")]
    HeadNotFound(String),
    /// A change's operations failed to serialize for hashing.
    #[error("failed to encode change: {0}")]
    Encode(String),
}

/// Listener invoked with a fresh snapshot after every change to a document.
pub type DocListener = Box<dyn FnMut(&DocSnapshot)>;

/// Opaque id for one registered [`DocListener`].
pub type SubscriptionId = u64;

/// The narrow interface this subsystem consumes from the replication layer.
///
/// Implementations must guarantee: `merge_docs` is a commutative, idempotent
/// log union; `clone_doc` produces a full-history replica; and `diff(from,
/// to)` yields patches that transform the view at `from` into the view at
/// `to` when applied in order.
pub trait DocumentEngine {
    /// The document's current head-set.
    ///
    /// # Errors
    ///
    /// [`EngineError::DocNotFound`] for an unknown url.
    fn heads(&self, doc: &str) -> Result<Heads, EngineError>;

    /// Materialize the document as of the given head-set.
    ///
    /// # Errors
    ///
    /// [`EngineError::DocNotFound`] / [`EngineError::HeadNotFound`].
    fn view_at(&self, doc: &str, heads: &[String]) -> Result<DocView, EngineError>;

    /// Ordered patches transforming the view at `from` into the view at `to`.
    ///
    /// # Errors
    ///
    /// [`EngineError::DocNotFound`] / [`EngineError::HeadNotFound`].
    fn diff(&self, doc: &str, from: &[String], to: &[String]) -> Result<Vec<Patch>, EngineError>;

    /// A stable cursor for `prop` at `index`, as of `heads`.
    ///
    /// # Errors
    ///
    /// [`EngineError::DocNotFound`] / [`EngineError::HeadNotFound`].
    fn get_cursor(
        &self,
        doc: &str,
        prop: &str,
        index: usize,
        heads: &[String],
    ) -> Result<Cursor, EngineError>;

    /// Resolve a cursor to a live index as of `heads`; `None` if its
    /// character no longer exists there.
    ///
    /// # Errors
    ///
    /// [`EngineError::DocNotFound`] / [`EngineError::HeadNotFound`].
    fn resolve_cursor(
        &self,
        doc: &str,
        prop: &str,
        cursor: &Cursor,
        heads: &[String],
    ) -> Result<Option<usize>, EngineError>;

    /// The document's decoded change log.
    ///
    /// # Errors
    ///
    /// [`EngineError::DocNotFound`] for an unknown url.
    fn log(&self, doc: &str) -> Result<Vec<Change>, EngineError>;

    /// Append one local change; returns the new change's hash.
    ///
    /// # Errors
    ///
    /// [`EngineError::DocNotFound`] for an unknown url.
    fn apply(&mut self, doc: &str, req: ChangeRequest) -> Result<String, EngineError>;

    /// Clone the document into a new, independent full-history replica;
    /// returns the new document's url.
    ///
    /// # Errors
    ///
    /// [`EngineError::DocNotFound`] for an unknown url.
    fn clone_doc(&mut self, doc: &str) -> Result<String, EngineError>;

    /// Union-merge `source`'s log into `target` (commutative, idempotent).
    ///
    /// # Errors
    ///
    /// [`EngineError::DocNotFound`] if either url is unknown.
    fn merge_docs(&mut self, target: &str, source: &str) -> Result<(), EngineError>;

    /// Register a change listener; it fires after every change to `doc`.
    ///
    /// # Errors
    ///
    /// [`EngineError::DocNotFound`] for an unknown url.
    fn subscribe(&mut self, doc: &str, listener: DocListener) -> Result<SubscriptionId, EngineError>;

    /// Remove a previously registered listener. Unknown ids are ignored.
    fn unsubscribe(&mut self, doc: &str, id: SubscriptionId);

    /// The document's current view (at its current heads).
    ///
    /// # Errors
    ///
    /// [`EngineError::DocNotFound`] for an unknown url.
    fn view(&self, doc: &str) -> Result<DocView, EngineError> {
        let heads = self.heads(doc)?;
        self.view_at(doc, &heads)
    }

    /// A consistent snapshot: url, heads, log, and view captured together.
    ///
    /// # Errors
    ///
    /// [`EngineError::DocNotFound`] for an unknown url.
    fn snapshot(&self, doc: &str) -> Result<DocSnapshot, EngineError> {
        let heads = self.heads(doc)?;
        let view = self.view_at(doc, &heads)?;
        Ok(DocSnapshot {
            url: doc.to_string(),
            heads,
            log: self.log(doc)?,
            view,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
