//! Reference in-memory document engine.
//!
//! [`MemoryEngine`] is a document store keyed by url, where each document is
//! an append-only, content-addressed change log. It implements the full
//! [`DocumentEngine`] interface: materialized views at any head-set,
//! id-aligned diffs, stable cursors, full-history clones, and union merges.
//!
//! # Merge semantics
//!
//! A merge takes the union of both logs, deduplicates by change hash, and
//! re-sorts into the canonical `(time, actor, hash)` order — commutative
//! and idempotent, so re-merging an already-merged branch is a no-op.
//!
//! # Not a CRDT
//!
//! Views apply changes in deterministic topological order with index
//! clamping. Concurrent splices converge because every replica derives the
//! same order, not because operations are transformed. That is sufficient
//! for a reference collaborator; production deployments plug a real
//! replicated engine into the same trait.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tracing::debug;

use super::dag::ChangeDag;
use super::{
    Change, ChangeRequest, CharId, Cursor, DocListener, DocView, DocumentEngine, EngineError,
    Heads, Op, Patch, PatchAction, SubscriptionId, TextChar, compute_change_hash,
};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct DocState {
    log: Vec<Change>,
    hashes: HashSet<String>,
    heads: Heads,
    listeners: Vec<(SubscriptionId, DocListener)>,
}

impl DocState {
    fn empty() -> Self {
        Self {
            log: Vec::new(),
            hashes: HashSet::new(),
            heads: Vec::new(),
            listeners: Vec::new(),
        }
    }
}

/// In-memory reference implementation of [`DocumentEngine`].
#[derive(Default)]
pub struct MemoryEngine {
    docs: BTreeMap<String, DocState>,
    next_doc: u64,
    next_sub: SubscriptionId,
}

impl MemoryEngine {
    /// Create an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new, empty document and return its url.
    pub fn create_doc(&mut self) -> String {
        self.next_doc += 1;
        let hex = blake3::hash(&self.next_doc.to_le_bytes()).to_hex();
        let url = format!("doc:{}", &hex.as_str()[..12]);
        self.docs.insert(url.clone(), DocState::empty());
        url
    }

    /// Urls of all documents in the store, sorted.
    #[must_use]
    pub fn doc_urls(&self) -> Vec<String> {
        self.docs.keys().cloned().collect()
    }

    fn doc(&self, url: &str) -> Result<&DocState, EngineError> {
        self.docs
            .get(url)
            .ok_or_else(|| EngineError::DocNotFound(url.to_string()))
    }

    fn doc_mut(&mut self, url: &str) -> Result<&mut DocState, EngineError> {
        self.docs
            .get_mut(url)
            .ok_or_else(|| EngineError::DocNotFound(url.to_string()))
    }

    fn notify(&mut self, url: &str) {
        let Ok(snap) = self.snapshot(url) else {
            return;
        };
        let Some(state) = self.docs.get_mut(url) else {
            return;
        };
        let mut listeners = std::mem::take(&mut state.listeners);
        for (_, listener) in &mut listeners {
            listener(&snap);
        }
        if let Some(state) = self.docs.get_mut(url) {
            let added = std::mem::take(&mut state.listeners);
            state.listeners = listeners;
            state.listeners.extend(added);
        }
    }
}

// ---------------------------------------------------------------------------
// Materialization
// ---------------------------------------------------------------------------

fn validate_heads(dag: &ChangeDag, heads: &[String]) -> Result<(), EngineError> {
    for head in heads {
        if !dag.contains(head) {
            return Err(EngineError::HeadNotFound(head.clone()));
        }
    }
    Ok(())
}

/// Apply one change's ops to a view, optionally recording which change
/// deleted which character.
fn apply_change(
    view: &mut DocView,
    change: &Change,
    mut deleted_by: Option<&mut HashMap<CharId, String>>,
) {
    for (op_idx, op) in change.ops.iter().enumerate() {
        match op {
            Op::Splice {
                prop,
                index,
                delete,
                insert,
            } => {
                let chars = view.texts.entry(prop.clone()).or_default();
                let idx = (*index).min(chars.len());
                let del = (*delete).min(chars.len() - idx);
                let removed: Vec<TextChar> = chars.drain(idx..idx + del).collect();
                if let Some(map) = deleted_by.as_deref_mut() {
                    for tc in &removed {
                        map.insert(tc.id.clone(), change.hash.clone());
                    }
                }
                let inserted: Vec<TextChar> = insert
                    .chars()
                    .enumerate()
                    .map(|(k, ch)| TextChar {
                        ch,
                        id: CharId {
                            change: change.hash.clone(),
                            op: u32::try_from(op_idx).unwrap_or(u32::MAX),
                            offset: u32::try_from(k).unwrap_or(u32::MAX),
                        },
                    })
                    .collect();
                chars.splice(idx..idx, inserted);
            }
            Op::Put { prop, value } => {
                view.values.insert(prop.clone(), value.clone());
            }
        }
    }
}

fn materialize(dag: &ChangeDag, subset: &HashSet<String>) -> DocView {
    let mut view = DocView::default();
    for change in dag.topo_order_of(subset) {
        apply_change(&mut view, change, None);
    }
    view
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

fn del_source(tc: &TextChar, deleted_by: &HashMap<CharId, String>) -> String {
    deleted_by
        .get(&tc.id)
        .cloned()
        .unwrap_or_else(|| tc.id.change.clone())
}

/// Longest-common-subsequence match pairs between two views of one text
/// property, matching characters by identity.
///
/// Index-based splices applied over different change subsets can leave two
/// views with common characters in *different* relative order, so a plain
/// two-pointer walk is not safe; an LCS alignment is, because a displaced
/// character simply degrades to a delete on one side and an insert on the
/// other. Views are small enough that the quadratic table is a non-issue.
fn lcs_matches(a: &[TextChar], b: &[TextChar]) -> Vec<(usize, usize)> {
    let n = a.len();
    let m = b.len();
    if n == 0 || m == 0 {
        return Vec::new();
    }
    let mut dp = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            dp[i][j] = if a[i].id == b[j].id {
                dp[i + 1][j + 1] + 1
            } else {
                dp[i + 1][j].max(dp[i][j + 1])
            };
        }
    }
    let mut matches = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i].id == b[j].id {
            matches.push((i, j));
            i += 1;
            j += 1;
        } else if dp[i + 1][j] >= dp[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    matches
}

/// Emit one deletion segment as `Del` patches, splitting runs whenever the
/// responsible change differs, so per-patch attribution stays exact.
fn emit_deletes(
    prop: &str,
    segment: &[TextChar],
    pos: usize,
    deleted_by: &HashMap<CharId, String>,
    patches: &mut Vec<Patch>,
) {
    let mut k = 0;
    while k < segment.len() {
        let source = del_source(&segment[k], deleted_by);
        let mut removed = String::new();
        while k < segment.len() && del_source(&segment[k], deleted_by) == source {
            removed.push(segment[k].ch);
            k += 1;
        }
        patches.push(Patch {
            prop: prop.to_string(),
            action: PatchAction::Del {
                index: pos,
                removed,
            },
            source: Some(source),
        });
    }
}

/// Emit one insertion segment as `Splice` patches, splitting runs by the
/// inserting change. Returns how far the running position advanced.
fn emit_inserts(prop: &str, segment: &[TextChar], pos: usize, patches: &mut Vec<Patch>) -> usize {
    let mut advanced = 0;
    let mut k = 0;
    while k < segment.len() {
        let source = segment[k].id.change.clone();
        let mut text = String::new();
        while k < segment.len() && segment[k].id.change == source {
            text.push(segment[k].ch);
            k += 1;
        }
        advanced += text.chars().count();
        patches.push(Patch {
            prop: prop.to_string(),
            action: PatchAction::Splice {
                index: pos + advanced - text.chars().count(),
                text,
            },
            source: Some(source),
        });
    }
    advanced
}

/// Diff one text property by aligning character identities; deletions are
/// emitted before insertions at the same point.
fn diff_text_prop(
    prop: &str,
    a: &[TextChar],
    b: &[TextChar],
    deleted_by: &HashMap<CharId, String>,
    patches: &mut Vec<Patch>,
) {
    let matches = lcs_matches(a, b);
    let mut pos = 0;
    let mut ai = 0;
    let mut bi = 0;
    for (mi, mj) in matches.into_iter().chain(std::iter::once((a.len(), b.len()))) {
        emit_deletes(prop, &a[ai..mi], pos, deleted_by, patches);
        pos += emit_inserts(prop, &b[bi..mj], pos, patches);
        ai = mi + 1;
        bi = mj + 1;
        pos += 1;
    }
}

/// Apply a diff's text patches for one property to a plain string.
///
/// The reconstruction half of the diff contract: applying the patches from
/// `diff(doc, from, to)` to the text at `from` yields the text at `to`.
/// Non-text patches and patches for other properties are ignored.
#[must_use]
pub fn apply_text_patches(text: &str, prop: &str, patches: &[Patch]) -> String {
    let mut chars: Vec<char> = text.chars().collect();
    for patch in patches {
        if patch.prop != prop {
            continue;
        }
        match &patch.action {
            PatchAction::Splice { index, text } => {
                let idx = (*index).min(chars.len());
                chars.splice(idx..idx, text.chars());
            }
            PatchAction::Del { index, removed } => {
                let idx = (*index).min(chars.len());
                let len = removed.chars().count().min(chars.len() - idx);
                chars.drain(idx..idx + len);
            }
            PatchAction::Replace {
                index,
                removed,
                inserted,
            } => {
                let idx = (*index).min(chars.len());
                let len = removed.chars().count().min(chars.len() - idx);
                chars.splice(idx..idx + len, inserted.chars());
            }
            PatchAction::Put { .. } => {}
        }
    }
    chars.into_iter().collect()
}

// ---------------------------------------------------------------------------
// DocumentEngine impl
// ---------------------------------------------------------------------------

impl DocumentEngine for MemoryEngine {
    fn heads(&self, doc: &str) -> Result<Heads, EngineError> {
        Ok(self.doc(doc)?.heads.clone())
    }

    fn view_at(&self, doc: &str, heads: &[String]) -> Result<DocView, EngineError> {
        let state = self.doc(doc)?;
        let dag = ChangeDag::from_changes(&state.log);
        validate_heads(&dag, heads)?;
        Ok(materialize(&dag, &dag.reachable(heads)))
    }

    fn diff(&self, doc: &str, from: &[String], to: &[String]) -> Result<Vec<Patch>, EngineError> {
        let state = self.doc(doc)?;
        let dag = ChangeDag::from_changes(&state.log);
        validate_heads(&dag, from)?;
        validate_heads(&dag, to)?;

        let set_a = dag.reachable(from);
        let set_b = dag.reachable(to);
        let view_a = materialize(&dag, &set_a);
        let view_b = materialize(&dag, &set_b);

        // Replay the changes present only on the `to` side over the `from`
        // view to learn which change deleted which character.
        let new_set: HashSet<String> = set_b.difference(&set_a).cloned().collect();
        let mut deleted_by: HashMap<CharId, String> = HashMap::new();
        let mut replay = view_a.clone();
        for change in dag.topo_order_of(&new_set) {
            apply_change(&mut replay, change, Some(&mut deleted_by));
        }

        let mut patches = Vec::new();
        let empty: Vec<TextChar> = Vec::new();
        let text_props: BTreeSet<&String> =
            view_a.texts.keys().chain(view_b.texts.keys()).collect();
        for prop in text_props {
            let a = view_a.texts.get(prop).unwrap_or(&empty);
            let b = view_b.texts.get(prop).unwrap_or(&empty);
            diff_text_prop(prop, a, b, &deleted_by, &mut patches);
        }

        let value_props: BTreeSet<&String> =
            view_a.values.keys().chain(view_b.values.keys()).collect();
        for prop in value_props {
            if view_a.values.get(prop) == view_b.values.get(prop) {
                continue;
            }
            let Some(value) = view_b.values.get(prop) else {
                // The property does not exist yet at `to`; there is no
                // unset patch shape, so the difference is not expressible.
                continue;
            };
            let source = dag
                .topo_order_of(&new_set)
                .iter()
                .rev()
                .find(|c| {
                    c.ops
                        .iter()
                        .any(|op| matches!(op, Op::Put { prop: p, .. } if p == prop))
                })
                .map(|c| c.hash.clone());
            patches.push(Patch {
                prop: prop.clone(),
                action: PatchAction::Put {
                    value: value.clone(),
                },
                source,
            });
        }
        Ok(patches)
    }

    fn get_cursor(
        &self,
        doc: &str,
        prop: &str,
        index: usize,
        heads: &[String],
    ) -> Result<Cursor, EngineError> {
        let view = self.view_at(doc, heads)?;
        Ok(view.texts.get(prop).and_then(|chars| chars.get(index)).map_or(
            Cursor::End,
            |tc| Cursor::Char(tc.id.clone()),
        ))
    }

    fn resolve_cursor(
        &self,
        doc: &str,
        prop: &str,
        cursor: &Cursor,
        heads: &[String],
    ) -> Result<Option<usize>, EngineError> {
        let view = self.view_at(doc, heads)?;
        let len = view.text_len(prop);
        Ok(match cursor {
            Cursor::End => Some(len),
            Cursor::Char(id) => view
                .texts
                .get(prop)
                .and_then(|chars| chars.iter().position(|c| c.id == *id)),
        })
    }

    fn log(&self, doc: &str) -> Result<Vec<Change>, EngineError> {
        Ok(self.doc(doc)?.log.clone())
    }

    fn apply(&mut self, doc: &str, req: ChangeRequest) -> Result<String, EngineError> {
        let state = self.doc_mut(doc)?;
        let deps = state.heads.clone();
        let hash = compute_change_hash(
            req.time,
            &req.actor,
            req.author.as_deref(),
            &deps,
            req.message.as_deref(),
            &req.ops,
        )
        .map_err(|e| EngineError::Encode(e.to_string()))?;
        if state.hashes.insert(hash.clone()) {
            state.log.push(Change {
                hash: hash.clone(),
                actor: req.actor,
                author: req.author,
                deps,
                time: req.time,
                message: req.message,
                ops: req.ops,
            });
            state.heads = vec![hash.clone()];
        }
        self.notify(doc);
        Ok(hash)
    }

    fn clone_doc(&mut self, doc: &str) -> Result<String, EngineError> {
        let state = self.doc(doc)?;
        let log = state.log.clone();
        let hashes = state.hashes.clone();
        let heads = state.heads.clone();
        let url = self.create_doc();
        if let Some(new_state) = self.docs.get_mut(&url) {
            new_state.log = log;
            new_state.hashes = hashes;
            new_state.heads = heads;
        }
        Ok(url)
    }

    fn merge_docs(&mut self, target: &str, source: &str) -> Result<(), EngineError> {
        let incoming: Vec<Change> = {
            let src = self.doc(source)?;
            let tgt = self.doc(target)?;
            src.log
                .iter()
                .filter(|c| !tgt.hashes.contains(&c.hash))
                .cloned()
                .collect()
        };
        let state = self.doc_mut(target)?;
        if incoming.is_empty() {
            debug!(target, source, "merge: no new changes");
            return Ok(());
        }
        let added = incoming.len();
        for change in incoming {
            state.hashes.insert(change.hash.clone());
            state.log.push(change);
        }
        // Canonical log order: deterministic regardless of merge direction.
        state
            .log
            .sort_by(|x, y| {
                (x.time, &x.actor, &x.hash).cmp(&(y.time, &y.actor, &y.hash))
            });
        let dag = ChangeDag::from_changes(&state.log);
        state.heads = dag.frontier();
        debug!(target, source, added, "merge: union complete");
        self.notify(target);
        Ok(())
    }

    fn subscribe(
        &mut self,
        doc: &str,
        listener: DocListener,
    ) -> Result<SubscriptionId, EngineError> {
        self.next_sub += 1;
        let id = self.next_sub;
        self.doc_mut(doc)?.listeners.push((id, listener));
        Ok(id)
    }

    fn unsubscribe(&mut self, doc: &str, id: SubscriptionId) {
        if let Some(state) = self.docs.get_mut(doc) {
            state.listeners.retain(|(sub, _)| *sub != id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    // -------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------

    fn splice_req(actor: &str, time: i64, index: usize, delete: usize, insert: &str) -> ChangeRequest {
        ChangeRequest {
            actor: actor.into(),
            author: Some(format!("contact:{actor}")),
            time,
            message: None,
            ops: vec![Op::Splice {
                prop: "content".into(),
                index,
                delete,
                insert: insert.into(),
            }],
        }
    }

    fn new_doc_with(engine: &mut MemoryEngine, text: &str) -> String {
        let url = engine.create_doc();
        engine
            .apply(&url, splice_req("alice", 1_000, 0, 0, text))
            .expect("apply");
        url
    }

    // -------------------------------------------------------------------
    // Basic store operations
    // -------------------------------------------------------------------

    #[test]
    fn unknown_doc_errors() {
        let engine = MemoryEngine::new();
        assert!(matches!(
            engine.heads("doc:nope"),
            Err(EngineError::DocNotFound(_))
        ));
    }

    #[test]
    fn apply_advances_heads() {
        let mut engine = MemoryEngine::new();
        let url = engine.create_doc();
        assert!(engine.heads(&url).expect("heads").is_empty());

        let h1 = engine
            .apply(&url, splice_req("alice", 1_000, 0, 0, "Hello"))
            .expect("apply");
        assert_eq!(engine.heads(&url).expect("heads"), vec![h1.clone()]);

        let h2 = engine
            .apply(&url, splice_req("alice", 2_000, 5, 0, " world"))
            .expect("apply");
        assert_eq!(engine.heads(&url).expect("heads"), vec![h2.clone()]);

        let log = engine.log(&url).expect("log");
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].deps, vec![h1]);
        assert_eq!(engine.view(&url).expect("view").text("content"), "Hello world");
    }

    #[test]
    fn view_at_older_heads() {
        let mut engine = MemoryEngine::new();
        let url = engine.create_doc();
        let h1 = engine
            .apply(&url, splice_req("alice", 1_000, 0, 0, "Hello"))
            .expect("apply");
        engine
            .apply(&url, splice_req("alice", 2_000, 5, 0, " world"))
            .expect("apply");

        let old = engine.view_at(&url, &[h1]).expect("view");
        assert_eq!(old.text("content"), "Hello");
    }

    #[test]
    fn view_at_unknown_head_errors() {
        let mut engine = MemoryEngine::new();
        let url = new_doc_with(&mut engine, "x");
        assert!(matches!(
            engine.view_at(&url, &["blake3:missing".to_string()]),
            Err(EngineError::HeadNotFound(_))
        ));
    }

    // -------------------------------------------------------------------
    // Clone + merge
    // -------------------------------------------------------------------

    #[test]
    fn clone_is_independent_full_history() {
        let mut engine = MemoryEngine::new();
        let url = new_doc_with(&mut engine, "Hello");
        let clone = engine.clone_doc(&url).expect("clone");

        assert_eq!(engine.log(&clone).expect("log").len(), 1);
        assert_eq!(engine.view(&clone).expect("view").text("content"), "Hello");

        engine
            .apply(&clone, splice_req("bob", 2_000, 5, 0, "!"))
            .expect("apply");
        assert_eq!(engine.view(&clone).expect("view").text("content"), "Hello!");
        assert_eq!(engine.view(&url).expect("view").text("content"), "Hello");
    }

    #[test]
    fn merge_is_idempotent() {
        let mut engine = MemoryEngine::new();
        let url = new_doc_with(&mut engine, "Hello");
        let clone = engine.clone_doc(&url).expect("clone");
        engine
            .apply(&clone, splice_req("bob", 2_000, 5, 0, "!"))
            .expect("apply");

        engine.merge_docs(&url, &clone).expect("merge");
        let text = engine.view(&url).expect("view").text("content");
        let log_len = engine.log(&url).expect("log").len();

        engine.merge_docs(&url, &clone).expect("re-merge");
        assert_eq!(engine.view(&url).expect("view").text("content"), text);
        assert_eq!(engine.log(&url).expect("log").len(), log_len);
    }

    #[test]
    fn merge_is_commutative() {
        let mut engine = MemoryEngine::new();
        let base = new_doc_with(&mut engine, "base ");
        let left = engine.clone_doc(&base).expect("clone");
        let right = engine.clone_doc(&base).expect("clone");
        engine
            .apply(&left, splice_req("bob", 2_000, 5, 0, "left"))
            .expect("apply");
        engine
            .apply(&right, splice_req("carol", 2_100, 5, 0, "right"))
            .expect("apply");

        let ab = engine.clone_doc(&base).expect("clone");
        engine.merge_docs(&ab, &left).expect("merge");
        engine.merge_docs(&ab, &right).expect("merge");

        let ba = engine.clone_doc(&base).expect("clone");
        engine.merge_docs(&ba, &right).expect("merge");
        engine.merge_docs(&ba, &left).expect("merge");

        assert_eq!(
            engine.view(&ab).expect("view").text("content"),
            engine.view(&ba).expect("view").text("content")
        );
        let log_ab: Vec<String> = engine.log(&ab).expect("log").iter().map(|c| c.hash.clone()).collect();
        let log_ba: Vec<String> = engine.log(&ba).expect("log").iter().map(|c| c.hash.clone()).collect();
        assert_eq!(log_ab, log_ba, "canonical log order must not depend on merge direction");
    }

    #[test]
    fn concurrent_edits_leave_two_heads() {
        let mut engine = MemoryEngine::new();
        let base = new_doc_with(&mut engine, "base");
        let other = engine.clone_doc(&base).expect("clone");
        engine
            .apply(&base, splice_req("alice", 2_000, 4, 0, " a"))
            .expect("apply");
        engine
            .apply(&other, splice_req("bob", 2_100, 4, 0, " b"))
            .expect("apply");
        engine.merge_docs(&base, &other).expect("merge");
        assert_eq!(engine.heads(&base).expect("heads").len(), 2);
    }

    // -------------------------------------------------------------------
    // Diff
    // -------------------------------------------------------------------

    #[test]
    fn diff_simple_insert() {
        let mut engine = MemoryEngine::new();
        let url = engine.create_doc();
        let h1 = engine
            .apply(&url, splice_req("alice", 1_000, 0, 0, "Hello"))
            .expect("apply");
        let h2 = engine
            .apply(&url, splice_req("bob", 2_000, 5, 0, " world"))
            .expect("apply");

        let patches = engine.diff(&url, &[h1], &[h2.clone()]).expect("diff");
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].prop, "content");
        assert_eq!(patches[0].source, Some(h2));
        assert_eq!(
            patches[0].action,
            PatchAction::Splice {
                index: 5,
                text: " world".into()
            }
        );
    }

    #[test]
    fn diff_delete_then_insert_at_same_point() {
        // "Hello world" → delete "world", insert "there".
        let mut engine = MemoryEngine::new();
        let url = engine.create_doc();
        let h1 = engine
            .apply(&url, splice_req("alice", 1_000, 0, 0, "Hello world"))
            .expect("apply");
        let h2 = engine
            .apply(
                &url,
                ChangeRequest {
                    actor: "xavier".into(),
                    author: Some("contact:xavier".into()),
                    time: 2_000,
                    message: None,
                    ops: vec![
                        Op::Splice {
                            prop: "content".into(),
                            index: 6,
                            delete: 5,
                            insert: String::new(),
                        },
                        Op::Splice {
                            prop: "content".into(),
                            index: 6,
                            delete: 0,
                            insert: "there".into(),
                        },
                    ],
                },
            )
            .expect("apply");

        let patches = engine.diff(&url, &[h1], &[h2.clone()]).expect("diff");
        assert_eq!(patches.len(), 2);
        assert_eq!(
            patches[0].action,
            PatchAction::Del {
                index: 6,
                removed: "world".into()
            }
        );
        assert_eq!(patches[0].source, Some(h2.clone()));
        assert_eq!(
            patches[1].action,
            PatchAction::Splice {
                index: 6,
                text: "there".into()
            }
        );
        assert_eq!(patches[1].source, Some(h2));
    }

    #[test]
    fn diff_reconstructs_target_view() {
        let mut engine = MemoryEngine::new();
        let url = engine.create_doc();
        let h1 = engine
            .apply(&url, splice_req("alice", 1_000, 0, 0, "The quick fox"))
            .expect("apply");
        engine
            .apply(&url, splice_req("bob", 2_000, 4, 5, "slow brown"))
            .expect("apply");
        let h3 = engine
            .apply(&url, splice_req("alice", 3_000, 0, 3, "A"))
            .expect("apply");

        let from = vec![h1];
        let to = vec![h3];
        let before = engine.view_at(&url, &from).expect("view").text("content");
        let after = engine.view_at(&url, &to).expect("view").text("content");
        let patches = engine.diff(&url, &from, &to).expect("diff");
        assert_eq!(apply_text_patches(&before, "content", &patches), after);
    }

    #[test]
    fn diff_backwards_emits_inverse_edits() {
        let mut engine = MemoryEngine::new();
        let url = engine.create_doc();
        let h1 = engine
            .apply(&url, splice_req("alice", 1_000, 0, 0, "Hello"))
            .expect("apply");
        let h2 = engine
            .apply(&url, splice_req("bob", 2_000, 5, 0, " world"))
            .expect("apply");

        let before = engine.view_at(&url, &[h2.clone()]).expect("view").text("content");
        let after = engine.view_at(&url, &[h1.clone()]).expect("view").text("content");
        let patches = engine.diff(&url, &[h2], &[h1]).expect("diff");
        assert_eq!(apply_text_patches(&before, "content", &patches), after);
    }

    #[test]
    fn diff_put_patch_carries_source() {
        let mut engine = MemoryEngine::new();
        let url = engine.create_doc();
        let h1 = engine
            .apply(&url, splice_req("alice", 1_000, 0, 0, "x"))
            .expect("apply");
        let h2 = engine
            .apply(
                &url,
                ChangeRequest {
                    actor: "bob".into(),
                    author: None,
                    time: 2_000,
                    message: None,
                    ops: vec![Op::Put {
                        prop: "title".into(),
                        value: serde_json::json!("Essay"),
                    }],
                },
            )
            .expect("apply");

        let patches = engine.diff(&url, &[h1], &[h2.clone()]).expect("diff");
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].prop, "title");
        assert_eq!(patches[0].source, Some(h2));
    }

    // -------------------------------------------------------------------
    // Cursors
    // -------------------------------------------------------------------

    #[test]
    fn cursor_survives_prefix_insert() {
        let mut engine = MemoryEngine::new();
        let url = new_doc_with(&mut engine, "world");
        let heads = engine.heads(&url).expect("heads");
        let cursor = engine.get_cursor(&url, "content", 0, &heads).expect("cursor");

        engine
            .apply(&url, splice_req("bob", 2_000, 0, 0, "Hello "))
            .expect("apply");
        let now = engine.heads(&url).expect("heads");
        assert_eq!(
            engine
                .resolve_cursor(&url, "content", &cursor, &now)
                .expect("resolve"),
            Some(6)
        );
    }

    #[test]
    fn cursor_to_deleted_char_does_not_resolve() {
        let mut engine = MemoryEngine::new();
        let url = new_doc_with(&mut engine, "Hello world");
        let heads = engine.heads(&url).expect("heads");
        let cursor = engine.get_cursor(&url, "content", 6, &heads).expect("cursor");

        engine
            .apply(&url, splice_req("bob", 2_000, 6, 5, ""))
            .expect("apply");
        let now = engine.heads(&url).expect("heads");
        assert_eq!(
            engine
                .resolve_cursor(&url, "content", &cursor, &now)
                .expect("resolve"),
            None
        );
    }

    #[test]
    fn end_cursor_tracks_length() {
        let mut engine = MemoryEngine::new();
        let url = new_doc_with(&mut engine, "ab");
        let heads = engine.heads(&url).expect("heads");
        let cursor = engine.get_cursor(&url, "content", 2, &heads).expect("cursor");
        assert_eq!(cursor, Cursor::End);

        engine
            .apply(&url, splice_req("bob", 2_000, 2, 0, "c"))
            .expect("apply");
        let now = engine.heads(&url).expect("heads");
        assert_eq!(
            engine
                .resolve_cursor(&url, "content", &cursor, &now)
                .expect("resolve"),
            Some(3)
        );
    }

    // -------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------

    #[test]
    fn listeners_fire_and_unsubscribe() {
        let mut engine = MemoryEngine::new();
        let url = engine.create_doc();
        let seen: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let sub = engine
            .subscribe(
                &url,
                Box::new(move |snap| sink.borrow_mut().push(snap.view.text("content"))),
            )
            .expect("subscribe");

        engine
            .apply(&url, splice_req("alice", 1_000, 0, 0, "a"))
            .expect("apply");
        engine
            .apply(&url, splice_req("alice", 2_000, 1, 0, "b"))
            .expect("apply");
        assert_eq!(seen.borrow().as_slice(), ["a".to_string(), "ab".to_string()]);

        engine.unsubscribe(&url, sub);
        engine
            .apply(&url, splice_req("alice", 3_000, 2, 0, "c"))
            .expect("apply");
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn merge_notifies_target_listeners() {
        let mut engine = MemoryEngine::new();
        let url = new_doc_with(&mut engine, "x");
        let clone = engine.clone_doc(&url).expect("clone");
        engine
            .apply(&clone, splice_req("bob", 2_000, 1, 0, "y"))
            .expect("apply");

        let fired = Rc::new(RefCell::new(0usize));
        let sink = Rc::clone(&fired);
        engine
            .subscribe(&url, Box::new(move |_| *sink.borrow_mut() += 1))
            .expect("subscribe");
        engine.merge_docs(&url, &clone).expect("merge");
        assert_eq!(*fired.borrow(), 1);
    }
}
