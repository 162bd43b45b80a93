//! Live change timeline: the document's log grouped into human-meaningful
//! items.
//!
//! The timeline is fully derived state: [`build_timeline`] is a pure
//! function of one [`DocSnapshot`], and [`TimelineFeed`] re-derives it in
//! full on every engine change event (memoized by head-set) and broadcasts
//! to its subscribers. Nothing here is incrementally patched; given
//! practically bounded log lengths, recomputing from the log is cheaper to
//! get right than cache invalidation.
//!
//! Grouping is pluggable via [`GroupingPolicy`]; the default bundles
//! consecutive changes that share one author within a configurable time
//! window. Branch origins, merges, tags, and discussions interleave at the
//! topological position of their head-sets.

use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use tracing::debug;

use crate::caps::DocCapabilities;
use crate::diff::{AttributedPatch, diff_with_provenance};
use crate::engine::dag::ChangeDag;
use crate::engine::{
    Change, DocSnapshot, DocumentEngine, EngineError, Heads, normalize_heads, same_heads,
};
use crate::meta::{
    Branch, Discussion, SourcePointer, Tag, read_branch_metadata, read_discussions,
    read_summaries, read_tags,
};

// ---------------------------------------------------------------------------
// Change groups
// ---------------------------------------------------------------------------

/// A contiguous run of raw changes bundled as one displayable edit event.
///
/// The id is the first constituent change's hash, so it stays stable while
/// the group grows at its tail — which is what lets summaries cached per
/// id survive later edits to the group. The diff and fallback summary are
/// computed lazily on first access.
#[derive(Debug, Clone)]
pub struct ChangeGroup {
    /// Hash of the group's first change.
    pub id: String,
    /// Url of the document this group belongs to.
    pub doc: String,
    /// The raw changes, in timeline order.
    pub changes: Vec<Change>,
    /// Distinct authors, first-seen order (contact ref, or actor id when
    /// no contact is known).
    pub author_urls: Vec<String>,
    /// Head-set just before the group's first change.
    pub from_heads: Heads,
    /// Head-set just after the group's last change.
    pub heads: Heads,
    diff: OnceCell<Vec<AttributedPatch>>,
    fallback: OnceCell<String>,
}

impl PartialEq for ChangeGroup {
    fn eq(&self, other: &Self) -> bool {
        // Lazy caches are excluded: two groups are the same group when
        // their identity and contents match.
        self.id == other.id
            && self.doc == other.doc
            && self.changes == other.changes
            && self.from_heads == other.from_heads
            && self.heads == other.heads
    }
}

impl ChangeGroup {
    /// Wall-clock time of the group's earliest change (µs).
    #[must_use]
    pub fn earliest_time(&self) -> i64 {
        self.changes.first().map_or(0, |c| c.time)
    }

    /// The group's attributed diff, computed on first access and cached.
    ///
    /// # Errors
    ///
    /// Engine errors only.
    pub fn diff<E: DocumentEngine>(
        &self,
        engine: &E,
    ) -> Result<Vec<AttributedPatch>, EngineError> {
        if let Some(diff) = self.diff.get() {
            return Ok(diff.clone());
        }
        let diff = diff_with_provenance(engine, &self.doc, &self.from_heads, &self.heads)?;
        let _ = self.diff.set(diff.clone());
        Ok(diff)
    }

    /// The group's fallback summary, derived from its diff on first access.
    ///
    /// # Errors
    ///
    /// Engine errors only.
    pub fn fallback_summary<E: DocumentEngine>(
        &self,
        engine: &E,
        caps: &DocCapabilities,
    ) -> Result<String, EngineError> {
        if let Some(summary) = self.fallback.get() {
            return Ok(summary.clone());
        }
        let summary = (caps.fallback_summary)(&self.diff(engine)?);
        let _ = self.fallback.set(summary.clone());
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Timeline items
// ---------------------------------------------------------------------------

/// One entry of the derived timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineItem {
    ChangeGroup(ChangeGroup),
    Tag(Tag),
    /// A branch was forked off this document.
    BranchCreatedFromThisDoc(Branch),
    /// This document is itself a branch; marks its fork point.
    OriginOfThisBranch(SourcePointer),
    /// A branch was merged back into this document.
    OtherBranchMergedIntoThisDoc(Branch),
    DiscussionThread(Discussion),
}

// ---------------------------------------------------------------------------
// Grouping policy
// ---------------------------------------------------------------------------

/// Decides whether the next change extends the open group.
pub trait GroupingPolicy {
    /// `group` is never empty.
    fn should_extend(&self, group: &[Change], next: &Change) -> bool;
}

/// Default policy: one author per group, and the next change must land
/// within `max_gap_us` of the previous change in the group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorWindowPolicy {
    pub max_gap_us: i64,
}

impl Default for AuthorWindowPolicy {
    fn default() -> Self {
        Self {
            max_gap_us: crate::config::TimelineConfig::default().group_gap_us,
        }
    }
}

fn author_key(change: &Change) -> &str {
    change.author.as_deref().unwrap_or(&change.actor)
}

impl GroupingPolicy for AuthorWindowPolicy {
    fn should_extend(&self, group: &[Change], next: &Change) -> bool {
        let Some(last) = group.last() else {
            return false;
        };
        author_key(last) == author_key(next) && next.time - last.time <= self.max_gap_us
    }
}

// ---------------------------------------------------------------------------
// Timeline derivation
// ---------------------------------------------------------------------------

/// Sort rank within one topological position: groups first, then events.
const RANK_GROUP: u8 = 0;
const RANK_EVENT: u8 = 1;

/// Topological position of a head-set: just after the latest of its known
/// hashes. Events whose heads are all unknown sort to the end (metadata
/// can outrun log propagation).
fn position_of(heads: &[String], index_of: &HashMap<&str, usize>, what: &str) -> usize {
    let position = heads
        .iter()
        .filter_map(|h| index_of.get(h.as_str()))
        .max()
        .copied();
    position.unwrap_or_else(|| {
        debug!(what, ?heads, "timeline item heads not in log yet; placing at end");
        usize::MAX
    })
}

/// Derive the full timeline from one document snapshot.
///
/// Items are ordered chronologically by each item's earliest constituent
/// change; branch origin/merge items, tags, and discussions are
/// interleaved at the position matching their head-set's topological place
/// in this document's history.
#[must_use]
pub fn build_timeline(
    snapshot: &DocSnapshot,
    caps: &DocCapabilities,
    policy: &dyn GroupingPolicy,
) -> Vec<TimelineItem> {
    let dag = ChangeDag::from_changes(&snapshot.log);
    let ordered = dag.topo_order();
    let index_of: HashMap<&str, usize> = ordered
        .iter()
        .enumerate()
        .map(|(i, c)| (c.hash.as_str(), i))
        .collect();

    // Head-set after each position in the full order.
    let mut tips: Vec<String> = Vec::new();
    let mut heads_after: Vec<Heads> = Vec::with_capacity(ordered.len());
    for change in &ordered {
        tips.retain(|t| !change.deps.contains(t));
        tips.push(change.hash.clone());
        heads_after.push(normalize_heads(tips.clone()));
    }
    let heads_before = |i: usize| -> Heads {
        if i == 0 {
            Vec::new()
        } else {
            heads_after[i - 1].clone()
        }
    };

    // (position, rank, time) sort keys; the sort is stable, so insertion
    // order breaks remaining ties.
    let mut keyed: Vec<((usize, u8, i64), TimelineItem)> = Vec::new();

    // Change groups over the filtered log.
    let mut open: Option<(usize, usize, Vec<Change>)> = None;
    let flush = |open: &mut Option<(usize, usize, Vec<Change>)>,
                     keyed: &mut Vec<((usize, u8, i64), TimelineItem)>| {
        if let Some((start, last, changes)) = open.take() {
            let mut author_urls: Vec<String> = Vec::new();
            for change in &changes {
                let author = author_key(change).to_string();
                if !author_urls.contains(&author) {
                    author_urls.push(author);
                }
            }
            let group = ChangeGroup {
                id: changes[0].hash.clone(),
                doc: snapshot.url.clone(),
                author_urls,
                from_heads: heads_before(start),
                heads: heads_after[last].clone(),
                changes,
                diff: OnceCell::new(),
                fallback: OnceCell::new(),
            };
            let time = group.earliest_time();
            keyed.push(((start, RANK_GROUP, time), TimelineItem::ChangeGroup(group)));
        }
    };
    for (i, change) in ordered.iter().enumerate() {
        if !(caps.change_filter)(change) {
            continue;
        }
        let extended = match &mut open {
            Some((_, last, changes)) if policy.should_extend(changes, change) => {
                changes.push((*change).clone());
                *last = i;
                true
            }
            _ => false,
        };
        if !extended {
            flush(&mut open, &mut keyed);
            open = Some((i, i, vec![(*change).clone()]));
        }
    }
    flush(&mut open, &mut keyed);

    // Branch events.
    let meta = read_branch_metadata(&snapshot.view);
    if let Some(source) = meta.source {
        // Merging a branch back unions the branch's own back-pointer into
        // the target; an origin marker pointing at this document itself is
        // meaningless and skipped.
        if source.url == snapshot.url {
            debug!(doc = %snapshot.url, "ignoring self-referential branch source");
        } else {
            let pos = position_of(&source.branch_heads, &index_of, "origin");
            keyed.push(((pos, RANK_EVENT, 0), TimelineItem::OriginOfThisBranch(source)));
        }
    }
    for branch in meta.branches {
        let pos = position_of(&branch.branch_heads, &index_of, "branch-created");
        let created = branch.created_at.timestamp_micros();
        keyed.push((
            (pos, RANK_EVENT, created),
            TimelineItem::BranchCreatedFromThisDoc(branch.clone()),
        ));
        if let Some(merge) = branch.merge_metadata.clone() {
            let pos = position_of(&merge.merge_heads, &index_of, "branch-merged");
            let merged_at = merge.merged_at.timestamp_micros();
            keyed.push((
                (pos, RANK_EVENT, merged_at),
                TimelineItem::OtherBranchMergedIntoThisDoc(branch),
            ));
        }
    }

    // Tags and discussions.
    for tag in read_tags(&snapshot.view) {
        let pos = position_of(&tag.heads, &index_of, "tag");
        keyed.push(((pos, RANK_EVENT, tag.timestamp.timestamp_micros()), TimelineItem::Tag(tag)));
    }
    for discussion in read_discussions(&snapshot.view) {
        let pos = position_of(&discussion.heads, &index_of, "discussion");
        let time = discussion
            .comments
            .first()
            .map_or(0, |c| c.timestamp.timestamp_micros());
        keyed.push(((pos, RANK_EVENT, time), TimelineItem::DiscussionThread(discussion)));
    }

    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, item)| item).collect()
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// An externally supplied text summarizer (e.g. an LLM service).
///
/// The call is synchronous; the host decides where it runs. Absence means
/// fallback summaries are always used.
pub trait Summarizer {
    /// Produce a one-line summary for the given prompt.
    ///
    /// # Errors
    ///
    /// Any failure is treated as "no summary yet": the fallback stays
    /// visible and the call is retried passively on a later render.
    fn summarize(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Write-once summary cache keyed by group id.
///
/// A newer request never replaces a cached summary for the same id;
/// callers discard superseded in-flight results themselves.
#[derive(Debug, Default)]
pub struct SummaryCache {
    entries: RefCell<HashMap<String, String>>,
}

impl SummaryCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached summary for a group id, if any.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<String> {
        self.entries.borrow().get(id).cloned()
    }

    /// Cache a summary unless one already exists. Returns whether the
    /// write happened.
    pub fn put_once(&self, id: &str, summary: String) -> bool {
        let mut entries = self.entries.borrow_mut();
        if entries.contains_key(id) {
            return false;
        }
        entries.insert(id.to_string(), summary);
        true
    }
}

fn summary_prompt(patches: &[AttributedPatch]) -> String {
    use std::fmt::Write as _;
    let mut prompt = String::from(
        "Summarize the following document edits in one short sentence:\n",
    );
    for patch in patches {
        match &patch.patch.action {
            crate::engine::PatchAction::Splice { text, .. } => {
                let _ = writeln!(prompt, "- inserted: {text:?}");
            }
            crate::engine::PatchAction::Del { removed, .. } => {
                let _ = writeln!(prompt, "- deleted: {removed:?}");
            }
            crate::engine::PatchAction::Replace {
                removed, inserted, ..
            } => {
                let _ = writeln!(prompt, "- replaced {removed:?} with {inserted:?}");
            }
            crate::engine::PatchAction::Put { value } => {
                let _ = writeln!(prompt, "- set {} to {value}", patch.patch.prop);
            }
        }
    }
    prompt
}

/// Resolve the display summary for a change group.
///
/// Precedence: summary persisted in the document, then the write-once
/// cache, then a fresh summarizer call (cached on success), then the
/// fallback. Summarizer failure leaves the fallback visible and is retried
/// passively on the next call.
///
/// # Errors
///
/// Engine errors only.
pub fn resolve_summary<E: DocumentEngine>(
    engine: &E,
    group: &ChangeGroup,
    caps: &DocCapabilities,
    cache: &SummaryCache,
    summarizer: Option<&dyn Summarizer>,
) -> Result<String, EngineError> {
    let persisted = read_summaries(&engine.view(&group.doc)?);
    if let Some(summary) = persisted.get(&group.id) {
        return Ok(summary.clone());
    }
    if let Some(summary) = cache.get(&group.id) {
        return Ok(summary);
    }
    let fallback = group.fallback_summary(engine, caps)?;
    let Some(summarizer) = summarizer else {
        return Ok(fallback);
    };
    match summarizer.summarize(&summary_prompt(&group.diff(engine)?)) {
        Ok(summary) => {
            cache.put_once(&group.id, summary.clone());
            Ok(cache.get(&group.id).unwrap_or(summary))
        }
        Err(e) => {
            debug!(group = %group.id, error = %e, "summarizer failed; keeping fallback");
            Ok(fallback)
        }
    }
}

// ---------------------------------------------------------------------------
// Live feed
// ---------------------------------------------------------------------------

struct FeedInner {
    caps: DocCapabilities,
    policy: Box<dyn GroupingPolicy>,
    items: Vec<TimelineItem>,
    last_heads: Option<Heads>,
    listeners: Vec<(u64, Box<dyn FnMut(&[TimelineItem])>)>,
    next_listener: u64,
}

/// A live, subscription-based timeline for one document.
///
/// The feed holds a listener on the engine's change stream for its
/// lifetime; the owner must disconnect it via [`FeedHandle::disconnect`],
/// or one engine listener leaks per connected feed per document.
pub struct TimelineFeed {
    inner: Rc<RefCell<FeedInner>>,
}

/// Handle for one engine connection of a [`TimelineFeed`].
#[must_use = "disconnect the feed, or the engine listener leaks"]
pub struct FeedHandle {
    doc: String,
    sub: crate::engine::SubscriptionId,
}

impl FeedHandle {
    /// Remove the feed's listener from the engine.
    pub fn disconnect<E: DocumentEngine>(self, engine: &mut E) {
        engine.unsubscribe(&self.doc, self.sub);
    }
}

fn rederive(inner: &Rc<RefCell<FeedInner>>, snapshot: &DocSnapshot) {
    {
        let mut guard = inner.borrow_mut();
        if let Some(last) = &guard.last_heads {
            if same_heads(last, &snapshot.heads) {
                return;
            }
        }
        let items = build_timeline(snapshot, &guard.caps, guard.policy.as_ref());
        guard.items = items;
        guard.last_heads = Some(snapshot.heads.clone());
    }
    // Broadcast with the listener list moved out, so a listener reading
    // the feed does not hit the RefCell re-entrantly.
    let (mut listeners, items) = {
        let mut guard = inner.borrow_mut();
        (std::mem::take(&mut guard.listeners), guard.items.clone())
    };
    for (_, listener) in &mut listeners {
        listener(&items);
    }
    let mut guard = inner.borrow_mut();
    let added = std::mem::take(&mut guard.listeners);
    guard.listeners = listeners;
    guard.listeners.extend(added);
}

impl TimelineFeed {
    /// Create a feed with the given capabilities and grouping policy.
    #[must_use]
    pub fn new(caps: DocCapabilities, policy: Box<dyn GroupingPolicy>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(FeedInner {
                caps,
                policy,
                items: Vec::new(),
                last_heads: None,
                listeners: Vec::new(),
                next_listener: 0,
            })),
        }
    }

    /// Derive the timeline now and follow the document's change stream.
    ///
    /// # Errors
    ///
    /// Engine errors only.
    pub fn connect<E: DocumentEngine>(
        &self,
        engine: &mut E,
        doc: &str,
    ) -> Result<FeedHandle, EngineError> {
        let snapshot = engine.snapshot(doc)?;
        rederive(&self.inner, &snapshot);
        let inner = Rc::clone(&self.inner);
        let sub = engine.subscribe(doc, Box::new(move |snap| rederive(&inner, snap)))?;
        Ok(FeedHandle {
            doc: doc.to_string(),
            sub,
        })
    }

    /// Register a timeline listener; returns its id for [`Self::unsubscribe`].
    pub fn subscribe(&self, listener: impl FnMut(&[TimelineItem]) + 'static) -> u64 {
        let mut guard = self.inner.borrow_mut();
        guard.next_listener += 1;
        let id = guard.next_listener;
        guard.listeners.push((id, Box::new(listener)));
        id
    }

    /// Remove a timeline listener. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        self.inner
            .borrow_mut()
            .listeners
            .retain(|(listener_id, _)| *listener_id != id);
    }

    /// The current timeline items.
    #[must_use]
    pub fn items(&self) -> Vec<TimelineItem> {
        self.inner.borrow().items.clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
