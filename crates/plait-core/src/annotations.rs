//! Annotation projection: diffs and discussions rendered as anchored,
//! grouped markers.
//!
//! Annotations are always derived, never persisted: every call projects the
//! current diff and discussion set against a concrete document view, drops
//! anything whose anchor no longer resolves, clusters what remains by
//! spatial overlap, and derives selection/hover state. Degradation is
//! always "show less" — a dangling anchor or unrecognized patch silently
//! disappears from the projection, it never fails the view.

use std::collections::HashSet;

use crate::caps::DocCapabilities;
use crate::diff::AttributedPatch;
use crate::engine::{AnchorRange, Cursor, DocView};
use crate::meta::Discussion;

// ---------------------------------------------------------------------------
// Annotations
// ---------------------------------------------------------------------------

/// A derived, UI-facing marker tied to an anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    /// Content that was inserted.
    Added { anchor: AnchorRange, text: String },
    /// Content that was removed; the anchor is zero-width at the deletion
    /// point.
    Deleted { anchor: AnchorRange, text: String },
    /// Content that was replaced.
    Changed {
        anchor: AnchorRange,
        before: String,
        after: String,
    },
    /// A discussion-highlighted range.
    Highlighted { anchor: AnchorRange, text: String },
}

impl Annotation {
    /// The anchor this annotation is tied to.
    #[must_use]
    pub fn anchor(&self) -> &AnchorRange {
        match self {
            Self::Added { anchor, .. }
            | Self::Deleted { anchor, .. }
            | Self::Changed { anchor, .. }
            | Self::Highlighted { anchor, .. } => anchor,
        }
    }
}

/// A live character range within one property of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub start: usize,
    pub end: usize,
}

impl Region {
    /// Inclusive overlap: touching endpoints count, so a zero-width
    /// deletion marker clusters with the edit right next to it.
    #[must_use]
    pub fn overlaps(self, other: Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Smallest region covering both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// An annotation whose anchor resolved in the projected view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAnnotation {
    pub annotation: Annotation,
    pub region: Region,
}

impl ResolvedAnnotation {
    fn prop(&self) -> &str {
        &self.annotation.anchor().prop
    }
}

/// A group of annotations: either anchored to a discussion or computed
/// purely by spatial overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationGroup {
    pub id: String,
    pub discussion: Option<Discussion>,
    pub annotations: Vec<ResolvedAnnotation>,
}

/// The projector's output: the flat annotation list and its exact
/// partition into ordered groups.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnnotationsOutput {
    pub annotations: Vec<ResolvedAnnotation>,
    pub groups: Vec<AnnotationGroup>,
}

// ---------------------------------------------------------------------------
// Anchor construction and resolution
// ---------------------------------------------------------------------------

/// A stable cursor for `prop` at `index` in the given view.
#[must_use]
pub fn cursor_at(view: &DocView, prop: &str, index: usize) -> Cursor {
    view.texts
        .get(prop)
        .and_then(|chars| chars.get(index))
        .map_or(Cursor::End, |tc| Cursor::Char(tc.id.clone()))
}

/// A stable anchor covering `[start, end)` of `prop` in the given view.
#[must_use]
pub fn anchor_at(view: &DocView, prop: &str, start: usize, end: usize) -> AnchorRange {
    AnchorRange {
        prop: prop.to_string(),
        start: cursor_at(view, prop, start),
        end: cursor_at(view, prop, end),
    }
}

fn resolve_cursor_in_view(view: &DocView, prop: &str, cursor: &Cursor) -> Option<usize> {
    match cursor {
        Cursor::End => Some(view.text_len(prop)),
        Cursor::Char(id) => view
            .texts
            .get(prop)
            .and_then(|chars| chars.iter().position(|c| c.id == *id)),
    }
}

/// Resolve an anchor to a live region, or `None` when any of its cursors
/// no longer resolves (the annotation is then dropped, per the error
/// taxonomy).
#[must_use]
pub fn resolve_anchor(view: &DocView, anchor: &AnchorRange) -> Option<Region> {
    let a = resolve_cursor_in_view(view, &anchor.prop, &anchor.start)?;
    let b = resolve_cursor_in_view(view, &anchor.prop, &anchor.end)?;
    Some(Region {
        start: a.min(b),
        end: a.max(b),
    })
}

fn text_slice(view: &DocView, prop: &str, region: Region) -> String {
    view.texts
        .get(prop)
        .map(|chars| {
            chars
                .iter()
                .skip(region.start)
                .take(region.end.saturating_sub(region.start))
                .map(|c| c.ch)
                .collect()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Overlap clustering
// ---------------------------------------------------------------------------

struct OpenGroup {
    prop: String,
    combined: Region,
    members: Vec<ResolvedAnnotation>,
}

/// Cluster annotations by spatial overlap in a single left-to-right pass.
///
/// Maintains a set of open groups, each tracking its combined bounding
/// region and its members' individual regions. A new item joins a group
/// only when the group's combined region overlaps it *and* at least one
/// member's individual region overlaps it — the stricter member test stops
/// unrelated items that merely share a large combined bbox from being
/// merged transitively. Zero matches start a singleton; one match extends
/// it; several matches merge into one.
///
/// The pass is deliberately insertion-order-dependent, mirroring reading
/// order; regardless of order, the output is an exact partition of the
/// input.
#[must_use]
pub fn cluster_by_overlap(items: Vec<ResolvedAnnotation>) -> Vec<Vec<ResolvedAnnotation>> {
    let mut open: Vec<OpenGroup> = Vec::new();
    for item in items {
        let matched: Vec<usize> = open
            .iter()
            .enumerate()
            .filter(|(_, g)| {
                g.prop == item.prop()
                    && g.combined.overlaps(item.region)
                    && g.members.iter().any(|m| m.region.overlaps(item.region))
            })
            .map(|(i, _)| i)
            .collect();

        match matched.as_slice() {
            [] => open.push(OpenGroup {
                prop: item.prop().to_string(),
                combined: item.region,
                members: vec![item],
            }),
            [only] => {
                let group = &mut open[*only];
                group.combined = group.combined.union(item.region);
                group.members.push(item);
            }
            [first, rest @ ..] => {
                // Merge all matched groups (and the new item) into the
                // first, removing the others back-to-front.
                let mut merged_members = Vec::new();
                let mut combined = item.region;
                for idx in rest.iter().rev() {
                    let group = open.remove(*idx);
                    combined = combined.union(group.combined);
                    merged_members.splice(0..0, group.members);
                }
                let group = &mut open[*first];
                group.combined = group.combined.union(combined);
                group.members.extend(merged_members);
                group.members.push(item);
            }
        }
    }
    open.into_iter().map(|g| g.members).collect()
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Project a diff and a discussion set into grouped annotations.
///
/// 1. Diff patches become edit annotations via the document type's
///    projector, anchored with stable position references; unrecognized
///    patch shapes are filtered out first.
/// 2. Every unresolved discussion with at least one still-resolvable
///    anchor emits one highlighted annotation per anchor; edit annotations
///    overlapping a discussion anchor are claimed by that discussion.
/// 3. Remaining edit annotations are clustered by overlap.
/// 4. Groups are sorted by the document type's anchor ordering key, ties
///    broken by original order. Discussion-anchored groups are never
///    merged with each other, even when their anchors overlap.
#[must_use]
pub fn project_annotations(
    view: &DocView,
    diff: Option<&[AttributedPatch]>,
    discussions: &[Discussion],
    caps: &DocCapabilities,
) -> AnnotationsOutput {
    // Step 1: edit annotations from the diff.
    let mut edits: Vec<ResolvedAnnotation> = Vec::new();
    for patch in diff.unwrap_or(&[]) {
        if !(caps.patch_filter)(&patch.patch) {
            continue;
        }
        let Some(annotation) = (caps.patch_projector)(patch, view) else {
            continue;
        };
        let Some(region) = resolve_anchor(view, annotation.anchor()) else {
            continue;
        };
        edits.push(ResolvedAnnotation { annotation, region });
    }

    // Step 2: discussion-anchored groups claim overlapping edits.
    let mut groups: Vec<AnnotationGroup> = Vec::new();
    let mut claimed: HashSet<usize> = HashSet::new();
    for discussion in discussions.iter().filter(|d| !d.resolved) {
        let mut members: Vec<ResolvedAnnotation> = Vec::new();
        for anchor in &discussion.anchors {
            let Some(region) = resolve_anchor(view, anchor) else {
                continue;
            };
            members.push(ResolvedAnnotation {
                annotation: Annotation::Highlighted {
                    anchor: anchor.clone(),
                    text: text_slice(view, &anchor.prop, region),
                },
                region,
            });
        }
        if members.is_empty() {
            // No resolvable anchor: the discussion may still render as an
            // unanchored whole-document thread, but it takes no part in
            // anchored grouping.
            continue;
        }
        // Claim against the discussion's own anchors only, not against
        // edits claimed a moment ago.
        let anchor_count = members.len();
        for (i, edit) in edits.iter().enumerate() {
            if claimed.contains(&i) {
                continue;
            }
            let overlapping = members[..anchor_count]
                .iter()
                .any(|m| m.prop() == edit.prop() && m.region.overlaps(edit.region));
            if overlapping {
                claimed.insert(i);
                members.push(edit.clone());
            }
        }
        groups.push(AnnotationGroup {
            id: discussion.id.clone(),
            discussion: Some(discussion.clone()),
            annotations: members,
        });
    }

    // Step 3: cluster the unclaimed edits.
    let leftovers: Vec<ResolvedAnnotation> = edits
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !claimed.contains(i))
        .map(|(_, e)| e)
        .collect();
    for members in cluster_by_overlap(leftovers) {
        let combined = members
            .iter()
            .map(|m| m.region)
            .reduce(Region::union)
            .unwrap_or(Region { start: 0, end: 0 });
        let prop = members.first().map(|m| m.prop().to_string()).unwrap_or_default();
        groups.push(AnnotationGroup {
            id: format!("group:{prop}:{}-{}", combined.start, combined.end),
            discussion: None,
            annotations: members,
        });
    }

    // Step 4: order groups by the doc type's anchor sort key; the sort is
    // stable, so equal keys keep their original order.
    groups.sort_by_key(|g| {
        g.annotations
            .iter()
            .map(|m| (caps.anchor_sort_key)(m.prop(), m.region))
            .min()
            .unwrap_or_default()
    });

    let annotations = groups
        .iter()
        .flat_map(|g| g.annotations.iter().cloned())
        .collect();
    AnnotationsOutput {
        annotations,
        groups,
    }
}

// ---------------------------------------------------------------------------
// Selection / hover
// ---------------------------------------------------------------------------

/// What the user currently has selected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    #[default]
    None,
    /// A set of selected anchors (e.g. from the editor's cursor).
    Anchors(Vec<AnchorRange>),
    /// A group selected directly (e.g. from the review sidebar).
    Group(String),
}

/// Derived selection and hover state over a projected group list.
///
/// Selection expands to the first group (in sorted order) whose members
/// are a superset of the selected anchors, so selecting one member
/// highlights its siblings; hover performs the analogous single-anchor
/// expansion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectionState {
    selection: Selection,
    hovered: Option<AnchorRange>,
}

fn group_contains(group: &AnnotationGroup, anchor: &AnchorRange) -> bool {
    group
        .annotations
        .iter()
        .any(|m| m.annotation.anchor() == anchor)
}

impl SelectionState {
    /// Replace the selection with a set of anchors.
    pub fn select_anchors(&mut self, anchors: Vec<AnchorRange>) {
        self.selection = if anchors.is_empty() {
            Selection::None
        } else {
            Selection::Anchors(anchors)
        };
    }

    /// Select a group by id.
    pub fn select_group(&mut self, id: impl Into<String>) {
        self.selection = Selection::Group(id.into());
    }

    /// Clear the selection.
    pub fn clear_selection(&mut self) {
        self.selection = Selection::None;
    }

    /// Set or clear the hovered anchor.
    pub fn hover(&mut self, anchor: Option<AnchorRange>) {
        self.hovered = anchor;
    }

    /// The current raw selection.
    #[must_use]
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// The group the selection expands to, if any.
    #[must_use]
    pub fn selected_group<'a>(&self, groups: &'a [AnnotationGroup]) -> Option<&'a AnnotationGroup> {
        match &self.selection {
            Selection::None => None,
            Selection::Group(id) => groups.iter().find(|g| g.id == *id),
            Selection::Anchors(anchors) => groups
                .iter()
                .find(|g| anchors.iter().all(|a| group_contains(g, a))),
        }
    }

    /// The group the hovered anchor expands to, if any.
    #[must_use]
    pub fn hovered_group<'a>(&self, groups: &'a [AnnotationGroup]) -> Option<&'a AnnotationGroup> {
        let anchor = self.hovered.as_ref()?;
        groups.iter().find(|g| group_contains(g, anchor))
    }

    /// All anchors highlighted by the expanded selection (the selected
    /// group's full membership).
    #[must_use]
    pub fn expanded_anchors(&self, groups: &[AnnotationGroup]) -> Vec<AnchorRange> {
        self.selected_group(groups)
            .map(|g| {
                g.annotations
                    .iter()
                    .map(|m| m.annotation.anchor().clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
