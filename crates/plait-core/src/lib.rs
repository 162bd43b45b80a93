//! plait-core: branch, history, and annotation engine for replicated
//! documents.
//!
//! Layered on top of a replicated-document engine (consumed through the
//! [`engine::DocumentEngine`] trait), this crate maintains alternate lines
//! of development per document ([`branch`]), groups the low-level edit log
//! into human-meaningful change groups ([`timeline`]), computes attributed
//! diffs between any two points in history ([`diff`]), and derives anchored,
//! clustered annotations that stay valid while the document keeps mutating
//! ([`annotations`]). All version-control metadata is stored inside the
//! document it describes ([`meta`]).
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums next to the code that raises them;
//!   `anyhow::Result` at the edges (config loading, summarizers).
//! - **Logging**: `tracing` macros (`warn!` for tolerated races, `debug!`
//!   for derivation detail). Recoverable conditions degrade to "show less",
//!   never to a failed view.

pub mod annotations;
pub mod branch;
pub mod caps;
pub mod config;
pub mod diff;
pub mod engine;
pub mod meta;
pub mod timeline;

pub use annotations::{
    Annotation, AnnotationGroup, AnnotationsOutput, SelectionState, project_annotations,
};
pub use branch::{
    CreateBranchOptions, changes_from_merged_branch, create_branch, delete_branch,
    merge_branch, rebase_branch, rename_branch,
};
pub use caps::{DocCapabilities, DocKind};
pub use config::{PlaitConfig, load_config};
pub use diff::{AttributedPatch, combine_patches, diff_with_provenance};
pub use engine::{
    Change, DocSnapshot, DocView, DocumentEngine, EngineError, Heads, Identity, Op, Patch,
    PatchAction, memory::MemoryEngine,
};
pub use meta::{Branch, BranchMetadata, Comment, Discussion, Tag};
pub use timeline::{
    AuthorWindowPolicy, ChangeGroup, FeedHandle, GroupingPolicy, Summarizer, SummaryCache,
    TimelineFeed, TimelineItem, build_timeline, resolve_summary,
};
