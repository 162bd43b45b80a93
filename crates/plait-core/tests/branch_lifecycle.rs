//! End-to-end branch lifecycle: fork, concurrent edits, attributed diff,
//! merge-back, timeline, and annotation projection against one engine.

use plait_core::annotations::project_annotations;
use plait_core::branch::{
    CreateBranchOptions, changes_from_merged_branch, create_branch, merge_branch,
};
use plait_core::caps::DocKind;
use plait_core::diff::{combine_patches, diff_with_provenance};
use plait_core::engine::memory::MemoryEngine;
use plait_core::engine::{ChangeRequest, DocumentEngine, Identity, Op};
use plait_core::meta::{create_discussion, read_branch_metadata};
use plait_core::timeline::{AuthorWindowPolicy, TimelineItem, build_timeline};

const GAP: i64 = 60_000_000;

fn identity(name: &str) -> Identity {
    Identity::new(format!("actor-{name}"), format!("contact:{name}"))
}

fn splice(
    engine: &mut MemoryEngine,
    doc: &str,
    who: &Identity,
    time: i64,
    index: usize,
    delete: usize,
    insert: &str,
) {
    engine
        .apply(
            doc,
            ChangeRequest {
                actor: who.actor.clone(),
                author: Some(who.contact.clone()),
                time,
                message: None,
                ops: vec![Op::Splice {
                    prop: "content".into(),
                    index,
                    delete,
                    insert: insert.into(),
                }],
            },
        )
        .expect("apply");
}

#[test]
fn full_branch_review_flow() {
    let mut engine = MemoryEngine::new();
    let alice = identity("alice");
    let bob = identity("bob");

    // Alice writes the base document.
    let doc = engine.create_doc();
    splice(&mut engine, &doc, &alice, 1_000, 0, 0, "Hello world");
    let fork_heads = engine.heads(&doc).expect("heads");

    // Bob forks a branch and rewrites the greeting there.
    let branch = create_branch(
        &mut engine,
        &doc,
        CreateBranchOptions {
            name: "rewrite-greeting".into(),
            heads: None,
        },
        &bob,
    )
    .expect("create branch");
    engine
        .apply(
            &branch.url,
            ChangeRequest {
                actor: bob.actor.clone(),
                author: Some(bob.contact.clone()),
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
    let branch_heads = engine.heads(&branch.url).expect("heads");

    // Branch diff: what would merging change, and who did it?
    let raw = diff_with_provenance(&engine, &branch.url, &fork_heads, &branch_heads)
        .expect("diff");
    let combined = combine_patches(raw);
    // One content replace, plus the clone's branchSource bookkeeping write
    // (which the annotation layer filters out as an unrecognized shape).
    let replace = combined
        .iter()
        .find(|p| p.patch.prop == "content")
        .expect("content patch");
    assert_eq!(replace.authors, vec!["contact:bob".to_string()]);
    assert!(matches!(
        replace.patch.action,
        plait_core::engine::PatchAction::Replace { index: 6, .. }
    ));

    // A reviewer opens a discussion on the replaced range in the branch.
    let branch_view = engine.view(&branch.url).expect("view");
    let anchor = plait_core::annotations::anchor_at(&branch_view, "content", 6, 11);
    create_discussion(
        &mut engine,
        &branch.url,
        vec![anchor],
        "prefer the old wording?",
        &alice,
    )
    .expect("discussion");

    // Annotations over the branch: the discussion claims the overlapping
    // edit, leaving one group.
    let branch_view = engine.view(&branch.url).expect("view");
    let discussions = plait_core::meta::read_discussions(&branch_view);
    let out = project_annotations(
        &branch_view,
        Some(&combined),
        &discussions,
        &DocKind::Text.capabilities(),
    );
    assert_eq!(out.groups.len(), 1);
    assert!(out.groups[0].discussion.is_some());
    assert_eq!(out.groups[0].annotations.len(), 2);

    // Merge back and check the source caught the edit plus the metadata.
    merge_branch(&mut engine, &doc, &branch.url, &bob).expect("merge");
    assert_eq!(engine.view(&doc).expect("view").text("content"), "Hello there");
    let meta = read_branch_metadata(&engine.view(&doc).expect("view"));
    assert!(meta.branches[0].merge_metadata.is_some());

    // Post-merge attribution: exactly the branch's content change.
    let log = engine.log(&doc).expect("log");
    let from_branch = changes_from_merged_branch(
        &log,
        &meta.branches[0]
            .merge_metadata
            .as_ref()
            .expect("merge metadata")
            .merge_heads,
        &engine.heads(&doc).expect("heads"),
        &meta.branches[0].branch_heads,
    );
    assert!(
        from_branch.iter().any(|c| c.actor == bob.actor),
        "bob's branch edit is attributed to the branch"
    );
    assert!(
        from_branch
            .iter()
            .all(|c| c.time != 1_000 || c.actor != alice.actor),
        "alice's pre-fork edit is not attributed to the branch"
    );

    // The merged timeline interleaves the branch lifecycle events.
    let snapshot = engine.snapshot(&doc).expect("snapshot");
    let items = build_timeline(
        &snapshot,
        &DocKind::Text.capabilities(),
        &AuthorWindowPolicy { max_gap_us: GAP },
    );
    let has_created = items
        .iter()
        .any(|i| matches!(i, TimelineItem::BranchCreatedFromThisDoc(b) if b.url == branch.url));
    let has_merged = items
        .iter()
        .any(|i| matches!(i, TimelineItem::OtherBranchMergedIntoThisDoc(b) if b.url == branch.url));
    assert!(has_created);
    assert!(has_merged);
}

#[test]
fn concurrent_branches_do_not_interfere() {
    let mut engine = MemoryEngine::new();
    let alice = identity("alice");
    let bob = identity("bob");
    let carol = identity("carol");

    let doc = engine.create_doc();
    splice(&mut engine, &doc, &alice, 1_000, 0, 0, "shared base ");

    let one = create_branch(
        &mut engine,
        &doc,
        CreateBranchOptions { name: "one".into(), heads: None },
        &bob,
    )
    .expect("create");
    let two = create_branch(
        &mut engine,
        &doc,
        CreateBranchOptions { name: "two".into(), heads: None },
        &carol,
    )
    .expect("create");

    splice(&mut engine, &one.url, &bob, 2_000, 12, 0, "from-one ");
    splice(&mut engine, &two.url, &carol, 2_100, 12, 0, "from-two ");

    merge_branch(&mut engine, &doc, &one.url, &bob).expect("merge one");
    merge_branch(&mut engine, &doc, &two.url, &carol).expect("merge two");

    let text = engine.view(&doc).expect("view").text("content");
    assert!(text.contains("from-one"), "{text}");
    assert!(text.contains("from-two"), "{text}");

    let meta = read_branch_metadata(&engine.view(&doc).expect("view"));
    assert_eq!(meta.branches.len(), 2);
    assert!(meta.branches.iter().all(|b| b.merge_metadata.is_some()));
}
