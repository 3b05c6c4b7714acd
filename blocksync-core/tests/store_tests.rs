//! Store persistence-flag, notification-order, and model-loading integration tests.

use std::cell::RefCell;
use std::rc::Rc;

use blocksync_core::{
    Block, BlockId, BlockList, ReplaceOptions, SelectionAnchor, StoreError, SubtreeId, TreeStore,
};
use rstest::rstest;
use serde_json::json;

fn tree() -> BlockList {
    BlockList::new(vec![
        Block::new("a", "core/paragraph"),
        Block::new("cols", "core/columns").with_children(vec![
            Block::new("col-1", "core/column").with_children(vec![Block::new("p1", "core/paragraph")]),
            Block::new("col-2", "core/column"),
        ]),
    ])
}

// ---------------------------------------------------------------------------
// 1. Persistence flag
// ---------------------------------------------------------------------------

#[rstest]
#[case::persistent(ReplaceOptions::persistent(), true, false)]
#[case::provisional(ReplaceOptions::provisional(), false, false)]
#[case::ignored(ReplaceOptions::ignored(), true, true)]
fn replace_records_flags(
    #[case] options: ReplaceOptions,
    #[case] persistent: bool,
    #[case] ignored: bool,
) {
    let store = TreeStore::with_document(tree());
    store
        .replace_children(&SubtreeId::from("col-2"), BlockList::new(vec![Block::new("x", "core/image")]), options)
        .expect("replace");
    assert_eq!(store.is_last_change_persistent(), persistent);
    assert_eq!(store.is_last_change_ignored(), ignored);
}

#[test]
fn forced_non_persistent_overrides_persistent_option() {
    let store = TreeStore::with_document(tree());
    store.mark_next_change_non_persistent();
    store
        .replace_children(&SubtreeId::Root, BlockList::empty(), ReplaceOptions::persistent())
        .expect("replace");
    assert!(!store.is_last_change_persistent());
}

#[test]
fn selection_change_keeps_persistence_flag() {
    let store = TreeStore::with_document(tree());
    store
        .replace_children(&SubtreeId::Root, tree(), ReplaceOptions::provisional())
        .expect("replace");
    store.set_selection(SelectionAnchor::at("a", "content", 0), SelectionAnchor::at("a", "content", 3));
    assert!(!store.is_last_change_persistent());
    let selection = store.selection().expect("selection");
    assert_eq!(selection.end.offset, Some(3));
    store.clear_selection();
    assert!(store.selection().is_none());
}

// ---------------------------------------------------------------------------
// 2. Deep rewrites
// ---------------------------------------------------------------------------

#[test]
fn deep_attribute_update_rebuilds_only_the_path() {
    let store = TreeStore::with_document(tree());
    let col_2_before = store.children(&SubtreeId::from("col-2"));
    let root_before = store.document();

    store
        .update_block_attributes(&BlockId::from("p1"), [("content".to_string(), json!("hello"))])
        .expect("update");

    let root_after = store.document();
    assert!(!root_after.ptr_eq(&root_before));
    assert!(store.children(&SubtreeId::from("col-2")).ptr_eq(&col_2_before));
    let p1 = store.block(&BlockId::from("p1")).expect("p1");
    assert_eq!(p1.attributes.get("content"), Some(&json!("hello")));
}

#[test]
fn update_missing_block_is_an_error() {
    let store = TreeStore::with_document(tree());
    let err = store
        .update_block_attributes(&BlockId::from("ghost"), [("x".to_string(), json!(1))])
        .unwrap_err();
    assert_eq!(err, StoreError::BlockNotFound { id: BlockId::from("ghost") });
    assert!(err.to_string().contains("ghost"));
}

// ---------------------------------------------------------------------------
// 3. Notifications
// ---------------------------------------------------------------------------

#[test]
fn unsubscribe_during_notification_stops_later_listener() {
    let store = TreeStore::new();
    let calls = Rc::new(RefCell::new(Vec::new()));
    let slot: Rc<RefCell<Option<blocksync_core::Subscription>>> = Rc::new(RefCell::new(None));

    let slot_in_first = Rc::clone(&slot);
    let c1 = Rc::clone(&calls);
    let _first = store.subscribe(move || {
        c1.borrow_mut().push("first");
        slot_in_first.borrow_mut().take();
    });
    let c2 = Rc::clone(&calls);
    *slot.borrow_mut() = Some(store.subscribe(move || c2.borrow_mut().push("second")));

    store.reset_document(tree());
    assert_eq!(*calls.borrow(), vec!["first"]);
}

// ---------------------------------------------------------------------------
// 4. Model loading
// ---------------------------------------------------------------------------

#[test]
fn block_tree_loads_from_yaml() {
    let yaml = r#"
- id: heading
  type: core/heading
  attributes:
    level: 2
    content: Title
- id: group
  type: core/group
  children:
    - id: inner
      type: core/paragraph
"#;
    let blocks: BlockList = serde_yaml::from_str(yaml).expect("parse");
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].attributes.get("level"), Some(&json!(2)));
    assert_eq!(blocks[1].children[0].id, BlockId::from("inner"));
    assert!(blocks[1].attributes.is_empty());
}
