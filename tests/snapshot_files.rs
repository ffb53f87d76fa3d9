//! Snapshot files on disk

mod common;

use std::fs;

use common::{abc_tree, build_tree, known, TempPath};
use schematree::ingest::TreeBuilder;
use schematree::tree::{ItemList, SchemaTree, SnapshotError, TreeConfig};

#[test]
fn test_save_and_load_round_trip() {
    let tree = build_tree(&[
        &["a", "b", "c"],
        &["a", "c"],
        &["b", "c"],
        &["a", "b"],
        &["a"],
        &["d"],
    ]);
    let file = TempPath::new("round-trip.bin");
    tree.save(file.path()).unwrap();

    let loaded = SchemaTree::load(file.path()).unwrap();
    assert_eq!(loaded.root_support(), tree.root_support());
    assert_eq!(loaded.stats().nodes, tree.stats().nodes);
    assert_eq!(loaded.stats().max_depth, tree.stats().max_depth);

    for item in tree.registry().items() {
        let twin = loaded.registry().get(item.iri()).unwrap();
        assert_eq!(twin.total_count(), item.total_count());
        assert_eq!(twin.sort_order(), item.sort_order());
    }

    for query in [&["a"][..], &["c"], &["a", "b"], &["b", "c"], &["a", "b", "c"], &["d"]] {
        assert_eq!(loaded.support(&known(&loaded, query)), tree.support(&known(&tree, query)));
        let before = tree.recommend(&known(&tree, query));
        let after = loaded.recommend(&known(&loaded, query));
        assert_eq!(before.to_string(), after.to_string());
    }
}

#[test]
fn test_loaded_tree_accepts_more_inserts() {
    let tree = abc_tree();
    let file = TempPath::new("grow.bin");
    tree.save(file.path()).unwrap();

    let loaded = SchemaTree::load(file.path()).unwrap();
    loaded.insert(&known(&loaded, &["A", "B"]));
    assert_eq!(loaded.root_support(), 4);
    assert_eq!(loaded.support(&known(&loaded, &["A", "B"])), 2);

    // The new path joins the existing chain rather than forking a duplicate.
    let b = known(&loaded, &["B"])[0].clone();
    assert_eq!(loaded.same_item_chain(&b).count(), 1);
}

#[test]
fn test_typed_flag_and_min_support_survive() {
    let config = TreeConfig {
        typed: true,
        min_support: 5,
        ..TreeConfig::default()
    };
    let tree = TreeBuilder::new(config)
        .build_from_str("A t#T\nA\n")
        .unwrap();
    let file = TempPath::new("typed.bin");
    tree.save(file.path()).unwrap();

    let loaded = SchemaTree::load(file.path()).unwrap();
    assert!(loaded.is_typed());
    assert_eq!(loaded.min_support(), 5);
    assert_eq!(loaded.type_frequencies(), vec![("T".to_string(), 1)]);
}

#[test]
fn test_empty_tree_round_trip() {
    let tree = SchemaTree::new();
    let file = TempPath::new("empty.bin");
    tree.save(file.path()).unwrap();

    let loaded = SchemaTree::load(file.path()).unwrap();
    assert_eq!(loaded.root_support(), 0);
    assert!(loaded.recommend(&ItemList::new()).is_empty());
}

#[test]
fn test_truncated_file_fails_to_load() {
    let tree = abc_tree();
    let file = TempPath::new("truncated.bin");
    tree.save(file.path()).unwrap();

    let bytes = fs::read(file.path()).unwrap();
    for cut in [3, 6, bytes.len() / 2, bytes.len() - 1] {
        fs::write(file.path(), &bytes[..cut]).unwrap();
        assert!(
            matches!(SchemaTree::load(file.path()), Err(SnapshotError::Truncated)),
            "cut at {}",
            cut
        );
    }
}

#[test]
fn test_foreign_file_fails_to_load() {
    let file = TempPath::new("foreign.bin");
    fs::write(file.path(), b"PK\x03\x04 definitely not a tree").unwrap();
    assert!(matches!(SchemaTree::load(file.path()), Err(SnapshotError::BadMagic)));

    fs::write(file.path(), b"SCHT\x07\x00").unwrap();
    assert!(matches!(
        SchemaTree::load(file.path()),
        Err(SnapshotError::UnsupportedVersion(7))
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let file = TempPath::new("missing.bin");
    assert!(matches!(SchemaTree::load(file.path()), Err(SnapshotError::Io(_))));
}

#[test]
fn test_failed_save_leaves_no_file() {
    let dir = TempPath::new("no-such-dir");
    let target = dir.path().join("tree.bin");
    let tree = abc_tree();

    assert!(matches!(tree.save(&target), Err(SnapshotError::Io(_))));
    assert!(!target.exists());
}
