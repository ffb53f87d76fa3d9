//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use schematree::tree::{ItemList, SchemaTree};

/// Resolve identifiers, interning unknown ones.
pub fn items(tree: &SchemaTree, iris: &[&str]) -> ItemList {
    iris.iter().map(|iri| tree.intern(iri)).collect()
}

/// Resolve identifiers that must already be known.
pub fn known(tree: &SchemaTree, iris: &[&str]) -> ItemList {
    iris.iter()
        .map(|iri| tree.registry().get(iri).unwrap_or_else(|| panic!("unknown item {}", iri)))
        .collect()
}

/// Build a ranked tree from property sets the way the two-pass builder does:
/// count everything, rank, then insert.
pub fn build_tree(sets: &[&[&str]]) -> Arc<SchemaTree> {
    let tree = SchemaTree::new();
    for set in sets {
        for item in items(&tree, set).normalized().iter() {
            item.increment();
        }
    }
    tree.update_sort_order().expect("fresh tree accepts ranking");
    for set in sets {
        tree.insert(&items(&tree, set));
    }
    Arc::new(tree)
}

/// The three-subject scenario {A,B}, {A,C}, {A}.
pub fn abc_tree() -> Arc<SchemaTree> {
    build_tree(&[&["A", "B"], &["A", "C"], &["A"]])
}

/// A unique path in the system temp directory, removed on drop.
pub struct TempPath(PathBuf);

impl TempPath {
    pub fn new(name: &str) -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let unique = format!(
            "schematree-{}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst),
            name
        );
        TempPath(std::env::temp_dir().join(unique))
    }

    pub fn path(&self) -> &std::path::Path {
        &self.0
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}
