//! The schema tree: a frequency-ordered trie of property sets
//!
//! Every inserted property set is deduplicated, sorted by rank (most frequent
//! first) and threaded from the root, incrementing the support of each node it
//! passes. Items nearer the leaves are therefore rarer, which is what lets
//! [`SchemaNode::prefix_contains`] stop early and lets the support and
//! recommendation walks start from the rarest item's same-item chain.
//!
//! # Concurrency
//!
//! - Inserts never hold a tree-wide lock. A child lookup takes the read lock of
//!   the parent's stripe; only a miss upgrades to the write lock, searches
//!   again, and creates the child.
//! - A new node is linked into its item's same-item chain (under the item's
//!   stripe) before it becomes visible in the parent's child list.
//! - Support counters are atomics. Readers may observe a tree between two
//!   inserts, or an insert whose path is only partly counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use super::item::{Item, ItemList, ROOT_IRI, TYPE_PREFIX};
use super::locks::{LockStripes, StripeHash, DEFAULT_LOCK_STRIPES};
use super::node::{SameItemChain, SchemaNode};
use super::registry::ItemRegistry;
use crate::ingest::SubjectSummary;

/// Construction parameters for a [`SchemaTree`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeConfig {
    /// Number of lock stripes for nodes and for items.
    pub lock_stripes: usize,
    /// Mapping from node/item id to stripe.
    pub stripe_hash: StripeHash,
    /// Minimum support threshold. Stored in snapshots; not enforced.
    pub min_support: u32,
    /// Whether type items (`t#...`) are part of the inserted sets.
    pub typed: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            lock_stripes: DEFAULT_LOCK_STRIPES,
            stripe_hash: StripeHash::default(),
            min_support: 1,
            typed: false,
        }
    }
}

/// Errors raised by structural tree operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Ranks cannot change once sets were inserted: every child list and every
    /// path order depends on them.
    NonEmptyTree { root_support: u32 },
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeError::NonEmptyTree { root_support } => write!(
                f,
                "cannot reorder item ranks: tree already holds {} property sets",
                root_support
            ),
        }
    }
}

impl std::error::Error for TreeError {}

/// Summary figures about a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TreeStats {
    pub nodes: usize,
    pub max_depth: usize,
    pub properties: usize,
    pub types: usize,
    pub root_support: u32,
}

/// Frequent-pattern tree over property identifiers.
pub struct SchemaTree {
    registry: ItemRegistry,
    root: Arc<SchemaNode>,
    node_locks: LockStripes,
    next_node_id: AtomicU64,
    min_support: u32,
    typed: bool,
}

impl SchemaTree {
    pub fn new() -> Self {
        Self::with_config(TreeConfig::default())
    }

    pub fn with_config(config: TreeConfig) -> Self {
        let registry = ItemRegistry::with_lock_stripes(config.lock_stripes, config.stripe_hash);
        let root_item = registry.intern(ROOT_IRI);
        Self::from_parts(registry, root_item, config)
    }

    pub(crate) fn from_parts(registry: ItemRegistry, root_item: Arc<Item>, config: TreeConfig) -> Self {
        SchemaTree {
            registry,
            root: Arc::new(SchemaNode::new_root(root_item)),
            node_locks: LockStripes::new(config.lock_stripes, config.stripe_hash),
            next_node_id: AtomicU64::new(1),
            min_support: config.min_support.max(1),
            typed: config.typed,
        }
    }

    pub fn config(&self) -> TreeConfig {
        TreeConfig {
            lock_stripes: self.node_locks.len(),
            stripe_hash: self.node_locks.hash(),
            min_support: self.min_support,
            typed: self.typed,
        }
    }

    #[inline]
    pub fn registry(&self) -> &ItemRegistry {
        &self.registry
    }

    #[inline]
    pub fn root(&self) -> &Arc<SchemaNode> {
        &self.root
    }

    /// Number of inserted property sets.
    #[inline]
    pub fn root_support(&self) -> u32 {
        self.root.support()
    }

    pub fn min_support(&self) -> u32 {
        self.min_support
    }

    pub fn is_typed(&self) -> bool {
        self.typed
    }

    pub fn intern(&self, iri: &str) -> Arc<Item> {
        self.registry.intern(iri)
    }

    /// Recompute item ranks from their total counts.
    ///
    /// Only valid while the tree is empty (between the counting and the
    /// insertion pass of a build); fails otherwise.
    pub fn update_sort_order(&self) -> Result<(), TreeError> {
        let root_support = self.root_support();
        if root_support > 0 {
            return Err(TreeError::NonEmptyTree { root_support });
        }
        self.registry.rank_all();
        debug!(target: "schematree::tree", items = self.registry.len(), "ranked items");
        Ok(())
    }

    /// Insert one property set. Safe to call from many threads at once.
    pub fn insert(&self, properties: &ItemList) {
        let properties = properties.normalized();

        let mut node = Arc::clone(&self.root);
        node.increment_support();
        for item in &properties {
            node = self.get_or_create_child(&node, item);
            node.increment_support();
        }
    }

    /// Insert the items of one subject summary.
    pub fn insert_summary(&self, summary: &SubjectSummary) {
        self.insert(&summary.item_list());
    }

    /// Existing child of `node` labelled `item`.
    pub fn find_child(&self, node: &Arc<SchemaNode>, item: &Item) -> Option<Arc<SchemaNode>> {
        self.node_locks.read(node.id(), node.children_cell(), |children| {
            search_children(children, item).ok().map(|pos| Arc::clone(&children[pos]))
        })
    }

    /// Child of `node` labelled `item`, created if missing.
    pub fn get_or_create_child(&self, node: &Arc<SchemaNode>, item: &Arc<Item>) -> Arc<SchemaNode> {
        if let Some(child) = self.find_child(node, item) {
            return child;
        }

        self.node_locks.write(node.id(), node.children_cell(), |children| {
            // Another thread may have created the child since the read.
            match search_children(children, item) {
                Ok(pos) => Arc::clone(&children[pos]),
                Err(pos) => {
                    let child = self.new_chained_node(node, item, 0);
                    children.insert(pos, Arc::clone(&child));
                    child
                }
            }
        })
    }

    /// Create a node and prepend it to its item's same-item chain.
    fn new_chained_node(&self, parent: &Arc<SchemaNode>, item: &Arc<Item>, support: u32) -> Arc<SchemaNode> {
        let id = self.next_node_id.fetch_add(1, Ordering::Relaxed);
        self.registry.item_locks().write(item.id().as_u64(), item.chain_head(), |head| {
            let node = Arc::new(SchemaNode::new_child(
                id,
                Arc::clone(item),
                parent,
                head.clone(),
                support,
            ));
            *head = Arc::downgrade(&node);
            node
        })
    }

    /// Attach a decoded node under `parent`. Returns `None` if `parent` already
    /// has a child with this item.
    pub(crate) fn attach_loaded_child(
        &self,
        parent: &Arc<SchemaNode>,
        item: &Arc<Item>,
        support: u32,
    ) -> Option<Arc<SchemaNode>> {
        self.node_locks.write(parent.id(), parent.children_cell(), |children| {
            let pos = search_children(children, item).err()?;
            let child = self.new_chained_node(parent, item, support);
            children.insert(pos, Arc::clone(&child));
            Some(child)
        })
    }

    /// Snapshot of a node's children, sorted by item id.
    pub fn children(&self, node: &Arc<SchemaNode>) -> Vec<Arc<SchemaNode>> {
        self.node_locks.read(node.id(), node.children_cell(), |children| children.clone())
    }

    /// Push the children of `node` onto `stack`.
    pub(crate) fn push_children(&self, node: &SchemaNode, stack: &mut Vec<Arc<SchemaNode>>) {
        self.node_locks.read(node.id(), node.children_cell(), |children| {
            stack.extend(children.iter().cloned())
        });
    }

    /// Every node labelled `item`, newest first.
    pub fn same_item_chain(&self, item: &Item) -> SameItemChain {
        let head = self
            .registry
            .item_locks()
            .read(item.id().as_u64(), item.chain_head(), |head| head.upgrade());
        SameItemChain::starting_at(head)
    }

    /// Node reached by inserting exactly `properties` (after normalisation).
    pub fn find_path(&self, properties: &ItemList) -> Option<Arc<SchemaNode>> {
        let mut node = Arc::clone(&self.root);
        for item in &properties.normalized() {
            node = self.find_child(&node, item)?;
        }
        Some(node)
    }

    /// Number of inserted sets that contain every item of `properties`.
    pub fn support(&self, properties: &ItemList) -> u64 {
        if properties.is_empty() {
            return self.root_support() as u64;
        }

        let properties = properties.normalized();
        let Some(rarest) = properties.last() else {
            return self.root_support() as u64;
        };

        self.same_item_chain(rarest)
            .filter(|node| node.prefix_contains(&properties))
            .map(|node| node.support() as u64)
            .sum()
    }

    /// Resolve raw identifiers against the registry. Types are given without
    /// the `t#` prefix. Unknown identifiers are dropped.
    pub fn resolve<P, T>(&self, properties: &[P], types: &[T]) -> ItemList
    where
        P: AsRef<str>,
        T: AsRef<str>,
    {
        let props = properties.iter().filter_map(|p| self.registry.get(p.as_ref()));
        let types = types
            .iter()
            .filter_map(|t| self.registry.get(&format!("{}{}", TYPE_PREFIX, t.as_ref())));
        props.chain(types).collect()
    }

    /// Walk the whole tree once and summarise it.
    pub fn stats(&self) -> TreeStats {
        let (properties, types) = self.registry.count();
        let mut stats = TreeStats {
            // The root sentinel is registered like a property.
            properties: properties.saturating_sub(1),
            types,
            root_support: self.root_support(),
            ..TreeStats::default()
        };

        let mut stack: Vec<(Arc<SchemaNode>, usize)> = vec![(Arc::clone(&self.root), 0)];
        let mut children = Vec::new();
        while let Some((node, depth)) = stack.pop() {
            stats.nodes += 1;
            stats.max_depth = stats.max_depth.max(depth);
            children.clear();
            self.push_children(&node, &mut children);
            stack.extend(children.drain(..).map(|child| (child, depth + 1)));
        }
        stats
    }

    /// `(identifier, total count)` of every property, most frequent first.
    pub fn property_frequencies(&self) -> Vec<(String, u64)> {
        self.frequencies(|item| item.is_property() && !item.is_root())
    }

    /// `(type, total count)` of every type, prefix stripped, most frequent first.
    pub fn type_frequencies(&self) -> Vec<(String, u64)> {
        self.frequencies(Item::is_type)
            .into_iter()
            .map(|(iri, count)| (iri.trim_start_matches(TYPE_PREFIX).to_string(), count))
            .collect()
    }

    fn frequencies(&self, keep: impl Fn(&Item) -> bool) -> Vec<(String, u64)> {
        self.registry
            .items_by_rank()
            .into_iter()
            .filter(|item| keep(item))
            .map(|item| (item.iri().to_string(), item.total_count()))
            .collect()
    }
}

impl Default for SchemaTree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SchemaTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaTree")
            .field("items", &self.registry.len())
            .field("root_support", &self.root_support())
            .field("min_support", &self.min_support)
            .field("typed", &self.typed)
            .finish()
    }
}

#[inline]
fn search_children(children: &[Arc<SchemaNode>], item: &Item) -> Result<usize, usize> {
    children.binary_search_by_key(&item.id(), |child| child.item().id())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(tree: &SchemaTree, iris: &[&str]) -> ItemList {
        iris.iter().map(|iri| tree.intern(iri)).collect()
    }

    /// Build a tree from sets of identifiers with a proper two-pass ranking.
    fn build(sets: &[&[&str]]) -> SchemaTree {
        let tree = SchemaTree::new();
        for set in sets {
            for item in list(&tree, set).normalized() {
                item.increment();
            }
        }
        tree.update_sort_order().unwrap();
        for set in sets {
            tree.insert(&list(&tree, set));
        }
        tree
    }

    #[test]
    fn test_root_counts_every_insert() {
        let tree = build(&[&["a", "b"], &["a"], &[]]);
        assert_eq!(tree.root_support(), 3);
        assert_eq!(tree.support(&ItemList::new()), 3);
    }

    #[test]
    fn test_support_scenario() {
        let tree = build(&[&["A", "B"], &["A", "C"], &["A"]]);
        assert_eq!(tree.support(&list(&tree, &["A"])), 3);
        assert_eq!(tree.support(&list(&tree, &["A", "B"])), 1);
        assert_eq!(tree.support(&list(&tree, &["B", "C"])), 0);
    }

    #[test]
    fn test_support_ignores_input_order_and_duplicates() {
        let tree = build(&[&["x", "y", "z"], &["y", "z"], &["z"]]);
        let forward = tree.support(&list(&tree, &["y", "z"]));
        let backward = tree.support(&list(&tree, &["z", "y", "z"]));
        assert_eq!(forward, 2);
        assert_eq!(backward, 2);
    }

    #[test]
    fn test_children_sorted_by_item_id() {
        let tree = SchemaTree::new();
        for iri in ["p3", "p1", "p2", "p0"] {
            tree.insert(&list(&tree, &[iri]));
        }
        let ids: Vec<_> = tree.children(tree.root()).iter().map(|c| c.item().id()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn test_duplicate_items_in_one_set_counted_once() {
        let tree = build(&[&["a", "a", "b"]]);
        let path = tree.find_path(&list(&tree, &["a", "b"])).unwrap();
        assert_eq!(path.support(), 1);
        assert_eq!(tree.stats().nodes, 3);
    }

    #[test]
    fn test_same_item_chain_lists_all_nodes_newest_first() {
        let tree = build(&[&["a", "b", "c"], &["a", "c"], &["b", "c"], &["a", "b"], &["a"], &["b"]]);
        let c = tree.registry().get("c").unwrap();

        let chain: Vec<_> = tree.same_item_chain(&c).collect();
        assert_eq!(chain.len(), 3);
        assert!(chain.iter().all(|node| node.item().id() == c.id()));
        assert!(chain.windows(2).all(|pair| pair[0].id() > pair[1].id()));
    }

    #[test]
    fn test_get_or_create_child_is_idempotent() {
        let tree = SchemaTree::new();
        let item = tree.intern("p");
        let first = tree.get_or_create_child(tree.root(), &item);
        let second = tree.get_or_create_child(tree.root(), &item);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(tree.same_item_chain(&item).count(), 1);
    }

    #[test]
    fn test_update_sort_order_rejected_after_insert() {
        let tree = build(&[&["a"]]);
        assert_eq!(
            tree.update_sort_order(),
            Err(TreeError::NonEmptyTree { root_support: 1 })
        );
    }

    #[test]
    fn test_prefix_contains() {
        let tree = build(&[&["a", "b", "c"], &["a", "b"], &["a"]]);
        let leaf = tree.find_path(&list(&tree, &["a", "b", "c"])).unwrap();

        assert!(leaf.prefix_contains(&list(&tree, &["a", "c"]).normalized()));
        assert!(leaf.prefix_contains(&list(&tree, &["b", "c"]).normalized()));
        assert!(leaf.prefix_contains(&ItemList::new()));

        let middle = tree.find_path(&list(&tree, &["a", "b"])).unwrap();
        assert!(!middle.prefix_contains(&list(&tree, &["a", "c"]).normalized()));
    }

    #[test]
    fn test_resolve_drops_unknown_and_prefixes_types() {
        let tree = SchemaTree::new();
        tree.intern("p");
        tree.intern("t#Person");

        let resolved = tree.resolve(&["p", "unknown"], &["Person", "Nothing"]);
        let iris: Vec<_> = resolved.iter().map(|i| i.iri()).collect();
        assert_eq!(iris, vec!["p", "t#Person"]);
    }

    #[test]
    fn test_stats_and_frequencies() {
        let tree = build(&[&["a", "t#T"], &["a"], &["b"]]);
        let stats = tree.stats();
        assert_eq!(stats.root_support, 3);
        assert_eq!(stats.nodes, 4);
        assert_eq!(stats.max_depth, 2);
        assert_eq!(stats.properties, 2);
        assert_eq!(stats.types, 1);

        assert_eq!(
            tree.property_frequencies(),
            vec![("a".to_string(), 2), ("b".to_string(), 1)]
        );
        assert_eq!(tree.type_frequencies(), vec![("T".to_string(), 1)]);
    }
}
