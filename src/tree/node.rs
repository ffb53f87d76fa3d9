//! Schema tree nodes
//!
//! A node is reached by inserting one item after a specific prefix. Parents
//! own their children through `Arc`; the parent link and the same-item chain
//! link are `Weak`, so the tree has exactly one owning path to every node and
//! dropping the root frees the whole tree.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use tracing::warn;

use super::item::{Item, ItemList};
use super::locks::Guarded;

/// One position in the frequent-pattern trie.
pub struct SchemaNode {
    id: u64,
    item: Arc<Item>,
    parent: Weak<SchemaNode>,
    /// Next older node carrying the same item. Fixed at creation.
    next_same_item: Weak<SchemaNode>,
    /// Children sorted by item id. Guarded by the tree's node stripes.
    children: Guarded<Vec<Arc<SchemaNode>>>,
    support: AtomicU32,
}

impl SchemaNode {
    pub(crate) fn new_root(item: Arc<Item>) -> Self {
        SchemaNode {
            id: 0,
            item,
            parent: Weak::new(),
            next_same_item: Weak::new(),
            children: Guarded::new(Vec::new()),
            support: AtomicU32::new(0),
        }
    }

    pub(crate) fn new_child(
        id: u64,
        item: Arc<Item>,
        parent: &Arc<SchemaNode>,
        next_same_item: Weak<SchemaNode>,
        support: u32,
    ) -> Self {
        SchemaNode {
            id,
            item,
            parent: Arc::downgrade(parent),
            next_same_item,
            children: Guarded::new(Vec::new()),
            support: AtomicU32::new(support),
        }
    }

    /// Creation-order id; the root is 0.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn item(&self) -> &Arc<Item> {
        &self.item
    }

    /// Number of inserted sets whose sorted path passes through this node.
    #[inline]
    pub fn support(&self) -> u32 {
        self.support.load(Ordering::Relaxed)
    }

    pub(crate) fn set_support(&self, support: u32) {
        self.support.store(support, Ordering::Relaxed);
    }

    pub(crate) fn increment_support(&self) {
        let previous = self.support.fetch_add(1, Ordering::Relaxed);
        if previous == u32::MAX {
            warn!(
                target: "schematree::tree",
                node = self.id,
                item = self.item.iri(),
                "support counter overflowed; counts on this path are no longer reliable"
            );
        }
    }

    pub fn parent(&self) -> Option<Arc<SchemaNode>> {
        self.parent.upgrade()
    }

    pub fn is_root(&self) -> bool {
        self.id == 0
    }

    pub fn next_same_item(&self) -> Option<Arc<SchemaNode>> {
        self.next_same_item.upgrade()
    }

    #[inline]
    pub(crate) fn children_cell(&self) -> &Guarded<Vec<Arc<SchemaNode>>> {
        &self.children
    }

    /// This node and its ancestors up to, but excluding, the root.
    pub fn path_to_root(self: &Arc<Self>) -> PathToRoot {
        PathToRoot {
            next: Some(Arc::clone(self)),
        }
    }

    /// Whether the path from the root to this node contains every item of
    /// `properties`, which must be sorted by rank.
    ///
    /// Walks upwards matching the rarest expected item first. Ranks never
    /// increase towards the root, so meeting an ancestor ranked before the
    /// expected item means the item cannot appear further up.
    pub fn prefix_contains(self: &Arc<Self>, properties: &ItemList) -> bool {
        let Some(mut expected) = properties.len().checked_sub(1) else {
            return true;
        };

        for node in self.path_to_root() {
            let want = &properties[expected];
            if node.item.sort_order() < want.sort_order() {
                return false;
            }
            if node.item.id() == want.id() {
                if expected == 0 {
                    return true;
                }
                expected -= 1;
            }
        }
        false
    }
}

impl std::fmt::Debug for SchemaNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaNode")
            .field("id", &self.id)
            .field("item", &self.item.iri())
            .field("support", &self.support())
            .finish()
    }
}

/// Iterator from a node towards the root. See [`SchemaNode::path_to_root`].
pub struct PathToRoot {
    next: Option<Arc<SchemaNode>>,
}

impl Iterator for PathToRoot {
    type Item = Arc<SchemaNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next.take()?;
        // The root has no parent and is never yielded.
        let parent = node.parent()?;
        self.next = Some(parent);
        Some(node)
    }
}

/// Iterator over a same-item chain, newest node first.
pub struct SameItemChain {
    next: Option<Arc<SchemaNode>>,
}

impl SameItemChain {
    pub(crate) fn starting_at(head: Option<Arc<SchemaNode>>) -> Self {
        SameItemChain { next: head }
    }
}

impl Iterator for SameItemChain {
    type Item = Arc<SchemaNode>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.next.take()?;
        self.next = node.next_same_item();
        Some(node)
    }
}
