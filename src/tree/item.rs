//! Interned properties and types
//!
//! An [`Item`] is created once per distinct identifier and shared through
//! `Arc`. Its identity is the integer [`ItemId`] handed out by the registry;
//! equality, hashing and child ordering in the tree all use that id, never
//! the identifier string or the memory address.

use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::locks::Guarded;
use super::node::SchemaNode;

/// Prefix that marks an identifier as a type (class) rather than a property.
pub const TYPE_PREFIX: &str = "t#";

/// Identifier of the sentinel item labelling the root node.
pub const ROOT_IRI: &str = "root";

/// Stable identity of an item within one registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(pub(crate) u32);

impl ItemId {
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0 as u64
    }
}

/// A property or type identifier together with its global statistics.
pub struct Item {
    id: ItemId,
    iri: Box<str>,
    total_count: AtomicU64,
    sort_order: AtomicU32,
    /// Most recently created node labelled with this item.
    /// Guarded by the registry's item stripes.
    chain_head: Guarded<Weak<SchemaNode>>,
}

impl Item {
    pub(crate) fn new(id: ItemId, iri: &str, total_count: u64, sort_order: u32) -> Self {
        Item {
            id,
            iri: iri.into(),
            total_count: AtomicU64::new(total_count),
            sort_order: AtomicU32::new(sort_order),
            chain_head: Guarded::new(Weak::new()),
        }
    }

    #[inline]
    pub fn id(&self) -> ItemId {
        self.id
    }

    #[inline]
    pub fn iri(&self) -> &str {
        &self.iri
    }

    /// Global support: number of subjects this item was counted in.
    #[inline]
    pub fn total_count(&self) -> u64 {
        self.total_count.load(Ordering::Relaxed)
    }

    /// Position in the frequency ordering (0 = most frequent).
    #[inline]
    pub fn sort_order(&self) -> u32 {
        self.sort_order.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn increment(&self) {
        self.total_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_count(&self, n: u64) {
        self.total_count.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_sort_order(&self, rank: u32) {
        self.sort_order.store(rank, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn chain_head(&self) -> &Guarded<Weak<SchemaNode>> {
        &self.chain_head
    }

    pub fn is_type(&self) -> bool {
        self.iri.starts_with(TYPE_PREFIX)
    }

    pub fn is_property(&self) -> bool {
        !self.is_type()
    }

    pub fn is_root(&self) -> bool {
        &*self.iri == ROOT_IRI
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Item {}

impl Hash for Item {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("id", &self.id.0)
            .field("iri", &self.iri)
            .field("total_count", &self.total_count())
            .field("sort_order", &self.sort_order())
            .finish()
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x\t{} ({})", self.total_count(), self.iri, self.sort_order())
    }
}

/// An ordered list of shared items.
///
/// Most tree operations require the list sorted by rank with duplicates
/// removed; [`ItemList::sort_and_deduplicate`] establishes that form.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ItemList(Vec<Arc<Item>>);

impl ItemList {
    pub fn new() -> Self {
        ItemList(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        ItemList(Vec::with_capacity(capacity))
    }

    pub fn push(&mut self, item: Arc<Item>) {
        self.0.push(item);
    }

    pub fn extend_from(&mut self, other: &ItemList) {
        self.0.extend(other.0.iter().cloned());
    }

    /// Stable sort by rank: most frequent first, rarest last.
    pub fn sort_by_rank(&mut self) {
        self.0.sort_by_key(|item| item.sort_order());
    }

    /// In-place sort by rank followed by removal of repeated items.
    pub fn sort_and_deduplicate(&mut self) {
        self.sort_by_rank();
        self.0.dedup_by_key(|item| item.id());
    }

    /// Sorted, deduplicated copy.
    pub fn normalized(&self) -> ItemList {
        let mut list = self.clone();
        list.sort_and_deduplicate();
        list
    }

    pub fn id_set(&self) -> HashSet<ItemId> {
        self.0.iter().map(|item| item.id()).collect()
    }

    pub fn contains(&self, item: &Item) -> bool {
        self.0.iter().any(|i| i.id() == item.id())
    }

    /// `(properties, types)` contained in the list.
    pub fn count(&self) -> (usize, usize) {
        let types = self.0.iter().filter(|item| item.is_type()).count();
        (self.0.len() - types, types)
    }

    pub fn remove_types(&self) -> ItemList {
        self.0.iter().filter(|item| item.is_property()).cloned().collect()
    }

    pub fn into_vec(self) -> Vec<Arc<Item>> {
        self.0
    }
}

impl Deref for ItemList {
    type Target = [Arc<Item>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Arc<Item>>> for ItemList {
    fn from(items: Vec<Arc<Item>>) -> Self {
        ItemList(items)
    }
}

impl FromIterator<Arc<Item>> for ItemList {
    fn from_iter<I: IntoIterator<Item = Arc<Item>>>(iter: I) -> Self {
        ItemList(iter.into_iter().collect())
    }
}

impl IntoIterator for ItemList {
    type Item = Arc<Item>;
    type IntoIter = std::vec::IntoIter<Arc<Item>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a ItemList {
    type Item = &'a Arc<Item>;
    type IntoIter = std::slice::Iter<'a, Arc<Item>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Debug for ItemList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter().map(|item| item.iri())).finish()
    }
}

impl fmt::Display for ItemList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ ")?;
        for item in &self.0 {
            write!(f, "{} ", item.iri())?;
        }
        write!(f, "]")
    }
}
