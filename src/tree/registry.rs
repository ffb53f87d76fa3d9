//! Item registry
//!
//! Interns identifier strings into shared [`Item`] records and assigns the
//! global frequency ranking.
//!
//! # Design
//!
//! - Lock-free lookups via DashMap; creation goes through the entry API so
//!   concurrent interning of one identifier converges on a single `Arc<Item>`
//! - Item ids come from a monotonic counter and never change
//! - The registry also owns the lock stripes that guard every item's
//!   same-item chain head

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::item::{Item, ItemId};
use super::locks::{LockStripes, StripeHash, DEFAULT_LOCK_STRIPES};

/// Thread-safe identifier interner.
pub struct ItemRegistry {
    items: DashMap<String, Arc<Item>>,
    next_id: AtomicU32,
    item_locks: LockStripes,
}

impl std::fmt::Debug for ItemRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemRegistry")
            .field("item_count", &self.items.len())
            .field("item_locks", &self.item_locks)
            .finish()
    }
}

impl Default for ItemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::with_lock_stripes(DEFAULT_LOCK_STRIPES, StripeHash::default())
    }

    pub fn with_lock_stripes(stripes: usize, hash: StripeHash) -> Self {
        Self {
            items: DashMap::new(),
            next_id: AtomicU32::new(0),
            item_locks: LockStripes::new(stripes, hash),
        }
    }

    /// Return the item for `iri`, creating it on first sight.
    ///
    /// A fresh item starts with a zero count and a provisional rank equal to
    /// its id, so lists stay sortable before the first [`rank_all`](Self::rank_all).
    pub fn intern(&self, iri: &str) -> Arc<Item> {
        if let Some(item) = self.items.get(iri) {
            return Arc::clone(item.value());
        }

        // Entry API re-checks under the shard lock; a racing creator wins once.
        let item = self.items.entry(iri.to_string()).or_insert_with(|| {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            Arc::new(Item::new(ItemId(id), iri, 0, id))
        });
        Arc::clone(item.value())
    }

    /// Look up an item without creating it.
    pub fn get(&self, iri: &str) -> Option<Arc<Item>> {
        self.items.get(iri).map(|e| Arc::clone(e.value()))
    }

    pub fn contains(&self, iri: &str) -> bool {
        self.items.contains_key(iri)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// `(properties, types)` known to the registry.
    pub fn count(&self) -> (usize, usize) {
        let types = self.items.iter().filter(|e| e.value().is_type()).count();
        (self.items.len() - types, types)
    }

    /// All items in unspecified order.
    pub fn items(&self) -> Vec<Arc<Item>> {
        self.items.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// All items ordered by their current rank.
    pub fn items_by_rank(&self) -> Vec<Arc<Item>> {
        let mut items = self.items();
        items.sort_by_key(|item| (item.sort_order(), item.id()));
        items
    }

    /// Assign ranks `0..N` by descending total count, ties broken by
    /// ascending identifier.
    ///
    /// Each rank is stored atomically, so a concurrent reader sees either the
    /// old or the new rank of an item. The pass as a whole is not atomic:
    /// callers must not insert into a tree while ranks change (see
    /// [`SchemaTree::update_sort_order`](super::SchemaTree::update_sort_order)).
    pub fn rank_all(&self) {
        let mut items = self.items();
        items.sort_by(|a, b| {
            b.total_count()
                .cmp(&a.total_count())
                .then_with(|| a.iri().cmp(b.iri()))
        });
        for (rank, item) in items.iter().enumerate() {
            item.set_sort_order(rank as u32);
        }
    }

    #[inline]
    pub(crate) fn item_locks(&self) -> &LockStripes {
        &self.item_locks
    }

    /// Register an item decoded from a snapshot with its stored statistics.
    pub(crate) fn insert_loaded(&self, iri: &str, total_count: u64, rank: u32) -> Arc<Item> {
        let item = self.intern(iri);
        item.set_sort_order(rank);
        item.add_count(total_count);
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_intern_deduplicates() {
        let registry = ItemRegistry::new();
        let first = registry.intern("p1");
        let second = registry.intern("p1");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ids_are_sequential() {
        let registry = ItemRegistry::new();
        let a = registry.intern("a");
        let b = registry.intern("b");
        assert_eq!(a.id().as_u32(), 0);
        assert_eq!(b.id().as_u32(), 1);
        assert_eq!(b.sort_order(), 1);
    }

    #[test]
    fn test_get_does_not_create() {
        let registry = ItemRegistry::new();
        assert!(registry.get("missing").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_intern_converges() {
        let registry = Arc::new(ItemRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..100)
                        .map(|i| registry.intern(&format!("p{}", i)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(registry.len(), 100);
        for other in &results[1..] {
            for (a, b) in results[0].iter().zip(other) {
                assert!(Arc::ptr_eq(a, b));
            }
        }
    }

    #[test]
    fn test_rank_all_orders_by_count_then_iri() {
        let registry = ItemRegistry::new();
        let rare = registry.intern("rare");
        let common = registry.intern("common");
        let tie_b = registry.intern("tie-b");
        let tie_a = registry.intern("tie-a");

        for _ in 0..5 {
            common.increment();
        }
        for _ in 0..2 {
            tie_a.increment();
            tie_b.increment();
        }
        rare.increment();

        registry.rank_all();

        assert_eq!(common.sort_order(), 0);
        assert_eq!(tie_a.sort_order(), 1);
        assert_eq!(tie_b.sort_order(), 2);
        assert_eq!(rare.sort_order(), 3);
    }

    #[test]
    fn test_rank_all_is_idempotent() {
        let registry = ItemRegistry::new();
        for (i, iri) in ["x", "y", "z", "w"].iter().enumerate() {
            let item = registry.intern(iri);
            for _ in 0..(i % 2) {
                item.increment();
            }
        }

        registry.rank_all();
        let first: Vec<_> = registry.items_by_rank().iter().map(|i| (i.id(), i.sort_order())).collect();
        registry.rank_all();
        let second: Vec<_> = registry.items_by_rank().iter().map(|i| (i.id(), i.sort_order())).collect();

        assert_eq!(first, second);
    }

    #[test]
    fn test_count_splits_types() {
        let registry = ItemRegistry::new();
        registry.intern("p");
        registry.intern("t#T");
        assert_eq!(registry.count(), (1, 1));
    }
}
