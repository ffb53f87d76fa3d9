//! Striped read/write locks for tree state
//!
//! Nodes and items do not own a lock each. Every guarded value lives in a
//! [`Guarded`] cell and is mapped to one of a fixed number of stripes by hashing
//! the stable integer id of its owner. Unrelated inserts therefore proceed in
//! parallel while the per-node footprint stays at a plain `Vec`.
//!
//! # Invariant
//!
//! A given cell must always be accessed with the same id. The tree uses the
//! node id for child lists and the item id for same-item chain heads, and those
//! ids never change after construction.
//!
//! Closures passed to [`LockStripes::read`] and [`LockStripes::write`] must not
//! acquire another stripe of the same [`LockStripes`]: two owners can share a
//! stripe and `parking_lot` locks are not reentrant.

use std::cell::UnsafeCell;
use std::fmt;

use parking_lot::RwLock;

/// Default stripe count. A prime keeps sequential ids from clustering.
pub const DEFAULT_LOCK_STRIPES: usize = 97;

/// How an owner id is mapped onto a stripe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StripeHash {
    /// `id % stripes`. Good with a prime stripe count.
    #[default]
    Modulo,
    /// Multiplicative (Fibonacci) hashing, then `% stripes`. Spreads ids well
    /// for power-of-two stripe counts.
    Fibonacci,
}

impl StripeHash {
    #[inline]
    fn index(self, id: u64, stripes: usize) -> usize {
        let stripes = stripes as u64;
        match self {
            StripeHash::Modulo => (id % stripes) as usize,
            StripeHash::Fibonacci => {
                let mixed = id.wrapping_mul(0x9E37_79B9_7F4A_7C15);
                ((mixed >> 32) % stripes) as usize
            }
        }
    }
}

/// A fixed array of read/write locks selected by hashed owner id.
pub struct LockStripes {
    stripes: Box<[RwLock<()>]>,
    hash: StripeHash,
}

impl LockStripes {
    /// Create `count` stripes (at least one).
    pub fn new(count: usize, hash: StripeHash) -> Self {
        let stripes = (0..count.max(1)).map(|_| RwLock::new(())).collect();
        Self { stripes, hash }
    }

    /// Number of stripes.
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    pub fn hash(&self) -> StripeHash {
        self.hash
    }

    #[inline]
    fn stripe(&self, id: u64) -> &RwLock<()> {
        &self.stripes[self.hash.index(id, self.stripes.len())]
    }

    /// Run `f` with shared access to `cell`, holding the read lock of the
    /// stripe selected by `id`.
    #[inline]
    pub(crate) fn read<T, R>(&self, id: u64, cell: &Guarded<T>, f: impl FnOnce(&T) -> R) -> R {
        let _guard = self.stripe(id).read();
        // SAFETY: `cell` is only ever accessed through the stripe chosen by its
        // owner's id (module invariant); the read guard excludes writers.
        f(unsafe { &*cell.value.get() })
    }

    /// Run `f` with exclusive access to `cell`, holding the write lock of the
    /// stripe selected by `id`.
    #[inline]
    pub(crate) fn write<T, R>(&self, id: u64, cell: &Guarded<T>, f: impl FnOnce(&mut T) -> R) -> R {
        let _guard = self.stripe(id).write();
        // SAFETY: as in `read`; the write guard excludes all other access.
        f(unsafe { &mut *cell.value.get() })
    }
}

impl Default for LockStripes {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_STRIPES, StripeHash::default())
    }
}

impl fmt::Debug for LockStripes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockStripes")
            .field("stripes", &self.stripes.len())
            .field("hash", &self.hash)
            .finish()
    }
}

/// A value whose synchronisation is provided by an external [`LockStripes`].
pub struct Guarded<T> {
    value: UnsafeCell<T>,
}

// SAFETY: all shared access is serialised by the owning stripe lock.
unsafe impl<T: Send> Send for Guarded<T> {}
unsafe impl<T: Send + Sync> Sync for Guarded<T> {}

impl<T> Guarded<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
        }
    }

    /// Exclusive access without locking; the borrow checker proves uniqueness.
    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

impl<T: Default> Default for Guarded<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
