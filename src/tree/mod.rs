//! Item registry, schema tree, recommendation engine and snapshot codec
//!
//! The tree stores, for every inserted property set, one root-to-node path
//! ordered by item frequency. See [`SchemaTree`] for the locking model.

pub mod item;
pub mod locks;
pub mod node;
pub mod recommend;
pub mod registry;
pub mod schema_tree;
pub mod snapshot;
pub mod varint;

pub use item::{Item, ItemId, ItemList, ROOT_IRI, TYPE_PREFIX};
pub use locks::{LockStripes, StripeHash, DEFAULT_LOCK_STRIPES};
pub use node::{PathToRoot, SameItemChain, SchemaNode};
pub use recommend::{PropertyRecommender, RankedCandidate, Recommendations, Recommender};
pub use registry::ItemRegistry;
pub use schema_tree::{SchemaTree, TreeConfig, TreeError, TreeStats};
pub use snapshot::SnapshotError;
