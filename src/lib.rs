//! SchemaTree - property recommendation over a frequency-ordered prefix tree
//!
//! Every subject of a knowledge graph is reduced to the set of properties it
//! uses. Those sets are inserted into a prefix tree whose paths are ordered by
//! global item frequency, so common prefixes are shared. Given a partial
//! property set the tree estimates, for every other property, the conditional
//! probability that a subject with the input also uses it.
//!
//! # Architecture
//!
//! 1. **Tree** (`tree` module)
//!    - `ItemRegistry` interns identifiers and ranks them by frequency
//!    - `SchemaTree` stores the rank-ordered paths with striped locking
//!    - recommendation walks the same-item chain of the rarest input item
//!    - binary snapshots via `SchemaTree::save` / `SchemaTree::load`
//!
//! 2. **Backoff** (`backoff` module)
//!    - `DeleteLowFrequency` drops the rarest inputs in parallel attempts
//!    - `SplitPropertySet` recommends for sub-groups and merges the results
//!
//! 3. **Strategy** (`strategy` module)
//!    - `Workflow` runs the first layer whose `Condition` holds
//!    - layers come from named presets or a TOML file
//!
//! # Example
//!
//! ```rust
//! use schematree::tree::{ItemList, SchemaTree};
//!
//! let tree = SchemaTree::new();
//! for set in [&["name", "age"][..], &["name"], &["name", "email"]] {
//!     let list: ItemList = set.iter().map(|iri| tree.intern(iri)).collect();
//!     tree.insert(&list);
//! }
//!
//! let input: ItemList = vec![tree.intern("name")].into();
//! for candidate in tree.recommend(&input).iter() {
//!     println!("{}: {:.3}", candidate.iri(), candidate.probability);
//! }
//! ```

pub mod backoff;
pub mod ingest;
pub mod pool;
pub mod strategy;
pub mod tree;

pub use backoff::{DeleteLowFrequency, Merger, ResultCondition, SplitPropertySet, Splitter, StepSize};
pub use ingest::{IngestError, SubjectReader, SubjectSummary, TreeBuilder};
pub use strategy::{Assessment, Condition, ConfigError, Procedure, Workflow, WorkflowConfig};
pub use tree::{
    Item, ItemList, ItemRegistry, PropertyRecommender, RankedCandidate, Recommendations, Recommender, SchemaTree,
    SnapshotError, TreeConfig, TreeError,
};
