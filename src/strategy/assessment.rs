//! Per-request assessment
//!
//! Holds the input of one recommendation request. Conditions and the direct
//! procedure share a single direct recommendation when caching is enabled.

use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

use crate::tree::{ItemList, PropertyRecommender, Recommendations, Recommender, SchemaTree};

pub struct Assessment {
    properties: ItemList,
    recommender: Arc<dyn Recommender>,
    use_cache: bool,
    cached: OnceLock<Recommendations>,
    unresolved: bool,
}

impl Assessment {
    /// With `use_cache`, the direct recommendation is computed at most once;
    /// the properties must not change afterwards.
    pub fn new(properties: ItemList, recommender: Arc<dyn Recommender>, use_cache: bool) -> Self {
        Assessment {
            properties,
            recommender,
            use_cache,
            cached: OnceLock::new(),
            unresolved: false,
        }
    }

    /// Resolve raw identifiers against `tree` and recommend properties only.
    ///
    /// Unknown identifiers are dropped. If identifiers were given but none is
    /// known, every recommendation for this assessment is empty; only an
    /// input that was empty to begin with gets the unconditional ranking.
    pub fn from_input<P, T>(tree: &Arc<SchemaTree>, properties: &[P], types: &[T], use_cache: bool) -> Self
    where
        P: AsRef<str>,
        T: AsRef<str>,
    {
        let list = tree.resolve(properties, types);
        let unresolved = list.is_empty() && !(properties.is_empty() && types.is_empty());
        let mut asm = Self::new(list, Arc::new(PropertyRecommender::new(Arc::clone(tree))), use_cache);
        asm.unresolved = unresolved;
        asm
    }

    /// Identifiers were supplied but none of them is known.
    pub fn is_unresolved(&self) -> bool {
        self.unresolved
    }

    pub fn properties(&self) -> &ItemList {
        &self.properties
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn recommender(&self) -> &Arc<dyn Recommender> {
        &self.recommender
    }

    /// Direct recommendation for the input.
    pub fn recommendations(&self) -> Cow<'_, Recommendations> {
        if self.unresolved {
            Cow::Owned(Recommendations::new())
        } else if self.use_cache {
            Cow::Borrowed(
                self.cached
                    .get_or_init(|| self.recommender.recommend(&self.properties)),
            )
        } else {
            Cow::Owned(self.recommender.recommend(&self.properties))
        }
    }
}

impl std::fmt::Debug for Assessment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assessment")
            .field("properties", &self.properties)
            .field("use_cache", &self.use_cache)
            .field("unresolved", &self.unresolved)
            .field("cached", &self.cached.get().is_some())
            .finish()
    }
}
