//! Recommendation engine
//!
//! Turns a partial property set into candidates ranked by conditional
//! probability `P(candidate | input)`, estimated from the supports stored in
//! the tree.

use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use super::item::{Item, ItemId, ItemList};
use super::node::SchemaNode;
use super::schema_tree::SchemaTree;

/// One recommended item with its estimated probability.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub item: Arc<Item>,
    pub probability: f64,
}

impl RankedCandidate {
    pub fn iri(&self) -> &str {
        self.item.iri()
    }
}

/// Candidates ordered by descending probability.
#[derive(Debug, Clone, Default)]
pub struct Recommendations(Vec<RankedCandidate>);

impl Recommendations {
    pub fn new() -> Self {
        Recommendations(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RankedCandidate> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[RankedCandidate] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<RankedCandidate> {
        self.0
    }

    /// Average probability of the first ten candidates; missing slots count
    /// as zero.
    pub fn top10_avg_probability(&self) -> f32 {
        let sum: f64 = self.0.iter().take(10).map(|c| c.probability).sum();
        (sum / 10.0) as f32
    }

    pub fn truncated(mut self, limit: usize) -> Self {
        self.0.truncate(limit);
        self
    }

    /// Drop every candidate whose item is in `removed`.
    pub fn without(mut self, removed: &HashSet<ItemId>) -> Self {
        if !removed.is_empty() {
            self.0.retain(|c| !removed.contains(&c.item.id()));
        }
        self
    }

    pub fn probability_of(&self, iri: &str) -> Option<f64> {
        self.0.iter().find(|c| c.item.iri() == iri).map(|c| c.probability)
    }

    /// Descending probability; ties by ascending rank, then identifier.
    pub fn sort_descending(&mut self) {
        self.0.sort_by(compare_candidates);
    }
}

fn compare_candidates(a: &RankedCandidate, b: &RankedCandidate) -> CmpOrdering {
    b.probability
        .partial_cmp(&a.probability)
        .unwrap_or(CmpOrdering::Equal)
        .then_with(|| a.item.sort_order().cmp(&b.item.sort_order()))
        .then_with(|| a.item.iri().cmp(b.item.iri()))
}

impl fmt::Display for Recommendations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for candidate in &self.0 {
            writeln!(f, "{}: {}", candidate.item.iri(), candidate.probability)?;
        }
        Ok(())
    }
}

impl From<Vec<RankedCandidate>> for Recommendations {
    fn from(candidates: Vec<RankedCandidate>) -> Self {
        Recommendations(candidates)
    }
}

impl FromIterator<RankedCandidate> for Recommendations {
    fn from_iter<I: IntoIterator<Item = RankedCandidate>>(iter: I) -> Self {
        Recommendations(iter.into_iter().collect())
    }
}

impl IntoIterator for Recommendations {
    type Item = RankedCandidate;
    type IntoIter = std::vec::IntoIter<RankedCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Recommendations {
    type Item = &'a RankedCandidate;
    type IntoIter = std::slice::Iter<'a, RankedCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Anything that can rank candidates for a property set.
pub trait Recommender: Send + Sync {
    fn recommend(&self, properties: &ItemList) -> Recommendations;
}

impl Recommender for SchemaTree {
    fn recommend(&self, properties: &ItemList) -> Recommendations {
        SchemaTree::recommend(self, properties)
    }
}

impl<R: Recommender + ?Sized> Recommender for Arc<R> {
    fn recommend(&self, properties: &ItemList) -> Recommendations {
        (**self).recommend(properties)
    }
}

/// Recommends properties only; type items may appear in the input but are
/// never offered.
#[derive(Debug, Clone)]
pub struct PropertyRecommender {
    tree: Arc<SchemaTree>,
}

impl PropertyRecommender {
    pub fn new(tree: Arc<SchemaTree>) -> Self {
        PropertyRecommender { tree }
    }

    pub fn tree(&self) -> &Arc<SchemaTree> {
        &self.tree
    }
}

impl Recommender for PropertyRecommender {
    fn recommend(&self, properties: &ItemList) -> Recommendations {
        self.tree.recommend_properties(properties)
    }
}

impl SchemaTree {
    /// Rank every item (properties and types) that co-occurs with
    /// `properties`.
    pub fn recommend(&self, properties: &ItemList) -> Recommendations {
        self.recommend_filtered(properties, |_| true)
    }

    /// Like [`recommend`](Self::recommend), restricted to property candidates.
    pub fn recommend_properties(&self, properties: &ItemList) -> Recommendations {
        self.recommend_filtered(properties, Item::is_property)
    }

    fn recommend_filtered(&self, properties: &ItemList, keep: impl Fn(&Item) -> bool) -> Recommendations {
        if properties.is_empty() {
            return self.recommend_unconditional(keep);
        }

        let properties = properties.normalized();
        let Some(rarest) = properties.last() else {
            return Recommendations::new();
        };
        let input = properties.id_set();

        let mut tallies: HashMap<Arc<Item>, u64> = HashMap::new();
        let mut matched_support: u64 = 0;
        let mut stack: Vec<Arc<SchemaNode>> = Vec::new();

        for leaf in self.same_item_chain(rarest) {
            if !leaf.prefix_contains(&properties) {
                continue;
            }
            let support = leaf.support() as u64;
            matched_support += support;

            // Items on the prefix co-occur in every set counted at the leaf.
            for ancestor in leaf.path_to_root() {
                let item = ancestor.item();
                if !input.contains(&item.id()) && keep(item) {
                    *tallies.entry(Arc::clone(item)).or_default() += support;
                }
            }

            // Continuations contribute their own support.
            stack.clear();
            self.push_children(&leaf, &mut stack);
            while let Some(node) = stack.pop() {
                if keep(node.item()) {
                    *tallies.entry(Arc::clone(node.item())).or_default() += node.support() as u64;
                }
                self.push_children(&node, &mut stack);
            }
        }

        if matched_support == 0 {
            return Recommendations::new();
        }

        let total = matched_support as f64;
        // Nodes created by an in-flight insert can still hold a zero count.
        let mut ranked: Recommendations = tallies
            .into_iter()
            .filter(|(_, tally)| *tally > 0)
            .map(|(item, tally)| RankedCandidate {
                item,
                probability: tally as f64 / total,
            })
            .collect();
        ranked.sort_descending();
        ranked
    }

    /// Every observed item with its global frequency, in rank order.
    fn recommend_unconditional(&self, keep: impl Fn(&Item) -> bool) -> Recommendations {
        let root_support = self.root_support();
        if root_support == 0 {
            return Recommendations::new();
        }
        let total = root_support as f64;
        self.registry()
            .items_by_rank()
            .into_iter()
            .filter(|item| !item.is_root() && item.total_count() > 0 && keep(item))
            .map(|item| {
                let probability = (item.total_count() as f64 / total).min(1.0);
                RankedCandidate { item, probability }
            })
            .collect()
    }
}
