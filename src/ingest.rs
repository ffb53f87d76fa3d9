//! Subject ingestion
//!
//! A subject summary is the property multiset of one entity, the unit the
//! tree absorbs in one insert. [`SubjectReader`] reads a simple line format:
//!
//! ```text
//! # comment
//! subject-1<TAB>http://ex.org/name http://ex.org/age t#http://ex.org/Person
//! http://ex.org/name http://ex.org/email
//! ```
//!
//! One subject per line; an optional subject label ends at the first tab;
//! identifiers are whitespace separated; `t#` marks a type.
//!
//! [`TreeBuilder`] builds a tree in two passes: the first counts every item
//! and fixes the ranking, the second inserts all subjects in parallel.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{info, warn};

use crate::tree::{Item, ItemList, ItemRegistry, SchemaTree, TreeConfig, TreeError, TYPE_PREFIX};

#[derive(Debug)]
pub enum IngestError {
    Io(io::Error),
    Tree(TreeError),
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Io(e) => write!(f, "failed to read subjects: {}", e),
            IngestError::Tree(e) => write!(f, "failed to build tree: {}", e),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::Io(e) => Some(e),
            IngestError::Tree(e) => Some(e),
        }
    }
}

impl From<io::Error> for IngestError {
    fn from(e: io::Error) -> Self {
        IngestError::Io(e)
    }
}

impl From<TreeError> for IngestError {
    fn from(e: TreeError) -> Self {
        IngestError::Tree(e)
    }
}

/// All properties and types of one subject with their occurrence counts.
#[derive(Debug, Clone, Default)]
pub struct SubjectSummary {
    pub subject: String,
    pub properties: HashMap<Arc<Item>, u32>,
}

impl SubjectSummary {
    pub fn new(subject: impl Into<String>) -> Self {
        SubjectSummary {
            subject: subject.into(),
            properties: HashMap::new(),
        }
    }

    pub fn add(&mut self, item: Arc<Item>) {
        *self.properties.entry(item).or_insert(0) += 1;
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Distinct items, sorted by rank.
    pub fn item_list(&self) -> ItemList {
        let mut list: ItemList = self.properties.keys().cloned().collect();
        list.sort_by_rank();
        list
    }
}

/// One parsed line, not yet resolved against a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSubject {
    pub subject: String,
    pub identifiers: Vec<String>,
}

impl RawSubject {
    /// Intern the identifiers. Types are dropped unless `typed`.
    pub fn summarize(&self, registry: &ItemRegistry, typed: bool) -> SubjectSummary {
        let mut summary = SubjectSummary::new(self.subject.clone());
        for iri in &self.identifiers {
            if !typed && iri.starts_with(TYPE_PREFIX) {
                continue;
            }
            summary.add(registry.intern(iri));
        }
        summary
    }
}

/// Iterator over the subjects of a line-oriented source.
pub struct SubjectReader<R> {
    reader: R,
    line: String,
    line_number: u64,
}

impl<R: BufRead> SubjectReader<R> {
    pub fn new(reader: R) -> Self {
        SubjectReader {
            reader,
            line: String::new(),
            line_number: 0,
        }
    }
}

impl SubjectReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> Iterator for SubjectReader<R> {
    type Item = io::Result<RawSubject>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(e)),
            }
            self.line_number += 1;

            let line = self.line.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }

            let (subject, rest) = match line.split_once('\t') {
                Some((subject, rest)) => (subject.trim().to_string(), rest),
                None => (format!("line-{}", self.line_number), line),
            };
            let identifiers = rest.split_whitespace().map(str::to_string).collect();
            return Some(Ok(RawSubject { subject, identifiers }));
        }
    }
}

/// Insert summaries concurrently.
pub fn insert_parallel(tree: &SchemaTree, summaries: &[SubjectSummary]) {
    summaries.par_iter().for_each(|summary| tree.insert_summary(summary));
}

/// Two-pass tree construction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeBuilder {
    config: TreeConfig,
    first_n: Option<usize>,
}

impl TreeBuilder {
    pub fn new(config: TreeConfig) -> Self {
        TreeBuilder { config, first_n: None }
    }

    /// Only read the first `n` subjects in each pass.
    pub fn first_n(mut self, n: usize) -> Self {
        self.first_n = Some(n);
        self
    }

    pub fn build_from_path(&self, path: impl AsRef<Path>) -> Result<SchemaTree, IngestError> {
        let path = path.as_ref();
        self.build_with(|| SubjectReader::open(path))
    }

    pub fn build_from_str(&self, content: &str) -> Result<SchemaTree, IngestError> {
        self.build_with(|| Ok(SubjectReader::new(content.as_bytes())))
    }

    /// Build from a source that `open` can produce twice.
    pub fn build_with<F, R>(&self, open: F) -> Result<SchemaTree, IngestError>
    where
        F: Fn() -> io::Result<SubjectReader<R>>,
        R: BufRead + Send,
    {
        let tree = SchemaTree::with_config(self.config);
        let typed = self.config.typed;
        let limit = self.first_n.unwrap_or(usize::MAX);

        // Pass 1: intern and count.
        let start = Instant::now();
        let subjects = AtomicU64::new(0);
        open()?.take(limit).par_bridge().try_for_each(|raw| -> io::Result<()> {
            let summary = raw?.summarize(tree.registry(), typed);
            for item in summary.properties.keys() {
                item.increment();
            }
            subjects.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })?;
        let subjects = subjects.into_inner();
        let (properties, types) = tree.registry().count();
        info!(
            target: "schematree::ingest",
            subjects,
            properties,
            types,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "first pass complete"
        );
        if subjects > u32::MAX as u64 {
            warn!(
                target: "schematree::ingest",
                subjects,
                limit = u32::MAX,
                "more subjects than node support counters can track"
            );
        }

        tree.update_sort_order()?;

        // Pass 2: insert.
        let start = Instant::now();
        open()?.take(limit).par_bridge().try_for_each(|raw| -> io::Result<()> {
            tree.insert_summary(&raw?.summarize(tree.registry(), typed));
            Ok(())
        })?;
        info!(
            target: "schematree::ingest",
            root_support = tree.root_support(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "second pass complete"
        );

        Ok(tree)
    }
}
