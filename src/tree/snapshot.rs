//! Binary snapshots of a schema tree
//!
//! Layout (all integers are varints):
//!
//! ```text
//! magic "SCHT" | version | flags (u8, bit 0 = typed)
//! item count | (identifier, total count)* in rank order
//! min support
//! nodes in pre-order: (item index, support, child count)*
//! ```
//!
//! The item index of a node is its item's position in the item list. Decoding
//! rebuilds the same-item chains by prepending every decoded node to its
//! item's chain, exactly as a live insert does.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use super::item::{Item, ItemId, ROOT_IRI};
use super::node::SchemaNode;
use super::registry::ItemRegistry;
use super::schema_tree::{SchemaTree, TreeConfig};
use super::varint::{read_string, read_varint, write_string, write_varint};

const MAGIC: &[u8; 4] = b"SCHT";
const FORMAT_VERSION: u64 = 1;
const FLAG_TYPED: u8 = 0x01;
const MAX_IRI_LEN: usize = 1 << 20;

/// Errors raised while writing or reading a snapshot.
#[derive(Debug)]
pub enum SnapshotError {
    Io(io::Error),
    BadMagic,
    UnsupportedVersion(u64),
    Truncated,
    Corrupt(String),
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::Io(e) => write!(f, "snapshot I/O error: {}", e),
            SnapshotError::BadMagic => write!(f, "not a schema tree snapshot"),
            SnapshotError::UnsupportedVersion(v) => write!(
                f,
                "unsupported snapshot version {} (expected {})",
                v, FORMAT_VERSION
            ),
            SnapshotError::Truncated => write!(f, "snapshot is truncated"),
            SnapshotError::Corrupt(msg) => write!(f, "corrupt snapshot: {}", msg),
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SnapshotError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for SnapshotError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => SnapshotError::Truncated,
            io::ErrorKind::InvalidData => SnapshotError::Corrupt(e.to_string()),
            _ => SnapshotError::Io(e),
        }
    }
}

impl SchemaTree {
    /// Write a snapshot to `path`.
    ///
    /// Not atomic: a failed write removes the partial file, but a crash
    /// mid-write leaves a file that fails to load.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        let start = Instant::now();
        info!(target: "schematree::snapshot", path = %path.display(), "saving snapshot");

        let result = File::create(path).map_err(SnapshotError::Io).and_then(|file| {
            let mut writer = BufWriter::new(file);
            let nodes = self.write_to(&mut writer)?;
            writer.flush()?;
            Ok(nodes)
        });

        match result {
            Ok(nodes) => {
                info!(
                    target: "schematree::snapshot",
                    path = %path.display(),
                    items = self.registry().len(),
                    nodes,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "snapshot saved"
                );
                Ok(())
            }
            Err(e) => {
                let _ = fs::remove_file(path);
                Err(e)
            }
        }
    }

    /// Read a snapshot from `path` with default lock striping.
    pub fn load(path: impl AsRef<Path>) -> Result<SchemaTree, SnapshotError> {
        Self::load_with_config(path, TreeConfig::default())
    }

    /// Read a snapshot from `path`. Lock striping comes from `config`; the
    /// typed flag and min support come from the file.
    pub fn load_with_config(path: impl AsRef<Path>, config: TreeConfig) -> Result<SchemaTree, SnapshotError> {
        let path = path.as_ref();
        let start = Instant::now();
        info!(target: "schematree::snapshot", path = %path.display(), "loading snapshot");

        let file = File::open(path).map_err(SnapshotError::Io)?;
        let tree = Self::read_from_with_config(&mut BufReader::new(file), config)?;

        info!(
            target: "schematree::snapshot",
            path = %path.display(),
            items = tree.registry().len(),
            root_support = tree.root_support(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "snapshot loaded"
        );
        Ok(tree)
    }

    /// Encode the tree. Returns the number of nodes written.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<usize, SnapshotError> {
        writer.write_all(MAGIC)?;
        write_varint(writer, FORMAT_VERSION)?;
        writer.write_all(&[if self.is_typed() { FLAG_TYPED } else { 0 }])?;

        let items = self.registry().items_by_rank();
        let index: HashMap<ItemId, u64> = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.id(), i as u64))
            .collect();

        write_varint(writer, items.len() as u64)?;
        for item in &items {
            write_string(writer, item.iri())?;
            write_varint(writer, item.total_count())?;
        }
        write_varint(writer, self.min_support() as u64)?;

        let mut written = 0;
        let mut stack = vec![Arc::clone(self.root())];
        while let Some(node) = stack.pop() {
            let children = self.children(&node);
            let item_index = index.get(&node.item().id()).copied().ok_or_else(|| {
                SnapshotError::Corrupt(format!("item {} missing from registry", node.item().iri()))
            })?;
            write_varint(writer, item_index)?;
            write_varint(writer, node.support() as u64)?;
            write_varint(writer, children.len() as u64)?;
            written += 1;
            // Reversed so the first child is popped (and written) first.
            stack.extend(children.into_iter().rev());
        }
        Ok(written)
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<SchemaTree, SnapshotError> {
        Self::read_from_with_config(reader, TreeConfig::default())
    }

    pub fn read_from_with_config<R: Read>(reader: &mut R, config: TreeConfig) -> Result<SchemaTree, SnapshotError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let version = read_varint(reader)?;
        if version != FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        let mut flags = [0u8; 1];
        reader.read_exact(&mut flags)?;

        let registry = ItemRegistry::with_lock_stripes(config.lock_stripes, config.stripe_hash);
        let item_count = read_varint(reader)?;
        let mut items: Vec<Arc<Item>> = Vec::with_capacity(item_count.min(1 << 16) as usize);
        for rank in 0..item_count {
            let iri = read_string(reader, MAX_IRI_LEN)?;
            let total_count = read_varint(reader)?;
            if registry.contains(&iri) {
                return Err(SnapshotError::Corrupt(format!("duplicate item {}", iri)));
            }
            let rank = u32::try_from(rank)
                .map_err(|_| SnapshotError::Corrupt("too many items".to_string()))?;
            items.push(registry.insert_loaded(&iri, total_count, rank));
        }

        let min_support = read_u32(reader, "min support")?;

        let (root_index, root_support, root_children) = read_node_header(reader)?;
        let mut root_item = lookup_item(&items, root_index)?;
        if root_item.iri() != ROOT_IRI {
            warn!(
                target: "schematree::snapshot",
                found = root_item.iri(),
                "root node carries a regular item (legacy snapshot); relabelling it, root counts may be off"
            );
            root_item = registry.get(ROOT_IRI).unwrap_or_else(|| {
                registry.insert_loaded(ROOT_IRI, 0, items.len() as u32)
            });
        }

        let tree = SchemaTree::from_parts(
            registry,
            root_item,
            TreeConfig {
                min_support,
                typed: flags[0] & FLAG_TYPED != 0,
                ..config
            },
        );
        tree.root().set_support(root_support);

        // (parent, children still to decode)
        let mut stack: Vec<(Arc<SchemaNode>, u64)> = Vec::new();
        if root_children > 0 {
            stack.push((Arc::clone(tree.root()), root_children));
        }
        while let Some((parent, remaining)) = stack.last_mut() {
            if *remaining == 0 {
                stack.pop();
                continue;
            }
            *remaining -= 1;
            let parent = Arc::clone(parent);

            let (index, support, children) = read_node_header(reader)?;
            let item = lookup_item(&items, index)?;
            let child = tree.attach_loaded_child(&parent, &item, support).ok_or_else(|| {
                SnapshotError::Corrupt(format!("node {} has two children labelled {}", parent.id(), item.iri()))
            })?;
            if children > 0 {
                stack.push((child, children));
            }
        }

        let mut trailing = [0u8; 1];
        if reader.read(&mut trailing)? != 0 {
            return Err(SnapshotError::Corrupt("trailing bytes after tree".to_string()));
        }
        Ok(tree)
    }
}

fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32, SnapshotError> {
    let value = read_varint(reader)?;
    u32::try_from(value).map_err(|_| SnapshotError::Corrupt(format!("{} {} out of range", what, value)))
}

fn read_node_header<R: Read>(reader: &mut R) -> Result<(u64, u32, u64), SnapshotError> {
    let index = read_varint(reader)?;
    let support = read_u32(reader, "support")?;
    let children = read_varint(reader)?;
    Ok((index, support, children))
}

fn lookup_item(items: &[Arc<Item>], index: u64) -> Result<Arc<Item>, SnapshotError> {
    usize::try_from(index)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .ok_or_else(|| SnapshotError::Corrupt(format!("item index {} out of range", index)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::item::ItemList;
    use crate::tree::varint::encode_varint;
    use std::io::Cursor;

    fn sample_tree() -> SchemaTree {
        let tree = SchemaTree::with_config(TreeConfig {
            typed: true,
            ..TreeConfig::default()
        });
        let sets: [&[&str]; 4] = [&["a", "b", "t#T"], &["a", "c"], &["a"], &["b", "c"]];
        for set in &sets {
            for iri in *set {
                tree.intern(iri).increment();
            }
        }
        tree.update_sort_order().unwrap();
        for set in &sets {
            let list: ItemList = set.iter().map(|iri| tree.intern(iri)).collect();
            tree.insert(&list);
        }
        tree
    }

    fn encode(tree: &SchemaTree) -> Vec<u8> {
        let mut buf = Vec::new();
        tree.write_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_roundtrip_preserves_counts_and_chains() {
        let tree = sample_tree();
        let loaded = SchemaTree::read_from(&mut Cursor::new(encode(&tree))).unwrap();

        assert_eq!(loaded.root_support(), 4);
        assert!(loaded.is_typed());
        assert_eq!(loaded.stats(), tree.stats());
        for iri in ["a", "b", "c", "t#T"] {
            let original = tree.registry().get(iri).unwrap();
            let decoded = loaded.registry().get(iri).unwrap();
            assert_eq!(decoded.total_count(), original.total_count());
            assert_eq!(decoded.sort_order(), original.sort_order());
            assert_eq!(
                loaded.same_item_chain(&decoded).count(),
                tree.same_item_chain(&original).count()
            );
        }

        let c = loaded.registry().get("c").unwrap();
        let a = loaded.registry().get("a").unwrap();
        assert_eq!(loaded.support(&ItemList::from(vec![a, c])), 1);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encode(&sample_tree());
        bytes[0] = b'X';
        assert!(matches!(
            SchemaTree::read_from(&mut Cursor::new(bytes)),
            Err(SnapshotError::BadMagic)
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = encode(&sample_tree());
        bytes[4] = 9;
        assert!(matches!(
            SchemaTree::read_from(&mut Cursor::new(bytes)),
            Err(SnapshotError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_truncated() {
        let bytes = encode(&sample_tree());
        for cut in [3, 8, bytes.len() / 2, bytes.len() - 1] {
            let result = SchemaTree::read_from(&mut Cursor::new(&bytes[..cut]));
            assert!(matches!(result, Err(SnapshotError::Truncated)), "cut at {}", cut);
        }
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = encode(&sample_tree());
        bytes.push(0);
        assert!(matches!(
            SchemaTree::read_from(&mut Cursor::new(bytes)),
            Err(SnapshotError::Corrupt(_))
        ));
    }

    #[test]
    fn test_legacy_root_is_relabelled() {
        // One item "p" and a root node labelled with it.
        let mut bytes = MAGIC.to_vec();
        encode_varint(&mut bytes, FORMAT_VERSION);
        bytes.push(0);
        encode_varint(&mut bytes, 1);
        encode_varint(&mut bytes, 1);
        bytes.push(b'p');
        encode_varint(&mut bytes, 2);
        encode_varint(&mut bytes, 1); // min support
        encode_varint(&mut bytes, 0); // root: item 0
        encode_varint(&mut bytes, 2);
        encode_varint(&mut bytes, 1);
        encode_varint(&mut bytes, 0); // child: item 0
        encode_varint(&mut bytes, 2);
        encode_varint(&mut bytes, 0);

        let tree = SchemaTree::read_from(&mut Cursor::new(bytes)).unwrap();
        assert!(tree.root().item().is_root());
        assert_eq!(tree.root_support(), 2);
        let p = tree.registry().get("p").unwrap();
        assert_eq!(tree.support(&ItemList::from(vec![p])), 2);
    }

    #[test]
    fn test_item_index_out_of_range() {
        let mut bytes = MAGIC.to_vec();
        encode_varint(&mut bytes, FORMAT_VERSION);
        bytes.push(0);
        encode_varint(&mut bytes, 0); // no items
        encode_varint(&mut bytes, 1);
        encode_varint(&mut bytes, 5); // root refers to item 5
        encode_varint(&mut bytes, 0);
        encode_varint(&mut bytes, 0);

        assert!(matches!(
            SchemaTree::read_from(&mut Cursor::new(bytes)),
            Err(SnapshotError::Corrupt(_))
        ));
    }
}
