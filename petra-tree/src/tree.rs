//! Tree metadata: the columnar dataset descriptor.
//!
//! A tree owns its branches in an arena (`Vec<Branch>` + name index);
//! cross-references between leaves — a variable leaf naming its count leaf —
//! are stored as names and resolved through the tree, so there are no
//! ownership cycles. The whole descriptor persists as a generic record
//! (`PTree` / `PBranch` / `PLeaf` / `PBasketRange` streamer infos travel in
//! the file), which makes a tree discoverable and decodable like any other
//! stored object.

use crate::basket::BASKET_CLASS;
use crate::branch::{Branch, BRANCH_CLASS};
use crate::leaf::{Leaf, LEAF_CLASS};
use petra_core::block::Settings;
use petra_core::error::{Error, Result};
use petra_schema::{
    BasicType, ElementShape, Record, Registry, StlKind, StreamerElement, StreamerInfo, Value,
};
use rustc_hash::{FxHashMap, FxHashSet};

/// Class name of persisted tree descriptors.
pub const TREE_CLASS: &str = "PTree";

/// Tuning knobs for tree writing.
#[derive(Debug, Clone, Copy)]
pub struct TreeConfig {
    /// Flush threshold for a branch's in-memory entry buffer, in
    /// pre-compression bytes.
    pub basket_size: u32,
    /// Basket compression; `None` inherits the file's setting.
    pub compression: Option<Settings>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            basket_size: 32 * 1024,
            compression: None,
        }
    }
}

/// A columnar dataset: ordered branches, lookup by name.
#[derive(Debug)]
pub struct Tree {
    pub name: String,
    pub title: String,
    pub(crate) entries: u64,
    pub(crate) branches: Vec<Branch>,
    pub(crate) by_name: FxHashMap<String, usize>,
    /// Leaf name → owning branch index, tree-wide.
    pub(crate) leaf_owner: FxHashMap<String, usize>,
    /// Leaf names some variable leaf depends on.
    pub(crate) counted: FxHashSet<String>,
    pub(crate) basket_size: u32,
}

impl Tree {
    pub(crate) fn new(name: impl Into<String>, title: impl Into<String>, basket_size: u32) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            entries: 0,
            branches: Vec::new(),
            by_name: FxHashMap::default(),
            leaf_owner: FxHashMap::default(),
            counted: FxHashSet::default(),
            basket_size,
        }
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn branches(&self) -> &[Branch] {
        &self.branches
    }

    pub fn branch(&self, name: &str) -> Option<&Branch> {
        self.by_name.get(name).map(|&i| &self.branches[i])
    }

    pub(crate) fn branch_index(&self, name: &str) -> Result<usize> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::misuse(format!("tree {:?} has no branch {name:?}", self.name)))
    }

    /// Add a branch, validating leaf names and count-leaf references.
    ///
    /// A variable leaf's count leaf must already be declared — earlier in
    /// this branch's leaf list or in an earlier branch — and must be an
    /// integer scalar. That declaration order is what guarantees a count is
    /// always written/read before the leaves depending on it.
    pub(crate) fn add_branch(
        &mut self,
        name: &str,
        title: &str,
        leaves: Vec<Leaf>,
        basket_size: u32,
    ) -> Result<usize> {
        if self.by_name.contains_key(name) {
            return Err(Error::misuse(format!("branch {name:?} already exists")));
        }
        if leaves.is_empty() {
            return Err(Error::misuse(format!("branch {name:?} declares no leaves")));
        }
        let idx = self.branches.len();
        let mut seen_here: FxHashSet<&str> = FxHashSet::default();
        for leaf in &leaves {
            if self.leaf_owner.contains_key(&leaf.name) || !seen_here.insert(&leaf.name) {
                return Err(Error::misuse(format!(
                    "leaf {:?} already exists in this tree",
                    leaf.name
                )));
            }
            if let Some(count) = leaf.count_name() {
                let countable = if seen_here.contains(count) {
                    leaves
                        .iter()
                        .find(|l| l.name == count)
                        .is_some_and(Leaf::is_countable)
                } else if let Some(&owner) = self.leaf_owner.get(count) {
                    self.branches[owner]
                        .leaves
                        .iter()
                        .find(|l| l.name == count)
                        .is_some_and(Leaf::is_countable)
                } else {
                    return Err(Error::misuse(format!(
                        "leaf {:?}: count leaf {count:?} is not declared yet",
                        leaf.name
                    )));
                };
                if !countable {
                    return Err(Error::misuse(format!(
                        "leaf {:?}: count leaf {count:?} is not an integer scalar",
                        leaf.name
                    )));
                }
                self.counted.insert(count.to_string());
            }
        }
        for leaf in &leaves {
            self.leaf_owner.insert(leaf.name.clone(), idx);
        }
        self.by_name.insert(name.to_string(), idx);
        self.branches
            .push(Branch::new(name, title, leaves, basket_size));
        Ok(idx)
    }

    // ------------------------------------------------------------------
    // Metadata persistence
    // ------------------------------------------------------------------

    /// The streamer infos describing tree metadata on disk. Registering
    /// these lets any reader decode a tree through the generic codec alone.
    pub fn streamer_infos() -> Vec<StreamerInfo> {
        let obj_vec = |class: &str| {
            ElementShape::Stl(
                StlKind::Vector,
                Box::new(StreamerElement::new("", ElementShape::Object(class.into()))),
            )
        };
        vec![
            StreamerInfo::new(
                TREE_CLASS,
                1,
                vec![
                    StreamerElement::new("name", ElementShape::Str),
                    StreamerElement::new("title", ElementShape::Str),
                    StreamerElement::new("entries", ElementShape::Basic(BasicType::U64)),
                    StreamerElement::new("basket_size", ElementShape::Basic(BasicType::U32)),
                    StreamerElement::new("branches", obj_vec(BRANCH_CLASS)),
                ],
            ),
            StreamerInfo::new(
                BRANCH_CLASS,
                1,
                vec![
                    StreamerElement::new("name", ElementShape::Str),
                    StreamerElement::new("title", ElementShape::Str),
                    StreamerElement::new("basket_size", ElementShape::Basic(BasicType::U32)),
                    StreamerElement::new("entries", ElementShape::Basic(BasicType::U64)),
                    StreamerElement::new("leaves", obj_vec(LEAF_CLASS)),
                    StreamerElement::new("baskets", obj_vec(BASKET_CLASS)),
                ],
            ),
            StreamerInfo::new(
                LEAF_CLASS,
                1,
                vec![
                    StreamerElement::new("name", ElementShape::Str),
                    StreamerElement::new("kind", ElementShape::Basic(BasicType::U8)),
                    StreamerElement::new("type_code", ElementShape::Basic(BasicType::U8)),
                    StreamerElement::new("flen", ElementShape::Basic(BasicType::U32)),
                    StreamerElement::new("count", ElementShape::Str),
                ],
            ),
            StreamerInfo::new(
                BASKET_CLASS,
                1,
                vec![
                    StreamerElement::new("first_entry", ElementShape::Basic(BasicType::U64)),
                    StreamerElement::new("nentries", ElementShape::Basic(BasicType::U32)),
                    StreamerElement::new("seek", ElementShape::Basic(BasicType::U64)),
                    StreamerElement::new("nbytes", ElementShape::Basic(BasicType::U32)),
                    StreamerElement::new("obj_len", ElementShape::Basic(BasicType::U32)),
                    StreamerElement::new("data_len", ElementShape::Basic(BasicType::U32)),
                ],
            ),
        ]
    }

    /// Register the tree metadata schemas into a registry.
    pub fn register(reg: &Registry) {
        for info in Tree::streamer_infos() {
            reg.register_info(info);
        }
    }

    pub(crate) fn to_record(&self) -> Record {
        let mut rec = Record::new(TREE_CLASS, 1);
        rec.push("name", Value::Str(self.name.clone()));
        rec.push("title", Value::Str(self.title.clone()));
        rec.push("entries", Value::U64(self.entries));
        rec.push("basket_size", Value::U32(self.basket_size));
        rec.push(
            "branches",
            Value::Array(
                self.branches
                    .iter()
                    .map(|b| Value::Object(b.to_record()))
                    .collect(),
            ),
        );
        rec
    }

    pub(crate) fn from_record(rec: &Record) -> Result<Self> {
        if rec.class != TREE_CLASS {
            return Err(Error::invalid_file(format!(
                "expected a {TREE_CLASS} record, got {:?}",
                rec.class
            )));
        }
        let name = rec
            .require("name")?
            .as_str()
            .ok_or_else(|| Error::invalid_file("tree name is not a string"))?
            .to_string();
        let title = rec
            .require("title")?
            .as_str()
            .unwrap_or_default()
            .to_string();
        let entries = match rec.require("entries")? {
            Value::U64(v) => *v,
            other => {
                return Err(Error::invalid_file(format!(
                    "tree {name:?}: bad entry count {other:?}"
                )))
            }
        };
        let basket_size = match rec.require("basket_size")? {
            Value::U32(v) => *v,
            other => {
                return Err(Error::invalid_file(format!(
                    "tree {name:?}: bad basket size {other:?}"
                )))
            }
        };

        let mut tree = Tree::new(name, title, basket_size);
        let branch_records = rec
            .require("branches")?
            .as_array()
            .ok_or_else(|| Error::invalid_file("tree branches are not a list"))?;
        for v in branch_records {
            let brec = v
                .as_record()
                .filter(|r| r.class == BRANCH_CLASS)
                .ok_or_else(|| Error::invalid_file("branch entry is not a PBranch record"))?;
            let branch = Branch::from_record(brec)?;
            if branch.entries != entries {
                return Err(Error::invalid_file(format!(
                    "branch {:?} holds {} entries, tree declares {entries}",
                    branch.name, branch.entries
                )));
            }
            // Re-run declaration-order validation, then graft the restored
            // basket index back on.
            let idx = tree
                .add_branch(
                    &branch.name,
                    &branch.title,
                    branch.leaves.clone(),
                    branch.basket_size,
                )
                .map_err(|e| Error::invalid_file(e.to_string()))?;
            tree.branches[idx].entries = branch.entries;
            tree.branches[idx].buf_first = branch.entries;
            tree.branches[idx].baskets = branch.baskets;
        }
        tree.entries = entries;
        Ok(tree)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_branches() -> Tree {
        let mut t = Tree::new("events", "test tree", 32 * 1024);
        t.add_branch("n", "", vec![Leaf::scalar("n", BasicType::I32)], 1024)
            .unwrap();
        t.add_branch(
            "trk",
            "",
            vec![
                Leaf::var_array("pt", BasicType::F64, "n"),
                Leaf::scalar("q", BasicType::I8),
            ],
            1024,
        )
        .unwrap();
        t
    }

    #[test]
    fn branch_lookup() {
        let t = tree_with_branches();
        assert!(t.branch("n").is_some());
        assert!(t.branch("trk").is_some());
        assert!(t.branch("nope").is_none());
        assert!(t.counted.contains("n"));
    }

    #[test]
    fn duplicate_branch_name_rejected() {
        let mut t = tree_with_branches();
        assert!(t
            .add_branch("n", "", vec![Leaf::scalar("m", BasicType::I32)], 1024)
            .is_err());
    }

    #[test]
    fn duplicate_leaf_name_rejected() {
        let mut t = tree_with_branches();
        assert!(t
            .add_branch("other", "", vec![Leaf::scalar("pt", BasicType::F32)], 1024)
            .is_err());
    }

    #[test]
    fn undeclared_count_leaf_rejected() {
        let mut t = Tree::new("t", "", 1024);
        assert!(t
            .add_branch(
                "trk",
                "",
                vec![Leaf::var_array("pt", BasicType::F64, "n")],
                1024
            )
            .is_err());
    }

    #[test]
    fn non_integer_count_leaf_rejected() {
        let mut t = Tree::new("t", "", 1024);
        t.add_branch("x", "", vec![Leaf::scalar("x", BasicType::F64)], 1024)
            .unwrap();
        assert!(t
            .add_branch(
                "trk",
                "",
                vec![Leaf::var_array("pt", BasicType::F64, "x")],
                1024
            )
            .is_err());
    }

    #[test]
    fn count_leaf_earlier_in_same_branch_ok() {
        let mut t = Tree::new("t", "", 1024);
        t.add_branch(
            "trk",
            "",
            vec![
                Leaf::scalar("n", BasicType::U32),
                Leaf::var_array("pt", BasicType::F64, "n"),
            ],
            1024,
        )
        .unwrap();
        assert!(t.counted.contains("n"));
    }

    #[test]
    fn count_leaf_later_in_same_branch_rejected() {
        let mut t = Tree::new("t", "", 1024);
        assert!(t
            .add_branch(
                "trk",
                "",
                vec![
                    Leaf::var_array("pt", BasicType::F64, "n"),
                    Leaf::scalar("n", BasicType::U32),
                ],
                1024,
            )
            .is_err());
    }

    #[test]
    fn metadata_record_round_trip() {
        let mut t = tree_with_branches();
        t.entries = 5;
        for br in &mut t.branches {
            br.entries = 5;
        }
        let rec = t.to_record();
        let back = Tree::from_record(&rec).unwrap();
        assert_eq!(back.name, "events");
        assert_eq!(back.entries(), 5);
        assert_eq!(back.branches().len(), 2);
        assert!(back.counted.contains("n"));
    }

    #[test]
    fn metadata_survives_the_generic_codec() {
        use petra_core::cursor::{ReadCursor, WriteCursor};
        use petra_schema::codec::{decode_any, encode_any};

        let reg = Registry::new();
        Tree::register(&reg);
        let mut t = tree_with_branches();
        t.entries = 0;
        let rec = t.to_record();

        let mut w = WriteCursor::new();
        encode_any(&mut w, &rec, &reg).unwrap();
        let bytes = w.into_bytes();
        let mut r = ReadCursor::new(&bytes);
        let obj = decode_any(&mut r, TREE_CLASS, &reg).unwrap();
        let back = obj.as_any().downcast_ref::<Record>().unwrap();
        assert_eq!(back, &rec);
        let rebuilt = Tree::from_record(back).unwrap();
        assert_eq!(rebuilt.branches().len(), 2);
    }

    #[test]
    fn branch_entry_mismatch_rejected() {
        let mut t = tree_with_branches();
        t.entries = 5;
        t.branches[0].entries = 5;
        t.branches[1].entries = 4; // inconsistent
        let rec = t.to_record();
        assert!(Tree::from_record(&rec).is_err());
    }
}
