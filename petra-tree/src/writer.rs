//! Append-only tree writing.
//!
//! A [`TreeWriter`] is bound to a writable file. Per entry, every branch is
//! filled exactly once (`fill`), then `end_entry` advances the entry count
//! and flushes any branch whose buffer crossed the basket-size threshold.
//! Count leaves must be filled before the variable leaves depending on them
//! — within a branch that is leaf order, across branches it is fill order —
//! and a violation is the typed `CountLeafNotYetRead` error, never garbage.
//!
//! `close` force-flushes partial baskets, then persists the tree descriptor
//! as a generic object so it is discoverable like anything else in the file.

use crate::basket::{assemble_payload, BasketRange};
use crate::leaf::Leaf;
use crate::tree::{Tree, TreeConfig};
use petra_core::block::{compress, Settings};
use petra_core::error::{Error, Result};
use petra_file::File;
use petra_schema::Value;
use rustc_hash::FxHashMap;

/// Encode one entry's values against a branch's leaf list, resolving and
/// recording count-leaf values as the walk proceeds.
fn encode_entry(
    leaves: &[Leaf],
    values: &[Value],
    wbuf: &mut petra_core::cursor::WriteCursor,
    counts: &mut FxHashMap<String, u64>,
    counted: &rustc_hash::FxHashSet<String>,
) -> Result<()> {
    for (leaf, value) in leaves.iter().zip(values) {
        let count = match leaf.count_name() {
            Some(count_name) => {
                Some(counts.get(count_name).copied().ok_or_else(|| {
                    Error::CountLeafNotYetRead {
                        leaf: leaf.name.clone(),
                        count: count_name.to_string(),
                    }
                })?)
            }
            None => None,
        };
        leaf.encode_value(wbuf, value, count)?;
        if counted.contains(&leaf.name) {
            let n = value.as_count().ok_or_else(|| {
                Error::misuse(format!(
                    "count leaf {:?} holds a negative or non-integer value",
                    leaf.name
                ))
            })?;
            counts.insert(leaf.name.clone(), n);
        }
    }
    Ok(())
}

/// Write handle for one tree in one file.
pub struct TreeWriter<'f> {
    file: &'f mut File,
    tree: Tree,
    compression: Settings,
    /// Count-leaf values decoded so far for the in-progress entry.
    counts: FxHashMap<String, u64>,
    /// Which branches have been filled for the in-progress entry.
    filled: Vec<bool>,
}

impl<'f> TreeWriter<'f> {
    /// Start a new tree named `name` in a writable file.
    pub fn new(file: &'f mut File, name: &str, title: &str, cfg: TreeConfig) -> Result<Self> {
        if !file.is_writable() {
            return Err(Error::misuse("tree writing needs a writable file"));
        }
        let compression = match cfg.compression {
            Some(s) => s,
            None => file.compression()?,
        };
        Ok(Self {
            file,
            tree: Tree::new(name, title, cfg.basket_size),
            compression,
            counts: FxHashMap::default(),
            filled: Vec::new(),
        })
    }

    /// Declare a branch. Branches must be declared before the first fill;
    /// declaration order fixes read order, so count-leaf branches go first.
    pub fn add_branch(&mut self, name: &str, leaves: Vec<Leaf>) -> Result<()> {
        if self.tree.entries() > 0 || self.filled.iter().any(|&f| f) {
            return Err(Error::misuse("branches must be declared before filling"));
        }
        let basket_size = self.tree.basket_size;
        self.tree.add_branch(name, "", leaves, basket_size)?;
        self.filled.push(false);
        Ok(())
    }

    pub fn entries(&self) -> u64 {
        self.tree.entries()
    }

    /// Fill one branch's values for the current entry.
    pub fn fill(&mut self, branch: &str, values: &[Value]) -> Result<()> {
        let idx = self.tree.branch_index(branch)?;
        if self.filled[idx] {
            return Err(Error::misuse(format!(
                "branch {branch:?} already filled for this entry"
            )));
        }
        let br = &mut self.tree.branches[idx];
        if values.len() != br.leaves.len() {
            return Err(Error::misuse(format!(
                "branch {branch:?} has {} leaves, got {} values",
                br.leaves.len(),
                values.len()
            )));
        }

        let entry_start = br.wbuf.pos();
        br.offsets.push(entry_start as u32);
        if let Err(e) = encode_entry(
            &br.leaves,
            values,
            &mut br.wbuf,
            &mut self.counts,
            &self.tree.counted,
        ) {
            // Roll the partial entry back so the buffer stays consistent.
            br.wbuf.truncate(entry_start);
            br.offsets.pop();
            return Err(e);
        }
        self.filled[idx] = true;
        Ok(())
    }

    /// Finish the current entry; every branch must have been filled.
    pub fn end_entry(&mut self) -> Result<()> {
        if let Some(idx) = self.filled.iter().position(|&f| !f) {
            return Err(Error::misuse(format!(
                "branch {:?} not filled for this entry",
                self.tree.branches[idx].name
            )));
        }
        self.tree.entries += 1;
        for idx in 0..self.tree.branches.len() {
            self.tree.branches[idx].buf_n += 1;
            if self.tree.branches[idx].wbuf.pos() >= self.tree.branches[idx].basket_size as usize {
                self.flush_branch(idx)?;
            }
        }
        self.counts.clear();
        self.filled.fill(false);
        Ok(())
    }

    /// Flush one branch's buffered entries as a basket block.
    fn flush_branch(&mut self, idx: usize) -> Result<()> {
        let br = &mut self.tree.branches[idx];
        if br.buf_n == 0 {
            return Ok(());
        }
        let payload = assemble_payload(br.wbuf.bytes(), &br.offsets);
        let obj_len = payload.len() as u32;
        let data_len = br.wbuf.pos() as u32;
        let stored = compress(&payload, self.compression)?.unwrap_or(payload);
        let seek = self.file.write_block(&stored)?;

        let br = &mut self.tree.branches[idx];
        let range = BasketRange {
            first_entry: br.buf_first,
            nentries: br.buf_n,
            seek,
            nbytes: stored.len() as u32,
            obj_len,
            data_len,
        };
        tracing::debug!(
            branch = %br.name,
            first_entry = range.first_entry,
            nentries = range.nentries,
            raw = range.obj_len,
            stored = range.nbytes,
            seek,
            "basket flushed"
        );
        br.baskets.push(range);
        br.entries += br.buf_n as u64;
        br.buf_first = br.entries;
        br.buf_n = 0;
        br.wbuf = Default::default();
        br.offsets.clear();
        Ok(())
    }

    /// Force-flush partial baskets and persist the tree descriptor.
    pub fn close(mut self) -> Result<()> {
        if self.filled.iter().any(|&f| f) {
            return Err(Error::misuse(
                "an entry is mid-fill; call end_entry before close",
            ));
        }
        for idx in 0..self.tree.branches.len() {
            self.flush_branch(idx)?;
            debug_assert_eq!(self.tree.branches[idx].entries, self.tree.entries);
        }
        Tree::register(self.file.registry());
        let rec = self.tree.to_record();
        let (name, title) = (self.tree.name.clone(), self.tree.title.clone());
        self.file
            .put_in(petra_file::DirId::ROOT, &name, &title, &rec)?;
        tracing::debug!(
            tree = %name,
            entries = self.tree.entries,
            branches = self.tree.branches.len(),
            "tree closed"
        );
        Ok(())
    }
}
