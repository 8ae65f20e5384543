//! Random-access tree reading.
//!
//! A [`TreeReader`] decodes the tree descriptor from the file (through the
//! generic codec — the `PTree` schema travels in the file's streamer-info
//! record) and serves per-entry reads. Entry routing binary-searches the
//! branch's basket index; a fetched basket is decompressed once and kept in
//! the branch's cache slot, so sequential scans decompress each basket a
//! single time.
//!
//! Count leaves decode before the variable leaves that depend on them —
//! within a branch by leaf order, across branches by read order (branch
//! declaration order when using [`TreeReader::read_entry`]). Reading a
//! dependent branch first fails with `CountLeafNotYetRead`.

use crate::basket::{split_payload, DecodedBasket};
use crate::tree::Tree;
use petra_core::block::decompress;
use petra_core::cursor::ReadCursor;
use petra_core::error::{Error, Result};
use petra_file::File;
use petra_schema::{Record, Value};
use rustc_hash::FxHashMap;

/// Read handle for one tree in one file.
pub struct TreeReader<'f> {
    file: &'f File,
    tree: Tree,
    /// Count-leaf values decoded for `counts_entry`.
    counts: FxHashMap<String, u64>,
    counts_entry: Option<u64>,
}

impl<'f> TreeReader<'f> {
    /// Open the tree stored under `name`.
    pub fn open(file: &'f File, name: &str) -> Result<Self> {
        let obj = file.get(name)?;
        let rec = obj
            .as_any()
            .downcast_ref::<Record>()
            .ok_or_else(|| Error::invalid_file(format!("{name:?} is not a tree record")))?;
        let tree = Tree::from_record(rec)?;
        tracing::debug!(
            tree = %tree.name,
            entries = tree.entries(),
            branches = tree.branches().len(),
            "tree opened"
        );
        Ok(Self {
            file,
            tree,
            counts: FxHashMap::default(),
            counts_entry: None,
        })
    }

    pub fn entries(&self) -> u64 {
        self.tree.entries()
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Read entry `i` across every branch, in branch declaration order.
    pub fn read_entry(&mut self, i: u64) -> Result<Vec<(String, Vec<Value>)>> {
        let mut out = Vec::with_capacity(self.tree.branches.len());
        for idx in 0..self.tree.branches.len() {
            let name = self.tree.branches[idx].name.clone();
            let values = self.read_branch_index(idx, i)?;
            out.push((name, values));
        }
        Ok(out)
    }

    /// Read one branch's values for entry `i`.
    pub fn read_branch_entry(&mut self, branch: &str, i: u64) -> Result<Vec<Value>> {
        let idx = self.tree.branch_index(branch)?;
        self.read_branch_index(idx, i)
    }

    fn read_branch_index(&mut self, idx: usize, i: u64) -> Result<Vec<Value>> {
        if i >= self.tree.entries() {
            return Err(Error::misuse(format!(
                "entry {i} is beyond the tree's {} entries",
                self.tree.entries()
            )));
        }
        if self.counts_entry != Some(i) {
            self.counts.clear();
            self.counts_entry = Some(i);
        }
        self.ensure_basket(idx, i)?;

        let br = &self.tree.branches[idx];
        let basket = br.cache.as_ref().expect("ensure_basket just filled it");
        let (start, end) = basket.entry_span(i)?;
        let mut r = ReadCursor::new(&basket.data[start..end]);

        let mut out = Vec::with_capacity(br.leaves.len());
        for leaf in &br.leaves {
            let count = match leaf.count_name() {
                Some(count_name) => Some(self.counts.get(count_name).copied().ok_or_else(
                    || Error::CountLeafNotYetRead {
                        leaf: leaf.name.clone(),
                        count: count_name.to_string(),
                    },
                )?),
                None => None,
            };
            let value = leaf.decode_value(&mut r, count)?;
            if self.tree.counted.contains(&leaf.name) {
                let n = value.as_count().ok_or_else(|| {
                    Error::invalid_file(format!(
                        "count leaf {:?} decoded to a negative value",
                        leaf.name
                    ))
                })?;
                self.counts.insert(leaf.name.clone(), n);
            }
            out.push(value);
        }
        if r.remaining() != 0 {
            return Err(Error::invalid_file(format!(
                "branch {:?} entry {i}: {} trailing byte(s)",
                br.name,
                r.remaining()
            )));
        }
        Ok(out)
    }

    /// Make sure the basket covering `entry` is decoded into the branch's
    /// cache slot.
    fn ensure_basket(&mut self, idx: usize, entry: u64) -> Result<()> {
        let br = &self.tree.branches[idx];
        if let Some(cache) = &br.cache {
            if entry >= cache.first_entry && entry < cache.first_entry + cache.nentries as u64 {
                return Ok(());
            }
        }
        let bidx = br.find_basket(entry).ok_or_else(|| {
            Error::invalid_file(format!(
                "branch {:?}: no basket covers entry {entry}",
                br.name
            ))
        })?;
        let range = br.baskets[bidx];
        let block = self.file.read_block(range.seek, range.nbytes as usize)?;
        let payload = if range.obj_len == range.nbytes {
            block
        } else {
            decompress(&block, range.obj_len as usize)?
        };
        let (data, offsets) = split_payload(payload, &range)?;
        tracing::trace!(
            branch = %self.tree.branches[idx].name,
            basket = bidx,
            first_entry = range.first_entry,
            nentries = range.nentries,
            "basket decoded"
        );
        self.tree.branches[idx].cache = Some(DecodedBasket {
            index: bidx,
            first_entry: range.first_entry,
            nentries: range.nentries,
            data,
            offsets,
        });
        Ok(())
    }
}
