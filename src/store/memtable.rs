use std::collections::{btree_map, BTreeMap};
use std::ops::Bound;

use anyhow::{bail, Result};

use super::row::{Mutation, RowData, TableSpec};
use super::scan::RowSource;

// In-memory row state: every mutation since the last flush, applied in
// arrival order, kept sorted by row key. Byte accounting is approximate and
// only steers when to flush.
#[derive(Debug, Default)]
pub struct Memtable {
    rows: BTreeMap<Vec<u8>, RowData>,
    approx_bytes: usize,
}

impl Memtable {
    pub fn new() -> Self {
        Memtable::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn approx_bytes(&self) -> usize {
        self.approx_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn apply(&mut self, m: &Mutation, spec: &TableSpec) -> Result<()> {
        let row = self
            .rows
            .entry(m.row.clone())
            .or_insert_with(|| RowData::new(spec.families.len()));
        self.approx_bytes += m.row.len();
        for (family, qualifier, value) in &m.cells {
            let Some(idx) = spec.family_index(family) else {
                bail!("unknown column family {:?} in table {:?}", family, spec.name);
            };
            self.approx_bytes += qualifier.len() + value.len() + 16;
            row.put_cell(idx, qualifier, value.clone(), spec.families[idx].max_versions);
        }
        Ok(())
    }

    // All rows in key order, for flushing.
    pub fn iter_all(&self) -> impl Iterator<Item = (&Vec<u8>, &RowData)> {
        self.rows.iter()
    }

    pub fn scan_from(&self, start: &[u8]) -> MemtableScan<'_> {
        MemtableScan {
            iter: self
                .rows
                .range::<[u8], _>((Bound::Included(start), Bound::Unbounded)),
            peeked: None,
        }
    }
}

pub struct MemtableScan<'a> {
    iter: btree_map::Range<'a, Vec<u8>, RowData>,
    peeked: Option<(&'a Vec<u8>, &'a RowData)>,
}

impl RowSource for MemtableScan<'_> {
    fn peek_key(&mut self) -> Result<Option<&[u8]>> {
        if self.peeked.is_none() {
            self.peeked = self.iter.next();
        }
        Ok(self.peeked.map(|(k, _)| k.as_slice()))
    }

    fn next_row(&mut self) -> Result<Option<(Vec<u8>, RowData)>> {
        if self.peeked.is_none() {
            self.peeked = self.iter.next();
        }
        Ok(self.peeked.take().map(|(k, v)| (k.clone(), v.clone())))
    }
}
