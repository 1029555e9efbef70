use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::encoding::{ByteReader, ByteWriter, Decode, Encode};

// One column family in a table definition. `max_versions` bounds how many
// values a single cell retains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilySpec {
    pub name: String,
    pub max_versions: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub families: Vec<FamilySpec>,
}

impl TableSpec {
    pub fn new(name: &str) -> Self {
        TableSpec {
            name: name.to_owned(),
            families: Vec::new(),
        }
    }

    pub fn family(mut self, name: &str, max_versions: usize) -> Self {
        self.families.push(FamilySpec {
            name: name.to_owned(),
            max_versions,
        });
        self
    }

    pub fn family_index(&self, name: &str) -> Option<usize> {
        self.families.iter().position(|f| f.name == name)
    }
}

// A single-row write: the unit `Table::put` accepts. Cells are
// (family, qualifier, value); families are named here and resolved against
// the table spec when the mutation is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub row: Vec<u8>,
    pub cells: Vec<(String, Vec<u8>, Vec<u8>)>,
}

impl Mutation {
    pub fn new(row: Vec<u8>) -> Self {
        Mutation {
            row,
            cells: Vec::new(),
        }
    }

    pub fn set(mut self, family: &str, qualifier: &[u8], value: &[u8]) -> Self {
        self.cells
            .push((family.to_owned(), qualifier.to_vec(), value.to_vec()));
        self
    }
}

impl Encode for Mutation {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_bytes(&self.row);
        w.put_u32(self.cells.len() as u32);
        for (family, qualifier, value) in &self.cells {
            w.put_bytes(family.as_bytes());
            w.put_bytes(qualifier);
            w.put_bytes(value);
        }
    }
}

impl Decode for Mutation {
    fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let row = r.get_bytes()?.to_vec();
        let cells = r.get_u32()? as usize;
        let mut m = Mutation::new(row);
        for _ in 0..cells {
            let family = String::from_utf8(r.get_bytes()?.to_vec())?;
            let qualifier = r.get_bytes()?.to_vec();
            let value = r.get_bytes()?.to_vec();
            m.cells.push((family, qualifier, value));
        }
        Ok(m)
    }
}

// Versions of one cell, newest first. Index 0 is what point reads return.
pub type Versions = Vec<Vec<u8>>;

// The stored cells of one row: for each family (by position in the table
// spec) a qualifier-to-versions map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowData {
    families: Vec<BTreeMap<Vec<u8>, Versions>>,
}

impl RowData {
    pub fn new(family_count: usize) -> Self {
        RowData {
            families: vec![BTreeMap::new(); family_count],
        }
    }

    pub fn put_cell(
        &mut self,
        family: usize,
        qualifier: &[u8],
        value: Vec<u8>,
        max_versions: usize,
    ) {
        if family >= self.families.len() {
            self.families.resize_with(family + 1, BTreeMap::new);
        }
        let versions = self.families[family].entry(qualifier.to_vec()).or_default();
        versions.insert(0, value);
        versions.truncate(max_versions);
    }

    pub fn value(&self, family: usize, qualifier: &[u8]) -> Option<&[u8]> {
        self.families
            .get(family)?
            .get(qualifier)?
            .first()
            .map(|v| v.as_slice())
    }

    pub fn versions(&self, family: usize, qualifier: &[u8]) -> &[Vec<u8>] {
        match self.families.get(family).and_then(|f| f.get(qualifier)) {
            Some(v) => v,
            None => &[],
        }
    }

    pub fn families(&self) -> &[BTreeMap<Vec<u8>, Versions>] {
        &self.families
    }

    pub fn is_empty(&self) -> bool {
        self.families.iter().all(|f| f.is_empty())
    }

    // Folds an older copy of the same row underneath this one: the older
    // versions land behind the existing ones and each cell keeps at most its
    // family's version bound.
    pub fn merge_older(&mut self, older: RowData, spec: &TableSpec) {
        for (idx, family) in older.families.into_iter().enumerate() {
            if idx >= self.families.len() {
                self.families.resize_with(idx + 1, BTreeMap::new);
            }
            let max_versions = spec
                .families
                .get(idx)
                .map(|f| f.max_versions)
                .unwrap_or(usize::MAX);
            for (qualifier, versions) in family {
                let dst = self.families[idx].entry(qualifier).or_default();
                dst.extend(versions);
                dst.truncate(max_versions);
            }
        }
    }
}

impl Encode for RowData {
    fn encode(&self, w: &mut ByteWriter) {
        w.put_u32(self.families.len() as u32);
        for family in &self.families {
            w.put_u32(family.len() as u32);
            for (qualifier, versions) in family {
                w.put_bytes(qualifier);
                w.put_u32(versions.len() as u32);
                for value in versions {
                    w.put_bytes(value);
                }
            }
        }
    }
}

impl Decode for RowData {
    fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let family_count = r.get_u32()? as usize;
        let mut data = RowData::new(family_count);
        for family in data.families.iter_mut() {
            let cell_count = r.get_u32()? as usize;
            for _ in 0..cell_count {
                let qualifier = r.get_bytes()?.to_vec();
                let version_count = r.get_u32()? as usize;
                let mut versions = Vec::with_capacity(version_count);
                for _ in 0..version_count {
                    versions.push(r.get_bytes()?.to_vec());
                }
                family.insert(qualifier, versions);
            }
        }
        Ok(data)
    }
}

// One scanned row, with family names resolved through the table spec.
#[derive(Debug, Clone)]
pub struct Row {
    key: Vec<u8>,
    data: RowData,
    spec: Rc<TableSpec>,
}

impl Row {
    pub(crate) fn new(key: Vec<u8>, data: RowData, spec: Rc<TableSpec>) -> Self {
        Row { key, data, spec }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self, family: &str, qualifier: &[u8]) -> Option<&[u8]> {
        self.data.value(self.spec.family_index(family)?, qualifier)
    }

    pub fn versions(&self, family: &str, qualifier: &[u8]) -> &[Vec<u8>] {
        match self.spec.family_index(family) {
            Some(idx) => self.data.versions(idx, qualifier),
            None => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub(crate) fn data(&self) -> &RowData {
        &self.data
    }
}

// Equality predicate on one cell, applied while scanning: a row passes iff
// the cell exists and its newest version equals `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct CellFilter {
    pub family: String,
    pub qualifier: Vec<u8>,
    pub value: Vec<u8>,
}

impl CellFilter {
    pub fn new(family: &str, qualifier: &[u8], value: &[u8]) -> Self {
        CellFilter {
            family: family.to_owned(),
            qualifier: qualifier.to_vec(),
            value: value.to_vec(),
        }
    }
}
