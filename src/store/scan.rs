use std::rc::Rc;

use anyhow::{bail, Result};

use super::row::{CellFilter, Row, RowData, TableSpec};

// A positioned forward cursor over sorted (row key, cells) pairs. Sources
// are seeked to the scan's start key before they reach the scanner.
pub(crate) trait RowSource {
    fn peek_key(&mut self) -> Result<Option<&[u8]>>;
    fn next_row(&mut self) -> Result<Option<(Vec<u8>, RowData)>>;
}

// Merges the memtable and any number of store files into one scan in
// ascending key order. Sources are ordered newest first; when several hold
// the same row the newest copy absorbs the older ones, so version lists
// stay newest-first across flush boundaries.
pub struct Scanner<'a> {
    sources: Vec<Box<dyn RowSource + 'a>>,
    end: Option<Vec<u8>>,
    filter: Option<CellFilter>,
    spec: Rc<TableSpec>,
    done: bool,
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(
        sources: Vec<Box<dyn RowSource + 'a>>,
        end: Option<Vec<u8>>,
        filter: Option<CellFilter>,
        spec: Rc<TableSpec>,
    ) -> Self {
        Scanner {
            sources,
            end,
            filter,
            spec,
            done: false,
        }
    }

    fn lowest(&mut self) -> Result<Option<(usize, Vec<u8>)>> {
        let mut lowest: Option<(usize, Vec<u8>)> = None;
        for idx in 0..self.sources.len() {
            if let Some(key) = self.sources[idx].peek_key()? {
                let better = match &lowest {
                    None => true,
                    Some((_, low)) => key < low.as_slice(),
                };
                if better {
                    lowest = Some((idx, key.to_vec()));
                }
            }
        }
        Ok(lowest)
    }

    fn next_merged(&mut self) -> Result<Option<(Vec<u8>, RowData)>> {
        // Ties go to the earliest source, which is the newest copy.
        let Some((idx, key)) = self.lowest()? else {
            return Ok(None);
        };
        if let Some(end) = &self.end {
            if key.as_slice() >= end.as_slice() {
                return Ok(None);
            }
        }
        let Some((key, mut row)) = self.sources[idx].next_row()? else {
            bail!("row source lost its peeked row");
        };
        for other in 0..self.sources.len() {
            if other == idx {
                continue;
            }
            let same = match self.sources[other].peek_key()? {
                Some(k) => k == key.as_slice(),
                None => false,
            };
            if same {
                let Some((_, older)) = self.sources[other].next_row()? else {
                    bail!("row source lost its peeked row");
                };
                row.merge_older(older, &self.spec);
            }
        }
        Ok(Some((key, row)))
    }

    fn passes(&self, row: &RowData) -> bool {
        match &self.filter {
            None => true,
            Some(f) => match self.spec.family_index(&f.family) {
                Some(idx) => row.value(idx, &f.qualifier) == Some(f.value.as_slice()),
                None => false,
            },
        }
    }
}

impl Iterator for Scanner<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.next_merged() {
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Ok(Some((key, data))) => {
                    if self.passes(&data) {
                        return Some(Ok(Row::new(key, data, self.spec.clone())));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    // A canned source for merge tests; real sources are the memtable scan
    // and the store file readers.
    struct VecSource {
        rows: Vec<(Vec<u8>, RowData)>,
        at: usize,
    }

    impl VecSource {
        fn new(rows: Vec<(&[u8], RowData)>) -> Self {
            VecSource {
                rows: rows.into_iter().map(|(k, v)| (k.to_vec(), v)).collect(),
                at: 0,
            }
        }
    }

    impl RowSource for VecSource {
        fn peek_key(&mut self) -> Result<Option<&[u8]>> {
            Ok(self.rows.get(self.at).map(|(k, _)| k.as_slice()))
        }

        fn next_row(&mut self) -> Result<Option<(Vec<u8>, RowData)>> {
            let row = self.rows.get(self.at).cloned();
            if row.is_some() {
                self.at += 1;
            }
            Ok(row)
        }
    }

    fn spec() -> Rc<TableSpec> {
        Rc::new(TableSpec::new("t").family("a", 10))
    }

    fn row_with(value: &[u8]) -> RowData {
        let mut data = RowData::new(1);
        data.put_cell(0, b"q", value.to_vec(), 10);
        data
    }

    fn collect(scanner: Scanner<'_>) -> Vec<(Vec<u8>, Vec<Vec<u8>>)> {
        scanner
            .map(|row| {
                let row = row.unwrap();
                (row.key().to_vec(), row.versions("a", b"q").to_vec())
            })
            .collect()
    }

    #[test]
    fn test_merge_order_and_versions() {
        let newer = VecSource::new(vec![(b"b", row_with(b"new")), (b"d", row_with(b"d1"))]);
        let older = VecSource::new(vec![
            (b"a", row_with(b"a1")),
            (b"b", row_with(b"old")),
            (b"c", row_with(b"c1")),
        ]);
        let scanner = Scanner::new(
            vec![Box::new(newer), Box::new(older)],
            None,
            None,
            spec(),
        );
        assert_eq!(
            collect(scanner),
            vec![
                (b"a".to_vec(), vec![b"a1".to_vec()]),
                (b"b".to_vec(), vec![b"new".to_vec(), b"old".to_vec()]),
                (b"c".to_vec(), vec![b"c1".to_vec()]),
                (b"d".to_vec(), vec![b"d1".to_vec()]),
            ]
        );
    }

    #[test]
    fn test_end_bound_is_exclusive() {
        let src = VecSource::new(vec![
            (b"a", row_with(b"1")),
            (b"b", row_with(b"2")),
            (b"c", row_with(b"3")),
        ]);
        let scanner = Scanner::new(vec![Box::new(src)], Some(b"c".to_vec()), None, spec());
        let got = collect(scanner);
        assert_eq!(got.len(), 2);
        assert_eq!(got[1].0, b"b".to_vec());
    }

    #[test]
    fn test_filter() {
        let src = VecSource::new(vec![
            (b"a", row_with(b"yes")),
            (b"b", row_with(b"no")),
            (b"c", row_with(b"yes")),
        ]);
        let filter = CellFilter::new("a", b"q", b"yes");
        let scanner = Scanner::new(vec![Box::new(src)], None, Some(filter), spec());
        let got = collect(scanner);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].0, b"a".to_vec());
        assert_eq!(got[1].0, b"c".to_vec());
    }

    // The filter wants the cell present: a row without it never passes.
    #[test]
    fn test_filter_drops_missing_cell() {
        let mut empty = RowData::new(1);
        empty.put_cell(0, b"other", b"x".to_vec(), 10);
        let src = VecSource::new(vec![(b"a", empty), (b"b", row_with(b"yes"))]);
        let filter = CellFilter::new("a", b"q", b"yes");
        let scanner = Scanner::new(vec![Box::new(src)], None, Some(filter), spec());
        let got = collect(scanner);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].0, b"b".to_vec());
    }

    #[test]
    fn test_empty_sources() {
        let scanner = Scanner::new(Vec::new(), None, None, spec());
        assert_eq!(collect(scanner).len(), 0);
    }
}
