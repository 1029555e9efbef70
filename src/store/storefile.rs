use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};

use crate::encoding::{ByteReader, ByteWriter, Decode, Encode};

use super::row::RowData;
use super::scan::RowSource;

// Immutable sorted row files. Layout:
//
//   [data block]* [index block] [meta block] [footer]
//
// Data blocks hold (row key, cells) entries in ascending key order, row keys
// prefix-compressed against the previous entry. Compression resets at each
// block boundary so any block decodes on its own. The index block holds one
// (first key, offset, length) entry per data block; the meta block carries
// the file's key bounds and row count; the fixed-width footer locates both.
// Readers keep the index in memory and binary-search it to start a scan at
// the right block.

const BLOCK_TARGET: usize = 4 * 1024;
const FOOTER_LEN: u64 = 16;

#[derive(Debug, Clone)]
struct IndexEntry {
    first_key: Vec<u8>,
    offset: u64,
    len: u32,
}

pub struct StoreFileWriter {
    file: BufWriter<File>,
    block: ByteWriter,
    block_first_key: Option<Vec<u8>>,
    prev_key: Vec<u8>,
    offset: u64,
    index: Vec<IndexEntry>,
    min_key: Option<Vec<u8>>,
    max_key: Vec<u8>,
    rows: u64,
}

impl StoreFileWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(StoreFileWriter {
            file: BufWriter::new(file),
            block: ByteWriter::new(),
            block_first_key: None,
            prev_key: Vec::new(),
            offset: 0,
            index: Vec::new(),
            min_key: None,
            max_key: Vec::new(),
            rows: 0,
        })
    }

    // Rows must arrive in strictly ascending key order.
    pub fn add(&mut self, key: &[u8], row: &RowData) -> Result<()> {
        if self.rows > 0 && key <= self.max_key.as_slice() {
            bail!(
                "rows out of order: {:?} after {:?}",
                String::from_utf8_lossy(key),
                String::from_utf8_lossy(&self.max_key)
            );
        }
        if self.block_first_key.is_none() {
            self.block_first_key = Some(key.to_vec());
        }
        let shared = shared_prefix_len(&self.prev_key, key);
        self.block.put_u16(shared as u16);
        self.block.put_bytes(&key[shared..]);
        row.encode(&mut self.block);

        self.rows += 1;
        if self.min_key.is_none() {
            self.min_key = Some(key.to_vec());
        }
        self.max_key.clear();
        self.max_key.extend_from_slice(key);
        self.prev_key.clear();
        self.prev_key.extend_from_slice(key);

        if self.block.len() >= BLOCK_TARGET {
            self.finish_block()?;
        }
        Ok(())
    }

    fn finish_block(&mut self) -> Result<()> {
        if self.block.is_empty() {
            return Ok(());
        }
        let Some(first_key) = self.block_first_key.take() else {
            bail!("non-empty block without a first key");
        };
        self.file.write_all(self.block.bytes())?;
        self.index.push(IndexEntry {
            first_key,
            offset: self.offset,
            len: self.block.len() as u32,
        });
        self.offset += self.block.len() as u64;
        self.block.clear();
        self.prev_key.clear();
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        if self.rows == 0 {
            bail!("refusing to write an empty store file");
        }
        self.finish_block()?;

        let mut tail = ByteWriter::new();
        for entry in &self.index {
            tail.put_bytes(&entry.first_key);
            tail.put_u64(entry.offset);
            tail.put_u32(entry.len);
        }
        let index_len = tail.len() as u32;

        let meta_start = tail.len();
        let Some(min_key) = &self.min_key else {
            bail!("non-empty store file without a min key");
        };
        tail.put_bytes(min_key);
        tail.put_bytes(&self.max_key);
        tail.put_u64(self.rows);
        let meta_len = (tail.len() - meta_start) as u32;

        tail.put_u64(self.offset);
        tail.put_u32(index_len);
        tail.put_u32(meta_len);

        self.file.write_all(tail.bytes())?;
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }
}

fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    let n = std::cmp::min(a.len(), b.len()).min(u16::MAX as usize);
    let mut i = 0;
    while i < n && a[i] == b[i] {
        i += 1;
    }
    i
}

pub struct StoreFileReader {
    file: File,
    path: PathBuf,
    index: Vec<IndexEntry>,
    min_key: Vec<u8>,
    max_key: Vec<u8>,
    rows: u64,
    next_block: usize,
    pending: VecDeque<(Vec<u8>, RowData)>,
}

impl StoreFileReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        if file_len < FOOTER_LEN {
            bail!("store file {} is too short", path.display());
        }
        file.seek(SeekFrom::End(-(FOOTER_LEN as i64)))?;
        let mut footer = [0_u8; FOOTER_LEN as usize];
        file.read_exact(&mut footer)?;
        let mut r = ByteReader::new(&footer);
        let index_offset = r.get_u64()?;
        let index_len = r.get_u32()? as u64;
        let meta_len = r.get_u32()? as u64;
        if index_offset + index_len + meta_len + FOOTER_LEN != file_len {
            bail!("corrupt footer in store file {}", path.display());
        }

        file.seek(SeekFrom::Start(index_offset))?;
        let mut tail = vec![0_u8; (index_len + meta_len) as usize];
        file.read_exact(&mut tail)?;

        let mut index = Vec::new();
        let mut r = ByteReader::new(&tail[..index_len as usize]);
        while r.remaining() > 0 {
            index.push(IndexEntry {
                first_key: r.get_bytes()?.to_vec(),
                offset: r.get_u64()?,
                len: r.get_u32()?,
            });
        }

        let mut r = ByteReader::new(&tail[index_len as usize..]);
        let min_key = r.get_bytes()?.to_vec();
        let max_key = r.get_bytes()?.to_vec();
        let rows = r.get_u64()?;

        Ok(StoreFileReader {
            file,
            path: path.to_owned(),
            index,
            min_key,
            max_key,
            rows,
            next_block: 0,
            pending: VecDeque::new(),
        })
    }

    pub fn min_key(&self) -> &[u8] {
        &self.min_key
    }

    pub fn max_key(&self) -> &[u8] {
        &self.max_key
    }

    pub fn row_count(&self) -> u64 {
        self.rows
    }

    // True when some key in [start, end) could live in this file.
    pub fn overlaps(&self, start: &[u8], end: Option<&[u8]>) -> bool {
        if self.max_key.as_slice() < start {
            return false;
        }
        match end {
            Some(end) => self.min_key.as_slice() < end,
            None => true,
        }
    }

    // Positions the cursor at the first row whose key is >= `key`.
    pub fn seek_ge(&mut self, key: &[u8]) -> Result<()> {
        self.pending.clear();
        // The last block whose first key is <= key; earlier blocks cannot
        // hold it. If the whole block falls below, the cursor rolls into the
        // next block, whose first key is >= key by construction.
        let block = self
            .index
            .partition_point(|e| e.first_key.as_slice() <= key)
            .saturating_sub(1);
        self.next_block = block;
        self.load_block()?;
        while let Some((k, _)) = self.pending.front() {
            if k.as_slice() >= key {
                break;
            }
            self.pending.pop_front();
        }
        Ok(())
    }

    fn load_block(&mut self) -> Result<bool> {
        let Some(entry) = self.index.get(self.next_block) else {
            return Ok(false);
        };
        self.file.seek(SeekFrom::Start(entry.offset))?;
        let mut data = vec![0_u8; entry.len as usize];
        self.file.read_exact(&mut data)?;
        self.next_block += 1;

        let mut r = ByteReader::new(&data);
        let mut prev: Vec<u8> = Vec::new();
        while r.remaining() > 0 {
            let shared = r.get_u16()? as usize;
            if shared > prev.len() {
                bail!(
                    "corrupt block in {}: shared prefix of {} exceeds previous key",
                    self.path.display(),
                    shared
                );
            }
            let rest = r.get_bytes()?;
            let mut key = Vec::with_capacity(shared + rest.len());
            key.extend_from_slice(&prev[..shared]);
            key.extend_from_slice(rest);
            let row = RowData::decode(&mut r)?;
            prev.clear();
            prev.extend_from_slice(&key);
            self.pending.push_back((key, row));
        }
        Ok(true)
    }

    fn fill(&mut self) -> Result<()> {
        while self.pending.is_empty() {
            if !self.load_block()? {
                break;
            }
        }
        Ok(())
    }
}

impl RowSource for StoreFileReader {
    fn peek_key(&mut self) -> Result<Option<&[u8]>> {
        self.fill()?;
        Ok(self.pending.front().map(|(k, _)| k.as_slice()))
    }

    fn next_row(&mut self) -> Result<Option<(Vec<u8>, RowData)>> {
        self.fill()?;
        Ok(self.pending.pop_front())
    }
}
