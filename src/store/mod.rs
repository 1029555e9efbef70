// An embedded wide-column store: named tables of column families over a
// lexicographically sorted row keyspace. Writes go to a write-ahead log and
// an in-memory table; flushes turn the memtable into an immutable sorted
// store file; scans merge the memtable with every store file. A JSON
// manifest is the catalog and the commit point for flushes.

mod manifest;
mod memtable;
mod row;
mod scan;
mod storefile;
mod wal;


pub use row::{CellFilter, FamilySpec, Mutation, Row, TableSpec};
pub use scan::Scanner;

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

use manifest::{Manifest, TableMeta};
use memtable::Memtable;
use scan::RowSource;
use storefile::{StoreFileReader, StoreFileWriter};
use wal::{Wal, WalReader};

#[derive(Debug, Clone)]
pub struct StoreOptions {
    // Flush the memtable to a store file once it holds about this many
    // bytes. Puts past the threshold flush before returning.
    pub flush_threshold_bytes: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            flush_threshold_bytes: 64 * 1024 * 1024,
        }
    }
}

pub struct Store {
    root: PathBuf,
    manifest: Rc<RefCell<Manifest>>,
    opts: StoreOptions,
}

impl Store {
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with(root, StoreOptions::default())
    }

    pub fn open_with(root: &Path, opts: StoreOptions) -> Result<Self> {
        fs::create_dir_all(root)?;
        let manifest = Manifest::load(root)?;
        Ok(Store {
            root: root.to_owned(),
            manifest: Rc::new(RefCell::new(manifest)),
            opts,
        })
    }

    pub fn create_table(&self, spec: TableSpec) -> Result<()> {
        if spec.families.is_empty() {
            bail!("table {:?} needs at least one column family", spec.name);
        }
        let mut manifest = self.manifest.borrow_mut();
        if manifest.data.tables.contains_key(&spec.name) {
            bail!("table {:?} already exists", spec.name);
        }
        let dir = self.root.join(&spec.name);
        fs::create_dir_all(&dir)?;
        let wal_name = "wal-1".to_owned();
        Wal::create(&dir.join(&wal_name))?;
        let name = spec.name.clone();
        manifest.data.tables.insert(
            name.clone(),
            TableMeta {
                spec,
                disabled: false,
                files: Vec::new(),
                wal: wal_name,
                next_file_id: 2,
            },
        );
        manifest.save()?;
        info!(table = %name, "created table");
        Ok(())
    }

    // Marks a table unavailable for reads and writes, the required step
    // before deleting it. Ok(false) when the table does not exist.
    pub fn disable_table(&self, name: &str) -> Result<bool> {
        let mut manifest = self.manifest.borrow_mut();
        let Some(meta) = manifest.data.tables.get_mut(name) else {
            return Ok(false);
        };
        if !meta.disabled {
            meta.disabled = true;
            manifest.save()?;
        }
        Ok(true)
    }

    // Removes a disabled table and its files. Ok(false) when the table does
    // not exist; a table that is still enabled is an error.
    pub fn delete_table(&self, name: &str) -> Result<bool> {
        let mut manifest = self.manifest.borrow_mut();
        let Some(meta) = manifest.data.tables.get(name) else {
            return Ok(false);
        };
        if !meta.disabled {
            bail!("table {:?} is enabled; disable it before deleting", name);
        }
        manifest.data.tables.remove(name);
        manifest.save()?;
        // The catalog no longer references the directory, so a leftover one
        // is junk rather than corruption.
        if let Err(err) = fs::remove_dir_all(self.root.join(name)) {
            warn!(table = name, error = %err, "could not remove table directory");
        }
        info!(table = name, "deleted table");
        Ok(true)
    }

    // Opens a table for reads and writes, replaying its wal into a fresh
    // memtable. One handle per table at a time: the handle owns the
    // memtable and the active wal.
    pub fn table(&self, name: &str) -> Result<Table> {
        let meta = {
            let manifest = self.manifest.borrow();
            let Some(meta) = manifest.data.tables.get(name) else {
                bail!("no such table {:?}", name);
            };
            if meta.disabled {
                bail!("table {:?} is disabled", name);
            }
            meta.clone()
        };
        let dir = self.root.join(name);
        let spec = Rc::new(meta.spec);

        let wal_path = dir.join(&meta.wal);
        let mut memtable = Memtable::new();
        let mut reader: WalReader<Mutation> = WalReader::open(&wal_path)?;
        let mut replayed = 0_u64;
        while let Some(m) = reader.next_record()? {
            memtable.apply(&m, &spec)?;
            replayed += 1;
        }
        let keep = reader.replayed_len();
        drop(reader);
        if replayed > 0 {
            debug!(table = name, records = replayed, "replayed wal");
        }
        // A torn tail must come off before the log reopens for writing, or
        // records appended after it are unreachable on the next replay.
        let wal_len = fs::metadata(&wal_path)?.len();
        if keep < wal_len {
            warn!(
                table = name,
                bytes = wal_len - keep,
                "clipping torn tail off wal"
            );
            wal::truncate_to(&wal_path, keep)?;
        }
        let wal = Wal::open_append(&wal_path)?;

        Ok(Table {
            name: name.to_owned(),
            dir,
            spec,
            memtable,
            wal,
            manifest: self.manifest.clone(),
            opts: self.opts.clone(),
        })
    }
}

pub struct Table {
    name: String,
    dir: PathBuf,
    spec: Rc<TableSpec>,
    memtable: Memtable,
    wal: Wal,
    manifest: Rc<RefCell<Manifest>>,
    opts: StoreOptions,
}

impl Table {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    // Appends the batch to the wal, syncs once, then applies it to the
    // memtable. The batch is the durability unit: after `put` returns, a
    // crash replays every mutation in it.
    pub fn put(&mut self, batch: Vec<Mutation>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        // Validate up front so the wal never holds part of a bad batch.
        for m in &batch {
            for (family, _, _) in &m.cells {
                if self.spec.family_index(family).is_none() {
                    bail!(
                        "unknown column family {:?} in table {:?}",
                        family,
                        self.name
                    );
                }
            }
        }
        for m in &batch {
            self.wal.append(m)?;
        }
        self.wal.sync()?;
        for m in &batch {
            self.memtable.apply(m, &self.spec)?;
        }
        if self.memtable.approx_bytes() >= self.opts.flush_threshold_bytes {
            self.flush()?;
        }
        Ok(())
    }

    // Writes the memtable to a new store file, commits it to the manifest,
    // and starts a fresh wal. A no-op when the memtable is empty. If the
    // process dies between writing the file and saving the manifest, the
    // old wal still holds every row and the next flush overwrites the
    // orphaned file.
    pub fn flush(&mut self) -> Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }
        let (file_name, wal_name) = {
            let manifest = self.manifest.borrow();
            let Some(meta) = manifest.data.tables.get(&self.name) else {
                bail!("table {:?} missing from the manifest", self.name);
            };
            (
                format!("sf-{}", meta.next_file_id),
                format!("wal-{}", meta.next_file_id + 1),
            )
        };

        let rows = self.memtable.row_count();
        let mut writer = StoreFileWriter::create(&self.dir.join(&file_name))?;
        for (key, row) in self.memtable.iter_all() {
            writer.add(key, row)?;
        }
        writer.finish()?;

        let new_wal = Wal::create(&self.dir.join(&wal_name))?;

        {
            let mut manifest = self.manifest.borrow_mut();
            let Some(meta) = manifest.data.tables.get_mut(&self.name) else {
                bail!("table {:?} missing from the manifest", self.name);
            };
            meta.files.push(file_name.clone());
            meta.wal = wal_name;
            meta.next_file_id += 2;
            manifest.save()?;
        }

        let old_wal = std::mem::replace(&mut self.wal, new_wal);
        let old_path = old_wal.path().to_owned();
        drop(old_wal);
        if let Err(err) = fs::remove_file(&old_path) {
            warn!(path = %old_path.display(), error = %err, "could not remove old wal");
        }
        self.memtable = Memtable::new();
        info!(table = %self.name, file = %file_name, rows, "flushed memtable");
        Ok(())
    }

    // A forward scan of [start, end), optionally narrowed to rows whose
    // filter cell equals the given value. `end = None` scans to the end of
    // the table. Rows arrive in ascending key order; store files whose key
    // bounds miss the range entirely are never read past their index.
    pub fn scan(
        &self,
        start: &[u8],
        end: Option<&[u8]>,
        filter: Option<CellFilter>,
    ) -> Result<Scanner<'_>> {
        let mut sources: Vec<Box<dyn RowSource + '_>> = Vec::new();
        sources.push(Box::new(self.memtable.scan_from(start)));

        let files = {
            let manifest = self.manifest.borrow();
            let Some(meta) = manifest.data.tables.get(&self.name) else {
                bail!("table {:?} missing from the manifest", self.name);
            };
            meta.files.clone()
        };
        // Newest file first, so ties in the merge resolve to recent data.
        for file_name in files.iter().rev() {
            let mut reader = StoreFileReader::open(&self.dir.join(file_name))?;
            if !reader.overlaps(start, end) {
                debug!(file = %file_name, "store file outside scan range");
                continue;
            }
            reader.seek_ge(start)?;
            sources.push(Box::new(reader));
        }

        Ok(Scanner::new(
            sources,
            end.map(|e| e.to_vec()),
            filter,
            self.spec.clone(),
        ))
    }
}
