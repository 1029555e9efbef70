use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::row::TableSpec;

// The store's catalog: every table, its column families and the names of
// its live wal and store files. Updated by writing MANIFEST.tmp and renaming
// it over MANIFEST, so a crash leaves the old or the new catalog intact,
// never a torn one.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ManifestData {
    pub tables: BTreeMap<String, TableMeta>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub spec: TableSpec,
    pub disabled: bool,
    // Store files in flush order, oldest first.
    pub files: Vec<String>,
    pub wal: String,
    pub next_file_id: u64,
}

#[derive(Debug)]
pub struct Manifest {
    dir: PathBuf,
    pub data: ManifestData,
}

impl Manifest {
    pub fn load<P>(dir: P) -> Result<Self>
    where
        P: AsRef<Path> + Into<PathBuf>,
    {
        match fs::read_to_string(Self::path(dir.as_ref())) {
            Ok(contents) => Ok(Manifest {
                dir: dir.into(),
                data: serde_json::from_str(&contents)?,
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let manifest = Manifest {
                    dir: dir.into(),
                    data: ManifestData::default(),
                };
                manifest.save()?;
                Ok(manifest)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn path(dir: &Path) -> PathBuf {
        dir.join("MANIFEST")
    }

    fn tmp_path(dir: &Path) -> PathBuf {
        dir.join("MANIFEST.tmp")
    }

    pub fn save(&self) -> Result<()> {
        let tmp_path = Self::tmp_path(&self.dir);
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .create(true)
            .open(&tmp_path)?;
        let encoded = serde_json::to_string(&self.data)?;
        file.write_all(encoded.as_bytes())?;
        file.flush()?;
        file.sync_all()?;
        fs::rename(tmp_path, Self::path(&self.dir))?;
        Ok(())
    }
}
