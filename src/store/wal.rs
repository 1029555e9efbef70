use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::warn;

use crate::encoding::{ByteReader, ByteWriter, Decode, Encode};

// Write-ahead log: a flat stream of records, each a u32 little-endian length
// followed by that many encoded bytes. `append` only buffers; callers group
// records into a batch and make the whole batch durable with one `sync`.
#[derive(Debug)]
pub struct Wal {
    file: BufWriter<File>,
    path: PathBuf,
    enc: ByteWriter,
}

impl Wal {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        // Ensure the file exists on disk before anything references it.
        file.sync_all()?;
        Ok(Wal {
            file: BufWriter::new(file),
            path: path.to_owned(),
            enc: ByteWriter::new(),
        })
    }

    pub fn open_append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Wal {
            file: BufWriter::new(file),
            path: path.to_owned(),
            enc: ByteWriter::new(),
        })
    }

    pub fn append<E: Encode>(&mut self, record: &E) -> Result<()> {
        self.enc.clear();
        record.encode(&mut self.enc);
        self.file
            .write_all(&(self.enc.len() as u32).to_le_bytes())?;
        self.file.write_all(self.enc.bytes())?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct WalReader<E> {
    file: BufReader<File>,
    path: PathBuf,
    buf: Vec<u8>,
    replayed_len: u64,
    _marker: PhantomData<E>,
}

impl<E: Decode> WalReader<E> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(WalReader {
            file: BufReader::new(file),
            path: path.to_owned(),
            buf: Vec::new(),
            replayed_len: 0,
            _marker: PhantomData,
        })
    }

    // Bytes covered by the complete records read so far. Anything past this
    // offset is a torn tail.
    pub fn replayed_len(&self) -> u64 {
        self.replayed_len
    }

    // The next record, or None at the end of the log. A record cut off
    // mid-write (a crash during append) ends the log with a warning; a
    // record that decodes badly is corruption and an error.
    pub fn next_record(&mut self) -> Result<Option<E>> {
        let mut len_buf = [0_u8; 4];
        match read_full(&mut self.file, &mut len_buf)? {
            ReadFull::Eof => return Ok(None),
            ReadFull::Torn => {
                warn!(path = %self.path.display(), "dropping torn record at end of wal");
                return Ok(None);
            }
            ReadFull::Full => {}
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        self.buf.clear();
        self.buf.resize(len, 0);
        match read_full(&mut self.file, &mut self.buf)? {
            ReadFull::Full => {}
            ReadFull::Eof | ReadFull::Torn => {
                warn!(path = %self.path.display(), "dropping torn record at end of wal");
                return Ok(None);
            }
        }
        self.replayed_len += 4 + len as u64;
        let mut r = ByteReader::new(&self.buf);
        Ok(Some(E::decode(&mut r)?))
    }
}

// Clips the log at `len`, dropping a torn tail so appends continue from the
// last complete record rather than after the garbage.
pub fn truncate_to(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(len)?;
    file.sync_all()?;
    Ok(())
}

enum ReadFull {
    Full,
    Eof,
    Torn,
}

fn read_full(r: &mut impl Read, buf: &mut [u8]) -> Result<ReadFull> {
    let mut at = 0;
    while at < buf.len() {
        match r.read(&mut buf[at..]) {
            Ok(0) => {
                return Ok(if at == 0 { ReadFull::Eof } else { ReadFull::Torn });
            }
            Ok(n) => at += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(ReadFull::Full)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::row::Mutation;

    fn sample_batch() -> Vec<Mutation> {
        vec![
            Mutation::new(b"00000000010000000001".to_vec())
                .set("Game", b"gameid", b"1")
                .set("Winner", b"id", b"p1"),
            Mutation::new(b"00000000010000000002".to_vec()).set("Game", b"tie", b"True"),
        ]
    }

    fn read_all(path: &Path) -> Vec<Mutation> {
        let mut reader: WalReader<Mutation> = WalReader::open(path).unwrap();
        let mut out = Vec::new();
        while let Some(m) = reader.next_record().unwrap() {
            out.push(m);
        }
        out
    }

    #[test]
    fn test_append_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal-1");
        let batch = sample_batch();

        let mut wal = Wal::create(&path).unwrap();
        for m in &batch {
            wal.append(m).unwrap();
        }
        wal.sync().unwrap();
        drop(wal);

        assert_eq!(read_all(&path), batch);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal-1");
        let batch = sample_batch();

        let mut wal = Wal::create(&path).unwrap();
        wal.append(&batch[0]).unwrap();
        wal.sync().unwrap();
        drop(wal);

        let mut wal = Wal::open_append(&path).unwrap();
        wal.append(&batch[1]).unwrap();
        wal.sync().unwrap();
        drop(wal);

        assert_eq!(read_all(&path), batch);
    }

    // A crash can leave a half-written record at the tail. Replay must keep
    // everything before it and not error.
    #[test]
    fn test_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal-1");
        let batch = sample_batch();

        let mut wal = Wal::create(&path).unwrap();
        for m in &batch {
            wal.append(m).unwrap();
        }
        wal.sync().unwrap();
        drop(wal);

        // Cuts of 1, 3 and 10 bytes land inside the second record's payload;
        // 53 leaves only part of its length prefix.
        let full_len = std::fs::metadata(&path).unwrap().len();
        for cut in [1, 3, 10, 53] {
            let truncated = dir.path().join(format!("wal-cut-{}", cut));
            std::fs::copy(&path, &truncated).unwrap();
            let f = OpenOptions::new().write(true).open(&truncated).unwrap();
            f.set_len(full_len - cut).unwrap();
            drop(f);

            let got = read_all(&truncated);
            assert_eq!(got.len(), 1);
            assert_eq!(got[0], batch[0]);
        }
    }

    // Replay reports how far the complete records reach; clipping there and
    // appending gives a log with no garbage between old and new records.
    #[test]
    fn test_clip_torn_tail_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal-1");
        let batch = sample_batch();

        let mut wal = Wal::create(&path).unwrap();
        for m in &batch {
            wal.append(m).unwrap();
        }
        wal.sync().unwrap();
        drop(wal);

        let full_len = std::fs::metadata(&path).unwrap().len();
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(full_len - 10).unwrap();
        drop(f);

        let mut reader: WalReader<Mutation> = WalReader::open(&path).unwrap();
        let mut got = Vec::new();
        while let Some(m) = reader.next_record().unwrap() {
            got.push(m);
        }
        let keep = reader.replayed_len();
        drop(reader);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0], batch[0]);
        assert!(keep < full_len - 10);

        truncate_to(&path, keep).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), keep);

        let mut wal = Wal::open_append(&path).unwrap();
        wal.append(&batch[1]).unwrap();
        wal.sync().unwrap();
        drop(wal);

        assert_eq!(read_all(&path), batch);
    }

    #[test]
    fn test_empty_wal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wal-1");
        Wal::create(&path).unwrap();
        assert!(read_all(&path).is_empty());
    }
}
