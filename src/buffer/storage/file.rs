//! # File Storage (Spill Tier)
//!
//! Batches that do not fit the memory budget are serialized with
//! `BatchSerializer` and appended to spill files in the storage directory.
//!
//! ## File Format
//!
//! ```text
//! SpillFile := [Record]*
//! Record    := [payload_len: u32] [crc64: u64] [payload]
//! payload   := serialized TupleBatch (see codec)
//! ```
//!
//! The CRC64 (ECMA-182) covers the payload and is verified on every read.
//!
//! ## File Naming
//!
//! ```text
//! {storage_directory}/{tuple_source}_{file_no}.spill
//!
//! Examples:
//!   spill/17_0.spill
//!   spill/17_1.spill    (after 17_0 reached max_file_size)
//! ```
//!
//! Characters of the tuple source id outside `[A-Za-z0-9_-]` are replaced by
//! `_`; `file_no` comes from a manager-wide counter so names never collide.
//!
//! ## Index
//!
//! Each source keeps `begin_row -> (file, offset, len)`. Replacing a batch
//! appends a new record and repoints the index; the old bytes are reclaimed
//! when the source's files are deleted.
//!
//! ## Open Handles
//!
//! At most `max_open_files` handles are kept. Handles are held in recency
//! order and the least recently used one is closed when the limit is hit.
//!
//! ## Cleanup
//!
//! `remove_batches` deletes the source's files. `shutdown` and `Drop` delete
//! every file this manager created (best-effort in Drop).

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{bail, ensure, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{StorageManager, StorageType};
use crate::buffer::{BatchSerializer, BufferError, TupleBatch, TupleSourceId};
use crate::config::{MIN_MAX_OPEN_FILES, SPILL_FILE_EXTENSION, SPILL_RECORD_HEADER_SIZE};
use crate::types::DataType;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

pub struct FileStorageManager {
    directory: PathBuf,
    max_open_files: usize,
    max_file_size: u64,
    state: Mutex<FileState>,
}

#[derive(Default)]
struct FileState {
    sources: HashMap<TupleSourceId, SourceFiles>,
    open_files: Vec<(PathBuf, File)>,
    next_file_no: u64,
    dir_created: bool,
    bytes_written: u64,
}

#[derive(Default)]
struct SourceFiles {
    files: Vec<SpillFile>,
    index: BTreeMap<i64, BatchLocation>,
}

struct SpillFile {
    path: PathBuf,
    len: u64,
}

#[derive(Debug, Clone, Copy)]
struct BatchLocation {
    file: usize,
    offset: u64,
    len: u32,
}

impl FileStorageManager {
    pub fn new(directory: impl Into<PathBuf>, max_open_files: usize, max_file_size: u64) -> Self {
        Self {
            directory: directory.into(),
            max_open_files: max_open_files.max(MIN_MAX_OPEN_FILES),
            max_file_size,
            state: Mutex::new(FileState::default()),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn file_count(&self) -> usize {
        self.state
            .lock()
            .sources
            .values()
            .map(|source| source.files.len())
            .sum()
    }

    pub fn open_file_count(&self) -> usize {
        self.state.lock().open_files.len()
    }

    pub fn bytes_written(&self) -> u64 {
        self.state.lock().bytes_written
    }

    fn file_path(&self, tuple_source: &TupleSourceId, file_no: u64) -> PathBuf {
        let sanitized: String = tuple_source
            .string_id()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.directory
            .join(format!("{}_{}.{}", sanitized, file_no, SPILL_FILE_EXTENSION))
    }

    fn ensure_directory(&self, state: &mut FileState) -> Result<()> {
        if !state.dir_created {
            fs::create_dir_all(&self.directory).wrap_err_with(|| {
                format!(
                    "failed to create spill directory {}",
                    self.directory.display()
                )
            })?;
            state.dir_created = true;
        }
        Ok(())
    }

    fn delete_files(state: &mut FileState, files: &[SpillFile]) -> Result<()> {
        for file in files {
            state.open_files.retain(|(path, _)| path != &file.path);
            match fs::remove_file(&file.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).wrap_err_with(|| {
                        format!("failed to remove spill file {}", file.path.display())
                    })
                }
            }
        }
        Ok(())
    }
}

impl FileState {
    /// Returns an open handle for `path`, marking it most recently used.
    fn handle(&mut self, path: &Path, max_open_files: usize) -> Result<&mut File> {
        if let Some(pos) = self.open_files.iter().position(|(p, _)| p == path) {
            let entry = self.open_files.remove(pos);
            self.open_files.push(entry);
        } else {
            while self.open_files.len() >= max_open_files {
                self.open_files.remove(0);
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .wrap_err_with(|| format!("failed to open spill file {}", path.display()))?;
            self.open_files.push((path.to_path_buf(), file));
        }

        match self.open_files.last_mut() {
            Some((_, file)) => Ok(file),
            None => bail!("spill file handle cache is empty"),
        }
    }
}

impl StorageManager for FileStorageManager {
    fn storage_type(&self) -> StorageType {
        StorageType::File
    }

    fn add_batch(
        &self,
        tuple_source: &TupleSourceId,
        batch: Arc<TupleBatch>,
        types: &[DataType],
    ) -> Result<()> {
        let payload = BatchSerializer::serialize(&batch, types)?;
        ensure!(
            payload.len() <= u32::MAX as usize,
            "batch of {} bytes too large to spill",
            payload.len()
        );

        let record_len = (SPILL_RECORD_HEADER_SIZE + payload.len()) as u64;
        let checksum = CRC64.checksum(&payload);

        let mut state = self.state.lock();
        self.ensure_directory(&mut state)?;

        let needs_new_file = match state.sources.get(tuple_source) {
            Some(source) => match source.files.last() {
                Some(last) => last.len > 0 && last.len + record_len > self.max_file_size,
                None => true,
            },
            None => true,
        };

        if needs_new_file {
            let file_no = state.next_file_no;
            state.next_file_no += 1;
            let path = self.file_path(tuple_source, file_no);
            debug!(
                tuple_source = %tuple_source,
                path = %path.display(),
                "opening spill file"
            );
            state
                .sources
                .entry(tuple_source.clone())
                .or_default()
                .files
                .push(SpillFile { path, len: 0 });
        }

        let (file_idx, path, offset) = {
            let source = state
                .sources
                .get(tuple_source)
                .ok_or_else(|| BufferError::not_found(tuple_source))?;
            let file_idx = source.files.len() - 1;
            let file = &source.files[file_idx];
            (file_idx, file.path.clone(), file.len)
        };

        {
            let file = state.handle(&path, self.max_open_files)?;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&(payload.len() as u32).to_be_bytes())?;
            file.write_all(&checksum.to_be_bytes())?;
            file.write_all(&payload)
                .wrap_err_with(|| format!("failed to write spill file {}", path.display()))?;
        }

        state.bytes_written += record_len;
        let source = state
            .sources
            .get_mut(tuple_source)
            .ok_or_else(|| BufferError::not_found(tuple_source))?;
        source.files[file_idx].len += record_len;
        source.index.insert(
            batch.begin_row(),
            BatchLocation {
                file: file_idx,
                offset,
                len: payload.len() as u32,
            },
        );

        Ok(())
    }

    fn get_batch(
        &self,
        tuple_source: &TupleSourceId,
        begin_row: i64,
        types: &[DataType],
    ) -> Result<Arc<TupleBatch>> {
        let mut state = self.state.lock();

        let (path, location) = {
            let Some(source) = state.sources.get(tuple_source) else {
                bail!(BufferError::not_found(tuple_source));
            };
            let Some(location) = source.index.get(&begin_row).copied() else {
                bail!(BufferError::batch_not_found(tuple_source, begin_row));
            };
            (source.files[location.file].path.clone(), location)
        };

        let mut header = [0u8; SPILL_RECORD_HEADER_SIZE];
        let mut payload = vec![0u8; location.len as usize];
        {
            let file = state.handle(&path, self.max_open_files)?;
            file.seek(SeekFrom::Start(location.offset))?;
            file.read_exact(&mut header)
                .and_then(|_| file.read_exact(&mut payload))
                .wrap_err_with(|| format!("failed to read spill file {}", path.display()))?;
        }

        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&header[..4]);
        let mut crc_bytes = [0u8; 8];
        crc_bytes.copy_from_slice(&header[4..]);

        if u32::from_be_bytes(len_bytes) != location.len {
            bail!(BufferError::Corrupted(format!(
                "spill record length mismatch in {} at offset {}",
                path.display(),
                location.offset
            )));
        }
        if u64::from_be_bytes(crc_bytes) != CRC64.checksum(&payload) {
            bail!(BufferError::Corrupted(format!(
                "spill record checksum mismatch in {} at offset {}",
                path.display(),
                location.offset
            )));
        }

        let batch = BatchSerializer::deserialize(&payload, types)?;
        if batch.begin_row() != begin_row {
            bail!(BufferError::Corrupted(format!(
                "spill record for row {} holds batch beginning at {}",
                begin_row,
                batch.begin_row()
            )));
        }
        Ok(Arc::new(batch))
    }

    fn remove_batch(&self, tuple_source: &TupleSourceId, begin_row: i64) -> Result<()> {
        let mut state = self.state.lock();
        let emptied = match state.sources.get_mut(tuple_source) {
            Some(source) => {
                source.index.remove(&begin_row);
                source.index.is_empty()
            }
            None => false,
        };

        if emptied {
            if let Some(source) = state.sources.remove(tuple_source) {
                Self::delete_files(&mut state, &source.files)?;
            }
        }
        Ok(())
    }

    fn remove_batches(&self, tuple_source: &TupleSourceId) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(source) = state.sources.remove(tuple_source) {
            debug!(
                tuple_source = %tuple_source,
                files = source.files.len(),
                "removing spill files"
            );
            Self::delete_files(&mut state, &source.files)?;
        }
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        let sources: Vec<SourceFiles> = state.sources.drain().map(|(_, files)| files).collect();
        for source in &sources {
            Self::delete_files(&mut state, &source.files)?;
        }
        state.open_files.clear();
        Ok(())
    }
}

impl Drop for FileStorageManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "failed to clean up spill files");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;
    use tempfile::tempdir;

    const TYPES: [DataType; 2] = [DataType::Long, DataType::String];

    fn batch(begin_row: i64, n: usize) -> Arc<TupleBatch> {
        let rows = (0..n)
            .map(|i| {
                let row = begin_row + i as i64;
                vec![Value::Long(row), Value::String(format!("row-{}", row))]
            })
            .collect();
        Arc::new(TupleBatch::new(begin_row, rows))
    }

    #[test]
    fn spill_and_read_back() {
        let dir = tempdir().unwrap();
        let storage = FileStorageManager::new(dir.path().join("spill"), 4, 1 << 20);
        let id = TupleSourceId::new("1", None);

        storage.add_batch(&id, batch(1, 10), &TYPES).unwrap();
        storage.add_batch(&id, batch(11, 10), &TYPES).unwrap();

        let read = storage.get_batch(&id, 11, &TYPES).unwrap();
        assert_eq!(read.tuples(), batch(11, 10).tuples());
        assert!(storage.get_batch(&id, 12, &TYPES).is_err());
    }

    #[test]
    fn rolls_over_at_max_file_size() {
        let dir = tempdir().unwrap();
        let storage = FileStorageManager::new(dir.path(), 4, 256);
        let id = TupleSourceId::new("1", Some("node"));

        for begin in (1..=50).step_by(10) {
            storage.add_batch(&id, batch(begin, 10), &TYPES).unwrap();
        }
        assert!(storage.file_count() > 1);
        assert_eq!(storage.get_batch(&id, 41, &TYPES).unwrap().row_count(), 10);
    }

    #[test]
    fn open_handles_are_bounded() {
        let dir = tempdir().unwrap();
        let storage = FileStorageManager::new(dir.path(), 2, 1 << 20);

        for n in 0..5 {
            let id = TupleSourceId::new(n.to_string(), None);
            storage.add_batch(&id, batch(1, 2), &TYPES).unwrap();
        }
        assert_eq!(storage.open_file_count(), 2);

        let first = TupleSourceId::new("0", None);
        assert_eq!(storage.get_batch(&first, 1, &TYPES).unwrap().row_count(), 2);
        assert_eq!(storage.open_file_count(), 2);
    }

    #[test]
    fn remove_batches_deletes_files() {
        let dir = tempdir().unwrap();
        let storage = FileStorageManager::new(dir.path(), 4, 1 << 20);
        let id = TupleSourceId::new("7", None);

        storage.add_batch(&id, batch(1, 3), &TYPES).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        storage.remove_batches(&id).unwrap();
        storage.remove_batches(&id).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn corrupted_record_is_detected() {
        let dir = tempdir().unwrap();
        let storage = FileStorageManager::new(dir.path(), 4, 1 << 20);
        let id = TupleSourceId::new("9", None);
        storage.add_batch(&id, batch(1, 3), &TYPES).unwrap();

        let path = fs::read_dir(dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let err = storage.get_batch(&id, 1, &TYPES).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<BufferError>(),
            Some(BufferError::Corrupted(_))
        ));
    }

    #[test]
    fn drop_cleans_up() {
        let dir = tempdir().unwrap();
        {
            let storage = FileStorageManager::new(dir.path(), 4, 1 << 20);
            storage
                .add_batch(&TupleSourceId::new("1", None), batch(1, 1), &TYPES)
                .unwrap();
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
