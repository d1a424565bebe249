#![allow(unsafe_code)]
//! Directory of memory-mapped complex128 datasets.
//!
//! Each dataset is a single file `<root>/<name>.c128` made of a fixed header
//! followed by the interleaved little-endian `(re, im)` data region:
//!
//! ```text
//! offset  size  field
//! 0       8     magic (0xDAF7_C128_0000_0001)
//! 8       8     element count
//! 16      4     element size in bytes (16)
//! 20      4     format version
//! 24      8     reserved, zero
//! 32      ...   data
//! ```
//!
//! The data region needs no decoding beyond byte order, so the files can be
//! opened from NumPy with `np.memmap(path, dtype="<c16", offset=32)`.

use memmap2::{MmapMut, MmapOptions};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{
    check_range, decode_le, encode_le, validate_name, ArrayStore, Complex64, StoreError,
    StoreResult, COMPLEX128_BYTES,
};

/// Magic number for dataset header validation
const MAGIC: u64 = 0xDAF7_C128_0000_0001;

/// Size of the dataset header in bytes
const HEADER_SIZE: usize = 32;

const FORMAT_VERSION: u32 = 1;

const EXTENSION: &str = "c128";

/// One mapped dataset file. Readers share the map; writers take it exclusively.
#[derive(Debug)]
struct MappedDataset {
    len: u64,
    map: RwLock<MmapMut>,
}

impl MappedDataset {
    fn byte_range(&self, offset: u64, count: usize) -> std::ops::Range<usize> {
        let start = HEADER_SIZE + offset as usize * COMPLEX128_BYTES;
        start..start + count * COMPLEX128_BYTES
    }
}

/// [`ArrayStore`] keeping every dataset in its own memory-mapped file.
///
/// Mapped files are kept open after first use; [`MmapStore::flush`] or a
/// rename forces dirty pages to disk.
#[derive(Debug)]
pub struct MmapStore {
    root: PathBuf,
    open: RwLock<HashMap<String, Arc<MappedDataset>>>,
}

impl MmapStore {
    /// Open (creating if necessary) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        tracing::debug!(root = %root.display(), "Opened mmap dataset store");
        Ok(Self {
            root,
            open: RwLock::new(HashMap::new()),
        })
    }

    /// Directory holding the dataset files.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing a dataset name.
    pub fn dataset_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{EXTENSION}"))
    }

    /// Flush a dataset's dirty pages to disk.
    pub fn flush(&self, name: &str) -> StoreResult<()> {
        let dataset = self.dataset(name)?;
        let map = dataset.map.read();
        map.flush()?;
        Ok(())
    }

    fn dataset(&self, name: &str) -> StoreResult<Arc<MappedDataset>> {
        if let Some(dataset) = self.open.read().get(name) {
            return Ok(Arc::clone(dataset));
        }

        validate_name(name)?;
        let path = self.dataset_path(name);
        let file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let file_len = file.metadata()?.len();
        if file_len < HEADER_SIZE as u64 {
            return Err(StoreError::Corrupt {
                path,
                reason: format!("file has {file_len} bytes, shorter than header"),
            });
        }

        // SAFETY: the file is owned by this store and is not truncated while mapped.
        let map = unsafe { MmapOptions::new().map_mut(&file)? };
        let (magic, len, elem) = parse_header(&map);
        if magic != MAGIC {
            return Err(StoreError::Corrupt {
                path,
                reason: format!("invalid magic 0x{magic:016X}"),
            });
        }
        if elem as usize != COMPLEX128_BYTES {
            return Err(StoreError::Corrupt {
                path,
                reason: format!("element size {elem}, expected {COMPLEX128_BYTES}"),
            });
        }
        let expected = HEADER_SIZE as u64 + len * COMPLEX128_BYTES as u64;
        if file_len != expected {
            return Err(StoreError::Corrupt {
                path,
                reason: format!("file has {file_len} bytes but header implies {expected}"),
            });
        }

        let dataset = Arc::new(MappedDataset {
            len,
            map: RwLock::new(map),
        });
        self.open
            .write()
            .insert(name.to_string(), Arc::clone(&dataset));
        Ok(dataset)
    }

    /// Drop the cached mapping for `name`, flushing it first.
    fn close(&self, name: &str) -> StoreResult<()> {
        if let Some(dataset) = self.open.write().remove(name) {
            dataset.map.read().flush()?;
        }
        Ok(())
    }
}

fn write_header(map: &mut [u8], len: u64) {
    map[0..8].copy_from_slice(&MAGIC.to_le_bytes());
    map[8..16].copy_from_slice(&len.to_le_bytes());
    map[16..20].copy_from_slice(&(COMPLEX128_BYTES as u32).to_le_bytes());
    map[20..24].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    map[24..32].fill(0);
}

fn parse_header(map: &[u8]) -> (u64, u64, u32) {
    let mut u64_buf = [0u8; 8];
    let mut u32_buf = [0u8; 4];

    u64_buf.copy_from_slice(&map[0..8]);
    let magic = u64::from_le_bytes(u64_buf);
    u64_buf.copy_from_slice(&map[8..16]);
    let len = u64::from_le_bytes(u64_buf);
    u32_buf.copy_from_slice(&map[16..20]);
    let elem = u32::from_le_bytes(u32_buf);
    (magic, len, elem)
}

impl ArrayStore for MmapStore {
    fn create_dataset(&self, name: &str, len: u64) -> StoreResult<()> {
        validate_name(name)?;
        self.open.write().remove(name);

        let path = self.dataset_path(name);
        let total = HEADER_SIZE as u64 + len * COMPLEX128_BYTES as u64;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        file.set_len(total)?;

        // SAFETY: we just created the file and set its size.
        let mut map = unsafe { MmapOptions::new().map_mut(&file)? };
        write_header(&mut map, len);

        tracing::debug!(dataset = name, elements = len, path = %path.display(), "Created dataset");
        self.open.write().insert(
            name.to_string(),
            Arc::new(MappedDataset {
                len,
                map: RwLock::new(map),
            }),
        );
        Ok(())
    }

    fn write_slice(&self, name: &str, offset: u64, values: &[Complex64]) -> StoreResult<()> {
        let dataset = self.dataset(name)?;
        check_range(name, offset, values.len() as u64, dataset.len)?;
        let range = dataset.byte_range(offset, values.len());
        let mut map = dataset.map.write();
        encode_le(&mut map[range], values);
        Ok(())
    }

    fn read_slice(&self, name: &str, offset: u64, len: usize) -> StoreResult<Vec<Complex64>> {
        let dataset = self.dataset(name)?;
        check_range(name, offset, len as u64, dataset.len)?;
        let range = dataset.byte_range(offset, len);
        let map = dataset.map.read();
        Ok(decode_le(&map[range]))
    }

    fn dataset_len(&self, name: &str) -> StoreResult<u64> {
        Ok(self.dataset(name)?.len)
    }

    fn contains(&self, name: &str) -> bool {
        self.open.read().contains_key(name)
            || (validate_name(name).is_ok() && self.dataset_path(name).is_file())
    }

    fn remove_dataset(&self, name: &str) -> StoreResult<()> {
        validate_name(name)?;
        self.open.write().remove(name);
        match fs::remove_file(self.dataset_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn rename_dataset(&self, from: &str, to: &str) -> StoreResult<()> {
        validate_name(from)?;
        validate_name(to)?;
        if !self.contains(from) {
            return Err(StoreError::NotFound(from.to_string()));
        }

        self.close(from)?;
        self.open.write().remove(to);
        // Replaces an existing target in one step.
        fs::rename(self.dataset_path(from), self.dataset_path(to))?;
        tracing::debug!(from, to, "Renamed dataset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn values(n: usize) -> Vec<Complex64> {
        (0..n)
            .map(|i| Complex64::new(i as f64 * 0.5, 1.0 / (i as f64 + 1.0)))
            .collect()
    }

    #[test]
    fn test_create_write_read() {
        let dir = tempdir().unwrap();
        let store = MmapStore::open(dir.path()).unwrap();

        store.create_dataset("signal", 100).unwrap();
        store.write_slice("signal", 10, &values(20)).unwrap();

        assert_eq!(store.dataset_len("signal").unwrap(), 100);
        assert_eq!(store.read_slice("signal", 10, 20).unwrap(), values(20));
        assert_eq!(
            store.read_slice("signal", 0, 1).unwrap()[0],
            Complex64::default()
        );
    }

    #[test]
    fn test_reopen_persists_data() {
        let dir = tempdir().unwrap();
        {
            let store = MmapStore::open(dir.path()).unwrap();
            store.create_dataset("persist", 8).unwrap();
            store.write_slice("persist", 0, &values(8)).unwrap();
            store.flush("persist").unwrap();
        }

        let store = MmapStore::open(dir.path()).unwrap();
        assert!(store.contains("persist"));
        assert_eq!(store.read_slice("persist", 0, 8).unwrap(), values(8));
    }

    #[test]
    fn test_rename_finalizes_partial() {
        let dir = tempdir().unwrap();
        let store = MmapStore::open(dir.path()).unwrap();

        store.create_dataset("out", 2).unwrap();
        store.create_dataset("out.partial", 4).unwrap();
        store.write_slice("out.partial", 0, &values(4)).unwrap();
        store.rename_dataset("out.partial", "out").unwrap();

        assert!(!store.contains("out.partial"));
        assert!(!store.dataset_path("out.partial").exists());
        assert_eq!(store.dataset_len("out").unwrap(), 4);
        assert_eq!(store.read_slice("out", 0, 4).unwrap(), values(4));
    }

    #[test]
    fn test_corrupt_magic_rejected() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("junk.c128"), vec![0u8; 64]).unwrap();
        let store = MmapStore::open(dir.path()).unwrap();

        let err = store.dataset_len("junk").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_remove_missing_dataset() {
        let dir = tempdir().unwrap();
        let store = MmapStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.remove_dataset("ghost"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_out_of_bounds_read() {
        let dir = tempdir().unwrap();
        let store = MmapStore::open(dir.path()).unwrap();
        store.create_dataset("small", 4).unwrap();
        assert!(matches!(
            store.read_slice("small", 3, 2),
            Err(StoreError::OutOfBounds { .. })
        ));
    }
}
