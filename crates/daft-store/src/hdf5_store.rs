//! HDF5 dataset store.
//!
//! All datasets live at the root group of one HDF5 file. Elements use the
//! compound type `{r: f64, i: f64}`, which h5py maps to NumPy `complex128`.
//! The HDF5 library is not re-entrant unless built thread-safe, so every
//! call goes through a single file lock.

use hdf5::{File, H5Type};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

use crate::{check_range, validate_name, ArrayStore, Complex64, StoreError, StoreResult};

/// On-disk element layout (h5py complex convention).
#[derive(H5Type, Clone, Copy, Debug, Default, PartialEq)]
#[repr(C)]
struct C128 {
    r: f64,
    i: f64,
}

impl From<Complex64> for C128 {
    fn from(value: Complex64) -> Self {
        Self {
            r: value.re,
            i: value.im,
        }
    }
}

impl From<C128> for Complex64 {
    fn from(value: C128) -> Self {
        Complex64::new(value.r, value.i)
    }
}

/// [`ArrayStore`] backed by a single HDF5 file.
pub struct Hdf5Store {
    path: PathBuf,
    file: Mutex<File>,
}

impl std::fmt::Debug for Hdf5Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hdf5Store").field("path", &self.path).finish()
    }
}

impl Hdf5Store {
    /// Open an existing file read-write, or create it.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = if path.exists() {
            File::open_rw(&path)?
        } else {
            File::create(&path)?
        };
        tracing::debug!(path = %path.display(), "Opened HDF5 dataset store");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush the file to disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.file.lock().flush()?;
        Ok(())
    }

    fn dataset(file: &File, name: &str) -> StoreResult<hdf5::Dataset> {
        if !file.link_exists(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Ok(file.dataset(name)?)
    }
}

impl ArrayStore for Hdf5Store {
    fn create_dataset(&self, name: &str, len: u64) -> StoreResult<()> {
        validate_name(name)?;
        let file = self.file.lock();
        if file.link_exists(name) {
            file.unlink(name)?;
        }
        file.new_dataset::<C128>()
            .shape(len as usize)
            .create(name)?;
        tracing::debug!(dataset = name, elements = len, "Created HDF5 dataset");
        Ok(())
    }

    fn write_slice(&self, name: &str, offset: u64, values: &[Complex64]) -> StoreResult<()> {
        let file = self.file.lock();
        let dataset = Self::dataset(&file, name)?;
        check_range(name, offset, values.len() as u64, dataset.size() as u64)?;

        let encoded: Vec<C128> = values.iter().copied().map(C128::from).collect();
        let start = offset as usize;
        dataset.write_slice(&encoded[..], start..start + encoded.len())?;
        Ok(())
    }

    fn read_slice(&self, name: &str, offset: u64, len: usize) -> StoreResult<Vec<Complex64>> {
        let file = self.file.lock();
        let dataset = Self::dataset(&file, name)?;
        check_range(name, offset, len as u64, dataset.size() as u64)?;
        if len == 0 {
            return Ok(Vec::new());
        }

        let start = offset as usize;
        let raw = dataset.read_slice_1d::<C128, _>(start..start + len)?;
        Ok(raw.iter().copied().map(Complex64::from).collect())
    }

    fn dataset_len(&self, name: &str) -> StoreResult<u64> {
        let file = self.file.lock();
        Ok(Self::dataset(&file, name)?.size() as u64)
    }

    fn contains(&self, name: &str) -> bool {
        self.file.lock().link_exists(name)
    }

    fn remove_dataset(&self, name: &str) -> StoreResult<()> {
        let file = self.file.lock();
        if !file.link_exists(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        file.unlink(name)?;
        Ok(())
    }

    fn rename_dataset(&self, from: &str, to: &str) -> StoreResult<()> {
        validate_name(to)?;
        let file = self.file.lock();
        if !file.link_exists(from) {
            return Err(StoreError::NotFound(from.to_string()));
        }
        if file.link_exists(to) {
            file.unlink(to)?;
        }
        file.relink(from, to)?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_hdf5_roundtrip_and_rename() {
        let dir = tempdir().unwrap();
        let store = Hdf5Store::open(dir.path().join("spectra.h5")).unwrap();
        let values: Vec<Complex64> = (0..6).map(|i| Complex64::new(i as f64, 1.0)).collect();

        store.create_dataset("fft.partial", 6).unwrap();
        store.write_slice("fft.partial", 0, &values).unwrap();
        store.rename_dataset("fft.partial", "fft").unwrap();

        assert!(!store.contains("fft.partial"));
        assert_eq!(store.read_slice("fft", 2, 3).unwrap(), values[2..5].to_vec());
    }
}
