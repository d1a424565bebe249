use parking_lot::RwLock;
use std::collections::HashMap;

use crate::{check_range, validate_name, ArrayStore, Complex64, StoreError, StoreResult};

/// Process-local [`ArrayStore`] backed by vectors.
///
/// Useful for tests and as a spill tier when the "persistent" store only has
/// to outlive individual cache entries.
#[derive(Debug, Default)]
pub struct MemoryStore {
    datasets: RwLock<HashMap<String, Vec<Complex64>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all datasets, sorted.
    pub fn dataset_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.datasets.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl ArrayStore for MemoryStore {
    fn create_dataset(&self, name: &str, len: u64) -> StoreResult<()> {
        validate_name(name)?;
        self.datasets
            .write()
            .insert(name.to_string(), vec![Complex64::default(); len as usize]);
        Ok(())
    }

    fn write_slice(&self, name: &str, offset: u64, values: &[Complex64]) -> StoreResult<()> {
        let mut datasets = self.datasets.write();
        let data = datasets
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        check_range(name, offset, values.len() as u64, data.len() as u64)?;
        let start = offset as usize;
        data[start..start + values.len()].copy_from_slice(values);
        Ok(())
    }

    fn read_slice(&self, name: &str, offset: u64, len: usize) -> StoreResult<Vec<Complex64>> {
        let datasets = self.datasets.read();
        let data = datasets
            .get(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        check_range(name, offset, len as u64, data.len() as u64)?;
        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn dataset_len(&self, name: &str) -> StoreResult<u64> {
        self.datasets
            .read()
            .get(name)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn contains(&self, name: &str) -> bool {
        self.datasets.read().contains_key(name)
    }

    fn remove_dataset(&self, name: &str) -> StoreResult<()> {
        self.datasets
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn rename_dataset(&self, from: &str, to: &str) -> StoreResult<()> {
        validate_name(to)?;
        let mut datasets = self.datasets.write();
        let data = datasets
            .remove(from)
            .ok_or_else(|| StoreError::NotFound(from.to_string()))?;
        datasets.insert(to.to_string(), data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_range() {
        let store = MemoryStore::new();
        store.create_dataset("a", 8).unwrap();
        let values = [Complex64::new(1.0, 2.0), Complex64::new(3.0, 4.0)];
        store.write_slice("a", 5, &values).unwrap();

        let read = store.read_slice("a", 4, 4).unwrap();
        assert_eq!(read[0], Complex64::default());
        assert_eq!(&read[1..3], &values);
    }

    #[test]
    fn create_overwrites_existing() {
        let store = MemoryStore::new();
        store.create_dataset("a", 2).unwrap();
        store.write_slice("a", 0, &[Complex64::new(9.0, 9.0)]).unwrap();
        store.create_dataset("a", 4).unwrap();
        assert_eq!(store.dataset_len("a").unwrap(), 4);
        assert_eq!(store.read_slice("a", 0, 1).unwrap()[0], Complex64::default());
    }

    #[test]
    fn out_of_bounds_write_rejected() {
        let store = MemoryStore::new();
        store.create_dataset("a", 2).unwrap();
        let err = store
            .write_slice("a", 1, &[Complex64::default(); 2])
            .unwrap_err();
        assert!(matches!(err, StoreError::OutOfBounds { len: 2, .. }));
    }

    #[test]
    fn rename_replaces_target() {
        let store = MemoryStore::new();
        store.create_dataset("old", 1).unwrap();
        store.create_dataset("new.partial", 3).unwrap();
        store.rename_dataset("new.partial", "old").unwrap();
        assert_eq!(store.dataset_names(), vec!["old".to_string()]);
        assert_eq!(store.dataset_len("old").unwrap(), 3);
    }

    #[test]
    fn missing_dataset_reports_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.read_slice("nope", 0, 1),
            Err(StoreError::NotFound(_))
        ));
        assert!(!store.contains("nope"));
    }
}
