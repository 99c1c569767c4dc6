//! In-memory file factory for testing.

use crate::error::{StorageError, StorageResult};
use crate::factory::{has_extension, FileFactory, SequentialFile};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

type SharedData = Arc<RwLock<Vec<u8>>>;

/// An in-memory file factory.
///
/// All files live in a shared map, so clones of the factory see the same
/// namespace. This makes it suitable for:
/// - Unit tests
/// - Crash simulation (drop the journal, reopen from the same factory)
///
/// Open handles keep referring to the same bytes after a rename or delete,
/// mirroring descriptor semantics on POSIX filesystems.
///
/// # Example
///
/// ```rust
/// use brokerlog_storage::{FileFactory, InMemoryFactory};
///
/// let factory = InMemoryFactory::new();
/// factory.open("a.jrn").unwrap().append(b"data").unwrap();
/// factory.rename("a.jrn", "b.jrn").unwrap();
/// assert_eq!(factory.list("jrn").unwrap(), vec!["b.jrn".to_string()]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryFactory {
    files: Arc<RwLock<BTreeMap<String, SharedData>>>,
}

impl InMemoryFactory {
    /// Creates a new empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces a file with the given contents.
    ///
    /// Useful for testing recovery scenarios.
    pub fn insert_file(&self, name: &str, data: Vec<u8>) {
        self.files
            .write()
            .insert(name.to_string(), Arc::new(RwLock::new(data)));
    }

    /// Returns a copy of a file's contents, if it exists.
    #[must_use]
    pub fn file_data(&self, name: &str) -> Option<Vec<u8>> {
        self.files.read().get(name).map(|data| data.read().clone())
    }

    /// Returns all file names, sorted.
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }
}

impl FileFactory for InMemoryFactory {
    fn open(&self, name: &str) -> StorageResult<Box<dyn SequentialFile>> {
        let data = Arc::clone(self.files.write().entry(name.to_string()).or_default());
        Ok(Box::new(InMemoryFile {
            name: name.to_string(),
            data,
        }))
    }

    fn open_existing(&self, name: &str) -> StorageResult<Box<dyn SequentialFile>> {
        let data = self
            .files
            .read()
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| StorageError::not_found(name))?;
        Ok(Box::new(InMemoryFile {
            name: name.to_string(),
            data,
        }))
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.files.read().contains_key(name))
    }

    fn delete(&self, name: &str) -> StorageResult<()> {
        match self.files.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(StorageError::not_found(name)),
        }
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let mut files = self.files.write();
        let data = files.remove(from).ok_or_else(|| StorageError::not_found(from))?;
        files.insert(to.to_string(), data);
        Ok(())
    }

    fn list(&self, extension: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .files
            .read()
            .keys()
            .filter(|name| has_extension(name, extension))
            .cloned()
            .collect())
    }

    fn sync_directory(&self) -> StorageResult<()> {
        // Nothing to make durable
        Ok(())
    }
}

/// A file held in an [`InMemoryFactory`].
#[derive(Debug)]
pub struct InMemoryFile {
    name: String,
    data: SharedData,
}

impl SequentialFile for InMemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[offset as usize..end as usize].to_vec())
    }

    fn write_at(&mut self, offset: u64, new_data: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let start = offset as usize;
        let end = start + new_data.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(new_data);
        Ok(())
    }

    fn append(&mut self, new_data: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(new_data);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let current_size = data.len() as u64;

        if new_size > current_size {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {} which is greater than current size {}",
                    new_size, current_size
                ),
            )));
        }

        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_empty_file() {
        let factory = InMemoryFactory::new();
        let file = factory.open("a.jrn").unwrap();
        assert_eq!(file.size().unwrap(), 0);
        assert_eq!(file.name(), "a.jrn");
        assert!(factory.exists("a.jrn").unwrap());
    }

    #[test]
    fn append_returns_offsets() {
        let factory = InMemoryFactory::new();
        let mut file = factory.open("a.jrn").unwrap();

        assert_eq!(file.append(b"hello").unwrap(), 0);
        assert_eq!(file.append(b" world").unwrap(), 5);
        assert_eq!(file.read_all().unwrap(), b"hello world");
    }

    #[test]
    fn write_at_extends_with_zeros() {
        let factory = InMemoryFactory::new();
        let mut file = factory.open("a.jrn").unwrap();

        file.write_at(4, b"xy").unwrap();
        assert_eq!(file.read_all().unwrap(), vec![0, 0, 0, 0, b'x', b'y']);

        file.write_at(0, b"ab").unwrap();
        assert_eq!(file.read_at(0, 2).unwrap(), b"ab");
        assert_eq!(file.size().unwrap(), 6);
    }

    #[test]
    fn read_past_end_fails() {
        let factory = InMemoryFactory::new();
        let mut file = factory.open("a.jrn").unwrap();
        file.append(b"hello").unwrap();

        assert!(matches!(
            file.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn clones_share_namespace() {
        let factory = InMemoryFactory::new();
        let other = factory.clone();

        factory.open("a.jrn").unwrap().append(b"x").unwrap();
        assert_eq!(other.file_data("a.jrn"), Some(b"x".to_vec()));
    }

    #[test]
    fn rename_moves_contents() {
        let factory = InMemoryFactory::new();
        factory.insert_file("a.cmp", b"new".to_vec());
        factory.insert_file("a.jrn", b"old".to_vec());

        factory.rename("a.cmp", "a.jrn").unwrap();

        assert!(!factory.exists("a.cmp").unwrap());
        assert_eq!(factory.file_data("a.jrn"), Some(b"new".to_vec()));
    }

    #[test]
    fn rename_missing_fails() {
        let factory = InMemoryFactory::new();
        let err = factory.rename("missing", "other").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn open_existing_does_not_create() {
        let factory = InMemoryFactory::new();
        assert!(factory.open_existing("missing").err().unwrap().is_not_found());
        assert!(!factory.exists("missing").unwrap());

        factory.insert_file("present", b"abc".to_vec());
        let file = factory.open_existing("present").unwrap();
        assert_eq!(file.read_all().unwrap(), b"abc");
    }

    #[test]
    fn delete_missing_fails() {
        let factory = InMemoryFactory::new();
        assert!(factory.delete("missing").unwrap_err().is_not_found());
    }

    #[test]
    fn handle_survives_rename() {
        let factory = InMemoryFactory::new();
        let mut file = factory.open("a.cmp").unwrap();
        factory.rename("a.cmp", "a.jrn").unwrap();

        file.append(b"late").unwrap();
        assert_eq!(factory.file_data("a.jrn"), Some(b"late".to_vec()));
    }

    #[test]
    fn list_filters_by_extension() {
        let factory = InMemoryFactory::new();
        factory.insert_file("journal-2.jrn", Vec::new());
        factory.insert_file("journal-1.jrn", Vec::new());
        factory.insert_file("journal-3.cmp", Vec::new());

        assert_eq!(
            factory.list("jrn").unwrap(),
            vec!["journal-1.jrn".to_string(), "journal-2.jrn".to_string()]
        );
        assert_eq!(factory.list("cmp").unwrap(), vec!["journal-3.cmp".to_string()]);
    }

    #[test]
    fn truncate_partial() {
        let factory = InMemoryFactory::new();
        let mut file = factory.open("a.jrn").unwrap();
        file.append(b"hello world").unwrap();

        file.truncate(5).unwrap();
        assert_eq!(file.read_all().unwrap(), b"hello");
        assert!(file.truncate(100).is_err());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn positioned_writes_match_model(
                writes in prop::collection::vec(
                    (0u64..512, prop::collection::vec(any::<u8>(), 0..64)),
                    1..20,
                ),
            ) {
                let factory = InMemoryFactory::new();
                let mut file = factory.open("a.jrn").unwrap();
                let mut model: Vec<u8> = Vec::new();

                for (offset, data) in &writes {
                    file.write_at(*offset, data).unwrap();
                    let start = *offset as usize;
                    let end = start + data.len();
                    if model.len() < end {
                        model.resize(end, 0);
                    }
                    model[start..end].copy_from_slice(data);
                }

                prop_assert_eq!(file.size().unwrap(), model.len() as u64);
                prop_assert_eq!(factory.file_data("a.jrn").unwrap(), model);
            }
        }
    }
}
