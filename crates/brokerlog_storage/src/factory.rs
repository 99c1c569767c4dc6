//! Sequential file and file factory traits.

use crate::error::StorageResult;

/// A named, positioned byte store.
///
/// Journal files and the compaction control file are both `SequentialFile`s.
/// The handle stays valid after its name is renamed, the same way an open
/// descriptor survives `rename(2)`.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `write_at` past the end zero-fills the gap
/// - `sync` makes all written data durable
pub trait SequentialFile: Send + Sync {
    /// Returns the file name inside its factory.
    fn name(&self) -> &str;

    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::ReadPastEnd`] if the range extends
    /// beyond the current size, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Reads the whole file.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined or the read fails.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        self.read_at(0, size as usize)
    }

    /// Writes `data` at `offset`, extending the file if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Appends data to the end of the file and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size of the file in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Truncates the file to `new_size`.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is greater than the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;
}

/// A flat namespace of sequential files, typically one directory.
///
/// These are the only filesystem operations the journal and its compactor
/// perform. Renames replace an existing target, matching POSIX `rename`.
pub trait FileFactory: Send + Sync {
    /// Opens a file, creating it empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is invalid or the file cannot be opened.
    fn open(&self, name: &str) -> StorageResult<Box<dyn SequentialFile>>;

    /// Opens a file that must already exist.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if the file does not exist.
    fn open_existing(&self, name: &str) -> StorageResult<Box<dyn SequentialFile>>;

    /// Returns whether a file with this name exists.
    ///
    /// # Errors
    ///
    /// Returns an error if existence cannot be determined.
    fn exists(&self, name: &str) -> StorageResult<bool>;

    /// Deletes a file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if the file does not exist.
    fn delete(&self, name: &str) -> StorageResult<()>;

    /// Renames `from` to `to`, replacing `to` if it exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StorageError::NotFound`] if `from` does not exist.
    fn rename(&self, from: &str, to: &str) -> StorageResult<()>;

    /// Lists file names ending in `.{extension}`, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be listed.
    fn list(&self, extension: &str) -> StorageResult<Vec<String>>;

    /// Makes creations, renames and deletions durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory sync fails.
    fn sync_directory(&self) -> StorageResult<()>;
}

/// Returns true if `name` ends in `.{extension}`.
pub(crate) fn has_extension(name: &str, extension: &str) -> bool {
    name.len() > extension.len() + 1
        && name.ends_with(extension)
        && name.as_bytes()[name.len() - extension.len() - 1] == b'.'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_matching() {
        assert!(has_extension("journal-1.jrn", "jrn"));
        assert!(has_extension("journal-1.cmp", "cmp"));
        assert!(!has_extension("journal-1.jrn", "cmp"));
        assert!(!has_extension("jrn", "jrn"));
        assert!(!has_extension(".jrn", "jrn"));
        assert!(!has_extension("journal-1xjrn", "jrn"));
    }
}
