//! Directory-backed file factory for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::factory::{has_extension, FileFactory, SequentialFile};
use fs2::FileExt;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Name of the advisory lock file inside a locked directory.
const LOCK_FILE: &str = "LOCK";

/// A file factory over one directory.
///
/// # Durability
///
/// - [`SequentialFile::flush`] calls `File::flush()` to push data to the OS
/// - [`SequentialFile::sync`] calls `File::sync_all()`
/// - [`FileFactory::sync_directory`] fsyncs the directory so that creations,
///   renames and deletions survive a crash (no-op on non-Unix platforms)
///
/// # Example
///
/// ```no_run
/// use brokerlog_storage::{FileFactory, FileSystemFactory};
/// use std::path::Path;
///
/// let factory = FileSystemFactory::open_locked(Path::new("journal")).unwrap();
/// let mut file = factory.open("journal-1.jrn").unwrap();
/// file.append(b"persistent data").unwrap();
/// file.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileSystemFactory {
    dir: PathBuf,
    /// Lock file handle, held for exclusive access.
    _lock_file: Option<File>,
}

impl FileSystemFactory {
    /// Opens a directory, creating it if needed, without locking it.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the path is
    /// not a directory.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        if !dir.is_dir() {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("path is not a directory: {}", dir.display()),
            )));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock_file: None,
        })
    }

    /// Opens a directory and takes an exclusive advisory lock on it.
    ///
    /// The lock is released when the factory is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Locked`] if another process holds the lock.
    pub fn open_locked(dir: &Path) -> StorageResult<Self> {
        let mut factory = Self::open(dir)?;

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        factory._lock_file = Some(lock_file);
        Ok(factory)
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn resolve(&self, name: &str) -> StorageResult<PathBuf> {
        let invalid = name.is_empty()
            || name == "."
            || name == ".."
            || name == LOCK_FILE
            || name.contains('/')
            || name.contains('\\');
        if invalid {
            return Err(StorageError::InvalidName {
                name: name.to_string(),
            });
        }
        Ok(self.dir.join(name))
    }
}

fn map_not_found(err: io::Error, name: &str) -> StorageError {
    if err.kind() == io::ErrorKind::NotFound {
        StorageError::not_found(name)
    } else {
        StorageError::Io(err)
    }
}

impl FileFactory for FileSystemFactory {
    fn open(&self, name: &str) -> StorageResult<Box<dyn SequentialFile>> {
        let path = self.resolve(name)?;
        Ok(Box::new(FsFile::open(&path, name, true)?))
    }

    fn open_existing(&self, name: &str) -> StorageResult<Box<dyn SequentialFile>> {
        let path = self.resolve(name)?;
        Ok(Box::new(FsFile::open(&path, name, false)?))
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        Ok(self.resolve(name)?.exists())
    }

    fn delete(&self, name: &str) -> StorageResult<()> {
        let path = self.resolve(name)?;
        fs::remove_file(&path).map_err(|e| map_not_found(e, name))
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        let from_path = self.resolve(from)?;
        let to_path = self.resolve(to)?;
        fs::rename(&from_path, &to_path).map_err(|e| map_not_found(e, from))
    }

    fn list(&self, extension: &str) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if has_extension(name, extension) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> StorageResult<()> {
        // fsync on a directory syncs its entries
        let dir = File::open(&self.dir)?;
        dir.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> StorageResult<()> {
        // NTFS journals metadata; directory handles cannot be fsynced
        Ok(())
    }
}

/// A file opened through a [`FileSystemFactory`].
#[derive(Debug)]
pub struct FsFile {
    name: String,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl FsFile {
    fn open(path: &Path, name: &str, create: bool) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)
            .map_err(|e| map_not_found(e, name))?;

        let size = file.metadata()?.len();
        tracing::trace!(file = name, size, "opened journal file");

        Ok(Self {
            name: name.to_string(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }
}

impl SequentialFile for FsFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        if data.is_empty() {
            return Ok(());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        *size = (*size).max(offset + data.len() as u64);

        Ok(())
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        if data.is_empty() {
            return Ok(*self.size.read());
        }

        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file.write().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(*self.size.read())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let file = self.file.write();
        let mut size = self.size.write();

        if new_size > *size {
            return Err(StorageError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate to size {} which is greater than current size {}",
                    new_size, *size
                ),
            )));
        }

        file.set_len(new_size)?;
        file.sync_all()?;
        *size = new_size;

        Ok(())
    }
}
