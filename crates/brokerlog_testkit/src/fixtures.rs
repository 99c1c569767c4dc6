//! Test fixtures and journal helpers.
//!
//! Provides convenience functions for setting up test journals and common
//! test scenarios.

use brokerlog_core::{Journal, JournalConfig, Record};
use brokerlog_storage::{FileFactory, FileSystemFactory, InMemoryFactory};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Journal file size used by tests. Small enough that a few dozen records
/// span several files.
pub const TEST_FILE_SIZE: usize = 1024;

/// Configuration for tests: small files, no per-append sync, and
/// compaction suggested from two closed files.
pub fn small_config() -> JournalConfig {
    JournalConfig::new()
        .file_size(TEST_FILE_SIZE)
        .sync_on_write(false)
        .compact_min_files(2)
}

/// Installs a `tracing` subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic record body for `id` at `version`.
pub fn body_for(id: i64, version: u32, len: usize) -> Vec<u8> {
    let seed = (id as u64).wrapping_mul(31).wrapping_add(u64::from(version));
    (0..len).map(|i| (seed.wrapping_add(i as u64) & 0xFF) as u8).collect()
}

enum Backing {
    Memory(InMemoryFactory),
    Disk(PathBuf),
}

/// A test journal with automatic cleanup.
pub struct TestJournal {
    /// The journal instance.
    pub journal: Journal,
    config: JournalConfig,
    backing: Backing,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestJournal {
    /// Creates a new in-memory test journal with [`small_config`].
    pub fn memory() -> Self {
        Self::memory_with(small_config())
    }

    /// Creates a new in-memory test journal.
    pub fn memory_with(config: JournalConfig) -> Self {
        let factory = InMemoryFactory::new();
        let journal = Journal::open(Arc::new(factory.clone()), config.clone())
            .expect("Failed to open in-memory journal");
        Self {
            journal,
            config,
            backing: Backing::Memory(factory),
            _temp_dir: None,
        }
    }

    /// Creates a new journal in a temporary directory with [`small_config`].
    pub fn file() -> Self {
        Self::file_with(small_config())
    }

    /// Creates a new journal in a temporary directory.
    pub fn file_with(config: JournalConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().join("journal");
        let journal = open_on_disk(&path, config.clone());
        Self {
            journal,
            config,
            backing: Backing::Disk(path),
            _temp_dir: Some(temp_dir),
        }
    }

    /// Closes the journal and opens it again over the same files.
    pub fn reopen(self) -> Self {
        let Self {
            journal,
            config,
            backing,
            _temp_dir,
        } = self;
        journal.close().expect("Failed to close journal");
        drop(journal);

        let journal = match &backing {
            Backing::Memory(factory) => Journal::open(Arc::new(factory.clone()), config.clone())
                .expect("Failed to reopen in-memory journal"),
            Backing::Disk(path) => open_on_disk(path, config.clone()),
        };
        Self {
            journal,
            config,
            backing,
            _temp_dir,
        }
    }

    /// Returns the in-memory factory, if the journal is in memory.
    pub fn memory_factory(&self) -> Option<&InMemoryFactory> {
        match &self.backing {
            Backing::Memory(factory) => Some(factory),
            Backing::Disk(_) => None,
        }
    }

    /// Returns the journal directory if file-based, None if in-memory.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Memory(_) => None,
            Backing::Disk(path) => Some(path),
        }
    }

    /// Names of the data files on storage, sorted.
    pub fn data_file_names(&self) -> Vec<String> {
        let extension = &self.config.file_extension;
        match &self.backing {
            Backing::Memory(factory) => factory.list(extension),
            Backing::Disk(path) => FileSystemFactory::open(path).and_then(|f| f.list(extension)),
        }
        .expect("Failed to list journal files")
    }
}

impl std::ops::Deref for TestJournal {
    type Target = Journal;

    fn deref(&self) -> &Self::Target {
        &self.journal
    }
}

fn open_on_disk(path: &Path, config: JournalConfig) -> Journal {
    let factory = FileSystemFactory::open_locked(path).expect("Failed to lock journal directory");
    Journal::open(Arc::new(factory), config).expect("Failed to open file journal")
}

/// Runs a test with a temporary in-memory journal.
///
/// # Example
///
/// ```rust,ignore
/// use brokerlog_testkit::with_temp_journal;
///
/// #[test]
/// fn my_test() {
///     with_temp_journal(|journal| {
///         journal.append_add(Record::new(1, 0, b"x".to_vec())).unwrap();
///     });
/// }
/// ```
pub fn with_temp_journal<F, R>(f: F) -> R
where
    F: FnOnce(&Journal) -> R,
{
    let test_journal = TestJournal::memory();
    f(&test_journal.journal)
}

/// Runs a test with a journal in a temporary directory.
pub fn with_file_journal<F, R>(f: F) -> R
where
    F: FnOnce(&Journal, &Path) -> R,
{
    let test_journal = TestJournal::file();
    let path = test_journal
        .path()
        .expect("File journal should have a path")
        .to_path_buf();
    f(&test_journal.journal, &path)
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A journal holding `count` records with ids `0..count`, of which every
    /// id divisible by `delete_every` has been deleted again.
    pub fn churned_journal(count: i64, delete_every: i64) -> TestJournal {
        let test_journal = TestJournal::memory();
        for id in 0..count {
            test_journal
                .append_add(Record::new(id, 0, body_for(id, 0, 48)))
                .expect("Failed to append record");
        }
        for id in (0..count).filter(|id| id % delete_every == 0) {
            test_journal
                .append_delete(id)
                .expect("Failed to delete record");
        }
        test_journal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_journal() {
        let test_journal = TestJournal::memory();
        assert!(test_journal.memory_factory().is_some());
        assert!(test_journal.path().is_none());
        assert_eq!(test_journal.live_records(), 0);
    }

    #[test]
    fn test_reopen_keeps_records() {
        let test_journal = TestJournal::file();
        test_journal
            .append_add(Record::new(7, 0, body_for(7, 0, 16)))
            .unwrap();

        let test_journal = test_journal.reopen();
        assert!(test_journal.contains(7));
        assert!(!test_journal.data_file_names().is_empty());
    }

    #[test]
    fn test_with_temp_journal() {
        let live = with_temp_journal(|journal| {
            journal.append_add(Record::new(1, 0, Vec::new())).unwrap();
            journal.live_records()
        });
        assert_eq!(live, 1);
    }

    #[test]
    fn test_with_file_journal() {
        with_file_journal(|journal, path| {
            journal.append_add(Record::new(1, 0, Vec::new())).unwrap();
            assert!(path.join("LOCK").exists());
        });
    }

    #[test]
    fn test_churned_scenario() {
        init_tracing();
        let test_journal = scenarios::churned_journal(40, 4);
        assert_eq!(test_journal.live_records(), 30);
        assert!(test_journal.data_files().len() >= 2);
    }

    #[test]
    fn test_body_for_is_deterministic() {
        assert_eq!(body_for(3, 1, 8), body_for(3, 1, 8));
        assert_ne!(body_for(3, 1, 8), body_for(3, 2, 8));
        assert_eq!(body_for(3, 1, 0).len(), 0);
    }
}
