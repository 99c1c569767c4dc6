//! Crash recovery testing for the journal.
//!
//! This module simulates crashes at each step of a compaction and verifies
//! that reopening the journal directory yields the same live records.
//!
//! ## Test Strategy
//!
//! 1. **Crash before the control file** - the original files stay in use
//! 2. **Crash while writing `.cmp` files** - partial output is discarded
//! 3. **Crash after the control file** - recovery performs every rename
//! 4. **Crash between renames** - recovery performs the remaining renames
//! 5. **Crash before old files are deleted** - recovery deletes them
//!
//! A crash is an injected storage error: once the armed point is reached,
//! every operation through the [`FaultyFactory`] fails. The journal is then
//! dropped and reopened over the underlying [`InMemoryFactory`], which
//! still holds exactly the bytes written before the crash.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use brokerlog_testkit::crash::{CrashPoint, CrashRecoveryHarness};
//!
//! let mut harness = CrashRecoveryHarness::new();
//! let result = harness.test_crash_at(CrashPoint::DuringRenames);
//! assert!(result.passed, "{}", harness.summary());
//! ```

use crate::fixtures::{body_for, small_config};
use crate::generators::JournalModel;
use brokerlog_core::compaction::{CONTROL_FILE_NAME, CONTROL_TEMP_NAME};
use brokerlog_core::{Journal, JournalConfig, JournalResult, Record, COMPACTING_EXTENSION};
use brokerlog_storage::{FileFactory, InMemoryFactory, SequentialFile, StorageError, StorageResult};
use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Points during compaction at which a crash can be simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Crash when the temporary control file is created.
    BeforeControlFile,
    /// Crash on the first write to a `.cmp` file.
    DuringCompactionWrite,
    /// Crash on the first rename of a `.cmp` file.
    AfterControlFile,
    /// Crash on the second rename of a `.cmp` file.
    DuringRenames,
    /// Crash on the first deletion of an old data file.
    BeforeOldFileDeletion,
}

impl CrashPoint {
    /// Every crash point, in the order they occur during a compaction.
    pub const ALL: [CrashPoint; 5] = [
        CrashPoint::BeforeControlFile,
        CrashPoint::DuringCompactionWrite,
        CrashPoint::AfterControlFile,
        CrashPoint::DuringRenames,
        CrashPoint::BeforeOldFileDeletion,
    ];

    /// Returns true if the control file is durable when this point is
    /// reached, so recovery must finish the compaction.
    #[must_use]
    pub const fn is_committed(self) -> bool {
        matches!(
            self,
            CrashPoint::AfterControlFile
                | CrashPoint::DuringRenames
                | CrashPoint::BeforeOldFileDeletion
        )
    }

    /// Human-readable test description.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            CrashPoint::BeforeControlFile => "Crash before the control file is written",
            CrashPoint::DuringCompactionWrite => "Crash while writing compacted files",
            CrashPoint::AfterControlFile => "Crash after the control file is committed",
            CrashPoint::DuringRenames => "Crash between compacted file renames",
            CrashPoint::BeforeOldFileDeletion => "Crash before old files are deleted",
        }
    }
}

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Expected live records after recovery.
    pub expected_records: usize,
    /// Actual live records after recovery.
    pub actual_records: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, records: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_records: records,
            actual_records: records,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_records: expected,
            actual_records: actual,
            error: Some(error.to_string()),
        }
    }
}

enum Operation<'a> {
    Open(&'a str),
    Write(&'a str),
    Rename(&'a str),
    Delete(&'a str),
}

struct FaultState {
    point: CrashPoint,
    armed: AtomicBool,
    crashed: AtomicBool,
    compacted_renames: AtomicUsize,
}

impl FaultState {
    fn check(&self, operation: &Operation<'_>) -> StorageResult<()> {
        if self.crashed.load(Ordering::SeqCst) {
            return Err(crash_error());
        }
        if self.armed.load(Ordering::SeqCst) && self.trips(operation) {
            self.crashed.store(true, Ordering::SeqCst);
            return Err(crash_error());
        }
        Ok(())
    }

    fn trips(&self, operation: &Operation<'_>) -> bool {
        match (self.point, operation) {
            (CrashPoint::BeforeControlFile, Operation::Open(name)) => *name == CONTROL_TEMP_NAME,
            (CrashPoint::DuringCompactionWrite, Operation::Write(name)) => is_compacting(name),
            (CrashPoint::AfterControlFile, Operation::Rename(from)) => is_compacting(from),
            (CrashPoint::DuringRenames, Operation::Rename(from)) => {
                is_compacting(from) && self.compacted_renames.fetch_add(1, Ordering::SeqCst) == 1
            }
            (CrashPoint::BeforeOldFileDeletion, Operation::Delete(name)) => {
                !is_compacting(name) && *name != CONTROL_FILE_NAME && *name != CONTROL_TEMP_NAME
            }
            _ => false,
        }
    }
}

fn is_compacting(name: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, extension)| extension == COMPACTING_EXTENSION)
}

fn crash_error() -> StorageError {
    StorageError::Io(io::Error::new(io::ErrorKind::Other, "simulated crash"))
}

/// A file factory that fails every operation from an armed crash point on.
#[derive(Clone)]
pub struct FaultyFactory {
    inner: InMemoryFactory,
    state: Arc<FaultState>,
}

impl FaultyFactory {
    /// Wraps `inner`. The crash point is disarmed until [`FaultyFactory::arm`].
    pub fn new(inner: InMemoryFactory, point: CrashPoint) -> Self {
        Self {
            inner,
            state: Arc::new(FaultState {
                point,
                armed: AtomicBool::new(false),
                crashed: AtomicBool::new(false),
                compacted_renames: AtomicUsize::new(0),
            }),
        }
    }

    /// Arms the crash point.
    pub fn arm(&self) {
        self.state.armed.store(true, Ordering::SeqCst);
    }

    /// Returns true once the crash has happened.
    pub fn has_crashed(&self) -> bool {
        self.state.crashed.load(Ordering::SeqCst)
    }

    /// Returns the factory holding the surviving files.
    pub fn inner(&self) -> &InMemoryFactory {
        &self.inner
    }
}

impl FileFactory for FaultyFactory {
    fn open(&self, name: &str) -> StorageResult<Box<dyn SequentialFile>> {
        self.state.check(&Operation::Open(name))?;
        let inner = self.inner.open(name)?;
        Ok(Box::new(FaultyFile {
            inner,
            state: Arc::clone(&self.state),
        }))
    }

    fn open_existing(&self, name: &str) -> StorageResult<Box<dyn SequentialFile>> {
        self.state.check(&Operation::Open(name))?;
        let inner = self.inner.open_existing(name)?;
        Ok(Box::new(FaultyFile {
            inner,
            state: Arc::clone(&self.state),
        }))
    }

    fn exists(&self, name: &str) -> StorageResult<bool> {
        self.state.check(&Operation::Open(name))?;
        self.inner.exists(name)
    }

    fn delete(&self, name: &str) -> StorageResult<()> {
        self.state.check(&Operation::Delete(name))?;
        self.inner.delete(name)
    }

    fn rename(&self, from: &str, to: &str) -> StorageResult<()> {
        self.state.check(&Operation::Rename(from))?;
        self.inner.rename(from, to)
    }

    fn list(&self, extension: &str) -> StorageResult<Vec<String>> {
        self.state.check(&Operation::Open(""))?;
        self.inner.list(extension)
    }

    fn sync_directory(&self) -> StorageResult<()> {
        self.state.check(&Operation::Open(""))?;
        self.inner.sync_directory()
    }
}

struct FaultyFile {
    inner: Box<dyn SequentialFile>,
    state: Arc<FaultState>,
}

impl FaultyFile {
    fn check_write(&self) -> StorageResult<()> {
        self.state.check(&Operation::Write(self.inner.name()))
    }

    fn check_read(&self) -> StorageResult<()> {
        self.state.check(&Operation::Open(self.inner.name()))
    }
}

impl SequentialFile for FaultyFile {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.check_read()?;
        self.inner.read_at(offset, len)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        self.check_write()?;
        self.inner.write_at(offset, data)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        self.check_write()?;
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.check_write()?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.check_read()?;
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.check_write()?;
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.check_write()?;
        self.inner.truncate(new_size)
    }
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    /// Journal configuration used for every scenario.
    pub config: JournalConfig,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl CrashRecoveryHarness {
    /// Creates a harness using small journal files.
    pub fn new() -> Self {
        Self::with_config(small_config())
    }

    /// Creates a harness with a custom journal configuration.
    pub fn with_config(config: JournalConfig) -> Self {
        Self {
            config,
            results: Vec::new(),
        }
    }

    /// Appends a workload spanning several files: 60 adds, every third id
    /// deleted, every fifth live id updated. Returns the expected live
    /// bodies.
    fn write_workload(journal: &Journal) -> JournalResult<BTreeMap<i64, Vec<u8>>> {
        let mut live = BTreeMap::new();
        for id in 0..60 {
            let body = body_for(id, 0, 48);
            journal.append_add(Record::new(id, 1, body.clone()))?;
            live.insert(id, body);
        }
        for id in (0..60).filter(|id| id % 3 == 0) {
            journal.append_delete(id)?;
            live.remove(&id);
        }
        for id in (0..60).filter(|id| id % 5 == 0 && id % 3 != 0) {
            let body = body_for(id, 1, 48);
            journal.append_update(Record::new(id, 2, body.clone()).with_tx(id))?;
            live.insert(id, body);
        }
        Ok(live)
    }

    /// Crashes a compaction at `point`, reopens the journal and checks the
    /// live records.
    pub fn test_crash_at(&mut self, point: CrashPoint) -> CrashRecoveryResult {
        let description = point.description();
        let result = self
            .run_crash(point)
            .unwrap_or_else(|e| CrashRecoveryResult::fail(description, 0, 0, &e.to_string()));
        self.results.push(result.clone());
        result
    }

    fn run_crash(&self, point: CrashPoint) -> JournalResult<CrashRecoveryResult> {
        let description = point.description();
        let inner = InMemoryFactory::new();
        let faulty = FaultyFactory::new(inner.clone(), point);

        let journal = Journal::open(Arc::new(faulty.clone()), self.config.clone())?;
        let expected = Self::write_workload(&journal)?;
        journal.sync()?;
        let mut files_before: Vec<String> =
            journal.data_files().into_iter().map(|file| file.name).collect();
        files_before.extend(journal.current_file().map(|file| file.name));

        faulty.arm();
        let outcome = journal.compact();
        drop(journal);

        if outcome.is_ok() || !faulty.has_crashed() {
            return Ok(CrashRecoveryResult::fail(
                description,
                expected.len(),
                0,
                "compaction finished without reaching the crash point",
            ));
        }

        let journal = Journal::open(Arc::new(inner.clone()), self.config.clone())?;
        let actual = JournalModel::replay(&journal);
        let recoveries = journal.stats().recoveries;

        let leftovers: Vec<String> = inner
            .file_names()
            .into_iter()
            .filter(|name| {
                is_compacting(name) || name == CONTROL_FILE_NAME || name == CONTROL_TEMP_NAME
            })
            .collect();
        if !leftovers.is_empty() {
            return Ok(fail(description, &expected, &actual, format!("left behind {leftovers:?}")));
        }

        if point.is_committed() {
            if recoveries != 1 {
                return Ok(fail(
                    description,
                    &expected,
                    &actual,
                    format!("expected one recovery, saw {recoveries}"),
                ));
            }
            if let Some(old) = files_before.iter().find(|name| inner.file_data(name).is_some()) {
                return Ok(fail(description, &expected, &actual, format!("old file {old} survived")));
            }
        } else {
            if recoveries != 0 {
                return Ok(fail(
                    description,
                    &expected,
                    &actual,
                    format!("unexpected recovery count {recoveries}"),
                ));
            }
            if let Some(lost) = files_before.iter().find(|name| inner.file_data(name).is_none()) {
                return Ok(fail(description, &expected, &actual, format!("original file {lost} is gone")));
            }
        }

        if actual != expected || journal.live_records() != expected.len() {
            return Ok(fail(description, &expected, &actual, "live records differ after recovery"));
        }

        journal.close()?;
        Ok(CrashRecoveryResult::pass(description, expected.len()))
    }

    /// Crashes a compaction at every [`CrashPoint`].
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        self.results.clear();
        for point in CrashPoint::ALL {
            self.test_crash_at(point);
        }
        self.results.clone()
    }

    /// Returns a summary of test results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let total = self.results.len();

        let mut summary = format!(
            "\n=== Crash Recovery Test Summary ===\n\
             Passed: {}/{}\n\n",
            passed, total
        );

        for result in &self.results {
            let status = if result.passed { "✓" } else { "✗" };
            summary.push_str(&format!(
                "{} {}\n  Expected: {} records, Actual: {} records\n",
                status, result.description, result.expected_records, result.actual_records
            ));
            if let Some(ref error) = result.error {
                summary.push_str(&format!("  Error: {}\n", error));
            }
        }

        summary
    }

    /// Returns whether all tests passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

fn fail(
    description: &str,
    expected: &BTreeMap<i64, Vec<u8>>,
    actual: &BTreeMap<i64, Vec<u8>>,
    error: impl AsRef<str>,
) -> CrashRecoveryResult {
    CrashRecoveryResult::fail(description, expected.len(), actual.len(), error.as_ref())
}
