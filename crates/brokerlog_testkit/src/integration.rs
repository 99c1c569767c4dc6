//! Cross-crate integration test helpers.
//!
//! Provides utilities for testing the journal together with its storage
//! and index crates.

use crate::fixtures::TestJournal;
use crate::generators::JournalModel;
use brokerlog_core::{CompactionResult, Journal, Record};
use std::collections::BTreeMap;

/// A test harness for integration testing.
pub struct IntegrationHarness {
    /// The journal under test.
    pub journal: TestJournal,
    /// Record tracking for verification.
    records: BTreeMap<i64, Vec<u8>>,
}

impl IntegrationHarness {
    /// Creates a new integration harness with an in-memory journal.
    pub fn new() -> Self {
        Self::with_journal(TestJournal::memory())
    }

    /// Creates a new integration harness over `journal`, which must be empty.
    pub fn with_journal(journal: TestJournal) -> Self {
        Self {
            journal,
            records: BTreeMap::new(),
        }
    }

    /// Adds a record and tracks it for later verification.
    pub fn add(&mut self, id: i64, body: Vec<u8>) {
        self.journal
            .append_add(Record::new(id, 0, body.clone()))
            .expect("Failed to add record");
        self.records.insert(id, body);
    }

    /// Updates a tracked record.
    pub fn update(&mut self, id: i64, body: Vec<u8>) {
        self.journal
            .append_update(Record::new(id, 1, body.clone()))
            .expect("Failed to update record");
        self.records.insert(id, body);
    }

    /// Deletes a record and updates tracking.
    pub fn delete(&mut self, id: i64) {
        self.journal
            .append_delete(id)
            .expect("Failed to delete record");
        self.records.remove(&id);
    }

    /// Compacts the journal and verifies that nothing live was lost.
    pub fn compact_and_verify(&self) -> CompactionResult {
        let result = self.journal.compact().expect("Failed to compact");
        assert_eq!(
            result.records_read,
            result.records_kept + result.records_dropped
        );
        self.verify_all();
        result
    }

    /// Closes and reopens the journal, then verifies it.
    pub fn reopen(self) -> Self {
        let Self { journal, records } = self;
        let harness = Self {
            journal: journal.reopen(),
            records,
        };
        harness.verify_all();
        harness
    }

    /// Verifies all tracked records are live with their latest bodies.
    pub fn verify_all(&self) {
        let journal: &Journal = &self.journal;
        assert_eq!(journal.live_records(), self.records.len());
        for id in self.records.keys() {
            assert!(journal.contains(*id), "Record {} should be live", id);
        }
        assert_eq!(
            JournalModel::replay(journal),
            self.records,
            "Replayed records differ from tracked records"
        );
    }

    /// Returns the count of tracked records.
    pub fn tracked_count(&self) -> usize {
        self.records.len()
    }
}

impl Default for IntegrationHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Tests of the on-storage layout.
pub mod storage_format {
    use super::*;
    use brokerlog_core::{JournalReader, FORMAT_VERSION};
    use brokerlog_storage::FileFactory;

    /// Verifies that every data file starts with a current-format header
    /// and that ordering ids increase in file order.
    pub fn test_headers_ordered(factory: &dyn FileFactory, journal: &Journal) {
        let mut previous = None;
        for file in journal.data_files().into_iter().chain(journal.current_file()) {
            let handle = factory.open(&file.name).expect("Failed to open data file");
            let header = JournalReader::read_header(handle.as_ref()).expect("Failed to read header");

            assert_eq!(header.format_version, FORMAT_VERSION);
            assert_eq!(header.file_id, file.ordering_id);
            if let Some(previous) = previous {
                assert!(header.file_id > previous, "{} is out of order", file.name);
            }
            previous = Some(header.file_id);
        }
    }
}

/// Tests of compaction combined with recovery.
pub mod compaction {
    use super::*;
    use brokerlog_core::compaction::{write_control_file, ControlFileRecord};
    use brokerlog_storage::{FileFactory, InMemoryFactory};

    /// Compacting twice in a row drops nothing the second time.
    pub fn test_compaction_idempotent(journal: &Journal) {
        let live = journal.live_records();
        journal.compact().expect("First compaction failed");
        let second = journal.compact().expect("Second compaction failed");

        assert_eq!(second.records_dropped, 0);
        assert_eq!(journal.live_records(), live);
    }

    /// Leaves a control file that renames a copy of the first data file and
    /// retires the original, as if a compaction crashed after its commit
    /// point. Returns the name the copy is renamed to.
    pub fn stage_interrupted_compaction(factory: &InMemoryFactory, journal: &Journal) -> String {
        let original = journal
            .data_files()
            .into_iter()
            .next()
            .expect("Journal needs a closed data file")
            .name;
        let extension = &journal.config().file_extension;
        let staged = format!("journal-999.{}", brokerlog_core::COMPACTING_EXTENSION);
        let target = format!("journal-999.{extension}");

        let data = factory.file_data(&original).expect("Data file missing");
        factory.insert_file(&staged, data);
        write_control_file(
            factory,
            &ControlFileRecord {
                old_files: vec![original],
                new_files: vec![target.clone()],
                renames: vec![(staged, target.clone())],
            },
        )
        .expect("Failed to write control file");

        assert!(factory.exists(&target).is_ok_and(|exists| !exists));
        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::body_for;

    #[test]
    fn test_integration_harness() {
        let mut harness = IntegrationHarness::new();

        for id in 0..30 {
            harness.add(id, body_for(id, 0, 40));
        }
        for id in (0..30).step_by(3) {
            harness.delete(id);
        }
        harness.update(1, body_for(1, 1, 10));

        assert_eq!(harness.tracked_count(), 20);
        harness.verify_all();

        let result = harness.compact_and_verify();
        assert_eq!(result.records_dropped, 20);

        let harness = harness.reopen();
        assert_eq!(harness.tracked_count(), 20);
    }

    #[test]
    fn test_headers_ordered_after_compaction() {
        let mut harness = IntegrationHarness::with_journal(TestJournal::file());
        for id in 0..40 {
            harness.add(id, body_for(id, 0, 64));
        }
        for id in 0..35 {
            harness.delete(id);
        }
        harness.compact_and_verify();

        let factory = brokerlog_storage::FileSystemFactory::open(
            harness.journal.path().expect("File journal should have a path"),
        )
        .unwrap();
        storage_format::test_headers_ordered(&factory, &harness.journal);
    }

    #[test]
    fn test_compaction_idempotent() {
        let test_journal = crate::fixtures::scenarios::churned_journal(60, 2);
        compaction::test_compaction_idempotent(&test_journal);
        assert_eq!(test_journal.live_records(), 30);
    }

    #[test]
    fn test_interrupted_compaction_replayed_on_open() {
        let mut harness = IntegrationHarness::new();
        for id in 0..30 {
            harness.add(id, body_for(id, 0, 40));
        }

        let factory = harness
            .journal
            .memory_factory()
            .expect("Harness journal is in memory")
            .clone();
        let target = compaction::stage_interrupted_compaction(&factory, &harness.journal);

        let harness = harness.reopen();
        assert_eq!(harness.journal.stats().recoveries, 1);
        assert!(harness.journal.data_files().iter().any(|file| file.name == target));
    }
}
