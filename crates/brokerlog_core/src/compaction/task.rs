//! The compaction task.
//!
//! A task rewrites a list of closed journal files, keeping only records whose
//! id is in a [`LivenessSnapshot`]. Survivors are packed in their original
//! order into new files written under the compaction extension. The task
//! then commits through the control file, renames the new files to data
//! names and deletes the old files.
//!
//! ## Failure
//!
//! An error before the control file is written leaves the old files
//! untouched; the only leftovers are `.cmp` files, which the journal deletes
//! on open. Once the control file exists the compaction is committed and a
//! crash is finished by [`super::recover`].

use super::control::{delete_control_file, write_control_file, ControlFileRecord};
use super::recovery::replay;
use crate::config::JournalConfig;
use crate::error::{JournalError, JournalResult};
use crate::file::{FileNamer, JournalFile};
use crate::reader::{JournalReader, JournalReaderCallback};
use crate::record::encoded_len;
use crate::snapshot::LivenessSnapshot;
use crate::types::{RecordInfo, RecordKind};
use crate::writer::BufferedFileWriter;
use brokerlog_storage::FileFactory;
use std::fmt;

/// Where a compaction task is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionState {
    /// Created, nothing read yet.
    Initializing,
    /// Reading an old file.
    Scanning {
        /// Name of the old file.
        file: String,
    },
    /// Writing survivors into a new file.
    Writing {
        /// Final name of the new file.
        file: String,
    },
    /// Flushing the last file and committing the control file.
    Finalizing,
    /// Renames and deletions done.
    Completed,
    /// Replaying a control file left by a crash.
    RecoveringFromControlFile,
}

impl fmt::Display for CompactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => f.write_str("initializing"),
            Self::Scanning { file } => write!(f, "scanning {file}"),
            Self::Writing { file } => write!(f, "writing {file}"),
            Self::Finalizing => f.write_str("finalizing"),
            Self::Completed => f.write_str("completed"),
            Self::RecoveringFromControlFile => f.write_str("recovering from control file"),
        }
    }
}

/// Outcome of a finished compaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionResult {
    /// Records read from the old files.
    pub records_read: u64,
    /// Records copied into the new files.
    pub records_kept: u64,
    /// Records dropped because their id was not live.
    pub records_dropped: u64,
    /// Files replaced by the compaction.
    pub old_files: Vec<JournalFile>,
    /// Files produced by the compaction, under their final names.
    pub new_files: Vec<JournalFile>,
    /// `(record id, ordering id)` of every copied record, in write order.
    pub relocations: Vec<(i64, i64)>,
}

/// Rewrites closed journal files without their dead records.
pub struct CompactionTask<'a> {
    factory: &'a dyn FileFactory,
    namer: &'a FileNamer,
    snapshot: &'a LivenessSnapshot,
    writer: BufferedFileWriter,
    state: CompactionState,
    next_ordering_id: i64,
    ordering_limit: i64,
    renames: Vec<(String, String)>,
    result: CompactionResult,
}

impl<'a> CompactionTask<'a> {
    /// Creates a task over `old_files`, given in replay order.
    ///
    /// New files get ordering ids counting up from `first_ordering_id`. When
    /// that reuses the old files' range, the task fails rather than produce
    /// an ordering id past the last old file.
    pub fn new(
        factory: &'a dyn FileFactory,
        config: &JournalConfig,
        namer: &'a FileNamer,
        snapshot: &'a LivenessSnapshot,
        old_files: Vec<JournalFile>,
        first_ordering_id: i64,
    ) -> Self {
        let last_old = old_files.iter().map(|file| file.ordering_id).max();
        let ordering_limit = match last_old {
            Some(last) if first_ordering_id <= last => last,
            _ => i64::MAX,
        };

        Self {
            factory,
            namer,
            snapshot,
            writer: BufferedFileWriter::new(config.file_size, config.user_version),
            state: CompactionState::Initializing,
            next_ordering_id: first_ordering_id,
            ordering_limit,
            renames: Vec::new(),
            result: CompactionResult {
                old_files,
                ..CompactionResult::default()
            },
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> &CompactionState {
        &self.state
    }

    /// Runs the task to completion.
    ///
    /// # Errors
    ///
    /// Returns an error if an old file cannot be read, a record is larger
    /// than a file, or a storage operation fails.
    pub fn run(mut self) -> JournalResult<CompactionResult> {
        tracing::info!(
            old_files = self.result.old_files.len(),
            live = self.snapshot.len(),
            "starting compaction"
        );

        let outcome = self.scan_and_commit();
        self.writer.release();
        outcome?;

        tracing::info!(
            read = self.result.records_read,
            kept = self.result.records_kept,
            dropped = self.result.records_dropped,
            new_files = self.result.new_files.len(),
            "compaction completed"
        );
        Ok(self.result)
    }

    fn scan_and_commit(&mut self) -> JournalResult<()> {
        let old_names: Vec<String> = self
            .result
            .old_files
            .iter()
            .map(|file| file.name.clone())
            .collect();

        for name in &old_names {
            self.state = CompactionState::Scanning { file: name.clone() };
            let file = self.factory.open_existing(name)?;
            JournalReader::read_file(file.as_ref(), &mut Survivors { task: &mut *self })?;
        }

        self.state = CompactionState::Finalizing;
        self.flush_current()?;

        let record = ControlFileRecord {
            old_files: old_names,
            new_files: self
                .result
                .new_files
                .iter()
                .map(|file| file.name.clone())
                .collect(),
            renames: self.renames.clone(),
        };
        write_control_file(self.factory, &record)?;

        replay(self.factory, &record)?;
        self.factory.sync_directory()?;
        delete_control_file(self.factory)?;

        self.state = CompactionState::Completed;
        Ok(())
    }

    fn consider(&mut self, kind: RecordKind, info: RecordInfo) -> JournalResult<()> {
        self.result.records_read += 1;
        if !self.snapshot.contains_record(info.id()) {
            self.result.records_dropped += 1;
            return Ok(());
        }

        let len = encoded_len(&info.record);
        if len > self.writer.max_record_len() {
            return Err(JournalError::RecordTooLarge {
                size: len,
                max: self.writer.max_record_len(),
            });
        }
        if !self.writer.fits(len) {
            self.flush_current()?;
            self.open_next()?;
        }

        self.writer.append(kind, &info.record)?;
        self.result.records_kept += 1;
        self.result
            .relocations
            .push((info.id(), self.next_ordering_id - 1));
        Ok(())
    }

    fn open_next(&mut self) -> JournalResult<()> {
        if self.next_ordering_id > self.ordering_limit {
            return Err(JournalError::invalid_operation(format!(
                "compaction output needs ordering id {} past the last old file {}",
                self.next_ordering_id, self.ordering_limit
            )));
        }

        let sequence = self.namer.allocate();
        let temp_name = self.namer.compacting_name(sequence);
        let final_name = self.namer.data_name(sequence);

        if self.factory.exists(&temp_name)? {
            self.factory.delete(&temp_name)?;
        }
        let handle = self.factory.open(&temp_name)?;
        self.writer
            .open(handle, JournalFile::new(final_name.clone(), self.next_ordering_id))?;

        self.next_ordering_id += 1;
        self.renames.push((temp_name, final_name.clone()));
        self.state = CompactionState::Writing { file: final_name };
        Ok(())
    }

    fn flush_current(&mut self) -> JournalResult<()> {
        if let Some(file) = self.writer.flush()? {
            self.result.new_files.push(file);
        }
        Ok(())
    }
}

struct Survivors<'t, 'a> {
    task: &'t mut CompactionTask<'a>,
}

impl JournalReaderCallback for Survivors<'_, '_> {
    fn on_read_add_record(&mut self, info: RecordInfo) -> JournalResult<()> {
        self.task.consider(RecordKind::Add, info)
    }

    fn on_read_update_record(&mut self, info: RecordInfo) -> JournalResult<()> {
        self.task.consider(RecordKind::Update, info)
    }

    fn on_read_delete_record(&mut self, info: RecordInfo) -> JournalResult<()> {
        self.task.consider(RecordKind::Delete, info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compaction::control::CONTROL_FILE_NAME;
    use crate::file::{JournalFileHeader, HEADER_SIZE};
    use crate::reader::RecordCollector;
    use crate::record::encode_record;
    use crate::types::Record;
    use brokerlog_storage::InMemoryFactory;
    use bytes::BytesMut;

    const FILE_SIZE: usize = 1024;

    fn config() -> JournalConfig {
        JournalConfig::new().file_size(FILE_SIZE)
    }

    fn write_old(factory: &InMemoryFactory, namer: &FileNamer, ordering_id: i64, records: &[(RecordKind, Record)]) -> JournalFile {
        let sequence = namer.allocate();
        let mut file = JournalFile::new(namer.data_name(sequence), ordering_id);
        let mut buf = BytesMut::new();
        JournalFileHeader::new(0, ordering_id).encode(&mut buf);
        for (kind, record) in records {
            encode_record(&mut buf, *kind, ordering_id, record).unwrap();
            file.records += 1;
        }
        buf.resize(FILE_SIZE, 0);
        factory.insert_file(&file.name, buf.to_vec());
        file
    }

    fn read_ids(factory: &InMemoryFactory, name: &str) -> Vec<(RecordKind, i64)> {
        let file = factory.open(name).unwrap();
        let mut collector = RecordCollector::default();
        JournalReader::read_file(file.as_ref(), &mut collector).unwrap();
        collector
            .records
            .iter()
            .map(|info| (info.kind, info.id()))
            .collect()
    }

    fn add(id: i64) -> (RecordKind, Record) {
        (RecordKind::Add, Record::new(id, 0, vec![id as u8; 40]))
    }

    #[test]
    fn keeps_live_records_in_order() {
        let factory = InMemoryFactory::new();
        let namer = FileNamer::new("journal", "jrn", 1);
        let old = vec![
            write_old(&factory, &namer, 1, &[add(1), add(2), add(3)]),
            write_old(
                &factory,
                &namer,
                2,
                &[
                    (RecordKind::Update, Record::new(3, 0, b"v2".to_vec())),
                    (RecordKind::Delete, Record::tombstone(2)),
                    add(4),
                ],
            ),
        ];
        let snapshot = LivenessSnapshot::from_ids([1, 3, 4]);

        let task = CompactionTask::new(&factory, &config(), &namer, &snapshot, old, 1);
        assert_eq!(task.state(), &CompactionState::Initializing);
        let result = task.run().unwrap();

        assert_eq!(result.records_read, 6);
        assert_eq!(result.records_kept, 4);
        assert_eq!(result.records_dropped, 2);
        assert_eq!(result.new_files.len(), 1);

        let new = &result.new_files[0];
        assert_eq!(new.name, "journal-3.jrn");
        assert_eq!(new.ordering_id, 1);
        assert_eq!(new.records, 4);
        assert_eq!(
            read_ids(&factory, &new.name),
            vec![
                (RecordKind::Add, 1),
                (RecordKind::Add, 3),
                (RecordKind::Update, 3),
                (RecordKind::Add, 4),
            ]
        );
        assert_eq!(result.relocations, vec![(1, 1), (3, 1), (3, 1), (4, 1)]);

        assert_eq!(factory.file_names(), vec!["journal-3.jrn".to_string()]);
        assert_eq!(factory.file_data("journal-3.jrn").unwrap().len(), FILE_SIZE);
    }

    #[test]
    fn packs_into_multiple_files() {
        let factory = InMemoryFactory::new();
        let namer = FileNamer::new("journal", "jrn", 1);
        let per_file = (FILE_SIZE - HEADER_SIZE) / encoded_len(&add(0).1);

        let mut old = Vec::new();
        let mut id = 0;
        for ordering_id in 1..=3 {
            let records: Vec<_> = (0..per_file)
                .map(|_| {
                    id += 1;
                    add(id)
                })
                .collect();
            old.push(write_old(&factory, &namer, ordering_id, &records));
        }

        // Every other record survives
        let snapshot = LivenessSnapshot::from_ids((1..=id).filter(|id| id % 2 == 0));
        let result = CompactionTask::new(&factory, &config(), &namer, &snapshot, old, 1)
            .run()
            .unwrap();

        assert_eq!(result.records_kept as usize, id as usize / 2);
        assert_eq!(result.new_files.len(), 2);
        assert_eq!(result.new_files[0].ordering_id, 1);
        assert_eq!(result.new_files[1].ordering_id, 2);
        assert_eq!(result.new_files[0].records as usize, per_file);

        let ids: Vec<i64> = result
            .new_files
            .iter()
            .flat_map(|file| read_ids(&factory, &file.name))
            .map(|(_, id)| id)
            .collect();
        let expected: Vec<i64> = (1..=id).filter(|id| id % 2 == 0).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn nothing_live_removes_everything() {
        let factory = InMemoryFactory::new();
        let namer = FileNamer::new("journal", "jrn", 1);
        let old = vec![write_old(&factory, &namer, 5, &[add(1), add(2)])];

        let snapshot = LivenessSnapshot::from_ids([]);
        let result = CompactionTask::new(&factory, &config(), &namer, &snapshot, old, 5)
            .run()
            .unwrap();

        assert!(result.new_files.is_empty());
        assert_eq!(result.records_dropped, 2);
        assert!(factory.file_names().is_empty());
    }

    #[test]
    fn compaction_is_idempotent() {
        let factory = InMemoryFactory::new();
        let namer = FileNamer::new("journal", "jrn", 1);
        let old = vec![
            write_old(&factory, &namer, 1, &[add(1), add(2), add(3)]),
            write_old(&factory, &namer, 2, &[add(4), add(5)]),
        ];
        let snapshot = LivenessSnapshot::from_ids([2, 4, 5]);

        let first = CompactionTask::new(&factory, &config(), &namer, &snapshot, old, 1)
            .run()
            .unwrap();
        let once: Vec<_> = first
            .new_files
            .iter()
            .flat_map(|file| read_ids(&factory, &file.name))
            .collect();

        let second = CompactionTask::new(
            &factory,
            &config(),
            &namer,
            &snapshot,
            first.new_files.clone(),
            1,
        )
        .run()
        .unwrap();
        let twice: Vec<_> = second
            .new_files
            .iter()
            .flat_map(|file| read_ids(&factory, &file.name))
            .collect();

        assert_eq!(once, twice);
        assert_eq!(second.records_dropped, 0);
        assert_eq!(factory.list("jrn").unwrap().len(), second.new_files.len());
    }

    #[test]
    fn unreadable_old_file_leaves_originals() {
        let factory = InMemoryFactory::new();
        let namer = FileNamer::new("journal", "jrn", 1);
        let good = write_old(&factory, &namer, 1, &[add(1)]);
        let bad = JournalFile::new("journal-9.jrn", 2);
        factory.insert_file(&bad.name, vec![1, 2, 3]);

        let snapshot = LivenessSnapshot::from_ids([1]);
        let result = CompactionTask::new(
            &factory,
            &config(),
            &namer,
            &snapshot,
            vec![good.clone(), bad.clone()],
            1,
        )
        .run();

        assert!(result.is_err());
        assert!(factory.exists(&good.name).unwrap());
        assert!(factory.exists(&bad.name).unwrap());
        assert!(!factory.exists(CONTROL_FILE_NAME).unwrap());
        assert_eq!(factory.list("jrn").unwrap().len(), 2);
    }

    #[test]
    fn oversized_record_fails() {
        let factory = InMemoryFactory::new();
        let namer = FileNamer::new("journal", "jrn", 1);
        let old = vec![write_old(&factory, &namer, 1, &[add(1)])];
        let snapshot = LivenessSnapshot::from_ids([1]);

        let small = JournalConfig::new().file_size(HEADER_SIZE + 10);
        let result = CompactionTask::new(&factory, &small, &namer, &snapshot, old.clone(), 1).run();

        assert!(matches!(result, Err(JournalError::RecordTooLarge { .. })));
        assert!(factory.exists(&old[0].name).unwrap());
    }

    #[test]
    fn state_display() {
        assert_eq!(
            CompactionState::Scanning {
                file: "journal-1.jrn".to_string()
            }
            .to_string(),
            "scanning journal-1.jrn"
        );
        assert_eq!(CompactionState::Completed.to_string(), "completed");
    }
}
