//! The journal facade.
//!
//! A [`Journal`] owns a directory of fixed-size data files. Records are
//! appended to the current file and the file is rotated when the next record
//! does not fit. A live map tracks, for every live record id, the ordering id
//! of the file holding its latest record. Compaction rewrites the closed
//! files without dead records.
//!
//! ## Opening
//!
//! 1. Finish an interrupted compaction from its control file
//! 2. Delete `.cmp` files left by a compaction that never committed
//! 3. Replay data files in ordering id order into the live map
//! 4. Start a fresh current file
//!
//! ## Concurrency
//!
//! Appends are serialized by the journal's state lock. Compaction runs
//! without that lock, so appends continue while it reads and writes files;
//! the lock is only taken to rotate before the run and to install the new
//! file list after it. Compactions are serialized with each other and with
//! [`Journal::read_all`], which must not see old files being deleted. The
//! compaction lock is always taken before the state lock.

use crate::compaction::{recover, CompactionResult, CompactionTask, RecoveryOutcome};
use crate::config::JournalConfig;
use crate::error::{JournalError, JournalResult};
use crate::file::{FileNamer, JournalFile, JournalFileHeader, COMPACTING_EXTENSION, HEADER_SIZE};
use crate::reader::{JournalReader, JournalReaderCallback, RecordCollector};
use crate::record::{encode_record, encoded_len};
use crate::snapshot::LivenessSnapshot;
use crate::stats::{JournalStats, StatsSnapshot};
use crate::types::{Record, RecordInfo, RecordKind};
use brokerlog_collections::hash::DEFAULT_EXPECTED_ITEMS;
use brokerlog_collections::ConcurrentLongHashMap;
use brokerlog_storage::{FileFactory, SequentialFile};
use bytes::BytesMut;
use parking_lot::Mutex;
use std::sync::Arc;

/// The file currently receiving appends.
struct CurrentFile {
    handle: Box<dyn SequentialFile>,
    descriptor: JournalFile,
    used: usize,
}

struct JournalState {
    /// Closed data files in replay order.
    data_files: Vec<JournalFile>,
    current: Option<CurrentFile>,
    next_ordering_id: i64,
    /// Records in closed files and the current file.
    total_records: u64,
    is_open: bool,
}

/// Append-only record journal with online compaction.
///
/// # Example
///
/// ```rust
/// use brokerlog_core::{Journal, JournalConfig, Record};
/// use brokerlog_storage::InMemoryFactory;
/// use std::sync::Arc;
///
/// let journal = Journal::open(
///     Arc::new(InMemoryFactory::new()),
///     JournalConfig::new().file_size(4096),
/// )
/// .unwrap();
///
/// journal.append_add(Record::new(1, 0, b"hello".to_vec())).unwrap();
/// journal.append_update(Record::new(1, 0, b"world".to_vec())).unwrap();
/// assert!(journal.contains(1));
///
/// journal.append_delete(1).unwrap();
/// assert_eq!(journal.live_records(), 0);
/// ```
pub struct Journal {
    factory: Arc<dyn FileFactory>,
    config: JournalConfig,
    namer: FileNamer,
    state: Mutex<JournalState>,
    /// Live record id to ordering id of the file with its latest record.
    live: ConcurrentLongHashMap<i64>,
    stats: JournalStats,
    compaction: Mutex<()>,
}

impl Journal {
    /// Opens the journal stored in `factory`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, recovery fails, a
    /// data file is unreadable, or the current file cannot be created.
    pub fn open(factory: Arc<dyn FileFactory>, config: JournalConfig) -> JournalResult<Self> {
        config.validate()?;

        let stats = JournalStats::new();
        if let RecoveryOutcome::Completed { .. } = recover(factory.as_ref())? {
            stats.record_recovery();
        }

        for name in factory.list(COMPACTING_EXTENSION)? {
            tracing::warn!(file = %name, "deleting uncommitted compaction output");
            factory.delete(&name)?;
        }

        let namer = FileNamer::new(config.file_prefix.clone(), config.file_extension.clone(), 1);
        let live = ConcurrentLongHashMap::with_sections(DEFAULT_EXPECTED_ITEMS, config.index_sections)?;
        let (data_files, total_records) = Self::load(factory.as_ref(), &namer, &live)?;

        let next_ordering_id = data_files.last().map_or(1, |file| file.ordering_id + 1);
        tracing::info!(
            files = data_files.len(),
            records = total_records,
            live = live.len(),
            "journal loaded"
        );

        let journal = Self {
            factory,
            config,
            namer,
            state: Mutex::new(JournalState {
                data_files,
                current: None,
                next_ordering_id,
                total_records,
                is_open: true,
            }),
            live,
            stats,
            compaction: Mutex::new(()),
        };

        {
            let mut state = journal.state.lock();
            journal.open_current(&mut state)?;
        }
        Ok(journal)
    }

    /// Reads every data file into the live map.
    ///
    /// Files too short for a header and files without records are deleted.
    fn load(
        factory: &dyn FileFactory,
        namer: &FileNamer,
        live: &ConcurrentLongHashMap<i64>,
    ) -> JournalResult<(Vec<JournalFile>, u64)> {
        let mut files = Vec::new();
        let mut deleted = false;
        for name in factory.list(namer.extension())? {
            let Some(sequence) = namer.parse_sequence(&name) else {
                continue;
            };
            namer.observe(sequence);

            let handle = factory.open_existing(&name)?;
            if handle.size()? < HEADER_SIZE as u64 {
                tracing::warn!(file = %name, "deleting data file without a header");
                drop(handle);
                factory.delete(&name)?;
                deleted = true;
                continue;
            }
            let header = JournalReader::read_header(handle.as_ref())?;
            files.push(JournalFile::new(name, header.file_id));
        }

        files.sort_by_key(|file| file.ordering_id);
        if let Some(pair) = files
            .windows(2)
            .find(|pair| pair[0].ordering_id == pair[1].ordering_id)
        {
            return Err(JournalError::corruption(format!(
                "files {} and {} share ordering id {}",
                pair[0].name, pair[1].name, pair[0].ordering_id
            )));
        }

        let mut loaded = Vec::with_capacity(files.len());
        let mut total_records = 0;
        for mut file in files {
            let handle = factory.open_existing(&file.name)?;
            let summary = JournalReader::read_file(
                handle.as_ref(),
                &mut LiveMapReplay {
                    live,
                    ordering_id: file.ordering_id,
                },
            )?;
            drop(handle);

            if summary.records == 0 {
                tracing::debug!(file = %file, "deleting empty data file");
                factory.delete(&file.name)?;
                deleted = true;
                continue;
            }
            file.records = summary.records;
            total_records += summary.records;
            loaded.push(file);
        }

        if deleted {
            factory.sync_directory()?;
        }
        Ok((loaded, total_records))
    }

    /// Starts a new current file with the next ordering id.
    fn open_current(&self, state: &mut JournalState) -> JournalResult<()> {
        let sequence = self.namer.allocate();
        let name = self.namer.data_name(sequence);
        let ordering_id = state.next_ordering_id;

        let mut handle = self.factory.open(&name)?;
        if handle.size()? > 0 {
            handle.truncate(0)?;
        }
        let mut header = BytesMut::with_capacity(HEADER_SIZE);
        JournalFileHeader::new(self.config.user_version, ordering_id).encode(&mut header);
        handle.write_at(0, &header)?;
        if self.config.sync_on_write {
            handle.sync()?;
            self.factory.sync_directory()?;
        }

        state.next_ordering_id += 1;
        self.stats.record_file_created();
        tracing::debug!(file = %name, ordering_id, "opened journal file");

        state.current = Some(CurrentFile {
            handle,
            descriptor: JournalFile::new(name, ordering_id),
            used: HEADER_SIZE,
        });
        Ok(())
    }

    /// Closes the current file and opens the next one.
    ///
    /// A current file without records is reused.
    fn rotate(&self, state: &mut JournalState) -> JournalResult<()> {
        let Some(current) = state.current.as_mut() else {
            return self.open_current(state);
        };
        if current.descriptor.records == 0 {
            return Ok(());
        }

        current.handle.sync()?;
        if let Some(closed) = state.current.take() {
            tracing::debug!(
                file = %closed.descriptor,
                records = closed.descriptor.records,
                "closed journal file"
            );
            state.data_files.push(closed.descriptor);
        }
        self.open_current(state)
    }

    /// Appends an add record.
    ///
    /// # Errors
    ///
    /// See [`Journal::append_record`].
    pub fn append_add(&self, record: Record) -> JournalResult<()> {
        self.append_record(RecordKind::Add, record)
    }

    /// Appends an update record for a live id.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::RecordNotFound`] if the id is not live, or
    /// see [`Journal::append_record`].
    pub fn append_update(&self, record: Record) -> JournalResult<()> {
        self.append_record(RecordKind::Update, record)
    }

    /// Appends a delete record for a live id.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::RecordNotFound`] if the id is not live, or
    /// see [`Journal::append_record`].
    pub fn append_delete(&self, id: i64) -> JournalResult<()> {
        self.append_record(RecordKind::Delete, Record::tombstone(id))
    }

    /// Appends a record of any kind and updates the live map.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidOperation`] for a negative id,
    /// [`JournalError::RecordNotFound`] for an update or delete of an id that
    /// is not live, [`JournalError::RecordTooLarge`] if the record cannot fit
    /// in one file, [`JournalError::Closed`] after [`Journal::close`], or a
    /// storage error.
    pub fn append_record(&self, kind: RecordKind, record: Record) -> JournalResult<()> {
        if record.id < 0 {
            return Err(JournalError::invalid_operation(format!(
                "record id {} is negative",
                record.id
            )));
        }

        let len = encoded_len(&record);
        let max = self.config.file_size - HEADER_SIZE;
        if len > max {
            return Err(JournalError::RecordTooLarge { size: len, max });
        }

        let mut state = self.state.lock();
        if !state.is_open {
            return Err(JournalError::Closed);
        }
        if kind != RecordKind::Add && !self.live.contains_key(record.id) {
            return Err(JournalError::RecordNotFound { id: record.id });
        }

        let needs_rotation = state
            .current
            .as_ref()
            .map_or(true, |current| current.used + len > self.config.file_size);
        if needs_rotation {
            self.rotate(&mut state)?;
        }

        let Some(current) = state.current.as_mut() else {
            return Err(JournalError::invalid_operation("journal has no current file"));
        };

        let mut buf = BytesMut::with_capacity(len);
        encode_record(&mut buf, kind, current.descriptor.ordering_id, &record)?;
        current.handle.write_at(current.used as u64, &buf)?;
        if self.config.sync_on_write {
            current.handle.sync()?;
        }

        current.used += len;
        current.descriptor.records += 1;
        let ordering_id = current.descriptor.ordering_id;
        state.total_records += 1;

        match kind {
            RecordKind::Add | RecordKind::Update => {
                self.live.put(record.id, ordering_id);
            }
            RecordKind::Delete => {
                self.live.remove(record.id);
            }
        }
        self.stats.record_append(len as u64);
        Ok(())
    }

    /// Syncs the current file.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&self) -> JournalResult<()> {
        let mut state = self.state.lock();
        if let Some(current) = state.current.as_mut() {
            current.handle.sync()?;
        }
        Ok(())
    }

    /// Returns true if the record id is live.
    #[must_use]
    pub fn contains(&self, id: i64) -> bool {
        self.live.contains_key(id)
    }

    /// Ordering id of the file holding the latest record of a live id.
    #[must_use]
    pub fn record_location(&self, id: i64) -> Option<i64> {
        self.live.get(id)
    }

    /// Number of live record ids.
    #[must_use]
    pub fn live_records(&self) -> usize {
        self.live.len()
    }

    /// Closed data files in replay order.
    #[must_use]
    pub fn data_files(&self) -> Vec<JournalFile> {
        self.state.lock().data_files.clone()
    }

    /// The file currently receiving appends.
    #[must_use]
    pub fn current_file(&self) -> Option<JournalFile> {
        self.state
            .lock()
            .current
            .as_ref()
            .map(|current| current.descriptor.clone())
    }

    /// Copies the live record ids.
    #[must_use]
    pub fn snapshot(&self) -> LivenessSnapshot {
        LivenessSnapshot::from_map(&self.live)
    }

    /// Returns the journal configuration.
    #[must_use]
    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    /// Returns a snapshot of the journal counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Reads every record of every file, closed files first, in replay
    /// order.
    ///
    /// Waits for a running compaction to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read.
    pub fn read_all(&self) -> JournalResult<Vec<RecordInfo>> {
        let _compaction = self.compaction.lock();
        let state = self.state.lock();
        let mut collector = RecordCollector::default();

        for file in &state.data_files {
            let handle = self.factory.open_existing(&file.name)?;
            JournalReader::read_file(handle.as_ref(), &mut collector)?;
        }
        if let Some(current) = state.current.as_ref() {
            JournalReader::read_file(current.handle.as_ref(), &mut collector)?;
        }
        Ok(collector.records)
    }

    /// Returns true if compaction would reclaim enough space to be worth
    /// running.
    ///
    /// That is the case once there are at least `compact_min_files` closed
    /// files and live records make up less than `compact_percentage` percent
    /// of all records in the journal.
    #[must_use]
    pub fn needs_compaction(&self) -> bool {
        let state = self.state.lock();
        if state.data_files.len() < self.config.compact_min_files || state.total_records == 0 {
            return false;
        }
        let live = self.live.len() as u64;
        live * 100 < state.total_records * u64::from(self.config.compact_percentage)
    }

    /// Compacts all closed data files.
    ///
    /// The current file is rotated first so that everything appended so far
    /// is included. Appends may continue while the compaction runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the compaction fails. The journal keeps using the
    /// old files in that case.
    pub fn compact(&self) -> JournalResult<CompactionResult> {
        let _running = self.compaction.lock();

        let (old_files, snapshot) = {
            let mut state = self.state.lock();
            if !state.is_open {
                return Err(JournalError::Closed);
            }
            self.rotate(&mut state)?;
            (state.data_files.clone(), LivenessSnapshot::from_map(&self.live))
        };

        let (Some(first), Some(last)) = (old_files.first(), old_files.last()) else {
            return Ok(CompactionResult::default());
        };
        let first_ordering_id = first.ordering_id;
        let last_ordering_id = last.ordering_id;

        let result = CompactionTask::new(
            self.factory.as_ref(),
            &self.config,
            &self.namer,
            &snapshot,
            old_files,
            first_ordering_id,
        )
        .run()?;

        {
            let mut state = self.state.lock();
            let newer = state.data_files.split_off(result.old_files.len());
            state.data_files = result.new_files.clone();
            state.data_files.extend(newer);

            let old_records: u64 = result.old_files.iter().map(|file| file.records).sum();
            let new_records: u64 = result.new_files.iter().map(|file| file.records).sum();
            state.total_records = state.total_records - old_records + new_records;

            // Records appended since the snapshot already point past the old files
            for &(id, ordering_id) in &result.relocations {
                if self
                    .live
                    .get(id)
                    .is_some_and(|location| location <= last_ordering_id)
                {
                    self.live.put(id, ordering_id);
                }
            }
        }

        self.stats
            .record_compaction(result.records_kept, result.records_dropped);
        Ok(result)
    }

    /// Syncs and closes the current file. Later appends fail with
    /// [`JournalError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the final sync fails.
    pub fn close(&self) -> JournalResult<()> {
        let mut state = self.state.lock();
        if !state.is_open {
            return Ok(());
        }

        if let Some(mut current) = state.current.take() {
            current.handle.sync()?;
            if current.descriptor.records > 0 {
                state.data_files.push(current.descriptor);
            }
        }
        state.is_open = false;
        Ok(())
    }

    /// Returns true until [`Journal::close`] is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state.lock().is_open
    }
}

/// Rebuilds the live map from one file.
struct LiveMapReplay<'a> {
    live: &'a ConcurrentLongHashMap<i64>,
    ordering_id: i64,
}

impl JournalReaderCallback for LiveMapReplay<'_> {
    fn on_read_add_record(&mut self, info: RecordInfo) -> JournalResult<()> {
        self.live.put(info.id(), self.ordering_id);
        Ok(())
    }

    fn on_read_update_record(&mut self, info: RecordInfo) -> JournalResult<()> {
        self.live.put(info.id(), self.ordering_id);
        Ok(())
    }

    fn on_read_delete_record(&mut self, info: RecordInfo) -> JournalResult<()> {
        self.live.remove(info.id());
        Ok(())
    }
}
