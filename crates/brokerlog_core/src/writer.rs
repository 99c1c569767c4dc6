//! Reusable buffered writer for whole journal files.
//!
//! The writer fills an in-memory image of one file (header first, then
//! records) and writes the image in a single positioned write padded to the
//! full file size. The buffer is allocated once at the configured file size
//! and reused for every file until [`BufferedFileWriter::release`].

use crate::error::{JournalError, JournalResult};
use crate::file::{JournalFile, JournalFileHeader, HEADER_SIZE};
use crate::record::{encode_record, encoded_len};
use crate::types::{Record, RecordKind};
use brokerlog_storage::SequentialFile;
use bytes::BytesMut;

struct OpenFile {
    handle: Box<dyn SequentialFile>,
    descriptor: JournalFile,
}

/// Writes complete journal files from a reusable buffer.
pub struct BufferedFileWriter {
    buffer: BytesMut,
    file_size: usize,
    user_version: i32,
    current: Option<OpenFile>,
}

impl BufferedFileWriter {
    /// Creates a writer for files of `file_size` bytes.
    #[must_use]
    pub fn new(file_size: usize, user_version: i32) -> Self {
        Self {
            buffer: BytesMut::new(),
            file_size,
            user_version,
            current: None,
        }
    }

    /// Largest record that fits in an empty file.
    #[must_use]
    pub fn max_record_len(&self) -> usize {
        self.file_size - HEADER_SIZE
    }

    /// Returns the descriptor of the open file.
    #[must_use]
    pub fn current(&self) -> Option<&JournalFile> {
        self.current.as_ref().map(|open| &open.descriptor)
    }

    /// Starts a new file and writes its header into the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidOperation`] if a file is already open.
    pub fn open(
        &mut self,
        handle: Box<dyn SequentialFile>,
        descriptor: JournalFile,
    ) -> JournalResult<()> {
        if self.current.is_some() {
            return Err(JournalError::invalid_operation(
                "buffered writer already has an open file",
            ));
        }

        if self.buffer.capacity() < self.file_size {
            self.buffer = BytesMut::with_capacity(self.file_size);
        } else {
            self.buffer.clear();
        }

        JournalFileHeader::new(self.user_version, descriptor.ordering_id).encode(&mut self.buffer);
        tracing::debug!(file = %descriptor, "opened compaction output file");
        self.current = Some(OpenFile { handle, descriptor });
        Ok(())
    }

    /// Returns true if a record of `len` bytes fits in the open file.
    #[must_use]
    pub fn fits(&self, len: usize) -> bool {
        self.current.is_some() && self.buffer.len() + len <= self.file_size
    }

    /// Appends a record to the open file's image.
    ///
    /// # Errors
    ///
    /// Returns an error if no file is open or the record does not fit.
    pub fn append(&mut self, kind: RecordKind, record: &Record) -> JournalResult<()> {
        let len = encoded_len(record);
        let Some(open) = self.current.as_mut() else {
            return Err(JournalError::invalid_operation("no open file to append to"));
        };
        if self.buffer.len() + len > self.file_size {
            return Err(JournalError::RecordTooLarge {
                size: len,
                max: self.file_size - self.buffer.len(),
            });
        }

        encode_record(&mut self.buffer, kind, open.descriptor.ordering_id, record)?;
        open.descriptor.records += 1;
        Ok(())
    }

    /// Writes the open file's image at offset 0, padded with zeros to the
    /// file size, syncs and closes it.
    ///
    /// Returns the closed file, or `None` if no file was open.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or sync fails. The file is closed
    /// either way.
    pub fn flush(&mut self) -> JournalResult<Option<JournalFile>> {
        let Some(mut open) = self.current.take() else {
            return Ok(None);
        };

        self.buffer.resize(self.file_size, 0);
        open.handle.write_at(0, &self.buffer)?;
        open.handle.sync()?;

        tracing::debug!(
            file = %open.descriptor,
            records = open.descriptor.records,
            "flushed compaction output file"
        );
        Ok(Some(open.descriptor))
    }

    /// Drops the buffer's memory. A later `open` allocates it again.
    pub fn release(&mut self) {
        self.current = None;
        self.buffer = BytesMut::new();
    }

    /// Capacity of the reusable buffer.
    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }
}
