//! Sequential journal file reader.
//!
//! A file is read whole, its header validated, then records are decoded in
//! order and handed to a [`JournalReaderCallback`]. Reading stops at zero
//! padding, at a torn trailing record and at a record left by an earlier use
//! of the file; none of these is an error.

use crate::error::JournalResult;
use crate::file::{JournalFileHeader, HEADER_SIZE};
use crate::record::{decode_record, Decoded};
use crate::types::{RecordInfo, RecordKind};
use brokerlog_storage::SequentialFile;
use bytes::Bytes;

/// Receives records in file order.
pub trait JournalReaderCallback {
    /// Called for every add record.
    ///
    /// # Errors
    ///
    /// An error aborts the read and is returned from
    /// [`JournalReader::read_file`].
    fn on_read_add_record(&mut self, info: RecordInfo) -> JournalResult<()>;

    /// Called for every update record.
    ///
    /// # Errors
    ///
    /// An error aborts the read.
    fn on_read_update_record(&mut self, info: RecordInfo) -> JournalResult<()> {
        let _ = info;
        Ok(())
    }

    /// Called for every delete record.
    ///
    /// # Errors
    ///
    /// An error aborts the read.
    fn on_read_delete_record(&mut self, info: RecordInfo) -> JournalResult<()> {
        let _ = info;
        Ok(())
    }
}

/// How a file read ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    /// Zero padding or end of file.
    Clean,
    /// A partially written record.
    Truncated,
    /// A record from an earlier use of the file.
    Stale,
}

/// Summary of one file read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSummary {
    /// The file header.
    pub header: JournalFileHeader,
    /// Records dispatched to the callback.
    pub records: u64,
    /// Offset just past the last valid record.
    pub end_offset: u64,
    /// Why reading stopped.
    pub end: ReadEnd,
}

/// Reads journal files.
pub struct JournalReader;

impl JournalReader {
    /// Reads and validates the header of `file`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::JournalError::InvalidFormat`] if the file is shorter
    /// than a header or has an unsupported format version.
    pub fn read_header(file: &dyn SequentialFile) -> JournalResult<JournalFileHeader> {
        let size = file.size()?;
        let len = HEADER_SIZE.min(size as usize);
        let data = file.read_at(0, len)?;
        JournalFileHeader::decode(&data)
    }

    /// Reads every record of `file` into `callback`.
    ///
    /// Records are checked against the header's file id.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid header, a corrupt record, a checksum
    /// mismatch, or an error raised by the callback.
    pub fn read_file(
        file: &dyn SequentialFile,
        callback: &mut dyn JournalReaderCallback,
    ) -> JournalResult<ReadSummary> {
        let data = Bytes::from(file.read_all()?);
        let header = JournalFileHeader::decode(&data)?;

        let mut offset = HEADER_SIZE;
        let mut records = 0u64;
        let end = loop {
            match decode_record(&data, offset, header.file_id)? {
                Decoded::Record { info, len } => {
                    offset += len;
                    records += 1;
                    match info.kind {
                        RecordKind::Add => callback.on_read_add_record(info)?,
                        RecordKind::Update => callback.on_read_update_record(info)?,
                        RecordKind::Delete => callback.on_read_delete_record(info)?,
                    }
                }
                Decoded::End => break ReadEnd::Clean,
                Decoded::Truncated => break ReadEnd::Truncated,
                Decoded::Stale => break ReadEnd::Stale,
            }
        };

        if end == ReadEnd::Truncated {
            tracing::warn!(
                file = file.name(),
                offset,
                "ignoring partially written record at end of file"
            );
        }

        Ok(ReadSummary {
            header,
            records,
            end_offset: offset as u64,
            end,
        })
    }
}

/// Callback that keeps every record in order.
#[derive(Debug, Default)]
pub struct RecordCollector {
    /// Records read so far.
    pub records: Vec<RecordInfo>,
}

impl JournalReaderCallback for RecordCollector {
    fn on_read_add_record(&mut self, info: RecordInfo) -> JournalResult<()> {
        self.records.push(info);
        Ok(())
    }

    fn on_read_update_record(&mut self, info: RecordInfo) -> JournalResult<()> {
        self.records.push(info);
        Ok(())
    }

    fn on_read_delete_record(&mut self, info: RecordInfo) -> JournalResult<()> {
        self.records.push(info);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::JournalError;
    use crate::record::{encode_record, encoded_len};
    use crate::types::Record;
    use brokerlog_storage::{FileFactory, InMemoryFactory};
    use bytes::{BufMut, BytesMut};

    fn write_file(factory: &InMemoryFactory, name: &str, file_id: i64, records: &[(RecordKind, Record)]) {
        let mut buf = BytesMut::new();
        JournalFileHeader::new(0, file_id).encode(&mut buf);
        for (kind, record) in records {
            encode_record(&mut buf, *kind, file_id, record).unwrap();
        }
        buf.put_bytes(0, 64);
        factory.insert_file(name, buf.to_vec());
    }

    #[derive(Default)]
    struct AddsOnly {
        ids: Vec<i64>,
    }

    impl JournalReaderCallback for AddsOnly {
        fn on_read_add_record(&mut self, info: RecordInfo) -> JournalResult<()> {
            self.ids.push(info.id());
            Ok(())
        }
    }

    #[test]
    fn dispatches_by_kind() {
        let factory = InMemoryFactory::new();
        write_file(
            &factory,
            "j-1.jrn",
            4,
            &[
                (RecordKind::Add, Record::new(1, 0, b"a".to_vec())),
                (RecordKind::Update, Record::new(1, 0, b"b".to_vec())),
                (RecordKind::Add, Record::new(2, 0, b"c".to_vec())),
                (RecordKind::Delete, Record::tombstone(1)),
            ],
        );
        let file = factory.open("j-1.jrn").unwrap();

        let mut adds = AddsOnly::default();
        let summary = JournalReader::read_file(file.as_ref(), &mut adds).unwrap();
        assert_eq!(adds.ids, vec![1, 2]);
        assert_eq!(summary.records, 4);
        assert_eq!(summary.end, ReadEnd::Clean);
        assert_eq!(summary.header.file_id, 4);

        let mut all = RecordCollector::default();
        JournalReader::read_file(file.as_ref(), &mut all).unwrap();
        let kinds: Vec<RecordKind> = all.records.iter().map(|info| info.kind).collect();
        assert_eq!(
            kinds,
            vec![RecordKind::Add, RecordKind::Update, RecordKind::Add, RecordKind::Delete]
        );
        assert_eq!(&all.records[1].record.body[..], b"b");
        assert_eq!(all.records[0].offset, HEADER_SIZE as u64);
    }

    #[test]
    fn torn_tail_ends_cleanly() {
        let factory = InMemoryFactory::new();
        let first = Record::new(1, 0, vec![1u8; 10]);
        let mut buf = BytesMut::new();
        JournalFileHeader::new(0, 2).encode(&mut buf);
        encode_record(&mut buf, RecordKind::Add, 2, &first).unwrap();
        encode_record(&mut buf, RecordKind::Add, 2, &Record::new(2, 0, vec![2u8; 10])).unwrap();
        buf.truncate(buf.len() - 5);
        factory.insert_file("j-1.jrn", buf.to_vec());

        let file = factory.open("j-1.jrn").unwrap();
        let mut collector = RecordCollector::default();
        let summary = JournalReader::read_file(file.as_ref(), &mut collector).unwrap();

        assert_eq!(collector.records.len(), 1);
        assert_eq!(summary.end, ReadEnd::Truncated);
        assert_eq!(summary.end_offset, (HEADER_SIZE + encoded_len(&first)) as u64);
    }

    #[test]
    fn stale_records_end_the_file() {
        let factory = InMemoryFactory::new();
        let mut buf = BytesMut::new();
        JournalFileHeader::new(0, 7).encode(&mut buf);
        encode_record(&mut buf, RecordKind::Add, 7, &Record::new(1, 0, Vec::new())).unwrap();
        encode_record(&mut buf, RecordKind::Add, 3, &Record::new(2, 0, Vec::new())).unwrap();
        factory.insert_file("j-1.jrn", buf.to_vec());

        let file = factory.open("j-1.jrn").unwrap();
        let mut collector = RecordCollector::default();
        let summary = JournalReader::read_file(file.as_ref(), &mut collector).unwrap();

        assert_eq!(collector.records.len(), 1);
        assert_eq!(summary.end, ReadEnd::Stale);
    }

    #[test]
    fn corrupt_record_is_an_error() {
        let factory = InMemoryFactory::new();
        write_file(
            &factory,
            "j-1.jrn",
            1,
            &[
                (RecordKind::Add, Record::new(1, 0, b"payload".to_vec())),
                (RecordKind::Delete, Record::tombstone(1)),
            ],
        );
        let mut data = factory.file_data("j-1.jrn").unwrap();
        data[HEADER_SIZE + 20] ^= 0x55;
        factory.insert_file("j-1.jrn", data);

        let file = factory.open("j-1.jrn").unwrap();
        let mut collector = RecordCollector::default();
        assert!(matches!(
            JournalReader::read_file(file.as_ref(), &mut collector),
            Err(JournalError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn torn_last_record_ends_read() {
        let factory = InMemoryFactory::new();
        write_file(
            &factory,
            "j-1.jrn",
            1,
            &[
                (RecordKind::Add, Record::new(1, 0, b"kept".to_vec())),
                (RecordKind::Add, Record::new(2, 0, vec![9u8; 40])),
            ],
        );
        // The second frame keeps its length but loses its body and checksum
        let mut data = factory.file_data("j-1.jrn").unwrap();
        let end = data.len() - 64;
        data[end - 30..end].fill(0);
        factory.insert_file("j-1.jrn", data);

        let file = factory.open("j-1.jrn").unwrap();
        let mut collector = RecordCollector::default();
        let summary = JournalReader::read_file(file.as_ref(), &mut collector).unwrap();

        assert_eq!(summary.end, ReadEnd::Truncated);
        assert_eq!(summary.records, 1);
        assert_eq!(collector.records[0].id(), 1);
        let first_len = encoded_len(&Record::new(1, 0, b"kept".to_vec()));
        assert_eq!(summary.end_offset, (HEADER_SIZE + first_len) as u64);
    }

    #[test]
    fn callback_error_aborts() {
        struct Failing;
        impl JournalReaderCallback for Failing {
            fn on_read_add_record(&mut self, info: RecordInfo) -> JournalResult<()> {
                Err(JournalError::RecordNotFound { id: info.id() })
            }
        }

        let factory = InMemoryFactory::new();
        write_file(&factory, "j-1.jrn", 1, &[(RecordKind::Add, Record::new(5, 0, Vec::new()))]);
        let file = factory.open("j-1.jrn").unwrap();

        assert!(matches!(
            JournalReader::read_file(file.as_ref(), &mut Failing),
            Err(JournalError::RecordNotFound { id: 5 })
        ));
    }

    #[test]
    fn short_file_has_no_header() {
        let factory = InMemoryFactory::new();
        factory.insert_file("j-1.jrn", vec![2, 0, 0]);
        let file = factory.open("j-1.jrn").unwrap();

        assert!(matches!(
            JournalReader::read_header(file.as_ref()),
            Err(JournalError::InvalidFormat { .. })
        ));
        assert!(JournalReader::read_file(file.as_ref(), &mut RecordCollector::default()).is_err());
    }
}
