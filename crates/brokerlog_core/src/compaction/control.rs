//! Compaction control file.
//!
//! The control file is the commit point of a compaction. It is a journal
//! file (header user version 0, file id 0) holding one add record with id 1
//! whose body lists the old files, the new files and the renames:
//!
//! ```text
//! int32 old_count; utf8[old_count]
//! int32 new_count; utf8[new_count]
//! int32 rename_count; (utf8 from, utf8 to)[rename_count]
//! ```
//!
//! `int32` is little-endian and `utf8` is a little-endian `u16` byte length
//! followed by the bytes.

use crate::error::{JournalError, JournalResult};
use crate::file::{JournalFileHeader, HEADER_SIZE};
use crate::reader::{JournalReader, RecordCollector};
use crate::record::encode_record;
use crate::types::{Record, RecordKind};
use brokerlog_storage::FileFactory;
use bytes::{BufMut, BytesMut};

/// Name of the control file.
pub const CONTROL_FILE_NAME: &str = "journal-rename-control.ctr";

/// Name the control file is written under before it is renamed into place.
pub const CONTROL_TEMP_NAME: &str = "journal-rename-control.ctr.tmp";

const CONTROL_RECORD_ID: i64 = 1;

/// Contents of the control file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlFileRecord {
    /// Files superseded by the compaction.
    pub old_files: Vec<String>,
    /// Files produced by the compaction, under their final names.
    pub new_files: Vec<String>,
    /// Renames still to perform, in order.
    pub renames: Vec<(String, String)>,
}

impl ControlFileRecord {
    /// Encodes the record body.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ControlFile`] if a name is longer than
    /// `u16::MAX` bytes or a list has more than `i32::MAX` entries.
    pub fn encode(&self) -> JournalResult<Vec<u8>> {
        let mut buf = Vec::new();

        put_count(&mut buf, self.old_files.len())?;
        for name in &self.old_files {
            put_string(&mut buf, name)?;
        }

        put_count(&mut buf, self.new_files.len())?;
        for name in &self.new_files {
            put_string(&mut buf, name)?;
        }

        put_count(&mut buf, self.renames.len())?;
        for (from, to) in &self.renames {
            put_string(&mut buf, from)?;
            put_string(&mut buf, to)?;
        }

        Ok(buf)
    }

    /// Decodes a record body.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::ControlFile`] if the body is truncated, has a
    /// negative count, invalid UTF-8 or trailing bytes.
    pub fn decode(data: &[u8]) -> JournalResult<Self> {
        let mut cursor = Cursor { data, pos: 0 };

        let old_count = cursor.count()?;
        let mut old_files = Vec::with_capacity(old_count.min(1024));
        for _ in 0..old_count {
            old_files.push(cursor.string()?);
        }

        let new_count = cursor.count()?;
        let mut new_files = Vec::with_capacity(new_count.min(1024));
        for _ in 0..new_count {
            new_files.push(cursor.string()?);
        }

        let rename_count = cursor.count()?;
        let mut renames = Vec::with_capacity(rename_count.min(1024));
        for _ in 0..rename_count {
            let from = cursor.string()?;
            let to = cursor.string()?;
            renames.push((from, to));
        }

        if cursor.pos != data.len() {
            return Err(JournalError::control_file(format!(
                "{} trailing bytes after control record",
                data.len() - cursor.pos
            )));
        }

        Ok(Self {
            old_files,
            new_files,
            renames,
        })
    }
}

fn put_count(buf: &mut Vec<u8>, count: usize) -> JournalResult<()> {
    let count = i32::try_from(count)
        .map_err(|_| JournalError::control_file(format!("{count} entries do not fit a count")))?;
    buf.extend_from_slice(&count.to_le_bytes());
    Ok(())
}

fn put_string(buf: &mut Vec<u8>, value: &str) -> JournalResult<()> {
    let len = u16::try_from(value.len())
        .map_err(|_| JournalError::control_file(format!("file name too long: {value}")))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> JournalResult<&'a [u8]> {
        let end = self.pos + len;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| JournalError::control_file("control record too short"))?;
        self.pos = end;
        Ok(bytes)
    }

    fn count(&mut self) -> JournalResult<usize> {
        let bytes = self.take(4)?;
        let count = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        usize::try_from(count)
            .map_err(|_| JournalError::control_file(format!("negative count {count}")))
    }

    fn string(&mut self) -> JournalResult<String> {
        let bytes = self.take(2)?;
        let len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| JournalError::control_file("file name is not valid UTF-8"))
    }
}

/// Result of looking for a control file.
#[derive(Debug, PartialEq, Eq)]
pub enum ControlFileState {
    /// No control file exists.
    Absent,
    /// A control file exists but cannot be used.
    Corrupt(String),
    /// A readable control file.
    Present(ControlFileRecord),
}

/// Durably writes the control file.
///
/// The file is written under a temporary name, synced, then renamed into
/// place and the directory synced, so a crash leaves either no control file
/// or a complete one.
///
/// # Errors
///
/// Returns an error if the record cannot be encoded or any file operation
/// fails.
pub fn write_control_file(factory: &dyn FileFactory, record: &ControlFileRecord) -> JournalResult<()> {
    let body = record.encode()?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + body.len() + 64);
    JournalFileHeader::new(0, 0).encode(&mut buf);
    encode_record(
        &mut buf,
        RecordKind::Add,
        0,
        &Record::new(CONTROL_RECORD_ID, 0, body),
    )?;
    // Zero kind byte ends the record stream
    buf.put_u8(0);

    if factory.exists(CONTROL_TEMP_NAME)? {
        factory.delete(CONTROL_TEMP_NAME)?;
    }
    let mut file = factory.open(CONTROL_TEMP_NAME)?;
    file.write_at(0, &buf)?;
    file.sync()?;
    drop(file);

    factory.rename(CONTROL_TEMP_NAME, CONTROL_FILE_NAME)?;
    factory.sync_directory()?;

    tracing::debug!(
        old_files = record.old_files.len(),
        new_files = record.new_files.len(),
        renames = record.renames.len(),
        "wrote compaction control file"
    );
    Ok(())
}

/// Reads the control file, if any.
///
/// # Errors
///
/// Returns an error only for storage failures. Format problems are reported
/// as [`ControlFileState::Corrupt`].
pub fn read_control_file(factory: &dyn FileFactory) -> JournalResult<ControlFileState> {
    if !factory.exists(CONTROL_FILE_NAME)? {
        return Ok(ControlFileState::Absent);
    }

    let file = factory.open_existing(CONTROL_FILE_NAME)?;
    let mut collector = RecordCollector::default();
    match JournalReader::read_file(file.as_ref(), &mut collector) {
        Ok(_) => {}
        Err(JournalError::Storage(e)) => return Err(e.into()),
        Err(e) => return Ok(ControlFileState::Corrupt(e.to_string())),
    }

    let Some(info) = collector
        .records
        .iter()
        .find(|info| info.kind == RecordKind::Add && info.id() == CONTROL_RECORD_ID)
    else {
        return Ok(ControlFileState::Corrupt(
            "control file has no control record".to_string(),
        ));
    };

    match ControlFileRecord::decode(&info.record.body) {
        Ok(record) => Ok(ControlFileState::Present(record)),
        Err(e) => Ok(ControlFileState::Corrupt(e.to_string())),
    }
}

/// Deletes the control file if it exists.
///
/// # Errors
///
/// Returns an error if the deletion fails.
pub fn delete_control_file(factory: &dyn FileFactory) -> JournalResult<()> {
    match factory.delete(CONTROL_FILE_NAME) {
        Ok(()) => {}
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    factory.sync_directory()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use brokerlog_storage::{FileSystemFactory, InMemoryFactory};
    use tempfile::tempdir;

    fn sample() -> ControlFileRecord {
        ControlFileRecord {
            old_files: vec!["a".to_string(), "b".to_string()],
            new_files: vec!["c".to_string()],
            renames: vec![("a".to_string(), "a.bak".to_string())],
        }
    }

    #[test]
    fn body_layout() {
        let body = ControlFileRecord {
            old_files: vec!["ab".to_string()],
            new_files: Vec::new(),
            renames: Vec::new(),
        }
        .encode()
        .unwrap();

        assert_eq!(body, vec![1, 0, 0, 0, 2, 0, b'a', b'b', 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn control_file_roundtrip() {
        let factory = InMemoryFactory::new();
        write_control_file(&factory, &sample()).unwrap();

        assert!(factory.exists(CONTROL_FILE_NAME).unwrap());
        assert!(!factory.exists(CONTROL_TEMP_NAME).unwrap());
        assert_eq!(
            read_control_file(&factory).unwrap(),
            ControlFileState::Present(sample())
        );
    }

    #[test]
    fn control_file_roundtrip_on_disk() {
        let dir = tempdir().unwrap();
        let factory = FileSystemFactory::open(dir.path()).unwrap();

        write_control_file(&factory, &sample()).unwrap();
        assert_eq!(
            read_control_file(&factory).unwrap(),
            ControlFileState::Present(sample())
        );

        delete_control_file(&factory).unwrap();
        assert_eq!(read_control_file(&factory).unwrap(), ControlFileState::Absent);
    }

    #[test]
    fn empty_control_file_is_corrupt() {
        let factory = InMemoryFactory::new();
        factory.insert_file(CONTROL_FILE_NAME, Vec::new());
        assert!(matches!(
            read_control_file(&factory).unwrap(),
            ControlFileState::Corrupt(_)
        ));

        let mut header_only = BytesMut::new();
        JournalFileHeader::new(0, 0).encode(&mut header_only);
        factory.insert_file(CONTROL_FILE_NAME, header_only.to_vec());
        assert!(matches!(
            read_control_file(&factory).unwrap(),
            ControlFileState::Corrupt(_)
        ));
    }

    #[test]
    fn damaged_control_file_is_corrupt() {
        let factory = InMemoryFactory::new();
        write_control_file(&factory, &sample()).unwrap();

        let mut data = factory.file_data(CONTROL_FILE_NAME).unwrap();
        let last = data.len() - 3;
        data[last] ^= 0xFF;
        factory.insert_file(CONTROL_FILE_NAME, data);

        assert!(matches!(
            read_control_file(&factory).unwrap(),
            ControlFileState::Corrupt(_)
        ));
    }

    #[test]
    fn decode_rejects_bad_bodies() {
        assert!(ControlFileRecord::decode(&[]).is_err());
        assert!(ControlFileRecord::decode(&(-1i32).to_le_bytes()).is_err());

        let mut body = sample().encode().unwrap();
        body.push(0);
        assert!(ControlFileRecord::decode(&body).is_err());

        let mut bad_utf8 = Vec::new();
        bad_utf8.extend_from_slice(&1i32.to_le_bytes());
        bad_utf8.extend_from_slice(&1u16.to_le_bytes());
        bad_utf8.push(0xFF);
        bad_utf8.extend_from_slice(&[0; 8]);
        assert!(ControlFileRecord::decode(&bad_utf8).is_err());
    }

    #[test]
    fn delete_missing_is_ok() {
        let factory = InMemoryFactory::new();
        delete_control_file(&factory).unwrap();
    }
}
