//! Startup replay of an interrupted compaction.

use super::control::{
    delete_control_file, read_control_file, ControlFileRecord, ControlFileState, CONTROL_FILE_NAME,
    CONTROL_TEMP_NAME,
};
use super::task::CompactionState;
use crate::error::{JournalError, JournalResult};
use brokerlog_storage::FileFactory;

/// What recovery found and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No compaction was in flight.
    NoControlFile,
    /// The control file was replayed and removed.
    Completed {
        /// Renames performed now.
        renamed: usize,
        /// Old files deleted now.
        deleted: usize,
    },
    /// The control file was unusable and has been removed. The compaction it
    /// described did not take effect.
    NotCompleted,
}

/// Finishes a compaction whose control file survived a crash.
///
/// Replaying is idempotent: a rename whose source is gone and whose target
/// exists was already done, and old files already deleted are skipped. A
/// crash during recovery is recovered the same way on the next start.
///
/// # Errors
///
/// Returns an error if a storage operation fails, or
/// [`JournalError::ControlFile`] if a rename has neither its source nor its
/// target on disk. The control file is kept in both cases.
pub fn recover(factory: &dyn FileFactory) -> JournalResult<RecoveryOutcome> {
    // A temp control file was never committed
    if factory.exists(CONTROL_TEMP_NAME)? {
        factory.delete(CONTROL_TEMP_NAME)?;
    }

    let record = match read_control_file(factory)? {
        ControlFileState::Absent => return Ok(RecoveryOutcome::NoControlFile),
        ControlFileState::Corrupt(reason) => {
            tracing::warn!(
                file = CONTROL_FILE_NAME,
                %reason,
                "deleting unusable compaction control file"
            );
            delete_control_file(factory)?;
            return Ok(RecoveryOutcome::NotCompleted);
        }
        ControlFileState::Present(record) => record,
    };

    tracing::debug!(
        state = %CompactionState::RecoveringFromControlFile,
        renames = record.renames.len(),
        old_files = record.old_files.len(),
        "replaying compaction control file"
    );

    let (renamed, deleted) = replay(factory, &record)?;
    factory.sync_directory()?;
    delete_control_file(factory)?;

    tracing::info!(renamed, deleted, "finished interrupted compaction");
    Ok(RecoveryOutcome::Completed { renamed, deleted })
}

/// Applies the renames and deletions of a control record.
pub(crate) fn replay(
    factory: &dyn FileFactory,
    record: &ControlFileRecord,
) -> JournalResult<(usize, usize)> {
    let mut renamed = 0;
    for (from, to) in &record.renames {
        if factory.exists(from)? {
            factory.rename(from, to)?;
            renamed += 1;
        } else if !factory.exists(to)? {
            return Err(JournalError::control_file(format!(
                "cannot rename {from} to {to}: neither file exists"
            )));
        }
    }

    let mut deleted = 0;
    for name in &record.old_files {
        if record.renames.iter().any(|(_, to)| to == name) {
            continue;
        }
        match factory.delete(name) {
            Ok(()) => deleted += 1,
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok((renamed, deleted))
}
