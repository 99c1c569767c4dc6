//! Journal compaction.
//!
//! Compaction copies the live records of closed journal files into new
//! files and retires the old ones. The switch is committed by a control
//! file, so after a crash the journal directory holds either the original
//! files or enough information to finish the switch.
//!
//! ## Sequence
//!
//! 1. Read old files in order, dropping records whose id is not live
//! 2. Write survivors into `.cmp` files, one full buffer per file
//! 3. Durably write the control file (the commit point)
//! 4. Rename `.cmp` files to data names
//! 5. Delete old files, then the control file
//!
//! [`recover`] repeats steps 4 and 5 from a surviving control file.

mod control;
mod recovery;
mod task;

pub use control::{
    delete_control_file, read_control_file, write_control_file, ControlFileRecord,
    ControlFileState, CONTROL_FILE_NAME, CONTROL_TEMP_NAME,
};
pub use recovery::{recover, RecoveryOutcome};
pub use task::{CompactionResult, CompactionState, CompactionTask};
