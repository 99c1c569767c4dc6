//! Journal configuration.

use crate::error::{JournalError, JournalResult};
use crate::file::RESERVED_EXTENSIONS;

/// Smallest accepted journal file size.
pub const MIN_FILE_SIZE: usize = 1024;

const NAME_SEPARATORS: &[char] = &['/', '\\', '.'];

/// Configuration for opening a journal.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Size of every journal file, header included.
    ///
    /// Appends rotate to a new file when a record would not fit, and
    /// compaction pads its output files to exactly this size.
    pub file_size: usize,

    /// Prefix of data file names (`{prefix}-{n}.{extension}`).
    pub file_prefix: String,

    /// Extension of data file names.
    pub file_extension: String,

    /// Version written into every file header by the embedding application.
    pub user_version: i32,

    /// Whether to sync the current file after every append.
    pub sync_on_write: bool,

    /// Minimum number of closed data files before compaction is suggested.
    pub compact_min_files: usize,

    /// Live-record percentage below which compaction is suggested.
    pub compact_percentage: u8,

    /// Section count of the live-record index. Must be a power of two.
    pub index_sections: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            file_size: 10 * 1024 * 1024, // 10 MiB
            file_prefix: "journal".to_string(),
            file_extension: "jrn".to_string(),
            user_version: 0,
            sync_on_write: true,
            compact_min_files: 10,
            compact_percentage: 30,
            index_sections: 16,
        }
    }
}

impl JournalConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the journal file size.
    #[must_use]
    pub const fn file_size(mut self, size: usize) -> Self {
        self.file_size = size;
        self
    }

    /// Sets the data file name prefix.
    #[must_use]
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.file_prefix = prefix.into();
        self
    }

    /// Sets the data file extension.
    #[must_use]
    pub fn file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    /// Sets the user version written into file headers.
    #[must_use]
    pub const fn user_version(mut self, version: i32) -> Self {
        self.user_version = version;
        self
    }

    /// Sets whether to sync after every append.
    #[must_use]
    pub const fn sync_on_write(mut self, value: bool) -> Self {
        self.sync_on_write = value;
        self
    }

    /// Sets the minimum number of files before compaction is suggested.
    #[must_use]
    pub const fn compact_min_files(mut self, files: usize) -> Self {
        self.compact_min_files = files;
        self
    }

    /// Sets the live-record percentage threshold for compaction.
    #[must_use]
    pub const fn compact_percentage(mut self, percentage: u8) -> Self {
        self.compact_percentage = percentage;
        self
    }

    /// Sets the section count of the live-record index.
    #[must_use]
    pub const fn index_sections(mut self, sections: usize) -> Self {
        self.index_sections = sections;
        self
    }

    /// Checks that the configuration can be used to open a journal.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::InvalidOperation`] describing the first
    /// unusable value.
    pub fn validate(&self) -> JournalResult<()> {
        if self.file_size < MIN_FILE_SIZE {
            return Err(JournalError::invalid_operation(format!(
                "file size {} is below the minimum of {MIN_FILE_SIZE} bytes",
                self.file_size
            )));
        }
        if self.file_size > u32::MAX as usize {
            return Err(JournalError::invalid_operation(format!(
                "file size {} exceeds {} bytes",
                self.file_size,
                u32::MAX
            )));
        }
        if self.file_prefix.is_empty() || self.file_prefix.contains(NAME_SEPARATORS) {
            return Err(JournalError::invalid_operation(format!(
                "invalid file prefix {:?}",
                self.file_prefix
            )));
        }
        if self.file_extension.is_empty()
            || self.file_extension.contains(NAME_SEPARATORS)
            || RESERVED_EXTENSIONS.contains(&self.file_extension.as_str())
        {
            return Err(JournalError::invalid_operation(format!(
                "invalid file extension {:?}",
                self.file_extension
            )));
        }
        if self.compact_percentage > 100 {
            return Err(JournalError::invalid_operation(format!(
                "compact percentage {} is above 100",
                self.compact_percentage
            )));
        }
        if self.index_sections == 0 || !self.index_sections.is_power_of_two() {
            return Err(JournalError::invalid_operation(format!(
                "index sections {} is not a power of two",
                self.index_sections
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = JournalConfig::default();
        assert_eq!(config.file_size, 10 * 1024 * 1024);
        assert_eq!(config.file_prefix, "journal");
        assert_eq!(config.file_extension, "jrn");
        assert!(config.sync_on_write);
        assert_eq!(config.compact_min_files, 10);
        assert_eq!(config.compact_percentage, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let config = JournalConfig::new()
            .file_size(4096)
            .file_prefix("bindings")
            .file_extension("bin")
            .sync_on_write(false)
            .index_sections(4);

        assert_eq!(config.file_size, 4096);
        assert_eq!(config.file_prefix, "bindings");
        assert_eq!(config.file_extension, "bin");
        assert!(!config.sync_on_write);
        assert_eq!(config.index_sections, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unusable_values() {
        let invalid = [
            JournalConfig::new().file_size(512),
            JournalConfig::new().file_prefix(""),
            JournalConfig::new().file_prefix("a/b"),
            JournalConfig::new().file_extension("cmp"),
            JournalConfig::new().file_extension("ctr"),
            JournalConfig::new().file_extension("a.b"),
            JournalConfig::new().compact_percentage(101),
            JournalConfig::new().index_sections(6),
            JournalConfig::new().index_sections(0),
        ];

        for config in invalid {
            assert!(
                matches!(config.validate(), Err(JournalError::InvalidOperation { .. })),
                "{config:?} should be rejected"
            );
        }
    }
}
