//! Container configuration.

use super::consts::{BOOK, DEFAULT_MIN_STREAM_SIZE, ENCRYPTED_PACKAGE, WORKBOOK};

/// Options passed to every container constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeoConfig {
    /// Keep a trailing partial sector aside verbatim instead of treating it
    /// as a short sector. Encrypted containers rely on this.
    pub encrypted: bool,
    /// Memory-map files opened by path rather than reading them into memory.
    /// Ignored when the `mmap` feature is disabled.
    pub use_memory_map: bool,
    /// Names tried in order when locating the primary content storage.
    pub primary_storage_names: Vec<String>,
    /// Mini-stream cutoff written into containers created from scratch.
    pub min_stream_size: u32,
}

impl LeoConfig {
    /// Configuration for an encrypted container.
    pub fn encrypted() -> Self {
        Self {
            encrypted: true,
            ..Self::default()
        }
    }

    /// Replace the primary storage lookup order.
    pub fn with_primary_storage_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.primary_storage_names = names.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for LeoConfig {
    fn default() -> Self {
        Self {
            encrypted: false,
            use_memory_map: true,
            primary_storage_names: vec![
                WORKBOOK.to_string(),
                BOOK.to_string(),
                ENCRYPTED_PACKAGE.to_string(),
            ],
            min_stream_size: DEFAULT_MIN_STREAM_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LeoConfig::default();
        assert!(!config.encrypted);
        assert_eq!(config.min_stream_size, 4096);
        assert_eq!(config.primary_storage_names[0], "Workbook");
    }

    #[test]
    fn test_primary_override() {
        let config = LeoConfig::encrypted().with_primary_storage_names(["EncryptedPackage"]);
        assert!(config.encrypted);
        assert_eq!(config.primary_storage_names, vec!["EncryptedPackage".to_string()]);
    }
}
