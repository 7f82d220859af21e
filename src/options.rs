//! Archive-wide configuration (ambient stack): ZIP64 policy, encoding
//! fallback, name lookup sensitivity, compression level, and scratch
//! directory placement.

use std::path::PathBuf;

use crate::encoding::FallbackEncoding;

/// When to emit ZIP64 fields on save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zip64Policy {
    /// Never emit ZIP64 fields. Saving an entry or an archive that would
    /// require them fails with [`crate::error::ZipError::Zip64Required`].
    Never,
    /// Emit ZIP64 fields only for the entries/totals that actually exceed
    /// the classic 32-bit limits. The default.
    AsNecessary,
    /// Always emit ZIP64 fields, even for small archives. Useful for
    /// exercising the ZIP64 code paths or for archives expected to grow.
    Always,
}

/// Archive-wide options, set once at construction and consulted by the
/// reader, writer, and save routines.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub zip64_policy: Zip64Policy,
    pub fallback_encoding: FallbackEncoding,
    pub case_sensitive: bool,
    pub compression_level: u32,
    pub temp_dir: Option<PathBuf>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        ArchiveOptions {
            zip64_policy: Zip64Policy::AsNecessary,
            fallback_encoding: FallbackEncoding::Utf8,
            case_sensitive: false,
            compression_level: 6,
            temp_dir: None,
        }
    }
}

impl ArchiveOptions {
    pub fn builder() -> ArchiveOptionsBuilder {
        ArchiveOptionsBuilder::default()
    }

    /// The directory save() should use for its scratch file, falling back
    /// to the system default when unset.
    pub fn effective_temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}

/// Builder for [`ArchiveOptions`], following the fluent setter style used
/// throughout this crate's public surface.
#[derive(Debug, Clone, Default)]
pub struct ArchiveOptionsBuilder {
    options: ArchiveOptions,
}

impl ArchiveOptionsBuilder {
    pub fn zip64_policy(mut self, policy: Zip64Policy) -> Self {
        self.options.zip64_policy = policy;
        self
    }

    pub fn fallback_encoding(mut self, encoding: FallbackEncoding) -> Self {
        self.options.fallback_encoding = encoding;
        self
    }

    pub fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.options.case_sensitive = case_sensitive;
        self
    }

    pub fn compression_level(mut self, level: u32) -> Self {
        self.options.compression_level = level.min(9);
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.temp_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> ArchiveOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let opts = ArchiveOptions::default();
        assert_eq!(opts.zip64_policy, Zip64Policy::AsNecessary);
        assert_eq!(opts.fallback_encoding, FallbackEncoding::Utf8);
        assert!(!opts.case_sensitive);
        assert_eq!(opts.compression_level, 6);
    }

    #[test]
    fn builder_clamps_compression_level() {
        let opts = ArchiveOptions::builder().compression_level(15).build();
        assert_eq!(opts.compression_level, 9);
    }
}
