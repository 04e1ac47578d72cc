//! # Sources
//!
//! A [`Source`] produces the byte content of an emitted asset. The emission
//! engine prefers the zero-copy [`Source::buffer`] form when a source can
//! provide one, and falls back to [`Source::source`] coerced through UTF-8.
//!
//! After a source has been materialised to disk, the driver swaps it for a
//! [`SizeOnlySource`] so the content memory can be reclaimed while size
//! reporting keeps working.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{BinderyError, BinderyResult};

// =============================================================================
// Source Trait
// =============================================================================

/// An opaque producer of byte content for an emitted asset.
pub trait Source: Send + Sync {
    /// The content as bytes. Text-backed sources encode through UTF-8.
    fn source(&self) -> BinderyResult<Bytes>;

    /// The content as an already-materialised buffer, when one exists.
    ///
    /// Returning `None` makes the consumer fall back to [`Source::source`].
    fn buffer(&self) -> Option<Bytes> {
        None
    }

    /// Content length in bytes.
    fn size(&self) -> usize;
}

/// Extract content from a source, preferring the buffer form.
pub fn source_content(source: &dyn Source) -> BinderyResult<Bytes> {
    match source.buffer() {
        Some(buffer) => Ok(buffer),
        None => source.source(),
    }
}

// =============================================================================
// Raw Source
// =============================================================================

/// A source backed by an in-memory buffer.
#[derive(Debug, Clone)]
pub struct RawSource {
    content: Bytes,
}

impl RawSource {
    /// Create a source from raw bytes.
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
        }
    }

    /// Create a source from text, encoded as UTF-8.
    pub fn from_string(content: impl Into<String>) -> Self {
        Self {
            content: Bytes::from(content.into().into_bytes()),
        }
    }
}

impl Source for RawSource {
    fn source(&self) -> BinderyResult<Bytes> {
        Ok(self.content.clone())
    }

    fn buffer(&self) -> Option<Bytes> {
        Some(self.content.clone())
    }

    fn size(&self) -> usize {
        self.content.len()
    }
}

// =============================================================================
// Size-Only Source
// =============================================================================

/// A placeholder source remembering only the byte size of written content.
///
/// Installed in place of a concrete source after a successful write; asking
/// it for content is a contract violation.
#[derive(Debug, Clone, Copy)]
pub struct SizeOnlySource {
    size: usize,
}

impl SizeOnlySource {
    /// Create a placeholder for content of the given size.
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

impl Source for SizeOnlySource {
    fn source(&self) -> BinderyResult<Bytes> {
        Err(BinderyError::internal(
            "content of a written asset is no longer available (size-only source)",
        ))
    }

    fn size(&self) -> usize {
        self.size
    }
}

// =============================================================================
// Asset Info
// =============================================================================

/// Attributes attached to an emitted asset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetInfo {
    /// The source has no in-place mutation semantics; a path written once
    /// with it can be assumed unchanged until the file name changes
    pub immutable: bool,
    /// Byte size, filled in once known
    pub size: Option<usize>,
    /// The asset only carries development information
    #[serde(default)]
    pub development: bool,
    /// Names of source files this asset was built from
    #[serde(default)]
    pub source_filenames: Vec<String>,
}

impl AssetInfo {
    /// Info for an immutable asset.
    pub fn immutable() -> Self {
        Self {
            immutable: true,
            ..Self::default()
        }
    }

    /// Copy of this info with the size filled in.
    pub fn with_size(&self, size: usize) -> Self {
        let mut info = self.clone();
        info.size = Some(size);
        info
    }
}

// =============================================================================
// Asset Entry
// =============================================================================

/// One named asset of a compilation.
#[derive(Clone)]
pub struct AssetEntry {
    /// Public name of the asset, as requested by the emitting plugin
    pub name: String,
    /// Content producer
    pub source: Arc<dyn Source>,
    /// Attributes
    pub info: AssetInfo,
}

impl std::fmt::Debug for AssetEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetEntry")
            .field("name", &self.name)
            .field("size", &self.source.size())
            .field("info", &self.info)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_source_prefers_buffer() {
        let source = RawSource::from_string("hello");
        assert_eq!(source.size(), 5);
        assert_eq!(source_content(&source).unwrap(), Bytes::from("hello"));
        assert!(source.buffer().is_some());
    }

    #[test]
    fn test_size_only_source_refuses_content() {
        let source = SizeOnlySource::new(42);
        assert_eq!(source.size(), 42);
        assert!(source.source().is_err());
        assert!(source.buffer().is_none());
    }

    #[test]
    fn test_asset_info_with_size() {
        let info = AssetInfo::immutable().with_size(7);
        assert!(info.immutable);
        assert_eq!(info.size, Some(7));
    }
}
