use quiver_error::{QuiverResult, quiver_bail};

use crate::compression::CompressionKind;

/// The metadata format revisions a reader or writer understands.
///
/// Tags beyond this enum (a future revision) fail decode with an explicit
/// unsupported-version error rather than a best-effort parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MetadataVersion {
    /// Legacy revision; the only one the legacy envelope may carry.
    V4,
    #[default]
    V5,
}

pub const DEFAULT_ALIGNMENT: usize = 8;
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 64;

/// Write-side configuration.
#[derive(Debug, Clone)]
pub struct IpcWriteOptions {
    /// Buffer and metadata alignment; a power of two.
    pub(crate) alignment: usize,
    /// Emit the pre-continuation-marker envelope.
    pub(crate) write_legacy_format: bool,
    pub(crate) metadata_version: MetadataVersion,
    pub(crate) max_recursion_depth: usize,
    pub(crate) compression: Option<CompressionKind>,
    /// Fan per-buffer compression out over a thread pool. Output bytes are
    /// identical either way.
    pub(crate) use_threads: bool,
    /// Prefer delta dictionary batches when the new dictionary extends the
    /// previous one.
    pub(crate) emit_dictionary_deltas: bool,
    /// Table writes only: compute one canonical dictionary per field up
    /// front and rewrite indices.
    pub(crate) unify_dictionaries: bool,
}

impl Default for IpcWriteOptions {
    fn default() -> Self {
        Self {
            alignment: DEFAULT_ALIGNMENT,
            write_legacy_format: false,
            metadata_version: MetadataVersion::default(),
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            compression: None,
            use_threads: true,
            emit_dictionary_deltas: false,
            unify_dictionaries: false,
        }
    }
}

impl IpcWriteOptions {
    pub fn try_with_alignment(mut self, alignment: usize) -> QuiverResult<Self> {
        if alignment == 0 || !alignment.is_power_of_two() {
            quiver_bail!("alignment must be a positive power of two, got {}", alignment);
        }
        // Padding is written out of fixed zero blocks.
        if alignment > 512 {
            quiver_bail!("alignment must be <= 512, got {}", alignment);
        }
        self.alignment = alignment;
        Ok(self)
    }

    /// The legacy envelope predates metadata V5; combining them is invalid.
    pub fn try_with_legacy_format(mut self, legacy: bool) -> QuiverResult<Self> {
        if legacy && self.metadata_version == MetadataVersion::V5 {
            quiver_bail!("the legacy envelope requires metadata version V4");
        }
        self.write_legacy_format = legacy;
        Ok(self)
    }

    pub fn with_metadata_version(mut self, version: MetadataVersion) -> Self {
        self.metadata_version = version;
        self
    }

    pub fn with_max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    /// Request body-buffer compression. Only the allow-listed codecs are
    /// accepted; anything else fails here, before any bytes are written.
    pub fn try_with_compression(
        mut self,
        compression: Option<CompressionKind>,
    ) -> QuiverResult<Self> {
        if let Some(kind) = compression {
            if !kind.is_available() {
                quiver_bail!("codec {:?} is not available for IPC bodies", kind);
            }
        }
        self.compression = compression;
        Ok(self)
    }

    pub fn with_use_threads(mut self, use_threads: bool) -> Self {
        self.use_threads = use_threads;
        self
    }

    pub fn with_dictionary_deltas(mut self, emit: bool) -> Self {
        self.emit_dictionary_deltas = emit;
        self
    }

    pub fn with_unify_dictionaries(mut self, unify: bool) -> Self {
        self.unify_dictionaries = unify;
        self
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn metadata_version(&self) -> MetadataVersion {
        self.metadata_version
    }

    pub fn max_recursion_depth(&self) -> usize {
        self.max_recursion_depth
    }

    pub fn unify_dictionaries(&self) -> bool {
        self.unify_dictionaries
    }
}

/// Read-side configuration.
#[derive(Debug, Clone)]
pub struct IpcReadOptions {
    pub(crate) max_recursion_depth: usize,
    /// Top-level field indices to decode; empty means all fields.
    pub(crate) included_fields: Vec<usize>,
    pub(crate) use_threads: bool,
}

impl Default for IpcReadOptions {
    fn default() -> Self {
        Self {
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            included_fields: Vec::new(),
            use_threads: true,
        }
    }
}

impl IpcReadOptions {
    pub fn with_max_recursion_depth(mut self, depth: usize) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    pub fn with_included_fields(mut self, included_fields: Vec<usize>) -> Self {
        self.included_fields = included_fields;
        self
    }

    pub fn with_use_threads(mut self, use_threads: bool) -> Self {
        self.use_threads = use_threads;
        self
    }

    pub fn max_recursion_depth(&self) -> usize {
        self.max_recursion_depth
    }

    /// Dedupe and sort the projection, validating indices against
    /// `num_fields`. An empty projection selects every field and
    /// normalizes to `None`.
    pub fn normalized_projection(
        &self,
        num_fields: usize,
    ) -> QuiverResult<Option<Vec<usize>>> {
        if self.included_fields.is_empty() {
            return Ok(None);
        }
        let mut indices = self.included_fields.clone();
        indices.sort_unstable();
        indices.dedup();
        if let Some(&max) = indices.last() {
            if max >= num_fields {
                quiver_bail!(
                    "field index {} out of range for schema with {} fields",
                    max,
                    num_fields
                );
            }
        }
        Ok(Some(indices))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_must_be_power_of_two() {
        assert!(IpcWriteOptions::default().try_with_alignment(64).is_ok());
        assert!(IpcWriteOptions::default().try_with_alignment(0).is_err());
        assert!(IpcWriteOptions::default().try_with_alignment(24).is_err());
    }

    #[test]
    fn legacy_requires_v4() {
        assert!(IpcWriteOptions::default().try_with_legacy_format(true).is_err());
        assert!(
            IpcWriteOptions::default()
                .with_metadata_version(MetadataVersion::V4)
                .try_with_legacy_format(true)
                .is_ok()
        );
    }

    #[test]
    fn projection_normalizes() {
        let options = IpcReadOptions::default().with_included_fields(vec![3, 1, 1]);
        assert_eq!(options.normalized_projection(5).unwrap(), Some(vec![1, 3]));
        assert!(options.normalized_projection(3).is_err());
        assert_eq!(
            IpcReadOptions::default().normalized_projection(3).unwrap(),
            None
        );
    }
}
