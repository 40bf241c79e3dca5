//! Error types for the build pipeline
//!
//! Every stage returns [`BuildResult`]. The orchestrator treats all variants
//! the same way (the unit fails), but keeps them distinguishable so the
//! report can say which stage broke.

use std::{io, path::PathBuf};

/// Coarse classification of a [`BuildError`], one per pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transform,
    Resolution,
    BundleWrite,
    Digest,
    Manifest,
    Discovery,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Transform => "transform",
            Self::Resolution => "resolution",
            Self::BundleWrite => "bundle-write",
            Self::Digest => "digest",
            Self::Manifest => "manifest",
            Self::Discovery => "discovery",
            Self::Config => "config",
        };
        f.write_str(label)
    }
}

/// Errors raised while building a unit.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Malformed source, or a transform the engine rejected.
    #[error("failed to transform {}: {message}", path.display())]
    Transform { path: PathBuf, message: String },

    /// An import that is neither externalized nor found on disk.
    #[error("cannot resolve '{specifier}' imported from {}", importer.display())]
    Resolution {
        specifier: String,
        importer: PathBuf,
    },

    /// A resolved module file could not be read.
    #[error("failed to read module {}: {source}", path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The artifact could not be written to the output directory.
    #[error("failed to write artifact {}: {source}", path.display())]
    BundleWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The persisted artifact could not be read back for hashing.
    #[error("failed to read artifact {} for hashing: {source}", path.display())]
    Digest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The manifest document is missing required fields or is not valid JSON.
    #[error("invalid manifest {}: {message}", path.display())]
    Manifest { path: PathBuf, message: String },

    /// The manifest could not be read or persisted.
    #[error("failed to access manifest {}: {source}", path.display())]
    ManifestIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The units root could not be listed.
    #[error("failed to enumerate units in {}: {source}", path.display())]
    Discovery {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration file is unreadable or invalid.
    #[error("invalid configuration {}: {message}", path.display())]
    Config { path: PathBuf, message: String },
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transform { .. } => ErrorKind::Transform,
            Self::Resolution { .. } | Self::SourceRead { .. } => ErrorKind::Resolution,
            Self::BundleWrite { .. } => ErrorKind::BundleWrite,
            Self::Digest { .. } => ErrorKind::Digest,
            Self::Manifest { .. } | Self::ManifestIo { .. } => ErrorKind::Manifest,
            Self::Discovery { .. } => ErrorKind::Discovery,
            Self::Config { .. } => ErrorKind::Config,
        }
    }

    pub(crate) fn transform(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Transform {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for pipeline operations.
pub type BuildResult<T> = Result<T, BuildError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_groups_related_variants() {
        let read = BuildError::SourceRead {
            path: PathBuf::from("a.js"),
            source: io::Error::from(io::ErrorKind::NotFound),
        };
        assert_eq!(read.kind(), ErrorKind::Resolution);

        let manifest_io = BuildError::ManifestIo {
            path: PathBuf::from("manifest.json"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert_eq!(manifest_io.kind(), ErrorKind::Manifest);
        assert_eq!(manifest_io.kind().to_string(), "manifest");
    }

    #[test]
    fn test_resolution_message_names_importer() {
        let err = BuildError::Resolution {
            specifier: "./missing".to_owned(),
            importer: PathBuf::from("plugins/alpha/index.js"),
        };
        assert_eq!(
            err.to_string(),
            "cannot resolve './missing' imported from plugins/alpha/index.js"
        );
    }
}
