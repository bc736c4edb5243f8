use std::io;
use thiserror::Error;

/// Broad classification of a failure, stable across releases.
///
/// Every [`CairnError`] maps to exactly one kind, and every kind maps to one
/// process exit code (see [`ErrorKind::exit_code`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Cannot open or lock the dump source.
    SourceUnavailable,
    /// Cannot connect to or lock the restore target.
    TargetUnavailable,
    /// Archive missing, incomplete or structurally invalid.
    ArchiveCorrupt,
    /// A record was rejected in strict (objcheck) mode.
    ValidationFailed,
    /// Lock contention on a data directory.
    ResourceBusy,
    /// Some documents failed and the caller asked to stop on error.
    PartialFailure,
    /// The run was cancelled by the user.
    Interrupted,
    /// Bad flags, options or filter predicate.
    Usage,
    /// Anything else (I/O, storage engine, protocol).
    Internal,
}

impl ErrorKind {
    /// Process exit code for this kind.
    ///
    /// | code | meaning |
    /// |------|---------|
    /// | 1    | internal / I/O |
    /// | 2    | usage or configuration |
    /// | 3    | archive not found, incomplete or corrupt |
    /// | 4    | target unreachable |
    /// | 5    | validation failure |
    /// | 6    | resource busy |
    /// | 7    | partial failure (stop-on-error) |
    /// | 8    | source unreachable |
    /// | 130  | interrupted |
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Internal => 1,
            ErrorKind::Usage => 2,
            ErrorKind::ArchiveCorrupt => 3,
            ErrorKind::TargetUnavailable => 4,
            ErrorKind::ValidationFailed => 5,
            ErrorKind::ResourceBusy => 6,
            ErrorKind::PartialFailure => 7,
            ErrorKind::SourceUnavailable => 8,
            ErrorKind::Interrupted => 130,
        }
    }
}

#[derive(Error, Debug)]
pub enum CairnError {
    #[error("Source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Target unavailable: {0}")]
    TargetUnavailable(String),

    #[error("Archive corrupt: {0}")]
    ArchiveCorrupt(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Resource busy: {0}")]
    ResourceBusy(String),

    #[error("Partial failure: {0}")]
    PartialFailure(String),

    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl CairnError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CairnError::SourceUnavailable(_) => ErrorKind::SourceUnavailable,
            CairnError::TargetUnavailable(_) => ErrorKind::TargetUnavailable,
            CairnError::ArchiveCorrupt(_) => ErrorKind::ArchiveCorrupt,
            CairnError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            CairnError::ResourceBusy(_) => ErrorKind::ResourceBusy,
            CairnError::PartialFailure(_) => ErrorKind::PartialFailure,
            CairnError::Interrupted(_) => ErrorKind::Interrupted,
            CairnError::Config(_) | CairnError::InvalidFilter(_) => ErrorKind::Usage,
            CairnError::Storage(_)
            | CairnError::Protocol(_)
            | CairnError::Serialization(_)
            | CairnError::Io(_)
            | CairnError::InvalidState(_)
            | CairnError::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }
}

impl From<serde_json::Error> for CairnError {
    fn from(err: serde_json::Error) -> Self {
        CairnError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CairnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let kinds = [
            ErrorKind::Internal,
            ErrorKind::Usage,
            ErrorKind::ArchiveCorrupt,
            ErrorKind::TargetUnavailable,
            ErrorKind::ValidationFailed,
            ErrorKind::ResourceBusy,
            ErrorKind::PartialFailure,
            ErrorKind::SourceUnavailable,
            ErrorKind::Interrupted,
        ];
        let codes: std::collections::HashSet<u8> = kinds.iter().map(|k| k.exit_code()).collect();
        assert_eq!(codes.len(), kinds.len());
        assert!(!codes.contains(&0));
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            CairnError::ArchiveCorrupt("missing marker".into()).exit_code(),
            3
        );
        assert_eq!(CairnError::InvalidFilter("bad".into()).kind(), ErrorKind::Usage);
        let io = CairnError::from(io::Error::other("disk"));
        assert_eq!(io.kind(), ErrorKind::Internal);
    }
}
