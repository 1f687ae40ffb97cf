use std::io::Error as IoError;

use crate::{ResourceCategory, Tag};

pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Everything that can go wrong while locating, parsing or loading resources.
///
/// Only [CacheError::NotFound] is meant to be recovered from: the caller can ask for different media and retry. The
/// other variants mean the directory and the containers disagree, and the load attempt cannot continue.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("no container for room {room} (tried {candidates:?})")]
    NotFound { room: usize, candidates: Vec<String> },

    #[error("i/o error: {0}")]
    Io(#[from] IoError),

    #[error("malformed container at offset {offset}: {reason}")]
    MalformedContainer { offset: u64, reason: String },

    #[error("{category} {id} not in room {room} at offset {offset}: expected {expected}, found {found}")]
    CorruptIndex {
        category: ResourceCategory,
        id: usize,
        room: usize,
        offset: u64,
        expected: Tag,
        found: Tag,
    },

    #[error("bad block {0} found in directory")]
    UnknownDirectoryBlock(Tag),

    #[error("invalid number of {category}s in directory: expected {expected}, found {found}")]
    DirectoryMismatch {
        category: ResourceCategory,
        expected: usize,
        found: usize,
    },

    #[error("{0} was declared twice")]
    DuplicateDeclaration(ResourceCategory),

    #[error("room {room} not in {container}")]
    RoomNotInContainer { room: usize, container: String },
}

impl CacheError {
    pub(crate) fn malformed(offset: u64, reason: impl Into<String>) -> CacheError {
        CacheError::MalformedContainer {
            offset,
            reason: reason.into(),
        }
    }

    /// Whether the caller may retry after this error, e.g. once other media has been inserted.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CacheError::NotFound { .. })
    }
}
