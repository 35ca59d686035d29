use thiserror::Error;

use crate::store::LineCol;

/// Errors raised by the replicated text structure.
///
/// Local editor events surface these to the caller; remote input that
/// produces one is dropped with a diagnostic and never applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CrdtError {
    #[error("Position {line}:{ch} is outside the document")]
    PositionOutOfBounds { line: usize, ch: usize },
    #[error("Invalid range {start:?}..{end:?}")]
    InvalidRange { start: LineCol, end: LineCol },
    #[error("Malformed character: {0}")]
    MalformedChar(String),
    #[error("Malformed operation: {0}")]
    MalformedOperation(String),
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),
}

impl CrdtError {
    pub(crate) fn out_of_bounds(at: LineCol) -> Self {
        Self::PositionOutOfBounds {
            line: at.line,
            ch: at.ch,
        }
    }
}
