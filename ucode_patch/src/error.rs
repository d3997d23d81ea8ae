use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FormatError>;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("patch truncated reading {what} at offset {offset:#x}: need {needed} bytes, {available} available")]
    Truncated {
        what: &'static str,
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("{trailing} bytes at offset {offset:#x} do not form a whole quad group")]
    PartialQuad { offset: usize, trailing: usize },

    #[error(
        "patch size mismatch: {match_count} match entries and {quad_count} quads need {expected} bytes, found {found}"
    )]
    SizeMismatch {
        match_count: usize,
        quad_count: usize,
        expected: usize,
        found: usize,
    },
}
