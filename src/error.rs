//! Road graph extraction error type.

use crate::extract::Strategy;
use thiserror::Error;

/// Why an extraction strategy produced no usable graph.
/// These are never fatal: extraction falls through to the next strategy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractError {
    #[error("{0} found no candidate geometry")]
    NoCandidates(Strategy),

    #[error("{strategy} produced {segments} segments, at least {required} are required")]
    TooFewSegments {
        strategy: Strategy,
        segments: usize,
        required: usize,
    },
}

pub type ExtractResult<T> = Result<T, ExtractError>;
