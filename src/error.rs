use thiserror::Error;

/// Configuration-time failures. Per-pixel domain failures never surface here:
/// they are policy (leave the coordinate unchanged / mark invalid), not an
/// error channel -- see the crate root docs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    #[error("conflicting model tags within a calibration set for {family}")]
    ConflictingModelTags { family: &'static str },

    #[error("image dimensions must be at least 2x2, got {width}x{height}")]
    ImageTooSmall { width: u32, height: u32 },

    #[error("perspective correction requires 4-8 control points, got {count}")]
    InvalidControlPointCount { count: usize },

    #[error("reverse perspective correction is not implemented")]
    UnsupportedReverse,

    #[error("SVD did not converge after {iterations} iterations")]
    SvdNonConvergence { iterations: usize },

    #[error("invalid calibration sample: {reason}")]
    InvalidSample { reason: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
