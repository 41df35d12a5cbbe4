//! Per-defect optical models (distortion, TCA, vignetting) and projection
//! geometry. Each module is a closed enum over the model's variants plus
//! the forward/inverse evaluation for that variant.

pub mod distortion;
pub mod projection;
pub mod tca;
pub mod vignetting;
