//! Lens optical correction pipeline: distortion, transverse chromatic
//! aberration, vignetting, projection change and perspective correction.
//!
//! This crate implements the *modifier* half of a lens-correction library:
//! given calibration data for a lens (focal/aperture-indexed coefficient
//! tables, normally loaded from an external database) and the geometry of
//! one image, it builds ordered callback chains that map pixel coordinates
//! and pixel values between the distorted and corrected domains. It does
//! not decode images, perform colour management, or resample pixels — the
//! caller supplies coordinates and pixel buffers and drives the
//! interpolation/resampling kernel of their choice.

pub mod autoscale;
pub mod calibration;
pub mod callback;
pub mod component_layout;
pub mod error;
pub mod interpolate;
pub mod model;
pub mod modifier;
pub mod newton;
pub mod perspective;
pub mod pixel;
pub mod svd;

pub use calibration::Lens;
pub use error::{Error, Result};
pub use modifier::Modifier;
pub use pixel::{PixelFormat, Sample};
