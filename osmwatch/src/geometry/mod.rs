//! Planar geometry helpers for way-shape analysis.
//!
//! Distances operate on raw (lat, lon) degree deltas. At the scale of a
//! single edit this is a cheap planar proxy for real-world distance; it is
//! not geodesically correct and is not meant to be.

use thiserror::Error;

/// Margin around ±1.0 inside which a law-of-cosines cosine is snapped to the
/// boundary before `acos`. Near-degenerate triangles overshoot the domain by
/// floating-point error; this tolerance is part of the detection calibration
/// and must not be widened.
pub const COSINE_CLAMP_TOLERANCE: f64 = 1e-5;

/// Error type for angle computation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    /// A side adjacent to the requested angle has zero length. Callers are
    /// expected to screen for coincident points before asking for an angle.
    #[error("degenerate triangle: adjacent sides a={a}, b={b} must be non-zero")]
    DegenerateTriangle { a: f64, b: f64 },
}

/// Planar distance between two (lat, lon) points in raw degree units.
#[inline]
pub fn distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let dlat = (a.0 - b.0).abs();
    let dlon = (a.1 - b.1).abs();
    dlat.hypot(dlon)
}

/// Interior angle in degrees opposite side `c`, for a triangle with side
/// lengths `a`, `b`, `c`, via the law of cosines.
///
/// The cosine argument is snapped to ±1.0 when it lands within
/// [`COSINE_CLAMP_TOLERANCE`] of the boundary, so collinear and folded-back
/// vertex chains resolve to exactly 180° or 0° instead of a NaN.
///
/// # Errors
///
/// Returns [`GeometryError::DegenerateTriangle`] if `a` or `b` is zero.
pub fn interior_angle(a: f64, b: f64, c: f64) -> Result<f64, GeometryError> {
    if a == 0.0 || b == 0.0 {
        return Err(GeometryError::DegenerateTriangle { a, b });
    }

    let mut d = (a * a + b * b - c * c) / (2.0 * a * b);
    if 1.0 - d < COSINE_CLAMP_TOLERANCE {
        d = 1.0;
    } else if 1.0 + d < COSINE_CLAMP_TOLERANCE {
        d = -1.0;
    }

    Ok(d.acos().to_degrees())
}
