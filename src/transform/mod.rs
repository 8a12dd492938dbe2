//! Curve transforms between concentration, E(t) and E(theta) space.
//!
//! All transforms are pure: they validate the input kind and return a new
//! curve, never touching the source.

pub mod curves;

pub use curves::*;
