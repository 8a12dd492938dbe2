//! Mathematical utilities: special functions and linear least squares.

pub mod ols;
pub mod special;

pub use ols::*;
pub use special::*;
