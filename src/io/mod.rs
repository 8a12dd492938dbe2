//! Input/output helpers.
//!
//! - DOE table ingest + case selection (`doe`)
//! - tracer reports and curve CSV read/write (`curve`)
//! - batch result export (`export`)

pub mod curve;
pub mod doe;
pub mod export;

pub use curve::*;
pub use doe::*;
pub use export::*;
