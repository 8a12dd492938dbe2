//! Parameter estimation.
//!
//! Responsibilities:
//!
//! - bounded Levenberg–Marquardt least squares (`least_squares`)
//! - seeded differential evolution over the bound box (`global`)
//! - optional L-BFGS refinement of the global candidate (`polish`)
//! - the shared penalised objective and strategy dispatch (`engine`)

pub mod engine;
pub mod global;
pub mod least_squares;
pub mod polish;

pub use engine::*;
pub use global::*;
pub use least_squares::*;
pub use polish::*;
