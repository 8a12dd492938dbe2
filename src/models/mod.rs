//! Reactor response functions and the fit-able model wrapper.
//!
//! Responses are small pure functions so the fitting code can stay generic;
//! `Model` binds one topology to a system's constants and its fit state.

pub mod model;
pub mod response;

pub use model::*;
pub use response::*;
