//! `rtd-fit` library crate.
//!
//! The binary (`rtd`) is a thin wrapper around this library so that:
//!
//! - the response functions, transforms and fitters are testable without spawning processes
//! - the batch driver can be reused from other front-ends
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod transform;
