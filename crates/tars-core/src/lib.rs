//! # tars-core
//!
//! Foundation pieces shared by every TARS crate:
//!
//! - [`ids`]: branded session identifiers
//! - [`logging`]: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;

pub use ids::SessionKey;
