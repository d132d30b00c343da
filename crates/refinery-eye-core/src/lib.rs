//! # Refinery Eye Core
//!
//! Shared, I/O-free logic for Refinery Eye: inspection data models, the
//! error taxonomy, blob/report store abstractions, normalization of model
//! output, and the client-side inspection flow state machine.
//!
//! This crate contains no tokio runtime, sqlx, HTTP, or filesystem code.
//! Backends that touch the outside world live in the `refinery-eye` crate.

pub mod error;
pub mod flow;
pub mod models;
pub mod normalize;
pub mod store;

pub use error::{InspectError, Result};
