//! Proxima Core Module
//!
//! This module contains the building blocks shared across the Proxima
//! workspace, including:
//! - The status taxonomy every public operation reports through
//! - The background task executor used during index construction

pub mod error;
pub mod executor;

pub use error::{Error, StatusCode};
pub use executor::{Executor, TaskHandle};

pub type Result<T> = std::result::Result<T, Error>;

/// Unique identifier for a vector, supplied by the caller or assigned
/// monotonically by the index.
pub type VectorId = i64;
