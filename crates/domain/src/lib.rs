//! Shared domain types for the ensemble orchestration core: the error
//! taxonomy, the provider-neutral wire model, configuration, and small
//! primitives (ring buffer, boxed streams, memory façade) used by every
//! other crate.

pub mod config;
pub mod error;
pub mod memory;
pub mod ring;
pub mod stream;
pub mod wire;

pub use error::{Error, Result};
