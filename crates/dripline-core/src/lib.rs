//! # Dripline Core
//!
//! Shared vocabulary for the marketing engine: the persisted data model,
//! the collaborator traits (store and delivery gateways), configuration and
//! the error type every crate returns.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::DriplineConfig;
pub use error::{DriplineError, Result};
