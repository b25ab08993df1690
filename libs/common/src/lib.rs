//! Shared types, config, errors, and pipeline traits for transient-alert.

pub mod bandpass;
pub mod config;
pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use config::AlertConfig;
pub use error::{body_excerpt, Error};
pub use traits::{CandidateSource, NotificationSink, ParameterEstimator};
pub use types::*;

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, Error>;
