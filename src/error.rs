//! Error types for the tracking library

use thiserror::Error;

/// Result type alias for the tracking library
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Errors that can occur while configuring or running a tracker
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackerError {
    #[error("Invalid value {value:?} for parameter `{key}`: {reason}")]
    Config {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Unknown tracker type: {0}")]
    UnknownTracker(String),

    #[error("Innovation covariance is singular, Kalman update aborted")]
    SingularInnovation,

    #[error("Assignment failed: {0}")]
    Assignment(String),
}

impl TrackerError {
    pub fn config<K, V, R>(key: K, value: V, reason: R) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        R: Into<String>,
    {
        Self::Config {
            key: key.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn assignment<S: Into<String>>(msg: S) -> Self {
        Self::Assignment(msg.into())
    }
}
