//! Telemetry error types.

use thiserror::Error;

/// Errors raised while installing telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The logging subscriber could not be built or installed.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),

    /// The metrics recorder could not be built or installed.
    #[error("failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// The subsystem was already installed by an earlier call.
    #[error("{0} already initialized")]
    AlreadyInitialized(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            TelemetryError::LoggingInit("bad directive".into()).to_string(),
            "failed to initialize logging: bad directive"
        );
        assert_eq!(
            TelemetryError::AlreadyInitialized("logging").to_string(),
            "logging already initialized"
        );
    }
}
