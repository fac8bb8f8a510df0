//! Error types for the instrumentation layer
//!
//! Only setup-time failures are surfaced as errors. Anything that goes wrong
//! on the request path (malformed labels, double completions, clock
//! anomalies) is absorbed with a `tracing::warn!` instead, so the
//! instrumentation can never break the service it observes.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while wiring metrics into a host application
#[derive(Error, Debug)]
pub enum Error {
    /// No adapter descriptor matched the application's capabilities
    #[error("unsupported application '{0}': no adapter matched its capabilities")]
    UnsupportedApplication(String),

    /// The application handle was already instrumented once
    #[error("application '{0}' is already instrumented")]
    AlreadyInstrumented(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Metric registration failed
    #[error("metric registration failed: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_application_display() {
        let err = Error::UnsupportedApplication("my-app".to_string());
        assert_eq!(
            err.to_string(),
            "unsupported application 'my-app': no adapter matched its capabilities"
        );
    }

    #[test]
    fn test_already_instrumented_display() {
        let err = Error::AlreadyInstrumented("my-app".to_string());
        assert_eq!(err.to_string(), "application 'my-app' is already instrumented");
    }

    #[test]
    fn test_config_display() {
        let err = Error::Config("path must start with '/'".to_string());
        assert_eq!(err.to_string(), "configuration error: path must start with '/'");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "address in use");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
