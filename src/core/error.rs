//! Agent error taxonomy.
//!
//! Only configuration and initial connection failures are fatal for an agent.
//! A publish failure costs a single tick and nothing more.

/// Typed agent error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed credential or a missing required field. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The broker session could not be established.
    #[error("connection error: {0}")]
    Connection(String),

    /// A single send attempt has failed.
    #[error("publish error: {0}")]
    Publish(String),
}

impl Error {
    pub fn configuration<M: Into<String>>(message: M) -> Self {
        Self::Configuration(message.into())
    }

    pub fn connection<M: Into<String>>(message: M) -> Self {
        Self::Connection(message.into())
    }

    pub fn publish<M: Into<String>>(message: M) -> Self {
        Self::Publish(message.into())
    }

    /// The cause without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::Configuration(message) | Self::Connection(message) | Self::Publish(message) => message,
        }
    }

    /// Tells whether the failed operation may succeed if repeated later.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Configuration(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_is_not_transient() {
        assert!(!Error::configuration("missing HostName").is_transient());
        assert!(Error::connection("connection refused").is_transient());
        assert!(Error::publish("timed out").is_transient());
    }

    #[test]
    fn display_names_the_kind() {
        assert_eq!(
            Error::connection("connection refused").to_string(),
            "connection error: connection refused"
        );
    }
}
