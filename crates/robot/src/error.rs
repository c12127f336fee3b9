use std::error::Error as StdError;

/// Crate-wide result type for robot operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed source error carried by the dispatch variants.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Typed errors raised while registering or dispatching.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A listener or robot was assembled from incomplete or invalid parts.
    #[error("invalid configuration: {message}")]
    Configuration { message: String },

    /// A listener pattern failed to compile.
    #[error("invalid listener pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A listener callback returned an error.
    #[error("listener {} failed: {source}", .listener_id.as_deref().unwrap_or("<anonymous>"))]
    ListenerCallback {
        listener_id: Option<String>,
        #[source]
        source: BoxError,
    },

    /// A middleware stage returned an error.
    #[error("{pipeline} middleware failed: {source}")]
    Middleware {
        pipeline: &'static str,
        #[source]
        source: BoxError,
    },

    /// A stage, matcher or callback panicked.
    #[error("{context} panicked: {message}")]
    Panicked { context: String, message: String },

    /// The adapter rejected an outbound call.
    #[error("adapter {method} failed: {source}")]
    Adapter {
        method: &'static str,
        #[source]
        source: BoxError,
    },
}

impl Error {
    #[must_use]
    pub fn configuration(message: impl std::fmt::Display) -> Self {
        Self::Configuration {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_pattern(pattern: impl Into<String>, source: regex::Error) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            source,
        }
    }

    #[must_use]
    pub fn listener_callback(listener_id: Option<String>, source: anyhow::Error) -> Self {
        Self::ListenerCallback {
            listener_id,
            source: source.into(),
        }
    }

    #[must_use]
    pub fn middleware(pipeline: &'static str, source: anyhow::Error) -> Self {
        Self::Middleware {
            pipeline,
            source: source.into(),
        }
    }

    #[must_use]
    pub fn adapter(method: &'static str, source: anyhow::Error) -> Self {
        Self::Adapter {
            method,
            source: source.into(),
        }
    }

    /// Build a [`Error::Panicked`] from a caught panic payload.
    #[must_use]
    pub fn panicked(
        context: impl Into<String>,
        payload: Box<dyn std::any::Any + Send + 'static>,
    ) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked {
            context: context.into(),
            message,
        }
    }

    /// True for errors that stop startup rather than a single dispatch.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. } | Self::InvalidPattern { .. })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_are_stringified() {
        let err = Error::panicked("listener callback", Box::new("boom"));
        assert_eq!(err.to_string(), "listener callback panicked: boom");

        let err = Error::panicked("stage", Box::new(String::from("owned")));
        assert_eq!(err.to_string(), "stage panicked: owned");

        let err = Error::panicked("stage", Box::new(7_u8));
        assert!(err.to_string().ends_with("non-string panic payload"));
    }

    #[test]
    fn anonymous_listener_is_named_in_message() {
        let err = Error::listener_callback(None, anyhow::anyhow!("nope"));
        assert_eq!(err.to_string(), "listener <anonymous> failed: nope");
        assert!(!err.is_configuration());
    }

    #[test]
    fn pattern_errors_count_as_configuration() {
        let source = regex::Regex::new("(").unwrap_err();
        assert!(Error::invalid_pattern("(", source).is_configuration());
        assert!(Error::configuration("missing callback").is_configuration());
    }
}
