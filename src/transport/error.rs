//! Transport errors.

use std::error::Error as StdError;
use std::time::Duration;

use thiserror::Error;

/// A failure to obtain a response from an upstream.
///
/// A received response is never an error here. Whether a failure is retried
/// depends on the request body, not on the variant.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The pooled client failed (dial, handshake, or protocol error).
    #[error("{message}")]
    Request {
        message: String,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    /// No response headers within the per-attempt deadline.
    #[error("upstream did not respond within {0:?}")]
    Timeout(Duration),

    /// A connection-level failure reported outside the pooled client.
    #[error("upstream connection failed: {0}")]
    Connect(#[from] std::io::Error),

    /// An earlier attempt still holds or has read the request body.
    #[error("request body is no longer available")]
    BodyConsumed,
}

impl TransportError {
    /// Short label for logs and the attempt counter.
    pub fn outcome(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "timeout",
            _ => "error",
        }
    }
}

impl From<hyper_util::client::legacy::Error> for TransportError {
    fn from(source: hyper_util::client::legacy::Error) -> Self {
        TransportError::Request {
            message: report(&source),
            source,
        }
    }
}

/// Render an error and its sources as one line: `outer: inner: root`.
///
/// Sources whose text is already present are skipped, since many error types
/// repeat their source in their own message.
pub fn report(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("outer failure")]
    struct Outer(#[source] std::io::Error);

    #[derive(Debug, Error)]
    #[error("wrapped: {0}")]
    struct Repeats(#[source] std::io::Error);

    #[test]
    fn report_walks_the_source_chain() {
        let err = Outer(std::io::Error::other("connection refused"));
        assert_eq!(report(&err), "outer failure: connection refused");
    }

    #[test]
    fn report_skips_repeated_sources() {
        let err = Repeats(std::io::Error::other("reset by peer"));
        assert_eq!(report(&err), "wrapped: reset by peer");
    }

    #[test]
    fn timeout_message_names_the_deadline() {
        let err = TransportError::Timeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "upstream did not respond within 10s");
        assert_eq!(err.outcome(), "timeout");
        assert_eq!(TransportError::BodyConsumed.outcome(), "error");
    }
}
