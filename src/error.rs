use thiserror::Error;

/// Errors produced by the connection manager and the bus.
#[derive(Error, Debug)]
pub enum BusError {
    /// The bus was used after its connection was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The broker could not be reached or the protocol handshake failed.
    #[error("broker unreachable: {0}")]
    Unreachable(String),

    /// The broker rejected the supplied credentials.
    #[error("broker authentication failed: {0}")]
    AuthFailed(String),

    /// Any broker protocol failure after the connection was established.
    #[error("unexpected: {context}: {source}")]
    Unexpected {
        context: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A subscription handler failed while processing a message.
    #[error("event handler: {0}")]
    Handler(#[source] anyhow::Error),
}

pub type BusResult<T> = std::result::Result<T, BusError>;

impl BusError {
    pub fn unexpected<E>(context: &'static str, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        BusError::Unexpected {
            context,
            source: source.into(),
        }
    }

    /// Returns true for errors that mean the connection is gone.
    pub fn is_connection_closed(&self) -> bool {
        matches!(self, BusError::ConnectionClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unexpected_carries_context_and_source() {
        let err = BusError::unexpected("exchange declare", "channel error 404");
        assert_eq!(
            err.to_string(),
            "unexpected: exchange declare: channel error 404"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn handler_error_keeps_original_message() {
        let err = BusError::Handler(anyhow::anyhow!("bad payload"));
        assert_eq!(err.to_string(), "event handler: bad payload");
        assert!(!err.is_connection_closed());
    }
}
