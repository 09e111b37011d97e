use crate::ids::SessionId;

/// Errors surfaced by a transport to its immediate caller.
/// Classified as malformed input, routing failure, or stream-level failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    // Malformed input
    #[error("decode envelope: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("encode envelope: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    // Routing
    #[error("metadata is nil")]
    MetadataMissing,
    #[error("session id is empty")]
    SessionIdEmpty,
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("session {0} delivery queue is full")]
    SessionBacklogged(SessionId),

    // Stream
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    /// Failures of `send` to find a live destination. Never retried by the transport.
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            Self::MetadataMissing
                | Self::SessionIdEmpty
                | Self::SessionNotFound(_)
                | Self::SessionBacklogged(_)
        )
    }

    /// Bad bytes from a peer. The stream itself is still usable.
    pub fn is_malformed_input(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::LineTooLong { .. })
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Encode(_) => "encode",
            Self::LineTooLong { .. } => "line_too_long",
            Self::MetadataMissing => "metadata_missing",
            Self::SessionIdEmpty => "session_id_empty",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionBacklogged(_) => "session_backlogged",
            Self::Io(_) => "io",
            Self::Closed => "closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_error() -> TransportError {
        TransportError::Decode(serde_json::from_str::<serde_json::Value>("{").unwrap_err())
    }

    #[test]
    fn routing_classification() {
        assert!(TransportError::MetadataMissing.is_routing());
        assert!(TransportError::SessionIdEmpty.is_routing());
        assert!(TransportError::SessionNotFound(SessionId::from_raw("x")).is_routing());
        assert!(TransportError::SessionBacklogged(SessionId::from_raw("x")).is_routing());
        assert!(!TransportError::Closed.is_routing());
        assert!(!decode_error().is_routing());
    }

    #[test]
    fn malformed_input_classification() {
        assert!(decode_error().is_malformed_input());
        assert!(TransportError::LineTooLong { limit: 8 }.is_malformed_input());
        assert!(!TransportError::SessionIdEmpty.is_malformed_input());
    }

    #[test]
    fn routing_messages_match_wire_wording() {
        assert_eq!(TransportError::MetadataMissing.to_string(), "metadata is nil");
        assert_eq!(TransportError::SessionIdEmpty.to_string(), "session id is empty");
        assert!(TransportError::SessionNotFound(SessionId::from_raw("S"))
            .to_string()
            .starts_with("session not found"));
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(TransportError::Closed.error_kind(), "closed");
        assert_eq!(
            TransportError::SessionNotFound(SessionId::from_raw("S")).error_kind(),
            "session_not_found"
        );
        assert_eq!(TransportError::LineTooLong { limit: 1 }.error_kind(), "line_too_long");
    }
}
