//! Bridge error taxonomy.

use thiserror::Error;

/// Errors raised while moving messages between the front-end and the debuggee.
///
/// Classified as transport-level (recovered locally, the connection stays up)
/// or connection-level (the debuggee connection is torn down).
#[derive(Debug, Error)]
pub enum BridgeError {
    // Transport-level
    /// Malformed or inconsistent `Content-Length` header.
    #[error("framing error: {0}")]
    Framing(String),
    /// A debuggee message carried an unknown `type`.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// A front-end method with no debuggee translation.
    #[error("unmapped command: {0}")]
    UnmappedCommand(String),
    /// A debuggee event with no front-end translation.
    #[error("unmapped event: {0}")]
    UnmappedEvent(String),
    /// Parameters missing or of the wrong shape for a method.
    #[error("invalid params for {method}: {reason}")]
    InvalidParams {
        /// Method that was called.
        method: String,
        /// What was wrong.
        reason: String,
    },
    /// Message text was not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    // Connection-level
    /// TCP connect failure or child-process spawn failure.
    #[error("connection error: {0}")]
    Connection(String),
    /// Socket read/write failure on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Operational
    /// The operation cannot be performed in the current mode.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl BridgeError {
    /// Errors that are recovered locally and never close a connection.
    pub fn is_transport_level(&self) -> bool {
        matches!(
            self,
            Self::Framing(_)
                | Self::Protocol(_)
                | Self::UnmappedCommand(_)
                | Self::UnmappedEvent(_)
                | Self::InvalidParams { .. }
                | Self::Json(_)
        )
    }

    /// Errors that tear down the debuggee connection.
    pub fn tears_down_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Io(_))
    }

    /// Short classification string for logging and front-end error payloads.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Framing(_) => "framing_error",
            Self::Protocol(_) => "protocol_error",
            Self::UnmappedCommand(_) => "unmapped_command",
            Self::UnmappedEvent(_) => "unmapped_event",
            Self::InvalidParams { .. } => "invalid_params",
            Self::Json(_) => "invalid_json",
            Self::Connection(_) => "connection_error",
            Self::Io(_) => "io_error",
            Self::UnsupportedOperation(_) => "unsupported_operation",
        }
    }

    /// Shorthand for [`BridgeError::InvalidParams`].
    pub fn invalid_params(method: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParams {
            method: method.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_level_classification() {
        assert!(BridgeError::Framing("bad".into()).is_transport_level());
        assert!(BridgeError::Protocol("type".into()).is_transport_level());
        assert!(BridgeError::UnmappedCommand("Foo.bar".into()).is_transport_level());
        assert!(BridgeError::UnmappedEvent("afterCompile".into()).is_transport_level());
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        assert!(BridgeError::Json(json_err).is_transport_level());
    }

    #[test]
    fn connection_level_classification() {
        assert!(BridgeError::Connection("refused".into()).tears_down_connection());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert!(BridgeError::Io(io).tears_down_connection());
        assert!(!BridgeError::Framing("x".into()).tears_down_connection());
    }

    #[test]
    fn unsupported_is_neither() {
        let err = BridgeError::UnsupportedOperation("restart".into());
        assert!(!err.is_transport_level());
        assert!(!err.tears_down_connection());
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(BridgeError::Connection("x".into()).error_kind(), "connection_error");
        assert_eq!(
            BridgeError::UnsupportedOperation("x".into()).error_kind(),
            "unsupported_operation"
        );
        assert_eq!(
            BridgeError::invalid_params("Bridge.setScriptPath", "missing path").error_kind(),
            "invalid_params"
        );
    }

    #[test]
    fn display_includes_detail() {
        let err = BridgeError::invalid_params("Bridge.setScriptPath", "missing path");
        assert_eq!(
            err.to_string(),
            "invalid params for Bridge.setScriptPath: missing path"
        );
        assert_eq!(
            BridgeError::UnmappedCommand("Foo.bar".into()).to_string(),
            "unmapped command: Foo.bar"
        );
    }
}
