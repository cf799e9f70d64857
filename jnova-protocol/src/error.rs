//! Protocol error types.

use thiserror::Error;

/// Errors that can occur while framing or encoding messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u32 },

    #[error("incomplete frame: need {needed} more bytes")]
    IncompleteFrame { needed: usize },

    #[error("payload contains the frame delimiter {delimiter:#04x} at offset {offset}")]
    DelimiterInPayload { delimiter: u8, offset: usize },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::FrameTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("50"));

        let err = ProtocolError::IncompleteFrame { needed: 10 };
        assert!(err.to_string().contains("10"));

        let err = ProtocolError::DelimiterInPayload {
            delimiter: b'\n',
            offset: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("0x0a"));
        assert!(msg.contains('3'));

        let err = ProtocolError::InvalidUtf8;
        assert!(err.to_string().contains("UTF-8"));

        let err = ProtocolError::MissingField("message");
        assert!(err.to_string().contains("message"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: ProtocolError = json_err.into();
        assert!(matches!(err, ProtocolError::Json(_)));
        assert!(err.to_string().starts_with("JSON error"));
    }
}
