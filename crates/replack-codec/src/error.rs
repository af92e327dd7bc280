use thiserror::Error;

/// Errors returned by result-code codec operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// CBOR deserialization failure.
    #[error("decode error: {0}")]
    Decode(String),
    /// CBOR serialization failure.
    #[error("encode error: {0}")]
    Encode(String),
    /// Read position past the end of the buffer.
    #[error("offset {offset} out of bounds for buffer of {len} bytes")]
    OutOfBounds { offset: usize, len: usize },
}

#[cfg(test)]
mod tests {
    use super::CodecError;

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(
            CodecError::Decode("eof".into()).to_string(),
            "decode error: eof"
        );
        assert_eq!(
            CodecError::OutOfBounds { offset: 9, len: 4 }.to_string(),
            "offset 9 out of bounds for buffer of 4 bytes"
        );
    }
}
