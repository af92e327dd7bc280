use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Status code carried by a successful replica response.
pub const RESULT_SUCCESS: i32 = 0;

/// Status record a replica returns for one write request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCode {
    /// `RESULT_SUCCESS` or a replica-defined error code.
    pub code: i32,
    /// Optional human-readable detail.
    #[serde(default)]
    pub message: String,
}

impl ResultCode {
    pub fn success() -> Self {
        Self {
            code: RESULT_SUCCESS,
            message: String::new(),
        }
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == RESULT_SUCCESS
    }
}

/// Encodes `ResultCode` as CBOR.
pub fn encode_result_code(result: &ResultCode) -> Result<Vec<u8>, CodecError> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(result, &mut bytes)
        .map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// Decodes one `ResultCode` starting at `*pos`, advancing `*pos` past it.
///
/// On failure `*pos` is left untouched.
pub fn decode_result_code(buf: &[u8], pos: &mut usize) -> Result<ResultCode, CodecError> {
    let rest = buf.get(*pos..).ok_or(CodecError::OutOfBounds {
        offset: *pos,
        len: buf.len(),
    })?;
    let mut reader = rest;
    let result: ResultCode =
        ciborium::de::from_reader(&mut reader).map_err(|e| CodecError::Decode(e.to_string()))?;
    *pos += rest.len() - reader.len();
    Ok(result)
}
