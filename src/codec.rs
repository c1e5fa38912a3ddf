//! Payload codec: text encoding of command payloads and stored values.
//!
//! The store never inspects payloads itself. Typed values are converted to
//! and from a `serde_json::Value` with serde, and a [`PayloadCodec`] turns
//! that value into the single-line text stored after the tab in each log
//! entry.

use serde::Serialize;
#[cfg(test)]
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CodecError;

/// Encodes payload values to log text and decodes them back.
///
/// Implementations must produce single-line output: text containing a raw
/// tab, newline, or carriage return is rejected with
/// [`CodecError::Delimiter`] before it reaches the log.
pub trait PayloadCodec: Send + Sync + 'static {
    /// Encode a value into its log text form.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the value cannot be represented.
    fn encode(&self, value: &Value) -> Result<String, CodecError>;

    /// Decode log text back into a value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the text is not a valid encoding.
    fn decode(&self, text: &str) -> Result<Value, CodecError>;
}

/// Compact JSON codec, the default.
///
/// `serde_json` escapes control characters inside strings, so the compact
/// form never contains a raw tab or line break.
///
/// # Examples
///
/// ```
/// use eventfold_kv::{JsonCodec, PayloadCodec};
/// use serde_json::json;
///
/// let codec = JsonCodec;
/// let text = codec.encode(&json!({"note": "a\tb"})).unwrap();
/// assert_eq!(text, r#"{"note":"a\tb"}"#);
/// assert_eq!(codec.decode(&text).unwrap(), json!({"note": "a\tb"}));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PayloadCodec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<String, CodecError> {
        Ok(serde_json::to_string(value)?)
    }

    fn decode(&self, text: &str) -> Result<Value, CodecError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Encode a typed payload through `codec`, enforcing the single-line rule.
pub(crate) fn encode_payload<T: Serialize + ?Sized>(
    codec: &dyn PayloadCodec,
    payload: &T,
) -> Result<String, CodecError> {
    let value = serde_json::to_value(payload)?;
    encode_value(codec, &value)
}

/// Encode an already-converted value, enforcing the single-line rule.
pub(crate) fn encode_value(codec: &dyn PayloadCodec, value: &Value) -> Result<String, CodecError> {
    let text = codec.encode(value)?;
    if text.contains(['\t', '\n', '\r']) {
        return Err(CodecError::Delimiter);
    }
    Ok(text)
}

/// Decode log text into a typed value through `codec`.
#[cfg(test)]
pub(crate) fn decode_payload<T: DeserializeOwned>(
    codec: &dyn PayloadCodec,
    text: &str,
) -> Result<T, CodecError> {
    let value = codec.decode(text)?;
    Ok(serde_json::from_value(value)?)
}
