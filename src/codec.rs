//! Body encoding and decoding.
//!
//! A [`Codec`] pairs a content type with a way to turn values into bytes and
//! back. Payloads are logged at debug and raw bytes at trace, so a dump of
//! the wire format is one log level away.

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("decode: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("body I/O: {0}")]
    Io(#[from] io::Error),
}

/// Encodes values to, and decodes values from, a byte stream.
pub trait Codec: Send + Sync + 'static {
    /// Value for the `Content-Type` header of encoded bodies.
    fn content_type(&self) -> &'static str;

    fn encode<T: Serialize + ?Sized>(&self, writer: &mut dyn Write, value: &T) -> Result<(), CodecError>;

    fn decode<T: DeserializeOwned>(&self, reader: &mut dyn Read) -> Result<T, CodecError>;
}

/// `application/json` via serde_json.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode<T: Serialize + ?Sized>(&self, writer: &mut dyn Write, value: &T) -> Result<(), CodecError> {
        let bytes = serde_json::to_vec(value).map_err(CodecError::Encode)?;

        tracing::debug!(output = %String::from_utf8_lossy(&bytes), "Encoder output");
        tracing::trace!(output = ?HexDump(&bytes), len = bytes.len(), "Encoder output");

        writer.write_all(&bytes)?;
        Ok(())
    }

    fn decode<T: DeserializeOwned>(&self, reader: &mut dyn Read) -> Result<T, CodecError> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;

        tracing::trace!(input = ?HexDump(&bytes), len = bytes.len(), "Decoder input");
        tracing::debug!(input = %String::from_utf8_lossy(&bytes), "Decoder input");

        serde_json::from_slice(&bytes).map_err(CodecError::Decode)
    }
}

/// Space separated hex bytes.
struct HexDump<'a>(&'a [u8]);

impl std::fmt::Debug for HexDump<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
