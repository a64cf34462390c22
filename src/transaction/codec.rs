//! Decoding of coordinator payloads.
//!
//! The engine does not own the AMQP type codec. A coordinator only needs the
//! `amqp-value` body of each control message, so decoding is delegated to a
//! [`ValueDecoder`]. [`BincodeValueCodec`] is the stand-in used by default and
//! by the tests.

use bincode::{
    config,
    error::{DecodeError, EncodeError},
};
use bytes::Bytes;
use thiserror::Error;

use crate::performative::AmqpValue;

/// Failure to translate a coordinator payload.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("failed to decode amqp-value: {0}")]
    Decode(#[from] DecodeError),
    #[error("failed to encode amqp-value: {0}")]
    Encode(#[from] EncodeError),
    /// Bytes were left over after the value.
    #[error("{0} trailing bytes after amqp-value")]
    TrailingBytes(usize),
}

/// Turns a complete coordinator payload into its `amqp-value` body.
pub trait ValueDecoder {
    /// # Errors
    ///
    /// Returns [`CodecError`] when `payload` does not hold exactly one value.
    fn decode(&self, payload: &[u8]) -> Result<AmqpValue, CodecError>;
}

/// `bincode` encoding of [`AmqpValue`] with the standard configuration.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeValueCodec;

impl BincodeValueCodec {
    /// Encode `value` as a coordinator payload.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if `bincode` rejects the value.
    pub fn encode(&self, value: &AmqpValue) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(bincode::encode_to_vec(value, config::standard())?))
    }
}

impl ValueDecoder for BincodeValueCodec {
    fn decode(&self, payload: &[u8]) -> Result<AmqpValue, CodecError> {
        let (value, consumed) = bincode::decode_from_slice(payload, config::standard())?;
        match payload.len() - consumed {
            0 => Ok(value),
            trailing => Err(CodecError::TrailingBytes(trailing)),
        }
    }
}
