//! Versioned byte encoding for cache keys and values.
//!
//! Every encoded buffer starts with a one-byte format version followed by a
//! bincode payload of a wire struct. The wire structs are separate from the
//! in-memory types, so either can change without silently reinterpreting old
//! bytes: an unknown version, trailing garbage or an unknown result name is a
//! [`CodecError`], never a default value.

use crate::error::CodecError;
use crate::status::{ReplicationResult, StatusKey, StatusValue};
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Format version written by this build.
pub const FORMAT_VERSION: u8 = 1;

/// Serializer contract used by the persistence layer.
pub trait CacheSerializer<T> {
    /// Encode `value`.
    fn serialize(&self, value: &T) -> Result<Vec<u8>, CodecError>;
    /// Decode bytes produced by [`CacheSerializer::serialize`].
    fn deserialize(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

#[derive(Serialize, Deserialize)]
struct WireKeyV1 {
    project: String,
    destination: String,
    ref_name: String,
}

#[derive(Serialize, Deserialize)]
struct WireValueV1 {
    status: String,
    when: i64,
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

fn encode<W: Serialize>(wire: &W) -> Result<Vec<u8>, CodecError> {
    let mut out = vec![FORMAT_VERSION];
    options()
        .serialize_into(&mut out, wire)
        .map_err(CodecError::Encode)?;
    Ok(out)
}

fn decode<'a, W: Deserialize<'a>>(bytes: &'a [u8]) -> Result<W, CodecError> {
    let (&version, payload) = bytes.split_first().ok_or(CodecError::Empty)?;
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion {
            expected: FORMAT_VERSION,
            got: version,
        });
    }
    Ok(options().deserialize(payload)?)
}

/// Serializer for [`StatusKey`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusKeySerializer;

impl CacheSerializer<StatusKey> for StatusKeySerializer {
    fn serialize(&self, key: &StatusKey) -> Result<Vec<u8>, CodecError> {
        encode(&WireKeyV1 {
            project: key.project().to_string(),
            destination: key.destination().to_string(),
            ref_name: key.ref_name().to_string(),
        })
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<StatusKey, CodecError> {
        let wire: WireKeyV1 = decode(bytes)?;
        Ok(StatusKey::new(wire.project, wire.destination, wire.ref_name))
    }
}

/// Serializer for [`StatusValue`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusValueSerializer;

impl CacheSerializer<StatusValue> for StatusValueSerializer {
    fn serialize(&self, value: &StatusValue) -> Result<Vec<u8>, CodecError> {
        encode(&WireValueV1 {
            status: value.status.name().to_string(),
            when: value.when,
        })
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<StatusValue, CodecError> {
        let wire: WireValueV1 = decode(bytes)?;
        let status = ReplicationResult::from_name(&wire.status)
            .ok_or(CodecError::UnknownResult(wire.status))?;
        Ok(StatusValue::new(status, wire.when))
    }
}
