// Copyright 2018-2026 the Zipline authors. MIT license.
//! The JSON wire codec: call envelopes, result envelopes, and the
//! per-parameter value serializers that produce/consume them.
//!
//! Field names are stable across versions (§6): a call envelope serializes
//! as `{"s":..,"f":..,"a":[..],"c":..}`, a normal result as `{"v":..}`, an
//! exception result as `{"e":..}`. Implementations must not rely on JSON
//! key ordering.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// An already-encoded JSON value. Opaque to the codec itself — only a
/// function's per-parameter [`Serializer`] knows how to produce or consume
/// the concrete type it wraps. This mirrors the spec's requirement that
/// argument lists be length-prefixed blobs the Endpoint can route without
/// decoding: here, "without decoding" means "without knowing the parameter
/// type," since `serde_json::Value` is already a fully parsed tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedValue(pub serde_json::Value);

impl EncodedValue {
  pub fn null() -> Self {
    EncodedValue(serde_json::Value::Null)
  }

  pub fn is_null(&self) -> bool {
    self.0.is_null()
  }
}

/// A serialized throwable crossing the host↔JS boundary. Class name,
/// message, stack, and cause chain are preserved verbatim per design note
/// "Exception serialization".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedThrowable {
  pub class_name: String,
  pub message: Option<String>,
  pub stack: String,
  pub cause: Option<Box<EncodedThrowable>>,
}

impl EncodedThrowable {
  pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
    EncodedThrowable {
      class_name: class_name.into(),
      message: Some(message.into()),
      stack: String::new(),
      cause: None,
    }
  }

  pub fn from_anyhow(err: &anyhow::Error) -> Self {
    let mut chain = err.chain();
    let head = chain.next();
    let mut throwable = EncodedThrowable {
      class_name: "java.lang.Exception".to_string(),
      message: head.map(|e| e.to_string()),
      stack: format!("{err:?}"),
      cause: None,
    };
    let mut cursor = &mut throwable.cause;
    for cause in chain {
      let next = Box::new(EncodedThrowable {
        class_name: "java.lang.Exception".to_string(),
        message: Some(cause.to_string()),
        stack: String::new(),
        cause: None,
      });
      *cursor = Some(next);
      cursor = &mut cursor.as_mut().unwrap().cause;
    }
    throwable
  }
}

/// The call envelope exchanged per call (spec §6):
/// `{ "s": name, "f": ordinal, "a": [encoded args...], "c": suspendCallback? }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallEnvelope {
  #[serde(rename = "s")]
  pub service: String,
  #[serde(rename = "f")]
  pub function: u32,
  #[serde(rename = "a")]
  pub args: Vec<EncodedValue>,
  #[serde(rename = "c", skip_serializing_if = "Option::is_none")]
  pub suspend_callback: Option<String>,
}

/// The result envelope: either a normal value or a thrown exception.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultEnvelope {
  Value {
    #[serde(rename = "v")]
    value: EncodedValue,
  },
  Exception {
    #[serde(rename = "e")]
    exception: EncodedThrowable,
  },
}

impl ResultEnvelope {
  pub fn value(value: EncodedValue) -> Self {
    ResultEnvelope::Value { value }
  }

  pub fn exception(exception: EncodedThrowable) -> Self {
    ResultEnvelope::Exception { exception }
  }
}

/// The immediate reply to `invokeSuspending`: names the peer-side
/// cancellation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelCallbackRef {
  #[serde(rename = "cancelCallback")]
  pub cancel_callback: String,
}

/// Encodes a JSON byte-array frame for transport across the two named
/// FIFOs of the channel ABI (§6).
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
  serde_json::to_vec(value).map_err(|e| WireError::InvalidFrame(e.to_string()))
}

/// Decodes a JSON byte-array frame. Failures are always `InvalidFrame`:
/// they must not be allowed to close the channel (spec §4.1).
pub fn decode_frame<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
  serde_json::from_slice(bytes).map_err(|e| WireError::InvalidFrame(e.to_string()))
}

/// Per-parameter/per-result value codec. A blanket impl over any
/// `Serialize + DeserializeOwned` type (see [`json::Json`]) covers the
/// common case; callers needing a custom on-wire representation — for
/// example `crate::endpoint::ReferenceSerializer`, which encodes a
/// pass-by-reference argument as a bare service name string — implement
/// this directly.
pub trait Serializer<T>: Send + Sync {
  fn encode(&self, value: &T) -> EncodedValue;
  fn decode(&self, value: EncodedValue) -> Result<T, WireError>;
}

pub mod json {
  use std::marker::PhantomData;

  use serde::de::DeserializeOwned;
  use serde::Serialize;

  use super::{EncodedValue, Serializer, WireError};

  /// The default [`Serializer`]: round-trips any serde-compatible value
  /// through `serde_json::Value`. Round-trip law: `decode(encode(x)) == x`
  /// for every registered value type (spec §4.1).
  pub struct Json<T>(PhantomData<fn() -> T>);

  impl<T> Json<T> {
    pub const fn new() -> Self {
      Json(PhantomData)
    }
  }

  impl<T> Default for Json<T> {
    fn default() -> Self {
      Self::new()
    }
  }

  impl<T: Serialize + DeserializeOwned + Send + Sync> Serializer<T> for Json<T> {
    fn encode(&self, value: &T) -> EncodedValue {
      // A value that came from `T: Serialize` is infallible to re-encode
      // into `serde_json::Value` for any type this crate's callers use
      // (no writer I/O, no non-finite floats in the data model).
      EncodedValue(serde_json::to_value(value).expect("serializable value"))
    }

    fn decode(&self, value: EncodedValue) -> Result<T, WireError> {
      serde_json::from_value(value.0).map_err(|e| WireError::InvalidFrame(e.to_string()))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::json::Json;
  use super::*;

  #[test]
  fn round_trips_call_envelope() {
    let envelope = CallEnvelope {
      service: "echo".to_string(),
      function: 0,
      args: vec![EncodedValue(serde_json::json!("world"))],
      suspend_callback: None,
    };
    let bytes = encode_frame(&envelope).unwrap();
    let decoded: CallEnvelope = decode_frame(&bytes).unwrap();
    assert_eq!(decoded.service, "echo");
    assert_eq!(decoded.function, 0);
    assert!(decoded.suspend_callback.is_none());
  }

  #[test]
  fn wire_field_names_are_stable() {
    let envelope = CallEnvelope {
      service: "echo".to_string(),
      function: 2,
      args: vec![],
      suspend_callback: Some("cb/1".to_string()),
    };
    let json = serde_json::to_value(&envelope).unwrap();
    assert_eq!(json["s"], "echo");
    assert_eq!(json["f"], 2);
    assert_eq!(json["c"], "cb/1");
  }

  #[test]
  fn json_serializer_round_trips() {
    let ser: Json<Vec<i32>> = Json::new();
    let encoded = ser.encode(&vec![1, 2, 3]);
    let decoded = ser.decode(encoded).unwrap();
    assert_eq!(decoded, vec![1, 2, 3]);
  }

  #[test]
  fn null_argument_and_null_result() {
    let ser: Json<Option<String>> = Json::new();
    let encoded = ser.encode(&None);
    assert!(encoded.is_null());
    let decoded = ser.decode(encoded).unwrap();
    assert_eq!(decoded, None);
  }

  #[test]
  fn invalid_frame_does_not_panic() {
    let err = decode_frame::<CallEnvelope>(b"not json").unwrap_err();
    assert!(matches!(err, WireError::InvalidFrame(_)));
  }
}
