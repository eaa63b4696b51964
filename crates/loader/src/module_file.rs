// Copyright 2018-2026 the Zipline authors. MIT license.
//! The module file container: `{ version: u32, bytecode: bytes }` (spec
//! §6), a 4-byte little-endian version header in front of the raw
//! bytecode. Grounded on `cli/lib/standalone/binary.rs`'s hand-rolled
//! little-endian length/version-prefixed framing for its own binary
//! container (`MAGIC_BYTES`, `read_u32`), adapted here to a fixed 4-byte
//! header with no magic bytes since the manifest's sha256 already
//! authenticates the whole container.

use crate::error::LoaderError;

/// The module file format version this loader understands. A container
/// whose header doesn't match is rejected outright — there is no
/// forward-compatible decode path for a version bump.
pub const CURRENT_ZIPLINE_VERSION: u32 = 1;

const HEADER_LEN: usize = 4;

/// The literal `{ version: u32, bytecode: bytes }` container of spec §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFile {
  pub version: u32,
  pub bytecode: Vec<u8>,
}

impl ModuleFile {
  /// Wraps `bytecode` in a container stamped with [`CURRENT_ZIPLINE_VERSION`].
  pub fn new(bytecode: Vec<u8>) -> Self {
    ModuleFile {
      version: CURRENT_ZIPLINE_VERSION,
      bytecode,
    }
  }

  /// A 4-byte little-endian version header followed by the bytecode bytes
  /// verbatim.
  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + self.bytecode.len());
    out.extend_from_slice(&self.version.to_le_bytes());
    out.extend_from_slice(&self.bytecode);
    out
  }

  /// Decodes a container fetched for module `id`, rejecting anything too
  /// short to hold a header or whose version doesn't equal
  /// [`CURRENT_ZIPLINE_VERSION`].
  pub fn decode(id: &str, bytes: &[u8]) -> Result<Self, LoaderError> {
    if bytes.len() < HEADER_LEN {
      return Err(LoaderError::VersionMismatch {
        id: id.to_string(),
        expected: CURRENT_ZIPLINE_VERSION,
        actual: 0,
      });
    }
    let (header, bytecode) = bytes.split_at(HEADER_LEN);
    let version = u32::from_le_bytes(header.try_into().expect("header is exactly 4 bytes"));
    if version != CURRENT_ZIPLINE_VERSION {
      return Err(LoaderError::VersionMismatch {
        id: id.to_string(),
        expected: CURRENT_ZIPLINE_VERSION,
        actual: version,
      });
    }
    Ok(ModuleFile {
      version,
      bytecode: bytecode.to_vec(),
    })
  }
}
