// Copyright 2018-2026 the Zipline authors. MIT license.
//! The raw transport seam (spec §4.2, §6). A `CallChannel` is the low-level
//! ABI the host↔JS bridge is built on: two named byte-array FIFOs in the
//! source system, here one trait with byte-array in/out so the same
//! `Endpoint` works in-process (tests) or wired to a real JS engine bridge
//! (`zipline-host`).
//!
//! An `Endpoint` plays both ends of this trait: it *implements* `CallChannel`
//! to receive inbound calls from its peer, and it *holds* an
//! `Arc<dyn CallChannel>` pointing at the peer to make outbound calls.

use async_trait::async_trait;

/// The peer-facing half of the bridge. All four methods correspond 1:1 to
/// the channel ABI's argument/result shape of `array<string>` (modeled here
/// as `Vec<u8>` — an opaque encoded frame, see `wire::encode_frame`).
#[async_trait]
pub trait CallChannel: Send + Sync {
  /// Currently bound inbound service names, for diagnostics and the
  /// `serviceNamesChanged` listener hook some embedders wire up.
  async fn service_names(&self) -> Vec<String>;

  /// A normal (non-suspending) round trip: send an encoded `CallEnvelope`,
  /// receive back an encoded `ResultEnvelope`.
  async fn invoke(&self, encoded_call: Vec<u8>) -> Vec<u8>;

  /// Starts a suspending call. The immediate reply is an encoded
  /// `ResultEnvelope` carrying either a `CancelCallbackRef` (call started)
  /// or an exception (the call failed before it could even start). The
  /// eventual result arrives later as an ordinary `invoke` targeting
  /// `suspend_callback_name`.
  async fn invoke_suspending(&self, encoded_call: Vec<u8>, suspend_callback_name: &str) -> Vec<u8>;

  /// Removes a named inbound service, invoking its `close()` exactly once
  /// if it was bound. Returns whether a service was actually removed.
  async fn disconnect(&self, name: &str) -> bool;
}
