// Copyright 2018-2026 the Zipline authors. MIT license.
//! `zipline-core`: the wire codec, the dispatch engine (`Endpoint`), and the
//! service-lifetime primitives (`ZiplineScope`) that sit underneath any
//! concrete host↔JS transport.
//!
//! This crate knows nothing about HTTP, module manifests, or a real JS
//! engine — those live in `zipline-loader` and `zipline-host`. It is the
//! bridge's dispatch core, analogous to `deno_core`'s op-dispatch layer
//! sitting underneath `deno_runtime`'s concrete Deno APIs.

pub mod adapter;
pub mod channel;
pub mod endpoint;
pub mod error;
pub mod listener;
pub mod scope;
pub mod wire;

pub use adapter::{FunctionDescriptor, ServiceAdapter, ZiplineService};
pub use channel::CallChannel;
pub use endpoint::{find_close_ordinal, CallHandler, Endpoint, ReferenceSerializer};
pub use error::{ChannelError, MultiError, WireError, ZiplineError};
pub use listener::{CallResult, CallStartToken, CountingEventListener, EventListener, NoopEventListener};
pub use scope::{close_reporting, ZiplineScope};
pub use wire::{
  decode_frame, encode_frame, json, CallEnvelope, CancelCallbackRef, EncodedThrowable, EncodedValue,
  ResultEnvelope, Serializer,
};

/// An in-process [`CallChannel`] pair: each side's `invoke*` calls straight
/// into the other [`Endpoint`]. This is the transport every unit test in
/// this crate (and most of `zipline`'s integration tests) uses instead of
/// a real two-FIFO engine bridge.
pub mod test_support {
  use std::sync::Arc;

  use async_trait::async_trait;
  use parking_lot::Mutex;

  use crate::channel::CallChannel;
  use crate::endpoint::Endpoint;
  use crate::listener::{EventListener, NoopEventListener};
  use crate::wire::{encode_frame, EncodedThrowable, ResultEnvelope};

  pub struct DirectChannel {
    peer: Mutex<Option<Endpoint>>,
  }

  impl DirectChannel {
    pub fn new() -> Arc<Self> {
      Arc::new(DirectChannel {
        peer: Mutex::new(None),
      })
    }

    pub fn bind_peer(&self, peer: Endpoint) {
      *self.peer.lock() = Some(peer);
    }

    fn peer(&self) -> Option<Endpoint> {
      self.peer.lock().clone()
    }
  }

  fn peer_not_connected() -> Vec<u8> {
    encode_frame(&ResultEnvelope::exception(EncodedThrowable::new(
      "app.cash.zipline.ZiplineApiMismatchException",
      "peer not connected",
    )))
    .expect("encodable exception")
  }

  #[async_trait]
  impl CallChannel for DirectChannel {
    async fn service_names(&self) -> Vec<String> {
      match self.peer() {
        Some(peer) => peer.service_names().await,
        None => Vec::new(),
      }
    }

    async fn invoke(&self, encoded_call: Vec<u8>) -> Vec<u8> {
      match self.peer() {
        Some(peer) => peer.invoke(encoded_call).await,
        None => peer_not_connected(),
      }
    }

    async fn invoke_suspending(&self, encoded_call: Vec<u8>, suspend_callback_name: &str) -> Vec<u8> {
      match self.peer() {
        Some(peer) => peer.invoke_suspending(encoded_call, suspend_callback_name).await,
        None => peer_not_connected(),
      }
    }

    async fn disconnect(&self, name: &str) -> bool {
      match self.peer() {
        Some(peer) => peer.disconnect(name).await,
        None => false,
      }
    }
  }

  /// Builds two endpoints wired directly to each other, the way
  /// `zipline-host` wires a real `Endpoint` pair across the two named
  /// FIFOs of a JS engine bridge.
  pub fn connected_pair() -> (Endpoint, Endpoint) {
    connected_pair_with_listeners(Arc::new(NoopEventListener), Arc::new(NoopEventListener))
  }

  pub fn connected_pair_with_listeners(
    listener_a: Arc<dyn EventListener>,
    listener_b: Arc<dyn EventListener>,
  ) -> (Endpoint, Endpoint) {
    let channel_a = DirectChannel::new();
    let channel_b = DirectChannel::new();
    let endpoint_a = Endpoint::new(channel_a.clone(), listener_a);
    let endpoint_b = Endpoint::new(channel_b.clone(), listener_b);
    channel_a.bind_peer(endpoint_b.clone());
    channel_b.bind_peer(endpoint_a.clone());
    (endpoint_a, endpoint_b)
  }
}
