// Copyright 2018-2026 the Zipline authors. MIT license.
//! The concrete transport underneath a JS-engine-backed `Endpoint`: two
//! named byte-array FIFOs, the channel ABI's actual wire shape (spec §6).
//! `zipline-core::Endpoint` doesn't know these names exist; they're purely
//! how a real engine binding (QuickJS, V8, etc.) and this host glue agree
//! on which direction is which.

/// The inbound-from-JS, outbound-from-host FIFO name. Mirrors the actual
/// channel names the source system's JNI/JS-engine bridge uses.
pub const INBOUND_CHANNEL_NAME: &str = "app_cash_zipline_inboundChannel";

/// The inbound-from-host, outbound-from-JS FIFO name.
pub const OUTBOUND_CHANNEL_NAME: &str = "app_cash_zipline_outboundChannel";

/// What a concrete JS engine binding must provide: a way to push an encoded
/// call frame into the engine and get back an encoded result frame, for
/// each of the two channel methods understood by the bridge.
///
/// A real binding (not built here — no JS engine is embedded in this
/// crate) would implement this by calling into the engine's `invoke`/
/// `invokeSuspending`/`disconnect`/`serviceNamesChanged` JS functions over
/// `INBOUND_CHANNEL_NAME`/`OUTBOUND_CHANNEL_NAME` and marshaling the result
/// back across the FFI boundary.
#[async_trait::async_trait]
pub trait JsEngineChannel: Send + Sync {
  async fn invoke(&self, encoded_call: Vec<u8>) -> Vec<u8>;
  async fn invoke_suspending(&self, encoded_call: Vec<u8>, suspend_callback_name: &str) -> Vec<u8>;
  async fn disconnect(&self, name: &str) -> bool;
  async fn service_names(&self) -> Vec<String>;
}

/// Adapts a [`JsEngineChannel`] into a [`zipline_core::CallChannel`], so an
/// `Endpoint` can be constructed over a real engine binding exactly the way
/// it's constructed over the in-process test double in `zipline-core`.
pub struct EngineCallChannel<E> {
  engine: E,
}

impl<E: JsEngineChannel> EngineCallChannel<E> {
  pub fn new(engine: E) -> Self {
    EngineCallChannel { engine }
  }
}

#[async_trait::async_trait]
impl<E: JsEngineChannel> zipline_core::CallChannel for EngineCallChannel<E> {
  async fn service_names(&self) -> Vec<String> {
    self.engine.service_names().await
  }

  async fn invoke(&self, encoded_call: Vec<u8>) -> Vec<u8> {
    self.engine.invoke(encoded_call).await
  }

  async fn invoke_suspending(&self, encoded_call: Vec<u8>, suspend_callback_name: &str) -> Vec<u8> {
    self.engine.invoke_suspending(encoded_call, suspend_callback_name).await
  }

  async fn disconnect(&self, name: &str) -> bool {
    self.engine.disconnect(name).await
  }
}
