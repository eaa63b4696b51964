// Copyright 2018-2026 the Zipline authors. MIT license.
//! The per-interface Service Adapter contract (spec §4.4). An Adapter is
//! normally generated — by a compiler plugin in the source system, or by a
//! proc-macro/derive here — but the Endpoint only ever depends on this
//! trait, so hand-written adapters work identically (design note §9(a)).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::endpoint::CallHandler;
use crate::error::ZiplineError;
use crate::wire::EncodedValue;

/// Every service instance and every generated outbound proxy implements
/// this. `close` is invoked by the Endpoint exactly once when an inbound
/// service is removed, and by `CallHandler::close` for an outbound proxy.
/// The default no-op body covers services with nothing to release.
#[async_trait]
pub trait ZiplineService: Send + Sync {
  async fn close(&self) {}
}

/// Stable per-function metadata. Ordinal identity is the function's index
/// in [`ServiceAdapter::functions`]; the signature string is its canonical,
/// version-stable identity for logging and compatibility checks.
#[derive(Debug, Clone, Copy)]
pub struct FunctionDescriptor {
  pub signature: &'static str,
  pub is_suspending: bool,
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-interface descriptor. `T` is the service trait (e.g. `dyn Echo`);
/// implementations are hand-written per service (design note §9(a):
/// "preferred for static targets"), mirroring how the source system's
/// compiler plugin derives an Adapter from an `@Zipline`-annotated
/// interface, without introducing a proc-macro build dependency here.
#[async_trait]
pub trait ServiceAdapter<T: ZiplineService + ?Sized>: Send + Sync + 'static {
  /// The ordered, stable function list. Ordinals are positions in this
  /// slice.
  fn functions(&self) -> &'static [FunctionDescriptor];

  /// Inbound dispatch: invokes function `ordinal` on a concrete local
  /// instance with already-decoded arguments, returning the encoded
  /// result. Used by `Endpoint::bind`'s registered services.
  async fn invoke_on_instance(
    &self,
    instance: &T,
    ordinal: usize,
    args: Vec<EncodedValue>,
  ) -> Result<EncodedValue, ZiplineError>;

  /// Builds an outbound proxy over a shared [`CallHandler`], used by
  /// `Endpoint::take`. The handler already knows how to route `call`/
  /// `call_suspending`/`close` to the peer; this only needs to adapt `T`'s
  /// method calls into handler calls by ordinal.
  fn create_outbound_proxy(&self, handler: Arc<CallHandler>) -> Arc<T>;
}
