// Copyright 2018-2026 the Zipline authors. MIT license.
//! `Endpoint`: one side of the bridge (spec §4.3). Binds/takes services,
//! dispatches inbound calls to local handlers, and routes outbound calls
//! and suspend/cancel continuations through a peer `CallChannel`.
//!
//! An `Endpoint` is itself a `CallChannel` implementation: the transport
//! glue (an in-process pair for tests, or `zipline-host`'s two-FIFO bridge
//! for a real engine) calls *into* an Endpoint's `invoke`/`invoke_suspending`
//! methods to deliver inbound traffic, and the Endpoint calls *out* through
//! the peer `Arc<dyn CallChannel>` it was constructed with.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::future::{AbortHandle, Abortable, Aborted};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::adapter::{FunctionDescriptor, ServiceAdapter, ZiplineService};
use crate::channel::CallChannel;
use crate::error::{ChannelError, WireError, ZiplineError};
use crate::listener::{CallResult, EventListener};
use crate::wire::{
  decode_frame, encode_frame, CallEnvelope, CancelCallbackRef, EncodedThrowable, EncodedValue,
  ResultEnvelope,
};

/// Object-safe facade over a bound `(instance, adapter)` pair, so the
/// service registry can hold heterogeneous interfaces without `Endpoint`
/// itself being generic (mirrors `ServiceAdapter`'s split from its `T`).
/// Held as `Arc` rather than `Box` so a lookup can clone the handle out of
/// the registry lock before awaiting `dispatch`.
#[async_trait]
trait InboundService: Send + Sync {
  fn functions(&self) -> &'static [FunctionDescriptor];
  async fn dispatch(&self, ordinal: usize, args: Vec<EncodedValue>) -> Result<EncodedValue, ZiplineError>;
  async fn close(&self);
}

struct BoundService<T: ZiplineService + ?Sized, A: ServiceAdapter<T>> {
  instance: Arc<T>,
  adapter: A,
}

#[async_trait]
impl<T, A> InboundService for BoundService<T, A>
where
  T: ZiplineService + ?Sized,
  A: ServiceAdapter<T>,
{
  fn functions(&self) -> &'static [FunctionDescriptor] {
    self.adapter.functions()
  }

  async fn dispatch(&self, ordinal: usize, args: Vec<EncodedValue>) -> Result<EncodedValue, ZiplineError> {
    self.adapter.invoke_on_instance(&self.instance, ordinal, args).await
  }

  async fn close(&self) {
    self.instance.close().await;
  }
}

/// A pending outbound suspending call, keyed by the locally generated
/// `suspend_callback` name. `sender` is taken exactly once: by the peer's
/// completing `invoke`, or by cooperative cancellation — whichever gets
/// there first under `suspend_callbacks`'s lock (spec invariant: "at most
/// one of completion or cancellation is observed").
struct PendingContinuation {
  sender: Mutex<Option<oneshot::Sender<Result<EncodedValue, ZiplineError>>>>,
  peer_cancel_callback: Mutex<Option<String>>,
}

/// A registered inbound cancellation: invoking this service aborts the
/// locally spawned task running the corresponding suspending handler.
struct CancelEntry {
  abort: AbortHandle,
}

type ServiceRegistry = Mutex<HashMap<String, Arc<dyn InboundService>>>;

struct EndpointInner {
  outbound_channel: Arc<dyn CallChannel>,
  services: ServiceRegistry,
  suspend_callbacks: Mutex<HashMap<String, Arc<PendingContinuation>>>,
  cancel_callbacks: Mutex<HashMap<String, CancelEntry>>,
  name_counter: AtomicU64,
  listener: Arc<dyn EventListener>,
  closed: AtomicBool,
  /// Identity (data-pointer address) of every `Arc` already auto-registered
  /// by [`Endpoint::register_reference`], so re-encoding the same instance
  /// reuses its name instead of minting a second registration (spec §4.3
  /// "Reference encoding": "locates the reference's existing registration").
  reference_names: Mutex<HashMap<usize, String>>,
}

/// One side of the bridge. Cheap to clone (an `Arc` around its state);
/// `Endpoint::new` is normally called once per pair of peers, as in
/// `zipline-host`'s JS engine bootstrap.
#[derive(Clone)]
pub struct Endpoint {
  inner: Arc<EndpointInner>,
}

impl Endpoint {
  pub fn new(outbound_channel: Arc<dyn CallChannel>, listener: Arc<dyn EventListener>) -> Self {
    Endpoint {
      inner: Arc::new(EndpointInner {
        outbound_channel,
        services: Mutex::new(HashMap::new()),
        suspend_callbacks: Mutex::new(HashMap::new()),
        cancel_callbacks: Mutex::new(HashMap::new()),
        name_counter: AtomicU64::new(0),
        listener,
        closed: AtomicBool::new(false),
        reference_names: Mutex::new(HashMap::new()),
      }),
    }
  }

  /// Monotonic, collision-free names for suspend/cancel callbacks (spec
  /// §4.3 "freshly generated name").
  pub fn generate_name(&self, prefix: &str) -> String {
    self.inner.generate_name(prefix)
  }

  /// Registers `instance` under `name`, replacing and closing any prior
  /// registration under the same name.
  pub async fn bind<T, A>(&self, name: impl Into<String>, instance: Arc<T>, adapter: A)
  where
    T: ZiplineService + ?Sized + 'static,
    A: ServiceAdapter<T> + 'static,
  {
    let name = name.into();
    let bound: Arc<dyn InboundService> = Arc::new(BoundService { instance, adapter });
    let prior = self.inner.services.lock().insert(name.clone(), bound);
    self.inner.listener.bind_service(&name);
    if let Some(prior) = prior {
      prior.close().await;
    }
  }

  /// Auto-registers a pass-by-reference argument or return value as an
  /// inbound service, reusing the existing name if `instance` was already
  /// registered (spec §4.3 "Reference encoding"). Unlike [`Endpoint::bind`],
  /// the caller never chooses the name and nothing is ever replaced: a
  /// freshly generated name cannot collide, so there is no prior
  /// registration to close. Used by [`ReferenceSerializer`], not meant to
  /// be called directly by service adapters.
  pub fn register_reference<T, A>(&self, instance: Arc<T>, adapter: A) -> String
  where
    T: ZiplineService + ?Sized + 'static,
    A: ServiceAdapter<T> + 'static,
  {
    let identity = Arc::as_ptr(&instance) as *const u8 as usize;
    if let Some(existing) = self.inner.reference_names.lock().get(&identity).cloned() {
      return existing;
    }
    let name = self.inner.generate_name("reference");
    let bound: Arc<dyn InboundService> = Arc::new(BoundService { instance, adapter });
    self.inner.services.lock().insert(name.clone(), bound);
    self.inner.listener.bind_service(&name);
    self.inner.reference_names.lock().insert(identity, name.clone());
    name
  }

  /// Builds an outbound proxy for the service the peer has (or will have)
  /// bound under `name`. Does not round-trip: the proxy is handed out
  /// immediately and fails lazily if `name` is never bound on the peer.
  ///
  /// If `scope` is given, the proxy's underlying handler is added to it
  /// (spec §4.5); closing the scope later closes this proxy along with
  /// every other member.
  pub fn take<T, A>(&self, name: impl Into<String>, adapter: &A, scope: Option<&crate::scope::ZiplineScope>) -> Arc<T>
  where
    T: ZiplineService + ?Sized,
    A: ServiceAdapter<T>,
  {
    let name = name.into();
    self.inner.listener.take_service(&name);
    let close_ordinal = find_close_ordinal(adapter.functions());
    let handler = Arc::new(CallHandler::new(
      Arc::downgrade(&self.inner),
      name,
      close_ordinal,
    ));
    if let Some(scope) = scope {
      scope.add(handler.clone());
    }
    adapter.create_outbound_proxy(handler)
  }

  /// Removes a bound service, invoking its `close()` exactly once if
  /// present. Idempotent: removing an absent or already-removed name is a
  /// no-op.
  pub async fn remove(&self, name: &str) {
    let removed = self.inner.services.lock().remove(name);
    if let Some(service) = removed {
      service.close().await;
    }
  }

  pub fn is_closed(&self) -> bool {
    self.inner.closed.load(Ordering::Acquire)
  }

  /// The number of outbound suspending calls still awaiting completion or
  /// cancellation, for leak diagnostics and tests (spec §7 "no leaked
  /// continuations").
  pub fn incomplete_continuations(&self) -> usize {
    self.inner.suspend_callbacks.lock().len()
  }

  /// Closes the Endpoint: every pending continuation resolves with
  /// `EndpointClosed`, every bound service is closed, and subsequent calls
  /// through any outbound proxy fail with `EndpointClosed`.
  pub async fn close(&self) {
    if self.inner.closed.swap(true, Ordering::AcqRel) {
      return;
    }
    let continuations = std::mem::take(&mut *self.inner.suspend_callbacks.lock());
    for (_, cont) in continuations {
      if let Some(sender) = cont.sender.lock().take() {
        let _ = sender.send(Err(ZiplineError::EndpointClosed));
      }
    }
    let cancels = std::mem::take(&mut *self.inner.cancel_callbacks.lock());
    for (_, entry) in cancels {
      entry.abort.abort();
    }
    let services = std::mem::take(&mut *self.inner.services.lock());
    for (_, service) in services {
      service.close().await;
    }
  }
}

#[async_trait]
impl CallChannel for Endpoint {
  async fn service_names(&self) -> Vec<String> {
    self.inner.services.lock().keys().cloned().collect()
  }

  async fn invoke(&self, encoded_call: Vec<u8>) -> Vec<u8> {
    self.inner.dispatch_invoke(encoded_call).await
  }

  async fn invoke_suspending(&self, encoded_call: Vec<u8>, suspend_callback_name: &str) -> Vec<u8> {
    self
      .inner
      .dispatch_invoke_suspending(encoded_call, suspend_callback_name)
      .await
  }

  async fn disconnect(&self, name: &str) -> bool {
    let removed = self.inner.services.lock().remove(name);
    let was_present = removed.is_some();
    if let Some(service) = removed {
      service.close().await;
    }
    was_present
  }
}

/// The [`crate::wire::Serializer`] for a pass-by-reference parameter or
/// return value (spec §4.3 "Reference encoding"): encoding auto-registers
/// `instance` as an inbound service on this [`Endpoint`] (reusing the name
/// if it was already registered) and writes that name; decoding treats the
/// peer's name as an outbound proxy, added to `scope` if one was given.
///
/// Built by hand per reference-typed interface, the same way a
/// `ServiceAdapter` itself is — there is no reference serializer generated
/// for `String`-typed arguments that merely *look* like a name; only a
/// parameter whose declared type is a `ZiplineService` goes through this.
pub struct ReferenceSerializer<T: ZiplineService + ?Sized, A> {
  endpoint: Endpoint,
  adapter: Arc<A>,
  scope: Option<crate::scope::ZiplineScope>,
  _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T, A> ReferenceSerializer<T, A>
where
  T: ZiplineService + ?Sized,
  A: ServiceAdapter<T>,
{
  pub fn new(endpoint: Endpoint, adapter: A, scope: Option<crate::scope::ZiplineScope>) -> Self {
    ReferenceSerializer {
      endpoint,
      adapter: Arc::new(adapter),
      scope,
      _marker: std::marker::PhantomData,
    }
  }
}

impl<T, A> crate::wire::Serializer<Arc<T>> for ReferenceSerializer<T, A>
where
  T: ZiplineService + ?Sized + 'static,
  A: ServiceAdapter<T> + Clone + 'static,
{
  fn encode(&self, value: &Arc<T>) -> EncodedValue {
    let name = self.endpoint.register_reference(value.clone(), (*self.adapter).clone());
    EncodedValue(serde_json::Value::String(name))
  }

  fn decode(&self, value: EncodedValue) -> Result<Arc<T>, WireError> {
    let name = match value.0 {
      serde_json::Value::String(s) => s,
      other => return Err(WireError::InvalidFrame(format!("expected a service name string, got {other}"))),
    };
    Ok(self.endpoint.take(name, &*self.adapter, self.scope.as_ref()))
  }
}

fn encode_unit_result() -> Vec<u8> {
  encode_frame(&ResultEnvelope::value(EncodedValue::null())).unwrap_or_default()
}

fn encode_exception(message: &str) -> Vec<u8> {
  encode_frame(&ResultEnvelope::exception(EncodedThrowable::new(
    "app.cash.zipline.ZiplineApiMismatchException",
    message,
  )))
  .unwrap_or_default()
}

impl EndpointInner {
  fn generate_name(&self, prefix: &str) -> String {
    let n = self.name_counter.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}/{n}")
  }

  async fn dispatch_invoke(&self, bytes: Vec<u8>) -> Vec<u8> {
    let envelope: CallEnvelope = match decode_frame(&bytes) {
      Ok(e) => e,
      Err(err) => return encode_exception(&format!("invalid call frame: {err}")),
    };

    // Cancellation of an inbound suspending call: the envelope's service
    // name is a cancel callback, not a bound service.
    let cancel_entry = self.cancel_callbacks.lock().remove(&envelope.service);
    if let Some(entry) = cancel_entry {
      entry.abort.abort();
      return encode_unit_result();
    }

    // Completion of an outbound suspending call we started earlier: the
    // envelope's service name is one of our own suspend callbacks.
    let continuation = self.suspend_callbacks.lock().remove(&envelope.service);
    if let Some(continuation) = continuation {
      self.complete_continuation(&continuation, &envelope);
      return encode_unit_result();
    }

    self.dispatch_to_service(envelope).await
  }

  fn complete_continuation(&self, continuation: &Arc<PendingContinuation>, envelope: &CallEnvelope) {
    let Some(sender) = continuation.sender.lock().take() else {
      // Already resolved by a racing cancellation; the peer's message
      // arrived too late to matter.
      return;
    };
    let result = match envelope.args.first() {
      Some(arg) => match serde_json::from_value::<ResultEnvelope>(arg.0.clone()) {
        Ok(ResultEnvelope::Value { value }) => Ok(value),
        Ok(ResultEnvelope::Exception { exception }) => Err(ZiplineError::Application(anyhow::anyhow!(
          "{}",
          exception.message.unwrap_or(exception.class_name)
        ))),
        Err(err) => Err(ZiplineError::Channel(ChannelError::Wire(WireError::InvalidFrame(
          err.to_string(),
        )))),
      },
      None => Ok(EncodedValue::null()),
    };
    let _ = sender.send(result);
  }

  /// Looks up `name`'s function table and clones the handle out of the
  /// registry lock, so the actual `dispatch` can be awaited without
  /// holding the lock.
  fn lookup(&self, name: &str) -> Option<Arc<dyn InboundService>> {
    self.services.lock().get(name).cloned()
  }

  async fn dispatch_to_service(&self, envelope: CallEnvelope) -> Vec<u8> {
    let Some(service) = self.lookup(&envelope.service) else {
      self.listener.on_listener_error(&format!("unknown service {:?}", envelope.service));
      return encode_exception(&format!("unknown service {:?}", envelope.service));
    };
    let ordinal = envelope.function as usize;
    match service.functions().get(ordinal) {
      Some(descriptor) if descriptor.is_suspending => {
        return encode_exception(&format!(
          "function {ordinal} on {:?} is suspending; use invokeSuspending",
          envelope.service
        ));
      }
      Some(_) => {}
      None => {
        return encode_exception(&format!("no function {ordinal} on service {:?}", envelope.service));
      }
    }

    let token = self.listener.call_start(&envelope);
    let args = envelope.args.clone();
    let result = service.dispatch(ordinal, args).await;
    match result {
      Ok(value) => {
        self.listener.call_end(&envelope, &CallResult::Success, token);
        encode_frame(&ResultEnvelope::value(value)).unwrap_or_default()
      }
      Err(err) => {
        self.listener.call_end(&envelope, &CallResult::Failure(err.to_string()), token);
        encode_exception(&err.to_string())
      }
    }
  }

  async fn dispatch_invoke_suspending(&self, bytes: Vec<u8>, suspend_callback_name: &str) -> Vec<u8> {
    let envelope: CallEnvelope = match decode_frame(&bytes) {
      Ok(e) => e,
      Err(err) => return encode_exception(&format!("invalid call frame: {err}")),
    };
    let Some(service) = self.lookup(&envelope.service) else {
      return encode_exception(&format!("unknown service {:?}", envelope.service));
    };
    let ordinal = envelope.function as usize;
    match service.functions().get(ordinal) {
      Some(descriptor) if descriptor.is_suspending => {}
      Some(_) => {
        return encode_exception(&format!("function {ordinal} on {:?} is not suspending", envelope.service));
      }
      None => {
        return encode_exception(&format!("no function {ordinal} on service {:?}", envelope.service));
      }
    }

    let cancel_name = suspend_callback_name.to_string();
    let (abort_handle, abort_registration) = AbortHandle::new_pair();
    self
      .cancel_callbacks
      .lock()
      .insert(cancel_name.clone(), CancelEntry { abort: abort_handle });

    let token = self.listener.call_start(&envelope);
    let reply = encode_frame(&ResultEnvelope::value(EncodedValue(
      serde_json::to_value(CancelCallbackRef {
        cancel_callback: cancel_name.clone(),
      })
      .expect("serializable cancel ref"),
    )))
    .unwrap_or_default();

    let args = envelope.args.clone();
    let suspend_target = suspend_callback_name.to_string();
    let outbound_channel = self.outbound_channel.clone();
    let listener = self.listener.clone();
    let call_envelope_for_end = envelope.clone();

    tokio::spawn(async move {
      let call = service.dispatch(ordinal, args);
      let outcome = Abortable::new(call, abort_registration).await;
      let (result_envelope, call_result) = match outcome {
        Ok(Ok(value)) => (ResultEnvelope::value(value), CallResult::Success),
        Ok(Err(err)) => {
          let message = err.to_string();
          (
            ResultEnvelope::exception(EncodedThrowable::new("java.lang.Exception", message.clone())),
            CallResult::Failure(message),
          )
        }
        Err(Aborted) => (
          ResultEnvelope::exception(EncodedThrowable::new(
            "app.cash.zipline.CancellationException",
            "call was cancelled",
          )),
          CallResult::Failure("cancelled".to_string()),
        ),
      };
      listener.call_end(&call_envelope_for_end, &call_result, token);
      let completion = CallEnvelope {
        service: suspend_target,
        function: 0,
        args: vec![EncodedValue(
          serde_json::to_value(&result_envelope).expect("serializable result envelope"),
        )],
        suspend_callback: None,
      };
      let Ok(bytes) = encode_frame(&completion) else {
        listener.on_listener_error("failed to encode suspend-callback completion");
        return;
      };
      let _ = outbound_channel.invoke(bytes).await;
    });

    reply
  }
}

/// Finds the ordinal of the function with the special `close(): Unit`
/// signature, by convention the marker the source system's compiler plugin
/// uses to special-case proxy teardown (spec §4.4).
pub fn find_close_ordinal(functions: &[FunctionDescriptor]) -> Option<usize> {
  functions.iter().position(|f| f.signature == "fun close(): Unit")
}

/// RAII guard installed for the duration of an outbound suspending call.
/// If dropped before the call completes (the caller abandoned the
/// `.await`, e.g. via `tokio::time::timeout`), it fires the peer's cancel
/// callback on a best-effort basis — the idiomatic Rust analogue of the
/// source system's explicit `Job.cancel()` call, expressed here as
/// "cancel on drop" rather than an externally triggered abort.
struct SuspendCancelGuard {
  endpoint: Weak<EndpointInner>,
  suspend_name: String,
  settled: bool,
}

impl Drop for SuspendCancelGuard {
  fn drop(&mut self) {
    if self.settled {
      return;
    }
    let Some(endpoint) = self.endpoint.upgrade() else {
      return;
    };
    let suspend_name = std::mem::take(&mut self.suspend_name);
    tokio::spawn(async move {
      let continuation = endpoint.suspend_callbacks.lock().remove(&suspend_name);
      let Some(continuation) = continuation else {
        return; // peer already completed; nothing to cancel
      };
      let peer_cancel_callback = continuation.peer_cancel_callback.lock().clone();
      let Some(peer_cancel_callback) = peer_cancel_callback else {
        return; // cancelled before the peer even told us its cancel name
      };
      let cancel_envelope = CallEnvelope {
        service: peer_cancel_callback,
        function: 0,
        args: vec![],
        suspend_callback: None,
      };
      if let Ok(bytes) = encode_frame(&cancel_envelope) {
        let _ = endpoint.outbound_channel.invoke(bytes).await;
      }
    });
  }
}

/// The concrete, non-generic unit an outbound proxy forwards calls
/// through, and the unit [`crate::scope::ZiplineScope`] tracks and closes
/// (spec §4.5's grounding note: the scope holds this, not `Arc<dyn T>`,
/// because `T` varies per service and Rust trait objects can't be
/// downcast back to a concrete type without `Any`).
pub struct CallHandler {
  endpoint: Weak<EndpointInner>,
  service_name: String,
  close_ordinal: Option<usize>,
  closed: AtomicBool,
}

/// A proxy dropped without ever being closed is a leak: the peer's bound
/// instance is never told to release its resources. Detected here the
/// idiomatic Rust way — on `Drop` — since there is no finalizer/GC hook to
/// lean on the way a JVM-hosted peer would.
impl Drop for CallHandler {
  fn drop(&mut self) {
    if !self.closed.load(Ordering::Acquire) {
      if let Some(endpoint) = self.endpoint.upgrade() {
        endpoint.listener.service_leaked(&self.service_name);
      }
    }
  }
}

impl CallHandler {
  fn new(endpoint: Weak<EndpointInner>, service_name: String, close_ordinal: Option<usize>) -> Self {
    CallHandler {
      endpoint,
      service_name,
      close_ordinal,
      closed: AtomicBool::new(false),
    }
  }

  pub fn service_name(&self) -> &str {
    &self.service_name
  }

  pub fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }

  /// A normal (non-suspending) outbound call.
  pub async fn call(&self, ordinal: usize, args: Vec<EncodedValue>) -> Result<EncodedValue, ZiplineError> {
    if self.is_closed() {
      return Err(ZiplineError::ServiceClosed(self.service_name.clone()));
    }
    let endpoint = self.endpoint.upgrade().ok_or(ZiplineError::EndpointClosed)?;
    let envelope = CallEnvelope {
      service: self.service_name.clone(),
      function: ordinal as u32,
      args,
      suspend_callback: None,
    };
    let token = endpoint.listener.call_start(&envelope);
    let bytes = encode_frame(&envelope).map_err(|e| {
      ZiplineError::Channel(ChannelError::Wire(WireError::InvalidFrame(e.to_string())))
    })?;
    let reply = endpoint.outbound_channel.invoke(bytes).await;
    let decoded: ResultEnvelope = decode_frame(&reply).map_err(ChannelError::Wire)?;
    match decoded {
      ResultEnvelope::Value { value } => {
        endpoint.listener.call_end(&envelope, &CallResult::Success, token);
        Ok(value)
      }
      ResultEnvelope::Exception { exception } => {
        let message = exception.message.clone().unwrap_or_else(|| exception.class_name.clone());
        endpoint.listener.call_end(&envelope, &CallResult::Failure(message.clone()), token);
        Err(ZiplineError::Application(anyhow::anyhow!("{message}")))
      }
    }
  }

  /// A suspending outbound call: awaits the peer's eventual completion,
  /// cooperatively cancelling the peer's handler if this future is
  /// dropped first.
  pub async fn call_suspending(
    &self,
    ordinal: usize,
    args: Vec<EncodedValue>,
  ) -> Result<EncodedValue, ZiplineError> {
    if self.is_closed() {
      return Err(ZiplineError::ServiceClosed(self.service_name.clone()));
    }
    let endpoint = self.endpoint.upgrade().ok_or(ZiplineError::EndpointClosed)?;
    let suspend_name = endpoint.generate_name("suspendCallback");
    let (tx, rx) = oneshot::channel();
    let continuation = Arc::new(PendingContinuation {
      sender: Mutex::new(Some(tx)),
      peer_cancel_callback: Mutex::new(None),
    });
    endpoint
      .suspend_callbacks
      .lock()
      .insert(suspend_name.clone(), continuation.clone());

    let mut guard = SuspendCancelGuard {
      endpoint: self.endpoint.clone(),
      suspend_name: suspend_name.clone(),
      settled: false,
    };

    let envelope = CallEnvelope {
      service: self.service_name.clone(),
      function: ordinal as u32,
      args,
      suspend_callback: Some(suspend_name.clone()),
    };
    let bytes = match encode_frame(&envelope) {
      Ok(b) => b,
      Err(e) => {
        guard.settled = true;
        endpoint.suspend_callbacks.lock().remove(&suspend_name);
        return Err(ZiplineError::Channel(ChannelError::Wire(WireError::InvalidFrame(e.to_string()))));
      }
    };
    let immediate = endpoint.outbound_channel.invoke_suspending(bytes, &suspend_name).await;
    let immediate: ResultEnvelope = match decode_frame(&immediate) {
      Ok(r) => r,
      Err(e) => {
        guard.settled = true;
        endpoint.suspend_callbacks.lock().remove(&suspend_name);
        return Err(ZiplineError::Channel(ChannelError::Wire(e)));
      }
    };
    match immediate {
      ResultEnvelope::Exception { exception } => {
        guard.settled = true;
        endpoint.suspend_callbacks.lock().remove(&suspend_name);
        let message = exception.message.unwrap_or(exception.class_name);
        return Err(ZiplineError::Application(anyhow::anyhow!("{message}")));
      }
      ResultEnvelope::Value { value } => match serde_json::from_value::<CancelCallbackRef>(value.0) {
        Ok(cancel_ref) => {
          *continuation.peer_cancel_callback.lock() = Some(cancel_ref.cancel_callback);
        }
        Err(e) => {
          guard.settled = true;
          endpoint.suspend_callbacks.lock().remove(&suspend_name);
          return Err(ZiplineError::Channel(ChannelError::Wire(WireError::InvalidFrame(e.to_string()))));
        }
      },
    }

    let result = rx.await;
    guard.settled = true;
    match result {
      Ok(r) => r,
      Err(_) => Err(ZiplineError::EndpointClosed),
    }
  }

  /// Closes the handler. Idempotent; the first call notifies the peer
  /// through the function with signature `fun close(): Unit`, if the
  /// interface declares one.
  pub async fn close(&self) -> Result<(), ZiplineError> {
    if self.closed.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    if let Some(ordinal) = self.close_ordinal {
      self.call(ordinal, Vec::new()).await?;
    }
    Ok(())
  }
}

