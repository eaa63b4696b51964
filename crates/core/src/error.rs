// Copyright 2018-2026 the Zipline authors. MIT license.

use thiserror::Error;

/// Failures that can occur while decoding or encoding a call envelope.
///
/// Per the wire codec's contract, a decode failure never closes the
/// channel: it is surfaced to the caller as a fatal *local* error.
#[derive(Debug, Error)]
pub enum WireError {
  #[error("invalid frame: {0}")]
  InvalidFrame(String),
}

/// A transport-level failure: the channel is unreachable, closed, or
/// produced a frame that couldn't be interpreted as a call/result envelope.
#[derive(Debug, Error)]
pub enum ChannelError {
  #[error("channel is closed")]
  Closed,
  #[error(transparent)]
  Wire(#[from] WireError),
}

/// The unified error taxonomy a `zipline-core` Endpoint can produce or
/// propagate, matching the "kinds, not type names" taxonomy of the bridge
/// spec: transport, protocol, application, lifecycle, and cancellation.
#[derive(Debug, Error)]
pub enum ZiplineError {
  /// Fatal, local: the underlying channel is unreachable or malformed.
  #[error("channel error: {0}")]
  Channel(#[from] ChannelError),

  /// Fatal, reported to the event listener: unknown service name, bad
  /// function ordinal, or an otherwise well-formed-but-nonsensical
  /// envelope.
  #[error("protocol error: {0}")]
  Protocol(String),

  /// Crossed the boundary as a serialized throwable thrown by user code on
  /// either side. Re-thrown on the caller side verbatim.
  #[error("{0}")]
  Application(#[source] anyhow::Error),

  /// The target service's `closed` flag was already set.
  #[error("service {0:?} is closed")]
  ServiceClosed(String),

  /// The Endpoint itself has been closed; no further user call on it can
  /// succeed.
  #[error("endpoint is closed")]
  EndpointClosed,

  /// The enclosing `ZiplineScope` has been closed.
  #[error("scope is closed")]
  ScopeClosed,

  /// Cooperative: a suspending call was cancelled before it completed.
  /// Never logged as a failure by callers that check for it explicitly.
  #[error("call was cancelled")]
  Cancelled,
}

impl ZiplineError {
  /// True for the cancellation variant, so callers can avoid treating a
  /// cooperative cancellation as an application failure.
  pub fn is_cancelled(&self) -> bool {
    matches!(self, ZiplineError::Cancelled)
  }
}

/// The result of closing a [`crate::scope::ZiplineScope`]: per-member
/// close failures are aggregated here rather than re-thrown, per spec
/// §4.5.
#[derive(Debug, Error)]
#[error("{} error(s) while closing scope", .0.len())]
pub struct MultiError(pub Vec<ZiplineError>);
