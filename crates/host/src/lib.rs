// Copyright 2018-2026 the Zipline authors. MIT license.
//! `zipline-host`: the channel ABI glue and built-in host services (timer,
//! console) that sit between a `zipline_core::Endpoint` and a real JS
//! engine binding.

pub mod bootstrap;
pub mod js_channel;

pub use bootstrap::{
  bootstrap_host_services, ConsoleLevel, ConsoleService, ConsoleServiceAdapter, HostTimerService,
  JsDispatcherAdapter, JsDispatcherService, LogConsoleService, TimerServiceAdapter, TokioTimerService,
};
pub use js_channel::{EngineCallChannel, JsEngineChannel, INBOUND_CHANNEL_NAME, OUTBOUND_CHANNEL_NAME};
