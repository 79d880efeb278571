//! `tiltbridge-runtime` – the dispatch loop and its process plumbing.
//!
//! # Modules
//!
//! - [`dispatcher`] – [`Dispatcher`][dispatcher::Dispatcher]: one tick waits
//!   for input, drains every ready channel into the state store, maps the
//!   combined state to a [`PlatformCommand`][tiltbridge_types::PlatformCommand]
//!   and sends it.  Optional idle timeout, neutral command on shutdown.
//! - [`watchdog`] – [`Watchdog`][watchdog::Watchdog]: reports channels that
//!   have gone quiet, and their recovery.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: console or
//!   JSON logs, plus OTLP span export when `OTEL_EXPORTER_OTLP_ENDPOINT` is
//!   set.

pub mod dispatcher;
pub mod telemetry;
pub mod watchdog;

pub use dispatcher::{DispatchSettings, Dispatcher, IdlePolicy, Tick};
pub use telemetry::{LogFormat, TracerProviderGuard, init_tracing};
pub use watchdog::{ChannelHealth, Watchdog};
