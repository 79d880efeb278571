//! `tiltbridge-middleware` – subscription plumbing.
//!
//! Moves raw frames from the simulation's publishers into typed per-channel
//! state without caring what the values mean.
//!
//! # Modules
//!
//! - [`transport`] – the [`Subscriber`] seam and the [`SpSubscriber`] SUB
//!   socket for `tcp://` and `ipc://` publishers.
//! - [`bus`] – in-process [`FrameBus`] with topic-filtered subscribers.
//! - [`decoder`] – strips the topic label and parses the JSON record.
//! - [`state`] – [`ChannelState`], the latest record per channel.
//! - [`multiplexer`] – [`Multiplexer`], the fair blocking wait over every
//!   channel that drains ready frames into the state store.

pub mod bus;
pub mod decoder;
pub mod multiplexer;
pub mod state;
pub mod transport;

pub use bus::{BusSubscriber, FrameBus};
pub use multiplexer::{DrainReport, Multiplexer};
pub use state::ChannelState;
pub use transport::{Endpoint, SpSubscriber, Subscriber};
