//! Readiness multiplexer.
//!
//! Waits on every attached channel at once and, as soon as at least one has
//! a frame, drains *all* channels that are ready into the
//! [`ChannelState`] store.
//!
//! # Algorithm
//!
//! Each [`Subscriber`] is turned into a stream of `(channel, frame)` items
//! and merged into a [`SelectAll`].  The receive futures live inside the
//! streams, so dropping a pending [`Multiplexer::wait_and_drain`] (for
//! example on an idle timeout) never loses a half-read frame.
//!
//! 1. Await the first item – the only suspension point.  The task is parked
//!    by the reactor until a socket becomes readable; no polling.
//! 2. Poll the merged stream without waiting until nothing is ready or the
//!    per-call budget is spent.  [`SelectAll`] re-queues a stream after it
//!    yields, so every ready channel is served before any is served twice.
//!    These polls run outside Tokio's cooperative budget: once the task's
//!    budget is spent, ready sockets and channels report `Pending`, which
//!    would otherwise end the drain with a ready channel left unserved.
//! 3. Every frame is decoded and written to its slot in arrival order.  A
//!    decode failure is logged and recorded; the slot keeps its previous
//!    value and draining continues.

use std::collections::BTreeSet;

use futures_util::stream::{self, BoxStream, SelectAll};
use futures_util::{FutureExt, StreamExt};
use tiltbridge_types::{BridgeError, ChannelId};
use tracing::{debug, warn};

use crate::decoder::DEFAULT_SEPARATOR;
use crate::state::ChannelState;
use crate::transport::Subscriber;

/// Upper bound on frames taken per [`Multiplexer::wait_and_drain`] call so a
/// flooding publisher cannot keep the loop from mapping.
pub const DEFAULT_DRAIN_BUDGET: usize = 64;

type Item = (ChannelId, Result<Vec<u8>, BridgeError>);

/// Outcome of one [`Multiplexer::wait_and_drain`] call.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Channels whose slot received at least one valid record.
    pub updated: BTreeSet<ChannelId>,
    /// Frames that could not be decoded or received, per channel.
    pub failures: Vec<(ChannelId, BridgeError)>,
    /// Total frames taken off the wire, valid or not.
    pub frames: usize,
}

/// Fair, blocking merge of N subscription channels.
pub struct Multiplexer {
    streams: SelectAll<BoxStream<'static, Item>>,
    channels: BTreeSet<ChannelId>,
    separator: char,
    drain_budget: usize,
}

impl Multiplexer {
    pub fn new() -> Self {
        Self {
            streams: SelectAll::new(),
            channels: BTreeSet::new(),
            separator: DEFAULT_SEPARATOR,
            drain_budget: DEFAULT_DRAIN_BUDGET,
        }
    }

    /// Separator between topic and payload used when decoding.
    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_drain_budget(mut self, budget: usize) -> Self {
        self.drain_budget = budget.max(1);
        self
    }

    /// Attach `subscriber` as the source for `channel`.
    pub fn attach(&mut self, channel: ChannelId, subscriber: Box<dyn Subscriber>) {
        self.channels.insert(channel);
        self.streams.push(subscriber_stream(channel, subscriber));
    }

    /// Channels that have been attached.
    pub fn channels(&self) -> &BTreeSet<ChannelId> {
        &self.channels
    }

    /// Block until at least one channel is ready, then drain every ready
    /// channel into `state`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::ChannelsClosed`] when every attached channel has closed
    /// (or none were attached).  Per-frame failures are reported in the
    /// [`DrainReport`] instead.
    pub async fn wait_and_drain(&mut self, state: &mut ChannelState) -> Result<DrainReport, BridgeError> {
        let Some(first) = self.streams.next().await else {
            return Err(BridgeError::ChannelsClosed);
        };

        let mut report = DrainReport::default();
        self.absorb(first, state, &mut report);

        while report.frames < self.drain_budget {
            match tokio::task::unconstrained(self.streams.next()).now_or_never() {
                Some(Some(item)) => self.absorb(item, state, &mut report),
                // Nothing ready, or every stream just ended.
                _ => break,
            }
        }

        debug!(
            frames = report.frames,
            updated = ?report.updated,
            failures = report.failures.len(),
            "drained ready channels"
        );
        Ok(report)
    }

    fn absorb(&self, (channel, frame): Item, state: &mut ChannelState, report: &mut DrainReport) {
        report.frames += 1;
        let result = frame.and_then(|raw| state.apply(channel, &raw, self.separator));
        match result {
            Ok(()) => {
                report.updated.insert(channel);
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "frame rejected; keeping previous state");
                report.failures.push((channel, e));
            }
        }
    }
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapt a subscriber into an endless stream that ends when the source
/// reports it is closed.
fn subscriber_stream(channel: ChannelId, subscriber: Box<dyn Subscriber>) -> BoxStream<'static, Item> {
    stream::unfold(Some(subscriber), move |subscriber| async move {
        let mut subscriber = subscriber?;
        match subscriber.receive().await {
            Ok(Some(frame)) => Some(((channel, Ok(frame)), Some(subscriber))),
            Ok(None) => {
                warn!(channel = %channel, topic = subscriber.topic(), "subscription closed");
                None
            }
            Err(e) => Some(((channel, Err(e)), Some(subscriber))),
        }
    })
    .boxed()
}
