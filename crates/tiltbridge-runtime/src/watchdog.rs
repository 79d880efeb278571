//! [`Watchdog`] – per-channel staleness tracking.
//!
//! The watchdog keeps no clock of its own for updates: it reads
//! [`ChannelState::last_update`], which the state store stamps on every
//! successfully decoded record.  The dispatch loop polls
//! [`Watchdog::transitions`] once per tick.  A channel that has been silent
//! for longer than `stale_after` is reported once as
//! [`ChannelHealth::Stale`]; its next record reports it once as
//! [`ChannelHealth::Fresh`] again.
//!
//! A channel that has never delivered a record is measured from the moment it
//! was registered.
//!
//! Without an idle timeout the loop only wakes on input, so a fully silent
//! system never reaches a check.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tiltbridge_middleware::ChannelState;
use tiltbridge_types::ChannelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelHealth {
    /// Updated within the staleness window.
    Fresh,
    /// Silent for longer than the staleness window.
    Stale,
}

struct Entry {
    registered_at: Instant,
    reported_stale: bool,
}

/// Reports channels of a [`ChannelState`] that have gone quiet.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tiltbridge_middleware::ChannelState;
/// use tiltbridge_runtime::watchdog::{ChannelHealth, Watchdog};
/// use tiltbridge_types::{ChannelId, PanelConfig};
///
/// let mut state = ChannelState::new();
/// let mut wd = Watchdog::new(Duration::from_secs(1));
/// wd.register(ChannelId::ControlPanel);
/// state.set(PanelConfig::default().into());
///
/// assert_eq!(wd.health(ChannelId::ControlPanel, &state), ChannelHealth::Fresh);
/// ```
pub struct Watchdog {
    stale_after: Duration,
    channels: HashMap<ChannelId, Entry>,
}

impl Watchdog {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            stale_after,
            channels: HashMap::new(),
        }
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    /// Start tracking `channel`; its window opens now.
    pub fn register(&mut self, channel: ChannelId) {
        self.channels.insert(
            channel,
            Entry {
                registered_at: Instant::now(),
                reported_stale: false,
            },
        );
    }

    /// Current health of `channel`.  Unregistered channels are stale.
    pub fn health(&self, channel: ChannelId, state: &ChannelState) -> ChannelHealth {
        match self.channels.get(&channel) {
            Some(entry) if !self.is_silent(channel, entry, state) => ChannelHealth::Fresh,
            _ => ChannelHealth::Stale,
        }
    }

    /// Channels whose health changed since the previous call, sorted.
    pub fn transitions(&mut self, state: &ChannelState) -> Vec<(ChannelId, ChannelHealth)> {
        let mut changed = Vec::new();
        for (channel, entry) in &self.channels {
            let stale = self.is_silent(*channel, entry, state);
            if stale != entry.reported_stale {
                let health = if stale {
                    ChannelHealth::Stale
                } else {
                    ChannelHealth::Fresh
                };
                changed.push((*channel, health));
            }
        }
        for (channel, health) in &changed {
            if let Some(entry) = self.channels.get_mut(channel) {
                entry.reported_stale = *health == ChannelHealth::Stale;
            }
        }
        changed.sort_by_key(|(channel, _)| *channel);
        changed
    }

    fn is_silent(&self, channel: ChannelId, entry: &Entry, state: &ChannelState) -> bool {
        let last_seen = state
            .last_update(channel)
            .map_or(entry.registered_at, |at| at.max(entry.registered_at));
        last_seen.elapsed() > self.stale_after
    }
}
