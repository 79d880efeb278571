//! The dispatch loop.
//!
//! One [`Dispatcher::tick`] is: wait for input and drain every ready channel,
//! map the combined state to a command, send it.  Ticks never overlap, so the
//! mapper always sees a fully drained snapshot of both channels.
//!
//! ```text
//!   Multiplexer ──drain──▶ ChannelState ──map──▶ PlatformCommand ──send──▶ Platform
//! ```
//!
//! # Idle behaviour
//!
//! By default the wait has no timeout: with no input the loop stalls and the
//! platform keeps whatever it was last told.  With an idle timeout set, an
//! expired wait still completes a tick using the configured [`IdlePolicy`].

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tiltbridge_hal::{CommandMapper, Platform};
use tiltbridge_middleware::{ChannelState, Multiplexer};
use tiltbridge_types::{BridgeError, ChannelId, PlatformCommand};
use tracing::{debug, info, warn};

use crate::watchdog::{ChannelHealth, Watchdog};

/// What to send when the idle timeout expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdlePolicy {
    /// Re-send the last command.
    #[default]
    Hold,
    /// Level the platform.
    Neutral,
}

/// Loop tuning.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    /// `None` waits for input forever.
    pub idle_timeout: Option<Duration>,
    pub idle_policy: IdlePolicy,
    /// Silence after which a channel is reported stale.
    pub stale_after: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            idle_timeout: None,
            idle_policy: IdlePolicy::Hold,
            stale_after: Duration::from_secs(1),
        }
    }
}

/// Result of a completed tick.
#[derive(Debug, Clone, PartialEq)]
pub enum Tick {
    /// Input arrived; `updated` lists the channels that took a new record.
    Input {
        command: PlatformCommand,
        updated: BTreeSet<ChannelId>,
    },
    /// The idle timeout expired before any input.
    Idle { command: PlatformCommand },
}

impl Tick {
    pub fn command(&self) -> &PlatformCommand {
        match self {
            Tick::Input { command, .. } | Tick::Idle { command } => command,
        }
    }
}

/// Owns the channels, the state store and the platform link.
pub struct Dispatcher<P: Platform> {
    mux: Multiplexer,
    state: ChannelState,
    mapper: CommandMapper,
    platform: P,
    settings: DispatchSettings,
    watchdog: Watchdog,
    last_command: PlatformCommand,
    ticks: u64,
    send_failures: u64,
}

impl<P: Platform> Dispatcher<P> {
    pub fn new(mux: Multiplexer, mapper: CommandMapper, platform: P, settings: DispatchSettings) -> Self {
        let mut watchdog = Watchdog::new(settings.stale_after);
        for channel in mux.channels() {
            watchdog.register(*channel);
        }
        Self {
            mux,
            state: ChannelState::new(),
            mapper,
            platform,
            settings,
            watchdog,
            last_command: PlatformCommand::NEUTRAL,
            ticks: 0,
            send_failures: 0,
        }
    }

    pub fn state(&self) -> &ChannelState {
        &self.state
    }

    /// The command most recently handed to the platform, neutral before the
    /// first tick.
    pub fn last_command(&self) -> PlatformCommand {
        self.last_command
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn send_failures(&self) -> u64 {
        self.send_failures
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Run one wait → drain → map → send cycle.
    ///
    /// # Errors
    ///
    /// Only [`BridgeError::ChannelsClosed`].  Decode and send failures are
    /// logged and the tick still completes.
    pub async fn tick(&mut self) -> Result<Tick, BridgeError> {
        let wait = self.mux.wait_and_drain(&mut self.state);
        let drained = match self.settings.idle_timeout {
            None => Some(wait.await?),
            Some(limit) => match tokio::time::timeout(limit, wait).await {
                Ok(report) => Some(report?),
                Err(_) => None,
            },
        };
        self.ticks += 1;

        let outcome = match drained {
            Some(report) => {
                let command = self.mapper.map(self.state.driver_input(), self.state.panel());
                Tick::Input {
                    command,
                    updated: report.updated,
                }
            }
            None => {
                let command = match self.settings.idle_policy {
                    IdlePolicy::Hold => self.last_command,
                    IdlePolicy::Neutral => PlatformCommand::NEUTRAL,
                };
                debug!(policy = ?self.settings.idle_policy, "no input before idle timeout");
                Tick::Idle { command }
            }
        };

        self.log_staleness();
        self.dispatch(*outcome.command()).await;
        Ok(outcome)
    }

    /// Tick until every channel has closed.
    pub async fn run(&mut self) -> Result<(), BridgeError> {
        info!(
            channels = ?self.mux.channels(),
            mapping = %self.mapper.mode(),
            platform = %self.platform.destination(),
            idle_timeout = ?self.settings.idle_timeout,
            "dispatch loop started"
        );
        loop {
            self.tick().await?;
        }
    }

    /// Level the platform before the process exits.
    pub async fn shutdown(&mut self) {
        info!(ticks = self.ticks, send_failures = self.send_failures, "sending neutral command on shutdown");
        self.dispatch(PlatformCommand::NEUTRAL).await;
    }

    async fn dispatch(&mut self, command: PlatformCommand) {
        if let Err(e) = self.platform.send(&command).await {
            self.send_failures += 1;
            warn!(error = %e, platform = %self.platform.destination(), "platform send failed");
        }
        self.last_command = command;
    }

    fn log_staleness(&mut self) {
        for (channel, health) in self.watchdog.transitions(&self.state) {
            let updates = self.state.updates(channel);
            match health {
                ChannelHealth::Stale => warn!(
                    channel = %channel,
                    silent_for = ?self.watchdog.stale_after(),
                    updates,
                    "channel went stale; holding its last record"
                ),
                ChannelHealth::Fresh => info!(channel = %channel, updates, "channel recovered"),
            }
        }
    }

    /// Staleness of `channel` as of now.
    pub fn channel_health(&self, channel: ChannelId) -> ChannelHealth {
        self.watchdog.health(channel, &self.state)
    }
}
