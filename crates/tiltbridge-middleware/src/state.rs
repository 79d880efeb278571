//! Channel state store.
//!
//! One slot per [`ChannelId`], each holding the most recently decoded record
//! for that channel.  Slots start at the documented defaults (all-zero driver
//! input, platform enabled) and are overwritten in place; no history is kept.
//!
//! The store is owned by the dispatch loop and passed by reference to the
//! multiplexer (writer) and the mapper (reader).  It is not shared across
//! threads.

use std::collections::HashMap;
use std::time::Instant;

use tiltbridge_types::{BridgeError, ChannelId, DriverInput, PanelConfig, Record};

use crate::decoder;

/// Per-channel bookkeeping alongside the record itself.
#[derive(Debug, Clone, Copy, Default)]
struct SlotMeta {
    updates: u64,
    last_update: Option<Instant>,
}

/// Latest known record per channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelState {
    driver_input: DriverInput,
    panel: PanelConfig,
    meta: HashMap<ChannelId, SlotMeta>,
}

impl ChannelState {
    /// Create a store with every slot at its default record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the last known record for `channel`, or its default.
    pub fn get(&self, channel: ChannelId) -> Record {
        match channel {
            ChannelId::DriverInput => Record::DriverInput(self.driver_input),
            ChannelId::ControlPanel => Record::Panel(self.panel),
        }
    }

    /// Overwrite the slot the record belongs to.
    pub fn set(&mut self, record: Record) {
        match record {
            Record::DriverInput(input) => self.driver_input = input,
            Record::Panel(panel) => self.panel = panel,
        }
        let meta = self.meta.entry(record.channel()).or_default();
        meta.updates += 1;
        meta.last_update = Some(Instant::now());
    }

    /// Decode `raw` for `channel` and store it.
    ///
    /// On failure the slot keeps its previous value and the error is handed
    /// back for reporting.
    pub fn apply(&mut self, channel: ChannelId, raw: &[u8], separator: char) -> Result<(), BridgeError> {
        let record = decoder::decode_for(channel, raw, separator)?;
        self.set(record);
        Ok(())
    }

    pub fn driver_input(&self) -> &DriverInput {
        &self.driver_input
    }

    pub fn panel(&self) -> &PanelConfig {
        &self.panel
    }

    /// Number of successful updates `channel` has received.
    pub fn updates(&self, channel: ChannelId) -> u64 {
        self.meta.get(&channel).map_or(0, |m| m.updates)
    }

    /// When `channel` last received a valid record, if ever.
    pub fn last_update(&self, channel: ChannelId) -> Option<Instant> {
        self.meta.get(&channel).and_then(|m| m.last_update)
    }
}
