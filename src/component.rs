use crate::channel::DataChannel;
use crate::command::Command;
use crate::hal::StatusDisplay;
use crate::persist::{NvStorage, RestoreOutcome, StorageError};
use crate::telemetry::{DataLog, StateEntries, TelemetryError};
use alloc::string::String;
use alloc::vec::Vec;

/// Per-tick inputs handed to every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollContext {
    pub now: u32,
    /// Controller read period; 0 means manual (event-driven) reading.
    pub read_period_ms: u32,
}

impl PollContext {
    pub fn is_manual(&self) -> bool {
        self.read_period_ms == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    DataCommitted,
}

/// A pluggable controller capability.
///
/// Every hook has a default so an implementation only overrides what it
/// needs. Components that own channels expose them through `channels` and
/// `channels_mut`; components with persisted state report a non-zero
/// `state_size` and receive their offset before `restore_state` runs.
pub trait Component {
    fn id(&self) -> &str;

    fn init(&mut self) {}

    fn poll(&mut self, _ctx: &PollContext) -> PollOutcome {
        PollOutcome::Idle
    }

    fn channels(&self) -> &[DataChannel] {
        &[]
    }

    fn channels_mut(&mut self) -> &mut [DataChannel] {
        &mut []
    }

    /// Assigns consecutive indices starting at `start`; returns the next free one.
    fn register_channels(&mut self, start: u8) -> u8 {
        let mut next = start;
        for channel in self.channels_mut() {
            channel.assign_index(next);
            next = next.saturating_add(1);
        }
        next
    }

    fn clear_data(&mut self, force: bool) {
        for channel in self.channels_mut() {
            channel.clear(force);
        }
    }

    fn log_data(&mut self, log: &mut DataLog<'_>) -> Result<u32, TelemetryError> {
        let id = String::from(self.id());
        let shared = self.shares_time_offset();
        log.write_component(&id, shared, self.channels_mut())
    }

    /// Whether all channels share one acquisition time (`to` on the log
    /// instead of on each entry).
    fn shares_time_offset(&self) -> bool {
        false
    }

    /// Committed samples since the last clear, for count-based logging.
    fn read_count(&self) -> Option<u32> {
        None
    }

    /// Returns true if the command was claimed (and resolved) here.
    fn parse_command(&mut self, _command: &mut Command) -> bool {
        false
    }

    fn state_size(&self) -> usize {
        0
    }

    fn assign_state_offset(&mut self, _offset: usize) {}

    fn save_state(&self, _storage: &mut dyn NvStorage) -> Result<(), StorageError> {
        Ok(())
    }

    fn restore_state(&mut self, _storage: &mut dyn NvStorage) -> Result<RestoreOutcome, StorageError> {
        Ok(RestoreOutcome::Unassigned)
    }

    fn reset_state(&mut self) {}

    fn render_display_state(&self, _display: &mut dyn StatusDisplay) {}

    fn render_telemetry_state(&self, _state: &mut StateEntries) {}

    /// Appends the live (newest raw sample) entry of every channel.
    fn render_data_info(&mut self, out: &mut Vec<String>) {
        for channel in self.channels_mut() {
            channel.render_info();
            out.push(String::from(channel.rendered()));
        }
    }
}
