use crate::channel::{DataChannel, ParseOptions};
use crate::command::{Command, CommandError};
use crate::component::Component;
use crate::hal::StatusDisplay;
use crate::persist::{NvStorage, PersistedState, RecordReader, RecordWriter, RestoreOutcome, StateSlot, StorageError};
use crate::reader::{ByteClass, Field, Frame, Grammar, Instrument, ReaderConfig};
use crate::telemetry::StateEntries;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use tracing::debug;

pub const CMD_STABLE: &str = "stable";
pub const STABLE_FLAG: &str = "S";
/// Weigh-immediately request for time-driven reading.
pub const REQUEST_WEIGHT: &[u8] = b"SI\r\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceState {
    /// Drop frames whose stability flag is not `S`.
    pub stable_only: bool,
}

impl Default for BalanceState {
    fn default() -> Self {
        Self { stable_only: true }
    }
}

impl PersistedState for BalanceState {
    const VERSION: u8 = 1;
    const SIZE: usize = 1 + 1;

    fn encode(&self, out: &mut RecordWriter) {
        out.put_bool(self.stable_only);
    }

    fn decode(input: &mut RecordReader<'_>) -> Option<Self> {
        Some(Self { stable_only: input.get_bool()? })
    }
}

/// Balance answering with `S <flag> <value> <unit>\r\n` frames.
#[derive(Debug, Clone)]
pub struct Balance {
    id: String,
    grammar: Grammar,
    channels: Vec<DataChannel>,
    state: StateSlot<BalanceState>,
    options: ParseOptions,
}

impl Balance {
    pub fn new(id: impl Into<String>, unit: &str) -> Self {
        Self::with_state(id, unit, BalanceState::default())
    }

    pub fn with_state(id: impl Into<String>, unit: &str, defaults: BalanceState) -> Self {
        let grammar = Grammar::new()
            .literals(b"S ")
            .class(ByteClass::StableFlag, Field::Flag)
            .literal(b' ')
            .class(ByteClass::Digit, Field::Value)
            .literal(b' ')
            .class(ByteClass::UnitLetter, Field::Units)
            .literals(b"\r\n");
        Self {
            id: id.into(),
            grammar,
            channels: alloc::vec![DataChannel::new("weight", unit, 2)],
            state: StateSlot::new(defaults),
            options: ParseOptions {
                infer_precision: true,
                extra_digits: 1,
                ..ParseOptions::default()
            },
        }
    }

    pub fn reader_config() -> ReaderConfig {
        ReaderConfig {
            request: REQUEST_WEIGHT.to_vec(),
            ..ReaderConfig::default()
        }
    }

    pub fn state(&self) -> &BalanceState {
        self.state.get()
    }
}

impl Component for Balance {
    fn id(&self) -> &str {
        &self.id
    }

    fn channels(&self) -> &[DataChannel] {
        &self.channels
    }

    fn channels_mut(&mut self) -> &mut [DataChannel] {
        &mut self.channels
    }

    fn shares_time_offset(&self) -> bool {
        true
    }

    fn parse_command(&mut self, command: &mut Command) -> bool {
        if !command.parse_variable(CMD_STABLE) {
            return false;
        }
        command.extract_value();
        let stable_only = if command.parse_value("on") {
            true
        } else if command.parse_value("off") {
            false
        } else {
            command.error(CommandError::InvalidValue);
            return true;
        };
        let state = self.state.get_mut();
        let changed = state.stable_only != stable_only;
        state.stable_only = stable_only;
        command.success(changed);
        true
    }

    fn state_size(&self) -> usize {
        self.state.size()
    }

    fn assign_state_offset(&mut self, offset: usize) {
        self.state.assign_offset(offset);
    }

    fn save_state(&self, storage: &mut dyn NvStorage) -> Result<(), StorageError> {
        self.state.save(storage)
    }

    fn restore_state(&mut self, storage: &mut dyn NvStorage) -> Result<RestoreOutcome, StorageError> {
        self.state.restore(storage)
    }

    fn reset_state(&mut self) {
        self.state.reset();
    }

    fn render_display_state(&self, display: &mut dyn StatusDisplay) {
        let mode = if self.state.get().stable_only { "stable only" } else { "all reads" };
        display.print_line(2, &format!("{}: {mode}", self.id), false);
        if let Some(channel) = self.channels.first() {
            if let Some(value) = channel.newest_value() {
                display.print_line(3, &format!("{value:.2} {}", channel.unit()), false);
            }
        }
    }

    fn render_telemetry_state(&self, state: &mut StateEntries) {
        state.push_flag(CMD_STABLE, self.state.get().stable_only);
    }
}

impl Instrument for Balance {
    fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    fn accept_frame(&self, frame: &Frame, errors: u16) -> bool {
        if errors > 0 {
            return false;
        }
        if self.state.get().stable_only && frame.flag != STABLE_FLAG {
            debug!(component = self.id.as_str(), flag = frame.flag.as_str(), "unstable reading skipped");
            return false;
        }
        true
    }

    fn finish_data(&mut self, frame: &Frame, now: u32) -> bool {
        let Some(channel) = self.channels.first_mut() else {
            return false;
        };
        if !frame.units.is_empty() && frame.units != channel.unit() {
            debug!(
                component = self.id.as_str(),
                units = frame.units.as_str(),
                expected = channel.unit(),
                "reading in unexpected units skipped"
            );
            return false;
        }
        let Some(raw) = frame.value(0) else {
            return false;
        };
        channel.set_newest_value_str(raw, now, &self.options) && channel.save(true)
    }
}
