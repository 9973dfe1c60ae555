use crate::command::{Command, CommandError};
use crate::component::Component;
use crate::hal::StatusDisplay;
use crate::persist::{NvStorage, PersistedState, RecordReader, RecordWriter, RestoreOutcome, StateSlot, StorageError};
use crate::telemetry::StateEntries;
use alloc::format;
use alloc::string::String;
use serde_json::json;
use tracing::info;

pub const CMD_SPEED: &str = "speed";
pub const CMD_STIR: &str = "stir";
pub const UNIT_RPM: &str = "rpm";

/// Motor driver output.
pub trait RateSink {
    /// 0 stops the motor.
    fn set_rate(&mut self, rpm: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StirrerState {
    pub running: bool,
    pub speed_rpm: u32,
}

impl PersistedState for StirrerState {
    const VERSION: u8 = 1;
    const SIZE: usize = 1 + 1 + 4;

    fn encode(&self, out: &mut RecordWriter) {
        out.put_bool(self.running);
        out.put_u32(self.speed_rpm);
    }

    fn decode(input: &mut RecordReader<'_>) -> Option<Self> {
        Some(Self {
            running: input.get_bool()?,
            speed_rpm: input.get_u32()?,
        })
    }
}

/// Stirrer with a persisted target speed. It owns no data channels.
pub struct Stirrer<R> {
    id: String,
    sink: R,
    max_rpm: u32,
    state: StateSlot<StirrerState>,
}

impl<R: RateSink> Stirrer<R> {
    pub fn new(id: impl Into<String>, sink: R, max_rpm: u32) -> Self {
        Self {
            id: id.into(),
            sink,
            max_rpm,
            state: StateSlot::new(StirrerState::default()),
        }
    }

    pub fn state(&self) -> &StirrerState {
        self.state.get()
    }

    pub fn sink(&self) -> &R {
        &self.sink
    }

    fn apply(&mut self) -> u32 {
        let state = *self.state.get();
        let rpm = if state.running { state.speed_rpm } else { 0 };
        self.sink.set_rate(rpm);
        info!(component = self.id.as_str(), rpm, "stirrer rate applied");
        rpm
    }

    fn apply_for(&mut self, command: &mut Command) {
        let rpm = self.apply();
        command.set_payload(json!({ "component": self.id, "rpm": rpm }));
    }

    fn parse_speed(&mut self, command: &mut Command) {
        if !command.extract_value_with_units() {
            command.error(CommandError::InvalidValue);
            return;
        }
        if !command.parse_units(UNIT_RPM) {
            command.error(CommandError::InvalidUnits);
            return;
        }
        let Some(rpm) = command.value_u32().filter(|rpm| *rpm <= self.max_rpm) else {
            command.error(CommandError::InvalidValue);
            return;
        };
        let state = self.state.get_mut();
        let changed = state.speed_rpm != rpm;
        state.speed_rpm = rpm;
        command.success(changed);
        if changed {
            self.apply_for(command);
        }
    }

    fn parse_stir(&mut self, command: &mut Command) {
        command.extract_value();
        let running = if command.parse_value("on") {
            true
        } else if command.parse_value("off") {
            false
        } else {
            command.error(CommandError::InvalidValue);
            return;
        };
        let state = self.state.get_mut();
        let changed = state.running != running;
        state.running = running;
        command.success(changed);
        if changed {
            self.apply_for(command);
        }
    }
}

impl<R: RateSink> Component for Stirrer<R> {
    fn id(&self) -> &str {
        &self.id
    }

    fn init(&mut self) {
        self.apply();
    }

    fn parse_command(&mut self, command: &mut Command) -> bool {
        if command.parse_variable(CMD_SPEED) {
            self.parse_speed(command);
            true
        } else if command.parse_variable(CMD_STIR) {
            self.parse_stir(command);
            true
        } else {
            false
        }
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
        self.apply();
    }

    fn render_display_state(&self, display: &mut dyn StatusDisplay) {
        let state = self.state.get();
        let text = if state.running {
            format!("{}: {} rpm", self.id, state.speed_rpm)
        } else {
            format!("{}: off", self.id)
        };
        display.print_line(3, &text, false);
    }

    fn render_telemetry_state(&self, entries: &mut StateEntries) {
        let state = self.state.get();
        entries.push_flag(CMD_STIR, state.running);
        entries.push_scalar(CMD_SPEED, f64::from(state.speed_rpm), UNIT_RPM);
    }
}
