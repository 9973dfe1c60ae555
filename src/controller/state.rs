use crate::persist::{PersistedState, RecordReader, RecordWriter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    /// `log_period` is in milliseconds.
    Time,
    /// `log_period` is a number of committed reads, counted per component.
    Count,
}

impl LogMode {
    fn to_byte(self) -> u8 {
        match self {
            LogMode::Time => 0,
            LogMode::Count => 1,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(LogMode::Time),
            1 => Some(LogMode::Count),
            _ => None,
        }
    }
}

/// Controller-level persisted settings, stored at offset 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerState {
    pub locked: bool,
    pub state_logging: bool,
    pub data_logging: bool,
    pub log_mode: LogMode,
    pub log_period: u32,
    /// 0 = manual reading.
    pub read_period_ms: u32,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self {
            locked: false,
            state_logging: true,
            data_logging: false,
            log_mode: LogMode::Time,
            log_period: 60_000,
            read_period_ms: 5_000,
        }
    }
}

impl ControllerState {
    pub fn is_manual_reading(&self) -> bool {
        self.read_period_ms == 0
    }
}

impl PersistedState for ControllerState {
    const VERSION: u8 = 1;
    const SIZE: usize = 1 + 4 + 4 + 4;

    fn encode(&self, out: &mut RecordWriter) {
        out.put_bool(self.locked);
        out.put_bool(self.state_logging);
        out.put_bool(self.data_logging);
        out.put_u8(self.log_mode.to_byte());
        out.put_u32(self.log_period);
        out.put_u32(self.read_period_ms);
    }

    fn decode(input: &mut RecordReader<'_>) -> Option<Self> {
        Some(Self {
            locked: input.get_bool()?,
            state_logging: input.get_bool()?,
            data_logging: input.get_bool()?,
            log_mode: LogMode::from_byte(input.get_u8()?)?,
            log_period: input.get_u32()?,
            read_period_ms: input.get_u32()?,
        })
    }
}
