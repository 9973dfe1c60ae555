//! Controller-level command grammar.
//!
//! | command       | grammar                                  |
//! |---------------|------------------------------------------|
//! | `lock`        | `lock on\|off [notes]`                   |
//! | `state-log`   | `state-log on\|off [notes]`              |
//! | `data-log`    | `data-log on\|off [notes]`               |
//! | `log-period`  | `log-period <n><x\|s\|m\|h> [notes]`     |
//! | `read-period` | `read-period <n><ms\|s\|m>\|manual [notes]` |
//! | `reset`       | `reset data\|state [notes]`              |
//! | `restart`     | `restart [notes]`                        |

use super::state::{ControllerState, LogMode};
use crate::command::{Command, CommandError};
use crate::config::ControllerConfig;
use crate::telemetry::StateEntries;

pub const CMD_LOCK: &str = "lock";
pub const CMD_STATE_LOG: &str = "state-log";
pub const CMD_DATA_LOG: &str = "data-log";
pub const CMD_LOG_PERIOD: &str = "log-period";
pub const CMD_READ_PERIOD: &str = "read-period";
pub const CMD_RESET: &str = "reset";
pub const CMD_RESTART: &str = "restart";

pub const VALUE_ON: &str = "on";
pub const VALUE_OFF: &str = "off";
pub const VALUE_MANUAL: &str = "manual";
pub const VALUE_DATA: &str = "data";
pub const VALUE_STATE: &str = "state";

pub const UNIT_READS: &str = "x";
const LOG_PERIOD_UNITS: [(&str, u32); 3] = [("h", 3_600_000), ("m", 60_000), ("s", 1_000)];
const READ_PERIOD_UNITS: [(&str, u32); 3] = [("m", 60_000), ("s", 1_000), ("ms", 1)];

/// Follow-up the controller performs after a claimed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    None,
    /// Data logging was switched on: start from an empty log period.
    ClearData,
    ResetData,
    ResetState,
    Restart,
}

/// Runs the controller parsers in priority order. Returns `None` if the
/// command is not a controller command (and the controller is unlocked).
pub fn parse(command: &mut Command, state: &mut ControllerState, config: &ControllerConfig) -> Option<Directive> {
    if parse_lock(command, state) {
        return Some(Directive::None);
    }
    if state.locked {
        command.error(CommandError::Locked);
        return Some(Directive::None);
    }
    if parse_state_logging(command, state) {
        return Some(Directive::None);
    }
    if let Some(directive) = parse_data_logging(command, state) {
        return Some(directive);
    }
    if parse_log_period(command, state, config) {
        return Some(Directive::None);
    }
    if parse_read_period(command, state, config) {
        return Some(Directive::None);
    }
    if let Some(directive) = parse_reset(command) {
        return Some(directive);
    }
    parse_restart(command)
}

fn on_off(command: &mut Command) -> Option<bool> {
    command.extract_value();
    if command.parse_value(VALUE_ON) {
        Some(true)
    } else if command.parse_value(VALUE_OFF) {
        Some(false)
    } else {
        None
    }
}

fn apply_flag(command: &mut Command, flag: &mut bool) -> bool {
    match on_off(command) {
        Some(value) => {
            let changed = *flag != value;
            *flag = value;
            command.success(changed);
            changed
        }
        None => {
            command.error(CommandError::InvalidValue);
            false
        }
    }
}

fn parse_lock(command: &mut Command, state: &mut ControllerState) -> bool {
    if !command.parse_variable(CMD_LOCK) {
        return false;
    }
    apply_flag(command, &mut state.locked);
    true
}

fn parse_state_logging(command: &mut Command, state: &mut ControllerState) -> bool {
    if !command.parse_variable(CMD_STATE_LOG) {
        return false;
    }
    apply_flag(command, &mut state.state_logging);
    true
}

fn parse_data_logging(command: &mut Command, state: &mut ControllerState) -> Option<Directive> {
    if !command.parse_variable(CMD_DATA_LOG) {
        return None;
    }
    let changed = apply_flag(command, &mut state.data_logging);
    if changed && state.data_logging {
        Some(Directive::ClearData)
    } else {
        Some(Directive::None)
    }
}

fn scaled(command: &Command, units: &[(&str, u32)]) -> Option<Result<u32, CommandError>> {
    let factor = units.iter().find(|(unit, _)| command.parse_units(unit))?.1;
    let value = command.value_u32().filter(|v| *v > 0);
    Some(
        value
            .and_then(|v| v.checked_mul(factor))
            .ok_or(CommandError::InvalidValue),
    )
}

fn parse_log_period(command: &mut Command, state: &mut ControllerState, config: &ControllerConfig) -> bool {
    if !command.parse_variable(CMD_LOG_PERIOD) {
        return false;
    }
    if !command.extract_value_with_units() {
        command.error(CommandError::InvalidValue);
        return true;
    }
    let (mode, period) = if command.parse_units(UNIT_READS) {
        if !config.reader {
            command.error(CommandError::NotAReader);
            return true;
        }
        match command.value_u32().filter(|v| *v > 0) {
            Some(count) => (LogMode::Count, count),
            None => {
                command.error(CommandError::InvalidValue);
                return true;
            }
        }
    } else {
        match scaled(command, &LOG_PERIOD_UNITS) {
            Some(Ok(ms)) => (LogMode::Time, ms),
            Some(Err(e)) => {
                command.error(e);
                return true;
            }
            None => {
                command.error(CommandError::InvalidUnits);
                return true;
            }
        }
    };
    if mode == LogMode::Time && config.reader && !state.is_manual_reading() && period <= state.read_period_ms {
        command.error(CommandError::LogPeriodBelowReadPeriod);
        return true;
    }
    let changed = state.log_mode != mode || state.log_period != period;
    state.log_mode = mode;
    state.log_period = period;
    command.success(changed);
    true
}

fn parse_read_period(command: &mut Command, state: &mut ControllerState, config: &ControllerConfig) -> bool {
    if !command.parse_variable(CMD_READ_PERIOD) {
        return false;
    }
    if !config.reader {
        command.error(CommandError::NotAReader);
        return true;
    }
    if !command.extract_value_with_units() {
        command.error(CommandError::InvalidValue);
        return true;
    }
    let period = if command.parse_value(VALUE_MANUAL) {
        0
    } else {
        match scaled(command, &READ_PERIOD_UNITS) {
            Some(Ok(ms)) => ms,
            Some(Err(e)) => {
                command.error(e);
                return true;
            }
            None => {
                command.error(CommandError::InvalidUnits);
                return true;
            }
        }
    };
    if period > 0 && period < config.read_period_min_ms {
        command.error(CommandError::ReadPeriodBelowMinimum);
        return true;
    }
    if period > 0 && state.log_mode == LogMode::Time && state.log_period <= period {
        command.error(CommandError::LogPeriodBelowReadPeriod);
        return true;
    }
    let changed = state.read_period_ms != period;
    state.read_period_ms = period;
    command.success(changed);
    true
}

fn parse_reset(command: &mut Command) -> Option<Directive> {
    if !command.parse_variable(CMD_RESET) {
        return None;
    }
    command.extract_value();
    let directive = if command.parse_value(VALUE_DATA) {
        Directive::ResetData
    } else if command.parse_value(VALUE_STATE) {
        Directive::ResetState
    } else {
        command.error(CommandError::InvalidValue);
        return Some(Directive::None);
    };
    command.success(true);
    Some(directive)
}

fn parse_restart(command: &mut Command) -> Option<Directive> {
    if !command.parse_variable(CMD_RESTART) {
        return None;
    }
    command.success(true);
    Some(Directive::Restart)
}

/// Largest unit that divides `ms` exactly; falls back to the last one.
fn best_unit(ms: u32, units: &[(&'static str, u32)]) -> (u32, &'static str) {
    units
        .iter()
        .find(|(_, factor)| ms % factor == 0)
        .or(units.last())
        .map_or((ms, ""), |(unit, factor)| (ms / factor, *unit))
}

pub fn render_state(state: &ControllerState, config: &ControllerConfig, out: &mut StateEntries) {
    out.push_flag(CMD_LOCK, state.locked);
    out.push_flag(CMD_STATE_LOG, state.state_logging);
    out.push_flag(CMD_DATA_LOG, state.data_logging);
    match state.log_mode {
        LogMode::Count => out.push_scalar(CMD_LOG_PERIOD, f64::from(state.log_period), UNIT_READS),
        LogMode::Time => {
            let (value, unit) = best_unit(state.log_period, &LOG_PERIOD_UNITS);
            out.push_scalar(CMD_LOG_PERIOD, f64::from(value), unit);
        }
    }
    if config.reader {
        if state.is_manual_reading() {
            out.push_text(CMD_READ_PERIOD, VALUE_MANUAL);
        } else {
            let (value, unit) = best_unit(state.read_period_ms, &READ_PERIOD_UNITS);
            out.push_scalar(CMD_READ_PERIOD, f64::from(value), unit);
        }
    }
}
