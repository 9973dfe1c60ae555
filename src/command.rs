use heapless::String;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

pub const MAX_COMMAND_LENGTH: usize = 63;
pub const MAX_VARIABLE_LENGTH: usize = 25;
pub const MAX_VALUE_LENGTH: usize = 20;
pub const MAX_UNITS_LENGTH: usize = 20;
pub const MAX_NOTES_LENGTH: usize = MAX_COMMAND_LENGTH;
pub const MAX_MESSAGE_LENGTH: usize = 50;

/// Signed return codes reported back to the backend for every command.
pub mod codes {
    pub const SUCCESS: i16 = 0;
    pub const NO_CHANGE: i16 = 1;
    pub const ERROR: i16 = -1;
    pub const LOCKED: i16 = -2;
    pub const INVALID_COMMAND: i16 = -3;
    pub const INVALID_VALUE: i16 = -4;
    pub const INVALID_UNITS: i16 = -5;
    pub const NOT_A_READER: i16 = -6;
    pub const LOG_BELOW_READ: i16 = -7;
    pub const READ_BELOW_MINIMUM: i16 = -8;
    pub const UNDEFINED: i16 = -100;
}

pub const NO_CHANGE_MESSAGE: &str = "already as requested";

/// Canonical command failures shared by the controller and all components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("locked")]
    Locked,
    #[error("invalid command")]
    InvalidCommand,
    #[error("invalid value")]
    InvalidValue,
    #[error("invalid units")]
    InvalidUnits,
    #[error("not a data reader")]
    NotAReader,
    #[error("log period must exceed read period")]
    LogPeriodBelowReadPeriod,
    #[error("read period below minimum")]
    ReadPeriodBelowMinimum,
}

impl CommandError {
    pub const fn code(self) -> i16 {
        match self {
            CommandError::Locked => codes::LOCKED,
            CommandError::InvalidCommand => codes::INVALID_COMMAND,
            CommandError::InvalidValue => codes::INVALID_VALUE,
            CommandError::InvalidUnits => codes::INVALID_UNITS,
            CommandError::NotAReader => codes::NOT_A_READER,
            CommandError::LogPeriodBelowReadPeriod => codes::LOG_BELOW_READ,
            CommandError::ReadPeriodBelowMinimum => codes::READ_BELOW_MINIMUM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CommandOutcome {
    #[default]
    Undefined,
    Success,
    Warning(i16),
    Error(i16),
}

impl CommandOutcome {
    pub const fn code(self) -> i16 {
        match self {
            CommandOutcome::Undefined => codes::UNDEFINED,
            CommandOutcome::Success => codes::SUCCESS,
            CommandOutcome::Warning(code) | CommandOutcome::Error(code) => code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LogType {
    #[default]
    Undefined,
    StateChanged,
    StateUnchanged,
    Error,
    Startup,
}

impl LogType {
    pub const fn as_str(self) -> &'static str {
        match self {
            LogType::Undefined => "undefined",
            LogType::StateChanged => "state changed",
            LogType::StateUnchanged => "state unchanged",
            LogType::Error => "error",
            LogType::Startup => "startup",
        }
    }
}

/// One textual instruction: `<variable> <value> [<units>] [notes]`.
///
/// The same instance is reused for every received command; `load` resets
/// it. Parsers pull tokens off the front of the remaining buffer and exactly
/// one of them resolves the outcome.
#[derive(Debug, Clone, Default)]
pub struct Command {
    text: String<MAX_COMMAND_LENGTH>,
    buffer: String<MAX_COMMAND_LENGTH>,
    variable: String<MAX_VARIABLE_LENGTH>,
    value: String<MAX_VALUE_LENGTH>,
    units: String<MAX_UNITS_LENGTH>,
    notes: String<MAX_NOTES_LENGTH>,
    message: String<MAX_MESSAGE_LENGTH>,
    payload: Option<Value>,
    outcome: CommandOutcome,
    log_type: LogType,
    truncated: bool,
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, text: &str) {
        *self = Self::default();
        let text = text.trim();
        if !fill(&mut self.text, text) {
            self.mark_truncated("command");
        }
        self.buffer = self.text.clone();
    }

    pub fn extract_variable(&mut self) -> bool {
        let complete = take_token(&mut self.buffer, &mut self.variable);
        if !complete {
            self.mark_truncated("variable");
        }
        !self.variable.is_empty()
    }

    pub fn extract_value(&mut self) -> bool {
        let complete = take_token(&mut self.buffer, &mut self.value);
        if !complete {
            self.mark_truncated("value");
        }
        !self.value.is_empty()
    }

    pub fn extract_units(&mut self) -> bool {
        let complete = take_token(&mut self.buffer, &mut self.units);
        if !complete {
            self.mark_truncated("units");
        }
        !self.units.is_empty()
    }

    /// Extracts a value that may carry its units inline (`100ms`, `5x`).
    /// Falls back to reading the units from the next token. Words such as
    /// `manual` have no numeric prefix and are kept whole.
    pub fn extract_value_with_units(&mut self) -> bool {
        if !self.extract_value() {
            return false;
        }
        let numeric = self
            .value
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.'));
        let split = if numeric {
            self.value
                .char_indices()
                .find(|&(i, c)| i > 0 && c.is_ascii_alphabetic())
                .map(|(i, _)| i)
        } else {
            None
        };
        match split {
            Some(i) => {
                let mut units = String::new();
                // units are a suffix of value, so they always fit
                let _ = fill(&mut units, &self.value[i..]);
                self.units = units;
                self.value.truncate(i);
                true
            }
            None => {
                self.extract_units();
                true
            }
        }
    }

    pub fn assign_notes(&mut self) {
        let mut notes = String::new();
        if !fill(&mut notes, self.buffer.trim()) {
            self.mark_truncated("notes");
        }
        self.notes = notes;
    }

    pub fn parse_variable(&self, variable: &str) -> bool {
        self.variable.as_str() == variable
    }

    pub fn parse_value(&self, value: &str) -> bool {
        self.value.as_str() == value
    }

    pub fn parse_units(&self, units: &str) -> bool {
        self.units.as_str() == units
    }

    pub fn value_u32(&self) -> Option<u32> {
        self.value.parse().ok()
    }

    /// Resolves the command as applied. An unchanged state resolves to the
    /// no-change warning instead.
    pub fn success(&mut self, state_changed: bool) {
        if state_changed {
            self.outcome = CommandOutcome::Success;
            self.log_type = LogType::StateChanged;
            self.message.clear();
        } else {
            self.outcome = CommandOutcome::Warning(codes::NO_CHANGE);
            self.log_type = LogType::StateUnchanged;
            self.set_message(NO_CHANGE_MESSAGE);
        }
        self.assign_notes();
    }

    pub fn warning(&mut self, code: i16, text: &str) {
        self.outcome = CommandOutcome::Warning(code);
        self.set_message(text);
    }

    pub fn error_code(&mut self, code: i16, text: &str) {
        self.outcome = CommandOutcome::Error(code);
        self.set_message(text);
        self.notes.clear();
        // text and notes share a capacity
        let _ = fill(&mut self.notes, &self.text);
        self.log_type = LogType::Error;
    }

    pub fn error(&mut self, error: CommandError) {
        let text = alloc::string::ToString::to_string(&error);
        self.error_code(error.code(), &text);
    }

    /// Structured detail attached by the resolving parser.
    pub fn set_payload(&mut self, payload: Value) {
        self.payload = Some(payload);
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome != CommandOutcome::Undefined
    }

    pub fn has_state_changed(&self) -> bool {
        self.outcome == CommandOutcome::Success && self.log_type == LogType::StateChanged
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn remaining(&self) -> &str {
        &self.buffer
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn units(&self) -> &str {
        &self.units
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn outcome(&self) -> CommandOutcome {
        self.outcome
    }

    pub fn code(&self) -> i16 {
        self.outcome.code()
    }

    pub fn log_type(&self) -> LogType {
        self.log_type
    }

    /// True if any token or the raw text lost characters to a full field.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    fn set_message(&mut self, text: &str) {
        self.message.clear();
        let _ = fill(&mut self.message, text);
    }

    fn mark_truncated(&mut self, field: &'static str) {
        self.truncated = true;
        warn!(field, text = self.text.as_str(), "command token exceeds field capacity, remainder dropped");
    }
}

/// Copies as much of `src` as fits; returns false if anything was dropped.
fn fill<const N: usize>(dst: &mut String<N>, src: &str) -> bool {
    for c in src.chars() {
        if dst.push(c).is_err() {
            return false;
        }
    }
    true
}

fn take_token<const N: usize>(buffer: &mut String<MAX_COMMAND_LENGTH>, dst: &mut String<N>) -> bool {
    let rest = buffer.trim_start();
    let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let (token, remainder) = rest.split_at(end);
    dst.clear();
    let complete = fill(dst, token);
    let mut next = String::new();
    let _ = fill(&mut next, remainder.trim_start());
    *buffer = next;
    complete
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_token_advances_buffer() {
        let mut buffer: String<MAX_COMMAND_LENGTH> = String::new();
        fill(&mut buffer, "  alpha   beta gamma");
        let mut token: String<8> = String::new();
        assert!(take_token(&mut buffer, &mut token));
        assert_eq!(token.as_str(), "alpha");
        assert_eq!(buffer.as_str(), "beta gamma");
    }

    #[test]
    fn test_take_token_drops_overflow() {
        let mut buffer: String<MAX_COMMAND_LENGTH> = String::new();
        fill(&mut buffer, "abcdefghij rest");
        let mut token: String<4> = String::new();
        assert!(!take_token(&mut buffer, &mut token));
        assert_eq!(token.as_str(), "abcd");
        assert_eq!(buffer.as_str(), "rest");
    }
}
