//! Protocol reader: polls a byte-stream peripheral and runs each response
//! through an instrument grammar.

pub mod grammar;

pub use grammar::{ByteClass, Field, Frame, Grammar, GrammarMatcher, Pattern, Step};

use crate::channel::DataChannel;
use crate::command::Command;
use crate::component::{Component, PollContext, PollOutcome};
use crate::hal::{SerialPort, StatusDisplay};
use crate::persist::{NvStorage, RestoreOutcome, StorageError};
use crate::telemetry::{DataLog, StateEntries, TelemetryError};
use alloc::string::String;
use alloc::vec::Vec;
use serde::Serialize;
use tracing::{debug, warn};

pub const DEFAULT_READ_TIMEOUT_MS: u32 = 1000;
pub const DEFAULT_COOLDOWN_MS: u32 = 500;
pub const DEFAULT_MAX_FIELD_LENGTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReadStatus {
    Idle,
    Request,
    Waiting,
    Complete,
    Error,
    Timeout,
}

impl ReadStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            ReadStatus::Idle => "idle",
            ReadStatus::Request => "request",
            ReadStatus::Waiting => "waiting",
            ReadStatus::Complete => "complete",
            ReadStatus::Error => "error",
            ReadStatus::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Bytes sent to solicit a frame in time-driven mode.
    pub request: Vec<u8>,
    pub timeout_ms: u32,
    /// Wait after a timeout or error before the next request.
    pub cooldown_ms: u32,
    pub max_field_length: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            request: Vec::new(),
            timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            max_field_length: DEFAULT_MAX_FIELD_LENGTH,
        }
    }
}

/// Transient state of one read attempt.
#[derive(Debug, Clone)]
pub struct ReadCycle {
    status: ReadStatus,
    started_at: u32,
    last_byte_at: u32,
    ended_at: u32,
    matcher: GrammarMatcher,
}

impl ReadCycle {
    fn new(max_field_length: usize) -> Self {
        Self {
            status: ReadStatus::Idle,
            started_at: 0,
            last_byte_at: 0,
            ended_at: 0,
            matcher: GrammarMatcher::new(max_field_length),
        }
    }

    fn restart(&mut self, now: u32) {
        self.started_at = now;
        self.last_byte_at = now;
        self.matcher.reset();
    }

    fn end(&mut self, status: ReadStatus, now: u32) {
        self.status = status;
        self.ended_at = now;
    }

    pub fn status(&self) -> ReadStatus {
        self.status
    }

    pub fn started_at(&self) -> u32 {
        self.started_at
    }

    pub fn errors(&self) -> u16 {
        self.matcher.errors()
    }

    pub fn cursor(&self) -> usize {
        self.matcher.cursor()
    }

    pub fn frame(&self) -> &Frame {
        self.matcher.frame()
    }
}

/// Instrument-specific half of a protocol reader.
///
/// The instrument is a regular component (channels, commands, state); on
/// top of that it supplies the frame grammar and commits parsed frames.
pub trait Instrument: Component {
    fn grammar(&self) -> &Grammar;

    /// Commit gate; by default only error-free frames are committed.
    fn accept_frame(&self, _frame: &Frame, errors: u16) -> bool {
        errors == 0
    }

    /// Stores a parsed frame in the channels. Returns true if data was saved.
    fn finish_data(&mut self, frame: &Frame, now: u32) -> bool;
}

/// Reader state machine wrapped around an instrument and its port.
pub struct ProtocolReader<I, P> {
    instrument: I,
    port: P,
    config: ReaderConfig,
    cycle: ReadCycle,
    last_request_at: Option<u32>,
    committed: u32,
    discarded: u32,
    timeouts: u32,
}

impl<I: Instrument, P: SerialPort> ProtocolReader<I, P> {
    pub fn new(instrument: I, port: P, config: ReaderConfig) -> Self {
        let cycle = ReadCycle::new(config.max_field_length);
        Self {
            instrument,
            port,
            config,
            cycle,
            last_request_at: None,
            committed: 0,
            discarded: 0,
            timeouts: 0,
        }
    }

    pub fn instrument(&self) -> &I {
        &self.instrument
    }

    pub fn instrument_mut(&mut self) -> &mut I {
        &mut self.instrument
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn status(&self) -> ReadStatus {
        self.cycle.status
    }

    pub fn cycle(&self) -> &ReadCycle {
        &self.cycle
    }

    /// Frames dropped by the commit gate since creation.
    pub fn discarded_frames(&self) -> u32 {
        self.discarded
    }

    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }

    fn is_time_to_request(&self, ctx: &PollContext) -> bool {
        if ctx.is_manual() {
            return true;
        }
        match self.last_request_at {
            Some(at) => ctx.now.wrapping_sub(at) >= ctx.read_period_ms,
            None => true,
        }
    }

    fn start_request(&mut self, ctx: &PollContext) {
        self.cycle.restart(ctx.now);
        if !ctx.is_manual() {
            self.last_request_at = Some(ctx.now);
            if !self.config.request.is_empty() {
                if let Err(e) = self.port.write(&self.config.request) {
                    warn!(component = self.instrument.id(), error = %e, "request write failed");
                    self.cycle.end(ReadStatus::Error, ctx.now);
                    return;
                }
            }
        }
        self.cycle.status = ReadStatus::Waiting;
    }

    fn read_available(&mut self, ctx: &PollContext) -> PollOutcome {
        let now = ctx.now;
        loop {
            match self.port.read() {
                Ok(byte) => {
                    self.cycle.last_byte_at = now;
                    match self.cycle.matcher.feed(self.instrument.grammar().patterns(), byte) {
                        Step::Continue => {}
                        Step::Complete => return self.complete(now),
                        Step::Overflow => {
                            warn!(component = self.instrument.id(), "frame field overflow, frame discarded");
                            self.discarded = self.discarded.saturating_add(1);
                            self.cycle.end(ReadStatus::Error, now);
                            return PollOutcome::Idle;
                        }
                    }
                }
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(e)) => {
                    warn!(component = self.instrument.id(), error = %e, "serial error");
                    self.cycle.end(ReadStatus::Error, now);
                    return PollOutcome::Idle;
                }
            }
        }

        // manual mode only times out inside a started frame
        let expecting = !ctx.is_manual() || self.cycle.matcher.is_started();
        if expecting && now.wrapping_sub(self.cycle.last_byte_at) > self.config.timeout_ms {
            warn!(
                component = self.instrument.id(),
                cursor = self.cycle.matcher.cursor(),
                "read timed out"
            );
            self.timeouts = self.timeouts.saturating_add(1);
            self.cycle.end(ReadStatus::Timeout, now);
        }
        PollOutcome::Idle
    }

    fn complete(&mut self, now: u32) -> PollOutcome {
        self.cycle.end(ReadStatus::Complete, now);
        let errors = self.cycle.matcher.errors();
        let frame = self.cycle.matcher.frame();
        if !self.instrument.accept_frame(frame, errors) {
            debug!(component = self.instrument.id(), errors, "frame rejected");
            self.discarded = self.discarded.saturating_add(1);
            return PollOutcome::Idle;
        }
        if self.instrument.finish_data(frame, now) {
            self.committed = self.committed.saturating_add(1);
            PollOutcome::DataCommitted
        } else {
            PollOutcome::Idle
        }
    }
}

impl<I: Instrument, P: SerialPort> Component for ProtocolReader<I, P> {
    fn id(&self) -> &str {
        self.instrument.id()
    }

    fn init(&mut self) {
        self.instrument.init();
    }

    fn poll(&mut self, ctx: &PollContext) -> PollOutcome {
        loop {
            match self.cycle.status {
                ReadStatus::Idle => {
                    if !self.is_time_to_request(ctx) {
                        return PollOutcome::Idle;
                    }
                    self.cycle.status = ReadStatus::Request;
                }
                ReadStatus::Request => self.start_request(ctx),
                ReadStatus::Waiting => return self.read_available(ctx),
                ReadStatus::Complete => self.cycle.status = ReadStatus::Idle,
                ReadStatus::Error | ReadStatus::Timeout => {
                    if ctx.now.wrapping_sub(self.cycle.ended_at) < self.config.cooldown_ms {
                        return PollOutcome::Idle;
                    }
                    self.cycle.status = ReadStatus::Request;
                }
            }
        }
    }

    fn channels(&self) -> &[DataChannel] {
        self.instrument.channels()
    }

    fn channels_mut(&mut self) -> &mut [DataChannel] {
        self.instrument.channels_mut()
    }

    fn register_channels(&mut self, start: u8) -> u8 {
        self.instrument.register_channels(start)
    }

    fn clear_data(&mut self, force: bool) {
        self.committed = 0;
        self.instrument.clear_data(force);
    }

    fn log_data(&mut self, log: &mut DataLog<'_>) -> Result<u32, TelemetryError> {
        self.instrument.log_data(log)
    }

    fn shares_time_offset(&self) -> bool {
        self.instrument.shares_time_offset()
    }

    fn read_count(&self) -> Option<u32> {
        Some(self.committed)
    }

    fn parse_command(&mut self, command: &mut Command) -> bool {
        self.instrument.parse_command(command)
    }

    fn state_size(&self) -> usize {
        self.instrument.state_size()
    }

    fn assign_state_offset(&mut self, offset: usize) {
        self.instrument.assign_state_offset(offset);
    }

    fn save_state(&self, storage: &mut dyn NvStorage) -> Result<(), StorageError> {
        self.instrument.save_state(storage)
    }

    fn restore_state(&mut self, storage: &mut dyn NvStorage) -> Result<RestoreOutcome, StorageError> {
        self.instrument.restore_state(storage)
    }

    fn reset_state(&mut self) {
        self.instrument.reset_state();
    }

    fn render_display_state(&self, display: &mut dyn StatusDisplay) {
        self.instrument.render_display_state(display);
    }

    fn render_telemetry_state(&self, state: &mut StateEntries) {
        self.instrument.render_telemetry_state(state);
    }

    fn render_data_info(&mut self, out: &mut Vec<String>) {
        self.instrument.render_data_info(out);
    }
}
