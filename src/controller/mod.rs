pub mod commands;
pub mod state;

pub use commands::Directive;
pub use state::{ControllerState, LogMode};

use crate::command::{Command, CommandError, LogType};
use crate::component::{Component, PollContext, PollOutcome};
use crate::config::ControllerConfig;
use crate::hal::{Backend, Clock, NullDisplay, StatusDisplay};
use crate::persist::{NvStorage, PersistedState, RestoreOutcome, StateSlot, StorageError};
use crate::telemetry::{
    json_str, render_snapshot, DataLog, PublishBuffer, SnapshotHeader, StateEntries, TelemetryError,
};
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const MAX_COMPONENTS: usize = 8;
pub const MAX_CHANNELS: usize = 32;

const IDENTITY_LINE: u8 = 1;
const NOTICE_LINE: u8 = 4;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("component limit of {max} reached")]
    TooManyComponents { max: usize },
    #[error("component {id} needs {needed} bytes at offset {offset}, storage capacity is {capacity}")]
    StorageExhausted {
        id: String,
        offset: usize,
        needed: usize,
        capacity: usize,
    },
    #[error("component {id} needs {needed} channel indices, {available} left")]
    ChannelsExhausted { id: String, needed: usize, available: usize },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// Owns the components, the global persisted state and the publish buffer,
/// and runs everything from `tick`.
pub struct Controller<C, S, B, D = NullDisplay> {
    config: ControllerConfig,
    state: StateSlot<ControllerState>,
    components: heapless::Vec<Box<dyn Component>, MAX_COMPONENTS>,
    next_offset: usize,
    next_channel: u8,
    command: Command,
    clock: C,
    storage: S,
    backend: B,
    display: D,
    buffer: PublishBuffer,
    state_info: String,
    data_info: String,
    last_log_at: u32,
    startup_logged: bool,
    restart_at: Option<u32>,
    restart_shown: Option<u32>,
    restart_due: bool,
}

impl<C: Clock, S: NvStorage, B: Backend, D: StatusDisplay> Controller<C, S, B, D> {
    pub fn new(config: ControllerConfig, clock: C, storage: S, backend: B, display: D) -> Self {
        let mut state = StateSlot::new(config.defaults);
        state.assign_offset(0);
        let buffer = PublishBuffer::new(config.publish_capacity, config.publish_margin);
        Self {
            config,
            state,
            components: heapless::Vec::new(),
            next_offset: ControllerState::SIZE,
            next_channel: 0,
            command: Command::new(),
            clock,
            storage,
            backend,
            display,
            buffer,
            state_info: String::new(),
            data_info: String::new(),
            last_log_at: 0,
            startup_logged: false,
            restart_at: None,
            restart_shown: None,
            restart_due: false,
        }
    }

    /// Allocates the component's storage block and channel indices, then
    /// takes ownership of it. Nothing is allocated if any check fails.
    pub fn register_component(&mut self, mut component: Box<dyn Component>) -> Result<(), ControllerError> {
        if self.components.is_full() {
            return Err(ControllerError::TooManyComponents { max: MAX_COMPONENTS });
        }

        let offset = self.next_offset;
        let needed = component.state_size();
        let capacity = self.storage.capacity();
        let end = match offset.checked_add(needed) {
            Some(end) if end <= capacity => end,
            _ => {
                return Err(ControllerError::StorageExhausted {
                    id: String::from(component.id()),
                    offset,
                    needed,
                    capacity,
                })
            }
        };

        let channels = component.channels().len();
        let available = MAX_CHANNELS.saturating_sub(usize::from(self.next_channel));
        if channels > available {
            return Err(ControllerError::ChannelsExhausted {
                id: String::from(component.id()),
                needed: channels,
                available,
            });
        }

        if needed > 0 {
            component.assign_state_offset(offset);
        }
        let next_channel = component.register_channels(self.next_channel);
        info!(
            component = component.id(),
            offset,
            size = needed,
            first_channel = self.next_channel,
            channels,
            "component registered"
        );
        if self.components.push(component).is_err() {
            return Err(ControllerError::TooManyComponents { max: MAX_COMPONENTS });
        }
        self.next_offset = end;
        self.next_channel = next_channel;
        Ok(())
    }

    pub fn add<T: Component + 'static>(&mut self, component: T) -> Result<(), ControllerError> {
        self.register_component(Box::new(component))
    }

    /// Restores persisted state (healing unusable records), then initialises
    /// every component and renders the first snapshots.
    pub fn init(&mut self) -> Result<(), ControllerError> {
        if let RestoreOutcome::Healed { stored_version } = self.state.restore(&mut self.storage)? {
            info!(stored_version, "controller state reset to defaults");
        }
        for component in self.components.iter_mut() {
            let outcome = component.restore_state(&mut self.storage)?;
            debug!(component = component.id(), ?outcome, "component state restored");
            component.init();
        }

        let now = self.clock.millis();
        self.last_log_at = now;
        self.refresh_state_info(now);
        self.refresh_data_info(now);
        self.render_display();
        info!(
            identity = self.config.identity.as_str(),
            components = self.components.len(),
            "controller initialised"
        );
        Ok(())
    }

    pub fn tick(&mut self) {
        let now = self.clock.millis();
        self.display.refresh(now);
        self.backend.process();

        if !self.startup_logged && self.backend.is_connected() {
            self.startup_logged = true;
            self.publish_state_log(LogType::Startup, "", "", None);
        }

        let ctx = PollContext {
            now,
            read_period_ms: self.state.get().read_period_ms,
        };
        let mut committed = false;
        for component in self.components.iter_mut() {
            if component.poll(&ctx) == PollOutcome::DataCommitted {
                committed = true;
            }
        }
        if committed {
            self.refresh_data_info(now);
        }

        self.service_logging(now);
        self.service_restart(now);
    }

    /// Runs one command through the controller parsers and then the
    /// components. Returns the signed outcome code.
    pub fn receive_command(&mut self, text: &str) -> i16 {
        let now = self.clock.millis();
        self.command.load(text);
        self.command.extract_variable();

        let directive = commands::parse(&mut self.command, self.state.get_mut(), &self.config);
        let claimed_by = match directive {
            Some(_) => None,
            None => self
                .components
                .iter_mut()
                .position(|component| component.parse_command(&mut self.command)),
        };
        if !self.command.is_resolved() {
            self.command.error(CommandError::InvalidCommand);
        }

        if self.command.has_state_changed() {
            let saved = match claimed_by.and_then(|i| self.components.get(i)) {
                Some(component) => component.save_state(&mut self.storage),
                None => self.state.save(&mut self.storage),
            };
            if let Err(e) = saved {
                warn!(error = %e, "failed to persist state");
            }
        }
        if let Some(directive) = directive {
            self.apply_directive(directive, now);
        }

        let code = self.command.code();
        info!(
            command = self.command.text(),
            code,
            message = self.command.message(),
            "command processed"
        );

        let state_log_command = self.command.parse_variable(commands::CMD_STATE_LOG);
        if self.state.get().state_logging || state_log_command {
            let message = String::from(self.command.message());
            let notes = String::from(self.command.notes());
            let payload = self.command.payload().cloned();
            self.publish_state_log(self.command.log_type(), &message, &notes, payload.as_ref());
        }

        self.refresh_state_info(now);
        self.render_display();
        let notice = if self.command.message().is_empty() {
            format!("{code}: ok")
        } else {
            format!("{code}: {}", self.command.message())
        };
        self.display.print_line(NOTICE_LINE, &notice, true);
        code
    }

    fn apply_directive(&mut self, directive: Directive, now: u32) {
        match directive {
            Directive::None => {}
            Directive::ClearData => {
                self.clear_data(false);
                self.last_log_at = now;
            }
            Directive::ResetData => {
                self.clear_data(true);
                self.last_log_at = now;
            }
            Directive::ResetState => {
                self.state.reset();
                if let Err(e) = self.state.save(&mut self.storage) {
                    warn!(error = %e, "failed to persist default controller state");
                }
                for component in self.components.iter_mut() {
                    component.reset_state();
                    if let Err(e) = component.save_state(&mut self.storage) {
                        warn!(component = component.id(), error = %e, "failed to persist default state");
                    }
                }
                self.schedule_restart(now);
            }
            Directive::Restart => self.schedule_restart(now),
        }
    }

    /// Publishes the data log of every component now, without clearing.
    /// Returns the number of chunks published.
    pub fn log_data(&mut self) -> Result<u32, ControllerError> {
        self.publish_data(None)
    }

    fn publish_data(&mut self, only: Option<usize>) -> Result<u32, ControllerError> {
        let now = self.clock.millis();
        let mut log = DataLog::new(&mut self.buffer, &mut self.backend, &self.config.data_log_event, now);
        for (index, component) in self.components.iter_mut().enumerate() {
            if only.is_some_and(|only| only != index) {
                continue;
            }
            component.log_data(&mut log)?;
        }
        Ok(log.chunks())
    }

    pub fn clear_data(&mut self, force: bool) {
        for component in self.components.iter_mut() {
            component.clear_data(force);
        }
        debug!(force, "data cleared");
    }

    fn service_logging(&mut self, now: u32) {
        let state = *self.state.get();
        match state.log_mode {
            LogMode::Time => {
                if now.wrapping_sub(self.last_log_at) < state.log_period {
                    return;
                }
                if state.data_logging {
                    if let Err(e) = self.publish_data(None) {
                        warn!(error = %e, "data log failed");
                    }
                }
                self.clear_data(false);
                self.last_log_at = now;
            }
            LogMode::Count => {
                for index in 0..self.components.len() {
                    let due = self
                        .components
                        .get(index)
                        .and_then(|component| component.read_count())
                        .is_some_and(|count| count >= state.log_period);
                    if !due {
                        continue;
                    }
                    if state.data_logging {
                        if let Err(e) = self.publish_data(Some(index)) {
                            warn!(error = %e, "data log failed");
                        }
                    }
                    if let Some(component) = self.components.get_mut(index) {
                        component.clear_data(false);
                    }
                }
            }
        }
    }

    fn schedule_restart(&mut self, now: u32) {
        self.restart_at = Some(now.wrapping_add(self.config.restart_delay_ms));
        self.restart_shown = None;
        info!(delay_ms = self.config.restart_delay_ms, "restart scheduled");
    }

    fn service_restart(&mut self, now: u32) {
        let Some(at) = self.restart_at else {
            return;
        };
        let remaining = at.wrapping_sub(now);
        // past the deadline once the difference wraps
        if remaining == 0 || remaining > u32::MAX / 2 {
            self.restart_at = None;
            self.restart_due = true;
            self.display.print_line(NOTICE_LINE, "restarting...", false);
            info!("restart due");
            return;
        }
        let seconds = remaining.div_ceil(1000);
        if self.restart_shown != Some(seconds) {
            self.restart_shown = Some(seconds);
            self.display.print_line(NOTICE_LINE, &format!("restart in {seconds}s"), false);
        }
    }

    /// True once per scheduled restart, when its countdown has run out.
    pub fn take_restart_request(&mut self) -> bool {
        core::mem::take(&mut self.restart_due)
    }

    pub fn restart_pending(&self) -> bool {
        self.restart_at.is_some()
    }

    fn collect_state(&self) -> StateEntries {
        let mut entries = StateEntries::new();
        commands::render_state(self.state.get(), &self.config, &mut entries);
        for component in &self.components {
            component.render_telemetry_state(&mut entries);
        }
        entries
    }

    fn publish_state_log(&mut self, log_type: LogType, message: &str, notes: &str, payload: Option<&Value>) {
        let entries = self.collect_state();
        match self.render_state_log(log_type, message, notes, payload, &entries) {
            Ok(()) => {
                if !self.backend.publish(&self.config.state_log_event, self.buffer.as_str()) {
                    warn!(log_type = log_type.as_str(), "state log publish failed");
                }
            }
            Err(e) => warn!(error = %e, "state log render failed"),
        }
    }

    fn render_state_log(
        &mut self,
        log_type: LogType,
        message: &str,
        notes: &str,
        payload: Option<&Value>,
        entries: &StateEntries,
    ) -> Result<(), TelemetryError> {
        let prefix = format!(
            r#"{{"id":{},"t":{},"s":["#,
            json_str(&self.config.identity)?,
            json_str(log_type.as_str())?
        );
        let suffix = match payload {
            Some(p) => format!(
                r#"],"m":{},"n":{},"p":{}}}"#,
                json_str(message)?,
                json_str(notes)?,
                serde_json::to_string(p)?
            ),
            None => format!(r#"],"m":{},"n":{}}}"#, json_str(message)?, json_str(notes)?),
        };
        let dropped = self.buffer.write_bounded(&prefix, entries.iter(), &suffix)?;
        if dropped > 0 {
            warn!(dropped, "state log entries exceed publish capacity");
        }
        Ok(())
    }

    fn refresh_state_info(&mut self, now: u32) {
        let entries = self.collect_state();
        let header = SnapshotHeader {
            dt: now,
            version: &self.config.version,
            identity: &self.config.identity,
        };
        match render_snapshot(&mut self.buffer, header, "s", entries.iter()) {
            Ok(_) => self.state_info = String::from(self.buffer.as_str()),
            Err(e) => warn!(error = %e, "state snapshot render failed"),
        }
    }

    fn refresh_data_info(&mut self, now: u32) {
        let mut entries: Vec<String> = Vec::new();
        for component in self.components.iter_mut() {
            component.render_data_info(&mut entries);
        }
        let header = SnapshotHeader {
            dt: now,
            version: &self.config.version,
            identity: &self.config.identity,
        };
        match render_snapshot(&mut self.buffer, header, "d", entries.iter().map(String::as_str)) {
            Ok(_) => self.data_info = String::from(self.buffer.as_str()),
            Err(e) => warn!(error = %e, "data snapshot render failed"),
        }
    }

    fn render_display(&mut self) {
        let line = if self.state.get().locked {
            format!("{} [locked]", self.config.identity)
        } else {
            self.config.identity.clone()
        };
        self.display.print_line(IDENTITY_LINE, &line, false);
        for component in &self.components {
            component.render_display_state(&mut self.display);
        }
    }

    pub fn state(&self) -> &ControllerState {
        self.state.get()
    }

    /// Latest `{dt, version, id, s:[...]}` snapshot.
    pub fn state_info(&self) -> &str {
        &self.state_info
    }

    /// Latest `{dt, version, id, d:[...]}` snapshot of the newest samples.
    pub fn data_info(&self) -> &str {
        &self.data_info
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn component(&self, id: &str) -> Option<&dyn Component> {
        self.components
            .iter()
            .find(|component| component.id() == id)
            .map(|component| &**component)
    }

    pub fn component_mut(&mut self, id: &str) -> Option<&mut (dyn Component + 'static)> {
        self.components
            .iter_mut()
            .find(|component| component.id() == id)
            .map(|component| &mut **component)
    }

    /// Offset the next registered component's state would receive.
    pub fn next_state_offset(&self) -> usize {
        self.next_offset
    }

    pub fn next_channel_index(&self) -> u8 {
        self.next_channel
    }
}
