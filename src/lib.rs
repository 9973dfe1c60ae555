//! # Lab Logger
//!
//! Component/controller data-logging framework for laboratory instrument
//! controllers: balances, stirrers, mass-flow controllers and the like.
//!
//! ## Features
//!
//! - **Command grammar**: `<variable> <value> [<units>] [notes]` with signed outcome codes
//! - **Running statistics**: per-channel mean, standard deviation and mean sample time
//! - **Protocol reader**: byte-wise state machine driven by declarative frame grammars
//! - **Versioned persistence**: fixed-layout records that heal to defaults on mismatch
//! - **Bounded telemetry**: size-capped publish buffer, data logs split across chunks
//!
//! ## Quick Start
//!
//! ```rust
//! use lablogger::components::Balance;
//! use lablogger::persist::MemoryStorage;
//! use lablogger::reader::ProtocolReader;
//! use lablogger::sim::{LoopbackSerial, ManualClock, RecordingBackend};
//! use lablogger::{Controller, ControllerConfig, NullDisplay};
//!
//! let clock = ManualClock::new(0);
//! let serial = LoopbackSerial::new();
//! let mut controller = Controller::new(
//!     ControllerConfig::default(),
//!     clock.clone(),
//!     MemoryStorage::new(256),
//!     RecordingBackend::new(),
//!     NullDisplay,
//! );
//! let balance = Balance::new("balance", "g");
//! controller
//!     .add(ProtocolReader::new(balance, serial.clone(), Balance::reader_config()))
//!     .unwrap();
//! controller.init().unwrap();
//!
//! assert_eq!(controller.receive_command("data-log on"), 0);
//! serial.feed(b"S S     12.50 g\r\n");
//! controller.tick();
//! ```
//!
//! ## Architecture
//!
//! - [`controller`] - owns components, persisted state and the tick loop
//! - [`component`] - the pluggable capability trait
//! - [`reader`] - protocol state machine and frame grammars
//! - [`command`] - command tokens and outcome model
//! - [`channel`] / [`stats`] - per-measurement data model
//! - [`persist`] - non-volatile record layout
//! - [`telemetry`] - JSON entries, publish buffer, chunked data logs
//! - [`hal`] - platform traits; [`sim`] has host implementations

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

extern crate alloc;

pub mod channel;
pub mod command;
pub mod component;
pub mod components;
pub mod config;
pub mod controller;
pub mod display;
pub mod hal;
pub mod persist;
pub mod reader;
pub mod sim;
pub mod stats;
pub mod telemetry;

pub use channel::{DataChannel, ParseOptions};
pub use command::{Command, CommandError, CommandOutcome, LogType};
pub use component::{Component, PollContext, PollOutcome};
pub use config::ControllerConfig;
pub use controller::{Controller, ControllerError, ControllerState, LogMode};
pub use hal::{Backend, Clock, NullDisplay, SerialError, SerialPort, StatusDisplay};
pub use persist::{MemoryStorage, NvStorage, PersistedState, RestoreOutcome, StateSlot};
pub use reader::{Instrument, ProtocolReader, ReadStatus};
pub use stats::RunningStats;
