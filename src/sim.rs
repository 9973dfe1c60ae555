//! Host-side implementations of the platform traits, used by the simulator
//! binary and the integration tests.

use crate::hal::{Backend, Clock, SerialError, SerialPort};
use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use colored::Colorize;
use core::cell::{Cell, RefCell};
use std::time::Instant;

/// Clock advanced by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u32>>,
}

impl ManualClock {
    pub fn new(start: u32) -> Self {
        Self { now: Rc::new(Cell::new(start)) }
    }

    pub fn set(&self, now: u32) {
        self.now.set(now);
    }

    pub fn advance(&self, ms: u32) {
        self.now.set(self.now.get().wrapping_add(ms));
    }
}

impl Clock for ManualClock {
    fn millis(&self) -> u32 {
        self.now.get()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn millis(&self) -> u32 {
        // wraps like a board uptime counter
        (self.start.elapsed().as_millis() & u128::from(u32::MAX)) as u32
    }
}

#[derive(Debug, Default)]
struct SerialInner {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    fault: Option<SerialError>,
}

/// In-memory serial port. One clone plays the instrument (`feed`), the other
/// is handed to the reader.
#[derive(Debug, Clone, Default)]
pub struct LoopbackSerial {
    inner: Rc<RefCell<SerialInner>>,
}

impl LoopbackSerial {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes for the reader to receive.
    pub fn feed(&self, bytes: &[u8]) {
        self.inner.borrow_mut().rx.extend(bytes.iter().copied());
    }

    /// Makes the next read return `error` instead of data.
    pub fn inject_error(&self, error: SerialError) {
        self.inner.borrow_mut().fault = Some(error);
    }

    pub fn pending(&self) -> usize {
        self.inner.borrow().rx.len()
    }

    /// Everything the reader wrote so far.
    pub fn written(&self) -> Vec<u8> {
        self.inner.borrow().tx.clone()
    }

    pub fn clear_written(&self) {
        self.inner.borrow_mut().tx.clear();
    }
}

impl SerialPort for LoopbackSerial {
    fn read(&mut self) -> nb::Result<u8, SerialError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(error) = inner.fault.take() {
            return Err(nb::Error::Other(error));
        }
        inner.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        self.inner.borrow_mut().tx.extend_from_slice(bytes);
        Ok(())
    }
}

#[derive(Debug)]
struct BackendInner {
    connected: bool,
    published: Vec<(String, String)>,
}

/// Backend that records every publish. Clones share the record.
#[derive(Debug, Clone)]
pub struct RecordingBackend {
    inner: Rc<RefCell<BackendInner>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(BackendInner {
                connected: true,
                published: Vec::new(),
            })),
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.borrow_mut().connected = connected;
    }

    /// All `(event, payload)` pairs in publish order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.inner.borrow().published.clone()
    }

    /// Payloads published under `event`.
    pub fn events(&self, event: &str) -> Vec<String> {
        self.inner
            .borrow()
            .published
            .iter()
            .filter(|(e, _)| e == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().published.clear();
    }
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for RecordingBackend {
    fn is_connected(&self) -> bool {
        self.inner.borrow().connected
    }

    fn publish(&mut self, event: &str, payload: &str) -> bool {
        let mut inner = self.inner.borrow_mut();
        if !inner.connected {
            return false;
        }
        inner.published.push((String::from(event), String::from(payload)));
        true
    }
}

/// Prints publishes to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleBackend;

impl Backend for ConsoleBackend {
    fn is_connected(&self) -> bool {
        true
    }

    fn publish(&mut self, event: &str, payload: &str) -> bool {
        println!("{} {}", format!("[{event}]").cyan().bold(), payload);
        true
    }
}
