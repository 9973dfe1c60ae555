use crate::channel::DataChannel;
use crate::hal::Backend;
use alloc::string::String;
use alloc::vec::Vec;
use arrayvec::ArrayString;
use serde::Serialize;
use static_assertions::const_assert;
use thiserror::Error;
use tracing::{debug, warn};

/// Hard ceiling for any single published payload.
pub const MAX_PUBLISH_SIZE: usize = 1024;
pub const DEFAULT_PUBLISH_CAPACITY: usize = 622;
pub const DEFAULT_PUBLISH_MARGIN: usize = 10;

const_assert!(DEFAULT_PUBLISH_CAPACITY <= MAX_PUBLISH_SIZE);
const_assert!(DEFAULT_PUBLISH_MARGIN < DEFAULT_PUBLISH_CAPACITY);

const ARRAY_CLOSE: &str = "]}";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("payload needs {needed} bytes, capacity is {capacity}")]
    Capacity { needed: usize, capacity: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EntryValue<'a> {
    Null,
    Bool(bool),
    Text(&'a str),
    Number(f64),
}

/// One `{k, v, ...}` element of a state or data array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Entry<'a> {
    pub k: &'a str,
    pub v: EntryValue<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub u: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<u64>,
}

impl<'a> Entry<'a> {
    fn new(k: &'a str, v: EntryValue<'a>) -> Self {
        Self { k, v, sd: None, u: None, n: None, to: None }
    }

    pub fn null(k: &'a str) -> Self {
        Self::new(k, EntryValue::Null)
    }

    pub fn flag(k: &'a str, v: bool) -> Self {
        Self::new(k, EntryValue::Bool(v))
    }

    pub fn text(k: &'a str, v: &'a str) -> Self {
        Self::new(k, EntryValue::Text(v))
    }

    pub fn scalar(k: &'a str, v: f64, u: Option<&'a str>) -> Self {
        let mut entry = Self::new(k, EntryValue::Number(v));
        entry.u = u;
        entry
    }

    #[must_use]
    pub fn with_sd(mut self, sd: f64) -> Self {
        self.sd = Some(sd);
        self
    }

    #[must_use]
    pub fn with_count(mut self, n: u32) -> Self {
        self.n = Some(n);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, to: u64) -> Self {
        self.to = Some(to);
        self
    }

    pub fn to_json(&self) -> String {
        match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                warn!(key = self.k, error = %e, "failed to serialize entry");
                String::new()
            }
        }
    }
}

/// Rounds to a fixed number of decimals for display.
pub fn round_to(value: f64, decimals: u8) -> f64 {
    let factor = 10f64.powi(i32::from(decimals));
    (value * factor).round() / factor
}

pub fn json_str(s: &str) -> Result<String, TelemetryError> {
    Ok(serde_json::to_string(s)?)
}

/// Fixed-capacity publish buffer.
///
/// `limit` is the published size contract (at most `MAX_PUBLISH_SIZE`);
/// `margin` is kept free on every append check.
#[derive(Debug, Clone)]
pub struct PublishBuffer {
    text: ArrayString<MAX_PUBLISH_SIZE>,
    limit: usize,
    margin: usize,
}

impl PublishBuffer {
    pub fn new(limit: usize, margin: usize) -> Self {
        Self {
            text: ArrayString::new(),
            limit: limit.min(MAX_PUBLISH_SIZE),
            margin,
        }
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Whether `extra` more bytes fit while keeping `reserve` bytes plus the
    /// safety margin free.
    pub fn fits(&self, extra: usize, reserve: usize) -> bool {
        self.text.len() + extra + reserve + self.margin <= self.limit
    }

    pub fn push(&mut self, s: &str) -> Result<(), TelemetryError> {
        let needed = self.text.len() + s.len();
        if needed > self.limit {
            return Err(TelemetryError::Capacity { needed, capacity: self.limit });
        }
        self.text
            .try_push_str(s)
            .map_err(|_| TelemetryError::Capacity { needed, capacity: MAX_PUBLISH_SIZE })
    }

    /// Writes `prefix`, as many `entries` as fit, then `suffix`.
    /// Returns the number of entries that did not fit.
    pub fn write_bounded<'e>(
        &mut self,
        prefix: &str,
        entries: impl IntoIterator<Item = &'e str>,
        suffix: &str,
    ) -> Result<usize, TelemetryError> {
        self.clear();
        self.push(prefix)?;
        let mut written = 0usize;
        let mut dropped = 0usize;
        for entry in entries {
            if entry.is_empty() {
                continue;
            }
            let separator = usize::from(written > 0);
            if self.fits(separator + entry.len(), suffix.len()) {
                if written > 0 {
                    self.push(",")?;
                }
                self.push(entry)?;
                written += 1;
            } else {
                dropped += 1;
            }
        }
        self.push(suffix)?;
        Ok(dropped)
    }
}

/// Collected state entries, rendered to JSON as they are pushed.
#[derive(Debug, Clone, Default)]
pub struct StateEntries {
    entries: Vec<String>,
}

impl StateEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: &Entry<'_>) {
        let json = entry.to_json();
        if !json.is_empty() {
            self.entries.push(json);
        }
    }

    pub fn push_flag(&mut self, k: &str, v: bool) {
        self.push(&Entry::flag(k, v));
    }

    pub fn push_text(&mut self, k: &str, v: &str) {
        self.push(&Entry::text(k, v));
    }

    pub fn push_scalar(&mut self, k: &str, v: f64, u: &str) {
        let units = (!u.is_empty()).then_some(u);
        self.push(&Entry::scalar(k, v, units));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Identity header shared by both pollable snapshots.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotHeader<'a> {
    pub dt: u32,
    pub version: &'a str,
    pub identity: &'a str,
}

/// Renders `{dt, version, id, <key>:[entries]}` into `buffer`.
pub fn render_snapshot<'e>(
    buffer: &mut PublishBuffer,
    header: SnapshotHeader<'_>,
    key: &str,
    entries: impl IntoIterator<Item = &'e str>,
) -> Result<usize, TelemetryError> {
    let prefix = alloc::format!(
        r#"{{"dt":{},"version":{},"id":{},"{}":["#,
        header.dt,
        json_str(header.version)?,
        json_str(header.identity)?,
        key
    );
    let dropped = buffer.write_bounded(&prefix, entries, ARRAY_CLOSE)?;
    if dropped > 0 {
        warn!(key, dropped, "snapshot entries exceed publish capacity");
    }
    Ok(dropped)
}

/// Writes component data logs as one or more size-bounded chunks.
///
/// Each chunk is `{"id":..,["to":..,]"d":[...]}`; a channel's entry is
/// either wholly inside a chunk or deferred to the next one.
pub struct DataLog<'a> {
    buffer: &'a mut PublishBuffer,
    backend: &'a mut dyn Backend,
    event: &'a str,
    now: u32,
    chunks: u32,
}

impl<'a> DataLog<'a> {
    pub fn new(buffer: &'a mut PublishBuffer, backend: &'a mut dyn Backend, event: &'a str, now: u32) -> Self {
        Self { buffer, backend, event, now, chunks: 0 }
    }

    pub fn now(&self) -> u32 {
        self.now
    }

    /// Total chunks published through this writer.
    pub fn chunks(&self) -> u32 {
        self.chunks
    }

    /// Renders and publishes every channel with data. Returns the number of
    /// chunks published for this component.
    pub fn write_component(
        &mut self,
        id: &str,
        shared_time_offset: bool,
        channels: &mut [DataChannel],
    ) -> Result<u32, TelemetryError> {
        let now = self.now;
        let mut header = alloc::format!(r#"{{"id":{}"#, json_str(id)?);
        if shared_time_offset {
            if let Some(offset) = channels.iter().find_map(|c| c.time_offset(now)) {
                header.push_str(&alloc::format!(r#","to":{offset}"#));
            }
        }
        header.push_str(r#","d":["#);

        let mut next = 0;
        let mut published = 0;
        while next < channels.len() {
            self.buffer.clear();
            self.buffer.push(&header)?;
            let mut appended = 0usize;
            while let Some(channel) = channels.get_mut(next) {
                if !channel.render(!shared_time_offset, now) {
                    next += 1;
                    continue;
                }
                let separator = usize::from(appended > 0);
                if self.buffer.fits(separator + channel.rendered().len(), ARRAY_CLOSE.len()) {
                    if appended > 0 {
                        self.buffer.push(",")?;
                    }
                    self.buffer.push(channel.rendered())?;
                    appended += 1;
                    next += 1;
                } else if appended == 0 {
                    warn!(component = id, channel = channel.name(), "data entry exceeds publish capacity, skipped");
                    next += 1;
                } else {
                    break;
                }
            }
            if appended == 0 {
                continue;
            }
            self.buffer.push(ARRAY_CLOSE)?;
            if !self.backend.publish(self.event, self.buffer.as_str()) {
                warn!(component = id, "data log publish failed");
            }
            debug!(component = id, entries = appended, bytes = self.buffer.len(), "data log chunk published");
            published += 1;
            self.chunks += 1;
        }
        Ok(published)
    }
}
