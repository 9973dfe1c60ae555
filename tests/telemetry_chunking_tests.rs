use lablogger::channel::DataChannel;
use lablogger::component::Component;
use lablogger::sim::{ManualClock, RecordingBackend};
use lablogger::telemetry::{render_snapshot, DataLog, PublishBuffer, SnapshotHeader, StateEntries};
use lablogger::{Controller, ControllerConfig, MemoryStorage, NullDisplay};
use serde_json::Value;
use std::collections::HashMap;

/// Sensor array with one channel per electrode.
struct SensorArray {
    id: &'static str,
    shared: bool,
    channels: Vec<DataChannel>,
}

impl SensorArray {
    fn new(id: &'static str, count: usize, shared: bool) -> Self {
        let mut channels = Vec::new();
        for i in 0..count {
            let mut channel = DataChannel::new(format!("electrode-{i:02}"), "mV", 3);
            channel.set_newest_value(100.0 + i as f64 * 0.125, 1000);
            channel.save(true);
            channel.set_newest_value(101.0 + i as f64 * 0.125, 2000);
            channel.save(true);
            channels.push(channel);
        }
        Self { id, shared, channels }
    }
}

impl Component for SensorArray {
    fn id(&self) -> &str {
        self.id
    }

    fn channels(&self) -> &[DataChannel] {
        &self.channels
    }

    fn channels_mut(&mut self) -> &mut [DataChannel] {
        &mut self.channels
    }

    fn shares_time_offset(&self) -> bool {
        self.shared
    }
}

fn chunk_keys(payload: &str) -> Vec<String> {
    let chunk: Value = serde_json::from_str(payload).unwrap();
    chunk["d"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["k"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_channels_split_across_chunks_exactly_once() {
    let mut buffer = PublishBuffer::new(300, 10);
    let mut backend = RecordingBackend::new();
    let mut sensors = SensorArray::new("sensors", 12, false);

    let published = {
        let mut log = DataLog::new(&mut buffer, &mut backend, "data-log", 3000);
        sensors.log_data(&mut log).unwrap()
    };

    let chunks = backend.events("data-log");
    assert!(published >= 2);
    assert_eq!(chunks.len(), published as usize);

    let mut seen: HashMap<String, usize> = HashMap::new();
    for chunk in &chunks {
        assert!(chunk.len() <= 300, "chunk of {} bytes exceeds capacity", chunk.len());
        let parsed: Value = serde_json::from_str(chunk).unwrap();
        assert_eq!(parsed["id"], "sensors");
        for key in chunk_keys(chunk) {
            *seen.entry(key).or_default() += 1;
        }
    }
    assert_eq!(seen.len(), 12);
    assert!(seen.values().all(|&n| n == 1));

    // chunks preserve channel order
    let order: Vec<String> = chunks.iter().flat_map(|c| chunk_keys(c)).collect();
    let expected: Vec<String> = (0..12).map(|i| format!("electrode-{i:02}")).collect();
    assert_eq!(order, expected);
}

#[test]
fn test_entry_fields_in_data_log() {
    let mut buffer = PublishBuffer::new(1024, 10);
    let mut backend = RecordingBackend::new();
    let mut sensors = SensorArray::new("sensors", 1, false);
    {
        let mut log = DataLog::new(&mut buffer, &mut backend, "data-log", 3000);
        assert_eq!(sensors.log_data(&mut log).unwrap(), 1);
    }

    let chunk: Value = serde_json::from_str(&backend.events("data-log")[0]).unwrap();
    assert!(chunk.get("to").is_none());
    let entry = &chunk["d"][0];
    assert_eq!(entry["k"], "electrode-00");
    assert_eq!(entry["v"], 100.5);
    assert_eq!(entry["sd"], 0.5);
    assert_eq!(entry["u"], "mV");
    assert_eq!(entry["n"], 2);
    assert_eq!(entry["to"], 1500);
}

#[test]
fn test_shared_time_offset_moves_to_header() {
    let mut buffer = PublishBuffer::new(1024, 10);
    let mut backend = RecordingBackend::new();
    let mut sensors = SensorArray::new("sensors", 3, true);
    {
        let mut log = DataLog::new(&mut buffer, &mut backend, "data-log", 2500);
        sensors.log_data(&mut log).unwrap();
    }

    let chunk: Value = serde_json::from_str(&backend.events("data-log")[0]).unwrap();
    assert_eq!(chunk["to"], 1000);
    for entry in chunk["d"].as_array().unwrap() {
        assert!(entry.get("to").is_none());
    }
}

#[test]
fn test_channels_without_data_are_skipped() {
    let mut buffer = PublishBuffer::new(1024, 10);
    let mut backend = RecordingBackend::new();
    let mut sensors = SensorArray::new("sensors", 3, false);
    sensors.channels[1].clear(true);
    {
        let mut log = DataLog::new(&mut buffer, &mut backend, "data-log", 3000);
        sensors.log_data(&mut log).unwrap();
    }
    assert_eq!(chunk_keys(&backend.events("data-log")[0]), ["electrode-00", "electrode-02"]);

    // nothing at all to log publishes nothing
    backend.clear();
    sensors.clear_data(true);
    let mut log = DataLog::new(&mut buffer, &mut backend, "data-log", 3000);
    assert_eq!(sensors.log_data(&mut log).unwrap(), 0);
    drop(log);
    assert!(backend.events("data-log").is_empty());
}

#[test]
fn test_oversized_entry_is_skipped() {
    let mut buffer = PublishBuffer::new(60, 0);
    let mut backend = RecordingBackend::new();
    let mut sensors = SensorArray::new("sensors", 2, false);
    {
        let mut log = DataLog::new(&mut buffer, &mut backend, "data-log", 3000);
        assert_eq!(sensors.log_data(&mut log).unwrap(), 0);
    }
    assert!(backend.events("data-log").is_empty());
}

#[test]
fn test_controller_log_spans_components() {
    let config = ControllerConfig {
        publish_capacity: 300,
        ..ControllerConfig::default()
    };
    let backend = RecordingBackend::new();
    let mut controller = Controller::new(
        config,
        ManualClock::new(3000),
        MemoryStorage::new(64),
        backend.clone(),
        NullDisplay,
    );
    controller.add(SensorArray::new("left", 8, true)).unwrap();
    controller.add(SensorArray::new("right", 8, false)).unwrap();
    assert_eq!(controller.next_channel_index(), 16);

    let chunks = controller.log_data().unwrap();
    let published = backend.events("data-log");
    assert_eq!(published.len(), chunks as usize);
    assert!(chunks >= 4);

    let mut left = 0;
    let mut right = 0;
    for chunk in &published {
        let parsed: Value = serde_json::from_str(chunk).unwrap();
        let keys = parsed["d"].as_array().unwrap().len();
        match parsed["id"].as_str().unwrap() {
            "left" => left += keys,
            "right" => right += keys,
            other => panic!("unexpected component {other}"),
        }
    }
    assert_eq!((left, right), (8, 8));
}

#[test]
fn test_snapshot_header_and_truncation() {
    let mut entries = StateEntries::new();
    entries.push_flag("lock", false);
    entries.push_text("read-period", "manual");
    entries.push_scalar("log-period", 5.0, "x");

    let mut buffer = PublishBuffer::new(1024, 10);
    let header = SnapshotHeader { dt: 42, version: "1.2.0", identity: "mfc-1" };
    assert_eq!(render_snapshot(&mut buffer, header, "s", entries.iter()).unwrap(), 0);
    let snapshot: Value = serde_json::from_str(buffer.as_str()).unwrap();
    assert_eq!(snapshot["dt"], 42);
    assert_eq!(snapshot["version"], "1.2.0");
    assert_eq!(snapshot["id"], "mfc-1");
    assert_eq!(snapshot["s"][1]["v"], "manual");
    assert_eq!(snapshot["s"][2]["u"], "x");

    // a tight buffer keeps the snapshot valid by dropping entries
    let mut small = PublishBuffer::new(80, 0);
    let dropped = render_snapshot(&mut small, header, "s", entries.iter()).unwrap();
    assert!(dropped > 0);
    let snapshot: Value = serde_json::from_str(small.as_str()).unwrap();
    assert!(snapshot["s"].as_array().unwrap().len() < 3);
}
