use lablogger::channel::{DataChannel, ParseOptions};
use lablogger::component::{Component, PollContext, PollOutcome};
use lablogger::components::Balance;
use lablogger::reader::{
    ByteClass, Field, Frame, Grammar, Instrument, ProtocolReader, ReadStatus, ReaderConfig,
};
use lablogger::sim::LoopbackSerial;
use lablogger::SerialError;

const STABLE_FRAME: &[u8] = b"S S     12.50 g\r\n";

fn timed(now: u32) -> PollContext {
    PollContext { now, read_period_ms: 1000 }
}

fn manual(now: u32) -> PollContext {
    PollContext { now, read_period_ms: 0 }
}

fn balance_reader() -> (ProtocolReader<Balance, LoopbackSerial>, LoopbackSerial) {
    let serial = LoopbackSerial::new();
    let reader = ProtocolReader::new(Balance::new("balance", "g"), serial.clone(), Balance::reader_config());
    (reader, serial)
}

#[test]
fn test_time_driven_request_and_commit() {
    let (mut reader, serial) = balance_reader();

    assert_eq!(reader.poll(&timed(0)), PollOutcome::Idle);
    assert_eq!(reader.status(), ReadStatus::Waiting);
    assert_eq!(serial.written(), b"SI\r\n");

    serial.feed(STABLE_FRAME);
    assert_eq!(reader.poll(&timed(10)), PollOutcome::DataCommitted);
    assert_eq!(reader.status(), ReadStatus::Complete);
    assert_eq!(reader.channels()[0].newest_value(), Some(12.5));
    assert_eq!(reader.read_count(), Some(1));

    // idle until the next read period
    reader.poll(&timed(500));
    assert_eq!(reader.status(), ReadStatus::Idle);
    assert_eq!(serial.written().len(), 4);

    reader.poll(&timed(1000));
    assert_eq!(reader.status(), ReadStatus::Waiting);
    assert_eq!(serial.written().len(), 8);
}

#[test]
fn test_exact_frame_vs_substituted_byte() {
    let (mut reader, serial) = balance_reader();
    reader.poll(&timed(0));
    serial.feed(STABLE_FRAME);
    assert_eq!(reader.poll(&timed(1)), PollOutcome::DataCommitted);
    assert_eq!(reader.cycle().errors(), 0);

    let (mut reader, serial) = balance_reader();
    reader.poll(&timed(0));
    serial.feed(b"S S     12.50 g\rX");
    // the frame still runs to the end of the grammar, but is not committed
    assert_eq!(reader.poll(&timed(1)), PollOutcome::Idle);
    assert_eq!(reader.status(), ReadStatus::Complete);
    assert_eq!(reader.cycle().errors(), 1);
    assert_eq!(reader.discarded_frames(), 1);
    assert_eq!(reader.channels()[0].count(), 0);
}

#[test]
fn test_dropped_delimiter_costs_only_one_frame() {
    let (mut reader, serial) = balance_reader();
    reader.poll(&timed(0));
    // `\r` lost on the line
    serial.feed(b"S S     12.50 g\n");
    assert_eq!(reader.poll(&timed(1)), PollOutcome::Idle);
    assert_eq!(reader.status(), ReadStatus::Complete);
    assert_eq!(reader.cycle().errors(), 1);
    assert_eq!(reader.discarded_frames(), 1);

    for k in 1..=3u32 {
        reader.poll(&timed(k * 1000));
        assert_eq!(reader.status(), ReadStatus::Waiting);
        serial.feed(STABLE_FRAME);
        assert_eq!(reader.poll(&timed(k * 1000 + 1)), PollOutcome::DataCommitted);
        assert_eq!(reader.cycle().errors(), 0);
    }
    assert_eq!(reader.read_count(), Some(3));
    assert_eq!(reader.discarded_frames(), 1);
}

#[test]
fn test_frame_split_across_polls() {
    let (mut reader, serial) = balance_reader();
    reader.poll(&timed(0));

    serial.feed(&STABLE_FRAME[..7]);
    assert_eq!(reader.poll(&timed(5)), PollOutcome::Idle);
    assert_eq!(reader.status(), ReadStatus::Waiting);

    serial.feed(&STABLE_FRAME[7..]);
    assert_eq!(reader.poll(&timed(10)), PollOutcome::DataCommitted);
    assert_eq!(reader.cycle().frame().units, "g");
    assert_eq!(reader.cycle().frame().flag, "S");
}

#[test]
fn test_timeout_then_cooldown_then_retry() {
    let (mut reader, serial) = balance_reader();
    reader.poll(&timed(0));

    reader.poll(&timed(1000));
    assert_eq!(reader.status(), ReadStatus::Waiting);

    reader.poll(&timed(1001));
    assert_eq!(reader.status(), ReadStatus::Timeout);
    assert_eq!(reader.timeouts(), 1);

    reader.poll(&timed(1400));
    assert_eq!(reader.status(), ReadStatus::Timeout);

    reader.poll(&timed(1501));
    assert_eq!(reader.status(), ReadStatus::Waiting);
    assert_eq!(serial.written(), b"SI\r\nSI\r\n");
}

#[test]
fn test_manual_mode_waits_without_requesting() {
    let (mut reader, serial) = balance_reader();

    reader.poll(&manual(0));
    assert_eq!(reader.status(), ReadStatus::Waiting);
    reader.poll(&manual(60_000));
    assert_eq!(reader.status(), ReadStatus::Waiting);

    serial.feed(STABLE_FRAME);
    assert_eq!(reader.poll(&manual(60_010)), PollOutcome::DataCommitted);
    assert!(serial.written().is_empty());

    // next frame is awaited immediately
    reader.poll(&manual(60_020));
    assert_eq!(reader.status(), ReadStatus::Waiting);
}

#[test]
fn test_manual_mode_times_out_inside_a_frame() {
    let (mut reader, serial) = balance_reader();
    reader.poll(&manual(0));

    serial.feed(b"S S   1");
    reader.poll(&manual(100));
    assert_eq!(reader.status(), ReadStatus::Waiting);

    reader.poll(&manual(1101));
    assert_eq!(reader.status(), ReadStatus::Timeout);
}

#[test]
fn test_field_overflow_is_an_error() {
    let serial = LoopbackSerial::new();
    let config = ReaderConfig {
        max_field_length: 4,
        ..Balance::reader_config()
    };
    let mut reader = ProtocolReader::new(Balance::new("balance", "g"), serial.clone(), config);
    reader.poll(&timed(0));

    serial.feed(b"S S 123456.7 g\r\n");
    assert_eq!(reader.poll(&timed(1)), PollOutcome::Idle);
    assert_eq!(reader.status(), ReadStatus::Error);
    assert_eq!(reader.discarded_frames(), 1);
}

#[test]
fn test_serial_error_is_an_error() {
    let (mut reader, serial) = balance_reader();
    reader.poll(&timed(0));

    serial.inject_error(SerialError::Overrun);
    reader.poll(&timed(1));
    assert_eq!(reader.status(), ReadStatus::Error);

    // recovers after the cooldown
    reader.poll(&timed(600));
    serial.feed(STABLE_FRAME);
    assert_eq!(reader.poll(&timed(601)), PollOutcome::DataCommitted);
}

#[test]
fn test_unstable_reading_skipped_when_stable_only() {
    let (mut reader, serial) = balance_reader();
    reader.poll(&manual(0));
    serial.feed(b"S D     12.51 g\r\n");
    assert_eq!(reader.poll(&manual(1)), PollOutcome::Idle);
    assert_eq!(reader.instrument().channels()[0].count(), 0);
    assert_eq!(reader.discarded_frames(), 1);
}

#[test]
fn test_clear_resets_read_count() {
    let (mut reader, serial) = balance_reader();
    for i in 0..3u32 {
        reader.poll(&manual(i * 10));
        serial.feed(STABLE_FRAME);
        reader.poll(&manual(i * 10 + 5));
    }
    assert_eq!(reader.read_count(), Some(3));
    assert_eq!(reader.channels()[0].count(), 3);

    reader.clear_data(false);
    assert_eq!(reader.read_count(), Some(0));
    assert_eq!(reader.channels()[0].count(), 0);
}

/// Flow meter reporting `F <flow>;<temp>\n`.
struct FlowMeter {
    grammar: Grammar,
    channels: Vec<DataChannel>,
}

impl FlowMeter {
    fn new() -> Self {
        Self {
            grammar: Grammar::new()
                .literals(b"F ")
                .class(ByteClass::Digit, Field::Value)
                .literal(b';')
                .class(ByteClass::Digit, Field::Value)
                .literal(b'\n'),
            channels: vec![DataChannel::new("flow", "mL/min", 1), DataChannel::new("temp", "C", 1)],
        }
    }
}

impl Component for FlowMeter {
    fn id(&self) -> &str {
        "mfc"
    }

    fn channels(&self) -> &[DataChannel] {
        &self.channels
    }

    fn channels_mut(&mut self) -> &mut [DataChannel] {
        &mut self.channels
    }
}

impl Instrument for FlowMeter {
    fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    fn finish_data(&mut self, frame: &Frame, now: u32) -> bool {
        let options = ParseOptions::default();
        let mut saved = false;
        for (i, channel) in self.channels.iter_mut().enumerate() {
            if let Some(raw) = frame.value(i) {
                saved |= channel.set_newest_value_str(raw, now, &options) && channel.save(true);
            }
        }
        saved
    }
}

#[test]
fn test_custom_instrument_grammar() {
    let serial = LoopbackSerial::new();
    let config = ReaderConfig {
        request: b"?\n".to_vec(),
        ..ReaderConfig::default()
    };
    let mut reader = ProtocolReader::new(FlowMeter::new(), serial.clone(), config);
    reader.poll(&timed(0));
    assert_eq!(serial.written(), b"?\n");

    serial.feed(b"F  12.5;-3.0\n");
    assert_eq!(reader.poll(&timed(1)), PollOutcome::DataCommitted);
    assert_eq!(reader.channels()[0].newest_value(), Some(12.5));
    assert_eq!(reader.channels()[1].newest_value(), Some(-3.0));
    assert_eq!(reader.cycle().frame().values, ["12.5", "-3.0"]);
}
