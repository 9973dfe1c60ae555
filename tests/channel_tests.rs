use lablogger::channel::{DataChannel, ParseOptions};
use serde_json::Value;

fn rendered(channel: &DataChannel) -> Value {
    serde_json::from_str(channel.rendered()).unwrap()
}

#[test]
fn test_render_without_data_is_null() {
    let mut channel = DataChannel::new("flow", "mL/min", 2);
    assert!(!channel.render(true, 1000));

    let entry = rendered(&channel);
    assert_eq!(entry["k"], "flow");
    assert!(entry["v"].is_null());
    assert!(entry.get("n").is_none());
}

#[test]
fn test_single_sample_renders_mean_and_count() {
    let mut channel = DataChannel::new("flow", "mL/min", 1);
    channel.set_newest_value(12.34, 1000);
    assert!(channel.save(true));
    assert!(channel.render(false, 1500));

    let entry = rendered(&channel);
    assert_eq!(entry["v"], 12.3);
    assert_eq!(entry["u"], "mL/min");
    assert_eq!(entry["n"], 1);
    assert!(entry.get("sd").is_none());
    assert!(entry.get("to").is_none());
}

#[test]
fn test_averaged_samples_render_sd_and_time_offset() {
    let mut channel = DataChannel::new("temp", "C", 1);
    for (value, time) in [(20.0, 1000), (22.0, 2000), (24.0, 3000)] {
        channel.set_newest_value(value, time);
        channel.save(true);
    }
    assert!(channel.render(true, 5000));

    let entry = rendered(&channel);
    assert_eq!(entry["v"], 22.0);
    assert_eq!(entry["n"], 3);
    // population sd of 20/22/24, one extra decimal
    assert_eq!(entry["sd"], 1.63);
    // mean sample time 2000
    assert_eq!(entry["to"], 3000);
}

#[test]
fn test_save_without_averaging_keeps_only_latest() {
    let mut channel = DataChannel::new("w", "g", 2);
    channel.set_newest_value(1.0, 10);
    channel.save(true);
    channel.set_newest_value(5.0, 20);
    channel.save(false);

    assert_eq!(channel.count(), 1);
    assert_eq!(channel.stats().mean(), Some(5.0));
}

#[test]
fn test_save_requires_valid_newest_sample() {
    let mut channel = DataChannel::new("w", "g", 2);
    assert!(!channel.save(true));

    channel.set_newest_value(1.0, 10);
    channel.invalidate_newest();
    assert!(!channel.save(true));
    assert_eq!(channel.count(), 0);
}

#[test]
fn test_older_sample_restarts_statistics() {
    let mut channel = DataChannel::new("w", "g", 2);
    channel.set_newest_value(1.0, 10_000);
    channel.save(true);
    channel.set_newest_value(3.0, 20_000);
    channel.save(true);

    // clock wrapped: the new sample is older than the mean time
    channel.set_newest_value(7.0, 50);
    channel.save(true);
    assert_eq!(channel.count(), 1);
    assert_eq!(channel.stats().mean(), Some(7.0));
}

#[test]
fn test_parse_string_sample() {
    let mut channel = DataChannel::new("w", "g", 0);
    let options = ParseOptions {
        infer_precision: true,
        extra_digits: 1,
        ..ParseOptions::default()
    };

    assert!(channel.set_newest_value_str("  -3.250 g", 100, &options));
    assert_eq!(channel.newest_value(), Some(-3.25));
    assert_eq!(channel.decimals(), 4);

    assert!(!channel.set_newest_value_str("overload", 200, &options));
    assert_eq!(channel.newest_value(), None);
}

#[test]
fn test_strict_parse_rejects_trailing_text() {
    let mut channel = DataChannel::new("w", "g", 2);
    let strict = ParseOptions { strict: true, ..ParseOptions::default() };
    assert!(!channel.set_newest_value_str("12.5g", 0, &strict));
    assert!(channel.set_newest_value_str("12.5  ", 0, &strict));
}

#[test]
fn test_persistent_channel_survives_normal_clear() {
    let mut channel = DataChannel::new("total", "L", 2).persistent();
    channel.set_newest_value(4.0, 0);
    channel.save(true);

    channel.clear(false);
    assert_eq!(channel.count(), 1);

    channel.clear(true);
    assert_eq!(channel.count(), 0);
    assert!(channel.newest_value().is_none());
}

#[test]
fn test_render_info_uses_newest_raw_sample() {
    let mut channel = DataChannel::new("w", "g", 2);
    channel.set_newest_value(1.0, 0);
    channel.save(true);
    channel.set_newest_value(9.876, 10);

    assert!(channel.render_info());
    let entry = rendered(&channel);
    assert_eq!(entry["v"], 9.88);
    assert_eq!(entry["u"], "g");
}
