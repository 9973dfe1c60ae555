use crate::stats::RunningStats;
use crate::telemetry::{round_to, Entry};
use alloc::string::String;
use tracing::warn;

/// How a raw textual sample is turned into a number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Reject samples with non-whitespace characters after the number.
    pub strict: bool,
    /// Take the display precision from the digits after the separator.
    pub infer_precision: bool,
    /// Digits added on top of the inferred precision (averages carry more).
    pub extra_digits: u8,
    pub separator: char,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            strict: false,
            infer_precision: false,
            extra_digits: 0,
            separator: '.',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    value: f64,
    time: u32,
}

/// One named measurement slot owned by a component.
#[derive(Debug, Clone)]
pub struct DataChannel {
    index: Option<u8>,
    name: String,
    unit: String,
    decimals: u8,
    persistent: bool,
    values: RunningStats,
    times: RunningStats,
    newest: Option<Sample>,
    rendered: String,
}

impl DataChannel {
    pub fn new(name: impl Into<String>, unit: impl Into<String>, decimals: u8) -> Self {
        Self {
            index: None,
            name: name.into(),
            unit: unit.into(),
            decimals,
            persistent: false,
            values: RunningStats::new(),
            times: RunningStats::new(),
            newest: None,
            rendered: String::new(),
        }
    }

    /// Marks the channel as exempt from periodic (non-forced) clears.
    #[must_use]
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn assign_index(&mut self, index: u8) {
        self.index = Some(index);
    }

    pub fn index(&self) -> Option<u8> {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn decimals(&self) -> u8 {
        self.decimals
    }

    pub fn set_decimals(&mut self, decimals: u8) {
        self.decimals = decimals;
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn stats(&self) -> &RunningStats {
        &self.values
    }

    pub fn count(&self) -> u32 {
        self.values.count()
    }

    pub fn newest_value(&self) -> Option<f64> {
        self.newest.map(|s| s.value)
    }

    pub fn newest_time(&self) -> Option<u32> {
        self.newest.map(|s| s.time)
    }

    pub fn clear(&mut self, force: bool) {
        if self.persistent && !force {
            return;
        }
        self.values.clear();
        self.times.clear();
        self.newest = None;
    }

    pub fn set_newest_value(&mut self, value: f64, time: u32) {
        self.newest = Some(Sample { value, time });
    }

    pub fn invalidate_newest(&mut self) {
        self.newest = None;
    }

    /// Parses the numeric prefix of `raw` as the newest sample.
    ///
    /// Returns false (and invalidates the newest sample) if no number is
    /// found, or in strict mode if anything but whitespace follows it.
    pub fn set_newest_value_str(&mut self, raw: &str, time: u32, options: &ParseOptions) -> bool {
        let Some((value, decimals, rest)) = parse_numeric_prefix(raw, options.separator) else {
            self.newest = None;
            return false;
        };
        if options.strict && !rest.trim().is_empty() {
            self.newest = None;
            return false;
        }
        if options.infer_precision {
            self.decimals = decimals.saturating_add(options.extra_digits);
        }
        self.newest = Some(Sample { value, time });
        true
    }

    /// Commits the newest sample into the running statistics.
    ///
    /// Statistics restart when not averaging, or when the sample is older
    /// than the running mean time (clock wraparound).
    pub fn save(&mut self, average: bool) -> bool {
        let Some(sample) = self.newest else {
            warn!(channel = self.name.as_str(), "no valid newest sample to save");
            return false;
        };
        let discontinuous = self
            .times
            .mean()
            .is_some_and(|mean| f64::from(sample.time) < mean);
        if !average || discontinuous {
            self.values.clear();
            self.times.clear();
        }
        self.values.add(sample.value);
        self.times.add(f64::from(sample.time));
        true
    }

    /// Renders the accumulated statistics into the render cache.
    ///
    /// Returns false when there is no data; the cache then holds the null
    /// entry for this channel.
    pub fn render(&mut self, include_time_offset: bool, now: u32) -> bool {
        let n = self.values.count();
        let unit = non_empty(&self.unit);
        let mut entry = match (self.values.mean(), n) {
            (Some(mean), 1) => Entry::scalar(&self.name, round_to(mean, self.decimals), unit).with_count(1),
            (Some(mean), _) => {
                let sd = self.values.std_dev().unwrap_or(0.0);
                Entry::scalar(&self.name, round_to(mean, self.decimals), unit)
                    .with_sd(round_to(sd, self.decimals.saturating_add(1)))
                    .with_count(n)
            }
            (None, _) => Entry::null(&self.name),
        };
        if include_time_offset {
            if let Some(offset) = self.time_offset(now) {
                entry = entry.with_offset(offset);
            }
        }
        self.rendered = entry.to_json();
        n > 0
    }

    /// Renders the newest raw sample (live value) into the render cache.
    pub fn render_info(&mut self) -> bool {
        let entry = match self.newest {
            Some(sample) => Entry::scalar(&self.name, round_to(sample.value, self.decimals), non_empty(&self.unit)),
            None => Entry::null(&self.name),
        };
        self.rendered = entry.to_json();
        self.newest.is_some()
    }

    pub fn rendered(&self) -> &str {
        &self.rendered
    }

    /// Milliseconds between the mean sample time and `now`.
    pub fn time_offset(&self, now: u32) -> Option<u64> {
        let mean = self.times.mean()?;
        let offset = (f64::from(now) - mean).max(0.0).round();
        Some(offset as u64)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}

/// Splits `raw` into its leading number, the number of decimals after the
/// separator, and the unparsed rest.
fn parse_numeric_prefix(raw: &str, separator: char) -> Option<(f64, u8, &str)> {
    let s = raw.trim_start();
    let mut number = String::with_capacity(s.len());
    let mut digits = 0u32;
    let mut decimals = 0u8;
    let mut seen_separator = false;
    let mut end = 0;
    for (i, c) in s.char_indices() {
        match c {
            '+' | '-' if i == 0 => number.push(c),
            d if d.is_ascii_digit() => {
                number.push(d);
                digits += 1;
                if seen_separator {
                    decimals = decimals.saturating_add(1);
                }
            }
            c if c == separator && !seen_separator => {
                number.push('.');
                seen_separator = true;
            }
            _ => break,
        }
        end = i + c.len_utf8();
    }
    if digits == 0 {
        return None;
    }
    let value = number.parse::<f64>().ok()?;
    Some((value, decimals, &s[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_prefix_with_trailing_text() {
        let (value, decimals, rest) = parse_numeric_prefix("  -12.340 g", '.').unwrap();
        assert!((value + 12.34).abs() < 1e-9);
        assert_eq!(decimals, 3);
        assert_eq!(rest, " g");
    }

    #[test]
    fn test_numeric_prefix_custom_separator() {
        let (value, decimals, rest) = parse_numeric_prefix("3,5", ',').unwrap();
        assert!((value - 3.5).abs() < 1e-9);
        assert_eq!(decimals, 1);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_numeric_prefix_requires_digits() {
        assert!(parse_numeric_prefix("abc", '.').is_none());
        assert!(parse_numeric_prefix("-.", '.').is_none());
        assert!(parse_numeric_prefix("", '.').is_none());
    }
}
