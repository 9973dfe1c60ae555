use crate::hal::StatusDisplay;
use alloc::string::String;
use alloc::vec::Vec;

pub const DEFAULT_WIDTH: usize = 20;
pub const DEFAULT_LINES: usize = 4;

#[derive(Debug, Clone, Default)]
struct Line {
    permanent: String,
    temporary: Option<(String, Option<u32>)>,
}

/// In-memory fixed-width display with temporary notices.
///
/// A temporary line is stamped at the first `refresh` after it was printed
/// and reverts once `timeout_ms` has elapsed since that stamp.
#[derive(Debug, Clone)]
pub struct LineDisplay {
    width: usize,
    timeout_ms: u32,
    lines: Vec<Line>,
}

impl LineDisplay {
    pub fn new(lines: usize, width: usize, timeout_ms: u32) -> Self {
        Self {
            width,
            timeout_ms,
            lines: alloc::vec![Line::default(); lines],
        }
    }

    /// Currently visible text of a line (1-based).
    pub fn line(&self, line: u8) -> Option<&str> {
        let line = self.lines.get(usize::from(line).checked_sub(1)?)?;
        Some(match &line.temporary {
            Some((text, _)) => text.as_str(),
            None => line.permanent.as_str(),
        })
    }

    pub fn is_temporary(&self, line: u8) -> bool {
        usize::from(line)
            .checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .is_some_and(|l| l.temporary.is_some())
    }

    fn fit(&self, text: &str) -> String {
        text.chars().take(self.width).collect()
    }
}

impl Default for LineDisplay {
    fn default() -> Self {
        Self::new(DEFAULT_LINES, DEFAULT_WIDTH, 3000)
    }
}

impl StatusDisplay for LineDisplay {
    fn print_line(&mut self, line: u8, text: &str, temporary: bool) {
        let text = self.fit(text);
        let Some(slot) = usize::from(line).checked_sub(1).and_then(|i| self.lines.get_mut(i)) else {
            return;
        };
        if temporary {
            slot.temporary = Some((text, None));
        } else {
            slot.permanent = text;
        }
    }

    fn refresh(&mut self, now: u32) {
        let timeout = self.timeout_ms;
        for line in &mut self.lines {
            let expired = match &mut line.temporary {
                Some((_, stamp @ None)) => {
                    *stamp = Some(now);
                    false
                }
                Some((_, Some(since))) => now.wrapping_sub(*since) >= timeout,
                None => false,
            };
            if expired {
                line.temporary = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temporary_line_reverts_after_timeout() {
        let mut display = LineDisplay::new(2, 8, 1000);
        display.print_line(1, "permanent text", false);
        assert_eq!(display.line(1), Some("permanen"));

        display.print_line(1, "notice", true);
        display.refresh(100);
        assert_eq!(display.line(1), Some("notice"));
        display.refresh(900);
        assert!(display.is_temporary(1));
        display.refresh(1100);
        assert_eq!(display.line(1), Some("permanen"));
    }

    #[test]
    fn test_out_of_range_lines_are_ignored() {
        let mut display = LineDisplay::new(1, 8, 1000);
        display.print_line(0, "zero", false);
        display.print_line(5, "five", false);
        assert_eq!(display.line(1), Some(""));
        assert_eq!(display.line(5), None);
    }
}
