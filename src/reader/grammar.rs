use alloc::string::String;
use alloc::vec::Vec;
use tracing::debug;

/// Byte classes that accumulate into a frame field.
#[derive(Debug, Clone, Copy)]
pub enum ByteClass {
    /// Digits, sign, decimal separators. Leading spaces are skipped.
    Digit,
    /// Unit letters, plus `%` and `/`.
    UnitLetter,
    /// Exactly one printable character (e.g. `S` for stable, space for unstable).
    StableFlag,
    /// Any printable character except the terminating literal.
    FreeText,
    Custom(fn(u8) -> bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accept {
    Store,
    Skip,
    Reject,
}

impl ByteClass {
    fn accepts(self, byte: u8, accumulated: usize, terminator: Option<u8>) -> Accept {
        let stored = match self {
            ByteClass::Digit => {
                if byte == b' ' && accumulated == 0 {
                    return Accept::Skip;
                }
                byte.is_ascii_digit() || matches!(byte, b'.' | b',' | b'+' | b'-')
            }
            ByteClass::UnitLetter => byte.is_ascii_alphabetic() || matches!(byte, b'%' | b'/'),
            ByteClass::StableFlag => accumulated == 0 && (byte.is_ascii_graphic() || byte == b' '),
            ByteClass::FreeText => Some(byte) != terminator && (byte.is_ascii_graphic() || byte == b' '),
            ByteClass::Custom(predicate) => predicate(byte),
        };
        if stored {
            Accept::Store
        } else {
            Accept::Reject
        }
    }
}

/// Frame field a class element accumulates into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Value,
    Variable,
    Units,
    Flag,
    Discard,
}

#[derive(Debug, Clone, Copy)]
pub enum Pattern {
    Literal(u8),
    Class(ByteClass, Field),
}

/// Ordered byte-pattern grammar for one instrument frame.
///
/// A class element keeps consuming bytes it accepts; the literal right
/// after it terminates it. Grammars should end with a literal.
#[derive(Debug, Clone, Default)]
pub struct Grammar {
    patterns: Vec<Pattern>,
}

impl Grammar {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn literal(mut self, byte: u8) -> Self {
        self.patterns.push(Pattern::Literal(byte));
        self
    }

    #[must_use]
    pub fn literals(mut self, bytes: &[u8]) -> Self {
        self.patterns.extend(bytes.iter().copied().map(Pattern::Literal));
        self
    }

    #[must_use]
    pub fn class(mut self, class: ByteClass, field: Field) -> Self {
        self.patterns.push(Pattern::Class(class, field));
        self
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Fields extracted from one frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    pub values: Vec<String>,
    pub variable: String,
    pub units: String,
    pub flag: String,
}

impl Frame {
    pub fn value(&self, index: usize) -> Option<&str> {
        self.values.get(index).map(String::as_str)
    }

    fn clear(&mut self) {
        self.values.clear();
        self.variable.clear();
        self.units.clear();
        self.flag.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Complete,
    /// A field grew past the configured maximum.
    Overflow,
}

/// Matches bytes against a grammar one at a time.
///
/// A byte that fits neither the current element nor the literal that
/// terminates it counts as an error and moves the cursor forward. A
/// mismatched byte equal to the grammar's final literal ends the frame
/// there, so a dropped byte never spills into the next frame.
#[derive(Debug, Clone)]
pub struct GrammarMatcher {
    cursor: usize,
    errors: u16,
    field: String,
    frame: Frame,
    max_field_length: usize,
}

impl GrammarMatcher {
    pub fn new(max_field_length: usize) -> Self {
        Self {
            cursor: 0,
            errors: 0,
            field: String::new(),
            frame: Frame::default(),
            max_field_length,
        }
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
        self.errors = 0;
        self.field.clear();
        self.frame.clear();
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn errors(&self) -> u16 {
        self.errors
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// True once any byte of the current frame has been matched.
    pub fn is_started(&self) -> bool {
        self.cursor > 0 || !self.field.is_empty()
    }

    pub fn feed(&mut self, grammar: &[Pattern], byte: u8) -> Step {
        loop {
            let Some(&pattern) = grammar.get(self.cursor) else {
                return Step::Complete;
            };
            match pattern {
                Pattern::Literal(expected) => {
                    if byte != expected {
                        self.record_error(byte);
                        if Self::ends_frame(grammar, byte) {
                            return self.finish_early(grammar);
                        }
                    }
                    self.cursor += 1;
                    break;
                }
                Pattern::Class(class, field) => {
                    let terminator = match grammar.get(self.cursor + 1) {
                        Some(Pattern::Literal(b)) => Some(*b),
                        _ => None,
                    };
                    match class.accepts(byte, self.field.len(), terminator) {
                        Accept::Store => {
                            if self.field.len() >= self.max_field_length {
                                return Step::Overflow;
                            }
                            self.field.push(char::from(byte));
                            break;
                        }
                        Accept::Skip => break,
                        Accept::Reject => {
                            self.close_field(field);
                            if terminator == Some(byte) {
                                self.cursor += 2;
                                break;
                            }
                            self.cursor += 1;
                            if terminator.is_none() {
                                // next element gets this byte
                                continue;
                            }
                            self.record_error(byte);
                            if Self::ends_frame(grammar, byte) {
                                return self.finish_early(grammar);
                            }
                            break;
                        }
                    }
                }
            }
        }
        if self.cursor >= grammar.len() {
            Step::Complete
        } else {
            Step::Continue
        }
    }

    fn ends_frame(grammar: &[Pattern], byte: u8) -> bool {
        matches!(grammar.last(), Some(Pattern::Literal(last)) if *last == byte)
    }

    fn finish_early(&mut self, grammar: &[Pattern]) -> Step {
        debug!(cursor = self.cursor, errors = self.errors, "frame ended early on final delimiter");
        self.cursor = grammar.len();
        Step::Complete
    }

    fn record_error(&mut self, byte: u8) {
        self.errors = self.errors.saturating_add(1);
        debug!(cursor = self.cursor, byte, errors = self.errors, "unexpected byte in frame");
    }

    fn close_field(&mut self, field: Field) {
        let text = core::mem::take(&mut self.field);
        match field {
            Field::Value => self.frame.values.push(text),
            Field::Variable => self.frame.variable.push_str(&text),
            Field::Units => self.frame.units.push_str(&text),
            Field::Flag => self.frame.flag.push_str(&text),
            Field::Discard => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(matcher: &mut GrammarMatcher, grammar: &Grammar, bytes: &[u8]) -> Step {
        let mut step = Step::Continue;
        for &b in bytes {
            step = matcher.feed(grammar.patterns(), b);
            if step != Step::Continue {
                break;
            }
        }
        step
    }

    #[test]
    fn test_literal_and_value_fields() {
        let grammar = Grammar::new()
            .literal(b'V')
            .class(ByteClass::Digit, Field::Value)
            .literal(b';')
            .class(ByteClass::Digit, Field::Value)
            .literal(b'\n');
        let mut matcher = GrammarMatcher::new(16);
        assert_eq!(feed_all(&mut matcher, &grammar, b"V  1.5;-2\n"), Step::Complete);
        assert_eq!(matcher.errors(), 0);
        assert_eq!(matcher.frame().values, ["1.5", "-2"]);
    }

    #[test]
    fn test_mismatch_advances_cursor() {
        let grammar = Grammar::new().literals(b"AB\n");
        let mut matcher = GrammarMatcher::new(16);
        assert_eq!(feed_all(&mut matcher, &grammar, b"AX\n"), Step::Complete);
        assert_eq!(matcher.errors(), 1);
    }

    #[test]
    fn test_final_delimiter_ends_malformed_frame() {
        let grammar = Grammar::new()
            .class(ByteClass::Digit, Field::Value)
            .literal(b' ')
            .class(ByteClass::UnitLetter, Field::Units)
            .literals(b"\r\n");
        let mut matcher = GrammarMatcher::new(16);
        assert_eq!(feed_all(&mut matcher, &grammar, b"12 g\n"), Step::Complete);
        assert_eq!(matcher.errors(), 1);

        matcher.reset();
        assert_eq!(feed_all(&mut matcher, &grammar, b"13 g\r\n"), Step::Complete);
        assert_eq!(matcher.errors(), 0);
        assert_eq!(matcher.frame().value(0), Some("13"));
    }

    #[test]
    fn test_field_overflow() {
        let grammar = Grammar::new().class(ByteClass::FreeText, Field::Variable).literal(b'\n');
        let mut matcher = GrammarMatcher::new(3);
        assert_eq!(feed_all(&mut matcher, &grammar, b"abcd\n"), Step::Overflow);
    }

    #[test]
    fn test_class_without_terminator_hands_byte_on() {
        let grammar = Grammar::new()
            .class(ByteClass::Digit, Field::Value)
            .class(ByteClass::UnitLetter, Field::Units)
            .literal(b'\n');
        let mut matcher = GrammarMatcher::new(16);
        assert_eq!(feed_all(&mut matcher, &grammar, b"42mg\n"), Step::Complete);
        assert_eq!(matcher.frame().value(0), Some("42"));
        assert_eq!(matcher.frame().units, "mg");
        assert_eq!(matcher.errors(), 0);
    }
}
