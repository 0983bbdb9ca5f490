use std::collections::HashMap;
use std::sync::Arc;

use regex::{Captures, Regex};

use ulogview_types::{LogLevel, MemoryUsagePolicy, Result, TimestampEncoding, property};

use crate::builder::{LogBuilder, RawText};
use crate::log::Log;
use crate::time;

/// Pattern used when a profile defines none
pub const DEFAULT_PATTERN: &str = "^(?<Message>.*)";

/// One step of a multi-line log layout
#[derive(Clone, Debug)]
pub struct LogPattern {
    regex: Regex,
    repeatable: bool,
    skippable: bool,
}

impl LogPattern {
    /// Compile a pattern whose named groups are log property names
    pub fn new(pattern: &str, repeatable: bool, skippable: bool) -> Result<Self> {
        Ok(Self::from_regex(Regex::new(pattern)?, repeatable, skippable))
    }

    pub fn from_regex(regex: Regex, repeatable: bool, skippable: bool) -> Self {
        Self {
            regex,
            repeatable,
            skippable,
        }
    }

    /// Pattern capturing the whole line as the message
    pub fn default_pattern() -> Self {
        match Regex::new(DEFAULT_PATTERN) {
            Ok(regex) => Self::from_regex(regex, false, false),
            Err(e) => unreachable!("default pattern must compile: {e}"),
        }
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Whether the pattern may match several consecutive lines
    pub fn is_repeatable(&self) -> bool {
        self.repeatable
    }

    /// Whether the pattern may match no line at all
    pub fn is_skippable(&self) -> bool {
        self.skippable
    }
}

impl PartialEq for LogPattern {
    fn eq(&self, other: &Self) -> bool {
        self.regex.as_str() == other.regex.as_str()
            && self.repeatable == other.repeatable
            && self.skippable == other.skippable
    }
}

/// How raw lines are turned into logs
#[derive(Clone, Debug)]
pub struct ParseOptions {
    pub patterns: Arc<[LogPattern]>,
    /// Raw level text to level, consulted before common spellings
    pub level_map: Arc<HashMap<String, LogLevel>>,
    pub timestamp_encoding: TimestampEncoding,
    pub timestamp_format: Option<String>,
    pub memory_usage_policy: MemoryUsagePolicy,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            patterns: Arc::from(vec![LogPattern::default_pattern()]),
            level_map: Arc::new(HashMap::new()),
            timestamp_encoding: TimestampEncoding::default(),
            timestamp_format: None,
            memory_usage_policy: MemoryUsagePolicy::default(),
        }
    }
}

impl ParseOptions {
    pub fn with_patterns(patterns: Vec<LogPattern>) -> Self {
        let mut options = Self::default();
        if !patterns.is_empty() {
            options.patterns = Arc::from(patterns);
        }
        options
    }

    /// Map raw level text to a level
    pub fn map_level(&self, raw: &str) -> LogLevel {
        match self.level_map.get(raw) {
            Some(level) => *level,
            None => LogLevel::from_name(raw),
        }
    }
}

/// Stateful matcher feeding lines of one source into a [`LogBuilder`]
pub struct LineParser {
    options: ParseOptions,
    builder: LogBuilder,
    file_name: Option<Arc<str>>,
    /// Index of the next pattern to try
    next: usize,
    /// Repeatable pattern matched by the previous line
    repeating: Option<usize>,
    first_line: Option<u32>,
}

impl LineParser {
    pub fn new(options: ParseOptions, file_name: Option<Arc<str>>) -> Self {
        let builder = LogBuilder::with_memory_usage_policy(options.memory_usage_policy);
        Self {
            options,
            builder,
            file_name,
            next: 0,
            repeating: None,
            first_line: None,
        }
    }

    /// Feed one line, pushing every completed log into `out`
    pub fn parse_line(&mut self, line: Arc<str>, line_number: u32, out: &mut Vec<Log>) {
        let was_idle = self.next == 0 && self.repeating.is_none();
        if self.try_line(&line, line_number, out) {
            return;
        }
        if self.is_complete() {
            out.push(self.emit());
        } else if !self.builder.is_empty() {
            tracing::trace!(line_number, "Drop partially matched log");
        }
        self.reset();
        if !was_idle && self.try_line(&line, line_number, out) {
            return;
        }
        tracing::trace!(line_number, "Line matched no pattern");
    }

    /// Flush a pending log at end of data
    pub fn finish(&mut self, out: &mut Vec<Log>) {
        if self.is_complete() {
            out.push(self.emit());
        }
        self.reset();
    }

    fn try_line(&mut self, line: &Arc<str>, line_number: u32, out: &mut Vec<Log>) -> bool {
        let count = self.options.patterns.len();
        if let Some(index) = self.repeating {
            let patterns = Arc::clone(&self.options.patterns);
            if let Some(captures) = patterns[index].regex.captures(line) {
                self.capture(&patterns[index].regex, &captures, line, true);
                return true;
            }
            self.repeating = None;
            self.next = index + 1;
        }
        let patterns = Arc::clone(&self.options.patterns);
        let mut index = self.next;
        while index < count {
            let pattern = &patterns[index];
            if let Some(captures) = pattern.regex.captures(line) {
                if self.builder.is_empty() {
                    self.first_line = Some(line_number);
                }
                self.capture(&pattern.regex, &captures, line, pattern.repeatable);
                if pattern.repeatable {
                    self.repeating = Some(index);
                    self.next = index;
                } else {
                    self.next = index + 1;
                    if self.next == count {
                        out.push(self.emit());
                    }
                }
                return true;
            }
            if !pattern.skippable {
                break;
            }
            index += 1;
        }
        false
    }

    /// Whether the accumulated properties form a full log
    fn is_complete(&self) -> bool {
        if self.builder.is_empty() {
            return false;
        }
        let start = match self.repeating {
            Some(index) => index + 1,
            None => self.next,
        };
        self.options.patterns[start.min(self.options.patterns.len())..]
            .iter()
            .all(LogPattern::is_skippable)
    }

    fn capture(&mut self, regex: &Regex, captures: &Captures<'_>, line: &Arc<str>, repeated: bool) {
        for name in regex.capture_names().flatten() {
            let Some(m) = captures.name(name) else {
                continue;
            };
            if name == property::LEVEL {
                let level = self.options.map_level(m.as_str());
                self.builder.set(name, level.as_str());
            } else if property::is_timestamp(name) {
                let parsed = time::parse_timestamp(
                    m.as_str(),
                    self.options.timestamp_encoding,
                    self.options.timestamp_format.as_deref(),
                );
                if let Some(timestamp) = parsed {
                    self.builder.set(name, time::to_binary(timestamp).to_string());
                }
            } else {
                let raw = RawText::new(Arc::clone(line), m.range());
                if repeated {
                    self.builder.append_slice_to_next_line(name, raw);
                } else {
                    self.builder.set_slice(name, raw);
                }
            }
        }
    }

    fn emit(&mut self) -> Log {
        if let Some(file_name) = &self.file_name {
            self.builder.set(property::FILE_NAME, &**file_name);
            if let Some(line_number) = self.first_line {
                self.builder.set(property::LINE_NUMBER, line_number.to_string());
            }
        }
        let log = self.builder.build_and_reset();
        self.reset();
        log
    }

    fn reset(&mut self) {
        self.builder.reset();
        self.next = 0;
        self.repeating = None;
        self.first_line = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(options: ParseOptions, lines: &[&str]) -> Vec<Log> {
        let mut parser = LineParser::new(options, Some(Arc::from("/tmp/app.log")));
        let mut out = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            parser.parse_line(Arc::from(*line), i as u32 + 1, &mut out);
        }
        parser.finish(&mut out);
        out
    }

    #[test]
    fn test_default_pattern_one_log_per_line() {
        let logs = parse_all(ParseOptions::default(), &["first", "second"]);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].message().as_deref(), Some("second"));
        assert_eq!(logs[1].line_number(), Some(2));
        assert_eq!(logs[1].file_name(), Some("/tmp/app.log"));
    }

    #[test]
    fn test_level_and_timestamp_capture() {
        let pattern = LogPattern::new(
            r"^(?<Timestamp>\S+ \S+) (?<Level>\w+) \[(?<ProcessId>\d+)\] (?<Message>.*)$",
            false,
            false,
        )
        .unwrap();
        let mut options = ParseOptions::with_patterns(vec![pattern]);
        options.level_map = Arc::new(HashMap::from([("E".to_string(), LogLevel::Error)]));
        let logs = parse_all(
            options,
            &[
                "2024-01-15 10:30:00 E [42] disk full",
                "2024-01-15 10:30:01 warning [42] retry",
            ],
        );
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].level(), LogLevel::Error);
        assert_eq!(logs[1].level(), LogLevel::Warn);
        assert_eq!(logs[0].process_id(), Some(42));
        assert_eq!(logs[0].timestamp(), time::parse_date_time("2024-01-15 10:30:00"));
    }

    #[test]
    fn test_repeatable_continuation_lines() {
        let head = LogPattern::new(r"^(?<Level>[A-Z]+): (?<Message>.*)$", false, false).unwrap();
        let tail = LogPattern::new(r"^\s+(?<Message>.*)$", true, true).unwrap();
        let logs = parse_all(
            ParseOptions::with_patterns(vec![head, tail]),
            &["ERROR: boom", "  at a()", "  at b()", "INFO: ok", "WARN: last"],
        );
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].message().as_deref(), Some("boom\nat a()\nat b()"));
        assert_eq!(logs[0].line_number(), Some(1));
        assert_eq!(logs[1].message().as_deref(), Some("ok"));
        assert_eq!(logs[1].line_number(), Some(4));
        assert_eq!(logs[2].level(), LogLevel::Warn);
    }

    #[test]
    fn test_partial_log_is_dropped() {
        let head = LogPattern::new(r"^BEGIN (?<Message>.*)$", false, false).unwrap();
        let body = LogPattern::new(r"^END (?<Summary>.*)$", false, false).unwrap();
        let logs = parse_all(
            ParseOptions::with_patterns(vec![head, body]),
            &["BEGIN a", "noise", "BEGIN b", "END done"],
        );
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].message().as_deref(), Some("b"));
        assert_eq!(logs[0].text("Summary").as_deref(), Some("done"));
    }

    #[test]
    fn test_unix_timestamp_encoding() {
        let pattern = LogPattern::new(r"^(?<Timestamp>\d+) (?<Message>.*)$", false, false).unwrap();
        let mut options = ParseOptions::with_patterns(vec![pattern]);
        options.timestamp_encoding = TimestampEncoding::UnixMilliseconds;
        let logs = parse_all(options, &["1700000000000 hi"]);
        assert_eq!(
            logs[0].timestamp(),
            time::parse_timestamp("1700000000", TimestampEncoding::Unix, None)
        );
    }
}
