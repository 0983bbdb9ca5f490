use std::collections::HashMap;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{NaiveDateTime, TimeDelta};

use ulogview_types::MemoryUsagePolicy;

use crate::compressed::CompressedString;
use crate::log::Log;
use crate::time;

/// Shared slice of a raw source line
#[derive(Clone, Debug)]
pub struct RawText {
    source: Arc<str>,
    range: Range<usize>,
}

impl RawText {
    /// Slice `range` (byte offsets on char boundaries) of `source`
    pub fn new(source: Arc<str>, range: Range<usize>) -> Self {
        debug_assert!(source.get(range.clone()).is_some());
        Self { source, range }
    }

    /// Slice covering the whole of `source`
    pub fn whole(source: Arc<str>) -> Self {
        let range = 0..source.len();
        Self { source, range }
    }

    pub fn as_str(&self) -> &str {
        self.source.get(self.range.clone()).unwrap_or_default()
    }

    /// Bytes kept alive by this slice
    pub fn retained_size(&self) -> usize {
        self.source.len()
    }
}

/// Value of a property while a log is being built
#[derive(Clone, Debug)]
enum PropertyValue {
    Text(String),
    Slice(RawText),
}

impl PropertyValue {
    fn as_str(&self) -> &str {
        match self {
            Self::Text(s) => s,
            Self::Slice(raw) => raw.as_str(),
        }
    }

    fn joined(&self, separator: Option<char>, value: &str) -> Self {
        match self {
            Self::Text(current) => {
                let mut text = String::with_capacity(current.len() + value.len() + 1);
                text.push_str(current);
                if let Some(separator) = separator {
                    text.push(separator);
                }
                text.push_str(value);
                Self::Text(text)
            }
            Self::Slice(current) => {
                let current = current.as_str();
                let mut buffer = String::with_capacity(current.len() + value.len() + 1);
                buffer.push_str(current);
                if let Some(separator) = separator {
                    buffer.push(separator);
                }
                buffer.push_str(value);
                Self::Slice(RawText::whole(Arc::from(buffer)))
            }
        }
    }
}

/// Builder accumulating named text captures into a [`Log`]
///
/// One builder is reused for every record of a stream through
/// [`LogBuilder::build_and_reset`]. Not thread-safe.
#[derive(Debug, Default)]
pub struct LogBuilder {
    properties: HashMap<String, PropertyValue>,
    memory_usage_policy: MemoryUsagePolicy,
}

impl LogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory_usage_policy(policy: MemoryUsagePolicy) -> Self {
        Self {
            properties: HashMap::new(),
            memory_usage_policy: policy,
        }
    }

    pub fn memory_usage_policy(&self) -> MemoryUsagePolicy {
        self.memory_usage_policy
    }

    pub fn set_memory_usage_policy(&mut self, policy: MemoryUsagePolicy) {
        self.memory_usage_policy = policy;
    }

    /// Set or override a property with plain text
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.properties
            .insert(name.to_string(), PropertyValue::Text(value.into()));
    }

    /// Set or override a property with a slice of a raw line
    pub fn set_slice(&mut self, name: &str, value: RawText) {
        self.properties
            .insert(name.to_string(), PropertyValue::Slice(value));
    }

    /// Append text to a property, behaves like [`LogBuilder::set`] if absent
    pub fn append(&mut self, name: &str, value: &str) {
        self.join(name, None, value, || PropertyValue::Text(value.to_string()));
    }

    /// Append a raw slice to a property, behaves like [`LogBuilder::set_slice`] if absent
    pub fn append_slice(&mut self, name: &str, value: RawText) {
        let text = value.as_str().to_string();
        self.join(name, None, &text, move || PropertyValue::Slice(value));
    }

    /// Append text as a new line of a property
    pub fn append_to_next_line(&mut self, name: &str, value: &str) {
        self.join(name, Some('\n'), value, || {
            PropertyValue::Text(value.to_string())
        });
    }

    /// Append a raw slice as a new line of a property
    pub fn append_slice_to_next_line(&mut self, name: &str, value: RawText) {
        let text = value.as_str().to_string();
        self.join(name, Some('\n'), &text, move || PropertyValue::Slice(value));
    }

    fn join(
        &mut self,
        name: &str,
        separator: Option<char>,
        value: &str,
        absent: impl FnOnce() -> PropertyValue,
    ) {
        match self.properties.get_mut(name) {
            Some(current) => *current = current.joined(separator, value),
            None => {
                self.properties.insert(name.to_string(), absent());
            }
        }
    }

    /// Build a new [`Log`] from the accumulated properties
    pub fn build(&self) -> Log {
        Log::from_builder(self)
    }

    /// Build a new [`Log`] and clear all properties
    pub fn build_and_reset(&mut self) -> Log {
        let log = Log::from_builder(self);
        self.reset();
        log
    }

    /// Clear all properties
    pub fn reset(&mut self) {
        self.properties.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    fn text(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(PropertyValue::as_str)
    }

    /// Raw slice backing a property, if it was set from a source line
    pub(crate) fn raw_slice(&self, name: &str) -> Option<&RawText> {
        match self.properties.get(name)? {
            PropertyValue::Slice(raw) => Some(raw),
            PropertyValue::Text(_) => None,
        }
    }

    pub fn get_string(&self, name: &str) -> Option<String> {
        self.text(name).map(str::to_string)
    }

    /// Get property compressed under the active memory usage policy
    pub fn get_compressed_string(&self, name: &str) -> Option<CompressedString> {
        self.text(name)
            .map(|s| CompressedString::with_policy(s, self.memory_usage_policy))
    }

    /// Get property as `i32`, also accepting a `0x` prefixed hex form
    pub fn get_i32(&self, name: &str) -> Option<i32> {
        let s = self.text(name)?;
        if s.len() > 2 && s.starts_with("0x") {
            return u32::from_str_radix(&s[2..], 16).ok().map(|v| v as i32);
        }
        s.parse().ok()
    }

    /// Get property as `i64`, also accepting `0x` hex with an optional trailing `L`
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        let s = self.text(name)?;
        if s.len() > 2 && s.starts_with("0x") {
            let digits = s[2..].strip_suffix('L').unwrap_or(&s[2..]);
            return u64::from_str_radix(digits, 16).ok().map(|v| v as i64);
        }
        s.parse().ok()
    }

    /// Get property as timestamp, falling back to the binary tick form
    pub fn get_date_time(&self, name: &str) -> Option<NaiveDateTime> {
        let s = self.text(name)?;
        time::parse_date_time(s).or_else(|| s.trim().parse::<i64>().ok().and_then(time::from_binary))
    }

    /// Get property as duration, plain numbers are milliseconds
    pub fn get_time_span(&self, name: &str) -> Option<TimeDelta> {
        time::parse_time_span(self.text(name)?)
    }

    /// Get property parsed into an enumeration
    pub fn get_enum<T: FromStr>(&self, name: &str) -> Option<T> {
        self.text(name)?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulogview_types::LogLevel;

    fn raw(s: &str) -> RawText {
        RawText::whole(Arc::from(s))
    }

    #[test]
    fn test_append_to_absent_property_sets_it() {
        let mut builder = LogBuilder::new();
        builder.append("Message", "hello");
        builder.append_to_next_line("Extra1", "first");
        assert_eq!(builder.get_string("Message").as_deref(), Some("hello"));
        assert_eq!(builder.get_string("Extra1").as_deref(), Some("first"));
    }

    #[test]
    fn test_append_is_independent_of_representation() {
        let steps: [(bool, &str); 4] = [(false, "a"), (true, "b"), (false, "c"), (true, "")];
        let mut expected = String::new();
        let mut from_text = LogBuilder::new();
        let mut from_slice = LogBuilder::new();
        from_text.set("Message", "start");
        from_slice.set_slice("Message", RawText::new(Arc::from("xxstartyy"), 2..7));
        expected.push_str("start");
        for (next_line, value) in steps {
            if next_line {
                expected.push('\n');
                from_text.append_to_next_line("Message", value);
                from_slice.append_slice_to_next_line("Message", raw(value));
            } else {
                from_text.append("Message", value);
                from_slice.append_slice("Message", raw(value));
            }
            expected.push_str(value);
        }
        assert_eq!(from_text.get_string("Message").as_deref(), Some(expected.as_str()));
        assert_eq!(from_slice.get_string("Message").as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn test_integer_getters() {
        let mut builder = LogBuilder::new();
        builder.set("A", "0x7FFFFFFFFFFFFFFF");
        builder.set("B", "0x10");
        builder.set("C", "0xFFL");
        builder.set("D", "-42");
        builder.set("E", "0x");
        builder.set("F", "twelve");
        assert_eq!(builder.get_i64("A"), Some(i64::MAX));
        assert_eq!(builder.get_i32("B"), Some(16));
        assert_eq!(builder.get_i64("C"), Some(255));
        assert_eq!(builder.get_i32("D"), Some(-42));
        assert_eq!(builder.get_i32("E"), None);
        assert_eq!(builder.get_i64("F"), None);
        assert_eq!(builder.get_i32("Missing"), None);
    }

    #[test]
    fn test_time_span_getter() {
        let mut builder = LogBuilder::new();
        builder.set("Duration", "1500");
        assert_eq!(builder.get_time_span("Duration"), Some(TimeDelta::milliseconds(1500)));
        builder.set("Duration", "00:00:02");
        assert_eq!(builder.get_time_span("Duration"), Some(TimeDelta::seconds(2)));
        builder.set("Duration", "soon");
        assert_eq!(builder.get_time_span("Duration"), None);
    }

    #[test]
    fn test_date_time_getter_binary_fallback() {
        let ts = time::parse_date_time("2024-03-01 08:00:00").unwrap();
        let mut builder = LogBuilder::new();
        builder.set("Timestamp", time::to_binary(ts).to_string());
        assert_eq!(builder.get_date_time("Timestamp"), Some(ts));
        builder.set("Timestamp", "2024-03-01 08:00:00");
        assert_eq!(builder.get_date_time("Timestamp"), Some(ts));
        builder.set("Timestamp", "yesterday");
        assert_eq!(builder.get_date_time("Timestamp"), None);
    }

    #[test]
    fn test_enum_getter() {
        let mut builder = LogBuilder::new();
        builder.set("Level", "Error");
        assert_eq!(builder.get_enum::<LogLevel>("Level"), Some(LogLevel::Error));
        builder.set("Level", "bogus");
        assert_eq!(builder.get_enum::<LogLevel>("Level"), None);
    }

    #[test]
    fn test_compressed_string_getter_round_trips() {
        let mut builder = LogBuilder::with_memory_usage_policy(MemoryUsagePolicy::LessMemoryUsage);
        builder.set("Message", "");
        assert_eq!(builder.get_compressed_string("Message").unwrap().decompress(), "");
        let text = "x".repeat(300);
        builder.set("Message", text.clone());
        assert_eq!(builder.get_compressed_string("Message").unwrap().decompress(), text);
        assert!(builder.get_compressed_string("Missing").is_none());
    }

    #[test]
    fn test_build_and_reset() {
        let mut builder = LogBuilder::new();
        builder.set("Message", "one");
        builder.set("ProcessId", "12");
        assert_eq!(builder.property_count(), 2);
        let log = builder.build_and_reset();
        assert!(builder.is_empty());
        assert_eq!(log.process_id(), Some(12));
        assert_eq!(log.message().as_deref(), Some("one"));
    }
}
