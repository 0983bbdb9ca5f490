use std::borrow::Cow;
use std::sync::Arc;

use chrono::NaiveDateTime;

use ulogview_types::{LogLevel, MemoryUsagePolicy, property};

use crate::builder::{LogBuilder, RawText};
use crate::compressed::CompressedString;

/// Fixed per-log overhead used by memory estimates
const LOG_BASE_SIZE: usize = std::mem::size_of::<Log>();

/// Stored form of a text property
#[derive(Clone, Debug)]
pub enum LogText {
    Plain(Box<str>),
    Buffer(RawText),
    Compressed(CompressedString),
}

impl LogText {
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            Self::Plain(s) => Cow::Borrowed(s),
            Self::Buffer(raw) => Cow::Borrowed(raw.as_str()),
            Self::Compressed(s) => Cow::Owned(s.decompress()),
        }
    }

    fn memory_size(&self) -> usize {
        match self {
            Self::Plain(s) => s.len(),
            Self::Buffer(raw) => raw.retained_size(),
            Self::Compressed(s) => s.memory_size(),
        }
    }
}

/// Immutable structured log record
#[derive(Clone, Debug)]
pub struct Log {
    level: LogLevel,
    timestamp: Option<NaiveDateTime>,
    beginning_timestamp: Option<NaiveDateTime>,
    ending_timestamp: Option<NaiveDateTime>,
    process_id: Option<i32>,
    thread_id: Option<i32>,
    line_number: Option<i32>,
    file_name: Option<Arc<str>>,
    texts: Box<[(Box<str>, LogText)]>,
}

impl Log {
    pub(crate) fn from_builder(builder: &LogBuilder) -> Self {
        let policy = builder.memory_usage_policy();
        let mut texts: Vec<(Box<str>, LogText)> = Vec::new();
        for name in builder.property_names() {
            if is_typed_property(name) {
                continue;
            }
            let value = if property::COMPRESSIBLE.contains(&name) {
                builder.get_compressed_string(name).map(LogText::Compressed)
            } else if policy == MemoryUsagePolicy::BetterPerformance {
                match builder.raw_slice(name) {
                    Some(raw) => Some(LogText::Buffer(raw.clone())),
                    None => builder.get_string(name).map(|s| LogText::Plain(s.into())),
                }
            } else {
                builder.get_string(name).map(|s| LogText::Plain(s.into()))
            };
            if let Some(value) = value {
                texts.push((Box::from(name), value));
            }
        }
        texts.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            level: builder.get_enum(property::LEVEL).unwrap_or_default(),
            timestamp: builder.get_date_time(property::TIMESTAMP),
            beginning_timestamp: builder.get_date_time(property::BEGINNING_TIMESTAMP),
            ending_timestamp: builder.get_date_time(property::ENDING_TIMESTAMP),
            process_id: builder.get_i32(property::PROCESS_ID),
            thread_id: builder.get_i32(property::THREAD_ID),
            line_number: builder.get_i32(property::LINE_NUMBER),
            file_name: builder.get_string(property::FILE_NAME).map(Arc::from),
            texts: texts.into_boxed_slice(),
        }
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamp
    }

    pub fn beginning_timestamp(&self) -> Option<NaiveDateTime> {
        self.beginning_timestamp
    }

    pub fn ending_timestamp(&self) -> Option<NaiveDateTime> {
        self.ending_timestamp
    }

    pub fn process_id(&self) -> Option<i32> {
        self.process_id
    }

    pub fn thread_id(&self) -> Option<i32> {
        self.thread_id
    }

    pub fn line_number(&self) -> Option<i32> {
        self.line_number
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn message(&self) -> Option<Cow<'_, str>> {
        self.text(property::MESSAGE)
    }

    /// Stored form of a text property
    pub fn stored_text(&self, name: &str) -> Option<&LogText> {
        self.texts
            .binary_search_by(|(n, _)| n.as_ref().cmp(name))
            .ok()
            .map(|i| &self.texts[i].1)
    }

    /// Text of a non-typed property
    pub fn text(&self, name: &str) -> Option<Cow<'_, str>> {
        self.stored_text(name).map(LogText::as_text)
    }

    /// Text of any property, typed ones rendered as strings
    pub fn property_text(&self, name: &str) -> Option<Cow<'_, str>> {
        match name {
            property::LEVEL => Some(Cow::Borrowed(self.level.as_str())),
            property::TIMESTAMP => self.timestamp.map(|t| Cow::Owned(t.to_string())),
            property::BEGINNING_TIMESTAMP => {
                self.beginning_timestamp.map(|t| Cow::Owned(t.to_string()))
            }
            property::ENDING_TIMESTAMP => self.ending_timestamp.map(|t| Cow::Owned(t.to_string())),
            property::PROCESS_ID => self.process_id.map(|v| Cow::Owned(v.to_string())),
            property::THREAD_ID => self.thread_id.map(|v| Cow::Owned(v.to_string())),
            property::LINE_NUMBER => self.line_number.map(|v| Cow::Owned(v.to_string())),
            property::FILE_NAME => self.file_name.as_deref().map(Cow::Borrowed),
            _ => self.text(name),
        }
    }

    /// Names of the stored text properties
    pub fn text_property_names(&self) -> impl Iterator<Item = &str> {
        self.texts.iter().map(|(n, _)| n.as_ref())
    }

    /// Beginning timestamp, else timestamp, else ending timestamp
    pub fn select_earliest_timestamp(&self) -> Option<NaiveDateTime> {
        self.beginning_timestamp
            .or(self.timestamp)
            .or(self.ending_timestamp)
    }

    /// Ending timestamp, else timestamp, else beginning timestamp
    pub fn select_latest_timestamp(&self) -> Option<NaiveDateTime> {
        self.ending_timestamp
            .or(self.timestamp)
            .or(self.beginning_timestamp)
    }

    /// Approximate memory held by this log in bytes
    pub fn memory_size(&self) -> usize {
        LOG_BASE_SIZE
            + self.file_name.as_ref().map_or(0, |f| f.len())
            + self
                .texts
                .iter()
                .map(|(n, t)| n.len() + t.memory_size() + std::mem::size_of::<LogText>())
                .sum::<usize>()
    }
}

fn is_typed_property(name: &str) -> bool {
    matches!(
        name,
        property::LEVEL
            | property::TIMESTAMP
            | property::BEGINNING_TIMESTAMP
            | property::ENDING_TIMESTAMP
            | property::PROCESS_ID
            | property::THREAD_ID
            | property::LINE_NUMBER
            | property::FILE_NAME
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_follows_policy() {
        let line: Arc<str> = Arc::from("web-01 started");
        let mut builder = LogBuilder::with_memory_usage_policy(MemoryUsagePolicy::BetterPerformance);
        builder.set_slice("SourceName", RawText::new(line.clone(), 0..6));
        builder.set("Category", "http");
        builder.set("Message", "started");
        let log = builder.build();
        assert!(matches!(log.stored_text("SourceName"), Some(LogText::Buffer(_))));
        assert!(matches!(log.stored_text("Category"), Some(LogText::Plain(_))));
        assert!(matches!(log.stored_text("Message"), Some(LogText::Compressed(_))));
        assert_eq!(log.text("SourceName").as_deref(), Some("web-01"));
        assert_eq!(log.message().as_deref(), Some("started"));
    }

    #[test]
    fn test_typed_properties() {
        let mut builder = LogBuilder::new();
        builder.set("Level", "Warn");
        builder.set("ThreadId", "0x1F");
        builder.set("LineNumber", "7");
        builder.set("Timestamp", "2024-01-15 10:30:00");
        builder.set("FileName", "/var/log/app.log");
        let log = builder.build();
        assert_eq!(log.level(), LogLevel::Warn);
        assert_eq!(log.thread_id(), Some(31));
        assert_eq!(log.line_number(), Some(7));
        assert_eq!(log.file_name(), Some("/var/log/app.log"));
        assert_eq!(log.property_text("Level").as_deref(), Some("Warn"));
        assert_eq!(log.select_earliest_timestamp(), log.timestamp());
        assert!(log.text("Level").is_none());
    }

    #[test]
    fn test_unparseable_values_are_absent() {
        let mut builder = LogBuilder::new();
        builder.set("Level", "loud");
        builder.set("ProcessId", "pid-1");
        let log = builder.build();
        assert_eq!(log.level(), LogLevel::Undefined);
        assert_eq!(log.process_id(), None);
        assert!(log.memory_size() >= LOG_BASE_SIZE);
    }
}
