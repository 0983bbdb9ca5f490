//! Log profiles describing how to read and show logs

use std::collections::HashMap;
use std::sync::Arc;

use ulogview_logs::{LogOrdering, LogPattern, ParseOptions, TextFilter};
use ulogview_types::{
    LogLevel, MemoryUsagePolicy, Result, SortDirection, SortKey, SourceOptions, TimestampEncoding,
    property,
};

/// Source kind, parsing rules and presentation of logs
#[derive(Clone, Debug, PartialEq)]
pub struct LogProfile {
    pub id: String,
    pub name: String,
    /// Name of the registered data source provider
    pub data_source_provider: String,
    pub data_source_options: SourceOptions,
    pub log_patterns: Vec<LogPattern>,
    pub log_level_map: HashMap<String, LogLevel>,
    pub sort_key: SortKey,
    pub sort_direction: SortDirection,
    pub is_continuous_reading: bool,
    pub timestamp_encoding: TimestampEncoding,
    pub timestamp_format: Option<String>,
    /// Properties shown for each log, text filters are tested against them
    pub visible_properties: Vec<String>,
    /// Readers cannot be created before a working directory is set
    pub working_directory_needed: bool,
    pub allow_multiple_files: bool,
}

impl LogProfile {
    pub fn new(id: impl Into<String>, data_source_provider: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            data_source_provider: data_source_provider.into(),
            data_source_options: SourceOptions::default(),
            log_patterns: vec![LogPattern::default_pattern()],
            log_level_map: HashMap::new(),
            sort_key: SortKey::Id,
            sort_direction: SortDirection::Ascending,
            is_continuous_reading: false,
            timestamp_encoding: TimestampEncoding::Custom,
            timestamp_format: None,
            visible_properties: vec![property::MESSAGE.to_string()],
            working_directory_needed: false,
            allow_multiple_files: true,
        }
    }

    /// Replace the patterns by compiling `patterns`, each `(regex, repeatable, skippable)`
    pub fn with_patterns(mut self, patterns: &[(&str, bool, bool)]) -> Result<Self> {
        self.log_patterns = patterns
            .iter()
            .map(|(regex, repeatable, skippable)| LogPattern::new(regex, *repeatable, *skippable))
            .collect::<Result<_>>()?;
        Ok(self)
    }

    pub fn ordering(&self) -> LogOrdering {
        LogOrdering::new(self.sort_key, self.sort_direction)
    }

    pub fn parse_options(&self, memory_usage_policy: MemoryUsagePolicy) -> ParseOptions {
        let mut options = ParseOptions::with_patterns(self.log_patterns.clone());
        options.level_map = Arc::new(self.log_level_map.clone());
        options.timestamp_encoding = self.timestamp_encoding;
        options.timestamp_format = self.timestamp_format.clone();
        options.memory_usage_policy = memory_usage_policy;
        options
    }

    /// Properties text filters are tested against
    pub fn filtering_properties(&self) -> Vec<String> {
        let properties: Vec<String> = self
            .visible_properties
            .iter()
            .filter(|name| !property::is_timestamp(name))
            .cloned()
            .collect();
        if properties.is_empty() {
            vec![property::MESSAGE.to_string()]
        } else {
            properties
        }
    }

    /// Changes requiring logs to be read again
    pub(crate) fn needs_reload_from(&self, previous: &LogProfile) -> bool {
        self.log_patterns != previous.log_patterns
            || self.log_level_map != previous.log_level_map
            || self.timestamp_encoding != previous.timestamp_encoding
            || self.timestamp_format != previous.timestamp_format
            || self.is_continuous_reading != previous.is_continuous_reading
    }

    /// Changes requiring the data sources to be created again
    pub(crate) fn needs_reset_from(&self, previous: &LogProfile) -> bool {
        self.data_source_provider != previous.data_source_provider
            || self.data_source_options != previous.data_source_options
            || self.working_directory_needed != previous.working_directory_needed
    }
}

/// Named text filter shared by sessions
#[derive(Clone, Debug, PartialEq)]
pub struct PredefinedLogTextFilter {
    pub id: String,
    pub name: String,
    pub filter: TextFilter,
}

impl PredefinedLogTextFilter {
    pub fn new(id: impl Into<String>, name: impl Into<String>, filter: TextFilter) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            filter,
        }
    }
}
