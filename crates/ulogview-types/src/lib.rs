//! Shared types for ulogview
//!
//! This crate contains the vocabulary used across the log building, reading,
//! filtering and session crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod error;

pub use error::{Error, Result};

// ============================================================================
// Log Property Names
// ============================================================================

/// Names of the well-known log properties captured by log patterns
pub mod property {
    pub const BEGINNING_TIMESTAMP: &str = "BeginningTimestamp";
    pub const CATEGORY: &str = "Category";
    pub const DEVICE_NAME: &str = "DeviceName";
    pub const ENDING_TIMESTAMP: &str = "EndingTimestamp";
    pub const EVENT: &str = "Event";
    pub const FILE_NAME: &str = "FileName";
    pub const LEVEL: &str = "Level";
    pub const LINE_NUMBER: &str = "LineNumber";
    pub const MESSAGE: &str = "Message";
    pub const PROCESS_ID: &str = "ProcessId";
    pub const PROCESS_NAME: &str = "ProcessName";
    pub const SOURCE_NAME: &str = "SourceName";
    pub const SUMMARY: &str = "Summary";
    pub const THREAD_ID: &str = "ThreadId";
    pub const THREAD_NAME: &str = "ThreadName";
    pub const TIMESTAMP: &str = "Timestamp";
    pub const USER_NAME: &str = "UserName";

    /// Properties holding free text which may grow large and is worth compressing
    pub const COMPRESSIBLE: &[&str] = &[MESSAGE, SUMMARY, "Extra1", "Extra2", "Extra3", "Extra4"];

    /// Check whether the property holds a timestamp
    pub fn is_timestamp(name: &str) -> bool {
        name == TIMESTAMP || name == BEGINNING_TIMESTAMP || name == ENDING_TIMESTAMP
    }
}

// ============================================================================
// Log Types
// ============================================================================

/// Log severity level
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LogLevel {
    /// No level, also used as "any level" by filters
    #[default]
    Undefined,
    Verbose,
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Parse log level from common spellings
    pub fn from_name(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "verbose" | "v" | "vrb" => Self::Verbose,
            "trace" | "trc" | "trce" => Self::Trace,
            "debug" | "d" | "dbg" | "debg" => Self::Debug,
            "info" | "i" | "inf" | "information" => Self::Info,
            "warn" | "w" | "warning" | "wrn" => Self::Warn,
            "error" | "e" | "err" | "erro" => Self::Error,
            "fatal" | "f" | "panic" | "critical" | "crit" | "ftl" => Self::Fatal,
            _ => Self::Undefined,
        }
    }

    /// Name of the level as stored in log properties
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "Undefined",
            Self::Verbose => "Verbose",
            Self::Trace => "Trace",
            Self::Debug => "Debug",
            Self::Info => "Info",
            Self::Warn => "Warn",
            Self::Error => "Error",
            Self::Fatal => "Fatal",
        }
    }

    /// Short display string (3 chars)
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Undefined => "???",
            Self::Verbose => "VRB",
            Self::Trace => "TRC",
            Self::Debug => "DBG",
            Self::Info => "INF",
            Self::Warn => "WRN",
            Self::Error => "ERR",
            Self::Fatal => "FTL",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ();

    /// Exact (case-sensitive) parse of a stored level name
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Undefined" => Ok(Self::Undefined),
            "Verbose" => Ok(Self::Verbose),
            "Trace" => Ok(Self::Trace),
            "Debug" => Ok(Self::Debug),
            "Info" => Ok(Self::Info),
            "Warn" => Ok(Self::Warn),
            "Error" => Ok(Self::Error),
            "Fatal" => Ok(Self::Fatal),
            _ => Err(()),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key used to sort logs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortKey {
    #[default]
    Id,
    BeginningTimestamp,
    EndingTimestamp,
    Timestamp,
}

/// Direction used to sort logs
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// How multiple text filters are combined
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterCombinationMode {
    /// All text filters must match
    #[default]
    Intersection,
    /// One matching text filter is enough
    Union,
}

impl FromStr for FilterCombinationMode {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Intersection" => Ok(Self::Intersection),
            "Union" => Ok(Self::Union),
            _ => Err(()),
        }
    }
}

impl fmt::Display for FilterCombinationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intersection => f.write_str("Intersection"),
            Self::Union => f.write_str("Union"),
        }
    }
}

/// Strategy trading memory for speed when storing log text
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryUsagePolicy {
    #[default]
    Balance,
    BetterPerformance,
    LessMemoryUsage,
}

/// How raw timestamp text is encoded by a log source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimestampEncoding {
    /// Date/time text, optionally described by a custom format
    #[default]
    Custom,
    /// Seconds since Unix epoch
    Unix,
    /// Milliseconds since Unix epoch
    UnixMilliseconds,
    /// Microseconds since Unix epoch
    UnixMicroseconds,
}

// ============================================================================
// Log Data Source Options
// ============================================================================

/// Name of an option accepted by log data sources
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceOption {
    Category,
    Command,
    Encoding,
    FileName,
    IncludeStandardError,
    IPEndPoint,
    Password,
    QueryString,
    SetupCommands,
    TeardownCommands,
    Uri,
    UserName,
    WorkingDirectory,
}

impl SourceOption {
    pub const ALL: [SourceOption; 13] = [
        Self::Category,
        Self::Command,
        Self::Encoding,
        Self::FileName,
        Self::IncludeStandardError,
        Self::IPEndPoint,
        Self::Password,
        Self::QueryString,
        Self::SetupCommands,
        Self::TeardownCommands,
        Self::Uri,
        Self::UserName,
        Self::WorkingDirectory,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Category => "Category",
            Self::Command => "Command",
            Self::Encoding => "Encoding",
            Self::FileName => "FileName",
            Self::IncludeStandardError => "IncludeStandardError",
            Self::IPEndPoint => "IPEndPoint",
            Self::Password => "Password",
            Self::QueryString => "QueryString",
            Self::SetupCommands => "SetupCommands",
            Self::TeardownCommands => "TeardownCommands",
            Self::Uri => "Uri",
            Self::UserName => "UserName",
            Self::WorkingDirectory => "WorkingDirectory",
        }
    }

    /// Look an option up by its name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|o| o.name() == name)
    }
}

/// Options used to create a log data source
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub include_standard_error: bool,
    #[serde(default, rename = "IPEndPoint", skip_serializing_if = "Option::is_none")]
    pub ip_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub setup_commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teardown_commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

impl SourceOptions {
    /// Options pointing at a single file
    pub fn for_file(file_name: impl Into<String>) -> Self {
        Self {
            file_name: Some(file_name.into()),
            ..Default::default()
        }
    }

    /// Check whether the given option carries a value
    pub fn is_option_set(&self, option: SourceOption) -> bool {
        match option {
            SourceOption::Category => self.category.is_some(),
            SourceOption::Command => self.command.is_some(),
            SourceOption::Encoding => self.encoding.is_some(),
            SourceOption::FileName => self.file_name.is_some(),
            SourceOption::IncludeStandardError => self.include_standard_error,
            SourceOption::IPEndPoint => self.ip_endpoint.is_some(),
            SourceOption::Password => self.password.is_some(),
            SourceOption::QueryString => self.query_string.is_some(),
            SourceOption::SetupCommands => !self.setup_commands.is_empty(),
            SourceOption::TeardownCommands => !self.teardown_commands.is_empty(),
            SourceOption::Uri => self.uri.is_some(),
            SourceOption::UserName => self.user_name.is_some(),
            SourceOption::WorkingDirectory => self.working_directory.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_name() {
        assert_eq!(LogLevel::from_name("ERR"), LogLevel::Error);
        assert_eq!(LogLevel::from_name(" warning "), LogLevel::Warn);
        assert_eq!(LogLevel::from_name("nonsense"), LogLevel::Undefined);
    }

    #[test]
    fn test_level_round_trips_stored_name() {
        for level in [LogLevel::Verbose, LogLevel::Info, LogLevel::Fatal] {
            assert_eq!(level.as_str().parse::<LogLevel>(), Ok(level));
        }
        assert!("error".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_source_options_set() {
        let options = SourceOptions::for_file("/var/log/syslog");
        assert!(options.is_option_set(SourceOption::FileName));
        assert!(!options.is_option_set(SourceOption::Uri));
        assert_eq!(SourceOption::from_name("IPEndPoint"), Some(SourceOption::IPEndPoint));
    }

    #[test]
    fn test_source_options_json_names() {
        let options = SourceOptions {
            ip_endpoint: Some("127.0.0.1:514".to_string()),
            working_directory: Some("/tmp".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["IPEndPoint"], "127.0.0.1:514");
        assert_eq!(json["WorkingDirectory"], "/tmp");
        assert!(json.get("FileName").is_none());
    }
}
