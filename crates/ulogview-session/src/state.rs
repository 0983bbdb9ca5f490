//! Serializable snapshot of a session

use serde::{Deserialize, Serialize};

use ulogview_types::{FilterCombinationMode, LogLevel, Result, SourceOptions};

/// Snapshot used to suspend a session and restore it later
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SessionState {
    /// ID of the log profile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log_readers: Vec<LogReaderSnapshot>,
    #[serde(default)]
    pub log_filters_combination_mode: FilterCombinationMode,
    #[serde(default)]
    pub log_level_filter: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_process_id_filter: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_text_filter: Option<TextFilterSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_thread_id_filter: Option<i32>,
    /// IDs of the selected predefined text filters
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub predefined_log_text_filters: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogReaderSnapshot {
    pub options: SourceOptions,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TextFilterSnapshot {
    pub pattern: String,
    #[serde(default)]
    pub options: u32,
}

impl SessionState {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
