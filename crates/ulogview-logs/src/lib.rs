//! Log processing for ulogview
//!
//! This crate turns raw text into structured logs and keeps them ordered and
//! filtered: log building with adaptive compression, pattern based line
//! parsing, data source contracts, log readers and the filtering engine.

mod builder;
mod compressed;
mod displayable;
mod file_source;
mod filter;
mod log;
mod memory_source;
mod pattern;
mod reader;
mod sorted;
mod source;
pub mod time;

pub use builder::{LogBuilder, RawText};
pub use compressed::{CompressedString, CompressionLevel};
pub use displayable::{DisplayableLog, LogIdGenerator, LogOrdering};
pub use file_source::{FILE_PROVIDER_NAME, FileLogDataSource, FileLogDataSourceProvider};
pub use filter::{
    DEFAULT_CHUNK_SIZE, DisplayableLogFilter, FilterCriteria, FilterEvent, IGNORE_CASE_OPTION,
    TextFilter,
};
pub use log::{Log, LogText};
pub use memory_source::{MemoryLogDataSource, MemoryLogDataSourceProvider};
pub use pattern::{DEFAULT_PATTERN, LineParser, LogPattern, ParseOptions};
pub use reader::{
    DEFAULT_UPDATE_INTERVAL, LogReader, LogReaderOptions, LogReaderState, LogsChange, ReaderEvent,
    ReaderId, ReaderMessage,
};
pub use sorted::SortedLogs;
pub use source::{LineStream, LogDataSource, LogDataSourceProvider, SourceState, is_file_source};

// Re-export types used in our public API
pub use ulogview_types::{Error, LogLevel, MemoryUsagePolicy, Result, SourceOption, SourceOptions};
