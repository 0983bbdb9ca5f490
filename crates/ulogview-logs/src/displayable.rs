use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use ulogview_types::{SortDirection, SortKey};

use crate::log::Log;
use crate::reader::ReaderId;
use crate::time;

/// Generator of log IDs, strictly increasing and never reused
#[derive(Debug)]
pub struct LogIdGenerator {
    next: AtomicU64,
}

impl LogIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for LogIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Session-local decoration of a [`Log`]
pub struct DisplayableLog {
    id: u64,
    log: Arc<Log>,
    reader: ReaderId,
    /// Binary forms of the timestamps, 0 when absent
    timestamp: i64,
    beginning_timestamp: i64,
    ending_timestamp: i64,
    marked: AtomicBool,
    memory_size: usize,
}

impl DisplayableLog {
    pub fn new(id: u64, log: Arc<Log>, reader: ReaderId) -> Self {
        let binary = |t: Option<chrono::NaiveDateTime>| t.map_or(0, time::to_binary);
        let timestamp = binary(log.timestamp());
        let beginning_timestamp = binary(log.beginning_timestamp());
        let ending_timestamp = binary(log.ending_timestamp());
        let memory_size = std::mem::size_of::<Self>() + log.memory_size();
        Self {
            id,
            log,
            reader,
            timestamp,
            beginning_timestamp,
            ending_timestamp,
            marked: AtomicBool::new(false),
            memory_size,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn log(&self) -> &Arc<Log> {
        &self.log
    }

    /// Reader which produced the log
    pub fn reader(&self) -> ReaderId {
        self.reader
    }

    pub fn binary_timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn binary_beginning_timestamp(&self) -> i64 {
        self.beginning_timestamp
    }

    pub fn binary_ending_timestamp(&self) -> i64 {
        self.ending_timestamp
    }

    pub fn is_marked(&self) -> bool {
        self.marked.load(Ordering::Relaxed)
    }

    /// Set the marked flag, returns whether it changed
    pub fn set_marked(&self, marked: bool) -> bool {
        self.marked.swap(marked, Ordering::Relaxed) != marked
    }

    pub fn file_name(&self) -> Option<&str> {
        self.log.file_name()
    }

    pub fn line_number(&self) -> Option<i32> {
        self.log.line_number()
    }

    /// Approximate memory held in bytes
    pub fn memory_size(&self) -> usize {
        self.memory_size
    }
}

impl fmt::Debug for DisplayableLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayableLog")
            .field("id", &self.id)
            .field("reader", &self.reader)
            .field("marked", &self.is_marked())
            .finish()
    }
}

/// Total order over displayable logs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogOrdering {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl LogOrdering {
    pub fn new(key: SortKey, direction: SortDirection) -> Self {
        Self { key, direction }
    }

    /// Compare by key then ID, the direction inverts the whole comparison
    pub fn compare(&self, a: &DisplayableLog, b: &DisplayableLog) -> CmpOrdering {
        let by_key = match self.key {
            SortKey::Id => CmpOrdering::Equal,
            SortKey::BeginningTimestamp => a.beginning_timestamp.cmp(&b.beginning_timestamp),
            SortKey::EndingTimestamp => a.ending_timestamp.cmp(&b.ending_timestamp),
            SortKey::Timestamp => a.timestamp.cmp(&b.timestamp),
        };
        let ordering = by_key.then_with(|| a.id.cmp(&b.id));
        match self.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::LogBuilder;

    fn displayable(id: u64, timestamp: &str) -> DisplayableLog {
        let mut builder = LogBuilder::new();
        builder.set("Timestamp", timestamp);
        DisplayableLog::new(id, Arc::new(builder.build()), 1)
    }

    #[test]
    fn test_id_generator_is_monotonic() {
        let ids = LogIdGenerator::new();
        let first = ids.next_id();
        assert!(ids.next_id() > first);
    }

    #[test]
    fn test_timestamp_ordering_breaks_ties_by_id() {
        let a = displayable(2, "2024-01-01 00:00:00");
        let b = displayable(1, "2024-01-01 00:00:00");
        let c = displayable(3, "2023-12-31 23:59:59");
        let ordering = LogOrdering::new(SortKey::Timestamp, SortDirection::Ascending);
        assert_eq!(ordering.compare(&b, &a), CmpOrdering::Less);
        assert_eq!(ordering.compare(&c, &b), CmpOrdering::Less);
        let descending = LogOrdering::new(SortKey::Timestamp, SortDirection::Descending);
        assert_eq!(descending.compare(&b, &a), CmpOrdering::Greater);
        assert_eq!(descending.compare(&a, &a), CmpOrdering::Equal);
    }

    #[test]
    fn test_marked_flag() {
        let log = displayable(1, "2024-01-01 00:00:00");
        assert!(log.set_marked(true));
        assert!(!log.set_marked(true));
        assert!(log.is_marked());
        assert!(log.memory_size() > 0);
    }
}
