use std::collections::HashSet;
use std::sync::Arc;

use crate::displayable::{DisplayableLog, LogOrdering};

/// Collection of displayable logs kept sorted under a [`LogOrdering`]
#[derive(Clone, Debug, Default)]
pub struct SortedLogs {
    logs: Vec<Arc<DisplayableLog>>,
    ordering: LogOrdering,
}

impl SortedLogs {
    pub fn new(ordering: LogOrdering) -> Self {
        Self {
            logs: Vec::new(),
            ordering,
        }
    }

    /// Build from logs in any order
    pub fn from_unsorted(mut logs: Vec<Arc<DisplayableLog>>, ordering: LogOrdering) -> Self {
        logs.sort_unstable_by(|a, b| ordering.compare(a, b));
        Self { logs, ordering }
    }

    pub fn ordering(&self) -> LogOrdering {
        self.ordering
    }

    /// Change the ordering and re-sort
    pub fn set_ordering(&mut self, ordering: LogOrdering) {
        if self.ordering == ordering {
            return;
        }
        self.ordering = ordering;
        self.logs.sort_unstable_by(|a, b| ordering.compare(a, b));
    }

    pub fn len(&self) -> usize {
        self.logs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    pub fn as_slice(&self) -> &[Arc<DisplayableLog>] {
        &self.logs
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Arc<DisplayableLog>> {
        self.logs.iter()
    }

    pub fn first(&self) -> Option<&Arc<DisplayableLog>> {
        self.logs.first()
    }

    pub fn last(&self) -> Option<&Arc<DisplayableLog>> {
        self.logs.last()
    }

    /// Position of `log`, or where it would be inserted
    pub fn binary_search(&self, log: &DisplayableLog) -> Result<usize, usize> {
        self.logs
            .binary_search_by(|probe| self.ordering.compare(probe, log))
    }

    pub fn contains(&self, log: &DisplayableLog) -> bool {
        self.binary_search(log).is_ok()
    }

    /// Insert one log, returns false if it is already present
    pub fn add(&mut self, log: Arc<DisplayableLog>) -> bool {
        match self.binary_search(&log) {
            Ok(_) => false,
            Err(index) => {
                self.logs.insert(index, log);
                true
            }
        }
    }

    /// Insert a batch by merging it into the collection
    pub fn add_all(&mut self, logs: impl IntoIterator<Item = Arc<DisplayableLog>>) {
        let mut batch: Vec<_> = logs.into_iter().collect();
        match batch.len() {
            0 => return,
            1 | 2 | 3 => {
                for log in batch {
                    self.add(log);
                }
                return;
            }
            _ => {}
        }
        let ordering = self.ordering;
        batch.sort_unstable_by(|a, b| ordering.compare(a, b));
        let existing = std::mem::take(&mut self.logs);
        let mut merged = Vec::with_capacity(existing.len() + batch.len());
        let mut left = existing.into_iter().peekable();
        let mut right = batch.into_iter().peekable();
        loop {
            let take_left = match (left.peek(), right.peek()) {
                (Some(a), Some(b)) => match ordering.compare(a, b) {
                    std::cmp::Ordering::Less => true,
                    std::cmp::Ordering::Greater => false,
                    std::cmp::Ordering::Equal => {
                        // Same log added twice
                        right.next();
                        continue;
                    }
                },
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_left { left.next() } else { right.next() };
            merged.extend(next);
        }
        self.logs = merged;
    }

    /// Remove one log, returns whether it was present
    pub fn remove(&mut self, log: &DisplayableLog) -> bool {
        match self.binary_search(log) {
            Ok(index) => {
                self.logs.remove(index);
                true
            }
            Err(_) => false,
        }
    }

    /// Remove logs with the given IDs, returning them
    pub fn remove_ids(&mut self, ids: &HashSet<u64>) -> Vec<Arc<DisplayableLog>> {
        if ids.is_empty() {
            return Vec::new();
        }
        self.remove_where(|log| ids.contains(&log.id()))
    }

    /// Remove logs matching `predicate`, returning them
    pub fn remove_where(
        &mut self,
        mut predicate: impl FnMut(&DisplayableLog) -> bool,
    ) -> Vec<Arc<DisplayableLog>> {
        let mut removed = Vec::new();
        self.logs.retain(|log| {
            if predicate(log) {
                removed.push(Arc::clone(log));
                false
            } else {
                true
            }
        });
        removed
    }

    /// Remove everything, returning the removed logs
    pub fn clear(&mut self) -> Vec<Arc<DisplayableLog>> {
        std::mem::take(&mut self.logs)
    }

    /// Check the sort invariant, used by tests and debug assertions
    pub fn is_sorted(&self) -> bool {
        self.logs
            .windows(2)
            .all(|w| self.ordering.compare(&w[0], &w[1]) == std::cmp::Ordering::Less)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::LogBuilder;
    use crate::displayable::LogIdGenerator;
    use ulogview_types::{SortDirection, SortKey};

    fn logs_with_timestamps(ids: &LogIdGenerator, seconds: &[u32]) -> Vec<Arc<DisplayableLog>> {
        seconds
            .iter()
            .map(|s| {
                let mut builder = LogBuilder::new();
                builder.set("Timestamp", format!("2024-01-01 00:00:{:02}", s % 60));
                Arc::new(DisplayableLog::new(ids.next_id(), Arc::new(builder.build()), 1))
            })
            .collect()
    }

    #[test]
    fn test_mixed_insert_remove_stays_sorted() {
        let ids = LogIdGenerator::new();
        let ordering = LogOrdering::new(SortKey::Timestamp, SortDirection::Descending);
        let mut sorted = SortedLogs::new(ordering);
        sorted.add_all(logs_with_timestamps(&ids, &[5, 1, 9, 1, 3, 7]));
        assert!(sorted.is_sorted());
        for log in logs_with_timestamps(&ids, &[4, 4, 0]) {
            assert!(sorted.add(log));
        }
        assert!(sorted.is_sorted());
        sorted.add_all(logs_with_timestamps(&ids, &[8, 2, 6, 1, 1]));
        assert_eq!(sorted.len(), 14);
        assert!(sorted.is_sorted());

        let victim = Arc::clone(&sorted.as_slice()[3]);
        assert!(sorted.remove(&victim));
        assert!(!sorted.contains(&victim));
        let removed = sorted.remove_where(|log| log.id() % 2 == 0);
        assert!(!removed.is_empty());
        assert!(sorted.is_sorted());
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let ids = LogIdGenerator::new();
        let logs = logs_with_timestamps(&ids, &[1, 2, 3, 4]);
        let mut sorted = SortedLogs::new(LogOrdering::default());
        sorted.add_all(logs.clone());
        assert!(!sorted.add(Arc::clone(&logs[0])));
        sorted.add_all(logs);
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn test_set_ordering_resorts() {
        let ids = LogIdGenerator::new();
        let mut sorted = SortedLogs::new(LogOrdering::default());
        sorted.add_all(logs_with_timestamps(&ids, &[30, 10, 20, 0]));
        assert_eq!(sorted.first().map(|l| l.id()), Some(1));
        sorted.set_ordering(LogOrdering::new(SortKey::Timestamp, SortDirection::Ascending));
        assert!(sorted.is_sorted());
        assert_eq!(sorted.first().map(|l| l.id()), Some(4));
        let removed = sorted.clear();
        assert_eq!(removed.len(), 4);
        assert!(sorted.is_empty());
    }
}
