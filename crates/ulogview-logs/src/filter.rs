use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ulogview_types::{FilterCombinationMode, LogLevel, Result, property};

use crate::displayable::{DisplayableLog, LogOrdering};
use crate::sorted::SortedLogs;

/// Logs evaluated between two progress reports of a scan
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Text filter option bit for case insensitive matching
pub const IGNORE_CASE_OPTION: u32 = 1;

/// Compiled regex tested against the filtering properties of a log
#[derive(Clone)]
pub struct TextFilter {
    regex: Regex,
    pattern: String,
    ignore_case: bool,
}

impl TextFilter {
    pub fn new(pattern: &str, ignore_case: bool) -> Result<Self> {
        let regex = if ignore_case {
            // Prepend (?i) for case insensitive matching
            Regex::new(&format!("(?i){}", pattern))?
        } else {
            Regex::new(pattern)?
        };
        Ok(Self {
            regex,
            pattern: pattern.to_string(),
            ignore_case,
        })
    }

    /// Build from a pattern and its option bits
    pub fn with_options(pattern: &str, options: u32) -> Result<Self> {
        Self::new(pattern, options & IGNORE_CASE_OPTION != 0)
    }

    /// Original pattern without option prefixes
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_case_insensitive(&self) -> bool {
        self.ignore_case
    }

    /// Option bits matching [`TextFilter::with_options`]
    pub fn options(&self) -> u32 {
        if self.ignore_case { IGNORE_CASE_OPTION } else { 0 }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Find all match positions in a string
    pub fn find_matches(&self, text: &str) -> Vec<(usize, usize)> {
        self.regex
            .find_iter(text)
            .map(|m| (m.start(), m.end()))
            .collect()
    }
}

impl PartialEq for TextFilter {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern && self.ignore_case == other.ignore_case
    }
}

impl std::fmt::Debug for TextFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextFilter")
            .field("pattern", &self.pattern)
            .field("ignore_case", &self.ignore_case)
            .finish()
    }
}

/// Snapshot of the conditions a log must satisfy to be shown
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FilterCriteria {
    /// Exact level, `None` for any
    pub level: Option<LogLevel>,
    pub process_id: Option<i32>,
    pub thread_id: Option<i32>,
    pub text_filters: Vec<TextFilter>,
    /// How `text_filters` combine when there are more than one
    pub combination_mode: FilterCombinationMode,
}

impl FilterCriteria {
    /// No condition at all, every log passes
    pub fn is_empty(&self) -> bool {
        self.level.is_none()
            && self.process_id.is_none()
            && self.thread_id.is_none()
            && self.text_filters.is_empty()
    }

    /// Check a log against the criteria, testing texts of `properties`
    pub fn matches(&self, log: &DisplayableLog, properties: &[String]) -> bool {
        let log = log.log();
        if let Some(level) = self.level {
            if log.level() != level {
                return false;
            }
        }
        if let Some(pid) = self.process_id {
            if log.process_id() != Some(pid) {
                return false;
            }
        }
        if let Some(tid) = self.thread_id {
            if log.thread_id() != Some(tid) {
                return false;
            }
        }
        if self.text_filters.is_empty() {
            return true;
        }

        let texts: Vec<_> = properties
            .iter()
            .filter_map(|name| log.property_text(name))
            .collect();
        let text_match = |filter: &TextFilter| texts.iter().any(|text| filter.is_match(text));
        match self.combination_mode {
            FilterCombinationMode::Intersection => self.text_filters.iter().all(text_match),
            FilterCombinationMode::Union => self.text_filters.iter().any(text_match),
        }
    }
}

enum ScanEvent {
    Progress(f64),
    Completed {
        matched: Vec<Arc<DisplayableLog>>,
        duration: Duration,
    },
}

/// Progress of a background filtering scan, fed back through
/// [`DisplayableLogFilter::handle_event`]
pub struct FilterEvent {
    generation: u64,
    event: ScanEvent,
}

impl std::fmt::Debug for FilterEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.event {
            ScanEvent::Progress(_) => "Progress",
            ScanEvent::Completed { .. } => "Completed",
        };
        f.debug_struct("FilterEvent")
            .field("generation", &self.generation)
            .field("kind", &kind)
            .finish()
    }
}

struct Scan {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Live filtered view over a [`SortedLogs`]
///
/// Criteria changes start a cancellable background scan. Until the scan
/// completes the previously published result stays visible. Changes of the
/// source made meanwhile are recorded and merged into the scan result.
pub struct DisplayableLogFilter {
    criteria: Arc<FilterCriteria>,
    /// Criteria `filtered` reflects, `None` when passing the source through
    applied: Option<Arc<FilterCriteria>>,
    properties: Arc<[String]>,
    filtered: SortedLogs,
    generation: u64,
    scan: Option<Scan>,
    progress: f64,
    chunk_size: usize,
    events: mpsc::UnboundedSender<FilterEvent>,
    pending_added: Vec<Arc<DisplayableLog>>,
    pending_removed: HashSet<u64>,
    pending_invalidated: Vec<Arc<DisplayableLog>>,
    last_duration: Option<Duration>,
}

impl DisplayableLogFilter {
    pub fn new(ordering: LogOrdering, events: mpsc::UnboundedSender<FilterEvent>) -> Self {
        Self {
            criteria: Arc::new(FilterCriteria::default()),
            applied: None,
            properties: Arc::from(vec![property::MESSAGE.to_string()]),
            filtered: SortedLogs::new(ordering),
            generation: 0,
            scan: None,
            progress: 0.0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            events,
            pending_added: Vec::new(),
            pending_removed: HashSet::new(),
            pending_invalidated: Vec::new(),
            last_duration: None,
        }
    }

    pub fn set_chunk_size(&mut self, chunk_size: usize) {
        self.chunk_size = chunk_size.max(1);
    }

    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    pub fn filtering_properties(&self) -> &[String] {
        &self.properties
    }

    /// Logs to show, `source` is the collection the filter is attached to
    pub fn filtered_logs<'a>(&'a self, source: &'a SortedLogs) -> &'a [Arc<DisplayableLog>] {
        match self.applied {
            Some(_) => self.filtered.as_slice(),
            None => source.as_slice(),
        }
    }

    /// At least one criterion is set
    pub fn is_filtering_needed(&self) -> bool {
        !self.criteria.is_empty()
    }

    /// A background scan is running
    pub fn is_filtering(&self) -> bool {
        self.scan.is_some()
    }

    /// Fraction of the current scan done, 1.0 when idle
    pub fn filtering_progress(&self) -> f64 {
        if self.scan.is_some() { self.progress } else { 1.0 }
    }

    pub fn last_filtering_duration(&self) -> Option<Duration> {
        self.last_duration
    }

    /// Replace the criteria and re-evaluate every log of `source`
    pub fn set_criteria(&mut self, criteria: FilterCriteria, source: &SortedLogs) {
        self.cancel_scan();
        self.criteria = Arc::new(criteria);
        self.refilter(source);
    }

    /// Replace the properties text filters are tested against
    pub fn set_filtering_properties(&mut self, properties: Vec<String>, source: &SortedLogs) {
        if *self.properties == *properties {
            return;
        }
        let was_scanning = self.scan.is_some();
        self.cancel_scan();
        self.properties = Arc::from(properties);
        if was_scanning || !self.criteria.text_filters.is_empty() {
            self.refilter(source);
        }
    }

    /// Follow a change of the source ordering
    pub fn set_ordering(&mut self, ordering: LogOrdering) {
        self.filtered.set_ordering(ordering);
    }

    /// Logs just inserted into the source
    pub fn on_logs_added(&mut self, logs: &[Arc<DisplayableLog>]) {
        if self.scan.is_some() {
            self.pending_added.extend(logs.iter().cloned());
            return;
        }
        if let Some(criteria) = &self.applied {
            let properties = &self.properties;
            let matched: Vec<_> = logs
                .iter()
                .filter(|log| criteria.matches(log, properties))
                .cloned()
                .collect();
            self.filtered.add_all(matched);
        }
    }

    /// Logs just removed from the source
    pub fn on_logs_removed(&mut self, logs: &[Arc<DisplayableLog>]) {
        if logs.is_empty() {
            return;
        }
        let ids: HashSet<u64> = logs.iter().map(|log| log.id()).collect();
        if self.applied.is_some() {
            self.filtered.remove_ids(&ids);
        }
        if self.scan.is_some() {
            self.pending_removed.extend(ids);
        }
    }

    /// The source was emptied
    pub fn on_source_cleared(&mut self) {
        self.filtered.clear();
        self.clear_pending();
        if self.scan.is_some() {
            // Nothing left to scan, the empty result is already final
            self.cancel_scan();
            self.applied = Some(Arc::clone(&self.criteria));
        }
    }

    /// Re-evaluate a single log whose content changed in place
    pub fn invalidate_log(&mut self, log: &Arc<DisplayableLog>) {
        if self.scan.is_some() {
            self.pending_invalidated.push(Arc::clone(log));
            return;
        }
        if let Some(criteria) = &self.applied {
            if criteria.matches(log, &self.properties) {
                self.filtered.add(Arc::clone(log));
            } else {
                self.filtered.remove(log);
            }
        }
    }

    /// Apply an event of the scanning task, returns whether the filtered
    /// logs changed
    pub fn handle_event(&mut self, event: FilterEvent) -> bool {
        if event.generation != self.generation || self.scan.is_none() {
            return false;
        }
        match event.event {
            ScanEvent::Progress(progress) => {
                self.progress = progress;
                false
            }
            ScanEvent::Completed { matched, duration } => {
                self.scan = None;
                self.progress = 1.0;
                self.last_duration = Some(duration);
                self.complete(matched);
                tracing::debug!(
                    count = self.filtered.len(),
                    duration_ms = duration.as_millis() as u64,
                    "Logs filtering completed"
                );
                true
            }
        }
    }

    /// Stop any running scan and forget everything
    pub fn dispose(&mut self) {
        self.cancel_scan();
        self.filtered.clear();
        self.applied = None;
    }

    fn refilter(&mut self, source: &SortedLogs) {
        self.clear_pending();
        if self.criteria.is_empty() {
            self.filtered.clear();
            self.applied = None;
            return;
        }
        if source.is_empty() {
            self.filtered.clear();
            self.applied = Some(Arc::clone(&self.criteria));
            return;
        }

        self.generation += 1;
        self.progress = 0.0;
        let cancel = CancellationToken::new();
        let ctx = ScanContext {
            generation: self.generation,
            logs: source.as_slice().to_vec(),
            criteria: Arc::clone(&self.criteria),
            properties: Arc::clone(&self.properties),
            chunk_size: self.chunk_size,
            events: self.events.clone(),
            cancel: cancel.clone(),
        };
        tracing::debug!(
            generation = self.generation,
            count = source.len(),
            "Start filtering logs"
        );
        let task = tokio::spawn(scan_logs(ctx));
        self.scan = Some(Scan { cancel, task });
    }

    fn complete(&mut self, matched: Vec<Arc<DisplayableLog>>) {
        let criteria = Arc::clone(&self.criteria);
        let removed = std::mem::take(&mut self.pending_removed);
        let added = std::mem::take(&mut self.pending_added);
        let invalidated = std::mem::take(&mut self.pending_invalidated);

        let mut filtered = SortedLogs::from_unsorted(matched, self.filtered.ordering());
        filtered.remove_ids(&removed);
        filtered.add_all(
            added
                .into_iter()
                .filter(|log| !removed.contains(&log.id()))
                .filter(|log| criteria.matches(log, &self.properties)),
        );
        for log in invalidated {
            if removed.contains(&log.id()) {
                continue;
            }
            if criteria.matches(&log, &self.properties) {
                filtered.add(log);
            } else {
                filtered.remove(&log);
            }
        }
        self.filtered = filtered;
        self.applied = Some(criteria);
    }

    fn cancel_scan(&mut self) {
        if let Some(scan) = self.scan.take() {
            scan.cancel.cancel();
            scan.task.abort();
            tracing::trace!(generation = self.generation, "Logs filtering cancelled");
        }
        self.generation += 1;
    }

    fn clear_pending(&mut self) {
        self.pending_added.clear();
        self.pending_removed.clear();
        self.pending_invalidated.clear();
    }
}

impl Drop for DisplayableLogFilter {
    fn drop(&mut self) {
        if let Some(scan) = &self.scan {
            scan.cancel.cancel();
        }
    }
}

struct ScanContext {
    generation: u64,
    logs: Vec<Arc<DisplayableLog>>,
    criteria: Arc<FilterCriteria>,
    properties: Arc<[String]>,
    chunk_size: usize,
    events: mpsc::UnboundedSender<FilterEvent>,
    cancel: CancellationToken,
}

async fn scan_logs(ctx: ScanContext) {
    let started = Instant::now();
    let total = ctx.logs.len();
    let mut matched = Vec::new();
    let mut done = 0;
    for chunk in ctx.logs.chunks(ctx.chunk_size) {
        if ctx.cancel.is_cancelled() {
            return;
        }
        matched.extend(
            chunk
                .iter()
                .filter(|log| ctx.criteria.matches(log, &ctx.properties))
                .cloned(),
        );
        done += chunk.len();
        let progress = FilterEvent {
            generation: ctx.generation,
            event: ScanEvent::Progress(done as f64 / total as f64),
        };
        if ctx.events.send(progress).is_err() {
            return;
        }
        tokio::task::yield_now().await;
    }
    if ctx.cancel.is_cancelled() {
        return;
    }
    let _ = ctx.events.send(FilterEvent {
        generation: ctx.generation,
        event: ScanEvent::Completed {
            matched,
            duration: started.elapsed(),
        },
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::LogBuilder;
    use crate::displayable::LogIdGenerator;

    fn make_log(ids: &LogIdGenerator, level: &str, pid: i32, message: &str) -> Arc<DisplayableLog> {
        let mut builder = LogBuilder::new();
        builder.set(property::LEVEL, level);
        builder.set(property::PROCESS_ID, pid.to_string());
        builder.set(property::MESSAGE, message);
        Arc::new(DisplayableLog::new(ids.next_id(), Arc::new(builder.build()), 1))
    }

    async fn settle(filter: &mut DisplayableLogFilter, rx: &mut mpsc::UnboundedReceiver<FilterEvent>) {
        while filter.is_filtering() {
            let event = rx.recv().await.unwrap();
            filter.handle_event(event);
        }
    }

    fn sample(ids: &LogIdGenerator) -> SortedLogs {
        let mut source = SortedLogs::new(LogOrdering::default());
        source.add_all(vec![
            make_log(ids, "Error", 42, "disk full"),
            make_log(ids, "Error", 7, "disk full"),
            make_log(ids, "Info", 42, "network up"),
            make_log(ids, "Info", 7, "cache warm"),
            make_log(ids, "Warn", 42, "network slow"),
        ]);
        source
    }

    #[test]
    fn test_criteria_level_and_pid_intersect() {
        let ids = LogIdGenerator::new();
        let source = sample(&ids);
        let criteria = FilterCriteria {
            level: Some(LogLevel::Error),
            process_id: Some(42),
            ..Default::default()
        };
        let properties = vec![property::MESSAGE.to_string()];
        let matched: Vec<_> = source
            .iter()
            .filter(|log| criteria.matches(log, &properties))
            .map(|log| log.id())
            .collect();
        assert_eq!(matched, vec![1]);
    }

    #[test]
    fn test_text_filters_union_and_intersection() {
        let ids = LogIdGenerator::new();
        let source = sample(&ids);
        let properties = vec![property::MESSAGE.to_string()];
        let mut criteria = FilterCriteria {
            text_filters: vec![
                TextFilter::new("disk", false).unwrap(),
                TextFilter::new("NETWORK", true).unwrap(),
            ],
            combination_mode: FilterCombinationMode::Union,
            ..Default::default()
        };
        let count = |c: &FilterCriteria| source.iter().filter(|l| c.matches(l, &properties)).count();
        assert_eq!(count(&criteria), 4);
        criteria.combination_mode = FilterCombinationMode::Intersection;
        assert_eq!(count(&criteria), 0);
    }

    #[test]
    fn test_text_filter_options() {
        let filter = TextFilter::with_options("error", IGNORE_CASE_OPTION).unwrap();
        assert!(filter.is_case_insensitive());
        assert_eq!(filter.options(), IGNORE_CASE_OPTION);
        assert_eq!(filter.find_matches("ERROR then error").len(), 2);
        assert!(TextFilter::new("(", false).is_err());
    }

    #[tokio::test]
    async fn test_scan_publishes_complete_result() {
        let ids = LogIdGenerator::new();
        let source = sample(&ids);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut filter = DisplayableLogFilter::new(LogOrdering::default(), tx);
        filter.set_chunk_size(2);
        assert!(!filter.is_filtering_needed());
        assert_eq!(filter.filtered_logs(&source).len(), 5);

        filter.set_criteria(
            FilterCriteria {
                process_id: Some(42),
                ..Default::default()
            },
            &source,
        );
        assert!(filter.is_filtering());
        // Previous result stays visible until the scan completes
        assert_eq!(filter.filtered_logs(&source).len(), 5);
        settle(&mut filter, &mut rx).await;
        assert_eq!(filter.filtering_progress(), 1.0);
        let shown: Vec<_> = filter.filtered_logs(&source).iter().map(|l| l.id()).collect();
        assert_eq!(shown, vec![1, 3, 5]);
        assert!(filter.last_filtering_duration().is_some());
    }

    #[tokio::test]
    async fn test_superseded_scan_is_discarded() {
        let ids = LogIdGenerator::new();
        let source = sample(&ids);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut filter = DisplayableLogFilter::new(LogOrdering::default(), tx);
        filter.set_chunk_size(1);
        filter.set_criteria(
            FilterCriteria {
                level: Some(LogLevel::Info),
                ..Default::default()
            },
            &source,
        );
        filter.set_criteria(
            FilterCriteria {
                level: Some(LogLevel::Warn),
                ..Default::default()
            },
            &source,
        );
        settle(&mut filter, &mut rx).await;
        let shown: Vec<_> = filter.filtered_logs(&source).iter().map(|l| l.id()).collect();
        assert_eq!(shown, vec![5]);
    }

    #[tokio::test]
    async fn test_changes_during_scan_are_merged() {
        let ids = LogIdGenerator::new();
        let mut source = sample(&ids);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut filter = DisplayableLogFilter::new(LogOrdering::default(), tx);
        filter.set_criteria(
            FilterCriteria {
                level: Some(LogLevel::Error),
                ..Default::default()
            },
            &source,
        );
        let added = make_log(&ids, "Error", 1, "late error");
        source.add(Arc::clone(&added));
        filter.on_logs_added(std::slice::from_ref(&added));
        let first = Arc::clone(&source.as_slice()[0]);
        source.remove(&first);
        filter.on_logs_removed(std::slice::from_ref(&first));
        settle(&mut filter, &mut rx).await;
        let shown: Vec<_> = filter.filtered_logs(&source).iter().map(|l| l.id()).collect();
        assert_eq!(shown, vec![2, 6]);

        // Idle changes apply directly
        let idle = make_log(&ids, "Error", 1, "idle error");
        source.add(Arc::clone(&idle));
        filter.on_logs_added(std::slice::from_ref(&idle));
        assert_eq!(filter.filtered_logs(&source).len(), 3);
        filter.on_source_cleared();
        source.clear();
        assert!(filter.filtered_logs(&source).is_empty());
    }

    #[tokio::test]
    async fn test_empty_criteria_pass_through() {
        let ids = LogIdGenerator::new();
        let source = sample(&ids);
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut filter = DisplayableLogFilter::new(LogOrdering::default(), tx);
        filter.set_criteria(
            FilterCriteria {
                thread_id: Some(3),
                ..Default::default()
            },
            &source,
        );
        filter.set_criteria(FilterCriteria::default(), &source);
        assert!(!filter.is_filtering());
        assert_eq!(filter.filtered_logs(&source).len(), source.len());
    }

    #[tokio::test]
    async fn test_properties_change_restarts_running_scan() {
        let ids = LogIdGenerator::new();
        let source = sample(&ids);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut filter = DisplayableLogFilter::new(LogOrdering::default(), tx);
        filter.set_criteria(
            FilterCriteria {
                level: Some(LogLevel::Error),
                ..Default::default()
            },
            &source,
        );
        assert!(filter.is_filtering());
        filter.set_filtering_properties(
            vec![property::MESSAGE.to_string(), "Extra1".to_string()],
            &source,
        );
        assert!(filter.is_filtering());
        settle(&mut filter, &mut rx).await;
        let shown: Vec<_> = filter.filtered_logs(&source).iter().map(|l| l.id()).collect();
        assert_eq!(shown, vec![1, 2]);
    }
}
