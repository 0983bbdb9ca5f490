//! Session merging log readers into one sorted, filtered and markable set

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, sleep_until};

use ulogview_logs::{
    DEFAULT_UPDATE_INTERVAL, DisplayableLog, DisplayableLogFilter, FilterCriteria, FilterEvent,
    LogDataSourceProvider, LogReader, LogReaderOptions, LogsChange, ReaderMessage, SortedLogs,
    TextFilter, is_file_source,
};
use ulogview_types::{
    Error, FilterCombinationMode, LogLevel, Result, SortDirection, SourceOption, SourceOptions,
};

use crate::context::SessionContext;
use crate::marks::{self, MarkedLogInfo};
use crate::profile::{LogProfile, PredefinedLogTextFilter};
use crate::scheduled::ScheduledAction;
use crate::state::{LogReaderSnapshot, SessionState, TextFilterSnapshot};


/// Capacity of the notification channel
const NOTIFICATION_CAPACITY: usize = 256;

/// Change reported to observers of a [`Session`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionNotification {
    LogProfileChanged,
    LogsChanged,
    FilteredLogsChanged,
    MarkedLogsChanged,
    DataSourceErrorsChanged,
    ReadingStateChanged,
}

/// Coarse lifecycle phase of a [`Session`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    NoProfile,
    /// Profile set but a file, URI, endpoint or working directory is missing
    WaitingForParameters,
    WaitingForDataSource,
    ReadingLogs,
    FilteringLogs,
    Ready,
}

/// Time range covered by the shown logs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeInfo {
    pub earliest: Option<NaiveDateTime>,
    pub latest: Option<NaiveDateTime>,
    pub duration: Option<TimeDelta>,
}

struct ReaderEntry {
    reader: LogReader,
    /// Displayable forms of the reader logs, oldest first
    logs: VecDeque<Arc<DisplayableLog>>,
}

/// Logs of one file ordered by line number, and marks not matched yet
#[derive(Default)]
struct FileIndex {
    logs: Vec<Arc<DisplayableLog>>,
    unmatched_marks: Vec<MarkedLogInfo>,
}

impl FileIndex {
    fn insert(&mut self, log: Arc<DisplayableLog>) {
        let key = line_key(&log);
        let pos = self.logs.partition_point(|l| line_key(l) < key);
        self.logs.insert(pos, log);
    }

    fn remove(&mut self, log: &DisplayableLog) {
        let key = line_key(log);
        if let Ok(pos) = self.logs.binary_search_by(|l| line_key(l).cmp(&key)) {
            self.logs.remove(pos);
        }
    }
}

fn line_key(log: &DisplayableLog) -> (i32, u64) {
    (log.line_number().unwrap_or(0), log.id())
}

struct MarkedLogsLoaded {
    file_name: String,
    infos: Vec<MarkedLogInfo>,
}

/// Orchestrator of one log viewing session
///
/// Every mutation goes through `&mut self`. Background work (reading,
/// filtering, marked log I/O) reports through channels drained by
/// [`Session::process_next_event`] and [`Session::process_pending`].
pub struct Session {
    ctx: SessionContext,
    profile: Option<Arc<LogProfile>>,
    provider: Option<Arc<dyn LogDataSourceProvider>>,
    readers: Vec<ReaderEntry>,
    reader_tx: mpsc::UnboundedSender<ReaderMessage>,
    reader_rx: mpsc::UnboundedReceiver<ReaderMessage>,
    filter: DisplayableLogFilter,
    filter_rx: mpsc::UnboundedReceiver<FilterEvent>,
    marks_tx: mpsc::UnboundedSender<MarkedLogsLoaded>,
    marks_rx: mpsc::UnboundedReceiver<MarkedLogsLoaded>,
    pending_mark_loads: usize,
    all_logs: SortedLogs,
    marked_logs: SortedLogs,
    files: HashMap<String, FileIndex>,

    // Connection parameters
    log_file_paths: Vec<String>,
    uri: Option<String>,
    ip_endpoint: Option<String>,
    working_directory: Option<String>,
    creation_failed: bool,

    // Filtering parameters
    level_filter: LogLevel,
    process_id_filter: Option<i32>,
    thread_id_filter: Option<i32>,
    text_filter: Option<TextFilter>,
    predefined_text_filters: Vec<Arc<PredefinedLogTextFilter>>,
    combination_mode: FilterCombinationMode,
    showing_all_temporarily: bool,

    logs_reading_paused: bool,
    update_filter_action: ScheduledAction,
    save_marked_logs_action: ScheduledAction,
    files_to_save: BTreeSet<String>,
    notifications: broadcast::Sender<SessionNotification>,
    reading_since: Option<Instant>,
    last_reading_duration: Option<Duration>,
    last_errors: (bool, bool),
}

impl Session {
    /// Create an empty session, must be called within a tokio runtime
    pub fn new(ctx: SessionContext) -> Self {
        let (reader_tx, reader_rx) = mpsc::unbounded_channel();
        let (filter_tx, filter_rx) = mpsc::unbounded_channel();
        let (marks_tx, marks_rx) = mpsc::unbounded_channel();
        let mut filter = DisplayableLogFilter::new(Default::default(), filter_tx);
        filter.set_chunk_size(ctx.settings().filter_chunk_size);
        Self {
            ctx,
            profile: None,
            provider: None,
            readers: Vec::new(),
            reader_tx,
            reader_rx,
            filter,
            filter_rx,
            marks_tx,
            marks_rx,
            pending_mark_loads: 0,
            all_logs: SortedLogs::default(),
            marked_logs: SortedLogs::default(),
            files: HashMap::new(),
            log_file_paths: Vec::new(),
            uri: None,
            ip_endpoint: None,
            working_directory: None,
            creation_failed: false,
            level_filter: LogLevel::Undefined,
            process_id_filter: None,
            thread_id_filter: None,
            text_filter: None,
            predefined_text_filters: Vec::new(),
            combination_mode: FilterCombinationMode::default(),
            showing_all_temporarily: false,
            logs_reading_paused: false,
            update_filter_action: ScheduledAction::new(),
            save_marked_logs_action: ScheduledAction::new(),
            files_to_save: BTreeSet::new(),
            notifications: broadcast::channel(NOTIFICATION_CAPACITY).0,
            reading_since: None,
            last_reading_duration: None,
            last_errors: (false, false),
        }
    }

    // =======================================================================
    // Accessors
    // ========================================================================

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn log_profile(&self) -> Option<&Arc<LogProfile>> {
        self.profile.as_ref()
    }

    /// Every log of the session in sort order
    pub fn all_logs(&self) -> &[Arc<DisplayableLog>] {
        self.all_logs.as_slice()
    }

    /// Logs passing the filters in sort order
    pub fn filtered_logs(&self) -> &[Arc<DisplayableLog>] {
        self.filter.filtered_logs(&self.all_logs)
    }

    pub fn marked_logs(&self) -> &[Arc<DisplayableLog>] {
        self.marked_logs.as_slice()
    }

    pub fn log_file_paths(&self) -> &[String] {
        &self.log_file_paths
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn ip_endpoint(&self) -> Option<&str> {
        self.ip_endpoint.as_deref()
    }

    pub fn working_directory(&self) -> Option<&str> {
        self.working_directory.as_deref()
    }

    pub fn log_readers(&self) -> impl Iterator<Item = &LogReader> {
        self.readers.iter().map(|entry| &entry.reader)
    }

    /// Approximate memory held by the logs in bytes
    pub fn logs_memory_usage(&self) -> usize {
        self.all_logs.iter().map(|log| log.memory_size()).sum()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionNotification> {
        self.notifications.subscribe()
    }

    fn notify(&self, notification: SessionNotification) {
        let _ = self.notifications.send(notification);
    }

    fn contract_violation(&self, message: impl Into<String>) -> Error {
        let error = Error::invalid_state(message);
        tracing::error!(error = %error, "Invalid session operation");
        error
    }

    // =======================================================================
    // Event processing
    // ========================================================================

    /// Wait for and apply the next background event or due action
    pub async fn process_next_event(&mut self) {
        let deadline = self.next_deadline();
        let far_future = Instant::now() + Duration::from_secs(86400);
        tokio::select! {
            Some(message) = self.reader_rx.recv() => self.on_reader_message(message),
            Some(event) = self.filter_rx.recv() => self.on_filter_event(event),
            Some(loaded) = self.marks_rx.recv() => self.on_marked_logs_loaded(loaded),
            _ = sleep_until(deadline.unwrap_or(far_future)), if deadline.is_some() => {}
            else => {}
        }
        self.run_due_actions();
    }

    /// Apply every event already received and every due action
    pub fn process_pending(&mut self) {
        loop {
            let mut progressed = false;
            while let Ok(message) = self.reader_rx.try_recv() {
                self.on_reader_message(message);
                progressed = true;
            }
            while let Ok(event) = self.filter_rx.try_recv() {
                self.on_filter_event(event);
                progressed = true;
            }
            while let Ok(loaded) = self.marks_rx.try_recv() {
                self.on_marked_logs_loaded(loaded);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }
        self.run_due_actions();
    }

    /// Process events until `done` holds
    pub async fn run_until(&mut self, mut done: impl FnMut(&Self) -> bool) {
        loop {
            self.process_pending();
            if done(self) {
                return;
            }
            self.process_next_event().await;
        }
    }

    /// Process events until reading, filtering and mark loading are over
    pub async fn wait_for_idle(&mut self) {
        self.run_until(|session| !session.is_processing_logs()).await;
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (
            self.update_filter_action.deadline(),
            self.save_marked_logs_action.deadline(),
        ) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn run_due_actions(&mut self) {
        let now = Instant::now();
        if self.update_filter_action.take_due(now) {
            self.update_filter();
        }
        if self.save_marked_logs_action.take_due(now) {
            self.save_marked_logs();
        }
    }

    fn on_reader_message(&mut self, message: ReaderMessage) {
        // Late messages of disposed readers are dropped here
        let Some(index) = self
            .readers
            .iter()
            .position(|entry| entry.reader.id() == message.reader)
        else {
            return;
        };
        match self.readers[index].reader.handle_event(message.event) {
            Some(change) => self.on_logs_changed(index, change),
            None => self.update_reader_states(),
        }
    }

    fn on_logs_changed(&mut self, index: usize, change: LogsChange) {
        let entry = &mut self.readers[index];
        let reader_id = entry.reader.id();
        let evicted = change.removed.min(entry.logs.len());
        let removed: Vec<_> = entry.logs.drain(..evicted).collect();
        let ids = self.ctx.log_ids();
        let added: Vec<Arc<DisplayableLog>> = change
            .added
            .into_iter()
            .map(|log| Arc::new(DisplayableLog::new(ids.next_id(), log, reader_id)))
            .collect();
        self.readers[index].logs.extend(added.iter().cloned());

        self.remove_logs(&removed);
        if !added.is_empty() {
            self.all_logs.add_all(added.iter().cloned());
            self.filter.on_logs_added(&added);
            for file_name in self.index_logs(&added) {
                self.match_marked_logs(&file_name);
            }
        }
        tracing::trace!(
            reader = reader_id,
            added = added.len(),
            removed = removed.len(),
            "Logs changed"
        );
        self.ctx.dispose_queue().push(removed);
        self.notify(SessionNotification::LogsChanged);
        self.update_reader_states();
    }

    /// Drop logs from every session collection
    fn remove_logs(&mut self, removed: &[Arc<DisplayableLog>]) {
        if removed.is_empty() {
            return;
        }
        let ids: HashSet<u64> = removed.iter().map(|log| log.id()).collect();
        self.all_logs.remove_ids(&ids);
        if removed.iter().any(|log| log.is_marked()) {
            self.marked_logs.remove_ids(&ids);
            self.notify(SessionNotification::MarkedLogsChanged);
        }
        for log in removed {
            if let Some(index) = log.file_name().and_then(|f| self.files.get_mut(f)) {
                index.remove(log);
            }
        }
        self.filter.on_logs_removed(removed);
    }

    /// Add logs to their file index, returns the files touched
    fn index_logs(&mut self, added: &[Arc<DisplayableLog>]) -> Vec<String> {
        let mut touched: Vec<String> = Vec::new();
        for log in added {
            let Some(file_name) = log.file_name() else {
                continue;
            };
            let index = match self.files.get_mut(file_name) {
                Some(index) => index,
                None => self.files.entry(file_name.to_string()).or_default(),
            };
            index.insert(Arc::clone(log));
            if !touched.iter().any(|f| f == file_name) {
                touched.push(file_name.to_string());
            }
        }
        touched
    }

    fn on_filter_event(&mut self, event: FilterEvent) {
        if self.filter.handle_event(event) {
            tracing::debug!(
                count = self.filtered_logs().len(),
                "Filtered logs updated"
            );
            self.notify(SessionNotification::FilteredLogsChanged);
        }
    }

    fn update_reader_states(&mut self) {
        let reading = self.is_reading_logs();
        match (reading, self.reading_since) {
            (true, None) => {
                self.reading_since = Some(Instant::now());
                self.notify(SessionNotification::ReadingStateChanged);
            }
            (false, Some(since)) => {
                let duration = since.elapsed();
                self.last_reading_duration = Some(duration);
                self.reading_since = None;
                tracing::debug!(
                    count = self.all_logs.len(),
                    duration_ms = duration.as_millis() as u64,
                    "Logs reading completed"
                );
                self.notify(SessionNotification::ReadingStateChanged);
            }
            _ => {}
        }
        let errors = self.check_data_source_errors();
        if errors != self.last_errors {
            self.last_errors = errors;
            if errors.0 {
                tracing::warn!("All log data sources failed");
            } else if errors.1 {
                tracing::warn!("Some log data sources failed");
            }
            self.notify(SessionNotification::DataSourceErrorsChanged);
        }
    }

    // =======================================================================
    // Log Profile
    // ========================================================================

    /// Set the profile and start reading once nothing is missing
    pub fn set_log_profile(&mut self, profile: Arc<LogProfile>) -> Result<()> {
        self.apply_log_profile(profile, true)
    }

    /// Set the profile without creating any reader
    pub fn set_log_profile_without_reading(&mut self, profile: Arc<LogProfile>) -> Result<()> {
        self.apply_log_profile(profile, false)
    }

    fn apply_log_profile(&mut self, profile: Arc<LogProfile>, start_reading: bool) -> Result<()> {
        if let Some(current) = &self.profile {
            return Err(self.contract_violation(format!(
                "log profile '{}' already set",
                current.id
            )));
        }
        tracing::debug!(profile = %profile.id, "Set log profile");

        self.apply_ordering(&profile);
        self.filter
            .set_filtering_properties(profile.filtering_properties(), &self.all_logs);
        self.provider = self.ctx.provider(&profile.data_source_provider);
        if self.provider.is_none() {
            tracing::warn!(
                provider = %profile.data_source_provider,
                "Log data source provider not found"
            );
            self.creation_failed = true;
        }
        self.profile = Some(profile);

        if start_reading && self.provider.is_some() {
            if self.are_parameters_missing() {
                tracing::debug!("Waiting for connection parameters before reading logs");
            } else {
                self.create_readers_from_parameters();
            }
        }
        self.update_filter_action
            .reschedule(self.ctx.settings().filter_update_delay());
        self.notify(SessionNotification::LogProfileChanged);
        self.update_reader_states();
        Ok(())
    }

    /// Dispose every reader and forget the profile
    pub fn reset_log_profile(&mut self) -> Result<()> {
        let Some(profile) = self.profile.take() else {
            return Err(self.contract_violation("no log profile to reset"));
        };
        tracing::debug!(profile = %profile.id, "Reset log profile");
        self.flush_marked_logs_save();
        self.update_filter_action.cancel();
        self.dispose_all_readers();
        self.provider = None;
        self.creation_failed = false;
        self.log_file_paths.clear();
        self.uri = None;
        self.ip_endpoint = None;
        self.working_directory = None;
        self.logs_reading_paused = false;
        self.showing_all_temporarily = false;
        self.notify(SessionNotification::LogProfileChanged);
        self.update_reader_states();
        Ok(())
    }

    /// Apply a modified version of the current profile
    pub fn update_log_profile(&mut self, profile: Arc<LogProfile>) -> Result<()> {
        let Some(current) = self.profile.clone() else {
            return Err(self.contract_violation("no log profile to update"));
        };
        if current.id != profile.id {
            return Err(self.contract_violation(format!(
                "cannot update log profile '{}' with '{}'",
                current.id, profile.id
            )));
        }
        if profile.needs_reset_from(&current) {
            tracing::warn!(profile = %profile.id, "Data source changed, reset log profile");
            self.reset_log_profile()?;
            return self.set_log_profile(profile);
        }

        let properties_changed = profile.filtering_properties() != current.filtering_properties();
        let reload = profile.needs_reload_from(&current);
        self.profile = Some(Arc::clone(&profile));
        if reload {
            tracing::warn!(profile = %profile.id, "Parsing changed, reload logs");
            return self.reload_logs(true, properties_changed);
        }
        if profile.ordering() != current.ordering() {
            self.apply_ordering(&profile);
            self.notify(SessionNotification::LogsChanged);
        }
        if properties_changed {
            self.filter
                .set_filtering_properties(profile.filtering_properties(), &self.all_logs);
        }
        self.notify(SessionNotification::LogProfileChanged);
        Ok(())
    }

    fn apply_ordering(&mut self, profile: &LogProfile) {
        let ordering = profile.ordering();
        self.all_logs.set_ordering(ordering);
        self.marked_logs.set_ordering(ordering);
        self.filter.set_ordering(ordering);
    }

    // =======================================================================
    // Data Sources
    // ========================================================================

    fn is_option_needed(&self, option: SourceOption) -> bool {
        let (Some(profile), Some(provider)) = (&self.profile, &self.provider) else {
            return false;
        };
        if profile.data_source_options.is_option_set(option) {
            return false;
        }
        provider.is_source_option_required(option)
            || (option == SourceOption::WorkingDirectory && profile.working_directory_needed)
    }

    fn is_option_supported(&self, option: SourceOption) -> bool {
        let (Some(profile), Some(provider)) = (&self.profile, &self.provider) else {
            return false;
        };
        !profile.data_source_options.is_option_set(option)
            && provider.is_source_option_supported(option)
    }

    pub fn is_log_file_needed(&self) -> bool {
        self.is_option_needed(SourceOption::FileName)
    }

    /// Log files can be added to the session
    pub fn is_log_file_supported(&self) -> bool {
        self.is_option_supported(SourceOption::FileName)
    }

    pub fn is_uri_needed(&self) -> bool {
        self.is_option_needed(SourceOption::Uri)
    }

    pub fn is_ip_endpoint_needed(&self) -> bool {
        self.is_option_needed(SourceOption::IPEndPoint)
    }

    pub fn is_working_directory_needed(&self) -> bool {
        self.is_option_needed(SourceOption::WorkingDirectory)
    }

    /// Some connection parameter is still needed before reading
    pub fn are_parameters_missing(&self) -> bool {
        (self.is_log_file_needed() && self.log_file_paths.is_empty())
            || (self.is_uri_needed() && self.uri.is_none())
            || (self.is_ip_endpoint_needed() && self.ip_endpoint.is_none())
            || (self.is_working_directory_needed() && self.working_directory.is_none())
    }

    fn base_source_options(&self) -> SourceOptions {
        let mut options = self
            .profile
            .as_ref()
            .map(|profile| profile.data_source_options.clone())
            .unwrap_or_default();
        if options.uri.is_none() {
            options.uri = self.uri.clone();
        }
        if options.ip_endpoint.is_none() {
            options.ip_endpoint = self.ip_endpoint.clone();
        }
        if options.working_directory.is_none() {
            options.working_directory = self.working_directory.clone();
        }
        options
    }

    fn create_readers_from_parameters(&mut self) {
        let base = self.base_source_options();
        if self.is_log_file_needed() {
            for file_name in self.log_file_paths.clone() {
                let mut options = base.clone();
                options.file_name = Some(file_name);
                self.create_reader(options);
            }
        } else {
            self.create_reader(base);
        }
    }

    /// Create and start a reader, recording creation failures
    fn create_reader(&mut self, options: SourceOptions) -> bool {
        let (Some(profile), Some(provider)) = (self.profile.clone(), self.provider.clone()) else {
            return false;
        };
        let source = match provider.create_source(&options) {
            Ok(source) => source,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    provider = %provider.name(),
                    "Unable to create log data source"
                );
                self.creation_failed = true;
                self.update_reader_states();
                return false;
            }
        };

        let settings = self.ctx.settings();
        let continuous = profile.is_continuous_reading;
        let reader_options = LogReaderOptions {
            parsing: profile.parse_options(settings.memory_usage_policy),
            continuous,
            max_log_count: continuous.then_some(settings.max_continuous_log_count),
            update_interval: if continuous {
                settings.continuous_reading_update_interval()
            } else {
                DEFAULT_UPDATE_INTERVAL
            },
        };
        let id = self.ctx.next_reader_id();
        let mut reader = LogReader::new(
            id,
            source,
            reader_options,
            self.reader_tx.clone(),
            Some(Arc::clone(self.ctx.file_permits())),
        );
        if let Err(e) = reader.start() {
            tracing::error!(reader = id, error = %e, "Unable to start log reader");
        }
        if let Some(file_name) = options.file_name.clone() {
            self.files.entry(file_name.clone()).or_default();
            self.load_marked_logs(file_name);
        }
        tracing::debug!(reader = id, continuous, "Log reader created");
        self.readers.push(ReaderEntry {
            reader,
            logs: VecDeque::new(),
        });
        self.update_reader_states();
        true
    }

    fn dispose_all_readers(&mut self) {
        self.flush_marked_logs_save();
        if self.readers.is_empty() && self.all_logs.is_empty() {
            self.files.clear();
            return;
        }
        let mut removed = Vec::with_capacity(self.all_logs.len());
        for mut entry in std::mem::take(&mut self.readers) {
            entry.reader.dispose();
            tracing::debug!(reader = entry.reader.id(), "Log reader disposed");
            removed.extend(entry.logs);
        }
        self.all_logs.clear();
        if !self.marked_logs.is_empty() {
            self.marked_logs.clear();
            self.notify(SessionNotification::MarkedLogsChanged);
        }
        self.files.clear();
        self.filter.on_source_cleared();
        self.ctx.dispose_queue().push(removed);
        self.notify(SessionNotification::LogsChanged);
    }

    /// Add a log file and start reading it
    pub fn add_log_file(&mut self, file_name: &str) -> Result<()> {
        let Some(profile) = self.profile.clone() else {
            return Err(self.contract_violation("no log profile to add log file to"));
        };
        if !self.is_log_file_supported() {
            return Err(self.contract_violation(format!(
                "log profile '{}' does not accept log files",
                profile.id
            )));
        }
        if marks::is_marked_file(file_name) {
            tracing::warn!(file = %file_name, "Marked log file cannot be added as log file");
            return Ok(());
        }
        if self.log_file_paths.iter().any(|f| f == file_name) {
            tracing::warn!(file = %file_name, "Log file already added");
            return Ok(());
        }
        if !profile.allow_multiple_files && !self.log_file_paths.is_empty() {
            return Err(self.contract_violation(format!(
                "log profile '{}' accepts a single log file",
                profile.id
            )));
        }

        tracing::debug!(file = %file_name, "Add log file");
        self.log_file_paths.push(file_name.to_string());
        if !self.are_parameters_missing() {
            let mut options = self.base_source_options();
            options.file_name = Some(file_name.to_string());
            self.create_reader(options);
        }
        Ok(())
    }

    /// Remove every log file and their logs
    pub fn clear_log_files(&mut self) -> Result<()> {
        if !self.is_log_file_supported() {
            return Err(self.contract_violation("log files are not supported"));
        }
        self.dispose_all_readers();
        self.creation_failed = false;
        self.log_file_paths.clear();
        self.update_reader_states();
        Ok(())
    }

    pub fn set_uri(&mut self, uri: &str) -> Result<()> {
        self.set_connection_parameter(SourceOption::Uri, uri)
    }

    pub fn set_ip_endpoint(&mut self, endpoint: &str) -> Result<()> {
        self.set_connection_parameter(SourceOption::IPEndPoint, endpoint)
    }

    pub fn set_working_directory(&mut self, directory: &str) -> Result<()> {
        self.set_connection_parameter(SourceOption::WorkingDirectory, directory)
    }

    fn set_connection_parameter(&mut self, option: SourceOption, value: &str) -> Result<()> {
        let Some(profile) = self.profile.clone() else {
            return Err(self.contract_violation(format!("no log profile to set {}", option.name())));
        };
        if !self.is_option_supported(option) && !self.is_option_needed(option) {
            return Err(self.contract_violation(format!(
                "{} is not needed by log profile '{}'",
                option.name(),
                profile.id
            )));
        }
        let current = match option {
            SourceOption::Uri => &mut self.uri,
            SourceOption::IPEndPoint => &mut self.ip_endpoint,
            _ => &mut self.working_directory,
        };
        if current.as_deref() == Some(value) {
            return Ok(());
        }
        *current = Some(value.to_string());
        tracing::debug!(option = option.name(), value = %value, "Connection parameter changed");

        self.dispose_all_readers();
        self.creation_failed = false;
        if !self.are_parameters_missing() {
            self.create_readers_from_parameters();
        }
        self.update_reader_states();
        Ok(())
    }

    /// Read logs again, optionally recreating every reader
    pub fn reload_logs(
        &mut self,
        recreate_readers: bool,
        update_filtering_properties: bool,
    ) -> Result<()> {
        let Some(profile) = self.profile.clone() else {
            return Err(self.contract_violation("no log profile to reload logs"));
        };
        self.flush_marked_logs_save();

        if profile.is_continuous_reading && !recreate_readers {
            tracing::debug!("Clear continuously read logs");
            let mut removed = Vec::new();
            for entry in &mut self.readers {
                entry.reader.clear_logs();
                removed.extend(entry.logs.drain(..));
            }
            self.all_logs.clear();
            if !self.marked_logs.is_empty() {
                self.marked_logs.clear();
                self.notify(SessionNotification::MarkedLogsChanged);
            }
            for index in self.files.values_mut() {
                index.logs.clear();
            }
            self.filter.on_source_cleared();
            self.ctx.dispose_queue().push(removed);
            self.notify(SessionNotification::LogsChanged);
            return Ok(());
        }

        tracing::warn!(readers = self.readers.len(), "Reload logs");
        let encoding = profile.data_source_options.encoding.clone();
        let options: Vec<SourceOptions> = self
            .readers
            .iter()
            .map(|entry| {
                let mut options = entry.reader.source().creation_options().clone();
                if encoding.is_some() {
                    options.encoding = encoding.clone();
                }
                options
            })
            .collect();
        self.dispose_all_readers();
        self.creation_failed = false;
        self.apply_ordering(&profile);
        if update_filtering_properties {
            self.filter
                .set_filtering_properties(profile.filtering_properties(), &self.all_logs);
        }
        for options in options {
            self.create_reader(options);
        }
        self.update_reader_states();
        Ok(())
    }

    /// Pause or resume continuous reading
    pub fn pause_resume_logs_reading(&mut self) -> Result<()> {
        let continuous = self
            .profile
            .as_ref()
            .is_some_and(|profile| profile.is_continuous_reading);
        if !continuous {
            return Err(self.contract_violation(
                "logs reading can only be paused when reading continuously",
            ));
        }
        let pause = !self.logs_reading_paused;
        self.logs_reading_paused = pause;
        for entry in &mut self.readers {
            let result = if pause {
                entry.reader.pause()
            } else {
                entry.reader.resume()
            };
            if let Err(e) = result {
                tracing::debug!(
                    reader = entry.reader.id(),
                    error = %e,
                    "Reader not paused or resumed"
                );
            }
        }
        tracing::debug!(paused = pause, "Logs reading paused state changed");
        self.notify(SessionNotification::ReadingStateChanged);
        Ok(())
    }

    pub fn is_logs_reading_paused(&self) -> bool {
        self.logs_reading_paused
    }

    // =======================================================================
    // Marked Logs
    // ========================================================================

    /// Unmark the logs if all are marked, mark them otherwise
    pub fn mark_unmark_logs(&mut self, logs: &[Arc<DisplayableLog>]) {
        if logs.is_empty() {
            return;
        }
        let mark = !logs.iter().all(|log| log.is_marked());
        self.set_logs_marked(logs, mark);
    }

    pub fn mark_logs(&mut self, logs: &[Arc<DisplayableLog>]) {
        self.set_logs_marked(logs, true);
    }

    pub fn unmark_logs(&mut self, logs: &[Arc<DisplayableLog>]) {
        self.set_logs_marked(logs, false);
    }

    fn set_logs_marked(&mut self, logs: &[Arc<DisplayableLog>], marked: bool) {
        let mut changed = false;
        for log in logs {
            if !self.all_logs.contains(log) || !log.set_marked(marked) {
                continue;
            }
            changed = true;
            if marked {
                self.marked_logs.add(Arc::clone(log));
            } else {
                self.marked_logs.remove(log);
            }
            self.filter.invalidate_log(log);
            if let Some(file_name) = log.file_name() {
                self.files_to_save.insert(file_name.to_string());
            }
        }
        if changed {
            if !self.files_to_save.is_empty() {
                self.save_marked_logs_action
                    .schedule(self.ctx.settings().save_marked_logs_delay());
            }
            self.notify(SessionNotification::MarkedLogsChanged);
        }
    }

    fn load_marked_logs(&mut self, file_name: String) {
        let tx = self.marks_tx.clone();
        let timeout = self.ctx.settings().marked_file_open_timeout();
        self.pending_mark_loads += 1;
        self.ctx.io_queue().submit(move || {
            let infos = marks::load_marked_logs(&file_name, timeout);
            let _ = tx.send(MarkedLogsLoaded { file_name, infos });
        });
    }

    fn on_marked_logs_loaded(&mut self, loaded: MarkedLogsLoaded) {
        self.pending_mark_loads = self.pending_mark_loads.saturating_sub(1);
        let Some(index) = self.files.get_mut(&loaded.file_name) else {
            return;
        };
        index.unmatched_marks = loaded.infos;
        self.match_marked_logs(&loaded.file_name);
    }

    /// Mark logs of the file matching marks loaded from its marked log file
    fn match_marked_logs(&mut self, file_name: &str) {
        let Some(index) = self.files.get_mut(file_name) else {
            return;
        };
        if index.unmatched_marks.is_empty() {
            return;
        }
        let mut matched = Vec::new();
        let logs = &index.logs;
        index.unmatched_marks.retain(|info| match logs_find_line(logs, info.line_number) {
            Some(log) => {
                matched.push(Arc::clone(log));
                false
            }
            None => true,
        });
        if matched.is_empty() {
            return;
        }
        tracing::debug!(file = %file_name, count = matched.len(), "Marked logs matched");
        for log in &matched {
            if log.set_marked(true) {
                self.marked_logs.add(Arc::clone(log));
                self.filter.invalidate_log(log);
            }
        }
        self.notify(SessionNotification::MarkedLogsChanged);
    }

    fn save_marked_logs(&mut self) {
        for file_name in std::mem::take(&mut self.files_to_save) {
            let Some(index) = self.files.get(&file_name) else {
                continue;
            };
            let mut infos: Vec<MarkedLogInfo> = index
                .logs
                .iter()
                .filter(|log| log.is_marked())
                .filter_map(|log| {
                    Some(MarkedLogInfo {
                        file_name: file_name.clone(),
                        line_number: log.line_number()?,
                        timestamp: log.log().timestamp(),
                    })
                })
                .collect();
            infos.extend(index.unmatched_marks.iter().cloned());
            infos.sort_by_key(|info| info.line_number);
            self.ctx.io_queue().submit(move || {
                if let Err(e) = marks::save_marked_logs(&file_name, &infos) {
                    tracing::warn!(file = %file_name, error = %e, "Unable to save marked logs");
                }
            });
        }
    }

    fn flush_marked_logs_save(&mut self) {
        if self.save_marked_logs_action.cancel() {
            self.save_marked_logs();
        }
    }

    /// Save pending marks and wait for marked log files to be written
    pub async fn wait_for_necessary_tasks(&mut self) {
        self.flush_marked_logs_save();
        self.ctx.io_queue().flush().await;
        self.process_pending();
    }

    // =======================================================================
    // Filtering
    // ========================================================================

    pub fn level_filter(&self) -> LogLevel {
        self.level_filter
    }

    /// Exact level to show, [`LogLevel::Undefined`] for any
    pub fn set_level_filter(&mut self, level: LogLevel) {
        if self.level_filter != level {
            self.level_filter = level;
            self.schedule_filter_update();
        }
    }

    pub fn process_id_filter(&self) -> Option<i32> {
        self.process_id_filter
    }

    pub fn set_process_id_filter(&mut self, pid: Option<i32>) {
        if self.process_id_filter != pid {
            self.process_id_filter = pid;
            self.schedule_filter_update();
        }
    }

    pub fn thread_id_filter(&self) -> Option<i32> {
        self.thread_id_filter
    }

    pub fn set_thread_id_filter(&mut self, tid: Option<i32>) {
        if self.thread_id_filter != tid {
            self.thread_id_filter = tid;
            self.schedule_filter_update();
        }
    }

    pub fn text_filter(&self) -> Option<&TextFilter> {
        self.text_filter.as_ref()
    }

    pub fn set_text_filter(&mut self, filter: Option<TextFilter>) {
        if self.text_filter != filter {
            self.text_filter = filter;
            self.schedule_filter_update();
        }
    }

    pub fn predefined_text_filters(&self) -> &[Arc<PredefinedLogTextFilter>] {
        &self.predefined_text_filters
    }

    pub fn set_predefined_text_filters(&mut self, filters: Vec<Arc<PredefinedLogTextFilter>>) {
        let same = filters.len() == self.predefined_text_filters.len()
            && filters
                .iter()
                .zip(&self.predefined_text_filters)
                .all(|(a, b)| a.id == b.id);
        if !same {
            self.predefined_text_filters = filters;
            self.schedule_filter_update();
        }
    }

    pub fn filters_combination_mode(&self) -> FilterCombinationMode {
        self.combination_mode
    }

    pub fn set_filters_combination_mode(&mut self, mode: FilterCombinationMode) {
        if self.combination_mode != mode {
            self.combination_mode = mode;
            self.schedule_filter_update();
        }
    }

    fn schedule_filter_update(&mut self) {
        self.update_filter_action
            .reschedule(self.ctx.settings().filter_update_delay());
    }

    fn build_criteria(&self) -> FilterCriteria {
        let mut text_filters: Vec<TextFilter> = self.text_filter.iter().cloned().collect();
        text_filters.extend(
            self.predefined_text_filters
                .iter()
                .map(|predefined| predefined.filter.clone()),
        );
        FilterCriteria {
            level: (self.level_filter != LogLevel::Undefined).then_some(self.level_filter),
            process_id: self.process_id_filter,
            thread_id: self.thread_id_filter,
            text_filters,
            combination_mode: self.combination_mode,
        }
    }

    fn update_filter(&mut self) {
        if self.showing_all_temporarily {
            self.showing_all_temporarily = false;
            tracing::debug!("Stop showing all logs temporarily");
        }
        let criteria = self.build_criteria();
        self.filter.set_criteria(criteria, &self.all_logs);
        self.notify(SessionNotification::FilteredLogsChanged);
    }

    /// Some filtering parameter is set
    pub fn is_filtering_needed(&self) -> bool {
        !self.build_criteria().is_empty()
    }

    pub fn is_showing_all_logs_temporarily(&self) -> bool {
        self.showing_all_temporarily
    }

    /// Show every log while keeping the filtering parameters, or go back
    /// to filtered logs
    pub fn toggle_showing_all_logs_temporarily(&mut self) {
        if self.showing_all_temporarily {
            self.update_filter_action.cancel();
            self.update_filter();
        } else if self.is_filtering_needed() {
            self.update_filter_action.cancel();
            self.showing_all_temporarily = true;
            self.filter
                .set_criteria(FilterCriteria::default(), &self.all_logs);
            tracing::debug!("Show all logs temporarily");
            self.notify(SessionNotification::FilteredLogsChanged);
        }
    }

    pub fn is_filtering_logs(&self) -> bool {
        self.filter.is_filtering() || self.update_filter_action.is_scheduled()
    }

    pub fn filtering_progress(&self) -> f64 {
        self.filter.filtering_progress()
    }

    pub fn last_logs_filtering_duration(&self) -> Option<Duration> {
        self.filter.last_filtering_duration()
    }

    // =======================================================================
    // Status
    // ========================================================================

    /// `(all failed, some failed)` over the current readers
    fn check_data_source_errors(&self) -> (bool, bool) {
        if self.readers.is_empty() {
            return (self.creation_failed, false);
        }
        let errors = self
            .readers
            .iter()
            .filter(|entry| entry.reader.source().state().is_error())
            .count();
        if errors >= self.readers.len() {
            (true, false)
        } else {
            (false, errors > 0)
        }
    }

    pub fn has_all_data_source_errors(&self) -> bool {
        self.check_data_source_errors().0
    }

    pub fn has_partial_data_source_errors(&self) -> bool {
        self.check_data_source_errors().1
    }

    pub fn is_data_source_creation_failed(&self) -> bool {
        self.creation_failed
    }

    /// A non-file source is not ready yet
    pub fn is_waiting_for_data_sources(&self) -> bool {
        if self.profile.is_none() || self.readers.is_empty() || self.has_all_data_source_errors() {
            return false;
        }
        self.readers.iter().any(|entry| {
            !is_file_source(entry.reader.source().creation_options())
                && entry.reader.is_waiting_for_data_source()
        })
    }

    pub fn is_reading_logs(&self) -> bool {
        self.readers.iter().any(|entry| entry.reader.state().is_reading())
    }

    /// Logs are being read, filtered or matched against marks
    pub fn is_processing_logs(&self) -> bool {
        self.is_reading_logs() || self.is_filtering_logs() || self.pending_mark_loads > 0
    }

    pub fn last_logs_reading_duration(&self) -> Option<Duration> {
        self.last_reading_duration
    }

    pub fn phase(&self) -> SessionPhase {
        if self.profile.is_none() {
            SessionPhase::NoProfile
        } else if self.are_parameters_missing() {
            SessionPhase::WaitingForParameters
        } else if self.is_waiting_for_data_sources() {
            SessionPhase::WaitingForDataSource
        } else if self.is_reading_logs() {
            SessionPhase::ReadingLogs
        } else if self.is_filtering_logs() {
            SessionPhase::FilteringLogs
        } else {
            SessionPhase::Ready
        }
    }

    // =======================================================================
    // Time Info
    // ========================================================================

    /// Duration between the earliest and latest timestamps of two logs
    pub fn calculate_duration_between_logs(
        x: &DisplayableLog,
        y: &DisplayableLog,
    ) -> Option<TimeDelta> {
        let between = |a: &DisplayableLog, b: &DisplayableLog| {
            let earliest = a.log().select_earliest_timestamp()?;
            let latest = b.log().select_latest_timestamp()?;
            (earliest <= latest).then(|| latest - earliest)
        };
        between(x, y).or_else(|| between(y, x))
    }

    /// Chronologically first and last of the given sorted logs
    pub fn find_first_and_last_log(
        &self,
        logs: &[Arc<DisplayableLog>],
    ) -> Option<(Arc<DisplayableLog>, Arc<DisplayableLog>)> {
        let first = logs.first()?;
        let last = logs.last()?;
        let descending = self.all_logs.ordering().direction == SortDirection::Descending;
        if descending {
            Some((Arc::clone(last), Arc::clone(first)))
        } else {
            Some((Arc::clone(first), Arc::clone(last)))
        }
    }

    /// Time range of the shown logs
    pub fn time_info(&self) -> TimeInfo {
        let Some((first, last)) = self.find_first_and_last_log(self.filtered_logs()) else {
            return TimeInfo::default();
        };
        TimeInfo {
            earliest: first.log().select_earliest_timestamp(),
            latest: last.log().select_latest_timestamp(),
            duration: Self::calculate_duration_between_logs(&first, &last),
        }
    }

    // =======================================================================
    // State
    // ========================================================================

    pub fn save_state(&self) -> SessionState {
        SessionState {
            log_profile: self.profile.as_ref().map(|profile| profile.id.clone()),
            log_readers: self
                .readers
                .iter()
                .map(|entry| LogReaderSnapshot {
                    options: entry.reader.source().creation_options().clone(),
                })
                .collect(),
            log_filters_combination_mode: self.combination_mode,
            log_level_filter: self.level_filter,
            log_process_id_filter: self.process_id_filter,
            log_text_filter: self.text_filter.as_ref().map(|filter| TextFilterSnapshot {
                pattern: filter.pattern().to_string(),
                options: filter.options(),
            }),
            log_thread_id_filter: self.thread_id_filter,
            predefined_log_text_filters: self
                .predefined_text_filters
                .iter()
                .map(|filter| filter.id.clone())
                .collect(),
        }
    }

    /// Restore a saved state, returns false when its profile is unknown
    pub fn restore_state(&mut self, state: &SessionState) -> Result<bool> {
        if self.profile.is_some() {
            self.reset_log_profile()?;
        }
        let Some(profile_id) = state.log_profile.as_deref() else {
            return Ok(false);
        };
        let Some(profile) = self.ctx.find_profile(profile_id) else {
            tracing::warn!(profile = %profile_id, "Log profile of saved state not found");
            return Ok(false);
        };
        tracing::debug!(profile = %profile_id, readers = state.log_readers.len(), "Restore state");
        self.set_log_profile_without_reading(Arc::clone(&profile))?;

        for snapshot in &state.log_readers {
            let options = snapshot.options.clone();
            if let Some(file_name) = &options.file_name {
                if profile.data_source_options.file_name.is_none() {
                    if self.log_file_paths.contains(file_name) {
                        continue;
                    }
                    self.log_file_paths.push(file_name.clone());
                }
            } else {
                if profile.data_source_options.uri.is_none() {
                    self.uri = options.uri.clone();
                }
                if profile.data_source_options.ip_endpoint.is_none() {
                    self.ip_endpoint = options.ip_endpoint.clone();
                }
            }
            if profile.data_source_options.working_directory.is_none()
                && options.working_directory.is_some()
            {
                self.working_directory = options.working_directory.clone();
            }
            self.create_reader(options);
        }

        self.combination_mode = state.log_filters_combination_mode;
        self.level_filter = state.log_level_filter;
        self.process_id_filter = state.log_process_id_filter;
        self.thread_id_filter = state.log_thread_id_filter;
        self.text_filter = state.log_text_filter.as_ref().and_then(|snapshot| {
            match TextFilter::with_options(&snapshot.pattern, snapshot.options) {
                Ok(filter) => Some(filter),
                Err(e) => {
                    tracing::warn!(
                        pattern = %snapshot.pattern,
                        error = %e,
                        "Invalid saved text filter"
                    );
                    None
                }
            }
        });
        self.predefined_text_filters = state
            .predefined_log_text_filters
            .iter()
            .filter_map(|id| {
                let filter = self.ctx.find_text_filter(id);
                if filter.is_none() {
                    tracing::warn!(filter = %id, "Predefined text filter of saved state not found");
                }
                filter
            })
            .collect();
        self.schedule_filter_update();
        Ok(true)
    }

    /// Release readers, logs and pending work
    pub fn dispose(&mut self) {
        self.flush_marked_logs_save();
        self.update_filter_action.cancel();
        self.dispose_all_readers();
        self.filter.dispose();
        self.profile = None;
        self.provider = None;
    }
}

fn logs_find_line(logs: &[Arc<DisplayableLog>], line_number: i32) -> Option<&Arc<DisplayableLog>> {
    let pos = logs.partition_point(|l| l.line_number().unwrap_or(0) < line_number);
    logs.get(pos)
        .filter(|log| log.line_number() == Some(line_number))
}
