use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use ulogview_types::{Error, Result};

use crate::log::Log;
use crate::pattern::{LineParser, ParseOptions};
use crate::source::{LogDataSource, SourceState};

/// Identifier of a reader within its session
pub type ReaderId = u32;

/// Logs collected before a batch is sent regardless of the update interval
const MAX_BATCH_SIZE: usize = 4096;

/// Default interval between two batches of read logs
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

/// State of a [`LogReader`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogReaderState {
    Constructed,
    Starting,
    ReadingLogs,
    Paused,
    Stopped,
    DataSourceError,
    Disposed,
}

impl LogReaderState {
    /// Whether logs are still expected to arrive
    pub fn is_reading(&self) -> bool {
        matches!(self, Self::Starting | Self::ReadingLogs)
    }
}

/// Reading behavior of a [`LogReader`]
#[derive(Clone, Debug)]
pub struct LogReaderOptions {
    pub parsing: ParseOptions,
    /// Never stops by itself and evicts oldest logs past `max_log_count`
    pub continuous: bool,
    pub max_log_count: Option<usize>,
    pub update_interval: Duration,
}

impl Default for LogReaderOptions {
    fn default() -> Self {
        Self {
            parsing: ParseOptions::default(),
            continuous: false,
            max_log_count: None,
            update_interval: DEFAULT_UPDATE_INTERVAL,
        }
    }
}

/// Event sent by the background reading task
#[derive(Debug)]
pub enum ReaderEvent {
    StateChanged(LogReaderState),
    SourceStateChanged(SourceState),
    WaitingForSource(bool),
    LogsRead(Vec<Log>),
}

/// [`ReaderEvent`] tagged with the reader it comes from
#[derive(Debug)]
pub struct ReaderMessage {
    pub reader: ReaderId,
    pub event: ReaderEvent,
}

/// Change of the logs owned by a reader
///
/// `removed` oldest logs are evicted first, then `added` are appended.
#[derive(Debug, Default)]
pub struct LogsChange {
    pub added: Vec<Arc<Log>>,
    pub removed: usize,
}

/// Reader pulling lines from one source and turning them into logs
///
/// The reader itself lives on the owner side. A background task does the
/// reading and reports through [`ReaderMessage`]s which the owner feeds back
/// into [`LogReader::handle_event`].
pub struct LogReader {
    id: ReaderId,
    source: Arc<dyn LogDataSource>,
    options: LogReaderOptions,
    state: LogReaderState,
    source_state: SourceState,
    waiting_for_source: bool,
    logs: VecDeque<Arc<Log>>,
    events: mpsc::UnboundedSender<ReaderMessage>,
    /// Limits concurrently read file sources
    file_permits: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    update_interval: watch::Sender<Duration>,
    task: Option<JoinHandle<()>>,
}

impl LogReader {
    pub fn new(
        id: ReaderId,
        source: Arc<dyn LogDataSource>,
        options: LogReaderOptions,
        events: mpsc::UnboundedSender<ReaderMessage>,
        file_permits: Option<Arc<Semaphore>>,
    ) -> Self {
        let source_state = source.state();
        let update_interval = watch::channel(options.update_interval).0;
        Self {
            id,
            source,
            options,
            state: LogReaderState::Constructed,
            source_state,
            waiting_for_source: false,
            logs: VecDeque::new(),
            events,
            file_permits,
            cancel: CancellationToken::new(),
            paused: watch::channel(false).0,
            update_interval,
            task: None,
        }
    }

    pub fn id(&self) -> ReaderId {
        self.id
    }

    pub fn source(&self) -> &Arc<dyn LogDataSource> {
        &self.source
    }

    pub fn state(&self) -> LogReaderState {
        self.state
    }

    /// Last source state reported by the reading task
    pub fn source_state(&self) -> SourceState {
        self.source_state
    }

    pub fn is_continuous(&self) -> bool {
        self.options.continuous
    }

    pub fn is_waiting_for_data_source(&self) -> bool {
        self.waiting_for_source
    }

    /// Logs currently owned by the reader, oldest first
    pub fn logs(&self) -> &VecDeque<Arc<Log>> {
        &self.logs
    }

    pub fn update_interval(&self) -> Duration {
        *self.update_interval.borrow()
    }

    pub fn set_update_interval(&mut self, interval: Duration) {
        self.options.update_interval = interval;
        self.update_interval.send_replace(interval);
    }

    pub fn max_log_count(&self) -> Option<usize> {
        if self.options.continuous {
            self.options.max_log_count
        } else {
            None
        }
    }

    /// Change the log cap, returns the number of oldest logs evicted
    pub fn set_max_log_count(&mut self, max_log_count: Option<usize>) -> usize {
        self.options.max_log_count = max_log_count;
        match self.max_log_count() {
            Some(max) if self.logs.len() > max => {
                let overflow = self.logs.len() - max;
                self.logs.drain(..overflow);
                overflow
            }
            _ => 0,
        }
    }

    /// Start reading in the background
    pub fn start(&mut self) -> Result<()> {
        match self.state {
            LogReaderState::Constructed | LogReaderState::Stopped => {}
            state => {
                return Err(Error::invalid_state(format!(
                    "cannot start log reader {} in state {:?}",
                    self.id, state
                )));
            }
        }
        self.cancel = CancellationToken::new();
        self.paused.send_replace(false);
        self.state = LogReaderState::Starting;
        tracing::debug!(reader = self.id, "Start reading logs");

        let file_permits = if crate::source::is_file_source(self.source.creation_options()) {
            self.file_permits.clone()
        } else {
            None
        };
        let ctx = ReadContext {
            id: self.id,
            source: Arc::clone(&self.source),
            parsing: self.options.parsing.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
            paused: self.paused.subscribe(),
            interval: self.update_interval.subscribe(),
            file_permits,
        };
        self.task = Some(tokio::spawn(read_logs(ctx)));
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        match self.state {
            LogReaderState::ReadingLogs | LogReaderState::Paused => {
                self.paused.send_replace(true);
                self.state = LogReaderState::Paused;
                Ok(())
            }
            state => Err(Error::invalid_state(format!(
                "cannot pause log reader {} in state {:?}",
                self.id, state
            ))),
        }
    }

    pub fn resume(&mut self) -> Result<()> {
        match self.state {
            LogReaderState::ReadingLogs | LogReaderState::Paused => {
                self.paused.send_replace(false);
                self.state = LogReaderState::ReadingLogs;
                Ok(())
            }
            state => Err(Error::invalid_state(format!(
                "cannot resume log reader {} in state {:?}",
                self.id, state
            ))),
        }
    }

    /// Drop all owned logs, returns how many were dropped
    pub fn clear_logs(&mut self) -> usize {
        let count = self.logs.len();
        self.logs.clear();
        count
    }

    /// Stop reading and release everything, valid from any state
    pub fn dispose(&mut self) {
        if self.state == LogReaderState::Disposed {
            return;
        }
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.logs.clear();
        self.state = LogReaderState::Disposed;
        tracing::debug!(reader = self.id, "Log reader disposed");
    }

    /// Apply an event of the reading task
    pub fn handle_event(&mut self, event: ReaderEvent) -> Option<LogsChange> {
        if self.state == LogReaderState::Disposed {
            return None;
        }
        match event {
            ReaderEvent::StateChanged(state) => {
                // Pausing wins over the task reporting it started reading
                if !(state == LogReaderState::ReadingLogs && self.state == LogReaderState::Paused) {
                    tracing::trace!(reader = self.id, ?state, "Log reader state changed");
                    self.state = state;
                }
                None
            }
            ReaderEvent::SourceStateChanged(state) => {
                self.source_state = state;
                None
            }
            ReaderEvent::WaitingForSource(waiting) => {
                self.waiting_for_source = waiting;
                None
            }
            ReaderEvent::LogsRead(logs) => Some(self.admit(logs)),
        }
    }

    fn admit(&mut self, logs: Vec<Log>) -> LogsChange {
        let mut added: Vec<Arc<Log>> = logs.into_iter().map(Arc::new).collect();
        let mut removed = 0;
        if let Some(max) = self.max_log_count() {
            if added.len() > max {
                added.drain(..added.len() - max);
            }
            removed = (self.logs.len() + added.len())
                .saturating_sub(max)
                .min(self.logs.len());
            self.logs.drain(..removed);
        }
        self.logs.extend(added.iter().cloned());
        LogsChange { added, removed }
    }
}

impl Drop for LogReader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ReadContext {
    id: ReaderId,
    source: Arc<dyn LogDataSource>,
    parsing: ParseOptions,
    events: mpsc::UnboundedSender<ReaderMessage>,
    cancel: CancellationToken,
    paused: watch::Receiver<bool>,
    interval: watch::Receiver<Duration>,
    file_permits: Option<Arc<Semaphore>>,
}

impl ReadContext {
    fn send(&self, event: ReaderEvent) -> bool {
        self.events
            .send(ReaderMessage {
                reader: self.id,
                event,
            })
            .is_ok()
    }

    fn flush(&self, pending: &mut Vec<Log>) -> bool {
        if pending.is_empty() {
            return true;
        }
        self.send(ReaderEvent::LogsRead(std::mem::take(pending)))
    }

    fn ticker(&self) -> tokio::time::Interval {
        let period = (*self.interval.borrow()).max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

/// Wait until the source is ready, `None` when reading must not go on
async fn wait_for_source(ctx: &ReadContext) -> Option<watch::Receiver<SourceState>> {
    let mut state_rx = ctx.source.subscribe_state();
    let mut waiting = false;
    loop {
        let state = *state_rx.borrow_and_update();
        ctx.send(ReaderEvent::SourceStateChanged(state));
        match state {
            SourceState::Ready => {
                if waiting {
                    ctx.send(ReaderEvent::WaitingForSource(false));
                }
                return Some(state_rx);
            }
            SourceState::Disposed => return None,
            state if state.is_error() => {
                tracing::warn!(reader = ctx.id, ?state, "Log data source error");
                ctx.send(ReaderEvent::StateChanged(LogReaderState::DataSourceError));
                return None;
            }
            _ => {
                if !waiting {
                    waiting = true;
                    ctx.send(ReaderEvent::WaitingForSource(true));
                }
                tokio::select! {
                    _ = ctx.cancel.cancelled() => return None,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                }
            }
        }
    }
}

async fn read_logs(mut ctx: ReadContext) {
    let _permit = match ctx.file_permits.clone() {
        Some(permits) => tokio::select! {
            _ = ctx.cancel.cancelled() => return,
            permit = permits.acquire_owned() => match permit {
                Ok(permit) => Some(permit),
                Err(_) => return,
            },
        },
        None => None,
    };
    let Some(mut source_state) = wait_for_source(&ctx).await else {
        return;
    };
    let mut lines = match ctx.source.open_lines().await {
        Ok(lines) => lines,
        Err(e) => {
            tracing::warn!(reader = ctx.id, error = %e, "Unable to open log data source");
            ctx.send(ReaderEvent::SourceStateChanged(ctx.source.state()));
            ctx.send(ReaderEvent::StateChanged(LogReaderState::DataSourceError));
            return;
        }
    };
    if !ctx.send(ReaderEvent::StateChanged(LogReaderState::ReadingLogs)) {
        return;
    }

    let file_name = ctx
        .source
        .creation_options()
        .file_name
        .as_deref()
        .map(Arc::<str>::from);
    let mut parser = LineParser::new(ctx.parsing.clone(), file_name);
    let mut pending = Vec::new();
    let mut line_number: u32 = 0;
    let mut ticker = ctx.ticker();

    loop {
        if *ctx.paused.borrow_and_update() {
            if !ctx.flush(&mut pending) {
                return;
            }
            tokio::select! {
                _ = ctx.cancel.cancelled() => return,
                changed = ctx.paused.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            continue;
        }
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return,
            changed = ctx.paused.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            changed = ctx.interval.changed() => {
                if changed.is_err() {
                    return;
                }
                ticker = ctx.ticker();
            }
            changed = source_state.changed() => {
                let state = *source_state.borrow_and_update();
                if changed.is_err() || state.is_error() || state == SourceState::Disposed {
                    tracing::warn!(reader = ctx.id, ?state, "Log data source failed while reading");
                    parser.finish(&mut pending);
                    ctx.flush(&mut pending);
                    ctx.send(ReaderEvent::SourceStateChanged(state));
                    ctx.send(ReaderEvent::StateChanged(LogReaderState::DataSourceError));
                    return;
                }
                ctx.send(ReaderEvent::SourceStateChanged(state));
            }
            _ = ticker.tick() => {
                if !ctx.flush(&mut pending) {
                    return;
                }
            }
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    line_number = line_number.saturating_add(1);
                    parser.parse_line(Arc::from(line), line_number, &mut pending);
                    if pending.len() >= MAX_BATCH_SIZE && !ctx.flush(&mut pending) {
                        return;
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(reader = ctx.id, error = %e, "Error reading log data source");
                    parser.finish(&mut pending);
                    ctx.flush(&mut pending);
                    ctx.send(ReaderEvent::SourceStateChanged(SourceState::UnclassifiedError));
                    ctx.send(ReaderEvent::StateChanged(LogReaderState::DataSourceError));
                    return;
                }
                None => {
                    parser.finish(&mut pending);
                    ctx.flush(&mut pending);
                    tracing::debug!(reader = ctx.id, lines = line_number, "Reached end of log data source");
                    ctx.send(ReaderEvent::StateChanged(LogReaderState::Stopped));
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_source::MemoryLogDataSourceProvider;
    use crate::source::LogDataSourceProvider;
    use ulogview_types::{SourceOption, SourceOptions};

    fn new_reader(
        source: Arc<dyn LogDataSource>,
        options: LogReaderOptions,
        permits: Option<Arc<Semaphore>>,
    ) -> (LogReader, mpsc::UnboundedReceiver<ReaderMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (LogReader::new(1, source, options, tx, permits), rx)
    }

    async fn drive_until(
        reader: &mut LogReader,
        rx: &mut mpsc::UnboundedReceiver<ReaderMessage>,
        done: impl Fn(&LogReader) -> bool,
    ) -> usize {
        let mut removed = 0;
        while !done(reader) {
            let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("reader stalled")
                .expect("channel closed");
            if let Some(change) = reader.handle_event(message.event) {
                removed += change.removed;
            }
        }
        removed
    }

    #[tokio::test]
    async fn test_finite_source_stops_at_end() {
        let provider = MemoryLogDataSourceProvider::files("Memory");
        provider.insert_lines("a.log", (1..=10).map(|i| format!("line {i}")));
        let source = provider.create_source(&SourceOptions::for_file("a.log")).unwrap();
        let (mut reader, mut rx) = new_reader(source, LogReaderOptions::default(), None);
        reader.start().unwrap();
        assert_eq!(reader.state(), LogReaderState::Starting);
        drive_until(&mut reader, &mut rx, |r| r.state() == LogReaderState::Stopped).await;
        assert_eq!(reader.logs().len(), 10);
        assert_eq!(reader.logs()[9].line_number(), Some(10));
        assert_eq!(reader.logs()[0].file_name(), Some("a.log"));
    }

    #[tokio::test]
    async fn test_continuous_reader_evicts_oldest() {
        let provider = MemoryLogDataSourceProvider::new("Stream", vec![SourceOption::Uri]);
        let tx = provider.open_channel("tcp://host");
        let options = SourceOptions {
            uri: Some("tcp://host".to_string()),
            ..Default::default()
        };
        let source = provider.create_source(&options).unwrap();
        let reader_options = LogReaderOptions {
            continuous: true,
            max_log_count: Some(100),
            update_interval: Duration::from_millis(5),
            ..Default::default()
        };
        let (mut reader, mut rx) = new_reader(source, reader_options, None);
        reader.start().unwrap();
        for i in 1..=150 {
            tx.send(format!("log {i}")).unwrap();
        }
        drop(tx);
        drive_until(&mut reader, &mut rx, |r| r.state() == LogReaderState::Stopped).await;
        assert_eq!(reader.logs().len(), 100);
        assert_eq!(reader.logs()[0].message().as_deref(), Some("log 51"));
        assert_eq!(reader.logs()[99].message().as_deref(), Some("log 150"));
    }

    #[tokio::test]
    async fn test_source_error_is_reported_as_state() {
        let provider = MemoryLogDataSourceProvider::files("Memory");
        let source = provider.create_source(&SourceOptions::for_file("missing.log")).unwrap();
        let (mut reader, mut rx) = new_reader(source, LogReaderOptions::default(), None);
        reader.start().unwrap();
        drive_until(&mut reader, &mut rx, |r| r.state() == LogReaderState::DataSourceError).await;
        assert_eq!(reader.source_state(), SourceState::SourceNotFound);
        assert!(reader.logs().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let provider = MemoryLogDataSourceProvider::files("Memory");
        provider.insert_lines("a.log", ["x"]);
        let source = provider.create_source(&SourceOptions::for_file("a.log")).unwrap();
        let (mut reader, _rx) = new_reader(source, LogReaderOptions::default(), None);
        assert!(reader.pause().unwrap_err().is_fatal());
        assert!(reader.resume().is_err());
        reader.start().unwrap();
        assert!(reader.start().is_err());
        reader.dispose();
        assert_eq!(reader.state(), LogReaderState::Disposed);
        assert!(reader.handle_event(ReaderEvent::LogsRead(Vec::new())).is_none());
    }

    #[tokio::test]
    async fn test_pause_survives_reading_event() {
        let provider = MemoryLogDataSourceProvider::new("Stream", vec![SourceOption::Uri]);
        let tx = provider.open_channel("tcp://host");
        let options = SourceOptions {
            uri: Some("tcp://host".to_string()),
            ..Default::default()
        };
        let source = provider.create_source(&options).unwrap();
        let (mut reader, mut rx) = new_reader(source, LogReaderOptions::default(), None);
        reader.start().unwrap();
        drive_until(&mut reader, &mut rx, |r| r.state() == LogReaderState::ReadingLogs).await;
        reader.pause().unwrap();
        reader.handle_event(ReaderEvent::StateChanged(LogReaderState::ReadingLogs));
        assert_eq!(reader.state(), LogReaderState::Paused);
        reader.resume().unwrap();
        tx.send("after resume".to_string()).unwrap();
        drive_until(&mut reader, &mut rx, |r| !r.logs().is_empty()).await;
        assert_eq!(reader.logs()[0].message().as_deref(), Some("after resume"));
    }

    #[tokio::test]
    async fn test_file_sources_wait_for_permit() {
        let provider = MemoryLogDataSourceProvider::files("Memory");
        provider.insert_lines("a.log", ["x", "y"]);
        let source = provider.create_source(&SourceOptions::for_file("a.log")).unwrap();
        let permits = Arc::new(Semaphore::new(0));
        let (mut reader, mut rx) =
            new_reader(source, LogReaderOptions::default(), Some(Arc::clone(&permits)));
        reader.start().unwrap();
        let idle = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(idle.is_err());
        permits.add_permits(1);
        drive_until(&mut reader, &mut rx, |r| r.state() == LogReaderState::Stopped).await;
        assert_eq!(reader.logs().len(), 2);
    }
}
