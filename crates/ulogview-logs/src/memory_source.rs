//! In-process log data sources fed from memory

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use ulogview_types::{Error, Result, SourceOption, SourceOptions};

use crate::source::{LineStream, LogDataSource, LogDataSourceProvider, SourceState};

enum Content {
    Lines(Arc<[String]>),
    Channel(Option<mpsc::UnboundedReceiver<String>>),
}

/// Source reading a fixed list of lines or lines pushed through a channel
pub struct MemoryLogDataSource {
    options: SourceOptions,
    state: watch::Sender<SourceState>,
    content: Mutex<Content>,
}

impl MemoryLogDataSource {
    /// Source yielding `lines` then ending
    pub fn with_lines(options: SourceOptions, lines: Arc<[String]>) -> Self {
        Self::new(options, Content::Lines(lines))
    }

    /// Source yielding every line sent until all senders are dropped
    pub fn with_channel(options: SourceOptions) -> (Self, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(options, Content::Channel(Some(rx))), tx)
    }

    fn new(options: SourceOptions, content: Content) -> Self {
        let (state, _) = watch::channel(SourceState::Ready);
        Self {
            options,
            state,
            content: Mutex::new(content),
        }
    }

    /// Force the observable state, used to simulate source failures
    pub fn set_state(&self, state: SourceState) {
        self.state.send_replace(state);
    }
}

impl LogDataSource for MemoryLogDataSource {
    fn creation_options(&self) -> &SourceOptions {
        &self.options
    }

    fn subscribe_state(&self) -> watch::Receiver<SourceState> {
        self.state.subscribe()
    }

    fn open_lines(&self) -> BoxFuture<'_, Result<LineStream>> {
        let opened: Result<LineStream> = match &mut *self.content.lock() {
            Content::Lines(lines) => {
                let lines = Arc::clone(lines);
                let count = lines.len();
                Ok(stream::iter(0..count)
                    .map(move |i| Ok(lines[i].clone()))
                    .boxed())
            }
            Content::Channel(rx) => match rx.take() {
                Some(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|line| (Ok(line), rx))
                })
                .boxed()),
                None => Err(Error::data_source("channel source already opened")),
            },
        };
        async move { opened }.boxed()
    }
}

enum Registered {
    Lines(Arc<[String]>),
    Channel(mpsc::UnboundedReceiver<String>),
}

/// Provider creating [`MemoryLogDataSource`]s keyed by file name or URI
pub struct MemoryLogDataSourceProvider {
    name: String,
    required: Vec<SourceOption>,
    content: Mutex<HashMap<String, Registered>>,
    created: Mutex<Vec<Arc<MemoryLogDataSource>>>,
    fail_creation: AtomicBool,
}

impl MemoryLogDataSourceProvider {
    pub fn new(name: impl Into<String>, required: Vec<SourceOption>) -> Self {
        Self {
            name: name.into(),
            required,
            content: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            fail_creation: AtomicBool::new(false),
        }
    }

    /// Provider whose sources need a file name, like a file provider
    pub fn files(name: impl Into<String>) -> Self {
        Self::new(name, vec![SourceOption::FileName])
    }

    /// Register finite content for a key
    pub fn insert_lines<I, S>(&self, key: impl Into<String>, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        self.content
            .lock()
            .insert(key.into(), Registered::Lines(Arc::from(lines)));
    }

    /// Register continuous content for a key
    pub fn open_channel(&self, key: impl Into<String>) -> mpsc::UnboundedSender<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.content
            .lock()
            .insert(key.into(), Registered::Channel(rx));
        tx
    }

    /// Make subsequent [`LogDataSourceProvider::create_source`] calls fail
    pub fn set_fail_creation(&self, fail: bool) {
        self.fail_creation.store(fail, Ordering::SeqCst);
    }

    /// Sources created so far, oldest first
    pub fn created_sources(&self) -> Vec<Arc<MemoryLogDataSource>> {
        self.created.lock().clone()
    }

    fn key_of(options: &SourceOptions) -> String {
        options
            .file_name
            .clone()
            .or_else(|| options.uri.clone())
            .or_else(|| options.ip_endpoint.clone())
            .or_else(|| options.working_directory.clone())
            .unwrap_or_default()
    }
}

impl LogDataSourceProvider for MemoryLogDataSourceProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_source_option_supported(&self, _option: SourceOption) -> bool {
        true
    }

    fn is_source_option_required(&self, option: SourceOption) -> bool {
        self.required.contains(&option)
    }

    fn create_source(&self, options: &SourceOptions) -> Result<Arc<dyn LogDataSource>> {
        if self.fail_creation.load(Ordering::SeqCst) {
            return Err(Error::source_creation(format!("{} refused to create source", self.name)));
        }
        for option in &self.required {
            if !options.is_option_set(*option) {
                return Err(Error::source_creation(format!("missing {}", option.name())));
            }
        }
        let key = Self::key_of(options);
        let mut content = self.content.lock();
        let source = match content.remove(&key) {
            Some(Registered::Lines(lines)) => {
                content.insert(key, Registered::Lines(Arc::clone(&lines)));
                MemoryLogDataSource::with_lines(options.clone(), lines)
            }
            Some(Registered::Channel(rx)) => {
                MemoryLogDataSource::new(options.clone(), Content::Channel(Some(rx)))
            }
            None => {
                let source = MemoryLogDataSource::with_lines(options.clone(), Arc::from(Vec::new()));
                source.set_state(SourceState::SourceNotFound);
                source
            }
        };
        let source = Arc::new(source);
        self.created.lock().push(Arc::clone(&source));
        Ok(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lines_source_is_reopenable() {
        let provider = MemoryLogDataSourceProvider::files("Memory");
        provider.insert_lines("a.log", ["one", "two"]);
        for _ in 0..2 {
            let source = provider.create_source(&SourceOptions::for_file("a.log")).unwrap();
            assert_eq!(source.state(), SourceState::Ready);
            let lines: Vec<_> = source.open_lines().await.unwrap().collect().await;
            assert_eq!(lines.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_channel_source_streams_until_closed() {
        let provider = MemoryLogDataSourceProvider::new("Stream", vec![SourceOption::Uri]);
        let tx = provider.open_channel("tcp://host");
        let options = SourceOptions {
            uri: Some("tcp://host".to_string()),
            ..Default::default()
        };
        let source = provider.create_source(&options).unwrap();
        tx.send("hello".to_string()).unwrap();
        drop(tx);
        let lines: Vec<_> = source.open_lines().await.unwrap().collect().await;
        assert_eq!(lines.len(), 1);
        assert!(source.open_lines().await.is_err());
    }

    #[test]
    fn test_creation_failures() {
        let provider = MemoryLogDataSourceProvider::files("Memory");
        assert!(provider.create_source(&SourceOptions::default()).is_err());
        provider.set_fail_creation(true);
        assert!(provider.create_source(&SourceOptions::for_file("a.log")).is_err());
        provider.set_fail_creation(false);
        let source = provider.create_source(&SourceOptions::for_file("missing.log")).unwrap();
        assert!(source.state().is_error());
    }
}
