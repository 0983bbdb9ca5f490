//! Process-scoped services shared by sessions

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use tokio::sync::Semaphore;

use ulogview_logs::{FileLogDataSourceProvider, LogDataSourceProvider, LogIdGenerator, ReaderId};

use crate::config::Settings;
use crate::dispose::DisposeQueue;
use crate::io_queue::IoQueue;
use crate::profile::{LogProfile, PredefinedLogTextFilter};

struct Inner {
    settings: Settings,
    log_ids: LogIdGenerator,
    next_reader_id: AtomicU32,
    file_permits: Arc<Semaphore>,
    io_queue: IoQueue,
    dispose_queue: DisposeQueue,
    providers: RwLock<HashMap<String, Arc<dyn LogDataSourceProvider>>>,
    profiles: RwLock<HashMap<String, Arc<LogProfile>>>,
    text_filters: RwLock<HashMap<String, Arc<PredefinedLogTextFilter>>>,
}

/// Services created once per process and handed to every session
///
/// Cloning is cheap, clones share the same services.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Inner>,
}

impl SessionContext {
    /// Create the context with the file provider registered, must be called
    /// within a tokio runtime
    pub fn new(settings: Settings) -> Self {
        let file_permits = Arc::new(Semaphore::new(settings.file_reading_concurrency.max(1)));
        let dispose_queue = DisposeQueue::new(settings.save_memory_aggressively);
        let ctx = Self {
            inner: Arc::new(Inner {
                settings,
                log_ids: LogIdGenerator::new(),
                next_reader_id: AtomicU32::new(1),
                file_permits,
                io_queue: IoQueue::new(),
                dispose_queue,
                providers: RwLock::new(HashMap::new()),
                profiles: RwLock::new(HashMap::new()),
                text_filters: RwLock::new(HashMap::new()),
            }),
        };
        ctx.register_provider(Arc::new(FileLogDataSourceProvider));
        ctx
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn log_ids(&self) -> &LogIdGenerator {
        &self.inner.log_ids
    }

    pub(crate) fn next_reader_id(&self) -> ReaderId {
        self.inner.next_reader_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Permits bounding concurrently read files
    pub fn file_permits(&self) -> &Arc<Semaphore> {
        &self.inner.file_permits
    }

    pub fn io_queue(&self) -> &IoQueue {
        &self.inner.io_queue
    }

    pub fn dispose_queue(&self) -> &DisposeQueue {
        &self.inner.dispose_queue
    }

    /// Register a provider under its name, replacing any previous one
    pub fn register_provider(&self, provider: Arc<dyn LogDataSourceProvider>) {
        let name = provider.name().to_string();
        self.inner.providers.write().insert(name, provider);
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn LogDataSourceProvider>> {
        self.inner.providers.read().get(name).cloned()
    }

    /// Register a profile so that saved sessions can refer to it
    pub fn register_profile(&self, profile: Arc<LogProfile>) {
        self.inner
            .profiles
            .write()
            .insert(profile.id.clone(), profile);
    }

    pub fn find_profile(&self, id: &str) -> Option<Arc<LogProfile>> {
        self.inner.profiles.read().get(id).cloned()
    }

    pub fn register_text_filter(&self, filter: Arc<PredefinedLogTextFilter>) {
        self.inner
            .text_filters
            .write()
            .insert(filter.id.clone(), filter);
    }

    pub fn find_text_filter(&self, id: &str) -> Option<Arc<PredefinedLogTextFilter>> {
        self.inner.text_filters.read().get(id).cloned()
    }
}
