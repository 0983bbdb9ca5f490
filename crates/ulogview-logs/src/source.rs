//! Contracts of log data sources and their providers

use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::watch;

use ulogview_types::{Result, SourceOption, SourceOptions};

/// Observable state of a log data source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SourceState {
    /// Not ready to be read yet
    Preparing,
    Ready,
    SourceNotFound,
    UnclassifiedError,
    Disposed,
}

impl SourceState {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::SourceNotFound | Self::UnclassifiedError)
    }
}

/// Lines read from a source
pub type LineStream = BoxStream<'static, io::Result<String>>;

/// Source of raw log lines
pub trait LogDataSource: Send + Sync {
    /// Options the source was created with
    fn creation_options(&self) -> &SourceOptions;

    /// Watch the state of the source
    fn subscribe_state(&self) -> watch::Receiver<SourceState>;

    fn state(&self) -> SourceState {
        *self.subscribe_state().borrow()
    }

    /// Open the source for reading
    ///
    /// Only called once the source reports [`SourceState::Ready`].
    fn open_lines(&self) -> BoxFuture<'_, Result<LineStream>>;
}

/// Factory of log data sources of one kind
pub trait LogDataSourceProvider: Send + Sync {
    /// Unique name of the provider
    fn name(&self) -> &str;

    fn is_source_option_supported(&self, option: SourceOption) -> bool;

    fn is_source_option_required(&self, option: SourceOption) -> bool;

    /// Create a source, failing when the options cannot describe one
    fn create_source(&self, options: &SourceOptions) -> Result<Arc<dyn LogDataSource>>;
}

/// Whether a source created with `options` reads a local file
pub fn is_file_source(options: &SourceOptions) -> bool {
    options.is_option_set(SourceOption::FileName)
}
