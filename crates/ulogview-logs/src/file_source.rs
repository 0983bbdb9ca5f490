use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use ulogview_types::{Error, Result, SourceOption, SourceOptions};

use crate::source::{LineStream, LogDataSource, LogDataSourceProvider, SourceState};

/// Name of [`FileLogDataSourceProvider`]
pub const FILE_PROVIDER_NAME: &str = "File";

/// Provider of sources reading local text files
#[derive(Debug, Default)]
pub struct FileLogDataSourceProvider;

impl LogDataSourceProvider for FileLogDataSourceProvider {
    fn name(&self) -> &str {
        FILE_PROVIDER_NAME
    }

    fn is_source_option_supported(&self, option: SourceOption) -> bool {
        matches!(option, SourceOption::FileName | SourceOption::Encoding)
    }

    fn is_source_option_required(&self, option: SourceOption) -> bool {
        option == SourceOption::FileName
    }

    fn create_source(&self, options: &SourceOptions) -> Result<Arc<dyn LogDataSource>> {
        let Some(file_name) = options.file_name.as_deref() else {
            return Err(Error::source_creation("no file name"));
        };
        if let Some(encoding) = options.encoding.as_deref() {
            if !encoding.eq_ignore_ascii_case("utf-8") && !encoding.eq_ignore_ascii_case("utf8") {
                return Err(Error::source_creation(format!("unsupported encoding '{encoding}'")));
            }
        }
        let state = if Path::new(file_name).is_file() {
            SourceState::Ready
        } else {
            tracing::warn!(file = %file_name, "Log file not found");
            SourceState::SourceNotFound
        };
        Ok(Arc::new(FileLogDataSource {
            options: options.clone(),
            state: watch::channel(state).0,
        }))
    }
}

/// Source reading one text file line by line
pub struct FileLogDataSource {
    options: SourceOptions,
    state: watch::Sender<SourceState>,
}

impl LogDataSource for FileLogDataSource {
    fn creation_options(&self) -> &SourceOptions {
        &self.options
    }

    fn subscribe_state(&self) -> watch::Receiver<SourceState> {
        self.state.subscribe()
    }

    fn open_lines(&self) -> BoxFuture<'_, Result<LineStream>> {
        async move {
            let file_name = self.options.file_name.clone().unwrap_or_default();
            let file = match tokio::fs::File::open(&file_name).await {
                Ok(file) => file,
                Err(e) => {
                    let state = if e.kind() == std::io::ErrorKind::NotFound {
                        SourceState::SourceNotFound
                    } else {
                        SourceState::UnclassifiedError
                    };
                    self.state.send_replace(state);
                    return Err(Error::from(e));
                }
            };
            let reader = BufReader::new(file);
            let stream: LineStream = stream::unfold(reader, |mut reader| async move {
                match next_line_lossy(&mut reader).await {
                    Ok(Some(line)) => Some((Ok(line), reader)),
                    Ok(None) => None,
                    Err(e) => Some((Err(e), reader)),
                }
            })
            .boxed();
            Ok(stream)
        }
        .boxed()
    }
}

/// Read one line, replacing invalid UTF-8 sequences with U+FFFD
async fn next_line_lossy<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_reads_file_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "alpha").unwrap();
        writeln!(file, "beta").unwrap();
        let options = SourceOptions::for_file(file.path().to_string_lossy());
        let source = FileLogDataSourceProvider.create_source(&options).unwrap();
        assert_eq!(source.state(), SourceState::Ready);
        let lines: Vec<String> = source
            .open_lines()
            .await
            .unwrap()
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_missing_file_reports_state() {
        let options = SourceOptions::for_file("/nonexistent/ulogview.log");
        let source = FileLogDataSourceProvider.create_source(&options).unwrap();
        assert_eq!(source.state(), SourceState::SourceNotFound);
        assert!(FileLogDataSourceProvider.create_source(&SourceOptions::default()).is_err());
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_stream() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"alpha\r\nbad \xff byte\ngamma").unwrap();
        let options = SourceOptions::for_file(file.path().to_string_lossy());
        let source = FileLogDataSourceProvider.create_source(&options).unwrap();
        let lines: Vec<String> = source
            .open_lines()
            .await
            .unwrap()
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["alpha", "bad \u{fffd} byte", "gamma"]);
    }
}
