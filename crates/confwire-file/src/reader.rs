//! Notify-based file reader.

use async_trait::async_trait;
use confwire_core::{
    expect_scheme, parse_uri, CancellationToken, ConfReader, Error, EventSink, ReadEvent,
    ReaderState, Result, Scheme,
};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Pause after a change notification before re-reading the file.
pub const SETTLE_DELAY: Duration = Duration::from_millis(20);

/// What a notification means for the watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    /// Content may have changed
    Content,
    /// The file is gone from the watched path
    Removed,
    /// Access or metadata only
    Ignored,
}

fn classify(kind: &EventKind) -> Change {
    match kind {
        EventKind::Create(_) => Change::Content,
        EventKind::Modify(ModifyKind::Metadata(_)) => Change::Ignored,
        EventKind::Modify(ModifyKind::Name(_)) => Change::Removed,
        EventKind::Modify(_) => Change::Content,
        EventKind::Remove(_) => Change::Removed,
        _ => Change::Ignored,
    }
}

/// Reads a local file and follows it through OS change notifications.
///
/// Accepts `file://` URIs and bare paths. The path must exist when the
/// reader is built.
pub struct FileReader {
    state: Arc<ReaderState>,
    path: PathBuf,
}

impl FileReader {
    /// Build a reader for `uri`.
    pub fn new(uri: &str) -> Result<Self> {
        let path = resolve_path(uri)?;
        if path.as_os_str().is_empty() {
            return Err(Error::invalid_uri(uri, "empty file path"));
        }
        let metadata = std::fs::metadata(&path).map_err(|e| {
            Error::invalid_uri(uri, format!("cannot access {}: {}", path.display(), e))
        })?;
        if metadata.is_dir() {
            return Err(Error::invalid_uri(uri, format!("{} is a directory", path.display())));
        }

        debug!("Created file reader for {}", path.display());
        Ok(Self {
            state: ReaderState::new(uri),
            path,
        })
    }

    /// Resolved file system path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Turn a `file://` URI or a bare path into a file system path.
fn resolve_path(uri: &str) -> Result<PathBuf> {
    let trimmed = uri.trim();
    if Scheme::detect(trimmed)?.is_local() {
        return Ok(PathBuf::from(trimmed));
    }

    let url = parse_uri(trimmed)?;
    expect_scheme(&url, &["file"])?;
    let path = urlencoding::decode(url.path())
        .map_err(|e| Error::invalid_uri(uri, format!("bad path encoding: {}", e)))?;

    // `file://config.json` puts a relative path in the host position
    Ok(match url.host_str() {
        Some(host) if !host.is_empty() => PathBuf::from(format!("{}{}", host, path)),
        _ => PathBuf::from(path.into_owned()),
    })
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(format!("file {}", path.display()))
        } else {
            Error::Io(e)
        }
    })
}

#[async_trait]
impl ConfReader for FileReader {
    fn uri(&self) -> &str {
        self.state.uri()
    }

    async fn read(&self, cancel: &CancellationToken) -> Result<Vec<u8>> {
        self.state
            .until_closed(async {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Error::Cancelled),
                    data = read_file(&self.path) => data,
                }
            })
            .await
    }

    async fn subscribe(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<ReadEvent>> {
        let (sink, events) = self.state.begin_subscription(cancel)?;

        let (tx, notifications) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            if tx.send(result).is_err() {
                debug!("File notification dropped, subscription is gone");
            }
        })
        .map_err(|e| Error::Watch(format!("Failed to create notify watcher: {}", e)))?;

        watcher
            .watch(&self.path, RecursiveMode::NonRecursive)
            .map_err(|e| {
                Error::Watch(format!("Failed to watch {}: {}", self.path.display(), e))
            })?;

        info!("Watching {}", self.path.display());
        tokio::spawn(watch_file(watcher, notifications, sink, self.path.clone()));
        Ok(events)
    }

    async fn close(&self) -> Result<()> {
        self.state.close();
        Ok(())
    }
}

/// Notifications queued up while a change settled.
#[derive(Debug, Default)]
struct Pending {
    removed: bool,
    errors: Vec<notify::Error>,
}

fn drain_pending(notifications: &mut mpsc::UnboundedReceiver<notify::Result<Event>>) -> Pending {
    let mut pending = Pending::default();
    while let Ok(extra) = notifications.try_recv() {
        match extra {
            Ok(event) => pending.removed |= classify(&event.kind) == Change::Removed,
            Err(e) => pending.errors.push(e),
        }
    }
    pending
}

/// Subscription task. Owns the watcher so it is released on exit.
async fn watch_file(
    _watcher: RecommendedWatcher,
    mut notifications: mpsc::UnboundedReceiver<notify::Result<Event>>,
    sink: EventSink,
    path: PathBuf,
) {
    loop {
        let notification = tokio::select! {
            biased;
            _ = sink.cancelled() => break,
            notification = notifications.recv() => notification,
        };

        let change = match notification {
            None => {
                sink.emit_error(Error::Watch("watcher stopped".into())).await;
                break;
            }
            Some(Err(e)) => {
                warn!("Watch error on {}: {}", path.display(), e);
                if !sink.emit_error(Error::Watch(e.to_string())).await {
                    break;
                }
                continue;
            }
            Some(Ok(event)) => classify(&event.kind),
        };

        match change {
            Change::Ignored => continue,
            Change::Removed => {
                error!("Watched file {} was removed", path.display());
                sink.emit_error(Error::Watch(format!("{} was removed", path.display())))
                    .await;
                break;
            }
            Change::Content => {
                if !sink.pause(SETTLE_DELAY).await {
                    break;
                }

                // Fold everything that arrived during the settle delay into this read
                let pending = drain_pending(&mut notifications);
                let mut stopped = false;
                for e in pending.errors {
                    warn!("Watch error on {}: {}", path.display(), e);
                    if !sink.emit_error(Error::Watch(e.to_string())).await {
                        stopped = true;
                        break;
                    }
                }
                if stopped {
                    break;
                }
                if pending.removed {
                    sink.emit_error(Error::Watch(format!("{} was removed", path.display())))
                        .await;
                    break;
                }

                debug!("Re-reading {}", path.display());
                if !sink.emit(read_file(&path).await).await {
                    break;
                }
            }
        }
    }
    debug!("Stopped watching {}", path.display());
}
