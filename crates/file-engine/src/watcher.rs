//! Filesystem watching.
//!
//! Watcher callbacks never run inside the OS event handler: events are sent
//! through a channel to a dispatch task, which fans each event out to the
//! registered subscribers for the matching path. Every subscriber is
//! invoked on its own task, so one slow callback cannot delay the others
//! or the event loop. Watcher-level errors are logged, never fatal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{EngineError, Result};

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Other,
}

impl From<&EventKind> for ChangeKind {
    fn from(kind: &EventKind) -> Self {
        match kind {
            EventKind::Create(_) => Self::Created,
            EventKind::Modify(_) => Self::Modified,
            EventKind::Remove(_) => Self::Removed,
            _ => Self::Other,
        }
    }
}

/// A subscriber invoked for each change under its registered path.
pub type WatchCallback = Arc<dyn Fn(&Path, ChangeKind) + Send + Sync>;

#[derive(Debug)]
enum WatchMessage {
    Change(PathBuf, ChangeKind),
    Error(String),
}

/// Per-path callback registry over an OS-level watcher.
pub struct WatchRegistry {
    subscribers: Arc<RwLock<HashMap<PathBuf, Vec<WatchCallback>>>>,
    os_watcher: Mutex<Option<RecommendedWatcher>>,
    event_tx: mpsc::UnboundedSender<WatchMessage>,
    dispatch: Mutex<Option<JoinHandle<()>>>,
}

impl WatchRegistry {
    /// Creates the registry and starts its dispatch task.
    ///
    /// Must be called within a tokio runtime.
    pub fn new() -> Self {
        let subscribers: Arc<RwLock<HashMap<PathBuf, Vec<WatchCallback>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        let dispatch_subscribers = subscribers.clone();
        let dispatch = tokio::spawn(async move {
            while let Some(message) = event_rx.recv().await {
                match message {
                    WatchMessage::Change(path, kind) => {
                        let targets: Vec<WatchCallback> = {
                            let subs = dispatch_subscribers.read();
                            subs.iter()
                                .filter(|(watched, _)| {
                                    path == **watched || path.starts_with(watched)
                                })
                                .flat_map(|(_, callbacks)| callbacks.iter().cloned())
                                .collect()
                        };
                        for callback in targets {
                            let path = path.clone();
                            tokio::spawn(async move {
                                callback(&path, kind);
                            });
                        }
                    }
                    WatchMessage::Error(error) => {
                        log::warn!("filesystem watcher error: {error}");
                    }
                }
            }
        });

        Self {
            subscribers,
            os_watcher: Mutex::new(None),
            event_tx,
            dispatch: Mutex::new(Some(dispatch)),
        }
    }

    /// Registers a callback for a path, starting the OS watch on the first
    /// registration for that path.
    pub fn register(&self, path: &Path, callback: WatchCallback) -> Result<()> {
        let first_for_path = {
            let mut subs = self.subscribers.write();
            let entry = subs.entry(path.to_path_buf()).or_default();
            entry.push(callback);
            entry.len() == 1
        };

        if first_for_path {
            self.watch_os(path)?;
        }
        Ok(())
    }

    /// Stops the event loop and releases the underlying OS watch handles.
    pub fn close(&self) {
        *self.os_watcher.lock() = None;
        if let Some(handle) = self.dispatch.lock().take() {
            handle.abort();
        }
    }

    /// Feeds a synthetic event through the normal dispatch path.
    #[cfg(test)]
    pub(crate) fn inject(&self, path: PathBuf, kind: ChangeKind) {
        let _ = self.event_tx.send(WatchMessage::Change(path, kind));
    }

    fn watch_os(&self, path: &Path) -> Result<()> {
        let mut guard = self.os_watcher.lock();

        if guard.is_none() {
            let tx = self.event_tx.clone();
            let watcher = recommended_watcher(move |result: notify::Result<Event>| {
                match result {
                    Ok(event) => {
                        if matches!(event.kind, EventKind::Access(_)) {
                            return;
                        }
                        let kind = ChangeKind::from(&event.kind);
                        for path in event.paths {
                            let _ = tx.send(WatchMessage::Change(path, kind));
                        }
                    }
                    Err(error) => {
                        let _ = tx.send(WatchMessage::Error(error.to_string()));
                    }
                }
            })
            .map_err(|error| {
                EngineError::Internal(format!("failed to create filesystem watcher: {error}"))
            })?;
            *guard = Some(watcher);
        }

        let mode = if path.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        if let Some(watcher) = guard.as_mut() {
            watcher.watch(path, mode).map_err(|error| {
                EngineError::Internal(format!(
                    "failed to watch {}: {error}",
                    path.display()
                ))
            })?;
        }
        Ok(())
    }
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        self.close();
    }
}
