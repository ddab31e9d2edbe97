use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use camino::Utf8PathBuf;
use crossbeam_channel::{Receiver, Sender, unbounded};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("failed to create filesystem watcher")]
    Init(#[source] notify::Error),
    #[error("failed to spawn invalidation worker")]
    Worker(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Stopped,
    Starting,
    Watching,
}

/// What a filesystem event invalidates.
#[derive(Debug)]
pub enum Invalidation {
    /// One ignore file was created, modified or deleted.
    IgnoreFile(Utf8PathBuf),
    /// The watch backend lost track of state; everything must be rebuilt.
    Full,
}

pub type InvalidationHandler = Arc<dyn Fn(Invalidation) + Send + Sync>;

enum WorkerMessage {
    Changed(Utf8PathBuf),
    Rescan,
    WatcherError(String),
    Shutdown,
}

struct WatchInner {
    // Kept alive for the duration of the watch; dropping it releases the
    // underlying handles.
    _watcher: RecommendedWatcher,
    tx: Sender<WorkerMessage>,
    worker: JoinHandle<()>,
}

enum ControllerState {
    Stopped,
    Starting,
    Watching(WatchInner),
}

/// Observes the configured ignore-file names under the registered roots and
/// forwards invalidations to a worker thread, so watch callbacks never do
/// file reads or recompilation themselves.
pub struct WatchController {
    state: Mutex<ControllerState>,
}

impl Default for WatchController {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchController {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControllerState::Stopped),
        }
    }

    pub fn state(&self) -> WatchState {
        match *self.state.lock().unwrap_or_else(PoisonError::into_inner) {
            ControllerState::Stopped => WatchState::Stopped,
            ControllerState::Starting => WatchState::Starting,
            ControllerState::Watching(_) => WatchState::Watching,
        }
    }

    /// Installs one non-recursive watch per root. Calling `start` while
    /// already watching is a no-op. A root that cannot be watched is logged
    /// and skipped; its rule set simply stops refreshing while the other
    /// roots keep working.
    pub fn start(
        &self,
        roots: &[Utf8PathBuf],
        ignore_file_names: &[String],
        handler: InvalidationHandler,
    ) -> Result<(), WatchError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, ControllerState::Watching(_)) {
            debug!("watch controller already running");
            return Ok(());
        }
        *state = ControllerState::Starting;

        let (tx, rx) = unbounded();
        let names = ignore_file_names.to_vec();
        let event_tx = tx.clone();
        let watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => forward_event(&event, &names, &event_tx),
                Err(err) => {
                    let _ = event_tx.send(WorkerMessage::WatcherError(err.to_string()));
                }
            },
            NotifyConfig::default(),
        );
        let mut watcher = match watcher {
            Ok(watcher) => watcher,
            Err(err) => {
                *state = ControllerState::Stopped;
                return Err(WatchError::Init(err));
            }
        };

        let mut watched = 0usize;
        for root in roots {
            match watcher.watch(root.as_std_path(), RecursiveMode::NonRecursive) {
                Ok(()) => watched += 1,
                Err(err) => {
                    warn!(root = %root, %err, "failed to watch root, its rules will not refresh");
                }
            }
        }

        let worker = thread::Builder::new()
            .name("ignorewatch-invalidate".to_string())
            .spawn(move || worker_loop(rx, handler));
        let worker = match worker {
            Ok(handle) => handle,
            Err(err) => {
                *state = ControllerState::Stopped;
                return Err(WatchError::Worker(err));
            }
        };

        debug!(roots = watched, "watch controller started");
        *state = ControllerState::Watching(WatchInner {
            _watcher: watcher,
            tx,
            worker,
        });
        Ok(())
    }

    /// Releases every watch handle and joins the worker before returning.
    /// Idempotent; also runs on drop.
    pub fn stop(&self) {
        let inner = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match std::mem::replace(&mut *state, ControllerState::Stopped) {
                ControllerState::Watching(inner) => inner,
                _ => return,
            }
        };
        // Drop the watcher first so no further events land on the channel.
        drop(inner._watcher);
        let _ = inner.tx.send(WorkerMessage::Shutdown);
        if inner.worker.join().is_err() {
            warn!("invalidation worker panicked");
        }
        debug!("watch controller stopped");
    }
}

impl Drop for WatchController {
    fn drop(&mut self) {
        self.stop();
    }
}

fn forward_event(event: &Event, ignore_file_names: &[String], tx: &Sender<WorkerMessage>) {
    if event.need_rescan() {
        let _ = tx.send(WorkerMessage::Rescan);
    }
    for path in &event.paths {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if !ignore_file_names.iter().any(|candidate| candidate == name) {
            continue;
        }
        match Utf8PathBuf::from_path_buf(path.clone()) {
            Ok(path) => {
                let _ = tx.send(WorkerMessage::Changed(path));
            }
            Err(path) => {
                warn!(path = %path.display(), "ignoring event for non-UTF-8 path");
            }
        }
    }
}

fn worker_loop(rx: Receiver<WorkerMessage>, handler: InvalidationHandler) {
    while let Ok(message) = rx.recv() {
        match message {
            WorkerMessage::Changed(path) => {
                debug!(path = %path, "ignore file changed");
                handler(Invalidation::IgnoreFile(path));
            }
            WorkerMessage::Rescan => handler(Invalidation::Full),
            WorkerMessage::WatcherError(message) => warn!("watcher error: {message}"),
            WorkerMessage::Shutdown => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler() -> InvalidationHandler {
        Arc::new(|_| {})
    }

    #[test]
    fn starts_stopped() {
        let controller = WatchController::new();
        assert_eq!(controller.state(), WatchState::Stopped);
    }

    #[test]
    fn start_and_stop_transition_states() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let controller = WatchController::new();

        controller
            .start(&[root], &[".gitignore".to_string()], noop_handler())
            .unwrap();
        assert_eq!(controller.state(), WatchState::Watching);

        controller.stop();
        assert_eq!(controller.state(), WatchState::Stopped);
    }

    #[test]
    fn start_while_watching_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let controller = WatchController::new();

        controller
            .start(&[root.clone()], &[".gitignore".to_string()], noop_handler())
            .unwrap();
        controller
            .start(&[root], &[".gitignore".to_string()], noop_handler())
            .unwrap();
        assert_eq!(controller.state(), WatchState::Watching);
        controller.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let controller = WatchController::new();
        controller.stop();
        controller.stop();
        assert_eq!(controller.state(), WatchState::Stopped);
    }

    #[test]
    fn missing_root_does_not_fail_start() {
        let controller = WatchController::new();
        let result = controller.start(
            &[Utf8PathBuf::from("/definitely/not/a/real/path")],
            &[".gitignore".to_string()],
            noop_handler(),
        );
        assert!(result.is_ok());
        assert_eq!(controller.state(), WatchState::Watching);
        controller.stop();
    }
}
