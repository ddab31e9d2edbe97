use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use camino::{Utf8Path, Utf8PathBuf};
use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, info};

use crate::config::Settings;
use crate::registry::RootRegistry;
use crate::ruleset::Verdict;
use crate::watcher::{Invalidation, InvalidationHandler, WatchController, WatchError};

/// Fired after any rebuild that may have altered verdicts; subscribers
/// re-query the paths they care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent;

/// Process-wide ignore engine: configuration, per-root rule sets, watches
/// and the change subscription in one explicitly constructed object.
pub struct Engine {
    inner: Arc<EngineInner>,
    watcher: WatchController,
    watching_desired: AtomicBool,
}

struct EngineInner {
    enabled: AtomicBool,
    ignore_files: RwLock<Vec<String>>,
    roots: RwLock<Vec<Utf8PathBuf>>,
    registry: RootRegistry,
    subscribers: Mutex<Vec<Sender<ChangeEvent>>>,
}

impl Engine {
    pub fn new(settings: &Settings) -> Self {
        let inner = Arc::new(EngineInner {
            enabled: AtomicBool::new(settings.enabled),
            ignore_files: RwLock::new(settings.ignore_files.clone()),
            roots: RwLock::new(settings.roots.clone()),
            registry: RootRegistry::new(),
            subscribers: Mutex::new(Vec::new()),
        });
        if settings.enabled {
            inner.registry.sync_roots(&settings.roots);
            inner.registry.rebuild_all(&settings.ignore_files);
        }
        Self {
            inner,
            watcher: WatchController::new(),
            watching_desired: AtomicBool::new(false),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Whether `path` is ignored. Cheap: resolves the owning root and
    /// consults its cached rule set, no I/O. A disabled engine, a path under
    /// no registered root, or no matching pattern all answer not-ignored.
    pub fn query(&self, path: &Utf8Path, is_dir: bool) -> Verdict {
        if !self.is_enabled() {
            return Verdict::not_ignored();
        }
        let Some(root) = self.inner.registry.resolve(path) else {
            return Verdict::not_ignored();
        };
        let Ok(relative) = path.strip_prefix(root.root()) else {
            return Verdict::not_ignored();
        };
        let components: Vec<&str> = relative.components().map(|c| c.as_str()).collect();
        root.rules().matches(&components.join("/"), is_dir)
    }

    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = unbounded();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Starts watching the configured ignore files under every root. While
    /// the engine is disabled this only records the intent; watches come up
    /// when it is re-enabled.
    pub fn start_watching(&self) -> Result<(), WatchError> {
        self.watching_desired.store(true, Ordering::SeqCst);
        if !self.is_enabled() {
            debug!("engine disabled, deferring watches");
            return Ok(());
        }
        let roots = self
            .inner
            .roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let names = self
            .inner
            .ignore_files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let inner = self.inner.clone();
        let handler: InvalidationHandler =
            Arc::new(move |invalidation| inner.handle_invalidation(invalidation));
        self.watcher.start(&roots, &names, handler)
    }

    /// Applies new configuration: enabled flag, ignore-file names and the
    /// root set. Rebuilds everything, restarts watches to cover the new
    /// shape, then notifies subscribers.
    pub fn update_settings(&self, settings: &Settings) -> Result<(), WatchError> {
        info!(
            enabled = settings.enabled,
            ignore_files = ?settings.ignore_files,
            roots = settings.roots.len(),
            "applying updated settings"
        );
        self.watcher.stop();
        self.inner.enabled.store(settings.enabled, Ordering::SeqCst);
        *self
            .inner
            .ignore_files
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings.ignore_files.clone();
        *self
            .inner
            .roots
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings.roots.clone();

        if settings.enabled {
            self.inner.registry.sync_roots(&settings.roots);
            self.inner.registry.rebuild_all(&settings.ignore_files);
            if self.watching_desired.load(Ordering::SeqCst) {
                self.start_watching()?;
            }
        } else {
            self.inner.registry.clear();
        }
        self.inner.notify();
        Ok(())
    }

    /// Releases all watches and clears every root.
    pub fn shutdown(&self) {
        self.watching_desired.store(false, Ordering::SeqCst);
        self.watcher.stop();
        self.inner.registry.clear();
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        debug!("engine shut down");
    }
}

impl EngineInner {
    fn handle_invalidation(&self, invalidation: Invalidation) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }
        let names = self
            .ignore_files
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let rebuilt = match invalidation {
            Invalidation::IgnoreFile(path) => match self.registry.resolve(&path) {
                // Only files the root actually reads trigger a rebuild.
                Some(root) if root.ignore_file_paths(&names).contains(&path) => {
                    root.rebuild(&names);
                    true
                }
                _ => false,
            },
            Invalidation::Full => {
                self.registry.rebuild_all(&names);
                true
            }
        };
        if rebuilt {
            self.notify();
        }
    }

    fn notify(&self) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| tx.send(ChangeEvent).is_ok());
    }
}
