use std::collections::BTreeMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, TryLockError};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::pattern;
use crate::ruleset::RuleSet;

/// One registered workspace root and its currently effective rule set.
pub struct RootState {
    root: Utf8PathBuf,
    rules: RwLock<Arc<RuleSet>>,
    rebuild_lock: Mutex<()>,
    rebuild_pending: AtomicBool,
}

impl RootState {
    fn new(root: Utf8PathBuf) -> Self {
        Self {
            root,
            rules: RwLock::new(Arc::new(RuleSet::default())),
            rebuild_lock: Mutex::new(()),
            rebuild_pending: AtomicBool::new(false),
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Current rule set. Readers hold the lock only long enough to clone the
    /// handle, so a concurrent swap never blocks queries.
    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Re-reads the named ignore files under this root and swaps in the new
    /// rule set. Rebuilds for one root are serialized; a trigger arriving
    /// while a rebuild runs coalesces into exactly one follow-up pass.
    pub fn rebuild(&self, ignore_file_names: &[String]) {
        let _guard = match self.rebuild_lock.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                self.rebuild_pending.store(true, Ordering::SeqCst);
                return;
            }
        };
        loop {
            self.rebuild_pending.store(false, Ordering::SeqCst);
            let set = load_rule_set(&self.root, ignore_file_names);
            debug!(root = %self.root, rules = set.len(), "rule set rebuilt");
            *self.rules.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(set);
            if !self.rebuild_pending.load(Ordering::SeqCst) {
                break;
            }
        }
    }

    /// Absolute paths of the ignore files this root reads.
    pub fn ignore_file_paths(&self, ignore_file_names: &[String]) -> Vec<Utf8PathBuf> {
        ignore_file_names
            .iter()
            .map(|name| self.root.join(name))
            .collect()
    }
}

/// Reads every configured ignore file directly under `root`, in configured
/// name order, concatenating their patterns into one source order.
fn load_rule_set(root: &Utf8Path, ignore_file_names: &[String]) -> RuleSet {
    let mut patterns = Vec::new();
    let mut order = 0;
    for name in ignore_file_names {
        let path = root.join(name);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
            Err(err) => {
                warn!(path = %path, %err, "failed to read ignore file, treating it as empty");
                continue;
            }
        };
        let (compiled, next_order) = pattern::compile(&text, order);
        order = next_order;
        patterns.extend(compiled);
    }
    RuleSet::new(patterns)
}

/// Maps workspace roots to their rule sets.
#[derive(Default)]
pub struct RootRegistry {
    roots: RwLock<BTreeMap<Utf8PathBuf, Arc<RootState>>>,
}

impl RootRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a root. The rule set starts empty until the first rebuild.
    pub fn register(&self, root: Utf8PathBuf) -> Arc<RootState> {
        let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
        roots
            .entry(root.clone())
            .or_insert_with(|| {
                debug!(root = %root, "root registered");
                Arc::new(RootState::new(root.clone()))
            })
            .clone()
    }

    pub fn unregister(&self, root: &Utf8Path) -> bool {
        let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
        let removed = roots.remove(root).is_some();
        if removed {
            debug!(root = %root, "root unregistered");
        }
        removed
    }

    /// Most specific registered root that is a prefix of `path`, so nested
    /// roots resolve unambiguously.
    pub fn resolve(&self, path: &Utf8Path) -> Option<Arc<RootState>> {
        let roots = self.roots.read().unwrap_or_else(PoisonError::into_inner);
        roots
            .iter()
            .filter(|(root, _)| path.starts_with(root))
            .max_by_key(|(root, _)| root.as_str().len())
            .map(|(_, state)| state.clone())
    }

    pub fn rebuild(&self, root: &Utf8Path, ignore_file_names: &[String]) -> bool {
        let state = {
            let roots = self.roots.read().unwrap_or_else(PoisonError::into_inner);
            roots.get(root).cloned()
        };
        match state {
            Some(state) => {
                state.rebuild(ignore_file_names);
                true
            }
            None => false,
        }
    }

    pub fn rebuild_all(&self, ignore_file_names: &[String]) {
        for state in self.states() {
            state.rebuild(ignore_file_names);
        }
    }

    /// Diffs the registered set against `desired`, registering and
    /// unregistering so the registry tracks workspace-root changes.
    pub fn sync_roots(&self, desired: &[Utf8PathBuf]) {
        let current = self.root_paths();
        for root in &current {
            if !desired.contains(root) {
                self.unregister(root);
            }
        }
        for root in desired {
            self.register(root.clone());
        }
    }

    pub fn root_paths(&self) -> Vec<Utf8PathBuf> {
        let roots = self.roots.read().unwrap_or_else(PoisonError::into_inner);
        roots.keys().cloned().collect()
    }

    pub fn clear(&self) {
        let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
        roots.clear();
    }

    fn states(&self) -> Vec<Arc<RootState>> {
        let roots = self.roots.read().unwrap_or_else(PoisonError::into_inner);
        roots.values().cloned().collect()
    }
}
