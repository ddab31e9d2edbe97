pub mod config;
pub mod engine;
pub mod pattern;
pub mod registry;
pub mod ruleset;
pub mod watcher;

pub use config::Settings;
pub use engine::{ChangeEvent, Engine};
pub use pattern::Pattern;
pub use registry::RootRegistry;
pub use ruleset::{RuleSet, Verdict};
pub use watcher::{WatchError, WatchState};
