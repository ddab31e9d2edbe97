use std::fs;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

fn default_enabled() -> bool {
    true
}

fn default_ignore_files() -> Vec<String> {
    vec![".gitignore".to_string()]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Ignore-file names read under every root, in precedence order:
    /// patterns from later files override earlier ones.
    #[serde(default = "default_ignore_files")]
    pub ignore_files: Vec<String>,
    #[serde(default)]
    pub roots: Vec<Utf8PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            ignore_files: default_ignore_files(),
            roots: Vec::new(),
        }
    }
}

impl Settings {
    pub fn load_from_path<P: AsRef<Utf8Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file at {path}"))?;
        let mut settings: Settings = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML settings at {path}"))?;
        settings.normalize();
        Ok(settings)
    }

    pub fn resolve_path(explicit: Option<Utf8PathBuf>) -> Result<Utf8PathBuf> {
        if let Some(path) = explicit {
            return Ok(path);
        }

        if let Ok(env_path) = std::env::var("IGNOREWATCH_CONFIG") {
            return Ok(Utf8PathBuf::from(env_path));
        }

        let project_dirs = ProjectDirs::from("dev", "ignorewatch", "ignorewatch")
            .context("cannot determine default settings directory")?;
        Utf8PathBuf::from_path_buf(project_dirs.config_dir().join("config.yaml"))
            .ok()
            .context("default settings path is not valid UTF-8")
    }

    pub fn save_to_path<P: AsRef<Utf8Path>>(&self, path: P) -> Result<()> {
        let serialized =
            serde_yaml::to_string(self).context("failed to render settings to YAML")?;
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directories for {parent}"))?;
        }
        fs::write(path, serialized)
            .with_context(|| format!("failed to write settings file to {path}"))?;
        Ok(())
    }

    pub fn detect_and_load(explicit: Option<Utf8PathBuf>) -> Result<(Self, Utf8PathBuf)> {
        let path = Self::resolve_path(explicit)?;
        let settings = Self::load_from_path(&path)?;
        Ok((settings, path))
    }

    // Name order is load-bearing for precedence, so duplicates keep their
    // first occurrence rather than being re-sorted.
    fn normalize(&mut self) {
        let mut seen: Vec<String> = Vec::new();
        for name in &self.ignore_files {
            let name = name.trim();
            if name.is_empty() || seen.iter().any(|s| s == name) {
                continue;
            }
            seen.push(name.to_string());
        }
        self.ignore_files = seen;
        if self.ignore_files.is_empty() {
            self.ignore_files = default_ignore_files();
        }

        let mut roots = Vec::new();
        for root in self.roots.drain(..) {
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
        self.roots = roots;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_gitignore_only() {
        let settings = Settings::default();
        assert!(settings.enabled);
        assert_eq!(settings.ignore_files, vec![".gitignore".to_string()]);
        assert!(settings.roots.is_empty());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: Settings = serde_yaml::from_str("roots: [/ws]\n").unwrap();
        assert!(settings.enabled);
        assert_eq!(settings.ignore_files, vec![".gitignore".to_string()]);
        assert_eq!(settings.roots, vec![Utf8PathBuf::from("/ws")]);
    }

    #[test]
    fn normalize_deduplicates_and_keeps_order() {
        let mut settings = Settings {
            enabled: true,
            ignore_files: vec![
                ".lakeignore".to_string(),
                "".to_string(),
                ".gitignore".to_string(),
                ".lakeignore".to_string(),
            ],
            roots: vec![Utf8PathBuf::from("/a"), Utf8PathBuf::from("/a")],
        };
        settings.normalize();
        assert_eq!(
            settings.ignore_files,
            vec![".lakeignore".to_string(), ".gitignore".to_string()]
        );
        assert_eq!(settings.roots, vec![Utf8PathBuf::from("/a")]);
    }

    #[test]
    fn normalize_restores_default_when_all_names_invalid() {
        let mut settings = Settings {
            enabled: true,
            ignore_files: vec![" ".to_string()],
            roots: Vec::new(),
        };
        settings.normalize();
        assert_eq!(settings.ignore_files, vec![".gitignore".to_string()]);
    }

    #[test]
    fn settings_round_trip_through_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path =
            Utf8PathBuf::from_path_buf(dir.path().join("nested").join("config.yaml")).unwrap();
        let settings = Settings {
            enabled: false,
            ignore_files: vec![".gitignore".to_string(), ".lakeignore".to_string()],
            roots: vec![Utf8PathBuf::from("/ws/project")],
        };
        settings.save_to_path(&path).unwrap();
        let loaded = Settings::load_from_path(&path).unwrap();
        assert!(!loaded.enabled);
        assert_eq!(loaded.ignore_files, settings.ignore_files);
        assert_eq!(loaded.roots, settings.roots);
    }
}
