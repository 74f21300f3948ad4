use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::WriteError;
use crate::io::write_bytes_atomic;
use crate::ops::matte::{CommandPredictor, DEFAULT_FOREGROUND_CUTOFF, MattePredictor, NoPredictor};

/// Settings that persist across sessions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Matting program, e.g. `rembg`. Empty = matte operations unavailable.
    pub predictor_program: String,
    /// Arguments; `{input}` and `{output}` are replaced with PNG paths.
    pub predictor_args: Vec<String>,
    /// Upper bound on one predictor call.
    pub predictor_timeout_secs: u64,
    /// Predicted alpha at or above this counts as foreground.
    pub foreground_cutoff: u8,
    /// Erase/restore brush radius in screen pixels.
    pub brush_radius: f64,
    /// Zoom factor per wheel notch.
    pub zoom_step: f64,
    /// Per-channel tolerance for flood remove/undo.
    pub flood_threshold: u8,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub include_dir: String,
    pub exclude_dir: String,
    /// Lower-case source extensions, without the dot.
    pub source_extensions: Vec<String>,
    /// Capacity of the watcher event queue.
    pub watch_queue_capacity: usize,
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            predictor_program: String::new(),
            predictor_args: vec!["i".into(), "{input}".into(), "{output}".into()],
            predictor_timeout_secs: 120,
            foreground_cutoff: DEFAULT_FOREGROUND_CUTOFF,
            brush_radius: 10.0,
            zoom_step: 1.1,
            flood_threshold: 10,
            viewport_width: 800,
            viewport_height: 600,
            include_dir: "include".into(),
            exclude_dir: "exclude".into(),
            source_extensions: ["png", "jpg", "jpeg", "bmp", "gif"]
                .into_iter()
                .map(String::from)
                .collect(),
            watch_queue_capacity: 1024,
            log_level: "info".into(),
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/maskcurator/settings.toml  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\MaskCurator\settings.toml
    /// On macOS:   ~/Library/Application Support/MaskCurator/settings.toml
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            return Some(PathBuf::from(appdata).join("MaskCurator").join("settings.toml"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("MaskCurator")
                    .join("settings.toml"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?;
            Some(config_dir.join("maskcurator").join("settings.toml"))
        }
    }

    /// Load settings from the default location, then apply environment overrides.
    pub fn load() -> Self {
        let mut s = Self::settings_path()
            .map(|p| Self::load_from(&p))
            .unwrap_or_default();
        s.apply_env_overrides();
        s
    }

    /// Load from `path` (defaults if the file is missing or corrupt).
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "settings unreadable, using defaults");
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), WriteError> {
        let content = toml::to_string_pretty(self)?;
        write_bytes_atomic(path, content.as_bytes())
    }

    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(program) = std::env::var("MASKCURATOR_PREDICTOR") {
            self.predictor_program = program;
        }
        if let Ok(level) = std::env::var("MASKCURATOR_LOG") {
            self.log_level = level;
        }
    }

    pub fn predictor_timeout(&self) -> Duration {
        Duration::from_secs(self.predictor_timeout_secs.max(1))
    }

    /// The configured matting predictor, or one that always reports
    /// itself unavailable.
    pub fn predictor(&self) -> Arc<dyn MattePredictor> {
        if self.predictor_program.trim().is_empty() {
            Arc::new(NoPredictor)
        } else {
            Arc::new(CommandPredictor::new(
                self.predictor_program.clone(),
                self.predictor_args.clone(),
                self.predictor_timeout(),
            ))
        }
    }

    /// Whether `path` has one of the accepted source extensions.
    pub fn is_source_image(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_ascii_lowercase();
                self.source_extensions.iter().any(|s| *s == e)
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        assert_eq!(AppSettings::load_from(&dir.path().join("nope.toml")), AppSettings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "foreground_cutoff = 200\nzoom_step = 1.25\n").unwrap();

        let s = AppSettings::load_from(&path);
        assert_eq!(s.foreground_cutoff, 200);
        assert_eq!(s.zoom_step, 1.25);
        assert_eq!(s.include_dir, "include");
    }

    #[test]
    fn corrupt_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "foreground_cutoff = \"lots\"").unwrap();
        assert_eq!(AppSettings::load_from(&path), AppSettings::default());
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg").join("settings.toml");
        let s = AppSettings {
            predictor_program: "rembg".into(),
            flood_threshold: 3,
            ..AppSettings::default()
        };
        s.save_to(&path).unwrap();
        assert_eq!(AppSettings::load_from(&path), s);
    }

    #[test]
    fn source_extension_match_ignores_case() {
        let s = AppSettings::default();
        assert!(s.is_source_image(Path::new("/x/A.JPG")));
        assert!(!s.is_source_image(Path::new("/x/notes.txt")));
        assert!(!s.is_source_image(Path::new("/x/noext")));
    }
}
