// settings.rs — Persisted configuration for snapask.
//
// The whole file is rewritten on every change. Readers either take a
// `snapshot()` of the typed `Settings` or address single values by a
// dot-separated path (`gemini.model`, `auto_paste.delay_ms`, ...).
// Every write bumps a watch channel so long-lived components can pick
// up the new values without a restart.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tauri::Manager;
use tokio::sync::watch;

use crate::capture::OverflowPolicy;

pub const DEFAULT_ANALYZE_HOTKEY: &str = "ctrl+shift+alt+a";
pub const DEFAULT_CAPTURE_HOTKEY: &str = "ctrl+shift+alt+s";
pub const DEFAULT_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_PROMPT: &str = "You are a helpful assistant. Analyze this screenshot and provide a concise solution. Be direct and actionable.";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error on settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed settings file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Could not serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid settings path '{0}'")]
    InvalidPath(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeySettings {
    pub analyze: String,
    pub capture: String,
}

impl Default for HotkeySettings {
    fn default() -> Self {
        Self {
            analyze: DEFAULT_ANALYZE_HOTKEY.into(),
            capture: DEFAULT_CAPTURE_HOTKEY.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiSettings {
    /// Single-key field written by older versions; folded into `api_keys` on load.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    pub api_keys: Vec<String>,
    pub current_key_index: usize,
    pub auto_rotate_on_quota_error: bool,
    pub model: String,
    pub endpoint: String,
    pub system_prompt: String,
}

impl Default for GeminiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_keys: Vec::new(),
            current_key_index: 0,
            auto_rotate_on_quota_error: true,
            model: DEFAULT_MODEL.into(),
            endpoint: DEFAULT_ENDPOINT.into(),
            system_prompt: DEFAULT_PROMPT.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoPasteSettings {
    pub enabled: bool,
    pub delay_ms: u64,
    pub restore_clipboard: bool,
}

impl Default for AutoPasteSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 500,
            restore_clipboard: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotSettings {
    pub save_to_disk: bool,
    pub max_width: u32,
    pub jpeg_quality: u8,
}

impl Default for ScreenshotSettings {
    fn default() -> Self {
        Self {
            save_to_disk: false,
            max_width: 1920,
            jpeg_quality: 85,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub max_len: usize,
    pub overflow: OverflowPolicy,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_len: 10,
            overflow: OverflowPolicy::Reject,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupSettings {
    pub launch_on_boot: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub save_logs: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            save_logs: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub hotkeys: HotkeySettings,
    pub gemini: GeminiSettings,
    pub auto_paste: AutoPasteSettings,
    pub screenshot: ScreenshotSettings,
    pub queue: QueueSettings,
    pub startup: StartupSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Fold the legacy single key into the key list, drop blanks and
    /// duplicates, and pull the key cursor back into range.
    /// Returns `true` if anything changed.
    pub fn normalize(&mut self) -> bool {
        let before = self.clone();
        let gemini = &mut self.gemini;

        let legacy = std::mem::take(&mut gemini.api_key);
        let legacy = legacy.trim();
        if !legacy.is_empty() {
            gemini.api_keys.insert(0, legacy.to_string());
        }

        let mut seen = Vec::with_capacity(gemini.api_keys.len());
        for key in gemini.api_keys.drain(..) {
            let key = key.trim().to_string();
            if !key.is_empty() && !seen.contains(&key) {
                seen.push(key);
            }
        }
        gemini.api_keys = seen;

        if gemini.current_key_index >= gemini.api_keys.len() {
            gemini.current_key_index = 0;
        }

        *self != before
    }
}

/// Thread-safe owner of the live `Settings`, optionally backed by a file.
pub struct ConfigStore {
    settings: Mutex<Settings>,
    path: Option<PathBuf>,
    changes: watch::Sender<u64>,
}

impl ConfigStore {
    /// Load settings from `path`, creating the file with defaults if it
    /// does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let (settings, needs_write) = if path.exists() {
            let mut settings = read_settings(&path)?;
            let migrated = settings.normalize();
            (settings, migrated)
        } else {
            (Settings::default(), true)
        };

        let store = Self::build(settings, Some(path));
        if needs_write {
            store.persist(&store.lock())?;
        }
        Ok(store)
    }

    /// A store that never touches the disk.
    pub fn in_memory(mut settings: Settings) -> Self {
        settings.normalize();
        Self::build(settings, None)
    }

    fn build(settings: Settings, path: Option<PathBuf>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            settings: Mutex::new(settings),
            path,
            changes,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn snapshot(&self) -> Settings {
        self.lock().clone()
    }

    /// Receiver whose value increments after every successful change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Mutate the settings under the store lock, then persist and notify.
    ///
    /// If persisting fails the in-memory change is kept and the error is
    /// returned; subscribers are still notified.
    pub fn update<R>(&self, f: impl FnOnce(&mut Settings) -> R) -> Result<R, ConfigError> {
        let mut guard = self.lock();
        let result = f(&mut guard);
        guard.normalize();
        let persisted = self.persist(&guard);
        drop(guard);
        self.notify();
        persisted.map(|_| result)
    }

    pub fn replace(&self, settings: Settings) -> Result<(), ConfigError> {
        self.update(|current| *current = settings)
    }

    /// Re-read the backing file, e.g. after it was edited by hand.
    pub fn reload(&self) -> Result<(), ConfigError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let mut settings = read_settings(path)?;
        let migrated = settings.normalize();
        let mut guard = self.lock();
        *guard = settings;
        let persisted = if migrated {
            self.persist(&guard)
        } else {
            Ok(())
        };
        drop(guard);
        self.notify();
        log::info!("Settings reloaded from {}", path.display());
        persisted
    }

    /// Read a value by dot path, falling back to `default` when the path
    /// is missing or holds a different type.
    pub fn get<T: DeserializeOwned>(&self, path: &str, default: T) -> T {
        let root = match toml::Value::try_from(&*self.lock()) {
            Ok(root) => root,
            Err(_) => return default,
        };
        let mut node = &root;
        for part in path.split('.') {
            match node.get(part) {
                Some(next) => node = next,
                None => return default,
            }
        }
        node.clone().try_into().unwrap_or(default)
    }

    /// Write a value by dot path. Only paths that exist in `Settings` are
    /// accepted, and the value must have the field's type.
    pub fn set<T: Serialize>(&self, path: &str, value: T) -> Result<(), ConfigError> {
        let value = toml::Value::try_from(value)?;
        let mut guard = self.lock();

        let mut root = toml::Value::try_from(&*guard)?;
        insert_path(&mut root, path, value)?;
        let mut next: Settings = root
            .try_into()
            .map_err(|_| ConfigError::InvalidPath(path.to_string()))?;
        next.normalize();

        let written = toml::Value::try_from(&next)?;
        if lookup(&written, path).is_none() {
            return Err(ConfigError::InvalidPath(path.to_string()));
        }

        *guard = next;
        let persisted = self.persist(&guard);
        drop(guard);
        self.notify();
        persisted
    }

    fn lock(&self) -> MutexGuard<'_, Settings> {
        // A poisoned lock still holds a consistent Settings value.
        self.settings.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, settings: &Settings) -> Result<(), ConfigError> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let content = toml::to_string_pretty(settings)?;
        fs::write(path, content)?;
        log::debug!("Settings saved to {}", path.display());
        Ok(())
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }
}

fn read_settings(path: &Path) -> Result<Settings, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

fn lookup<'a>(root: &'a toml::Value, path: &str) -> Option<&'a toml::Value> {
    path.split('.').try_fold(root, |node, part| node.get(part))
}

fn insert_path(root: &mut toml::Value, path: &str, value: toml::Value) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidPath(path.to_string());
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid());
    }
    let (last, parents) = segments.split_last().ok_or_else(invalid)?;

    let mut node = root;
    for key in parents {
        let table = node.as_table_mut().ok_or_else(invalid)?;
        node = table
            .entry(key.to_string())
            .or_insert(toml::Value::Table(toml::map::Map::new()));
    }
    node.as_table_mut()
        .ok_or_else(invalid)?
        .insert(last.to_string(), value);
    Ok(())
}

/// Call `on_change` with a fresh snapshot after every change to `config`.
/// Bursts of writes may be coalesced into one call. The task ends once the
/// store is dropped.
pub fn watch_settings<F>(config: &Arc<ConfigStore>, on_change: F) -> tauri::async_runtime::JoinHandle<()>
where
    F: Fn(&Settings) + Send + 'static,
{
    let mut changes = config.subscribe();
    let store = Arc::downgrade(config);
    tauri::async_runtime::spawn(async move {
        while changes.changed().await.is_ok() {
            let Some(config) = store.upgrade() else {
                break;
            };
            let settings = config.snapshot();
            drop(config);
            on_change(&settings);
        }
    })
}

pub fn config_path(app: &tauri::AppHandle) -> Result<PathBuf, String> {
    let dir = app.path().app_config_dir().map_err(|e| e.to_string())?;
    fs::create_dir_all(&dir).map_err(|e| e.to_string())?;
    Ok(dir.join("settings.toml"))
}

#[tauri::command]
pub async fn load_settings(store: tauri::State<'_, Arc<ConfigStore>>) -> Result<Settings, String> {
    Ok(store.snapshot())
}

/// Save settings from the UI. Takes effect immediately via the change watcher.
#[tauri::command]
pub async fn save_settings(
    store: tauri::State<'_, Arc<ConfigStore>>,
    settings: Settings,
) -> Result<(), String> {
    store.replace(settings).map_err(|e| e.to_string())?;
    log::info!("Settings saved");
    Ok(())
}

#[tauri::command]
pub async fn open_config_file(
    app: tauri::AppHandle,
    store: tauri::State<'_, Arc<ConfigStore>>,
) -> Result<(), String> {
    use tauri_plugin_opener::OpenerExt;

    let path = store
        .path()
        .ok_or_else(|| "Settings are not backed by a file".to_string())?;
    app.opener()
        .open_path(path.to_string_lossy(), None::<&str>)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.hotkeys.analyze, "ctrl+shift+alt+a");
        assert_eq!(s.gemini.model, DEFAULT_MODEL);
        assert!(s.gemini.auto_rotate_on_quota_error);
        assert!(s.auto_paste.enabled);
        assert_eq!(s.auto_paste.delay_ms, 500);
        assert_eq!(s.queue.overflow, OverflowPolicy::Reject);
    }

    #[test]
    fn normalize_migrates_legacy_key_and_dedupes() {
        let mut s = Settings::default();
        s.gemini.api_key = " legacy ".into();
        s.gemini.api_keys = vec!["a".into(), "legacy".into(), "".into(), "a".into(), "b".into()];
        s.gemini.current_key_index = 7;

        assert!(s.normalize());
        assert_eq!(s.gemini.api_keys, vec!["legacy", "a", "b"]);
        assert!(s.gemini.api_key.is_empty());
        assert_eq!(s.gemini.current_key_index, 0);
        assert!(!s.normalize(), "second pass is a no-op");
    }

    #[test]
    fn get_by_dot_path() {
        let store = ConfigStore::in_memory(Settings::default());
        assert_eq!(store.get("auto_paste.delay_ms", 0u64), 500);
        assert_eq!(store.get("gemini.model", String::new()), DEFAULT_MODEL);
        assert!(store.get("auto_paste.enabled", false));
    }

    #[test]
    fn get_falls_back_to_default() {
        let store = ConfigStore::in_memory(Settings::default());
        assert_eq!(store.get("nope.missing", 42u32), 42);
        // Wrong type falls back too.
        assert_eq!(store.get("gemini.model", 7u32), 7);
    }

    #[test]
    fn set_by_dot_path_updates_typed_settings() {
        let store = ConfigStore::in_memory(Settings::default());
        store.set("auto_paste.delay_ms", 250u64).unwrap();
        store.set("hotkeys.capture", "ctrl+alt+q").unwrap();
        let s = store.snapshot();
        assert_eq!(s.auto_paste.delay_ms, 250);
        assert_eq!(s.hotkeys.capture, "ctrl+alt+q");
    }

    #[test]
    fn set_rejects_unknown_and_malformed_paths() {
        let store = ConfigStore::in_memory(Settings::default());
        assert!(matches!(
            store.set("gemini.nonexistent", true),
            Err(ConfigError::InvalidPath(_))
        ));
        assert!(matches!(
            store.set("gemini..model", "x"),
            Err(ConfigError::InvalidPath(_))
        ));
        assert!(matches!(
            store.set("auto_paste.delay_ms", "soon"),
            Err(ConfigError::InvalidPath(_))
        ));
        assert_eq!(store.snapshot(), Settings::default());
    }

    #[test]
    fn every_write_notifies_subscribers() {
        let store = ConfigStore::in_memory(Settings::default());
        let rx = store.subscribe();
        let before = *rx.borrow();
        store.set("logging.level", "debug").unwrap();
        store.update(|s| s.auto_paste.enabled = false).unwrap();
        assert_eq!(*rx.borrow(), before + 2);
    }

    #[test]
    fn open_creates_file_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let store = ConfigStore::open(&path).unwrap();
        assert!(path.exists(), "defaults are written on first open");
        store
            .update(|s| s.gemini.api_keys = vec!["k1".into(), "k2".into()])
            .unwrap();
        store.set("gemini.current_key_index", 1usize).unwrap();

        let reopened = ConfigStore::open(&path).unwrap();
        let s = reopened.snapshot();
        assert_eq!(s.gemini.api_keys, vec!["k1", "k2"]);
        assert_eq!(s.gemini.current_key_index, 1);
    }

    #[test]
    fn open_migrates_legacy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(
            &path,
            "[gemini]\napi_key = \"old-key\"\nmodel = \"gemini-pro-vision\"\n",
        )
        .unwrap();

        let store = ConfigStore::open(&path).unwrap();
        let s = store.snapshot();
        assert_eq!(s.gemini.api_keys, vec!["old-key"]);
        assert_eq!(s.gemini.model, "gemini-pro-vision");
        assert_eq!(s.auto_paste.delay_ms, 500, "missing sections use defaults");

        let on_disk = fs::read_to_string(&path).unwrap();
        assert!(on_disk.contains("api_keys"));
        assert!(!on_disk.contains("api_key ="));
    }

    #[test]
    fn reload_picks_up_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let store = ConfigStore::open(&path).unwrap();

        let mut edited = store.snapshot();
        edited.gemini.system_prompt = "Explain the error.".into();
        fs::write(&path, toml::to_string_pretty(&edited).unwrap()).unwrap();

        store.reload().unwrap();
        assert_eq!(store.snapshot().gemini.system_prompt, "Explain the error.");
    }

    #[test]
    fn reload_rewrites_migrated_legacy_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        let store = ConfigStore::open(&path).unwrap();

        fs::write(&path, "[gemini]\napi_key = \"hand-edited\"\n").unwrap();
        store.reload().unwrap();

        assert_eq!(store.snapshot().gemini.api_keys, vec!["hand-edited"]);
        let on_disk: toml::Value = toml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            lookup(&on_disk, "gemini.api_keys").and_then(|v| v.as_array()).map(Vec::len),
            Some(1)
        );
        assert!(lookup(&on_disk, "gemini.api_key").is_none());
    }
}
