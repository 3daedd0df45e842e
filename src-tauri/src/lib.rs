pub mod ai;
pub mod capture;
pub mod credentials;
pub mod delivery;
pub mod hotkeys;
pub mod logging;
pub mod orchestrator;
pub mod settings;
mod tray;

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tauri::{AppHandle, Manager};

use ai::{GeminiModel, InferenceClient};
use capture::{CaptureQueue, ScreenCapture};
use credentials::CredentialRotator;
use delivery::{ClipboardDelivery, TauriNotifier};
use hotkeys::{GlobalShortcutRegistrar, HotkeyAction, HotkeyDispatcher};
use orchestrator::RequestOrchestrator;
use settings::{ConfigError, ConfigStore};

/// Snapshot returned by `assistant_status`.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantStatus {
    pub enabled: bool,
    pub processing: bool,
    pub queued: usize,
    pub api_keys: usize,
    pub current_key_index: usize,
    pub hotkeys: Vec<HotkeyBinding>,
}

#[derive(Clone, Serialize)]
pub struct HotkeyBinding {
    pub hotkey: String,
    pub action: String,
}

/// Enable or disable both the hotkeys and the orchestrator, then refresh
/// the tray.
pub(crate) fn set_assistant_enabled(app: &AppHandle, enabled: bool) {
    let dispatcher = app.state::<Arc<HotkeyDispatcher>>();
    if enabled {
        dispatcher.enable();
    } else {
        dispatcher.disable();
    }
    app.state::<Arc<RequestOrchestrator>>().set_enabled(enabled);
    tray::refresh(app);
}

/// Add an API key. Returns `false` when it was blank or already present.
#[tauri::command]
async fn add_api_key(
    rotator: tauri::State<'_, Arc<CredentialRotator>>,
    api_key: String,
) -> Result<bool, String> {
    rotator.add(&api_key).map_err(|e| e.to_string())
}

#[tauri::command]
async fn remove_api_key(
    rotator: tauri::State<'_, Arc<CredentialRotator>>,
    api_key: String,
) -> Result<bool, String> {
    rotator.remove(&api_key).map_err(|e| e.to_string())
}

/// Send a tiny text request with `api_key` to check that it works.
#[tauri::command]
async fn test_api_key(
    client: tauri::State<'_, Arc<InferenceClient>>,
    api_key: String,
) -> Result<(), String> {
    client.test_credential(api_key.trim()).await
}

/// Same as pressing the analyze hotkey. Returns whether a request started.
#[tauri::command]
fn analyze_now(orchestrator: tauri::State<'_, Arc<RequestOrchestrator>>) -> bool {
    orchestrator.on_analyze_trigger().is_some()
}

#[tauri::command]
fn capture_now(orchestrator: tauri::State<'_, Arc<RequestOrchestrator>>) -> bool {
    orchestrator.on_capture_trigger().is_some()
}

/// Grab one screenshot and always write it to disk. Returns the saved
/// path. The capture queue is not touched.
#[tauri::command]
async fn test_capture(screen: tauri::State<'_, Arc<ScreenCapture>>) -> Result<String, String> {
    let screen = screen.inner().clone();
    let saved = tauri::async_runtime::spawn_blocking(move || screen.test_capture())
        .await
        .map_err(|e| e.to_string())?
        .map_err(|e| {
            log::error!("Test capture failed: {}", e);
            e.to_string()
        })?;
    log::info!("Test capture saved to {}", saved.display());
    Ok(saved.to_string_lossy().into_owned())
}

#[tauri::command]
fn set_enabled(app: AppHandle, enabled: bool) -> bool {
    set_assistant_enabled(&app, enabled);
    enabled
}

#[tauri::command]
fn assistant_status(
    orchestrator: tauri::State<'_, Arc<RequestOrchestrator>>,
    rotator: tauri::State<'_, Arc<CredentialRotator>>,
    dispatcher: tauri::State<'_, Arc<HotkeyDispatcher>>,
) -> AssistantStatus {
    AssistantStatus {
        enabled: orchestrator.is_enabled(),
        processing: orchestrator.is_processing(),
        queued: orchestrator.queued(),
        api_keys: rotator.len(),
        current_key_index: rotator.index(),
        hotkeys: dispatcher
            .bindings()
            .into_iter()
            .map(|(hotkey, action)| HotkeyBinding {
                hotkey,
                action: match action {
                    HotkeyAction::Analyze => "analyze".into(),
                    HotkeyAction::CaptureOnly => "capture".into(),
                },
            })
            .collect(),
    }
}

/// Open the settings file, moving a malformed one aside so the app still
/// starts with defaults.
fn open_config(path: PathBuf) -> Result<ConfigStore, ConfigError> {
    match ConfigStore::open(&path) {
        Err(ConfigError::Parse(e)) => {
            let backup = path.with_extension("toml.bak");
            eprintln!(
                "Malformed settings file ({}), moving it to {}",
                e,
                backup.display()
            );
            std::fs::rename(&path, &backup)?;
            ConfigStore::open(path)
        }
        other => other,
    }
}

/// Re-apply the settings that are not read per request whenever the store
/// changes.
fn spawn_settings_watcher(app: AppHandle, gemini: Arc<GeminiModel>) {
    let config = app.state::<Arc<ConfigStore>>().inner().clone();
    settings::watch_settings(&config, move |settings| {
        log::debug!("Settings changed, applying");
        for err in app.state::<Arc<HotkeyDispatcher>>().apply(&settings.hotkeys) {
            log::error!("{}", err);
        }
        app.state::<Arc<RequestOrchestrator>>().apply_settings(settings);
        gemini.set_endpoint(&settings.gemini.endpoint);
        logging::apply_level(&settings.logging.level);
        tray::refresh(&app);
    });
}

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .plugin(tauri_plugin_notification::init())
        .plugin(
            tauri_plugin_global_shortcut::Builder::new()
                .with_handler(tray::on_shortcut_event)
                .build(),
        )
        .invoke_handler(tauri::generate_handler![
            settings::load_settings,
            settings::save_settings,
            settings::open_config_file,
            add_api_key,
            remove_api_key,
            test_api_key,
            test_capture,
            analyze_now,
            capture_now,
            set_enabled,
            assistant_status,
        ])
        .setup(|app| {
            let handle = app.handle().clone();

            let config = Arc::new(open_config(settings::config_path(&handle)?)?);
            let initial = config.snapshot();
            logging::init(&initial.logging, app.path().app_log_dir().ok().as_deref());
            log::info!("snapask starting, settings at {:?}", config.path());

            let gemini = Arc::new(GeminiModel::new(initial.gemini.endpoint.clone()));
            let rotator = Arc::new(CredentialRotator::new(Arc::clone(&config)));
            let client = Arc::new(InferenceClient::new(
                gemini.clone(),
                Arc::clone(&rotator),
                Arc::clone(&config),
            ));
            if rotator.is_empty() {
                log::warn!("No Gemini API key configured");
            }

            let screenshots_dir = app
                .path()
                .app_data_dir()
                .map(|dir| dir.join("screenshots"))
                .unwrap_or_else(|_| PathBuf::from("screenshots"));
            let screen = Arc::new(ScreenCapture::new(Arc::clone(&config), screenshots_dir));
            let orchestrator = Arc::new(RequestOrchestrator::new(
                Arc::new(CaptureQueue::new(initial.queue.max_len, initial.queue.overflow)),
                Arc::clone(&client),
                screen.clone(),
                Arc::new(ClipboardDelivery::new(Arc::clone(&config))),
                Arc::new(TauriNotifier::new(handle.clone())),
                Arc::clone(&config),
            ));

            let target = Arc::clone(&orchestrator);
            let dispatcher = Arc::new(HotkeyDispatcher::new(
                Arc::new(GlobalShortcutRegistrar::new(handle.clone())),
                Arc::new(move |action: HotkeyAction| target.handle(action)),
            ));
            for err in dispatcher.apply(&initial.hotkeys) {
                log::error!("{}", err);
            }

            app.manage(config);
            app.manage(rotator);
            app.manage(client);
            app.manage(screen);
            app.manage(orchestrator);
            app.manage(dispatcher);

            tray::setup_tray(app)?;
            spawn_settings_watcher(handle, gemini);

            log::info!("snapask ready");
            Ok(())
        })
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn malformed_settings_file_is_moved_aside() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[gemini\napi_keys = = nope").unwrap();

        let store = open_config(path.clone()).unwrap();

        assert_eq!(store.snapshot(), settings::Settings::default());
        let backup = dir.path().join("settings.toml.bak");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "[gemini\napi_keys = = nope");
        // A fresh default file replaces the broken one.
        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(toml::from_str::<settings::Settings>(&rewritten).is_ok());
    }

    #[test]
    fn valid_settings_file_is_left_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "[gemini]\nmodel = \"gemini-test\"\n").unwrap();

        let store = open_config(path).unwrap();

        assert_eq!(store.snapshot().gemini.model, "gemini-test");
        assert!(!dir.path().join("settings.toml.bak").exists());
    }
}
