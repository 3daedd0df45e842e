// tray.rs — System tray icon + right-click menu for snapask.
// Hotkeys are registered through `HotkeyDispatcher`; the plugin handler
// below only forwards key-down events to it.

use std::sync::Arc;
use tauri::{
    menu::{Menu, MenuItem, PredefinedMenuItem},
    tray::TrayIconBuilder,
    AppHandle, Manager, Wry,
};

use crate::hotkeys::HotkeyDispatcher;
use crate::orchestrator::RequestOrchestrator;
use crate::settings::ConfigStore;

const TRAY_ID: &str = "snapask-tray";

/// Menu entries whose labels change at runtime.
pub struct TrayMenu {
    toggle: MenuItem<Wry>,
}

fn toggle_label(enabled: bool) -> &'static str {
    if enabled {
        "Disable Assistant"
    } else {
        "Enable Assistant"
    }
}

// ─── Tray setup ──────────────────────────────────────────────────────

/// Call this from `App::setup` after the assistant state is managed.
pub fn setup_tray(app: &tauri::App) -> Result<(), Box<dyn std::error::Error>> {
    let handle = app.handle();

    let toggle_item = MenuItem::with_id(handle, "toggle_enabled", toggle_label(true), true, None::<&str>)?;
    let analyze_item = MenuItem::with_id(handle, "analyze_now", "Analyze Now", true, None::<&str>)?;
    let capture_item = MenuItem::with_id(handle, "capture_now", "Capture to Queue", true, None::<&str>)?;
    let separator = PredefinedMenuItem::separator(handle)?;
    let settings_item = MenuItem::with_id(handle, "open_settings", "Open Settings File", true, None::<&str>)?;
    let reload_item = MenuItem::with_id(handle, "reload_settings", "Reload Settings", true, None::<&str>)?;
    let separator2 = PredefinedMenuItem::separator(handle)?;
    let quit_item = MenuItem::with_id(handle, "quit", "Quit", true, None::<&str>)?;

    let menu = Menu::with_items(
        handle,
        &[
            &toggle_item,
            &analyze_item,
            &capture_item,
            &separator,
            &settings_item,
            &reload_item,
            &separator2,
            &quit_item,
        ],
    )?;

    let mut builder = TrayIconBuilder::with_id(TRAY_ID)
        .menu(&menu)
        .tooltip(tooltip(handle))
        .show_menu_on_left_click(false)
        .on_menu_event(|app_handle, event| match event.id().as_ref() {
            "toggle_enabled" => {
                let enabled = !app_handle.state::<Arc<RequestOrchestrator>>().is_enabled();
                log::info!("Tray: assistant toggled → {}", if enabled { "ON" } else { "OFF" });
                crate::set_assistant_enabled(app_handle, enabled);
            }
            "analyze_now" => {
                log::info!("Tray: analyze requested");
                app_handle.state::<Arc<RequestOrchestrator>>().on_analyze_trigger();
            }
            "capture_now" => {
                log::info!("Tray: capture requested");
                app_handle.state::<Arc<RequestOrchestrator>>().on_capture_trigger();
            }
            "open_settings" => {
                use tauri_plugin_opener::OpenerExt;

                let store = app_handle.state::<Arc<ConfigStore>>();
                if let Some(path) = store.path() {
                    log::info!("Tray: opening {}", path.display());
                    if let Err(e) = app_handle.opener().open_path(path.to_string_lossy(), None::<&str>) {
                        log::error!("Could not open settings file: {}", e);
                    }
                }
            }
            "reload_settings" => {
                log::info!("Tray: reloading settings");
                if let Err(e) = app_handle.state::<Arc<ConfigStore>>().reload() {
                    log::error!("Settings reload failed: {}", e);
                }
            }
            "quit" => {
                log::info!("Tray: quit requested");
                app_handle.exit(0);
            }
            _ => {}
        });
    if let Some(icon) = app.default_window_icon() {
        builder = builder.icon(icon.clone());
    }
    builder.build(app)?;

    app.manage(TrayMenu { toggle: toggle_item });
    log::info!("System tray created");
    Ok(())
}

/// Bring the tray label and tooltip in line with the current state.
pub fn refresh(app: &AppHandle) {
    if let Some(menu) = app.try_state::<TrayMenu>() {
        let enabled = app.state::<Arc<RequestOrchestrator>>().is_enabled();
        let _ = menu.toggle.set_text(toggle_label(enabled));
    }
    if let Some(tray) = app.tray_by_id(TRAY_ID) {
        let _ = tray.set_tooltip(Some(tooltip(app)));
    }
}

fn tooltip(app: &AppHandle) -> String {
    let hotkeys = app.state::<Arc<ConfigStore>>().snapshot().hotkeys;
    format!(
        "snapask\nAnalyze: {}\nCapture: {}",
        hotkeys.analyze, hotkeys.capture
    )
}

// ─── Global shortcut handler ─────────────────────────────────────────

/// Called by the global-shortcut plugin when *any* registered shortcut fires.
pub fn on_shortcut_event(
    app: &AppHandle,
    shortcut: &tauri_plugin_global_shortcut::Shortcut,
    event: tauri_plugin_global_shortcut::ShortcutEvent,
) {
    // Only act on key-down (Pressed), not Released.
    if event.state() != tauri_plugin_global_shortcut::ShortcutState::Pressed {
        return;
    }

    match app.try_state::<Arc<HotkeyDispatcher>>() {
        Some(dispatcher) => {
            if !dispatcher.dispatch_registration(shortcut.id()) {
                log::debug!("Shortcut {:?} not dispatched", shortcut);
            }
        }
        None => log::warn!("Shortcut fired before the dispatcher was ready"),
    }
}
