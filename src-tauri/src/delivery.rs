// delivery.rs — Getting the answer back to the user: paste it where the
// cursor is, or leave it on the clipboard, plus best-effort notifications.

use enigo::{Enigo, Key, KeyboardControllable};
use serde::Serialize;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tauri::{AppHandle, Emitter};

use crate::capture::screen::now_iso;
use crate::settings::ConfigStore;

/// Clipboard / keystroke primitives.
pub trait DeliverySink: Send + Sync {
    /// Put `text` on the clipboard and simulate the paste shortcut.
    fn paste(&self, text: &str) -> bool;
    /// Put `text` on the clipboard only.
    fn copy(&self, text: &str) -> bool;
}

/// Where a response ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Pasted,
    Copied,
    Failed,
}

/// Paste when `auto_paste` is on, falling back to a plain copy; copy only
/// otherwise.
pub fn deliver(sink: &dyn DeliverySink, text: &str, auto_paste: bool) -> DeliveryOutcome {
    if auto_paste {
        log::info!("Auto-pasting response...");
        if sink.paste(text) {
            return DeliveryOutcome::Pasted;
        }
        log::warn!("Paste failed, falling back to clipboard copy");
    } else {
        log::info!("Copying response to clipboard...");
    }
    if sink.copy(text) {
        DeliveryOutcome::Copied
    } else {
        DeliveryOutcome::Failed
    }
}

/// `arboard` for the clipboard, `enigo` for the Ctrl/Cmd+V keystroke.
/// Timing options come from `auto_paste.*` at call time.
pub struct ClipboardDelivery {
    config: Arc<ConfigStore>,
}

impl ClipboardDelivery {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self { config }
    }

    fn set_clipboard(text: &str) -> Result<(), String> {
        let mut clipboard = arboard::Clipboard::new().map_err(|e| e.to_string())?;
        clipboard.set_text(text).map_err(|e| e.to_string())?;
        log::info!("Copied {} characters to clipboard", text.len());
        Ok(())
    }

    fn press_paste() {
        let mut enigo = Enigo::new();
        enigo.key_down(paste_modifier());
        enigo.key_click(Key::Layout('v'));
        enigo.key_up(paste_modifier());
        log::info!("Paste command sent");
    }
}

impl DeliverySink for ClipboardDelivery {
    fn paste(&self, text: &str) -> bool {
        let opts = self.config.snapshot().auto_paste;

        let original = if opts.restore_clipboard {
            match arboard::Clipboard::new().and_then(|mut c| c.get_text()) {
                Ok(t) => Some(t),
                Err(e) => {
                    log::warn!("Could not read original clipboard: {}", e);
                    None
                }
            }
        } else {
            None
        };

        if let Err(e) = Self::set_clipboard(text) {
            log::error!("Failed to paste text: {}", e);
            return false;
        }

        std::thread::sleep(Duration::from_millis(opts.delay_ms));
        Self::press_paste();
        // Let the target app read the clipboard before anything replaces it.
        std::thread::sleep(Duration::from_millis(100));

        if let Some(original) = original {
            std::thread::sleep(Duration::from_millis(200));
            match Self::set_clipboard(&original) {
                Ok(()) => log::info!("Original clipboard restored"),
                Err(e) => log::warn!("Failed to restore clipboard: {}", e),
            }
        }
        true
    }

    fn copy(&self, text: &str) -> bool {
        match Self::set_clipboard(text) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to copy to clipboard: {}", e);
                false
            }
        }
    }
}

#[cfg(target_os = "macos")]
fn paste_modifier() -> Key {
    Key::Meta
}

#[cfg(not(target_os = "macos"))]
fn paste_modifier() -> Key {
    Key::Control
}

/// User-visible status messages. Implementations must not fail loudly.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

/// Payload emitted on `assistant:notice` events.
#[derive(Clone, Serialize)]
pub struct NoticePayload {
    pub title: String,
    pub message: String,
    pub timestamp: String,
}

/// Desktop notifications through `tauri-plugin-notification`, mirrored as
/// `assistant:notice` events for any open webview.
pub struct TauriNotifier {
    app: AppHandle,
}

impl TauriNotifier {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl Notifier for TauriNotifier {
    fn notify(&self, title: &str, message: &str) {
        use tauri_plugin_notification::NotificationExt;

        if let Err(e) = self
            .app
            .notification()
            .builder()
            .title(title)
            .body(message)
            .show()
        {
            log::warn!("Notification '{}' not shown: {}", title, e);
        }

        let payload = NoticePayload {
            title: title.to_string(),
            message: message.to_string(),
            timestamp: now_iso(),
        };
        log_notice_for_testing(&payload);
        let _ = self.app.emit("assistant:notice", payload);
    }
}

/// When `SNAPASK_EVENT_LOG` is set, append the notice as a JSONL line to
/// that file.
fn log_notice_for_testing(payload: &NoticePayload) {
    let Ok(path) = std::env::var("SNAPASK_EVENT_LOG") else {
        return;
    };
    if let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        let json = serde_json::to_string(payload).unwrap_or_default();
        let _ = writeln!(file, r#"{{"event":"assistant:notice","payload":{}}}"#, json);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeSink {
        paste_ok: bool,
        copy_ok: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    impl FakeSink {
        fn new(paste_ok: bool, copy_ok: bool) -> Self {
            Self {
                paste_ok,
                copy_ok,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl DeliverySink for FakeSink {
        fn paste(&self, _text: &str) -> bool {
            self.calls.lock().unwrap().push("paste");
            self.paste_ok
        }
        fn copy(&self, _text: &str) -> bool {
            self.calls.lock().unwrap().push("copy");
            self.copy_ok
        }
    }

    #[test]
    fn paste_success_skips_copy() {
        let sink = FakeSink::new(true, true);
        assert_eq!(deliver(&sink, "x", true), DeliveryOutcome::Pasted);
        assert_eq!(*sink.calls.lock().unwrap(), vec!["paste"]);
    }

    #[test]
    fn paste_failure_falls_back_to_copy() {
        let sink = FakeSink::new(false, true);
        assert_eq!(deliver(&sink, "x", true), DeliveryOutcome::Copied);
        assert_eq!(*sink.calls.lock().unwrap(), vec!["paste", "copy"]);
    }

    #[test]
    fn copy_only_when_auto_paste_off() {
        let sink = FakeSink::new(true, true);
        assert_eq!(deliver(&sink, "x", false), DeliveryOutcome::Copied);
        assert_eq!(*sink.calls.lock().unwrap(), vec!["copy"]);
    }

    #[test]
    fn everything_failing_reports_failed() {
        let sink = FakeSink::new(false, false);
        assert_eq!(deliver(&sink, "x", true), DeliveryOutcome::Failed);
    }
}
