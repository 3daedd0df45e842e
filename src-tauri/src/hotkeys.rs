// hotkeys.rs — Maps global hotkeys to assistant actions.
//
// The OS-level registration sits behind `ShortcutRegistrar` so the
// dispatcher can be exercised without a desktop session. Key events are
// routed back through `dispatch_registration` with the id the registrar
// handed out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tauri::AppHandle;

use crate::settings::HotkeySettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HotkeyAction {
    /// Capture (or drain the queue) and send to the model.
    Analyze,
    /// Capture one screenshot into the queue.
    CaptureOnly,
}

#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("invalid hotkey '{hotkey}': {reason}")]
    Invalid { hotkey: String, reason: String },
    #[error("failed to register hotkey '{hotkey}': {reason}")]
    Registration { hotkey: String, reason: String },
}

/// OS-level global shortcut registration.
pub trait ShortcutRegistrar: Send + Sync {
    /// Register `identifier` (already canonical) and return the id that key
    /// events for it will carry.
    fn register(&self, identifier: &str) -> Result<u32, String>;
    fn unregister(&self, identifier: &str) -> Result<(), String>;
}

/// Receives dispatched actions. Runs on a spawned task, never on the OS
/// callback thread.
pub type ActionHandler = Arc<dyn Fn(HotkeyAction) + Send + Sync>;

const MODIFIER_ORDER: [&str; 4] = ["ctrl", "alt", "shift", "super"];

/// Normalise a hotkey string: lowercase, no spaces, modifier aliases
/// folded, modifiers in `ctrl+alt+shift+super` order, key last.
pub fn canonicalize(hotkey: &str) -> Result<String, HotkeyError> {
    let invalid = |reason: &str| HotkeyError::Invalid {
        hotkey: hotkey.to_string(),
        reason: reason.to_string(),
    };

    let mut modifiers = [false; 4];
    let mut key: Option<String> = None;

    for raw in hotkey.split('+') {
        let token = raw.trim().to_lowercase();
        let token = match token.as_str() {
            "" => return Err(invalid("empty key segment")),
            "control" | "ctl" => "ctrl".to_string(),
            "option" | "opt" => "alt".to_string(),
            "cmd" | "command" | "win" | "windows" | "meta" | "super" => "super".to_string(),
            _ => token,
        };

        if let Some(slot) = MODIFIER_ORDER.iter().position(|m| *m == token) {
            if modifiers[slot] {
                return Err(invalid("repeated modifier"));
            }
            modifiers[slot] = true;
        } else if key.is_some() {
            return Err(invalid("more than one non-modifier key"));
        } else {
            key = Some(token);
        }
    }

    let key = key.ok_or_else(|| invalid("no key besides modifiers"))?;
    let mut parts: Vec<&str> = MODIFIER_ORDER
        .iter()
        .zip(modifiers)
        .filter_map(|(name, on)| on.then_some(*name))
        .collect();
    parts.push(&key);
    Ok(parts.join("+"))
}

struct Binding {
    action: HotkeyAction,
    registration: u32,
}

pub struct HotkeyDispatcher {
    registrar: Arc<dyn ShortcutRegistrar>,
    handler: ActionHandler,
    bindings: Mutex<HashMap<String, Binding>>,
    enabled: AtomicBool,
}

impl HotkeyDispatcher {
    pub fn new(registrar: Arc<dyn ShortcutRegistrar>, handler: ActionHandler) -> Self {
        Self {
            registrar,
            handler,
            bindings: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Register or replace the binding for `hotkey`. Returns the canonical
    /// identifier. On error the hotkey is left unbound.
    pub fn bind(&self, hotkey: &str, action: HotkeyAction) -> Result<String, HotkeyError> {
        let id = canonicalize(hotkey)?;
        if let Some(existing) = self.lock().get_mut(&id) {
            if existing.action != action {
                log::warn!("Hotkey '{}' already registered, replacing action", id);
                existing.action = action;
            }
            return Ok(id);
        }

        // Registration hops to the event-loop thread, which is also where
        // key events arrive; the bindings lock must not be held here.
        let registration = self
            .registrar
            .register(&id)
            .map_err(|reason| HotkeyError::Registration {
                hotkey: id.clone(),
                reason,
            })?;
        self.lock().insert(
            id.clone(),
            Binding {
                action,
                registration,
            },
        );
        log::info!("Hotkey registered: {} → {:?}", id, action);
        Ok(id)
    }

    /// Remove a binding. Returns whether one existed.
    pub fn unbind(&self, hotkey: &str) -> bool {
        let Ok(id) = canonicalize(hotkey) else {
            return false;
        };
        let removed = self.lock().remove(&id).is_some();
        if removed {
            if let Err(e) = self.registrar.unregister(&id) {
                log::warn!("Error unregistering hotkey '{}': {}", id, e);
            }
            log::info!("Hotkey unregistered: {}", id);
        }
        removed
    }

    /// Bring the bindings in line with `settings`: stale identifiers are
    /// unbound, new or changed ones bound. Returns the failures so the
    /// caller can report them; the remaining bindings stay active.
    pub fn apply(&self, settings: &HotkeySettings) -> Vec<HotkeyError> {
        let mut errors = Vec::new();
        let mut desired: Vec<(String, HotkeyAction)> = Vec::new();
        for (hotkey, action) in [
            (&settings.analyze, HotkeyAction::Analyze),
            (&settings.capture, HotkeyAction::CaptureOnly),
        ] {
            if hotkey.trim().is_empty() {
                continue;
            }
            match canonicalize(hotkey) {
                // Same combo for both actions: the later one wins.
                Ok(id) => {
                    desired.retain(|(existing, _)| *existing != id);
                    desired.push((id, action));
                }
                Err(e) => errors.push(e),
            }
        }

        let stale: Vec<String> = self
            .lock()
            .keys()
            .filter(|id| !desired.iter().any(|(d, _)| d == *id))
            .cloned()
            .collect();
        for id in stale {
            self.unbind(&id);
        }

        for (id, action) in desired {
            if let Err(e) = self.bind(&id, action) {
                errors.push(e);
            }
        }
        errors
    }

    /// Fire the action bound to `hotkey`, if any, on a spawned task.
    pub fn dispatch(&self, hotkey: &str) -> bool {
        let Ok(id) = canonicalize(hotkey) else {
            return false;
        };
        let action = self.lock().get(&id).map(|b| b.action);
        self.fire(&id, action)
    }

    /// Same as [`dispatch`](Self::dispatch), keyed by the registrar's id.
    pub fn dispatch_registration(&self, registration: u32) -> bool {
        let found = self
            .lock()
            .iter()
            .find(|(_, b)| b.registration == registration)
            .map(|(id, b)| (id.clone(), b.action));
        match found {
            Some((id, action)) => self.fire(&id, Some(action)),
            None => false,
        }
    }

    fn fire(&self, id: &str, action: Option<HotkeyAction>) -> bool {
        let Some(action) = action else {
            log::debug!("No binding for hotkey '{}'", id);
            return false;
        };
        if !self.is_enabled() {
            log::info!("Hotkey '{}' pressed but hotkeys are disabled", id);
            return false;
        }
        let handler = Arc::clone(&self.handler);
        tauri::async_runtime::spawn(async move { handler(action) });
        true
    }

    pub fn enable(&self) {
        if self.enabled.swap(true, Ordering::SeqCst) {
            log::debug!("Hotkeys already enabled");
        } else {
            log::info!("Hotkeys enabled");
        }
    }

    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            log::info!("All hotkeys disabled");
        } else {
            log::debug!("Hotkeys already disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Current bindings, sorted by identifier.
    pub fn bindings(&self) -> Vec<(String, HotkeyAction)> {
        let mut out: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, b)| (id.clone(), b.action))
            .collect();
        out.sort();
        out
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Binding>> {
        self.bindings.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Registrar backed by `tauri-plugin-global-shortcut`.
pub struct GlobalShortcutRegistrar {
    app: AppHandle,
}

impl GlobalShortcutRegistrar {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl ShortcutRegistrar for GlobalShortcutRegistrar {
    fn register(&self, identifier: &str) -> Result<u32, String> {
        use tauri_plugin_global_shortcut::{GlobalShortcutExt, Shortcut};

        let shortcut: Shortcut = identifier.parse().map_err(|e| format!("{}", e))?;
        let global = self.app.global_shortcut();
        if global.is_registered(shortcut) {
            if let Err(e) = global.unregister(shortcut) {
                log::warn!("Error releasing stale hotkey '{}': {}", identifier, e);
            }
        }
        global.register(shortcut).map_err(|e| e.to_string())?;
        Ok(shortcut.id())
    }

    fn unregister(&self, identifier: &str) -> Result<(), String> {
        use tauri_plugin_global_shortcut::{GlobalShortcutExt, Shortcut};

        let shortcut: Shortcut = identifier.parse().map_err(|e| format!("{}", e))?;
        self.app
            .global_shortcut()
            .unregister(shortcut)
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_orders_and_lowercases() {
        assert_eq!(canonicalize("Shift+Ctrl+A").unwrap(), "ctrl+shift+a");
        assert_eq!(canonicalize(" alt + control + f5 ").unwrap(), "ctrl+alt+f5");
        assert_eq!(canonicalize("cmd+option+space").unwrap(), "alt+super+space");
        assert_eq!(canonicalize("ctrl+shift+alt+a").unwrap(), "ctrl+alt+shift+a");
        assert_eq!(canonicalize("F12").unwrap(), "f12");
    }

    #[test]
    fn malformed_hotkeys_are_rejected() {
        for bad in ["", "ctrl+", "ctrl+shift", "ctrl+ctrl+a", "a+b", "ctrl++a"] {
            assert!(
                matches!(canonicalize(bad), Err(HotkeyError::Invalid { .. })),
                "{bad:?} should be invalid"
            );
        }
    }
}
