// credentials.rs — Ordered API-key list with a rotation cursor.
//
// The keys and the cursor live in the ConfigStore (`gemini.api_keys`,
// `gemini.current_key_index`), so every change is persisted as soon as it
// happens and a settings reload is picked up without rebuilding anything.

use std::sync::{Arc, Mutex};

use crate::settings::{ConfigError, ConfigStore, Settings};

pub struct CredentialRotator {
    config: Arc<ConfigStore>,
    /// Serializes read-modify-write cycles (rotate/add/remove) so two
    /// callers never advance from the same starting index.
    write_lock: Mutex<()>,
}

impl CredentialRotator {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        Self {
            config,
            write_lock: Mutex::new(()),
        }
    }

    /// Credential under the cursor, or `None` when no keys are configured.
    pub fn current(&self) -> Option<String> {
        let gemini = self.config.snapshot().gemini;
        let index = if gemini.current_key_index < gemini.api_keys.len() {
            gemini.current_key_index
        } else {
            0
        };
        gemini.api_keys.get(index).cloned()
    }

    pub fn all(&self) -> Vec<String> {
        self.config.snapshot().gemini.api_keys
    }

    pub fn len(&self) -> usize {
        self.config.snapshot().gemini.api_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index(&self) -> usize {
        self.config.snapshot().gemini.current_key_index
    }

    /// Append a key unless it is already present. Returns whether it was added.
    pub fn add(&self, credential: &str) -> Result<bool, ConfigError> {
        let credential = credential.trim();
        if credential.is_empty() {
            return Ok(false);
        }
        let _guard = self.lock();
        if self.all().iter().any(|k| k == credential) {
            log::debug!("API key already present, not adding");
            return Ok(false);
        }
        self.config
            .update(|s| s.gemini.api_keys.push(credential.to_string()))?;
        log::info!("API key added ({} total)", self.len());
        Ok(true)
    }

    /// Remove a key if present, keeping the cursor on the same key when a
    /// key before it is removed. Returns whether anything was removed.
    pub fn remove(&self, credential: &str) -> Result<bool, ConfigError> {
        let _guard = self.lock();
        let removed = self.config.update(|s| {
            let gemini = &mut s.gemini;
            let Some(pos) = gemini.api_keys.iter().position(|k| k == credential) else {
                return false;
            };
            gemini.api_keys.remove(pos);
            if pos < gemini.current_key_index {
                gemini.current_key_index -= 1;
            }
            if gemini.current_key_index >= gemini.api_keys.len() {
                gemini.current_key_index = 0;
            }
            true
        })?;
        if removed {
            log::info!("API key removed ({} left)", self.len());
        }
        Ok(removed)
    }

    /// Replace the whole list, e.g. from the settings panel. The cursor is
    /// kept when still in range.
    pub fn replace_all(&self, credentials: Vec<String>) -> Result<(), ConfigError> {
        let _guard = self.lock();
        self.config.update(|s| s.gemini.api_keys = credentials)
    }

    /// Advance the cursor by one (wrapping) and return the new current key.
    /// With fewer than two keys nothing changes and `current()` is returned.
    pub fn rotate(&self) -> Option<String> {
        let _guard = self.lock();
        if self.len() < 2 {
            return self.current();
        }

        // The list can still shrink between the check above and the update
        // (settings save or reload), so the closure re-checks.
        let result = self.config.update(advance_cursor);
        match result {
            Ok(Some((index, len))) => log::info!("Rotated to API key #{} of {}", index + 1, len),
            Ok(None) => log::debug!("Fewer than two API keys left, not rotating"),
            // The in-memory cursor has still moved; only the file is stale.
            Err(e) => log::error!("Rotated API key but failed to persist: {}", e),
        }
        self.current()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Step the cursor by one, wrapping. Returns the new index and the key
/// count, or `None` (cursor untouched) with fewer than two keys.
fn advance_cursor(settings: &mut Settings) -> Option<(usize, usize)> {
    let gemini = &mut settings.gemini;
    let len = gemini.api_keys.len();
    if len < 2 {
        return None;
    }
    gemini.current_key_index = (gemini.current_key_index + 1) % len;
    Some((gemini.current_key_index, len))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotator(keys: &[&str], index: usize) -> CredentialRotator {
        let mut settings = Settings::default();
        settings.gemini.api_keys = keys.iter().map(|k| k.to_string()).collect();
        settings.gemini.current_key_index = index;
        CredentialRotator::new(Arc::new(ConfigStore::in_memory(settings)))
    }

    #[test]
    fn empty_set_has_no_current_and_rotate_is_noop() {
        let r = rotator(&[], 0);
        assert_eq!(r.current(), None);
        assert_eq!(r.rotate(), None);
        assert_eq!(r.index(), 0);
    }

    #[test]
    fn single_key_rotate_is_noop() {
        let r = rotator(&["only"], 0);
        assert_eq!(r.rotate(), r.current());
        assert_eq!(r.current().as_deref(), Some("only"));
        assert_eq!(r.index(), 0);
    }

    #[test]
    fn rotation_is_cyclic_and_steps_by_one() {
        for n in 2..=5 {
            let keys: Vec<String> = (0..n).map(|i| format!("k{i}")).collect();
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            let r = rotator(&refs, 0);
            let start = r.current();
            for step in 1..=n {
                let got = r.rotate();
                assert_eq!(r.index(), step % n);
                assert_eq!(got, Some(keys[step % n].clone()));
            }
            assert_eq!(r.current(), start, "n rotations return to the start");
        }
    }

    #[test]
    fn add_dedupes_and_ignores_blank() {
        let r = rotator(&["a"], 0);
        assert!(r.add("b").unwrap());
        assert!(!r.add("a").unwrap());
        assert!(!r.add("   ").unwrap());
        assert_eq!(r.all(), vec!["a", "b"]);
    }

    #[test]
    fn remove_before_cursor_keeps_current_key() {
        let r = rotator(&["k1", "k2", "k3"], 0);
        assert_eq!(r.rotate().as_deref(), Some("k2"));
        assert_eq!(r.index(), 1);

        assert!(r.remove("k1").unwrap());
        assert_eq!(r.all(), vec!["k2", "k3"]);
        assert_eq!(r.index(), 0);
        assert_eq!(r.current().as_deref(), Some("k2"));
    }

    #[test]
    fn remove_at_cursor_moves_to_next_or_wraps() {
        let r = rotator(&["k1", "k2", "k3"], 1);
        r.remove("k2").unwrap();
        assert_eq!(r.current().as_deref(), Some("k3"));

        let r = rotator(&["k1", "k2", "k3"], 2);
        r.remove("k3").unwrap();
        assert_eq!(r.index(), 0);
        assert_eq!(r.current().as_deref(), Some("k1"));
    }

    #[test]
    fn remove_missing_key_is_noop() {
        let r = rotator(&["k1"], 0);
        assert!(!r.remove("nope").unwrap());
        assert_eq!(r.all(), vec!["k1"]);
    }

    #[test]
    fn removing_last_key_leaves_empty_set() {
        let r = rotator(&["k1"], 0);
        r.remove("k1").unwrap();
        assert!(r.is_empty());
        assert_eq!(r.current(), None);
    }

    #[test]
    fn replace_all_resets_out_of_range_cursor() {
        let r = rotator(&["a", "b", "c"], 2);
        r.replace_all(vec!["x".into(), "y".into(), "x".into()]).unwrap();
        assert_eq!(r.all(), vec!["x", "y"]);
        assert_eq!(r.index(), 0);
    }

    #[test]
    fn concurrent_rotations_each_advance_once() {
        let r = Arc::new(rotator(&["a", "b", "c", "d"], 0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let r = Arc::clone(&r);
                std::thread::spawn(move || {
                    r.rotate();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        // 8 steps over 4 keys lands back on index 0.
        assert_eq!(r.index(), 0);
    }

    #[test]
    fn advance_cursor_leaves_short_lists_alone() {
        let mut settings = Settings::default();
        settings.gemini.current_key_index = 0;
        assert_eq!(advance_cursor(&mut settings), None);

        settings.gemini.api_keys = vec!["only".into()];
        assert_eq!(advance_cursor(&mut settings), None);
        assert_eq!(settings.gemini.current_key_index, 0);

        settings.gemini.api_keys.push("second".into());
        assert_eq!(advance_cursor(&mut settings), Some((1, 2)));
        assert_eq!(advance_cursor(&mut settings), Some((0, 2)));
    }

    #[test]
    fn rotate_after_keys_emptied_elsewhere_is_noop() {
        let r = rotator(&["a", "b"], 1);
        r.config.replace(Settings::default()).unwrap();
        assert_eq!(r.rotate(), None);
        assert_eq!(r.index(), 0);
        // The store lock is still usable.
        assert!(r.add("c").unwrap());
    }
}
