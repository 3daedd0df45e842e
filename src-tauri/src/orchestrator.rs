// orchestrator.rs — Hotkey actions → capture → model → clipboard.
//
// At most one analyze request is in flight. A second analyze press while
// one is running is logged and dropped; capture-only presses are never
// blocked by it.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tauri::async_runtime::{self, JoinHandle};

use crate::ai::client::truncate;
use crate::ai::InferenceClient;
use crate::capture::{CaptureError, CaptureQueue, CapturedImage, EnqueueOutcome, ScreenSource};
use crate::delivery::{deliver, DeliveryOutcome, DeliverySink, Notifier};
use crate::hotkeys::HotkeyAction;
use crate::settings::{ConfigStore, Settings};

const APP_NAME: &str = "snapask";

/// Clears the processing flag when the analyze worker finishes, however it
/// finishes.
struct ProcessingGuard(Arc<AtomicBool>);

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct RequestOrchestrator {
    queue: Arc<CaptureQueue<CapturedImage>>,
    client: Arc<InferenceClient>,
    screen: Arc<dyn ScreenSource>,
    sink: Arc<dyn DeliverySink>,
    notifier: Arc<dyn Notifier>,
    config: Arc<ConfigStore>,
    processing: Arc<AtomicBool>,
    enabled: AtomicBool,
}

impl RequestOrchestrator {
    pub fn new(
        queue: Arc<CaptureQueue<CapturedImage>>,
        client: Arc<InferenceClient>,
        screen: Arc<dyn ScreenSource>,
        sink: Arc<dyn DeliverySink>,
        notifier: Arc<dyn Notifier>,
        config: Arc<ConfigStore>,
    ) -> Self {
        Self {
            queue,
            client,
            screen,
            sink,
            notifier,
            config,
            processing: Arc::new(AtomicBool::new(false)),
            enabled: AtomicBool::new(true),
        }
    }

    /// Route a hotkey action to its trigger.
    pub fn handle(self: &Arc<Self>, action: HotkeyAction) {
        match action {
            HotkeyAction::Analyze => {
                self.on_analyze_trigger();
            }
            HotkeyAction::CaptureOnly => {
                self.on_capture_trigger();
            }
        }
    }

    /// Start an analyze request unless one is already running. Returns the
    /// worker handle when a request was started.
    pub fn on_analyze_trigger(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            log::info!("Analyze requested while the assistant is disabled, ignoring");
            return None;
        }
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::info!("Already processing a request, ignoring hotkey");
            return None;
        }

        log::info!("Hotkey pressed! Starting capture and analysis...");
        let guard = ProcessingGuard(Arc::clone(&self.processing));
        let this = Arc::clone(self);
        Some(self.spawn_worker("analyze", async move {
            let _guard = guard;
            this.run_analysis().await;
        }))
    }

    /// Capture one screenshot into the queue. Independent of any running
    /// analyze request.
    pub fn on_capture_trigger(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.is_enabled() {
            log::info!("Capture requested while the assistant is disabled, ignoring");
            return None;
        }
        let this = Arc::clone(self);
        Some(self.spawn_worker("capture", async move {
            this.run_capture().await;
        }))
    }

    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            log::info!("Assistant {}", if enabled { "enabled" } else { "disabled" });
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    /// Screenshots waiting for the next analyze.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Pick up settings that are not read per request.
    pub fn apply_settings(&self, settings: &Settings) {
        self.queue
            .set_limit(settings.queue.max_len, settings.queue.overflow);
    }

    async fn run_analysis(&self) {
        let queue = Arc::clone(&self.queue);
        let screen = Arc::clone(&self.screen);
        let images = async_runtime::spawn_blocking(move || {
            queue.drain_or_capture(|| screen.capture_full_screen())
        })
        .await
        .map_err(|e| CaptureError::Worker(e.to_string()))
        .and_then(|r| r);

        let images = match images {
            Ok(images) => images,
            Err(e) => {
                log::error!("Error capturing screenshot: {}", e);
                self.notifier
                    .notify(&format!("{} error", APP_NAME), "Failed to capture screenshot");
                return;
            }
        };

        log::info!("Analyzing {} screenshot(s)...", images.len());
        let outcome = self.client.analyze(images).await;
        log::info!("Received response: {}...", truncate(outcome.text(), 100));

        let text = outcome.text().to_string();
        let auto_paste = self.config.snapshot().auto_paste.enabled;
        let sink = Arc::clone(&self.sink);
        let delivered =
            async_runtime::spawn_blocking(move || deliver(sink.as_ref(), &text, auto_paste))
                .await
                .unwrap_or_else(|e| {
                    log::error!("Delivery worker failed: {}", e);
                    DeliveryOutcome::Failed
                });

        if !outcome.is_success() {
            self.notifier
                .notify(&format!("{} error", APP_NAME), truncate(outcome.text(), 120));
            return;
        }
        match delivered {
            DeliveryOutcome::Pasted => self.notifier.notify(APP_NAME, "Response pasted!"),
            DeliveryOutcome::Copied => self
                .notifier
                .notify(APP_NAME, "Response copied to clipboard"),
            DeliveryOutcome::Failed => self.notifier.notify(
                &format!("{} error", APP_NAME),
                "Could not place the response on the clipboard",
            ),
        }
    }

    async fn run_capture(&self) {
        let screen = Arc::clone(&self.screen);
        let captured = async_runtime::spawn_blocking(move || screen.capture_full_screen())
            .await
            .map_err(|e| CaptureError::Worker(e.to_string()))
            .and_then(|r| r);

        let image = match captured {
            Ok(image) => image,
            Err(e) => {
                log::error!("Error capturing screenshot: {}", e);
                self.notifier
                    .notify(&format!("{} error", APP_NAME), "Failed to capture screenshot");
                return;
            }
        };

        match self.queue.enqueue(image) {
            EnqueueOutcome::Queued(n) => {
                log::info!("Screenshot queued ({} waiting)", n);
                self.notifier
                    .notify(APP_NAME, &format!("Screenshot queued ({} waiting)", n));
            }
            EnqueueOutcome::DroppedOldest(n) => {
                log::warn!("Capture queue full, dropped oldest screenshot ({} waiting)", n);
                self.notifier.notify(
                    APP_NAME,
                    &format!("Queue full, oldest screenshot dropped ({} waiting)", n),
                );
            }
            EnqueueOutcome::Rejected => {
                log::warn!("Capture queue full, screenshot discarded");
                self.notifier.notify(
                    &format!("{} error", APP_NAME),
                    "Capture queue is full. Analyze the queued screenshots first.",
                );
            }
        }
    }

    /// Spawn `work` with panics contained to the task.
    fn spawn_worker<F>(&self, name: &'static str, work: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let notifier = Arc::clone(&self.notifier);
        async_runtime::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
                log::error!("{} worker panicked: {}", name, panic_message(&panic));
                notifier.notify(&format!("{} error", APP_NAME), "Unexpected internal error");
            }
        })
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_reads_common_payloads() {
        let p: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&p), "boom");
        let p: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&p), "bang");
        let p: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(&p), "unknown panic");
    }

    #[test]
    fn guard_clears_flag_on_drop() {
        let flag = Arc::new(AtomicBool::new(true));
        drop(ProcessingGuard(Arc::clone(&flag)));
        assert!(!flag.load(Ordering::SeqCst));
    }
}
