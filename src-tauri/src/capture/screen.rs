// screen.rs — Grabs the primary monitor with xcap, downscales, and
// JPEG-encodes the frame. Optionally keeps a PNG copy on disk.

use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, GenericImageView};
use std::path::PathBuf;
use std::sync::Arc;

use super::{CaptureError, CapturedImage, ScreenSource};
use crate::settings::ConfigStore;

/// Full-screen capture backed by `xcap`.
///
/// Encoding options (`screenshot.max_width`, `screenshot.jpeg_quality`,
/// `screenshot.save_to_disk`) are read from the store on every grab, so
/// changes apply to the next capture.
pub struct ScreenCapture {
    config: Arc<ConfigStore>,
    /// Where screenshots go when `screenshot.save_to_disk` is on.
    output_dir: PathBuf,
}

impl ScreenCapture {
    pub fn new(config: Arc<ConfigStore>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            output_dir: output_dir.into(),
        }
    }

    /// Grab one screenshot with the disk copy forced on, whatever
    /// `screenshot.save_to_disk` says. Used by the settings panel to check
    /// capture and the output directory; nothing is queued.
    pub fn test_capture(&self) -> Result<PathBuf, CaptureError> {
        let img = grab_primary()?;
        let (_, saved) = self.finish(img, now_iso(), true)?;
        saved.ok_or_else(|| CaptureError::Save("screenshot was not written".into()))
    }

    /// Optional disk copy, then encode. A forced save must succeed; a save
    /// requested by the settings only logs its failure.
    fn finish(
        &self,
        img: DynamicImage,
        captured_at: String,
        force_save: bool,
    ) -> Result<(CapturedImage, Option<PathBuf>), CaptureError> {
        let shot = self.config.snapshot().screenshot;

        let saved = if force_save {
            Some(self.save_copy(&img, &captured_at)?)
        } else if shot.save_to_disk {
            match self.save_copy(&img, &captured_at) {
                Ok(path) => Some(path),
                Err(e) => {
                    log::warn!("{}", e);
                    None
                }
            }
        } else {
            None
        };

        let image = encode_jpeg(&img, shot.max_width, shot.jpeg_quality, captured_at)?;
        Ok((image, saved))
    }

    fn save_copy(&self, img: &DynamicImage, captured_at: &str) -> Result<PathBuf, CaptureError> {
        std::fs::create_dir_all(&self.output_dir).map_err(|e| {
            CaptureError::Save(format!("cannot create {}: {}", self.output_dir.display(), e))
        })?;
        let path = self.output_dir.join(screenshot_file_name(captured_at));
        img.save(&path)
            .map_err(|e| CaptureError::Save(format!("{}: {}", path.display(), e)))?;
        log::info!("Screenshot saved to {}", path.display());
        Ok(path)
    }
}

fn grab_primary() -> Result<DynamicImage, CaptureError> {
    let monitors = xcap::Monitor::all().map_err(|e| CaptureError::Grab(e.to_string()))?;
    let primary = monitors.iter().position(|m| m.is_primary()).unwrap_or(0);
    let monitor = monitors
        .into_iter()
        .nth(primary)
        .ok_or(CaptureError::NoMonitor)?;

    let raw = monitor
        .capture_image()
        .map_err(|e| CaptureError::Grab(e.to_string()))?;
    let img = DynamicImage::ImageRgba8(raw);
    log::info!("Screenshot captured: {}x{}", img.width(), img.height());
    Ok(img)
}

impl ScreenSource for ScreenCapture {
    fn capture_full_screen(&self) -> Result<CapturedImage, CaptureError> {
        let img = grab_primary()?;
        self.finish(img, now_iso(), false).map(|(image, _)| image)
    }
}

/// Downscale to at most `max_width` (keeping aspect ratio) and JPEG-encode.
pub fn encode_jpeg(
    img: &DynamicImage,
    max_width: u32,
    jpeg_quality: u8,
    captured_at: String,
) -> Result<CapturedImage, CaptureError> {
    let img = if max_width > 0 && img.width() > max_width {
        let ratio = max_width as f64 / img.width() as f64;
        let new_h = ((img.height() as f64 * ratio).round() as u32).max(1);
        img.resize_exact(max_width, new_h, imageops::FilterType::Triangle)
    } else {
        img.clone()
    };

    let (w, h) = img.dimensions();
    let mut jpeg_buf: Vec<u8> = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg_buf, jpeg_quality.clamp(1, 100))
        .encode(img.to_rgb8().as_raw(), w, h, image::ExtendedColorType::Rgb8)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;

    Ok(CapturedImage {
        bytes: jpeg_buf,
        mime_type: "image/jpeg",
        width: w,
        height: h,
        captured_at,
    })
}

/// `2026-03-01T09:05:07.123Z` → `screenshot_20260301_090507_123.png`
fn screenshot_file_name(captured_at: &str) -> String {
    let digits: String = captured_at
        .chars()
        .map(|c| if c.is_ascii_digit() { c } else { ' ' })
        .collect();
    let parts: Vec<&str> = digits.split_whitespace().collect();
    match parts.as_slice() {
        [y, mo, d, h, mi, s, ms, ..] => {
            format!("screenshot_{y}{mo}{d}_{h}{mi}{s}_{ms}.png")
        }
        _ => "screenshot.png".to_string(),
    }
}

/// Current UTC time as ISO-8601 with milliseconds.
pub fn now_iso() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs = dur.as_secs();

    let days = secs / 86400;
    let time_secs = secs % 86400;
    let (year, month, day) = epoch_days_to_ymd(days as i64);

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        year,
        month,
        day,
        time_secs / 3600,
        (time_secs % 3600) / 60,
        time_secs % 60,
        dur.subsec_millis()
    )
}

/// Convert days since Unix epoch (1970-01-01) to (year, month, day).
pub fn epoch_days_to_ymd(mut days: i64) -> (i64, u32, u32) {
    // Shift epoch from 1970-01-01 to 0000-03-01 for easier leap-year math.
    days += 719_468;
    let era = if days >= 0 { days } else { days - 146_096 } / 146_097;
    let doe = (days - era * 146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}
