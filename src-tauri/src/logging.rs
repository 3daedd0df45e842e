// logging.rs — One-time env_logger setup.
//
// Everything logs through the `log` facade. The level comes from
// `logging.level` unless `RUST_LOG` is set; `logging.save_logs` tees the
// output into `snapask.log` in the app log directory.

use log::LevelFilter;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::settings::LoggingSettings;

pub const LOG_FILE_NAME: &str = "snapask.log";

/// Writes every record to stderr and to the log file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stderr().write_all(buf);
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stderr().flush();
        self.file.flush()
    }
}

/// Parse a level name case-insensitively; unknown names fall back to `info`.
pub fn parse_level(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or_else(|_| {
        eprintln!("Unknown log level '{}', using info", level);
        LevelFilter::Info
    })
}

/// Install the global logger. Safe to call more than once; later calls
/// only adjust the level.
pub fn init(settings: &LoggingSettings, log_dir: Option<&Path>) {
    let level = parse_level(&settings.level);
    let mut builder = env_logger::Builder::new();

    let env_override = std::env::var("RUST_LOG").ok();
    match &env_override {
        Some(filters) => {
            builder.parse_filters(filters);
        }
        None => {
            // Dependencies stay at the startup level; our own records are
            // gated by the global max level so `apply_level` can raise it.
            builder
                .filter_level(level)
                .filter_module("snapask_lib", LevelFilter::Trace);
        }
    }

    if settings.save_logs {
        match log_dir.map(open_log_file) {
            Some(Ok(file)) => {
                builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
            }
            Some(Err(e)) => eprintln!("Could not open log file: {}", e),
            None => {}
        }
    }

    if builder.try_init().is_err() {
        log::debug!("Logger already initialised");
    }
    if env_override.is_none() {
        log::set_max_level(level);
    }
}

/// Apply a new `logging.level` after a settings change.
pub fn apply_level(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    let level = parse_level(level);
    if log::max_level() != level {
        log::set_max_level(level);
        log::info!("Log level set to {}", level);
    }
}

fn open_log_file(dir: &Path) -> io::Result<File> {
    fs::create_dir_all(dir)?;
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_names_are_case_insensitive() {
        assert_eq!(parse_level("INFO"), LevelFilter::Info);
        assert_eq!(parse_level(" debug "), LevelFilter::Debug);
        assert_eq!(parse_level("off"), LevelFilter::Off);
        assert_eq!(parse_level("chatty"), LevelFilter::Info);
    }

    #[test]
    fn log_file_is_created_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs");
        let mut file = open_log_file(&nested).unwrap();
        writeln!(file, "hello").unwrap();
        assert!(nested.join(LOG_FILE_NAME).exists());
    }
}
