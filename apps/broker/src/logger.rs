//! Broker logging: colored stdout plus one log file per run.
//!
//! The run file is named `<Component>_<timestamp>_<pid>.log`. Every logger
//! in the process writes through the same fern file output, which locks on
//! each record.

use crate::error::BrokerAppError;

use common::ErrorLocation;

use std::io::stdout;
use std::panic::Location;
use std::path::{Path, PathBuf};
use std::sync::{Once, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use fern::Dispatch;
use fern::colors::Color::{Blue, Green, Magenta, Red, Yellow};
use fern::colors::ColoredLevelConfig;
use humantime::{format_rfc3339, format_rfc3339_seconds};
use log::{LevelFilter, info, warn};

/// Component name used in the run file name.
pub const COMPONENT: &str = "Broker";

static INIT_LOGGER_ONCE: Once = Once::new();
static LOGGER_ALREADY_CALLED: AtomicBool = AtomicBool::new(false);
static RUN_FILE: OnceLock<PathBuf> = OnceLock::new();

const LOGGER_INITIALIZED_MESSAGE_PREFIX: &str = "Logger initialized with level: ";
const LOGGER_ALREADY_INITIALIZED_MESSAGE: &str = "Logger already initialized";

#[cfg(debug_assertions)]
const LOG_LEVEL: LevelFilter = LevelFilter::Debug;

#[cfg(not(debug_assertions))]
const LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// `<component>_<timestamp>_<pid>.log`, with the timestamp made safe for
/// file names (`2026-10-19T081500Z`).
pub fn log_file_name(component: &str, started: SystemTime, pid: u32) -> String {
    let timestamp = format_rfc3339_seconds(started).to_string().replace(':', "");
    format!("{component}_{timestamp}_{pid}.log")
}

/// Initialize stdout and run-file logging and return the run file path.
///
/// Safe to call more than once: later calls log a warning and return the
/// path of the file chosen by the first call.
pub fn initialize(log_dir: &Path) -> Result<PathBuf, BrokerAppError> {
    if LOGGER_ALREADY_CALLED.swap(true, Ordering::SeqCst) {
        warn!("{LOGGER_ALREADY_INITIALIZED_MESSAGE}");
        return RUN_FILE.get().cloned().ok_or_else(|| BrokerAppError::Logger {
            message: "Logger initialization failed earlier".to_string(),
            location: ErrorLocation::from(Location::caller()),
        });
    }

    let mut result = Err(BrokerAppError::Logger {
        message: "Logger initialization did not run".to_string(),
        location: ErrorLocation::from(Location::caller()),
    });

    INIT_LOGGER_ONCE.call_once(|| {
        let path = log_dir.join(log_file_name(
            COMPONENT,
            SystemTime::now(),
            std::process::id(),
        ));
        result = initialize_internal(&path).map(|()| path);
        if let Ok(path) = &result {
            let _ = RUN_FILE.set(path.clone());
            info!("{LOGGER_INITIALIZED_MESSAGE_PREFIX}{LOG_LEVEL:?}");
            info!("Run log: {}", path.display());
        }
    });

    result
}

#[track_caller]
fn initialize_internal(log_file_path: &Path) -> Result<(), BrokerAppError> {
    let color_configuration = ColoredLevelConfig::new()
        .debug(Blue)
        .info(Green)
        .warn(Yellow)
        .error(Red)
        .trace(Magenta);

    let base_dispatch = Dispatch::new().level(LOG_LEVEL);

    let stdout_dispatch = Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{date} - {level}] [{target}] {message}",
                date = format_rfc3339(SystemTime::now()),
                level = color_configuration.color(record.level()),
                target = record.target(),
                message = message,
            ))
        })
        .chain(stdout());

    // Plain text, no colors
    let file_dispatch = Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{date} - {level}] [{target}] {message} [{file}:{line}]",
                date = format_rfc3339(SystemTime::now()),
                level = record.level(),
                target = record.target(),
                message = message,
                file = record.file().unwrap_or("unknown"),
                line = record.line().unwrap_or(0)
            ))
        })
        .chain(
            fern::log_file(log_file_path).map_err(|e| BrokerAppError::Logger {
                message: format!("Failed to create log file: {e}"),
                location: ErrorLocation::from(Location::caller()),
            })?,
        );

    base_dispatch
        .chain(stdout_dispatch)
        .chain(file_dispatch)
        .apply()
        .map_err(|e| BrokerAppError::Logger {
            message: format!("Failed to initialize logger: {e}"),
            location: ErrorLocation::from(Location::caller()),
        })?;

    Ok(())
}
