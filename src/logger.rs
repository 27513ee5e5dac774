use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::fs;

use crate::config::LoggingConfig;

/// Initializes the global logger from the `logging` config section.
///
/// `RUST_LOG` overrides the configured level. Safe to call more than once;
/// later calls are no-ops (the first dispatch wins).
pub fn init(config: &LoggingConfig) {
    if let Err(e) = fs::create_dir_all(&config.log_dir) {
        eprintln!("Failed to create log directory at '{}': {}", config.log_dir, e);
    }

    let log_file_path = format!("{}/{}", config.log_dir, config.log_file);

    let level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    let level_filter = level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);

    let base_config = Dispatch::new()
        .level(level_filter)
        .level_for("sled", LevelFilter::Warn)
        .level_for("tokio_util", LevelFilter::Warn);

    let console_config = Dispatch::new()
        .format(|out, message, record| {
            let colors = fern::colors::ColoredLevelConfig::new()
                .error(fern::colors::Color::Red)
                .warn(fern::colors::Color::Yellow)
                .info(fern::colors::Color::Green)
                .debug(fern::colors::Color::Blue)
                .trace(fern::colors::Color::BrightBlack);

            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr());

    let file_config = Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .chain(fern::log_file(&log_file_path).unwrap_or_else(|e| {
            eprintln!("Failed to open log file '{}': {}", log_file_path, e);
            fern::log_file("/dev/stderr").expect("Failed to open stderr as fallback")
        }));

    if base_config.chain(console_config).chain(file_config).apply().is_ok() {
        log::info!("Logger initialized. Logging to console and '{}'.", log_file_path);
    }
}
