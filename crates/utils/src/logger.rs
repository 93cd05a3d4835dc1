use log::LevelFilter;

/// Initializes the process-wide logger. `force_debug` wins over the
/// configured level (the `--debug` CLI flag).
pub fn init_logger(log_level: &str, force_debug: bool) {
    let level = if force_debug {
        LevelFilter::Debug
    } else {
        match log_level.to_lowercase().as_str() {
            "trace" => LevelFilter::Trace,
            "debug" => LevelFilter::Debug,
            "info" => LevelFilter::Info,
            "warn" => LevelFilter::Warn,
            "error" => LevelFilter::Error,
            "off" => LevelFilter::Off,
            _ => {
                eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
                LevelFilter::Info
            }
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(level)
        .format_timestamp_secs()
        .init();
}
