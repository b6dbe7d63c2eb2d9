use flexi_logger::{opt_format, FlexiLoggerError, Logger, LoggerHandle};

/// Initializes the ambient `log` facade. The level comes from `RUST_LOG`
/// when set, otherwise from `default_spec`.
pub fn setup_logging(default_spec: &str) -> Result<LoggerHandle, FlexiLoggerError> {
    Logger::try_with_env_or_str(default_spec)?
        .format(opt_format)
        .start()
}
