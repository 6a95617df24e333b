use std::path::Path;

use flexi_logger::{
    detailed_format, Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming,
};

use crate::config::LoggingConfig;
use crate::error::StaffbookError;

const LOG_BASENAME: &str = "staffbook";
const ROTATE_BYTES: u64 = 10_000_000;
const KEEP_LOG_FILES: usize = 7;

/// Starts file logging under `log_dir`. Warnings and errors are also echoed to
/// stderr. The returned handle must be kept alive for as long as the process logs.
pub fn init_logging(
    config: &LoggingConfig,
    log_dir: &Path,
) -> Result<LoggerHandle, StaffbookError> {
    Logger::try_with_str(config.log_spec())
        .and_then(|logger| {
            logger
                .log_to_file(
                    FileSpec::default()
                        .directory(log_dir)
                        .basename(LOG_BASENAME),
                )
                .rotate(
                    Criterion::Size(ROTATE_BYTES),
                    Naming::Timestamps,
                    Cleanup::KeepLogFiles(KEEP_LOG_FILES),
                )
                .format_for_files(detailed_format)
                .duplicate_to_stderr(Duplicate::Warn)
                .start()
        })
        .map_err(|e| StaffbookError::Error(format!("Failed to start logging: {}", e)))
}
