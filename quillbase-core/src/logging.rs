// logging.rs - Embedded-friendly log gate in front of `tracing`
//
// The library never installs a subscriber; binaries do. The global level
// below filters before an event is built, so disabled levels cost one
// atomic load.

use std::sync::atomic::{AtomicU8, Ordering};

/// Log levels (ordered by severity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    /// Errors - failures surfaced to the caller
    Error = 0,
    /// Warnings - degraded but continuing
    Warn = 1,
    /// Info - index creation, client lifecycle
    Info = 2,
    /// Debug - plan selection, per-operation counts
    Debug = 3,
    /// Trace - per-document evaluation
    Trace = 4,
}

impl LogLevel {
    /// Parse log level from string (case-insensitive)
    pub fn parse(s: &str) -> Option<LogLevel> {
        match s.trim().to_uppercase().as_str() {
            "ERROR" => Some(LogLevel::Error),
            "WARN" | "WARNING" => Some(LogLevel::Warn),
            "INFO" => Some(LogLevel::Info),
            "DEBUG" => Some(LogLevel::Debug),
            "TRACE" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// Matching `tracing` level, used by binaries to configure their subscriber
    pub fn to_tracing(self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Global log level (default: WARN)
static GLOBAL_LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);

/// Set the global log level
pub fn set_log_level(level: LogLevel) {
    GLOBAL_LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Get the current global log level
pub fn get_log_level() -> LogLevel {
    match GLOBAL_LOG_LEVEL.load(Ordering::Relaxed) {
        0 => LogLevel::Error,
        1 => LogLevel::Warn,
        2 => LogLevel::Info,
        3 => LogLevel::Debug,
        4 => LogLevel::Trace,
        _ => LogLevel::Warn,
    }
}

/// Check if a message at the given level should be logged
#[inline]
pub fn should_log(level: LogLevel) -> bool {
    level <= get_log_level()
}

#[doc(hidden)]
pub fn log_message(level: LogLevel, module: &str, message: &str) {
    if !should_log(level) {
        return;
    }
    match level {
        LogLevel::Error => tracing::error!(target: "quillbase", module, "{}", message),
        LogLevel::Warn => tracing::warn!(target: "quillbase", module, "{}", message),
        LogLevel::Info => tracing::info!(target: "quillbase", module, "{}", message),
        LogLevel::Debug => tracing::debug!(target: "quillbase", module, "{}", message),
        LogLevel::Trace => tracing::trace!(target: "quillbase", module, "{}", message),
    }
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if $crate::logging::should_log($crate::logging::LogLevel::Error) {
            $crate::logging::log_message(
                $crate::logging::LogLevel::Error,
                module_path!(),
                &format!($($arg)*),
            )
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if $crate::logging::should_log($crate::logging::LogLevel::Warn) {
            $crate::logging::log_message(
                $crate::logging::LogLevel::Warn,
                module_path!(),
                &format!($($arg)*),
            )
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if $crate::logging::should_log($crate::logging::LogLevel::Info) {
            $crate::logging::log_message(
                $crate::logging::LogLevel::Info,
                module_path!(),
                &format!($($arg)*),
            )
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if $crate::logging::should_log($crate::logging::LogLevel::Debug) {
            $crate::logging::log_message(
                $crate::logging::LogLevel::Debug,
                module_path!(),
                &format!($($arg)*),
            )
        }
    };
}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {
        if $crate::logging::should_log($crate::logging::LogLevel::Trace) {
            $crate::logging::log_message(
                $crate::logging::LogLevel::Trace,
                module_path!(),
                &format!($($arg)*),
            )
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Trace);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(LogLevel::parse("ERROR"), Some(LogLevel::Error));
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" DeBuG "), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("loud"), None);
    }

    // Single test mutates the global so parallel tests cannot interleave
    #[test]
    fn test_global_level_filtering() {
        let previous = get_log_level();

        set_log_level(LogLevel::Info);
        assert!(should_log(LogLevel::Error));
        assert!(should_log(LogLevel::Info));
        assert!(!should_log(LogLevel::Debug));

        set_log_level(LogLevel::Trace);
        assert_eq!(get_log_level(), LogLevel::Trace);
        assert!(should_log(LogLevel::Trace));

        set_log_level(previous);
    }

    #[test]
    fn test_tracing_level_mapping() {
        assert_eq!(LogLevel::Debug.to_tracing(), tracing::Level::DEBUG);
        // binaries format this into an EnvFilter directive
        assert_eq!(format!("quillbase={}", LogLevel::Trace.to_tracing()), "quillbase=TRACE");
        assert_eq!(LogLevel::Error.as_str(), "ERROR");
    }
}
