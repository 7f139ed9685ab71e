//! Leveled message sink for user-facing load reports.

use std::fmt;

/// Severity of a message sent to a [`UiLogger`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MessageLevel::Debug => "debug",
            MessageLevel::Info => "info",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => "error",
        };
        f.write_str(text)
    }
}

/// Receives per-source errors and terminal failures from the controller.
///
/// Called on the loading path, so implementations must return quickly.
pub trait UiLogger: Send + Sync {
    fn log(&self, level: MessageLevel, message: &str);
}

/// Forwards messages to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl UiLogger for TracingLogger {
    fn log(&self, level: MessageLevel, message: &str) {
        match level {
            MessageLevel::Debug => tracing::debug!(target: "pkgsearch::ui", "{}", message),
            MessageLevel::Info => tracing::info!(target: "pkgsearch::ui", "{}", message),
            MessageLevel::Warning => tracing::warn!(target: "pkgsearch::ui", "{}", message),
            MessageLevel::Error => tracing::error!(target: "pkgsearch::ui", "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(MessageLevel::Debug < MessageLevel::Info);
        assert!(MessageLevel::Warning < MessageLevel::Error);
        assert_eq!(MessageLevel::Warning.to_string(), "warning");
    }

    #[test]
    fn test_tracing_logger_does_not_panic_without_subscriber() {
        TracingLogger.log(MessageLevel::Error, "no subscriber installed");
    }
}
