// Jvmgen Logging
// An explicit logger handed to each emitter instead of a process-wide verbose flag

use std::fmt;
use tracing::Level;

/// Component logger with its own maximum level. Events pass through to
/// `tracing`, so any installed subscriber still applies its own filtering.
#[derive(Debug, Clone, Copy)]
pub struct Logger {
    component: &'static str,
    max_level: Level,
}

impl Logger {
    pub fn new(component: &'static str, max_level: Level) -> Self {
        Self {
            component,
            max_level,
        }
    }

    /// A logger that only lets warnings through
    pub fn quiet(component: &'static str) -> Self {
        Self::new(component, Level::WARN)
    }

    pub fn component(&self) -> &'static str {
        self.component
    }

    /// Same level, different component (used by nested emitters)
    pub fn child(&self, component: &'static str) -> Self {
        Self::new(component, self.max_level)
    }

    /// `Level` orders more verbose levels as greater
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.max_level
    }

    pub fn debug(&self, message: fmt::Arguments<'_>) {
        if self.enabled(Level::DEBUG) {
            tracing::debug!(component = self.component, "{}", message);
        }
    }

    pub fn trace(&self, message: fmt::Arguments<'_>) {
        if self.enabled(Level::TRACE) {
            tracing::trace!(component = self.component, "{}", message);
        }
    }

    pub fn warn(&self, message: fmt::Arguments<'_>) {
        if self.enabled(Level::WARN) {
            tracing::warn!(component = self.component, "{}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered_by_verbosity() {
        let logger = Logger::new("emit", Level::DEBUG);
        assert!(logger.enabled(Level::WARN));
        assert!(logger.enabled(Level::DEBUG));
        assert!(!logger.enabled(Level::TRACE));
    }

    #[test]
    fn test_child_keeps_level() {
        let logger = Logger::quiet("emit").child("closure");
        assert_eq!(logger.component(), "closure");
        assert!(!logger.enabled(Level::DEBUG));
    }
}
