//! A tagged logger value passed down through producer and worker calls.

use std::fmt;

/// Log target plus a chain of `[tag]` prefixes, e.g. `[headless] [crawler] [req-1]`.
///
/// Tagging returns a new value, so a context can be narrowed per delivery
/// without affecting the caller's copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogContext {
    target: &'static str,
    prefix: String,
}

impl LogContext {
    pub fn new(target: &'static str) -> Self {
        Self { target, prefix: String::new() }
    }

    /// Returns a copy of this context with one more tag appended.
    pub fn tag(&self, tag: impl fmt::Display) -> Self {
        let prefix = if self.prefix.is_empty() {
            format!("[{tag}]")
        } else {
            format!("{} [{tag}]", self.prefix)
        };
        Self { target: self.target, prefix }
    }

    pub fn target(&self) -> &'static str {
        self.target
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn log(&self, level: log::Level, args: fmt::Arguments<'_>) {
        if self.prefix.is_empty() {
            log::log!(target: self.target, level, "{}", args);
        } else {
            log::log!(target: self.target, level, "{} {}", self.prefix, args);
        }
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Debug, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Info, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Warn, args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(log::Level::Error, args);
    }
}
