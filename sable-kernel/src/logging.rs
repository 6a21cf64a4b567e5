//! Kernel Logging
//!
//! Provides logging infrastructure using the `log` crate.
//!
//! Console output is owned by the platform, so the logger formats each
//! record into a fixed-size line and hands it to a sink function
//! registered at init. Lines longer than the buffer are truncated.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record};
use spin::Once;

/// Longest formatted log line, in bytes.
pub const LINE_SIZE: usize = 256;

/// Receives one formatted log line, without a trailing newline.
pub type LogSink = fn(&str);

/// Stack buffer for formatting one line
pub(crate) struct LineBuffer {
    data: [u8; LINE_SIZE],
    len: usize,
}

impl LineBuffer {
    pub(crate) const fn new() -> Self {
        Self {
            data: [0u8; LINE_SIZE],
            len: 0,
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        match core::str::from_utf8(&self.data[..self.len]) {
            Ok(s) => s,
            // Truncation split a multi-byte character.
            Err(e) => core::str::from_utf8(&self.data[..e.valid_up_to()]).unwrap_or(""),
        }
    }
}

impl Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let remaining = LINE_SIZE - self.len;
        let to_copy = bytes.len().min(remaining);
        self.data[self.len..self.len + to_copy].copy_from_slice(&bytes[..to_copy]);
        self.len += to_copy;
        Ok(())
    }
}

/// Kernel logger implementation
pub struct KernelLogger {
    sink: Once<LogSink>,
}

impl KernelLogger {
    const fn new() -> Self {
        Self { sink: Once::new() }
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let Some(sink) = self.sink.get() else {
            return;
        };
        let mut line = LineBuffer::new();
        let _ = write!(
            line,
            "[{:<5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        );
        sink(line.as_str());
    }

    fn flush(&self) {}
}

/// Global logger instance
static LOGGER: KernelLogger = KernelLogger::new();

/// Install the kernel logger, sending lines to `sink`.
///
/// Only the first call installs a sink; later calls just adjust the level.
pub fn init(sink: LogSink, level: LevelFilter) {
    LOGGER.sink.call_once(|| sink);
    if log::set_logger(&LOGGER).is_ok() || log::max_level() != level {
        log::set_max_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_truncates() {
        let mut line = LineBuffer::new();
        for _ in 0..LINE_SIZE {
            let _ = write!(line, "ab");
        }
        assert_eq!(line.as_str().len(), LINE_SIZE);
    }

    #[test]
    fn test_line_buffer_keeps_utf8_valid() {
        let mut line = LineBuffer::new();
        let _ = write!(line, "{}", "x".repeat(LINE_SIZE - 1));
        let _ = write!(line, "é");
        assert_eq!(line.as_str().len(), LINE_SIZE - 1);
    }
}
