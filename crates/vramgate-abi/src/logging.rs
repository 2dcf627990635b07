//! Diagnostic output on the host process's stderr.
//!
//! Regular events go through a `tracing-subscriber` fmt layer installed once
//! at initialization. The exit summary cannot: `.fini_array` runs after
//! thread-local storage has been torn down, and the fmt layer buffers through
//! a thread-local. [`write_raw`] formats the line itself and hands it to
//! `write(2)` directly, gated by the same threshold.

use std::sync::atomic::{AtomicU8, Ordering};

use vramgate_core::LogLevel;

static THRESHOLD: AtomicU8 = AtomicU8::new(encode(LogLevel::Warn));

const fn encode(level: LogLevel) -> u8 {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Info => 1,
        LogLevel::Warn => 2,
        LogLevel::Error => 3,
        LogLevel::None => 4,
    }
}

const fn decode(raw: u8) -> LogLevel {
    match raw {
        0 => LogLevel::Debug,
        1 => LogLevel::Info,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::None,
    }
}

/// The configured threshold.
#[must_use]
pub fn threshold() -> LogLevel {
    decode(THRESHOLD.load(Ordering::Relaxed))
}

/// Install the stderr subscriber at `level`.
///
/// Returns false if a global subscriber was already set in this copy of
/// `tracing`. The shared library carries its own copy, so a subscriber the
/// host application installs never receives these events.
pub fn install(level: LogLevel) -> bool {
    THRESHOLD.store(encode(level), Ordering::Relaxed);
    if level == LogLevel::None {
        return true;
    }
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .without_time()
        .with_target(false)
        .with_max_level(level.level_filter())
        .try_init()
        .is_ok()
}

/// Render one line the way [`write_raw`] prints it.
#[must_use]
pub fn render(level: LogLevel, message: &str) -> String {
    format!("{:>5} {message}\n", level.as_str().to_ascii_uppercase())
}

/// Write `message` to stderr without going through `tracing`.
pub fn write_raw(level: LogLevel, message: &str) {
    if !threshold().allows(level) {
        return;
    }
    let line = render(level, message);
    let mut rest = line.as_bytes();
    while !rest.is_empty() {
        // SAFETY: `rest` is a live byte slice; fd 2 may be closed, which
        // write reports as an error.
        let n = unsafe { libc::write(libc::STDERR_FILENO, rest.as_ptr().cast(), rest.len()) };
        if n <= 0 {
            return;
        }
        rest = &rest[n as usize..];
    }
}
