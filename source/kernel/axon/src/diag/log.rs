// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Minimal structured logging with severity levels
//! OWNERS: @kernel-team
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 1 unit test (sink capture)
//! PUBLIC API: log_* macros, emit(level,target,args), set_sink(sink)
//! DEPENDS_ON: spin::Mutex
//! INVARIANTS: Debug/Trace only in debug builds; single-line emission; no sink means drop
//! ADR: docs/adr/0001-runtime-roles-and-boundaries.md

use core::fmt::{self, Arguments, Write};

use spin::Mutex;

/// Logging severity used by the kernel.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Level {
    pub const fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    const fn enabled(self) -> bool {
        match self {
            Level::Debug | Level::Trace => cfg!(debug_assertions),
            _ => true,
        }
    }
}

/// Receives every enabled log line.
pub type Sink = fn(Level, &'static str, Arguments<'_>);

static SINK: Mutex<Option<Sink>> = Mutex::new(None);

/// Installs the log sink, returning the previous one.
pub fn set_sink(sink: Option<Sink>) -> Option<Sink> {
    core::mem::replace(&mut *SINK.lock(), sink)
}

/// Emits a structured log line if the level is enabled for the current build.
pub fn emit(level: Level, target: &'static str, args: Arguments<'_>) {
    if !level.enabled() {
        return;
    }
    // Copy the sink out so a sink that logs does not deadlock.
    let sink = *SINK.lock();
    if let Some(sink) = sink {
        sink(level, target, args);
    }
}

/// Formats one line as `[LEVEL target] message`.
pub fn format_line<W: Write>(w: &mut W, level: Level, target: &str, args: Arguments<'_>) -> fmt::Result {
    write!(w, "[{} {}] ", level.tag(), target)?;
    w.write_fmt(args)?;
    w.write_char('\n')
}

#[macro_export]
macro_rules! log_error {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Error, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Error, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_warn {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Warn, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Warn, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_info {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Info, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Info, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_debug {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Debug, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Debug, module_path!(), format_args!($($arg)+));
    }};
}

#[macro_export]
macro_rules! log_trace {
    (target: $target:expr, $($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Trace, $target, format_args!($($arg)+));
    }};
    ($($arg:tt)+) => {{
        $crate::log::emit($crate::log::Level::Trace, module_path!(), format_args!($($arg)+));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;
    use std::sync::Mutex as StdMutex;

    static CAPTURED: StdMutex<String> = StdMutex::new(String::new());

    fn capture(level: Level, target: &'static str, args: Arguments<'_>) {
        if target == "log-test" {
            if let Ok(mut buf) = CAPTURED.lock() {
                let _ = format_line(&mut *buf, level, target, args);
            }
        }
    }

    #[test]
    fn sink_receives_formatted_lines() {
        let previous = set_sink(Some(capture));
        crate::log_warn!(target: "log-test", "slot {} exhausted", 7);
        set_sink(previous);
        let buf = CAPTURED.lock().map(|b| b.clone()).unwrap_or_default();
        assert!(buf.contains("[WARN log-test] slot 7 exhausted\n"));
    }
}
