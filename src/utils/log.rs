//! Leveled stderr logging with macros.
//!
//! `trace!` is off unless the minimum level is lowered with [`set_min_level`];
//! the tools do this for `--trace`, which prints every executed or assembled
//! instruction.

use std::fmt::{self, Display};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Log level for filtering messages.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace = 0,
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Level::Trace => "TRACE",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
        })
    }
}

pub static SHOW_TIMESTAMP: AtomicBool = AtomicBool::new(true);
pub static SHOW_TYPE: AtomicBool = AtomicBool::new(true);
static MIN_LEVEL: AtomicU8 = AtomicU8::new(Level::Info as u8);

pub fn set_min_level(level: Level) {
    MIN_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Whether messages at `level` are currently printed.
#[inline]
pub fn enabled(level: Level) -> bool {
    level as u8 >= MIN_LEVEL.load(Ordering::Relaxed)
}

/// UTC wall-clock time, split for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Timestamp {
    year: u32,
    month: u32,
    day: u32,
    hour: u64,
    minute: u64,
    second: u64,
    millis: u32,
}

impl Timestamp {
    fn now() -> Self {
        let since_epoch = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_unix(since_epoch.as_secs(), since_epoch.subsec_millis())
    }

    fn from_unix(secs: u64, millis: u32) -> Self {
        let (year, month, day) = civil_from_days(secs / 86_400);
        Self {
            year,
            month,
            day,
            hour: (secs / 3600) % 24,
            minute: (secs / 60) % 60,
            second: secs % 60,
            millis,
        }
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            self.year, self.month, self.day, self.hour, self.minute, self.second, self.millis
        )
    }
}

/// Days since the Unix epoch to a proleptic Gregorian (year, month, day).
fn civil_from_days(days: u64) -> (u32, u32, u32) {
    // Howard Hinnant's civil_from_days
    let z = days as i64 + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097) as u32;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe as i64 + era * 400 + i64::from(month <= 2);
    (year as u32, month, day)
}

fn color_for(level: Level) -> ColorSpec {
    let mut spec = ColorSpec::new();
    match level {
        Level::Trace => {
            spec.set_fg(Some(Color::Cyan)).set_dimmed(true);
        }
        Level::Info => {}
        Level::Warn => {
            spec.set_fg(Some(Color::Yellow)).set_bold(true);
        }
        Level::Error => {
            spec.set_fg(Some(Color::Red)).set_bold(true);
        }
    }
    spec
}

/// Internal logging function. Use the `trace!`, `info!`, `warn!`, or `error!` macros instead.
#[doc(hidden)]
pub fn log(level: Level, message: &str) {
    if !enabled(level) {
        return;
    }
    let mut stderr = StandardStream::stderr(ColorChoice::Auto);
    let _ = stderr.set_color(&color_for(level));
    if SHOW_TIMESTAMP.load(Ordering::Relaxed) {
        let _ = write!(stderr, "{} ", Timestamp::now());
    }
    if SHOW_TYPE.load(Ordering::Relaxed) {
        let _ = write!(stderr, "[{:5}] ", level);
    }
    let _ = writeln!(stderr, "{}", message);
    let _ = stderr.reset();
}

/// Logs a trace-level message. Arguments are not formatted unless tracing is on.
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) && $crate::utils::log::enabled($crate::utils::log::Level::Trace) {
            $crate::utils::log::log($crate::utils::log::Level::Trace, &format!($($arg)*))
        }
    }};
}

/// Logs an info-level message.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Info, &format!($($arg)*))
        }
    }};
}

/// Logs a warning-level message.
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Warn, &format!($($arg)*))
        }
    }};
}

/// Logs an error-level message.
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{
        if cfg!(not(test)) {
            $crate::utils::log::log($crate::utils::log::Level::Error, &format!($($arg)*))
        }
    }};
}
