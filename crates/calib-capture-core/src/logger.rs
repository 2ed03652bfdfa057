//! Stderr logging for the `log` facade.
//!
//! Lines look like `[  12.345s  INFO calib_capture::task] message`, with the
//! time counted from installation. Per-frame state changes log at `debug`,
//! captures and sweep milestones at `info`.

use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};

/// Environment variable read by [`init_from_env`] (and by `init_tracing` as
/// its filter, before `RUST_LOG`).
pub const LOG_ENV_VAR: &str = "CALIB_CAPTURE_LOG";

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let line = format!(
                "[{:8.3}s {:>5} {}] {}",
                self.started.elapsed().as_secs_f64(),
                record.level(),
                record.target(),
                record.args()
            );
            let _ = writeln!(std::io::stderr().lock(), "{line}");
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger at `level`.
///
/// Only the first call installs anything; later calls return `Ok(())` and
/// keep the original level.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let mut installed_now = false;
    let logger = LOGGER.get_or_init(|| {
        installed_now = true;
        StderrLogger {
            level,
            started: Instant::now(),
        }
    });
    if installed_now {
        log::set_logger(logger)?;
        log::set_max_level(logger.level);
    }
    Ok(())
}

/// Level named by `CALIB_CAPTURE_LOG`, `info` when unset or unparsable.
pub fn level_from_env() -> LevelFilter {
    std::env::var(LOG_ENV_VAR)
        .ok()
        .and_then(|v| LevelFilter::from_str(v.trim()).ok())
        .unwrap_or(LevelFilter::Info)
}

/// [`init_with_level`] with [`level_from_env`].
pub fn init_from_env() -> Result<(), log::SetLoggerError> {
    init_with_level(level_from_env())
}

/// Install a `tracing` subscriber that also receives `log` records.
///
/// Span closings are reported so instrumented sweep styles and solves show
/// their duration. `json` switches to one JSON object per line.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true);
    let _ = if json {
        builder.json().flatten_event(true).finish().try_init()
    } else {
        builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
    };
}
