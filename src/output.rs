//! The `[warning]` / `[info]` channel, plus `tracing` wiring.
//!
//! Mirrors the original tool's `colorize`/`warning`/`info` helpers
//! (`mpdc/libs/utils.py`): both levels print unconditionally (they're
//! user-facing, not debug noise), colored unless `ANSI_COLORS_DISABLED` is
//! set. We route them through `tracing` so they compose with the rest of
//! the crate's instrumentation instead of bypassing it with bare `println!`.

pub fn ansi_enabled() -> bool {
    std::env::var_os("ANSI_COLORS_DISABLED").is_none()
}

/// Install the `tracing` subscriber used for the whole process.
///
/// Generalizes the teacher's `main.rs::setup_tracing`: same pretty-printed,
/// line-numbered `fmt` layer and `EnvFilter`, but with ANSI output gated on
/// [`ansi_enabled`] instead of always on.
pub fn setup_tracing() {
    use tracing_subscriber::filter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy();
    let fmt = fmt::layer()
        .with_ansi(ansi_enabled())
        .with_target(false)
        .without_time();

    let _ignore_err = tracing_subscriber::registry()
        .with(fmt)
        .with(filter)
        .try_init();
}

/// Print a `[warning]` — a non-fatal condition the user should know about
/// (dropped song, stale cache, name collision, ...).
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

/// Print an `[info]` — a notable but expected event (collection created,
/// cache refreshed, ...).
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {
        tracing::info!($($arg)*)
    };
}
