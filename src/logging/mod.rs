//! `log` backend setup.
//!
//! The crate logs through the `log` facade. In the browser records go to the
//! devtools console via `console_log`; native builds and tests route them
//! through a `tracing-subscriber` fmt subscriber on stderr.

use log::LevelFilter;

pub fn default_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    }
}

/// Accepts `off`, `error` ... `trace` in any case.
pub fn parse_level(raw: Option<&str>) -> LevelFilter {
    raw.and_then(|s| s.trim().parse::<LevelFilter>().ok())
        .unwrap_or_else(default_level)
}

#[cfg(target_arch = "wasm32")]
fn install() -> bool {
    console_log::init_with_level(log::Level::Trace).is_ok()
}

#[cfg(not(target_arch = "wasm32"))]
fn install() -> bool {
    tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::TRACE)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// Installs the backend once. The backend passes everything; `level` is
/// enforced by the `log` max level, so later calls only change it.
pub fn init(level: LevelFilter) {
    let installed = install();
    log::set_max_level(level);
    if !installed {
        log::debug!("logger already installed, switching level to {level}");
    }
}
