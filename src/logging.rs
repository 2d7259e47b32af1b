//! Logging setup for the pihash binary and the shared library.
//!
//! Everything logs through the `log` facade; `env_logger` is the backend.
//!
//! # Command line
//!
//! [`init_logging`] picks the level by (in priority order):
//!
//! 1. `RUST_LOG` environment variable (if set)
//! 2. CLI flags: `--quiet` (error only) or `--verbose` (debug/trace)
//! 3. Default: info level
//!
//! Debug builds include a timestamp and the module path; release builds print
//! level and message only.
//!
//! # Shared library
//!
//! A host process that loads the cdylib never runs `main`, so [`init_library_logging`]
//! is called from `ext_init`. It reads `PIHASH_LOG`, then `RUST_LOG`, and defaults
//! to `warn` so the host's stderr stays quiet. If the host already installed a
//! logger, it is left alone.
//!
//! # Example
//!
//! ```rust,no_run
//! use pihash::logging::init_logging;
//!
//! // -v
//! init_logging(1, false);
//! log::debug!("Debug info here");
//! ```

use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Environment variable read by [`init_library_logging`] before `RUST_LOG`.
pub const LIBRARY_LOG_ENV: &str = "PIHASH_LOG";

/// Initialize logging for the command line.
///
/// Returns `false` if a logger was already installed.
///
/// # Arguments
///
/// * `verbose` - Verbosity count from CLI (0=normal, 1=debug, 2+=trace)
/// * `quiet` - If true, only show errors (overridden by RUST_LOG)
pub fn init_logging(verbose: u8, quiet: bool) -> bool {
    let use_env = env::var("RUST_LOG").is_ok();

    let mut builder = Builder::new();
    if use_env {
        builder.parse_default_env();
    } else {
        builder.filter_level(determine_level(verbose, quiet));
    }
    configure_format(&mut builder, verbose);

    let installed = builder.try_init().is_ok();
    if installed {
        if use_env {
            log::debug!("Logging initialized from RUST_LOG");
        } else {
            log::debug!(
                "Logging initialized at level: {:?}",
                determine_level(verbose, quiet)
            );
        }
    }
    installed
}

/// Initialize logging for a host process using the C ABI.
///
/// Safe to call any number of times; only the first call in a process without
/// a logger has an effect.
pub fn init_library_logging() {
    let filters = library_filters(
        env::var(LIBRARY_LOG_ENV).ok().as_deref(),
        env::var("RUST_LOG").ok().as_deref(),
    );

    let mut builder = Builder::new();
    builder.parse_filters(&filters);
    builder.format(|buf, record| {
        let level = record.level();
        let level_style = buf.default_level_style(level);
        writeln!(
            buf,
            "[pihash] {level_style}{:<5}{level_style:#} {}",
            level,
            record.args()
        )
    });
    // A host logger wins
    let _ = builder.try_init();
}

/// Filter directives for the library: `PIHASH_LOG`, else `RUST_LOG`, else `warn`.
fn library_filters(pihash_log: Option<&str>, rust_log: Option<&str>) -> String {
    pihash_log
        .or(rust_log)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("warn")
        .to_string()
}

/// Determine the log level from CLI flags.
fn determine_level(verbose: u8, quiet: bool) -> LevelFilter {
    if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

/// Configure the log format based on build type and verbosity.
fn configure_format(builder: &mut Builder, verbose: u8) {
    #[cfg(debug_assertions)]
    {
        builder.format(move |buf, record| {
            let timestamp = buf.timestamp_seconds();
            let level = record.level();
            let level_style = buf.default_level_style(level);

            if verbose >= 1 {
                writeln!(
                    buf,
                    "{} {level_style}{:<5}{level_style:#} [{}] {}",
                    timestamp,
                    level,
                    record.module_path().unwrap_or("unknown"),
                    record.args()
                )
            } else {
                writeln!(
                    buf,
                    "{} {level_style}{:<5}{level_style:#} {}",
                    timestamp,
                    level,
                    record.args()
                )
            }
        });
    }

    #[cfg(not(debug_assertions))]
    {
        let _ = verbose;
        builder.format(|buf, record| {
            let level = record.level();
            let level_style = buf.default_level_style(level);
            writeln!(
                buf,
                "{level_style}{:<5}{level_style:#} {}",
                level,
                record.args()
            )
        });
    }
}

/// Get the current log level as a string.
pub fn current_level_name() -> &'static str {
    match log::max_level() {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}
