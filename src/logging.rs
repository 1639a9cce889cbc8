//! Operational log setup.
//!
//! Lines go through `env_logger` to stderr and, when a path is given, to a size-rotated file
//! next to the event log.

pub mod rotating_file;

pub use rotating_file::{RotatingFile, Tee};

use env_logger::{Target, WriteStyle};
use log::{warn, LevelFilter};
use std::path::Path;

/// Size at which the operational log file is rolled over.
pub const APP_LOG_MAX_BYTES: u64 = 1_000_000;

/// Rolled-over files kept beside the current one.
pub const APP_LOG_BACKUPS: usize = 3;

/// Installs the global logger. `Info` by default, `RUST_LOG` overrides.
///
/// If `app_log` cannot be opened, logging stays on stderr and a warning says so.
pub fn init(app_log: Option<&Path>) {
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_target(false);

    let mut failure = None;
    if let Some(path) = app_log {
        match RotatingFile::open(path, APP_LOG_MAX_BYTES, APP_LOG_BACKUPS) {
            Ok(file) => {
                builder
                    .target(Target::Pipe(Box::new(Tee::new(std::io::stderr(), file))))
                    .write_style(WriteStyle::Never);
            }
            Err(e) => failure = Some((path, e)),
        }
    }

    builder.init();

    if let Some((path, e)) = failure {
        warn!(
            "Cannot open operational log {}: {}, logging to stderr only",
            path.display(),
            e
        );
    }
}
