use env_logger::Builder;
use log::LevelFilter;

use crate::constants::LOG_ENV_VAR;

/// Initialize logging, given a verbosity level.
///
/// The verbosity level is a signed integer, usually obtained by subtracting
/// the count of `-q` from the count of `-v` (see [`crate::cli::Cli::verbosity_level`]).
/// The [`LOG_ENV_VAR`] environment variable, when set, takes precedence.
pub fn init(verbosity_level: i8) {
    let mut builder = Builder::new();

    builder.filter_level(level_filter(verbosity_level));

    // librdkafka is chatty at INFO: keep it one level down, unless explicitly asked for
    if verbosity_level < 3 {
        builder.filter_module("rdkafka", level_filter(verbosity_level - 1));
    }

    builder.parse_env(LOG_ENV_VAR).init();
}

fn level_filter(verbosity_level: i8) -> LevelFilter {
    match verbosity_level {
        i8::MIN..=-2 => LevelFilter::Off,
        -1 => LevelFilter::Error,
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        3..=i8::MAX => LevelFilter::Trace,
    }
}
