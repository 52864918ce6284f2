//! Setup shared by the `kvstore` binaries.

pub const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.3f";

/// Maps the number of `-v` flags to a log level, starting at `Warn`.
pub fn level(verbosity: u8) -> log::LevelFilter {
    match verbosity {
    | 0 => log::LevelFilter::Warn,
    | 1 => log::LevelFilter::Info,
    | 2 => log::LevelFilter::Debug,
    | _ => log::LevelFilter::Trace,
    }
}

/// Installs a stderr logger with timestamped lines.
pub fn init_logging(verbosity: u8) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}] [{}] [{}] {}",
                chrono::Local::now().format(TIMESTAMP_FORMAT),
                record.level(),
                record.target(),
                message,
            ))
        })
        .level(level(verbosity))
        .chain(std::io::stderr())
        .apply()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(level(0), log::LevelFilter::Warn);
        assert_eq!(level(2), log::LevelFilter::Debug);
        assert_eq!(level(9), log::LevelFilter::Trace);
    }
}
