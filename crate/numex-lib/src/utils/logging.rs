use env_logger::Builder;
use std::io::Write;

/// Shape of the log lines written to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    /// `2025-01-31 12:00:00 - INFO message`
    Timestamp,

    /// `<5>numex_lib::server: message`, for systemd/syslog.
    Systemd,
}

impl LogFormat {
    const TIMESTAMP: &'static str = "%Y-%m-%d %H:%M:%S";

    /// Read from RUST_LOG_FORMAT; anything but SYSTEMD gets timestamps.
    fn from_env() -> Self {
        Self::parse(std::env::var("RUST_LOG_FORMAT").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("SYSTEMD") => LogFormat::Systemd,
            _ => LogFormat::Timestamp,
        }
    }

    fn install(self, builder: &mut Builder) {
        match self {
            LogFormat::Timestamp => builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "{} - {} {}",
                    chrono::Local::now().format(Self::TIMESTAMP),
                    record.level(),
                    record.args()
                )
            }),
            // Time is tracked by the logging facility.
            LogFormat::Systemd => builder.format(|fmt, record| {
                writeln!(
                    fmt,
                    "<{}>{}: {}",
                    syslog_priority(record.level()),
                    record.target(),
                    record.args()
                )
            }),
        };
    }
}

/// Syslog priority of a log level (RFC 5424).
fn syslog_priority(level: log::Level) -> u8 {
    match level {
        log::Level::Error => 3,
        log::Level::Warn => 4,
        log::Level::Info => 5,
        log::Level::Debug | log::Level::Trace => 7,
    }
}

/// Initialize logging to stderr.
///
/// Everything is logged at WARN and above, except for `info_modules`,
/// logged at INFO and above. Setting RUST_LOG overrides both.
///
/// Set RUST_LOG_FORMAT=SYSTEMD for a systemd-friendly output.
pub fn init_with_info_modules(info_modules: Vec<&str>) {
    let mut builder = Builder::new();
    LogFormat::from_env().install(&mut builder);

    builder.filter_level(log::LevelFilter::Warn);
    for module in info_modules {
        builder.filter_module(module, log::LevelFilter::Info);
    }

    builder.parse_default_env();
    builder.init();
}
