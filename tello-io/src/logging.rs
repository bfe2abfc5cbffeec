//! Logger setup
//!
//! Lines look like `[2024-05-01T12:00:00.123Z] From Tello: ok`. The level
//! comes from `[logging] level` unless `RUST_LOG` is set.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;
use std::io::{self, Write};

/// Install the global logger. Later calls are ignored.
pub fn init(default_level: &str) {
    let env = env_logger::Env::default().default_filter_or(default_level);
    let _ = env_logger::Builder::from_env(env)
        .format(|buf, record| write_line(buf, Utc::now(), record.args()))
        .try_init();
}

/// Write one `[<UTC timestamp>] <message>` console line
pub fn write_line<W: Write>(
    out: &mut W,
    at: DateTime<Utc>,
    message: &fmt::Arguments<'_>,
) -> io::Result<()> {
    writeln!(
        out,
        "[{}] {}",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        message
    )
}
