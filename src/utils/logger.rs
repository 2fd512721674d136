use chrono::Utc;
use log::{info, SetLoggerError};
use std::io::Write;

/// Process-wide logger setup for the client binary and tooling.
pub struct PulsarLogger;

impl PulsarLogger {
    /// Installs an `env_logger` writing `[time] [level] [file:line] message`.
    ///
    /// `level` uses the `env_logger` filter syntax (`info`, `pulsar_client=debug`).
    /// `RUST_LOG`, when set, is applied on top of it.
    pub fn init(level: &str) -> Result<(), SetLoggerError> {
        env_logger::Builder::new()
            .parse_filters(level)
            .parse_env("RUST_LOG")
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{}] [{}] [{}:{}] {}",
                    Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                    record.level(),
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .try_init()?;

        info!("Pulsar logger initialized at '{}'", level);
        Ok(())
    }

    /// Same as [`PulsarLogger::init`] but for tests: ignores a logger that is already set.
    pub fn init_for_tests() {
        let _ = env_logger::Builder::new().parse_filters("debug").is_test(true).try_init();
    }
}
