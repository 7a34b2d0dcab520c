//! Log setup: stderr via `env_logger`, or the local syslog.

use std::fs::File;

use anyhow::{Result, anyhow};
use daemonize::Daemonize;
use log::LevelFilter;
use syslog::{BasicLogger, Facility, Formatter3164};

/// Output of a daemonized process.
pub const DAEMON_LOG: &str = "/var/tmp/camlinkd.log";

/// Installs the global logger. `filter` is an `env_logger` filter string;
/// syslog only understands its level part.
pub fn init(syslog: bool, filter: &str) -> Result<()> {
    if syslog {
        init_syslog(syslog_level(filter))
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
            .try_init()
            .map_err(|e| anyhow!("{e}"))
    }
}

fn init_syslog(level: LevelFilter) -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_USER,
        hostname: None,
        process: "camlinkd".into(),
        pid: std::process::id(),
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(level))
            .map_err(|e| anyhow!("{e}"))
    })
}

/// Level of a filter like `info` or `camlinkd=debug,reqwest=warn`; the most
/// verbose directive wins, anything unreadable means `info`.
fn syslog_level(filter: &str) -> LevelFilter {
    filter
        .split(',')
        .filter_map(|directive| {
            let level = directive.rsplit('=').next()?.trim();
            level.parse::<LevelFilter>().ok()
        })
        .max()
        .unwrap_or(LevelFilter::Info)
}

/// Forks into the background. Must run before the async runtime starts.
pub fn into_daemon() -> Result<()> {
    File::create(DAEMON_LOG)
        .and_then(|out| Ok((out.try_clone()?, out)))
        .map_err(|e| anyhow!("{DAEMON_LOG}: {e}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn syslog_level_from_filter() {
        assert_eq!(syslog_level("debug"), LevelFilter::Debug);
        assert_eq!(syslog_level("camlinkd=trace,reqwest=warn"), LevelFilter::Trace);
        assert_eq!(syslog_level("WARN"), LevelFilter::Warn);
        assert_eq!(syslog_level("nonsense"), LevelFilter::Info);
        assert_eq!(syslog_level(""), LevelFilter::Info);
    }
}
