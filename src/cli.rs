use clap::Parser;
use std::path::PathBuf;

/// camlinkd: feeds sensor, web and event data into camera overlays
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Settings file (default: $PERSISTENT_DATA_PATH/settings.json, then
    /// $INSTALL_PATH/settings.json)
    #[arg(short = 's', long = "settings")]
    pub settings: Option<PathBuf>,

    /// Detach from the terminal; output goes to /var/tmp/camlinkd.log
    #[arg(short = 'd', long = "daemonize", default_value = "false")]
    pub daemonize: bool,

    /// Log to the local syslog instead of stderr
    #[arg(long = "syslog", default_value = "false")]
    pub syslog: bool,

    /// Run again 3 s after a fatal error instead of exiting
    #[arg(long = "supervise", default_value = "false")]
    pub supervise: bool,

    /// Log filter, e.g. `info` or `camlinkd=debug` (RUST_LOG wins)
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    pub log_level: String,
}
