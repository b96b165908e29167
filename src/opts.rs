use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "rideau-telemetry", author, about)]
pub struct Opts {
    /// Show only warnings and errors
    #[structopt(short = "s", long = "silent", conflicts_with = "verbose")]
    pub silent: bool,

    /// Show all log messages
    #[structopt(short = "v", long = "verbose", conflicts_with = "silent")]
    pub verbose: bool,

    /// Suppress timestamps in logs, useful with journald
    #[structopt(long = "suppress-log-timestamps")]
    pub suppress_log_timestamps: bool,

    /// Run only the specified device IDs
    #[structopt(short = "i", long = "device-id")]
    pub device_ids: Option<Vec<String>>,

    /// Log the messages instead of sending them
    #[structopt(long = "dry-run")]
    pub dry_run: bool,

    /// Stop every device after this many messages
    #[structopt(long = "ticks")]
    pub ticks: Option<u64>,

    /// Override the publish interval of every device
    #[structopt(long = "interval-secs")]
    pub interval_secs: Option<u64>,

    /// Setting files
    #[structopt(parse(from_os_str), env = "RIDEAU_SETTINGS", default_value = "rideau-telemetry.toml")]
    pub settings: Vec<PathBuf>,
}
