//! CLI argument definitions for ironsift-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;
use ironsift_core::config::IronsiftConfig;

/// Ironsift packet feature extraction daemon.
///
/// Attaches the XDP early filter to an interface, runs one processing
/// loop per NIC queue and feeds redirected feature records to the analyzer.
#[derive(Parser, Debug)]
#[command(name = "ironsift-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to ironsift.toml configuration file.
    #[arg(short, long, default_value = "/etc/ironsift/ironsift.toml")]
    pub config: PathBuf,

    /// Override the capture interface.
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Override the first NIC queue id.
    #[arg(short, long)]
    pub queue: Option<u32>,

    /// Override the sampling rate (keep 1 in N).
    #[arg(short, long)]
    pub sampling_rate: Option<u32>,

    /// Deliver features through the ring buffer instead of AF_XDP zero-copy sockets.
    #[arg(long)]
    pub ring_mode: bool,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Entropy threshold above which the sample analyzer flags a record.
    #[arg(long, default_value_t = 200)]
    pub entropy_threshold: u8,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Apply command-line overrides on top of the loaded configuration.
    ///
    /// CLI flags have the highest precedence (above env vars and the file).
    pub fn apply_overrides(&self, config: &mut IronsiftConfig) {
        if let Some(interface) = &self.interface {
            config.capture.interface.clone_from(interface);
        }
        if let Some(queue) = self.queue {
            config.capture.queue_id = queue;
        }
        if let Some(rate) = self.sampling_rate {
            config.capture.sampling_rate = rate;
        }
        if self.ring_mode {
            config.capture.zero_copy_mode = false;
        }
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let cli = DaemonCli::parse_from(["ironsift-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/ironsift/ironsift.toml"));
        assert!(!cli.ring_mode);
        assert!(!cli.validate);
        assert_eq!(cli.entropy_threshold, 200);
    }

    #[test]
    fn overrides_take_precedence() {
        let cli = DaemonCli::parse_from([
            "ironsift-daemon",
            "-i",
            "ens3",
            "-q",
            "2",
            "-s",
            "10",
            "--ring-mode",
            "--log-format",
            "pretty",
        ]);
        let mut config = IronsiftConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.capture.interface, "ens3");
        assert_eq!(config.capture.queue_id, 2);
        assert_eq!(config.capture.sampling_rate, 10);
        assert!(!config.capture.zero_copy_mode);
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.general.log_level, "info");
    }
}
