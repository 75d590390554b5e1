//! Command-line interface.
//!
//! Flags either pick where configuration comes from or override single
//! settings after every file layer has been applied.

use std::path::PathBuf;

use clap::Parser;

use crate::config::{LogLevel, Overrides};

/// midisynthd: system MIDI synthesizer daemon
#[derive(Parser, Debug)]
#[command(name = "midisynthd")]
#[command(about = "System MIDI synthesizer daemon")]
#[command(version, disable_version_flag = true)]
pub struct Cli {
    /// Print version and exit
    #[arg(short = 'v', long)]
    pub version: bool,

    /// Read configuration from FILE instead of the system and user layers
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Run as a background service (plain log output)
    #[arg(short, long)]
    pub daemonize: bool,

    /// Log at debug level
    #[arg(short = 'V', long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Log warnings and errors only
    #[arg(short, long)]
    pub quiet: bool,

    /// Validate the configuration, print it and exit
    #[arg(short, long)]
    pub test_config: bool,

    /// Print the --test-config output as JSON
    #[arg(long, requires = "test_config")]
    pub json: bool,

    /// Use FILE as the only soundfont
    #[arg(short, long, value_name = "FILE")]
    pub soundfont: Option<PathBuf>,

    /// Do not request realtime scheduling
    #[arg(short, long)]
    pub no_realtime: bool,

    /// Configured user to run as
    #[arg(short, long)]
    pub user: Option<String>,

    /// Configured group to run as
    #[arg(short, long)]
    pub group: Option<String>,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Log level forced by `--verbose` or `--quiet`.
    pub fn log_level(&self) -> Option<LogLevel> {
        if self.verbose {
            Some(LogLevel::Debug)
        } else if self.quiet {
            Some(LogLevel::Warn)
        } else {
            None
        }
    }

    /// Settings applied on top of the configuration files.
    pub fn to_overrides(&self) -> Overrides {
        Overrides {
            log_level: self.log_level(),
            soundfont: self.soundfont.clone(),
            no_realtime: self.no_realtime,
            user: self.user.clone(),
            group: self.group.clone(),
        }
    }

    /// Version line printed by `--version`.
    pub fn version_line() -> String {
        format!("midisynthd {}", env!("CARGO_PKG_VERSION"))
    }

    /// Colour codes are only written for interactive runs.
    pub fn ansi_logs(&self) -> bool {
        !self.daemonize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("midisynthd").chain(args.iter().copied()))
    }

    #[test]
    fn no_flags_means_no_overrides() {
        let cli = parse(&[]).unwrap();
        assert_eq!(cli.to_overrides(), Overrides::default());
        assert!(cli.config.is_none());
        assert!(cli.ansi_logs());
    }

    #[test]
    fn short_flags() {
        let cli = parse(&[
            "-c", "/tmp/x.conf", "-d", "-V", "-t", "-s", "/tmp/a.sf2", "-n", "-u", "audio", "-g",
            "audio",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.conf")));
        assert!(cli.daemonize && cli.test_config && !cli.ansi_logs());

        let o = cli.to_overrides();
        assert_eq!(o.log_level, Some(LogLevel::Debug));
        assert_eq!(o.soundfont, Some(PathBuf::from("/tmp/a.sf2")));
        assert!(o.no_realtime);
        assert_eq!(o.user.as_deref(), Some("audio"));
        assert_eq!(o.group.as_deref(), Some("audio"));
    }

    #[test]
    fn lowercase_v_is_version() {
        let cli = parse(&["-v"]).unwrap();
        assert!(cli.version && !cli.verbose);
        assert!(Cli::version_line().starts_with("midisynthd "));
    }

    #[test]
    fn quiet_lowers_level() {
        assert_eq!(parse(&["--quiet"]).unwrap().log_level(), Some(LogLevel::Warn));
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(parse(&["--verbose", "--quiet"]).is_err());
    }

    #[test]
    fn json_needs_test_config() {
        assert!(parse(&["--json"]).is_err());
        assert!(parse(&["--test-config", "--json"]).unwrap().json);
    }
}
