use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use domain::traffic::entity::MatchMode;
use infrastructure::config::{LogFormat, LogLevel};
use infrastructure::constants::{
    DEFAULT_ACCEPTED_FILE, DEFAULT_MAX_HOSTS, DEFAULT_MAX_TASKS, DEFAULT_OUT_FILE,
};

#[derive(Parser, Debug)]
#[command(
    name = "flowaudit",
    about = "Static firewall policy reachability analyzer",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Source networks CSV (must contain a 'Network Segment' column)
    #[arg(long)]
    pub src: PathBuf,

    /// Destination networks CSV (must contain a 'Network Segment' column)
    #[arg(long)]
    pub dst: PathBuf,

    /// Ports list file: one `label,port/proto` or `port/proto` per line
    #[arg(long)]
    pub ports: PathBuf,

    /// Policy back-end
    #[arg(long, value_enum, default_value_t = ProviderKind::Fortigate)]
    pub provider: ProviderKind,

    /// FortiGate configuration file (fortigate provider)
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Policy database file (db provider)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Output CSV for all results
    #[arg(long, default_value = DEFAULT_OUT_FILE)]
    pub out: PathBuf,

    /// Output CSV for accepted traffic only
    #[arg(long, default_value = DEFAULT_ACCEPTED_FILE)]
    pub accepted: PathBuf,

    /// Number of parallel evaluator workers (default: CPU count)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Matching mode: sample tests one IP per network, expand
    /// enumerates hosts of small networks
    #[arg(long, value_enum, default_value_t = ModeArg::Sample)]
    pub mode: ModeArg,

    /// Largest host count a network may have and still be enumerated
    /// in expand mode
    #[arg(long, default_value_t = DEFAULT_MAX_HOSTS)]
    pub max_hosts: u64,

    /// Warn when the estimated task count exceeds this (0 = unlimited)
    #[arg(long, default_value_t = DEFAULT_MAX_TASKS)]
    pub max_tasks: u64,

    /// Log level override
    #[arg(long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Log format: json (aggregators) or text (interactive)
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Append the log to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderKind {
    /// Parse a FortiGate configuration dump
    Fortigate,
    /// Read the policy database
    Db,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Sample,
    Expand,
}

impl ModeArg {
    pub fn to_match_mode(self) -> MatchMode {
        match self {
            Self::Sample => MatchMode::Sample,
            Self::Expand => MatchMode::Expand,
        }
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: [&str; 7] = [
        "flowaudit",
        "--src",
        "src.csv",
        "--dst",
        "dst.csv",
        "--ports",
        "ports.txt",
    ];

    fn with_args(extra: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(BASE.iter().copied().chain(extra.iter().copied()))
    }

    #[test]
    fn cli_defaults() {
        let cli = with_args(&[]).unwrap();
        assert_eq!(cli.provider, ProviderKind::Fortigate);
        assert_eq!(cli.mode, ModeArg::Sample);
        assert_eq!(cli.max_hosts, DEFAULT_MAX_HOSTS);
        assert_eq!(cli.max_tasks, DEFAULT_MAX_TASKS);
        assert_eq!(cli.out, PathBuf::from("results.csv"));
        assert_eq!(cli.accepted, PathBuf::from("accepted.csv"));
        assert!(cli.workers.is_none());
        assert!(cli.rules.is_none());
        assert_eq!(cli.log_level, LogLevel::Info);
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(cli.log_file.is_none());
    }

    #[test]
    fn cli_requires_input_files() {
        assert!(Cli::try_parse_from(["flowaudit"]).is_err());
        assert!(Cli::try_parse_from(["flowaudit", "--src", "s.csv"]).is_err());
    }

    #[test]
    fn cli_expand_mode() {
        let cli = with_args(&["--mode", "expand", "--max-hosts", "1024"]).unwrap();
        assert_eq!(cli.mode, ModeArg::Expand);
        assert_eq!(cli.mode.to_match_mode(), MatchMode::Expand);
        assert_eq!(cli.max_hosts, 1024);
    }

    #[test]
    fn cli_db_provider() {
        let cli = with_args(&["--provider", "db", "--db", "policies.sqlite"]).unwrap();
        assert_eq!(cli.provider, ProviderKind::Db);
        assert_eq!(cli.db, Some(PathBuf::from("policies.sqlite")));
    }

    #[test]
    fn cli_fortigate_rules_path() {
        let cli = with_args(&["--rules", "fw.conf"]).unwrap();
        assert_eq!(cli.rules, Some(PathBuf::from("fw.conf")));
    }

    #[test]
    fn cli_workers_short_flag() {
        let cli = with_args(&["-w", "8"]).unwrap();
        assert_eq!(cli.workers, Some(8));
    }

    #[test]
    fn cli_log_flags() {
        let cli = with_args(&["--log-level", "debug", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn cli_log_file() {
        let cli = with_args(&["--log-file", "run.log"]).unwrap();
        assert_eq!(cli.log_file, Some(PathBuf::from("run.log")));
    }

    #[test]
    fn cli_rejects_invalid_enums() {
        assert!(with_args(&["--mode", "everything"]).is_err());
        assert!(with_args(&["--provider", "csv"]).is_err());
        assert!(with_args(&["--log-level", "loud"]).is_err());
    }
}
