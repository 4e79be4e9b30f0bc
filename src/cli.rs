use clap::Parser;
use netprobe::config::parse_duration;
use std::time::Duration;

/// Reachability checks over ICMP echo and TCP connect
#[derive(Parser, Debug, Clone)]
#[command(name = "netprobe")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Targets to check, e.g. icmp://192.0.2.1 or tcp://example.com:443.
    /// Prefix with "name=" to label a target
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Write/dial timeout per check
    #[arg(long = "timeout", default_value = "1s", value_parser = parse_duration_arg)]
    pub timeout: Duration,

    /// Deadline for a whole check, after which it is cancelled
    #[arg(long = "deadline", default_value = "5s", value_parser = parse_duration_arg)]
    pub deadline: Duration,

    /// Number of rounds to run (0 = until interrupted)
    #[arg(short = 'c', long = "count", default_value = "1")]
    pub count: u64,

    /// Pause between rounds
    #[arg(short = 'i', long = "interval", default_value = "1s", value_parser = parse_duration_arg)]
    pub interval: Duration,

    /// Print one JSON object per result
    #[arg(long = "json")]
    pub json: bool,

    /// Log probe details (-v debug, -vv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// A target split into its display name and address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub name: String,
    pub address: String,
}

impl TargetSpec {
    /// Parse "name=address"; without a name the address doubles as one
    pub fn parse(target: &str) -> Self {
        match target.split_once('=') {
            Some((name, address)) if !name.is_empty() && !name.contains("://") => Self {
                name: name.to_string(),
                address: address.to_string(),
            },
            _ => Self {
                name: target.to_string(),
                address: target.to_string(),
            },
        }
    }
}

impl Args {
    pub fn target_specs(&self) -> Vec<TargetSpec> {
        self.targets.iter().map(|t| TargetSpec::parse(t)).collect()
    }

    /// Log filter implied by `-v`, used when RUST_LOG is unset
    pub fn default_log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "netprobe=debug,info",
            _ => "netprobe=trace,debug",
        }
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.deadline.is_zero() {
            return Err("Deadline must be positive".into());
        }

        if self.count != 1 && self.interval.is_zero() {
            return Err("Interval must be positive when running several rounds".into());
        }

        if let Some(empty) = self.targets.iter().find(|t| t.trim().is_empty()) {
            return Err(format!("Invalid target: {empty:?}"));
        }

        Ok(())
    }
}

fn parse_duration_arg(value: &str) -> Result<Duration, String> {
    parse_duration(value).map_err(|e| e.to_string())
}
