//! Command-line interface definitions.
//!
//! Uses `clap` derive macros for declarative argument parsing.

use clap::{Parser, ValueEnum};

/// A fast two-pass TCP connect port scanner.
#[derive(Parser, Debug)]
#[command(name = "pincer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A fast two-pass TCP connect port scanner", long_about = None)]
pub struct Args {
    /// Target: host, CIDR, comma-list, IPv4 short range (10.0.0.1-20),
    /// or a file with one target per line
    #[arg(value_name = "TARGET")]
    pub target: String,

    /// Ports: e.g. "80,443", "1-65535", "popular", or "top" (top 1000)
    #[arg(short, long, default_value = "top")]
    pub ports: String,

    /// Maximum concurrent connect attempts (clamped to 1-1024)
    #[arg(short, long, default_value_t = 300)]
    pub concurrency: usize,

    /// Fast-pass connect timeout in seconds
    #[arg(long, default_value_t = 0.30)]
    pub tfast: f64,

    /// Slow retry-pass connect timeout in seconds
    #[arg(long, default_value_t = 1.00)]
    pub tslow: f64,

    /// Disable the slow retry pass
    #[arg(long)]
    pub no_retry: bool,

    /// Only print findings (no live events, greppable summary)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format for the final report
    #[arg(short, long, value_enum, default_value = "plain")]
    pub output: OutputFormat,

    /// Verbose logging (RUST_LOG overrides)
    #[arg(short, long)]
    pub verbose: bool,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable plain text
    Plain,
    /// JSON structured output
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["pincer", "example.com"]);
        assert_eq!(args.target, "example.com");
        assert_eq!(args.ports, "top");
        assert_eq!(args.concurrency, 300);
        assert!((args.tfast - 0.30).abs() < f64::EPSILON);
        assert!((args.tslow - 1.00).abs() < f64::EPSILON);
        assert!(!args.no_retry);
        assert!(!args.quiet);
        assert_eq!(args.output, OutputFormat::Plain);
    }

    #[test]
    fn test_flag_parsing() {
        let args = Args::parse_from([
            "pincer",
            "10.0.0.0/24",
            "-p",
            "22,80",
            "-c",
            "5000",
            "--tfast",
            "0.5",
            "--no-retry",
            "-q",
            "-o",
            "json",
        ]);
        assert_eq!(args.ports, "22,80");
        assert_eq!(args.concurrency, 5000);
        assert!(args.no_retry);
        assert!(args.quiet);
        assert_eq!(args.output, OutputFormat::Json);
    }
}
