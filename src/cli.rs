use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "castforged")]
#[command(author, version, about = "Supervised live stream capture with retries and verification")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Record a TwitCasting live or movie with streamlink
    Record {
        /// Channel, movie or cas.st URL
        url: String,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Stream quality passed to streamlink
        #[arg(short, long)]
        quality: Option<String>,

        /// Maximum attempts (overrides [retry])
        #[arg(long)]
        attempts: Option<u32>,

        /// Per-attempt timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Supervise an arbitrary capture command ({output} is replaced per attempt)
    Exec {
        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Maximum attempts (overrides [retry])
        #[arg(long)]
        attempts: Option<u32>,

        /// Per-attempt timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Skip output verification
        #[arg(long)]
        no_verify: bool,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,

        /// Command and arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Check whether a captured file is complete
    Verify {
        /// File to check
        file: PathBuf,

        /// Container to assume when the header is not recognised
        #[arg(long)]
        format: Option<String>,

        /// Expected content duration in seconds
        #[arg(long)]
        expected_duration: Option<f64>,

        /// Wall time the capture ran for, in seconds
        #[arg(long)]
        elapsed: Option<f64>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
