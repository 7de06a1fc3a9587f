use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::filter::LevelFilter;

/// Log level options for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// No logging output
    Off,
    /// Error messages only
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace-level messages (most verbose)
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "confwire")]
#[command(about = "confwire - read and watch configuration from files, HTTP, WebSocket, Redis and Kubernetes")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set log level (off, error, warn, info, debug, trace)
    /// If not specified, defaults to 'warn'; RUST_LOG overrides both
    #[arg(short = 'l', long, global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Enable verbose logging (shortcut for --log-level=debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl Cli {
    /// Effective log level from the flags.
    pub fn level(&self) -> LevelFilter {
        match (self.log_level, self.verbose) {
            (Some(level), _) => level.into(),
            (None, true) => LevelFilter::DEBUG,
            (None, false) => LevelFilter::WARN,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read the configuration once and print it
    Get {
        /// Source URI (file path, file://, http(s)://, ws(s)://, redis(s)://, k8s://)
        #[arg(env = "CONFWIRE_URI")]
        uri: String,

        /// Print the payload as received instead of decoding it
        #[arg(long)]
        raw: bool,
    },

    /// Follow the configuration and print one line per change until Ctrl-C
    Watch {
        /// Source URI (file path, file://, http(s)://, ws(s)://, redis(s)://, k8s://)
        #[arg(env = "CONFWIRE_URI")]
        uri: String,

        /// Print payloads as received instead of decoding them
        #[arg(long)]
        raw: bool,
    },
}
