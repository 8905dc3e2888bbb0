use courier::helpers::parse_millis;
use courier::options::ConsumerOptions;
use std::str::FromStr;
use std::time::Duration;
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(about = "Publishes and consumes envelopes with configurable delivery and commit semantics")]
pub struct MainOptions {
    /// Log level, scopable to different modules
    ///
    /// Levels: trace, debug, info, warn, error
    #[structopt(
        short,
        long,
        global = true,
        default_value = "info",
        env = "RUST_LOG",
        value_name = "level"
    )]
    pub log: String,

    /// Format of the log output
    ///
    /// Formats: text, compact, json
    #[structopt(long, global = true, default_value = "text", value_name = "format")]
    pub log_format: LogFormat,

    #[structopt(subcommand)]
    pub command: Command,
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Runs a publish and consume round trip against an in-process broker
    Simulate(SimulateOptions),
}

#[derive(Debug, StructOpt)]
pub struct SimulateOptions {
    #[structopt(flatten)]
    pub consumer: ConsumerOptions,

    /// Topic the envelopes are published to
    #[structopt(long, default_value = "courier.simulation")]
    pub topic: String,

    /// Number of envelopes published through the asynchronous publisher
    #[structopt(long, default_value = "10")]
    pub messages: usize,

    /// Let the handler fail every n-th envelope
    #[structopt(long, value_name = "n")]
    pub fail_every: Option<usize>,

    /// Partitions of the simulated topic
    #[structopt(long, default_value = "3")]
    pub partitions: usize,

    /// Host the simulated broker answers to, connecting to any other host fails
    #[structopt(long, default_value = "localhost:9092", value_name = "host:port")]
    pub advertised_host: String,

    /// Milliseconds the asynchronous publisher waits for acknowledgments before closing
    #[structopt(long, default_value = "100", parse(try_from_str = parse_millis))]
    pub close_grace: Duration,

    /// Milliseconds the simulated broker takes to acknowledge a record
    #[structopt(long, default_value = "0", parse(try_from_str = parse_millis))]
    pub ack_latency: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}
