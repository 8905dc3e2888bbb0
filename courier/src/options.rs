//! Construction-time configuration
//!
//! The structs in this module can be flattened into the options of an executable
//! using [`structopt`] or constructed directly. They are never modified after a
//! publisher or consumer has been built from them.

use crate::helpers::{parse_millis, Backoff};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use structopt::StructOpt;
use thiserror::Error;

/// Options for reaching the broker cluster
#[derive(Debug, Clone, StructOpt)]
pub struct BrokerOptions {
    /// Broker hosts used for bootstrapping, separated by commas
    #[structopt(
        short = "b",
        long = "brokers",
        env = "COURIER_BROKERS",
        default_value = "localhost:9092",
        use_delimiter = true,
        value_name = "host:port"
    )]
    pub hosts: Vec<String>,
}

impl BrokerOptions {
    /// Creates a new instance from a list of hosts
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }
}

/// Options for publishers
#[derive(Debug, Clone, StructOpt)]
pub struct ProducerOptions {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    /// Milliseconds the asynchronous publisher waits for in-flight records to be
    /// acknowledged before it closes the transport
    #[structopt(long, env = "COURIER_CLOSE_GRACE", default_value = "1000", parse(try_from_str = parse_millis))]
    pub close_grace: Duration,
}

impl ProducerOptions {
    /// Creates a new instance with the default grace period of one second
    pub fn new(broker: BrokerOptions) -> Self {
        Self {
            broker,
            close_grace: Duration::from_secs(1),
        }
    }

    /// Replaces the grace period used when closing the asynchronous publisher
    pub fn with_close_grace(mut self, close_grace: Duration) -> Self {
        self.close_grace = close_grace;
        self
    }
}

/// Options for consumer groups
#[derive(Debug, Clone, StructOpt)]
pub struct ConsumerOptions {
    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub broker: BrokerOptions,

    /// Identifier of the consumer group to join
    #[structopt(long, env = "COURIER_GROUP_ID", default_value = "courier")]
    pub group_id: String,

    /// Where to start when the group has no committed offset yet.
    /// Either 'earliest', 'latest' or an explicit offset
    #[structopt(long, env = "COURIER_START_FROM", default_value = "earliest")]
    pub start_from: StartOffset,

    /// Advance the committed offset even if the handler failed to process a message
    #[structopt(long)]
    pub commit_after_failure: bool,

    #[allow(missing_docs)]
    #[structopt(flatten)]
    pub retry: RetryOptions,
}

impl ConsumerOptions {
    /// Creates a new instance which starts at the earliest offset and does not commit failures
    pub fn new(broker: BrokerOptions, group_id: impl Into<String>) -> Self {
        Self {
            broker,
            group_id: group_id.into(),
            start_from: StartOffset::Earliest,
            commit_after_failure: false,
            retry: RetryOptions::default(),
        }
    }

    /// Replaces the starting offset policy
    pub fn with_start_from(mut self, start_from: StartOffset) -> Self {
        self.start_from = start_from;
        self
    }

    /// Replaces the commit policy for failed messages
    pub fn with_commit_after_failure(mut self, commit_after_failure: bool) -> Self {
        self.commit_after_failure = commit_after_failure;
        self
    }

    /// Replaces the retry behaviour for failed joins
    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }
}

/// Backoff applied between failed attempts to join a consumer group
#[derive(Debug, Clone, StructOpt)]
pub struct RetryOptions {
    /// Milliseconds to wait after the first failed join
    #[structopt(long, env = "COURIER_RETRY_INITIAL", default_value = "100", parse(try_from_str = parse_millis))]
    pub retry_initial: Duration,

    /// Upper bound in milliseconds for the wait between failed joins
    #[structopt(long, env = "COURIER_RETRY_MAX", default_value = "10000", parse(try_from_str = parse_millis))]
    pub retry_max: Duration,

    /// Factor by which the wait grows after each consecutive failure
    #[structopt(long, env = "COURIER_RETRY_MULTIPLIER", default_value = "2")]
    pub retry_multiplier: u32,
}

impl RetryOptions {
    /// Backoff iterator following these options
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.retry_initial, self.retry_max, self.retry_multiplier)
    }
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            retry_initial: Duration::from_millis(100),
            retry_max: Duration::from_secs(10),
            retry_multiplier: 2,
        }
    }
}

/// Position from which a consumer group without committed offsets begins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOffset {
    /// Oldest message still retained by the broker
    Earliest,
    /// Only messages published after joining
    Latest,
    /// Explicit position within each partition
    Offset(i64),
}

impl StartOffset {
    /// Sentinel value for [`StartOffset::Earliest`]
    pub const EARLIEST: i64 = -2;
    /// Sentinel value for [`StartOffset::Latest`]
    pub const LATEST: i64 = -1;
}

/// Error returned when a [`StartOffset`] can not be parsed
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid start offset '{0}', expected 'earliest', 'latest' or a non-negative offset")]
pub struct InvalidStartOffset(String);

impl FromStr for StartOffset {
    type Err = InvalidStartOffset;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "earliest" | "oldest" => Ok(Self::Earliest),
            "latest" | "newest" => Ok(Self::Latest),
            other => match other.parse::<i64>() {
                Ok(Self::EARLIEST) => Ok(Self::Earliest),
                Ok(Self::LATEST) => Ok(Self::Latest),
                Ok(offset) if offset >= 0 => Ok(Self::Offset(offset)),
                _ => Err(InvalidStartOffset(s.to_owned())),
            },
        }
    }
}

impl fmt::Display for StartOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Earliest => write!(f, "earliest"),
            Self::Latest => write!(f, "latest"),
            Self::Offset(offset) => write!(f, "{}", offset),
        }
    }
}
