use clap::{Arg, Command};
use secrecy::SecretString;

pub const ARG_REDIS_URL: &str = "redis-url";
pub const ARG_STORE_TIMEOUT_MS: &str = "store-timeout-ms";

#[derive(Debug)]
pub struct Options {
    pub redis_url: Option<SecretString>,
    pub timeout_ms: u64,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &clap::ArgMatches) -> Self {
        Self {
            redis_url: matches
                .get_one::<String>(ARG_REDIS_URL)
                .cloned()
                .map(SecretString::from),
            timeout_ms: matches
                .get_one::<u64>(ARG_STORE_TIMEOUT_MS)
                .copied()
                .unwrap_or(500),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_REDIS_URL)
                .long(ARG_REDIS_URL)
                .help("Redis URL for sessions, blacklist and rate limits, example: redis://:password@127.0.0.1/0")
                .long_help(
                    "Redis URL for sessions, blacklist and rate limits. Without it state is kept in process memory, which is only correct for a single instance.",
                )
                .env("TOLLGATE_REDIS_URL")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_STORE_TIMEOUT_MS)
                .long(ARG_STORE_TIMEOUT_MS)
                .help("Timeout for each store operation in milliseconds")
                .env("TOLLGATE_STORE_TIMEOUT_MS")
                .default_value("500")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
