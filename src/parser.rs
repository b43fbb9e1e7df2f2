//! This module is responsible for turning the command line into [PingParams].

use std::time::Duration;

use clap::Parser;

use crate::pinger::PingParams;

/// Pause between a reply (or timeout) and the next request.
pub const INTERVAL: Duration = Duration::from_secs(1);

/// Send ICMP echo requests to a host until interrupted.
#[derive(Parser, Debug)]
#[command(name = "ping")]
pub struct Cli {
    /// Timeout for resolving the host and for each echo reply, e.g. `500ms` or `2s`
    #[arg(short = 't', value_name = "DURATION", default_value = "1000ms", value_parser = parse_timeout)]
    pub timeout: Duration,
    /// Host name or IPv4 address to ping
    pub address: String,
}

fn parse_timeout(s: &str) -> Result<Duration, String> {
    let timeout = humantime::parse_duration(s).map_err(|e| e.to_string())?;
    if timeout.is_zero() {
        return Err("timeout must be greater than zero".to_string());
    }
    Ok(timeout)
}

impl From<Cli> for PingParams {
    fn from(cli: Cli) -> Self {
        PingParams {
            address: cli.address,
            timeout: cli.timeout,
            interval: INTERVAL,
        }
    }
}

/// Parses `std::env::args`, exiting with a usage message on bad input.
pub fn parse_input() -> PingParams {
    Cli::parse().into()
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use clap::{error::ErrorKind, Parser};

    use super::{Cli, INTERVAL};
    use crate::pinger::PingParams;

    #[test]
    fn defaults() {
        let params: PingParams = Cli::try_parse_from(["ping", "example.com"])
            .unwrap()
            .into();
        assert_eq!(params.address, "example.com");
        assert_eq!(params.timeout, Duration::from_millis(1000));
        assert_eq!(params.interval, INTERVAL);
    }

    #[test]
    fn timeout_flag() {
        let cli = Cli::try_parse_from(["ping", "-t", "250ms", "10.0.0.1"]).unwrap();
        assert_eq!(cli.timeout, Duration::from_millis(250));
        assert_eq!(cli.address, "10.0.0.1");

        let cli = Cli::try_parse_from(["ping", "-t", "2s", "10.0.0.1"]).unwrap();
        assert_eq!(cli.timeout, Duration::from_secs(2));
    }

    #[test]
    fn missing_address() {
        let err = Cli::try_parse_from(["ping"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        let err = Cli::try_parse_from(["ping", "-t", "2s"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn bad_timeout() {
        let err = Cli::try_parse_from(["ping", "-t", "soon", "10.0.0.1"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
        let err = Cli::try_parse_from(["ping", "-t", "0s", "10.0.0.1"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }
}
