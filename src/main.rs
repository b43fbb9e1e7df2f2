//! This binary is responsible for implementing an ICMP echo client.

use std::{
    io,
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use rping::{
    conn::IcmpConn,
    parser::parse_input,
    pinger::{PingParams, PingResult, Pinger},
    stats::Statistics,
};
use tracing::debug;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let params = parse_input();
    match ping(&params).await {
        Ok(stats) => match stats.report(&params.address).write_to(io::stdout()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("ping: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("ping: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Pings until SIGINT and returns the statistics of the stopped probe loop.
async fn ping(params: &PingParams) -> PingResult<Statistics> {
    let conn = IcmpConn::dial(&params.address, params.timeout).await?;
    let mut pinger = Pinger::new(params.clone(), conn, io::stdout());
    pinger.banner()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    let mut task = tokio::task::spawn_blocking(move || pinger.run(&flag));

    tokio::select! {
        res = &mut task => return joined(res),
        res = tokio::signal::ctrl_c() => res?,
    }
    debug!("interrupted, waiting for probe loop");
    shutdown.store(true, Ordering::Release);
    joined(task.await)
}

fn joined(res: Result<PingResult<Statistics>, tokio::task::JoinError>) -> PingResult<Statistics> {
    res.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}
