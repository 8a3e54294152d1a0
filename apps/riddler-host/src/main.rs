//! Native-messaging host for the riddle tracker extension.
//!
//! The extension talks to this process over stdio. Frames from stdin are read on a dedicated
//! thread; the dispatcher runs on the main thread and writes its requests to stdout. Logs go
//! to stderr, since stdout carries the protocol.

mod host;
mod inbound;

use host::Outbox;
use host::PendingQueries;
use host::StdioHost;
use rd_backend::HttpRiddleBackend;
use rd_core::TrackerError;
use rd_core::TrackerResult;
use rd_ipc::FrameLimits;
use rd_tracker::Dispatcher;
use rd_tracker::TrackerConfig;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "RIDDLER_LOG";
const DEFAULT_LOG_FILTER: &str = "riddler_host=info,rd_tracker=info,rd_auth=info";

fn main() -> ExitCode {
    init_tracing();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!(%error, "riddler host stopped");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run() -> TrackerResult<()> {
    let config = TrackerConfig::from_env()?;
    let limits = FrameLimits::default();
    limits.validate()?;

    let backend = HttpRiddleBackend::new(config.server_endpoint()?, config.session_cookie.clone())?;
    let outbox = Outbox::new(std::io::stdout(), limits);
    let queries = PendingQueries::default();
    let host = StdioHost::new(outbox.clone(), queries.clone(), config.tab_reply_timeout);
    let mut dispatcher = Dispatcher::new(&config, Arc::new(backend), host)?;

    let events = dispatcher.sender();
    let reader = dispatcher.reader();
    thread::Builder::new()
        .name("rd-extension-reader".to_owned())
        .spawn(move || {
            let mut input = std::io::stdin().lock();
            inbound::pump(&mut input, limits, &events, &queries, &reader, &outbox);
        })
        .map_err(|error| {
            TrackerError::new(
                "ipc.reader_spawn_failed",
                format!("failed to start extension reader: {error}"),
            )
        })?;

    tracing::info!(server = %config.server_url, "riddler host started");
    dispatcher.bootstrap();
    dispatcher.run();
    Ok(())
}
