mod args;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn, Level};
use tubeq::config::Config;
use tubeq::engine::EngineHandle;
use tubeq::server;

use crate::args::Args;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Logging
    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    if args.wal_dir.is_some() {
        error!("unsupported configuration: WAL not yet implemented");
        return ExitCode::from(2);
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            };
            cancel.cancel();
        });
    }

    if let Err(error) = begin(args, cancel).await {
        error!(%error, "encountered runtime error");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

async fn begin(args: Args, cancel: CancellationToken) -> Result<()> {
    let config = Config::from(&args);
    let listener = TcpListener::bind((args.listen, args.port)).await?;
    let engine = EngineHandle::spawn(config.clone(), cancel.clone());

    server::serve(listener, engine, config, cancel).await
}
