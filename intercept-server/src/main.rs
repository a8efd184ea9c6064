use clap::Parser;
use intercept_server::{config::Cli, web, Session};
use miette::Result;
use std::time::Duration;
use tokio_graceful_shutdown::{SubsystemBuilder, Toplevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    env_logger::Builder::new()
        .filter_level(args.verbose.log_level_filter())
        .init();

    log::info!("intercept-server {}", intercept_server::VERSION);

    let port = args.port;
    let session = Session::new(args);
    let shutdown_session = session.clone();

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("Web", move |subsys| async move {
            web::serve(subsys, session, port).await
        }));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(5))
    .await
    .map_err(|e| miette::miette!("{e}"))?;

    // Children die with the service, never orphaned.
    shutdown_session.shutdown().await;
    Ok(())
}
