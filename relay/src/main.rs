use args::Args;
use clap::Parser;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logger::init(&args);

    let config = relay_config::Config::load(args.config.as_deref(), &args.overrides())?;

    log::info!(
        backend = config.backend_base_url.as_str(),
        listen = args.listen_addr.as_str();
        "starting relay"
    );

    let state = relay_core::RelayState::new(config)?;
    let router = relay_core::router(state);

    let listener = tokio::net::TcpListener::bind(&args.listen_addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    log::info!("shutdown signal received, draining in-flight requests");
}
