use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trawlarr::app::App;
use trawlarr::config::Config;
use trawlarr::web;

#[derive(Parser)]
#[command(name = "trawlarr")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Meta-search aggregator for scrape-based media indexers")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "trawlarr.yml")]
    config: PathBuf,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,

    /// Print the effective configuration (secrets masked) and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("trawlarr={}", cli.log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        "starting {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let mut config = Config::load(&cli.config)?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    if cli.print_config {
        print!("{}", config.to_redacted_yaml()?);
        return Ok(());
    }

    let app = App::build(config).await?;

    // Bind first so readiness only flips on once the port is actually
    // held; then start background services.
    let listener = web::bind(&app).await?;
    let server = tokio::spawn(web::serve_on(listener, app.clone()));
    let _background = app.spawn_background();

    shutdown_signal().await;
    app.shutdown().await;

    server.await??;
    info!("bye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("installing ctrl-c handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received sigterm"),
    }
}
