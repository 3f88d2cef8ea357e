use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use ops_console::api;
use ops_console::config::ConsoleConfig;
use ops_console::console::Console;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConsoleConfig::from_env();

    // Initialize tracing, with an optional daily-rolled log file
    let (file_layer, _guard) = match config.log_dir.as_deref() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "ops-console.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_target(false).with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    let port = config.http_port;
    eprintln!("🛠  Ops Console v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Backend: {}",
        if config.api_key.is_some() {
            format!("live ({})", config.model)
        } else {
            "simulated".to_string()
        }
    );
    eprintln!(
        "   Simulated traffic: {}",
        if config.simulation.enabled {
            format!(
                "every {}s, p={}",
                config.simulation.interval.as_secs(),
                config.simulation.probability
            )
        } else {
            "disabled".to_string()
        }
    );
    eprintln!(
        "   Gmail: {}",
        if config.gmail_token.is_some() {
            "token provided"
        } else {
            "not connected"
        }
    );
    eprintln!("   API: http://0.0.0.0:{}/api/tasks", port);
    eprintln!("   Events WS: ws://0.0.0.0:{}/ws/events\n", port);

    let console = Console::new(config);
    console.start().await;

    let app = api::routes(console.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind HTTP port {port}"))?;
    tracing::info!(port, "HTTP server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;

    console.shutdown().await;
    Ok(())
}
