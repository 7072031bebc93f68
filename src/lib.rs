//! Disposable webhook endpoints: capture inbound HTTP calls per webhook id,
//! inspect them over a JSON API, and follow new arrivals with a polling
//! change feed.

pub mod config;
pub mod docs;
pub mod events;
pub mod feed;
pub mod http_server;
pub mod ingest;
pub mod store;
pub mod templates;
pub mod types;

use config::Config;
use docs::OpenAiGenerator;
use http_server::AppState;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Wire the store, bus and documentation client for `config`.
pub fn build_state(config: Config) -> AppState {
    let generator = OpenAiGenerator::new(
        &config.openai_base_url,
        config.openai_api_key.clone(),
        &config.openai_model,
    );
    AppState::new(config, Arc::new(generator))
}

/// Serve until Ctrl-C.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.bind_addr;
    let app = http_server::build_router(build_state(config));
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "webhook tester listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
/// Logs go to stderr so command output on stdout stays clean.
pub fn init_tracing(json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
