mod extract;
mod handlers;
mod router;

use std::{
    fs::File,
    io::BufReader,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    extract::FromRef,
    http::StatusCode,
};
use pr_ci_core::{ci::CiServices, config::Config};
use tokio::{net::TcpListener, signal};
use tower::ServiceBuilder;
use tower_http::{
    normalize_path::NormalizePathLayer,
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(Clone, FromRef)]
pub struct AppState {
    config: Arc<Config>,
    ci: CiServices,
}

#[tokio::main]
async fn main() {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let config: Arc<Config> = {
        let file = BufReader::new(File::open("config.yml").expect("Failed to open config file"));
        serde_yaml::from_reader(file).expect("Failed to parse config file")
    };
    let ci = pr_ci_aws::connect(&config.aws).await;
    let state = AppState { config: config.clone(), ci };

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.server.port));
    tracing::info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await.expect("bind error");
    if let Err(e) =
        axum::serve(listener, app(state)).with_graceful_shutdown(shutdown_signal()).await
    {
        tracing::error!("{e:?}");
    }
    tracing::info!("Shut down gracefully");
}

fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        ))
        .layer(NormalizePathLayer::trim_trailing_slash());
    handlers::build_router().with_state(state).layer(middleware)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler");
        tokio::select! {
            _ = signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("Failed to install signal handler");
    }
}
