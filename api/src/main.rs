use api::routes::routes;
use api::state::AppState;
use axum::Router;
use common::config::Config;
use std::net::SocketAddr;
use std::path::Path;
use tower_http::cors::CorsLayer;
use tracing_appender::{non_blocking::WorkerGuard, rolling};

#[tokio::main]
async fn main() {
    let config = Config::init();
    let _log_guard = init_logging(&config.log_file, &config.log_level);

    let state = AppState::init(config);

    let app = Router::new()
        .nest("/api", routes(state))
        .layer(CorsLayer::very_permissive());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid address");

    println!(
        "Starting {} on http://{}:{}",
        config.project_name, config.host, config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind address");
    axum::serve(listener, app).await.expect("Server error");
}

fn init_logging(log_file: &str, log_level: &str) -> WorkerGuard {
    let path = Path::new(log_file);
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| "api.log".into());

    let file_appender = rolling::daily(dir, file);
    let (writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();

    guard
}
