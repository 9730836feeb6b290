use std::net::SocketAddr;
use std::sync::Arc;

use axum::{http::Method, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;
mod store;

use config::AppConfig;
use services::mpesa_service::MpesaService;
use state::AppState;
use store::MemoryStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Environment: {}", config.mpesa_environment);
    tracing::info!("Callback URL: {}", config.mpesa_callback_url);

    let app_state = match initialize_app_state(config.clone()) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to initialize services: {}", e);
            std::process::exit(1);
        }
    };

    let app = build_router(app_state);
    start_server(app, &config).await;
}

fn initialize_app_state(config: AppConfig) -> errors::Result<AppState> {
    let mpesa = Arc::new(MpesaService::new(config)?);
    let store = Arc::new(MemoryStore::new());
    Ok(AppState::new(mpesa, store))
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    routes::payments::routes()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn start_server(app: Router, config: &AppConfig) {
    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid HOST/PORT: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!("Server starting on {}", addr);

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}
