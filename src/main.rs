use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod caption;
mod embed;
mod inference;

use api::AppState;
use inference::ModelSet;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // -----------------------------
    // Logging
    // -----------------------------
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("🚀 Starting Socinx AI service...");

    // -----------------------------
    // Models (loaded once, fatal on failure)
    // -----------------------------
    let device = inference::device()?;
    let models = Arc::new(ModelSet::load(&device).await?);
    println!("🧠 Models ready on {:?}", models.device);

    // Outbound client for image fetches. The 5s budget covers the whole
    // request, not just the connect.
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let state = AppState { models, http };

    // -----------------------------
    // Router
    // -----------------------------
    let app = Router::new()
        .merge(api::router())
        // CORS for frontend
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state);

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".into());

    println!("🌐 HTTP listening on http://{addr}");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
