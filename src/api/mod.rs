use std::sync::Arc;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

pub mod error;

use crate::caption::handler::caption_image;
use crate::embed::handler::embed_text;
use crate::inference::ModelSet;

/// Shared application state, constructed once at startup and handed to every
/// handler through axum `State`.
#[derive(Clone)]
pub struct AppState {
    pub models: Arc<ModelSet>,
    pub http: reqwest::Client,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/embed/text", post(embed_text))
        .route("/caption/image", post(caption_image))
        .route("/", get(health))
}

/// Liveness probe. Intentionally independent of the model handles.
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_is_constant() {
        let Json(body) = health().await;
        assert_eq!(body, json!({ "status": "ok" }));
    }
}
