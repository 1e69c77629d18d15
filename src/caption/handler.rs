use axum::{extract::State, Json};
use image::DynamicImage;
use tracing::debug;

use super::dto::{CaptionImageRequest, CaptionImageResponse};
use super::fetch::fetch_image_bytes;
use crate::api::{error::ApiError, AppState};

pub async fn caption_image(
    State(state): State<AppState>,
    Json(req): Json<CaptionImageRequest>,
) -> Result<Json<CaptionImageResponse>, ApiError> {
    // Fetch and decode failures collapse into one caller-facing error;
    // callers never learn whether the URL, the network, or the bytes were
    // at fault.
    let image = match load_image(&state.http, &req.image_url).await {
        Ok(image) => image,
        Err(err) => {
            debug!("image load failed for {}: {err:#}", req.image_url);
            return Err(ApiError::InvalidImageUrl);
        }
    };

    let caption = state.models.captioner.caption(&image).await?;

    Ok(Json(CaptionImageResponse { caption }))
}

async fn load_image(client: &reqwest::Client, url: &str) -> anyhow::Result<DynamicImage> {
    let bytes = fetch_image_bytes(client, url).await?;
    let image = image::load_from_memory(&bytes)?;
    Ok(image)
}

#[cfg(test)]
mod tests {
    #[test]
    fn garbage_bytes_do_not_decode() {
        assert!(image::load_from_memory(b"definitely not an image").is_err());
    }
}
