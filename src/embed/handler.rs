use axum::{extract::State, Json};

use super::dto::{EmbedTextRequest, EmbedTextResponse, Embedding, TextInput};
use crate::api::{error::ApiError, AppState};
use crate::inference::embedder::{EMBEDDING_DIM, MODEL_NAME};

const MAX_TEXT_CHARS: usize = 5000;

pub async fn embed_text(
    State(state): State<AppState>,
    Json(req): Json<EmbedTextRequest>,
) -> Result<Json<EmbedTextResponse>, ApiError> {
    validate(&req.text)?;

    let embedder = &state.models.embedder;
    let embedding = match &req.text {
        TextInput::Single(text) => Embedding::Single(embedder.embed(text).await?),
        TextInput::Batch(texts) => {
            let mut vectors = Vec::with_capacity(texts.len());
            for text in texts {
                vectors.push(embedder.embed(text).await?);
            }
            Embedding::Batch(vectors)
        }
    };

    Ok(Json(EmbedTextResponse {
        embedding,
        dim: EMBEDDING_DIM,
        model: MODEL_NAME,
    }))
}

/// Oversized single strings are refused before any model call. Batch
/// elements are not individually checked.
fn validate(text: &TextInput) -> Result<(), ApiError> {
    match text {
        TextInput::Single(s) if s.chars().count() > MAX_TEXT_CHARS => {
            Err(ApiError::PayloadTooLarge("Text too long"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_single_string_is_rejected() {
        let result = validate(&TextInput::Single("x".repeat(MAX_TEXT_CHARS + 1)));
        assert!(matches!(result, Err(ApiError::PayloadTooLarge(_))));
    }

    #[test]
    fn limit_is_exclusive() {
        assert!(validate(&TextInput::Single("x".repeat(MAX_TEXT_CHARS))).is_ok());
    }

    #[test]
    fn batch_elements_are_not_length_checked() {
        let batch = TextInput::Batch(vec!["y".repeat(MAX_TEXT_CHARS * 2)]);
        assert!(validate(&batch).is_ok());
    }

    #[test]
    fn empty_inputs_pass_validation() {
        assert!(validate(&TextInput::Single(String::new())).is_ok());
        assert!(validate(&TextInput::Batch(Vec::new())).is_ok());
    }
}
