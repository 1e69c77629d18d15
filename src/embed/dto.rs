use serde::{Deserialize, Serialize};

/// `text` accepts either one string or an ordered batch of strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TextInput {
    Single(String),
    Batch(Vec<String>),
}

#[derive(Debug, Deserialize)]
pub struct EmbedTextRequest {
    pub text: TextInput,
}

/// Mirrors the input shape: one vector for one string, a list of vectors for
/// a batch.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Embedding {
    Single(Vec<f32>),
    Batch(Vec<Vec<f32>>),
}

#[derive(Debug, Serialize)]
pub struct EmbedTextResponse {
    pub embedding: Embedding,
    pub dim: usize,
    pub model: &'static str,
}
