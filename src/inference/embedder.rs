use anyhow::{anyhow, Context, Result};
use candle::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use hf_hub::api::tokio::Api;
use std::fs;
use tokenizers::Tokenizer;
use tokio::sync::Mutex;

use super::mpnet::{MpnetConfig, MpnetModel};

pub const MODEL_NAME: &str = "all-mpnet-base-v2";
pub const MODEL_REPO: &str = "sentence-transformers/all-mpnet-base-v2";
pub const EMBEDDING_DIM: usize = 768;

/// Sentence embedder: MPNet forward pass, mean pooling over tokens, L2
/// normalization. Output vectors are unit length and cosine-comparable.
pub struct SentenceEmbedder {
    // The forward pass is pure, but access stays serialized to match the
    // captioner and keep device use predictable.
    model: Mutex<MpnetModel>,
    tokenizer: Tokenizer,
    device: Device,
    max_len: usize,
}

impl SentenceEmbedder {
    pub async fn load(device: &Device) -> Result<Self> {
        let api = Api::new().context("hub api init failed")?;
        let repo = api.model(MODEL_REPO.to_string());

        let tokenizer_path = repo
            .get("tokenizer.json")
            .await
            .context("failed to fetch embedder tokenizer.json")?;
        let config_path = repo
            .get("config.json")
            .await
            .context("failed to fetch embedder config.json")?;
        let weights_path = repo
            .get("model.safetensors")
            .await
            .context("failed to fetch embedder weights")?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Tokenizer load failed ({}): {e}", tokenizer_path.display()))?;
        tokenizer.with_padding(None);
        let _ = tokenizer.with_truncation(None);

        let config: MpnetConfig = serde_json::from_slice(&fs::read(&config_path)?)?;
        let max_len = config.max_position_embeddings.saturating_sub(2).max(16);

        println!("📁 Embedder snapshot: {}", weights_path.display());

        // Load weights (mmaped)
        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)? };
        let model = MpnetModel::load(vb, &config)?;

        println!("🚀 Loaded {MODEL_NAME} on {device:?}");

        Ok(Self {
            model: Mutex::new(model),
            tokenizer,
            device: device.clone(),
            max_len,
        })
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let enc = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow!("tokenizer encode error: {e}"))?;

        let mut ids = enc.get_ids().to_vec();
        if ids.is_empty() {
            ids.push(0);
        }
        truncate_with_separator(&mut ids, self.max_len);
        let seq_len = ids.len();

        let input_ids = Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?;

        let hidden = {
            let model = self.model.lock().await;
            model.forward(&input_ids)?
        };

        // (1, seq, hidden) -> mean over the token axis, then unit length.
        let pooled = (hidden.sum(1)? / seq_len as f64)?;
        let vector = pooled.squeeze(0)?.to_vec1::<f32>()?;

        Ok(l2_normalize(vector))
    }
}

/// Clamp overlong sequences without losing the trailing separator token, so
/// a truncated sequence still ends the way the model expects.
fn truncate_with_separator(ids: &mut Vec<u32>, max_len: usize) {
    if ids.len() > max_len {
        if let Some(&sep) = ids.last() {
            ids.truncate(max_len - 1);
            ids.push(sep);
        }
    }
}

pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_vectors_are_unit_length() {
        let v = l2_normalize(vec![3.0, 4.0]);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_stays_zero() {
        assert_eq!(l2_normalize(vec![0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn truncation_keeps_the_separator() {
        // 0 = <s>, 2 = </s> in the MPNet vocab.
        let mut ids: Vec<u32> = std::iter::once(0)
            .chain(100..700)
            .chain(std::iter::once(2))
            .collect();
        truncate_with_separator(&mut ids, 512);
        assert_eq!(ids.len(), 512);
        assert_eq!(ids[0], 0);
        assert_eq!(*ids.last().unwrap(), 2);
        assert_eq!(ids[510], 100 + 509);
    }

    #[test]
    fn short_sequences_are_untouched() {
        let mut ids = vec![0, 42, 2];
        truncate_with_separator(&mut ids, 512);
        assert_eq!(ids, vec![0, 42, 2]);
    }
}
