use anyhow::{anyhow, Context, Result};
use candle::{DType, Device, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::blip::{self, BlipForConditionalGeneration};
use hf_hub::api::tokio::Api;
use image::{imageops::FilterType, DynamicImage};
use tokenizers::Tokenizer;
use tokio::sync::Mutex;

pub const MODEL_REPO: &str = "Salesforce/blip-image-captioning-base";

const IMAGE_SIZE: usize = 384;
// CLIP-style channel statistics used by the BLIP image processor.
const IMAGE_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
const IMAGE_STD: [f32; 3] = [0.268_629_54, 0.261_302_58, 0.275_777_11];

// Decoder start ([DEC]) and end ([SEP]) ids in the BLIP text vocab.
const BOS_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;

const NUM_BEAMS: usize = 3;
const MAX_NEW_TOKENS: usize = 50;

/// BLIP image captioner: vision encoder once per image, then beam search
/// over the text decoder.
pub struct BlipCaptioner {
    // The decoder mutates its kv cache on every forward, so the whole model
    // sits behind a lock and requests take turns.
    model: Mutex<BlipForConditionalGeneration>,
    tokenizer: Tokenizer,
    device: Device,
}

impl BlipCaptioner {
    pub async fn load(device: &Device) -> Result<Self> {
        let api = Api::new().context("hub api init failed")?;
        let repo = api.model(MODEL_REPO.to_string());

        let tokenizer_path = repo
            .get("tokenizer.json")
            .await
            .context("failed to fetch captioner tokenizer.json")?;
        let weights_path = repo
            .get("model.safetensors")
            .await
            .context("failed to fetch captioner weights")?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Tokenizer load failed ({}): {e}", tokenizer_path.display()))?;

        let config = image_captioning_base_config();

        println!("📁 Captioner snapshot: {}", weights_path.display());

        let vb =
            unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)? };
        let model = BlipForConditionalGeneration::new(&config, vb)?;

        println!("🚀 Loaded BLIP captioner on {device:?}");

        Ok(Self {
            model: Mutex::new(model),
            tokenizer,
            device: device.clone(),
        })
    }

    pub async fn caption(&self, image: &DynamicImage) -> Result<String> {
        let pixels = preprocess(image, &self.device)?;

        let mut model = self.model.lock().await;
        let image_embeds = pixels.unsqueeze(0)?.apply(model.vision_model())?;
        let tokens = beam_search(&mut model, &image_embeds, NUM_BEAMS, MAX_NEW_TOKENS)?;

        let caption = self
            .tokenizer
            .decode(&tokens, true)
            .map_err(|e| anyhow!("token decode error: {e}"))?;

        Ok(caption.trim().to_string())
    }
}

/// The base checkpoint's config. Same layout as the packaged large config,
/// with the smaller vision tower and the text cross-attention sized to it
/// (per the base repo's config.json).
fn image_captioning_base_config() -> blip::Config {
    let mut config = blip::Config::image_captioning_large();
    config.vision_config.hidden_size = 768;
    config.vision_config.intermediate_size = 3072;
    config.vision_config.num_hidden_layers = 12;
    config.vision_config.num_attention_heads = 12;
    config.text_config.encoder_hidden_size = 768;
    config
}

/// Resize to 384x384, RGB, scale to [0,1], normalize per channel. Returns a
/// (3, 384, 384) f32 tensor on the target device.
pub fn preprocess(image: &DynamicImage, device: &Device) -> Result<Tensor> {
    let img = image
        .resize_exact(IMAGE_SIZE as u32, IMAGE_SIZE as u32, FilterType::Triangle)
        .to_rgb8();

    let pixels = Tensor::from_vec(img.into_raw(), (IMAGE_SIZE, IMAGE_SIZE, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?;

    let mean = Tensor::new(&IMAGE_MEAN, device)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&IMAGE_STD, device)?.reshape((3, 1, 1))?;

    let normalized = (pixels / 255.0)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?;

    Ok(normalized)
}

#[derive(Debug, Clone)]
struct Beam {
    // Includes the leading [DEC] token; the terminating [SEP] is never
    // stored.
    tokens: Vec<u32>,
    // Summed log-probability of the generated tokens.
    score: f32,
    finished: bool,
}

fn beam_search(
    model: &mut BlipForConditionalGeneration,
    image_embeds: &Tensor,
    num_beams: usize,
    max_new_tokens: usize,
) -> Result<Vec<u32>> {
    let device = image_embeds.device();
    let mut beams = vec![Beam {
        tokens: vec![BOS_TOKEN_ID],
        score: 0.0,
        finished: false,
    }];

    for _ in 0..max_new_tokens {
        if beams.iter().all(|b| b.finished) {
            break;
        }

        let mut candidates = Vec::with_capacity(beams.len() * num_beams);
        for beam in &beams {
            if beam.finished {
                candidates.push(beam.clone());
                continue;
            }

            // Rescore the full prefix each step so the per-beam kv caches
            // cannot interleave.
            model.reset_kv_cache();
            let input_ids = Tensor::new(beam.tokens.as_slice(), device)?.unsqueeze(0)?;
            let logits = model.text_decoder().forward(&input_ids, image_embeds)?;
            let logits = logits.squeeze(0)?;
            let last = logits.get(logits.dim(0)? - 1)?;
            let log_probs = candle_nn::ops::log_softmax(&last, D::Minus1)?.to_vec1::<f32>()?;

            for (token, lp) in top_k(&log_probs, num_beams) {
                let mut tokens = beam.tokens.clone();
                let finished = token == SEP_TOKEN_ID;
                if !finished {
                    tokens.push(token);
                }
                candidates.push(Beam {
                    tokens,
                    score: beam.score + lp,
                    finished,
                });
            }
        }

        beams = prune(candidates, num_beams);
    }

    let best = beams
        .into_iter()
        .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
        .ok_or_else(|| anyhow!("beam search produced no candidates"))?;

    Ok(best.tokens[1..].to_vec())
}

fn prune(mut candidates: Vec<Beam>, num_beams: usize) -> Vec<Beam> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates.truncate(num_beams);
    candidates
}

fn top_k(log_probs: &[f32], k: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = log_probs
        .iter()
        .enumerate()
        .map(|(i, &p)| (i as u32, p))
        .collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    indexed.truncate(k);
    indexed
}
