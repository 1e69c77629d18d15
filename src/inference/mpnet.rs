use candle::{Device, Result, Tensor, D};
use candle_nn::{
    embedding, layer_norm, linear, ops::softmax, Embedding, LayerNorm, Linear, Module, VarBuilder,
};
use serde::Deserialize;

// Bucketing horizon for the relative-position bias.
const RELATIVE_ATTENTION_MAX_DISTANCE: usize = 128;

/// MPNet encoder configuration, parsed straight from the checkpoint's
/// config.json. MPNet has no token-type vocabulary; positions are encoded
/// absolutely in the embeddings and relatively in the attention bias.
#[derive(Debug, Clone, Deserialize)]
pub struct MpnetConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    pub intermediate_size: usize,
    pub layer_norm_eps: f64,
    pub max_position_embeddings: usize,
    pub pad_token_id: u32,
    pub relative_attention_num_buckets: usize,
}

struct MpnetEmbeddings {
    word_embeddings: Embedding,
    position_embeddings: Embedding,
    layer_norm: LayerNorm,
    pad_token_id: u32,
}

impl MpnetEmbeddings {
    fn load(vb: VarBuilder, config: &MpnetConfig) -> Result<Self> {
        Ok(Self {
            word_embeddings: embedding(
                config.vocab_size,
                config.hidden_size,
                vb.pp("word_embeddings"),
            )?,
            position_embeddings: embedding(
                config.max_position_embeddings,
                config.hidden_size,
                vb.pp("position_embeddings"),
            )?,
            layer_norm: layer_norm(config.hidden_size, config.layer_norm_eps, vb.pp("LayerNorm"))?,
            pad_token_id: config.pad_token_id,
        })
    }

    fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (_batch, seq_len) = input_ids.dims2()?;
        // Unpadded single sequences, so position ids count up from
        // pad_id + 1 the way the checkpoint was trained.
        let positions: Vec<u32> = (0..seq_len as u32)
            .map(|i| self.pad_token_id + 1 + i)
            .collect();
        let position_ids = Tensor::new(positions.as_slice(), input_ids.device())?.unsqueeze(0)?;
        let embeddings = (self.word_embeddings.forward(input_ids)?
            + self.position_embeddings.forward(&position_ids)?)?;
        self.layer_norm.forward(&embeddings)
    }
}

struct MpnetSelfAttention {
    q: Linear,
    k: Linear,
    v: Linear,
    o: Linear,
    num_heads: usize,
    head_dim: usize,
}

impl MpnetSelfAttention {
    fn load(vb: VarBuilder, config: &MpnetConfig) -> Result<Self> {
        let hidden = config.hidden_size;
        Ok(Self {
            q: linear(hidden, hidden, vb.pp("q"))?,
            k: linear(hidden, hidden, vb.pp("k"))?,
            v: linear(hidden, hidden, vb.pp("v"))?,
            o: linear(hidden, hidden, vb.pp("o"))?,
            num_heads: config.num_attention_heads,
            head_dim: hidden / config.num_attention_heads,
        })
    }

    fn forward(&self, hidden: &Tensor, position_bias: &Tensor) -> Result<Tensor> {
        let (batch, seq_len, _) = hidden.dims3()?;
        let split = |t: &Tensor| -> Result<Tensor> {
            t.reshape((batch, seq_len, self.num_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = split(&self.q.forward(hidden)?)?;
        let k = split(&self.k.forward(hidden)?)?;
        let v = split(&self.v.forward(hidden)?)?;

        let scale = (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.transpose(2, 3)?.contiguous()?)? / scale)?;
        let scores = scores.broadcast_add(position_bias)?;
        let probs = softmax(&scores, D::Minus1)?;

        let context = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq_len, self.num_heads * self.head_dim))?;
        self.o.forward(&context)
    }
}

struct MpnetLayer {
    attention: MpnetSelfAttention,
    attention_layer_norm: LayerNorm,
    intermediate: Linear,
    output: Linear,
    output_layer_norm: LayerNorm,
}

impl MpnetLayer {
    fn load(vb: VarBuilder, config: &MpnetConfig) -> Result<Self> {
        let attention_vb = vb.pp("attention");
        Ok(Self {
            attention: MpnetSelfAttention::load(attention_vb.pp("attn"), config)?,
            attention_layer_norm: layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                attention_vb.pp("LayerNorm"),
            )?,
            intermediate: linear(
                config.hidden_size,
                config.intermediate_size,
                vb.pp("intermediate").pp("dense"),
            )?,
            output: linear(
                config.intermediate_size,
                config.hidden_size,
                vb.pp("output").pp("dense"),
            )?,
            output_layer_norm: layer_norm(
                config.hidden_size,
                config.layer_norm_eps,
                vb.pp("output").pp("LayerNorm"),
            )?,
        })
    }

    fn forward(&self, hidden: &Tensor, position_bias: &Tensor) -> Result<Tensor> {
        let attn = self.attention.forward(hidden, position_bias)?;
        let hidden = self.attention_layer_norm.forward(&(attn + hidden)?)?;
        let intermediate = self.intermediate.forward(&hidden)?.gelu_erf()?;
        let output = self.output.forward(&intermediate)?;
        self.output_layer_norm.forward(&(output + hidden)?)
    }
}

/// MPNet encoder. Weight names follow the checkpoint layout:
/// `embeddings.*`, `encoder.layer.N.attention.attn.{q,k,v,o}`,
/// `encoder.relative_attention_bias`.
pub struct MpnetModel {
    embeddings: MpnetEmbeddings,
    layers: Vec<MpnetLayer>,
    relative_attention_bias: Embedding,
    num_buckets: usize,
}

impl MpnetModel {
    pub fn load(vb: VarBuilder, config: &MpnetConfig) -> Result<Self> {
        let embeddings = MpnetEmbeddings::load(vb.pp("embeddings"), config)?;
        let encoder_vb = vb.pp("encoder");
        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for index in 0..config.num_hidden_layers {
            layers.push(MpnetLayer::load(
                encoder_vb.pp(format!("layer.{index}")),
                config,
            )?);
        }
        let relative_attention_bias = embedding(
            config.relative_attention_num_buckets,
            config.num_attention_heads,
            encoder_vb.pp("relative_attention_bias"),
        )?;
        Ok(Self {
            embeddings,
            layers,
            relative_attention_bias,
            num_buckets: config.relative_attention_num_buckets,
        })
    }

    /// Last hidden state, shape (batch, seq, hidden).
    pub fn forward(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (_batch, seq_len) = input_ids.dims2()?;
        let position_bias = self.position_bias(seq_len, input_ids.device())?;
        let mut hidden = self.embeddings.forward(input_ids)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, &position_bias)?;
        }
        Ok(hidden)
    }

    // (1, heads, seq, seq) additive bias shared by every layer.
    fn position_bias(&self, seq_len: usize, device: &Device) -> Result<Tensor> {
        let mut buckets = Vec::with_capacity(seq_len * seq_len);
        for i in 0..seq_len {
            for j in 0..seq_len {
                buckets.push(relative_position_bucket(
                    j as i64 - i as i64,
                    self.num_buckets,
                    RELATIVE_ATTENTION_MAX_DISTANCE,
                ));
            }
        }
        let bucket_ids = Tensor::new(buckets.as_slice(), device)?.reshape((seq_len, seq_len))?;
        let values = self.relative_attention_bias.forward(&bucket_ids)?;
        values.permute((2, 0, 1))?.unsqueeze(0)
    }
}

/// Bidirectional T5-style bucketing of `key_pos - query_pos`: half the
/// buckets for each direction, exact below `num_buckets / 4`, logarithmic up
/// to `max_distance`, clamped beyond.
fn relative_position_bucket(relative_position: i64, num_buckets: usize, max_distance: usize) -> u32 {
    let half_buckets = num_buckets as i64 / 2;
    let n = -relative_position;
    let mut bucket = if n < 0 { half_buckets } else { 0 };
    let n = n.abs();
    let max_exact = half_buckets / 2;
    bucket += if n < max_exact {
        n
    } else {
        let log_ratio = ((n as f64 / max_exact as f64).ln()
            / (max_distance as f64 / max_exact as f64).ln())
            * (half_buckets - max_exact) as f64;
        (max_exact + log_ratio as i64).min(half_buckets - 1)
    };
    bucket as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    // The published all-mpnet-base-v2 config. Notably there is no
    // type_vocab_size field, so the config type must not require one.
    const MPNET_CONFIG_JSON: &str = r#"{
        "_name_or_path": "microsoft/mpnet-base",
        "architectures": ["MPNetModel"],
        "attention_probs_dropout_prob": 0.1,
        "bos_token_id": 0,
        "eos_token_id": 2,
        "hidden_act": "gelu",
        "hidden_dropout_prob": 0.1,
        "hidden_size": 768,
        "initializer_range": 0.02,
        "intermediate_size": 3072,
        "layer_norm_eps": 1e-05,
        "max_position_embeddings": 514,
        "model_type": "mpnet",
        "num_attention_heads": 12,
        "num_hidden_layers": 12,
        "pad_token_id": 1,
        "relative_attention_num_buckets": 32,
        "torch_dtype": "float32",
        "transformers_version": "4.8.2",
        "vocab_size": 30527
    }"#;

    #[test]
    fn parses_the_published_checkpoint_config() {
        let config: MpnetConfig = serde_json::from_str(MPNET_CONFIG_JSON).unwrap();
        assert_eq!(config.hidden_size, 768);
        assert_eq!(config.num_hidden_layers, 12);
        assert_eq!(config.max_position_embeddings, 514);
        assert_eq!(config.pad_token_id, 1);
        assert_eq!(config.relative_attention_num_buckets, 32);
        assert_eq!(config.vocab_size, 30527);
    }

    #[test]
    fn buckets_split_by_direction() {
        // Same token.
        assert_eq!(relative_position_bucket(0, 32, 128), 0);
        // One step back vs one step forward land in different halves.
        assert_eq!(relative_position_bucket(-1, 32, 128), 1);
        assert_eq!(relative_position_bucket(1, 32, 128), 17);
    }

    #[test]
    fn buckets_saturate_at_long_range() {
        assert_eq!(relative_position_bucket(-10_000, 32, 128), 15);
        assert_eq!(relative_position_bucket(10_000, 32, 128), 31);
    }

    #[test]
    fn buckets_grow_logarithmically_past_the_exact_range() {
        let near = relative_position_bucket(-7, 32, 128);
        let mid = relative_position_bucket(-20, 32, 128);
        let far = relative_position_bucket(-100, 32, 128);
        assert_eq!(near, 7);
        assert!(near < mid && mid < far && far <= 15);
    }
}
