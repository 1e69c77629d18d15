use anyhow::Result;
use candle::Device;
use tracing::warn;

pub mod captioner;
pub mod embedder;
pub mod mpnet;

use captioner::BlipCaptioner;
use embedder::SentenceEmbedder;

/// Process-wide model handles, loaded once before the server accepts
/// traffic and never replaced afterwards.
pub struct ModelSet {
    pub embedder: SentenceEmbedder,
    pub captioner: BlipCaptioner,
    pub device: Device,
}

impl ModelSet {
    /// Any load failure is fatal: the process must not come up with a
    /// missing model.
    pub async fn load(device: &Device) -> Result<Self> {
        let embedder = SentenceEmbedder::load(device).await?;
        let captioner = BlipCaptioner::load(device).await?;
        Ok(Self {
            embedder,
            captioner,
            device: device.clone(),
        })
    }
}

/// CUDA when compiled in and present, otherwise CPU.
pub fn device() -> Result<Device> {
    let device = Device::cuda_if_available(0)?;
    if !device.is_cuda() {
        warn!("CUDA unavailable, running inference on CPU");
    }
    Ok(device)
}
