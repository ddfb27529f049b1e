use std::path::PathBuf;

use anyhow::{Context, Error as E, Result};
use candle_core::{DType, Tensor};
use candle_nn::Module;
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use hf_hub::api::tokio::Api;
use tokenizers::Tokenizer;
use tracing::{debug, info, Span};

mod sampling;

use crate::{
    latent_noise, tensor_to_image, DeviceContext, GeneratedImage, GenerationRequest, Loader,
    ModelLike, ModelVariant,
};

const TOKENIZER_REPO: &str = "openai/clip-vit-base-patch32";
/// Both supported variants use a 4-channel latent space.
const LATENT_CHANNELS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StableDiffusionVariant {
    V1_5,
    V2_1,
}

impl StableDiffusionVariant {
    /// Config with attention slicing disabled.
    fn config(&self) -> StableDiffusionConfig {
        match self {
            Self::V1_5 => StableDiffusionConfig::v1_5(None, None, None),
            Self::V2_1 => StableDiffusionConfig::v2_1(None, None, None),
        }
    }
}

impl std::fmt::Display for StableDiffusionVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V1_5 => f.write_str("v1.5"),
            Self::V2_1 => f.write_str("v2.1"),
        }
    }
}

/// Weight file names inside a diffusers-layout repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WeightFile {
    TextEncoder,
    Unet,
    Vae,
}

impl WeightFile {
    fn path(&self, dtype: DType) -> &'static str {
        let half = dtype == DType::F16;
        match (self, half) {
            (Self::TextEncoder, false) => "text_encoder/model.safetensors",
            (Self::TextEncoder, true) => "text_encoder/model.fp16.safetensors",
            (Self::Unet, false) => "unet/diffusion_pytorch_model.safetensors",
            (Self::Unet, true) => "unet/diffusion_pytorch_model.fp16.safetensors",
            (Self::Vae, false) => "vae/diffusion_pytorch_model.safetensors",
            (Self::Vae, true) => "vae/diffusion_pytorch_model.fp16.safetensors",
        }
    }
}

pub struct StableDiffusionModel {
    device: DeviceContext,
    config: StableDiffusionConfig,
    tokenizer: Tokenizer,
    pad_id: u32,
    text_model: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
}

impl StableDiffusionModel {
    fn encode_prompt(&self, prompt: &str) -> candle_core::Result<Tensor> {
        let max_len = self.config.clip.max_position_embeddings;
        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(candle_core::Error::msg)?
            .get_ids()
            .to_vec();
        if tokens.len() > max_len {
            debug!(tokens = tokens.len(), max_len, "truncating prompt tokens");
            tokens.truncate(max_len);
        }
        tokens.resize(max_len, self.pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.device.device)?.unsqueeze(0)?;
        self.text_model.forward(&tokens)
    }

    /// Prompt embeddings, preceded by the empty-prompt embeddings when
    /// classifier-free guidance is on.
    fn text_embeddings(&self, prompt: &str, use_guidance: bool) -> candle_core::Result<Tensor> {
        let text_embeddings = self.encode_prompt(prompt)?;
        let text_embeddings = if use_guidance {
            let uncond_embeddings = self.encode_prompt("")?;
            Tensor::cat(&[uncond_embeddings, text_embeddings], 0)?
        } else {
            text_embeddings
        };
        text_embeddings.to_dtype(self.device.dtype)
    }
}

impl ModelLike for StableDiffusionModel {
    fn run(&mut self, request: &GenerationRequest) -> crate::Result<GeneratedImage> {
        let use_guidance = request.guidance_scale > 1.0;
        let text_embeddings = self.text_embeddings(&request.prompt, use_guidance)?;

        let mut scheduler = self.config.build_scheduler(request.steps)?;

        let noise = latent_noise(
            (1, LATENT_CHANNELS, request.height / 8, request.width / 8),
            request.seed,
            &self.device.device,
        )?;
        let latents = (noise * scheduler.init_noise_sigma())?.to_dtype(self.device.dtype)?;

        let latents = sampling::denoise(
            &self.unet,
            scheduler.as_mut(),
            latents,
            &text_embeddings,
            use_guidance.then_some(request.guidance_scale),
        )?;
        debug!("generated latent image");

        let img = sampling::decode(&self.vae, &latents)?;
        debug!("decoded image");

        tensor_to_image(&img)
    }
}

pub struct StableDiffusionLoader;

impl Loader for StableDiffusionLoader {
    type Model = StableDiffusionModel;

    async fn load(
        variant: ModelVariant,
        model_id: String,
        api: Api,
        device: DeviceContext,
    ) -> Result<Self::Model> {
        let ModelVariant::StableDiffusion(sd_variant) = variant;
        let dtype = device.dtype;

        // --- Download tokenizer and weights ---
        let tokenizer_file = api
            .model(TOKENIZER_REPO.to_string())
            .get("tokenizer.json")
            .await
            .context("failed to get CLIP tokenizer")?;
        let repo = api.model(model_id.clone());
        let clip_weights = repo
            .get(WeightFile::TextEncoder.path(dtype))
            .await
            .with_context(|| format!("failed to get text encoder weights from {model_id}"))?;
        let unet_weights = repo
            .get(WeightFile::Unet.path(dtype))
            .await
            .with_context(|| format!("failed to get UNet weights from {model_id}"))?;
        let vae_weights = repo
            .get(WeightFile::Vae.path(dtype))
            .await
            .with_context(|| format!("failed to get VAE weights from {model_id}"))?;

        // --- Build on a blocking thread; weight loading is CPU bound ---
        let files = PipelineFiles {
            tokenizer: tokenizer_file,
            clip: clip_weights,
            unet: unet_weights,
            vae: vae_weights,
        };
        let span = Span::current();
        tokio::task::spawn_blocking(move || span.in_scope(|| build_pipeline(sd_variant, device, files)))
            .await
            .context("pipeline build task failed")?
    }
}

struct PipelineFiles {
    tokenizer: PathBuf,
    clip: PathBuf,
    unet: PathBuf,
    vae: PathBuf,
}

fn build_pipeline(
    sd_variant: StableDiffusionVariant,
    device: DeviceContext,
    files: PipelineFiles,
) -> Result<StableDiffusionModel> {
    let dtype = device.dtype;

    // --- Tokenizer ---
    let config = sd_variant.config();
    let tokenizer = Tokenizer::from_file(files.tokenizer)
        .map_err(E::msg)
        .context("failed to load CLIP tokenizer")?;
    let pad_token = config.clip.pad_with.as_deref().unwrap_or("<|endoftext|>");
    let pad_id = *tokenizer
        .get_vocab(true)
        .get(pad_token)
        .with_context(|| format!("tokenizer has no padding token {pad_token}"))?;

    // --- Models ---
    info!(%sd_variant, dtype = dtype.as_str(), "building pipeline");
    let text_model = stable_diffusion::build_clip_transformer(
        &config.clip,
        files.clip,
        &device.device,
        dtype,
    )
    .context("failed to load CLIP text model")?;
    let unet = config
        .build_unet(
            files.unet,
            &device.device,
            LATENT_CHANNELS,
            cfg!(feature = "flash-attn"),
            dtype,
        )
        .context("failed to load UNet")?;
    let vae = config
        .build_vae(files.vae, &device.device, dtype)
        .context("failed to load VAE")?;

    Ok(StableDiffusionModel {
        device,
        config,
        tokenizer,
        pad_id,
        text_model,
        unet,
        vae,
    })
}
