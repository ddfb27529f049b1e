use tracing::{info, info_span, Instrument};

use crate::stable_diffusion::{self, StableDiffusionVariant};
use crate::{DeviceContext, Error, LoadOptions, Loader, ModelInfo, ModelLike, Result, StableDiffusionLoader};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    StableDiffusion(StableDiffusionVariant),
}

impl ModelVariant {
    /// Detect model variant from the hub repository name. The 512px
    /// epsilon-prediction `2-1-base` checkpoints are not supported: the 2.1
    /// config denoises with v-prediction.
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name_upper = model_name.to_uppercase();

        if !name_upper.contains("STABLE-DIFFUSION") {
            return None;
        }
        if name_upper.contains("2-1") || name_upper.contains("2.1") {
            if name_upper.contains("BASE") {
                return None;
            }
            Some(ModelVariant::StableDiffusion(
                stable_diffusion::StableDiffusionVariant::V2_1,
            ))
        } else {
            Some(ModelVariant::StableDiffusion(
                stable_diffusion::StableDiffusionVariant::V1_5,
            ))
        }
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelVariant::StableDiffusion(v) => write!(f, "stable-diffusion-{v}"),
        }
    }
}

/// Load a model by hub name onto `device`. Every failure is reported as
/// [`Error::Load`].
pub async fn load_model(
    options: &LoadOptions,
    device: DeviceContext,
) -> Result<(Box<dyn ModelLike>, ModelInfo)> {
    let span = info_span!("loader", model_id = %options.model_id);
    async move {
        let variant = ModelVariant::from_name(&options.model_id)
            .ok_or_else(|| Error::Load(format!("unsupported model: {}", options.model_id)))?;

        info!(%variant, device = %device.info().device, "loading model");

        let device_info = device.info();
        let api = options
            .api()
            .map_err(|e| Error::Load(format!("{e:#}")))?;
        let model: Box<dyn ModelLike> = match variant {
            ModelVariant::StableDiffusion(_) => Box::new(
                StableDiffusionLoader::load(variant, options.model_id.clone(), api, device)
                    .await
                    .map_err(|e| Error::Load(format!("{e:#}")))?,
            ),
        };

        Ok((
            model,
            ModelInfo {
                model_id: options.model_id.clone(),
                variant: variant.to_string(),
                device_info,
            },
        ))
    }
    .instrument(span)
    .await
}
