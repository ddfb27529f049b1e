use candle_core::{DType, Device, Result, Tensor};
use candle_transformers::models::stable_diffusion::{
    schedulers::Scheduler, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
};
use tracing::debug;

/// Latent scaling used by the Stable Diffusion VAE.
pub const VAE_SCALE: f64 = 0.18215;

/// Runs the scheduler's timesteps over `latents`. With a guidance scale the
/// batch is doubled and the unconditional prediction is pushed towards the
/// text-conditioned one.
pub fn denoise(
    unet: &UNet2DConditionModel,
    scheduler: &mut dyn Scheduler,
    mut latents: Tensor,
    text_embeddings: &Tensor,
    guidance_scale: Option<f64>,
) -> Result<Tensor> {
    let timesteps = scheduler.timesteps().to_vec();
    for (timestep_index, &timestep) in timesteps.iter().enumerate() {
        let latent_model_input = if guidance_scale.is_some() {
            Tensor::cat(&[&latents, &latents], 0)?
        } else {
            latents.clone()
        };
        let latent_model_input = scheduler.scale_model_input(latent_model_input, timestep)?;
        let noise_pred = unet.forward(&latent_model_input, timestep as f64, text_embeddings)?;

        let noise_pred = match guidance_scale {
            Some(guidance_scale) => {
                let noise_pred = noise_pred.chunk(2, 0)?;
                let (noise_pred_uncond, noise_pred_text) = (&noise_pred[0], &noise_pred[1]);
                (noise_pred_uncond + ((noise_pred_text - noise_pred_uncond)? * guidance_scale)?)?
            }
            None => noise_pred,
        };

        latents = scheduler.step(&noise_pred, timestep, &latents)?;
        debug!(step = timestep_index + 1, total = timesteps.len(), timestep, "denoising step");
    }
    Ok(latents)
}

/// Decodes latents into a u8 image tensor of shape (3, height, width) on the CPU.
pub fn decode(vae: &AutoEncoderKL, latents: &Tensor) -> Result<Tensor> {
    let images = vae.decode(&(latents / VAE_SCALE)?)?;
    to_pixels(&images)
}

/// Maps a decoded (1, 3, h, w) batch from [-1, 1] to [0, 255].
pub fn to_pixels(images: &Tensor) -> Result<Tensor> {
    let images = images.to_dtype(DType::F32)?.to_device(&Device::Cpu)?;
    let images = ((images / 2.)? + 0.5)?;
    let images = (images.clamp(0f32, 1f32)? * 255.)?.to_dtype(DType::U8)?;
    images.get(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_decoder_range_to_bytes() {
        let decoded = Tensor::new(&[-1f32, 0.0, 1.0, 3.0, -2.0, 0.5], &Device::Cpu)
            .unwrap()
            .reshape((1, 3, 1, 2))
            .unwrap();
        let pixels = to_pixels(&decoded).unwrap();
        assert_eq!(pixels.dims(), &[3, 1, 2]);
        let values = pixels.flatten_all().unwrap().to_vec1::<u8>().unwrap();
        assert_eq!(values, vec![0, 127, 255, 255, 0, 191]);
    }
}
