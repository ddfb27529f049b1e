use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::{Error, GeneratedImage, Result};

/// Converts a u8 tensor with shape (3, height, width) into an RGB image.
pub fn tensor_to_image(img: &Tensor) -> Result<GeneratedImage> {
    let (channels, height, width) = img.dims3()?;
    if channels != 3 {
        return Err(Error::Inference(format!(
            "expected an image with 3 channels, got {channels}"
        )));
    }
    let pixels = img
        .to_dtype(DType::U8)?
        .permute((1, 2, 0))?
        .flatten_all()?
        .to_vec1::<u8>()?;
    Ok(GeneratedImage {
        width: width as u32,
        height: height as u32,
        pixels,
    })
}

/// Standard normal noise of `shape`, drawn from a per-call RNG.
///
/// With a seed the noise is reproducible on every device: it is sampled on
/// the CPU and only then moved to `device`.
pub fn latent_noise(
    shape: (usize, usize, usize, usize),
    seed: Option<u64>,
    device: &Device,
) -> Result<Tensor> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let (b, c, h, w) = shape;
    let values: Vec<f32> = (0..b * c * h * w)
        .map(|_| rng.sample::<f32, _>(StandardNormal))
        .collect();
    Ok(Tensor::from_vec(values, shape, &Device::Cpu)?.to_device(device)?)
}
