pub mod device_map;
pub mod encode;
pub mod error;
pub mod invoker;
pub mod lifecycle;
pub mod loader;
mod loader_factory;
pub mod params;
mod util;

mod stable_diffusion;

pub use device_map::*;
pub use encode::{encode_data_url, OutputFormat};
pub use error::{Error, Result};
pub use invoker::InferenceInvoker;
pub use lifecycle::{Lifecycle, LifecycleStatus, ModelInfo};
pub use loader::*;
pub use loader_factory::*;
pub use params::{validate, GenerationDefaults, RawGenerationParams};
pub use stable_diffusion::{StableDiffusionLoader, StableDiffusionModel, StableDiffusionVariant};
pub(crate) use util::*;

use serde::Serialize;

/// A fully normalized generation request. Build it with [`params::validate`].
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub steps: usize,
    pub guidance_scale: f64,
    pub height: usize,
    pub width: usize,
    pub seed: Option<u64>,
}

/// One RGB8 raster produced by a single inference call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// A loaded pipeline that can turn one request into one image.
///
/// Implementations are not expected to be reentrant; callers go through
/// [`InferenceInvoker`], which runs one call at a time.
pub trait ModelLike: Send {
    fn run(&mut self, request: &GenerationRequest) -> Result<GeneratedImage>;
}
