use std::future::Future;
use std::path::PathBuf;

use anyhow::Result;
use hf_hub::api::tokio::{Api, ApiBuilder};

use crate::{DeviceContext, ModelLike, ModelVariant};

/// Where to fetch a model from and how to authenticate.
#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub model_id: String,
    pub token: Option<String>,
    pub cache_dir: Option<PathBuf>,
}

impl LoadOptions {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: Option<PathBuf>) -> Self {
        self.cache_dir = cache_dir;
        self
    }

    /// Hub client carrying the token and cache location.
    pub fn api(&self) -> Result<Api> {
        let mut builder = ApiBuilder::new()
            .with_progress(false)
            .with_token(self.token.clone());
        if let Some(cache_dir) = &self.cache_dir {
            builder = builder.with_cache_dir(cache_dir.clone());
        }
        Ok(builder.build()?)
    }
}

pub trait Loader {
    type Model: ModelLike + 'static;

    fn load(
        variant: ModelVariant,
        model_id: String,
        api: Api,
        device: DeviceContext,
    ) -> impl Future<Output = Result<Self::Model>> + Send
    where
        Self: Sized;
}
