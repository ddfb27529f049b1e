use tracing::{info, info_span, Instrument, Span};

use crate::{Error, GeneratedImage, GenerationRequest, Lifecycle, Result};

/// Runs generation requests against the model held by a [`Lifecycle`],
/// one at a time. Waiting requests queue on the model lock.
#[derive(Clone)]
pub struct InferenceInvoker {
    lifecycle: Lifecycle,
    span: Span,
}

impl InferenceInvoker {
    pub fn new(lifecycle: Lifecycle) -> Self {
        Self {
            lifecycle,
            span: info_span!("invoker"),
        }
    }

    pub fn with_span(lifecycle: Lifecycle, span: Span) -> Self {
        Self { lifecycle, span }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<GeneratedImage> {
        async move {
            if request.prompt.trim().is_empty() {
                return Err(Error::Validation("Prompt cannot be empty".to_string()));
            }
            let model = self.lifecycle.model()?;
            let mut model = model.lock_owned().await;

            let prompt: String = request.prompt.chars().take(50).collect();
            info!(
                %prompt,
                height = request.height,
                width = request.width,
                steps = request.steps,
                seed = ?request.seed,
                "generating image"
            );
            let span = Span::current();
            let image = tokio::task::spawn_blocking(move || span.in_scope(|| model.run(&request)))
                .await
                .map_err(|e| Error::Inference(format!("generation task failed: {e}")))??;
            info!("image generated successfully");
            Ok(image)
        }
        .instrument(self.span.clone())
        .await
    }
}
