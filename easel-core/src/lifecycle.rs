use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::{DeviceInfo, Error, ModelLike, Result};

/// What `/health` reports about a ready model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub model_id: String,
    pub variant: String,
    pub device_info: DeviceInfo,
}

pub type SharedModel = Arc<Mutex<Box<dyn ModelLike>>>;

enum Stage {
    Uninitialized,
    Loading,
    Ready { model: SharedModel, info: ModelInfo },
    Failed(String),
}

/// A point-in-time view of the lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifecycleStatus {
    Uninitialized,
    Loading,
    Ready(ModelInfo),
    Failed(String),
}

/// One-shot model lifecycle: `Uninitialized -> Loading -> Ready | Failed`.
///
/// Each transition happens at most once; the loader task drives it and
/// request handlers only read it.
#[derive(Clone)]
pub struct Lifecycle {
    stage: Arc<RwLock<Stage>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            stage: Arc::new(RwLock::new(Stage::Uninitialized)),
        }
    }

    pub fn begin_loading(&self) -> Result<()> {
        let mut stage = self.stage.write().unwrap_or_else(PoisonError::into_inner);
        match *stage {
            Stage::Uninitialized => {
                *stage = Stage::Loading;
                Ok(())
            }
            _ => Err(Error::State("model loading was already started".to_string())),
        }
    }

    /// Records the outcome of loading. Fails if loading was never started or
    /// has already finished.
    pub fn finish(&self, outcome: Result<(Box<dyn ModelLike>, ModelInfo)>) -> Result<()> {
        let mut stage = self.stage.write().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*stage, Stage::Loading) {
            return Err(Error::State("model loading is not in progress".to_string()));
        }
        *stage = match outcome {
            Ok((model, info)) => {
                info!(model_id = %info.model_id, device = %info.device_info.device, "pipeline loaded and ready");
                Stage::Ready {
                    model: Arc::new(Mutex::new(model)),
                    info,
                }
            }
            Err(e) => {
                error!(error = %e, "failed to load pipeline");
                Stage::Failed(e.to_string())
            }
        };
        Ok(())
    }

    /// Starts loading and drives `load` to completion on its own task. A load
    /// that panics still ends in `Failed`.
    pub fn load_in_background<F>(&self, load: F) -> Result<JoinHandle<()>>
    where
        F: Future<Output = Result<(Box<dyn ModelLike>, ModelInfo)>> + Send + 'static,
    {
        self.begin_loading()?;
        let lifecycle = self.clone();
        Ok(tokio::spawn(async move {
            let outcome = match tokio::spawn(load).await {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::Load(format!("loader task failed: {e}"))),
            };
            if let Err(e) = lifecycle.finish(outcome) {
                warn!(error = %e, "ignoring load result");
            }
        }))
    }

    pub fn status(&self) -> LifecycleStatus {
        match &*self.stage.read().unwrap_or_else(PoisonError::into_inner) {
            Stage::Uninitialized => LifecycleStatus::Uninitialized,
            Stage::Loading => LifecycleStatus::Loading,
            Stage::Ready { info, .. } => LifecycleStatus::Ready(info.clone()),
            Stage::Failed(e) => LifecycleStatus::Failed(e.clone()),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.status(), LifecycleStatus::Ready(_))
    }

    /// The loaded model, or the reason there is none.
    pub fn model(&self) -> Result<SharedModel> {
        match &*self.stage.read().unwrap_or_else(PoisonError::into_inner) {
            Stage::Ready { model, .. } => Ok(Arc::clone(model)),
            Stage::Uninitialized => Err(Error::State(
                "pipeline not loaded, cannot generate image".to_string(),
            )),
            Stage::Loading => Err(Error::NotReady {
                details: Some("model is still loading".to_string()),
            }),
            Stage::Failed(e) => Err(Error::NotReady {
                details: Some(e.clone()),
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{DeviceContext, GeneratedImage, GenerationRequest};

    pub(crate) struct SolidColor(pub [u8; 3]);

    impl ModelLike for SolidColor {
        fn run(&mut self, request: &GenerationRequest) -> Result<GeneratedImage> {
            Ok(GeneratedImage {
                width: request.width as u32,
                height: request.height as u32,
                pixels: self.0.repeat(request.width * request.height),
            })
        }
    }

    pub(crate) fn info() -> ModelInfo {
        ModelInfo {
            model_id: "test/solid-color".to_string(),
            variant: "test".to_string(),
            device_info: DeviceContext::cpu().info(),
        }
    }

    #[test]
    fn walks_through_the_happy_path() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.status(), LifecycleStatus::Uninitialized);
        assert!(matches!(lifecycle.model(), Err(Error::State(_))));

        lifecycle.begin_loading().unwrap();
        assert_eq!(lifecycle.status(), LifecycleStatus::Loading);
        assert!(matches!(lifecycle.model(), Err(Error::NotReady { .. })));

        lifecycle
            .finish(Ok((Box::new(SolidColor([0, 0, 0])), info())))
            .unwrap();
        assert_eq!(lifecycle.status(), LifecycleStatus::Ready(info()));
        assert!(lifecycle.model().is_ok());
    }

    #[test]
    fn failed_load_is_reported_as_not_ready() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_loading().unwrap();
        lifecycle
            .finish(Err(Error::Load("401 Unauthorized".to_string())))
            .unwrap();
        assert!(matches!(lifecycle.status(), LifecycleStatus::Failed(e) if e.contains("401")));
        match lifecycle.model() {
            Err(Error::NotReady { details }) => assert!(details.unwrap().contains("401")),
            _ => panic!("expected NotReady"),
        }
    }

    #[test]
    fn transitions_happen_once() {
        let lifecycle = Lifecycle::new();
        assert!(lifecycle.finish(Err(Error::Load("x".into()))).is_err());
        lifecycle.begin_loading().unwrap();
        assert!(lifecycle.begin_loading().is_err());
        lifecycle
            .finish(Ok((Box::new(SolidColor([1, 2, 3])), info())))
            .unwrap();
        assert!(lifecycle
            .finish(Ok((Box::new(SolidColor([1, 2, 3])), info())))
            .is_err());
        assert!(lifecycle.begin_loading().is_err());
        assert!(lifecycle.is_ready());
    }

    #[tokio::test]
    async fn background_load_reaches_ready() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle
            .load_in_background(async {
                Ok((Box::new(SolidColor([9, 9, 9])) as Box<dyn ModelLike>, info()))
            })
            .unwrap();
        handle.await.unwrap();
        assert_eq!(lifecycle.status(), LifecycleStatus::Ready(info()));
    }

    #[tokio::test]
    async fn panicking_load_ends_in_failed() {
        let lifecycle = Lifecycle::new();
        let handle = lifecycle
            .load_in_background(async {
                if true {
                    panic!("tokenizer exploded");
                }
                Ok((Box::new(SolidColor([0, 0, 0])) as Box<dyn ModelLike>, info()))
            })
            .unwrap();
        handle.await.unwrap();
        match lifecycle.status() {
            LifecycleStatus::Failed(e) => assert!(e.contains("loader task failed")),
            other => panic!("expected Failed, got {other:?}"),
        }
        assert!(matches!(lifecycle.model(), Err(Error::NotReady { .. })));
        assert!(lifecycle.load_in_background(async { Err(Error::Load("again".into())) }).is_err());
    }

    #[test]
    fn clones_share_the_same_stage() {
        let lifecycle = Lifecycle::new();
        let reader = lifecycle.clone();
        lifecycle.begin_loading().unwrap();
        assert_eq!(reader.status(), LifecycleStatus::Loading);
    }
}
