use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad caller input. Only the prompt can trigger this.
    #[error("{0}")]
    Validation(String),

    /// The model is still loading, or loading failed.
    #[error("Model not loaded yet. Please wait or check server logs.")]
    NotReady { details: Option<String> },

    #[error("Invalid service state: {0}")]
    State(String),

    #[error("Device out of memory. Try reducing image size or using CPU.")]
    ResourceExhausted(String),

    #[error("Could not load model: {0}")]
    Load(String),

    #[error("Failed to generate image: {0}")]
    Inference(String),

    #[error("Failed to convert image: {0}")]
    Encoding(String),
}

impl Error {
    /// Underlying detail worth surfacing next to the top-level message.
    pub fn details(&self) -> Option<&str> {
        match self {
            Error::NotReady { details } => details.as_deref(),
            Error::ResourceExhausted(details) => Some(details),
            _ => None,
        }
    }
}

/// Returns true when a candle error reports device memory exhaustion.
pub fn is_out_of_memory(err: &candle_core::Error) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    message.contains("out of memory") || message.contains("out_of_memory")
}

impl From<candle_core::Error> for Error {
    fn from(err: candle_core::Error) -> Self {
        if is_out_of_memory(&err) {
            Error::ResourceExhausted(err.to_string())
        } else {
            Error::Inference(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cuda_oom_maps_to_resource_exhausted() {
        let err = candle_core::Error::Msg("DriverError(CUDA_ERROR_OUT_OF_MEMORY, \"out of memory\")".into());
        assert!(matches!(Error::from(err), Error::ResourceExhausted(_)));
    }

    #[test]
    fn other_candle_errors_map_to_inference() {
        let err = candle_core::Error::Msg("shape mismatch in matmul".into());
        match Error::from(err) {
            Error::Inference(msg) => assert!(msg.contains("shape mismatch")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn not_ready_exposes_details() {
        let err = Error::NotReady {
            details: Some("401 Unauthorized".to_string()),
        };
        assert_eq!(err.details(), Some("401 Unauthorized"));
        assert!(Error::Validation("x".into()).details().is_none());
    }
}
