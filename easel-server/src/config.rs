use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use easel_core::{DeviceMap, GenerationDefaults, LoadOptions, OutputFormat};

/// Command line arguments. Every flag can also come from the environment.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Easel image generation server")]
pub struct Args {
    /// Hub repository of the Stable Diffusion pipeline
    #[arg(long, env = "MODEL_ID", default_value = "runwayml/stable-diffusion-v1-5")]
    pub model_id: String,

    /// Device to run on: cpu, cuda, cuda:N, metal
    #[arg(long, env = "DEVICE", default_value = "cpu")]
    pub device: String,

    /// Hugging Face access token
    #[arg(long, env = "HF_TOKEN", hide_env_values = true)]
    pub hf_token: Option<String>,

    /// Directory for downloaded weights
    #[arg(long, env = "HF_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Default number of denoising steps
    #[arg(long, env = "NUM_INFERENCE_STEPS")]
    pub num_inference_steps: Option<String>,

    /// Default guidance scale
    #[arg(long, env = "GUIDANCE_SCALE")]
    pub guidance_scale: Option<String>,

    /// Default image height in pixels
    #[arg(long, env = "HEIGHT")]
    pub height: Option<String>,

    /// Default image width in pixels
    #[arg(long, env = "WIDTH")]
    pub width: Option<String>,

    /// Longest accepted prompt, in characters
    #[arg(long, env = "MAX_PROMPT_LENGTH", default_value_t = 500)]
    pub max_prompt_length: usize,

    /// Seconds before a request is answered with 408
    #[arg(long, env = "REQUEST_TIMEOUT", default_value_t = 120)]
    pub request_timeout: u64,

    /// Encoding of returned images: png or jpeg
    #[arg(long, env = "OUTPUT_FORMAT", default_value = "png")]
    pub output_format: String,

    /// Host address to bind the server to
    #[arg(long, env = "EASEL_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind the server to
    #[arg(long, env = "EASEL_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

/// Resolved server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub load: LoadOptions,
    pub device_map: DeviceMap,
    pub defaults: GenerationDefaults,
    pub output_format: OutputFormat,
    pub request_timeout: Duration,
    pub bind_address: String,
}

impl Config {
    /// Resolves arguments into a configuration. Malformed generation defaults
    /// fall back to built-in values and an unknown device binds to the CPU;
    /// an unknown output format is an error.
    pub fn from_args(args: &Args) -> anyhow::Result<Self> {
        let device_map = DeviceMap::parse_or_cpu(&args.device);
        let output_format = args
            .output_format
            .parse::<OutputFormat>()
            .map_err(|_| anyhow::anyhow!("unsupported output format '{}'", args.output_format))?;

        Ok(Self {
            load: LoadOptions::new(args.model_id.clone())
                .with_token(args.hf_token.clone())
                .with_cache_dir(args.cache_dir.clone()),
            device_map,
            defaults: GenerationDefaults::sanitized(
                args.num_inference_steps.as_deref(),
                args.guidance_scale.as_deref(),
                args.height.as_deref(),
                args.width.as_deref(),
                Some(args.max_prompt_length),
            ),
            output_format,
            request_timeout: Duration::from_secs(args.request_timeout.max(1)),
            bind_address: format!("{}:{}", args.host, args.port),
        })
    }
}
