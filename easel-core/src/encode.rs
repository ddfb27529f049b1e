use std::io::Cursor;

use base64::{prelude::BASE64_STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, GeneratedImage, Result};

const JPEG_QUALITY: u8 = 95;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    #[serde(alias = "jpg")]
    Jpeg,
}

impl OutputFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = serde_plain::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_plain::from_str(&s.trim().to_ascii_lowercase())
    }
}

/// Encodes `image` as `data:<mime>;base64,<payload>`.
pub fn encode_data_url(image: &GeneratedImage, format: OutputFormat) -> Result<String> {
    let buffer = RgbImage::from_raw(image.width, image.height, image.pixels.clone())
        .ok_or_else(|| {
            Error::Encoding(format!(
                "expected {}x{}x3 pixel buffer, got {} bytes",
                image.width,
                image.height,
                image.pixels.len()
            ))
        })?;
    if buffer.width() == 0 || buffer.height() == 0 {
        return Err(Error::Encoding("image has no pixels".to_string()));
    }
    let img = DynamicImage::ImageRgb8(buffer);

    let mut bytes = Vec::new();
    match format {
        OutputFormat::Png => img
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .map_err(|e| Error::Encoding(e.to_string()))?,
        OutputFormat::Jpeg => img
            .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY))
            .map_err(|e| Error::Encoding(e.to_string()))?,
    }
    let payload = BASE64_STANDARD.encode(&bytes);
    debug!(bytes = payload.len(), %format, "converted image to data URL");
    Ok(format!("data:{};base64,{payload}", format.mime_type()))
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&serde_plain::to_string(self).map_err(|_| std::fmt::Error)?)
    }
}
