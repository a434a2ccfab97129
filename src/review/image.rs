//! Image loading: URL fetch, data URLs and raw base64

use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::review::types::ImageSource;

/// Decoded image bytes plus the base64 form sent to backends
#[derive(Debug, Clone)]
pub struct ImageData {
    bytes: Vec<u8>,
    base64: String,
    format: &'static str,
}

impl ImageData {
    /// Wrap raw bytes, rejecting anything that is not a known image format.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(AppError::image_load("image is empty"));
        }

        let format = image::guess_format(&bytes)
            .map_err(|_| AppError::image_load("data is not a recognized image format"))?;
        let format = format.extensions_str().first().copied().unwrap_or("bin");

        Ok(Self {
            base64: encode(&bytes),
            bytes,
            format,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn base64(&self) -> &str {
        &self.base64
    }

    /// File extension of the detected format (`jpg`, `png`, ...)
    pub fn format(&self) -> &'static str {
        self.format
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Encode binary data to base64 string
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode base64 or a `data:image/...;base64,` URL
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    let data = match encoded.split_once(',') {
        Some((prefix, payload)) if prefix.starts_with("data:") => payload,
        _ => encoded,
    };

    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(cleaned)
        .map_err(|e| AppError::invalid_input(format!("Invalid base64 data: {}", e)))
}

/// Get the image format from base64 data URL prefix
pub fn get_format_from_data_url(data_url: &str) -> Option<&str> {
    let rest = data_url.strip_prefix("data:image/")?;
    let end = rest.find(';')?;
    Some(&rest[..end])
}

/// Turns an [`ImageSource`] into [`ImageData`]
#[derive(Clone)]
pub struct ImageLoader {
    client: Client,
    max_bytes: usize,
}

impl ImageLoader {
    pub fn new(fetch_timeout: Duration, max_bytes: usize) -> Result<Self> {
        let client = Client::builder()
            .timeout(fetch_timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, max_bytes })
    }

    pub async fn load(&self, source: &ImageSource) -> Result<ImageData> {
        let (bytes, declared) = match source {
            ImageSource::Url(url) => (self.fetch(url).await?, None),
            ImageSource::Base64(data) => {
                // Rough pre-check so a huge payload is not decoded at all
                if data.len() / 4 * 3 > self.max_bytes + 3 {
                    return Err(self.too_large());
                }
                (decode(data)?, get_format_from_data_url(data))
            }
        };

        if bytes.len() > self.max_bytes {
            return Err(self.too_large());
        }

        let image = ImageData::from_bytes(bytes)?;
        if let Some(declared) = declared {
            check_declared_format(declared, image.format())?;
        }
        debug!(bytes = image.len(), format = image.format(), "Image loaded");
        Ok(image)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let parsed = reqwest::Url::parse(url)
            .map_err(|e| AppError::invalid_input(format!("Invalid image_url: {}", e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::invalid_input("image_url must use http or https"));
        }

        let mut response = self.client.get(parsed).send().await.map_err(|e| {
            warn!(url = %url, error = %e, "Image fetch failed");
            AppError::image_load(format!("could not fetch {}: {}", url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::image_load(format!("{} returned {}", url, status)));
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(self.too_large());
        }

        // Content-Length is absent for chunked bodies, so count as we read
        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AppError::image_load(format!("could not read {}: {}", url, e)))?
        {
            if bytes.len() + chunk.len() > self.max_bytes {
                warn!(url = %url, max_bytes = self.max_bytes, "Image body over limit, aborting read");
                return Err(self.too_large());
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    fn too_large(&self) -> AppError {
        AppError::invalid_input(format!("image exceeds {} bytes", self.max_bytes))
    }
}

/// A data URL's declared type must agree with the sniffed bytes
fn check_declared_format(declared: &str, detected: &str) -> Result<()> {
    let declared_format = image::ImageFormat::from_mime_type(format!("image/{}", declared));
    let detected_format = image::ImageFormat::from_extension(detected);

    match (declared_format, detected_format) {
        (Some(a), Some(b)) if a != b => Err(AppError::invalid_input(format!(
            "data URL declares image/{} but the data is {}",
            declared, detected
        ))),
        // An unrecognised declaration is left to the sniffed format
        _ => Ok(()),
    }
}
