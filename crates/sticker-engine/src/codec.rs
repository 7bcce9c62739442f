use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD as BASE64};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, ImageReader};
use reqwest::blocking::Client as HttpClient;

use crate::error::{truncate_text, PipelineError, Result};
use crate::extract::ImageReference;
use crate::transport::build_http_client;

/// Raw bytes behind an image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBytes {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

/// Downloads a remote image reference.
pub trait ImageFetcher {
    fn fetch(&self, url: &str) -> Result<ImageBytes>;
}

pub struct HttpImageFetcher {
    http: HttpClient,
}

impl HttpImageFetcher {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            http: build_http_client(timeout)?,
        })
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str) -> Result<ImageBytes> {
        let response = self
            .http
            .get(url)
            .send()
            .map_err(|err| PipelineError::Transport(format!("image download failed ({url}): {err}")))?;
        if !response.status().is_success() {
            let code = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(PipelineError::Transport(format!(
                "image download failed ({code}): {}",
                truncate_text(&body, 512)
            )));
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .map_err(|err| PipelineError::Transport(format!("image bytes read failed: {err}")))?
            .to_vec();
        Ok(ImageBytes { bytes, mime_type })
    }
}

/// Base64 payload for upload. Rejects bytes that are not a readable image.
pub fn encode_to_transport(bytes: &[u8]) -> Result<String> {
    probe_image(bytes)?;
    Ok(BASE64.encode(bytes))
}

/// Format and dimensions read from the image header.
pub fn probe_image(bytes: &[u8]) -> Result<(ImageFormat, u32, u32)> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| PipelineError::Codec(err.to_string()))?;
    let format = reader
        .format()
        .ok_or_else(|| PipelineError::Codec("unrecognized image format".to_string()))?;
    let (width, height) = reader.into_dimensions()?;
    Ok((format, width, height))
}

pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

pub fn extension_for_mime(mime: Option<&str>) -> &'static str {
    if let Some(mime) = mime {
        let lowered = mime.to_ascii_lowercase();
        if lowered.contains("jpeg") || lowered.contains("jpg") {
            return "jpg";
        }
        if lowered.contains("webp") {
            return "webp";
        }
        if lowered.contains("gif") {
            return "gif";
        }
    }
    "png"
}

/// Accepts payloads with or without `=` padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes a `data:<mime>;base64,<payload>` reference. Whitespace inside the
/// payload is ignored.
pub fn decode_data_uri(value: &str) -> Result<ImageBytes> {
    let (meta, payload) = value
        .split_once(',')
        .ok_or_else(|| PipelineError::Codec("invalid data URI image payload".to_string()))?;
    let meta = meta.trim();
    if !meta.ends_with(";base64") {
        return Err(PipelineError::Codec(
            "data URI image payload is not base64 encoded".to_string(),
        ));
    }
    let mime = meta
        .strip_prefix("data:")
        .and_then(|rest| rest.split(';').next())
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .unwrap_or("image/png")
        .to_string();
    let compact: Vec<u8> = payload
        .bytes()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    let bytes = LENIENT_BASE64
        .decode(&compact)
        .map_err(|err| PipelineError::Codec(format!("data URI base64 decode failed: {err}")))?;
    Ok(ImageBytes {
        bytes,
        mime_type: Some(mime),
    })
}

/// Bytes behind a reference; remote URLs are downloaded.
pub fn reference_bytes(reference: &ImageReference, fetcher: &dyn ImageFetcher) -> Result<ImageBytes> {
    match reference {
        ImageReference::DataUri(uri) => decode_data_uri(uri),
        ImageReference::Url(url) => fetcher.fetch(url),
    }
}

/// Pixel data behind a reference.
pub fn decode_from_reference(
    reference: &ImageReference,
    fetcher: &dyn ImageFetcher,
) -> Result<DynamicImage> {
    let image = reference_bytes(reference, fetcher)?;
    Ok(image::load_from_memory(&image.bytes)?)
}

/// Lossless PNG encoding.
pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

pub fn png_data_uri(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(png))
}
