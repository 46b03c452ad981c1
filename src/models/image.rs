use crate::error::{GenError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A base64 encoded image together with its mime type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBlob {
    pub mime_type: String,
    pub data: String,
}

const MIME_SIGNATURES: &[(&str, &str)] = &[
    ("/9j/", "image/jpeg"),
    ("iVBOR", "image/png"),
    ("R0lG", "image/gif"),
    ("UklGR", "image/webp"),
];

impl ImageBlob {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let data = STANDARD.encode(bytes);
        Self {
            mime_type: detect_mime_type(&data).to_string(),
            data,
        }
    }

    /// Accepts either a `data:<mime>;base64,<payload>` URL or bare base64.
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let encoded = encoded.trim();
        if let Some(rest) = encoded.strip_prefix("data:") {
            let (header, data) = rest.split_once(',').ok_or_else(|| {
                GenError::InvalidRequest("data URL is missing its payload".into())
            })?;
            let mime_type = header
                .strip_suffix(";base64")
                .filter(|mime| mime.starts_with("image/"))
                .map(str::to_string)
                .unwrap_or_else(|| detect_mime_type(data).to_string());
            return Ok(Self::new(mime_type, data));
        }

        if encoded.is_empty() {
            return Err(GenError::InvalidRequest("image payload is empty".into()));
        }
        Ok(Self::new(detect_mime_type(encoded), encoded))
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(self.data.as_bytes())
            .map_err(|e| GenError::InvalidRequest(format!("image is not valid base64: {}", e)))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "png",
        }
    }
}

pub fn detect_mime_type(base64_data: &str) -> &'static str {
    MIME_SIGNATURES
        .iter()
        .find(|(prefix, _)| base64_data.starts_with(prefix))
        .map(|(_, mime)| *mime)
        .unwrap_or("image/png")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait3x4 => "3:4",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Portrait9x16 => "9:16",
            AspectRatio::Landscape16x9 => "16:9",
        }
    }

    fn ratio(&self) -> (u32, u32) {
        match self {
            AspectRatio::Square => (1, 1),
            AspectRatio::Portrait3x4 => (3, 4),
            AspectRatio::Landscape4x3 => (4, 3),
            AspectRatio::Portrait9x16 => (9, 16),
            AspectRatio::Landscape16x9 => (16, 9),
        }
    }

    /// Pixel dimensions whose long edge is `long_edge`, rounded down to a
    /// multiple of 64.
    pub fn dimensions(&self, long_edge: u32) -> (u32, u32) {
        let (w, h) = self.ratio();
        let short = |num: u32, den: u32| ((long_edge * num / den) / 64 * 64).max(64);
        if w >= h {
            (long_edge, short(h, w))
        } else {
            (short(w, h), long_edge)
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "1K")]
    R1K,
    #[serde(rename = "2K")]
    R2K,
    #[serde(rename = "4K")]
    R4K,
    #[serde(rename = "8K")]
    R8K,
}

impl Resolution {
    /// The highest resolution the backend actually renders.
    pub const MAX_SUPPORTED: Resolution = Resolution::R4K;

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::R1K => "1K",
            Resolution::R2K => "2K",
            Resolution::R4K => "4K",
            Resolution::R8K => "8K",
        }
    }

    pub fn long_edge(&self) -> u32 {
        match self {
            Resolution::R1K => 1024,
            Resolution::R2K => 2048,
            Resolution::R4K => 4096,
            Resolution::R8K => 8192,
        }
    }

    pub fn is_supported(&self) -> bool {
        *self <= Self::MAX_SUPPORTED
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    #[default]
    Standard,
    Pro,
}

impl QualityTier {
    /// Only the pro tier lets the caller pick an output resolution.
    pub fn grants_resolution_control(&self) -> bool {
        matches!(self, QualityTier::Pro)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    pub resolution: Resolution,
    pub quality_tier: QualityTier,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            aspect_ratio: AspectRatio::default(),
            resolution: Resolution::default(),
            quality_tier: QualityTier::default(),
        }
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = aspect_ratio;
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_quality_tier(mut self, quality_tier: QualityTier) -> Self {
        self.quality_tier = quality_tier;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(GenError::InvalidRequest("prompt must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditRequest {
    pub images: Vec<ImageBlob>,
    pub instruction: String,
    pub aspect_ratio: Option<AspectRatio>,
    pub resolution: Option<Resolution>,
}

impl EditRequest {
    pub const MAX_IMAGES: usize = 3;

    pub fn new(images: Vec<ImageBlob>, instruction: impl Into<String>) -> Self {
        Self {
            images,
            instruction: instruction.into(),
            aspect_ratio: None,
            resolution: None,
        }
    }

    pub fn with_aspect_ratio(mut self, aspect_ratio: AspectRatio) -> Self {
        self.aspect_ratio = Some(aspect_ratio);
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.images.is_empty() || self.images.len() > Self::MAX_IMAGES {
            return Err(GenError::InvalidRequest(format!(
                "an edit takes between 1 and {} images, got {}",
                Self::MAX_IMAGES,
                self.images.len()
            )));
        }
        if self.instruction.trim().is_empty() {
            return Err(GenError::InvalidRequest(
                "edit instruction must not be empty".into(),
            ));
        }
        Ok(())
    }
}
