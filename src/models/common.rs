use crate::{error::Result, retry::RetryPolicy};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

use super::{AspectRatio, ChatMessage, ImageBlob, Resolution};

/// What a candidate is used for. A model id may appear under several roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateRole {
    Generate,
    Edit,
    Describe,
    Synthesize,
    Chat,
}

impl fmt::Display for CandidateRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CandidateRole::Generate => "generate",
            CandidateRole::Edit => "edit",
            CandidateRole::Describe => "describe",
            CandidateRole::Synthesize => "synthesize",
            CandidateRole::Chat => "chat",
        };
        f.write_str(name)
    }
}

/// One backend model configuration the orchestrator may address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub supports_resolution_control: bool,
    pub supports_image_input: bool,
    pub quota_bucket: String,
    pub retry: RetryPolicy,
    /// Reasoning budget in tokens, for chat candidates that think first.
    pub thinking_budget: Option<u32>,
}

impl Candidate {
    pub fn new(id: impl Into<String>, quota_bucket: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            supports_resolution_control: false,
            supports_image_input: false,
            quota_bucket: quota_bucket.into(),
            retry: RetryPolicy::default(),
            thinking_budget: None,
        }
    }

    pub fn with_resolution_control(mut self) -> Self {
        self.supports_resolution_control = true;
        self
    }

    pub fn with_image_input(mut self) -> Self {
        self.supports_image_input = true;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub aspect_ratio: AspectRatio,
    /// Only set for candidates that honour an explicit resolution.
    pub resolution: Option<Resolution>,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub text: Option<String>,
    pub images: Vec<ImageBlob>,
    pub params: Option<GenerationParams>,
}

/// A single call against one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendRequest {
    pub model: String,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Artifact {
    Image(ImageBlob),
    Text(String),
}

impl Artifact {
    pub fn into_image(self) -> Option<ImageBlob> {
        match self {
            Artifact::Image(image) => Some(image),
            Artifact::Text(_) => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Artifact::Text(text) => Some(text),
            Artifact::Image(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    pub artifacts: Vec<Artifact>,
}

impl BackendResponse {
    pub fn images(self) -> Vec<ImageBlob> {
        self.artifacts
            .into_iter()
            .filter_map(Artifact::into_image)
            .collect()
    }

    /// Non-blank text parts, trimmed.
    pub fn texts(self) -> Vec<String> {
        self.artifacts
            .into_iter()
            .filter_map(Artifact::into_text)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .collect()
    }
}

/// Opening request for a streamed, stateful conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatInvocation {
    pub model: String,
    pub history: Vec<ChatMessage>,
    pub message: String,
    pub thinking_budget: Option<u32>,
}

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Final outcome of `generate` or `edit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub artifacts: Vec<ImageBlob>,
    pub served_by: String,
    pub degraded: bool,
    /// Produced by describing and regenerating rather than editing.
    pub synthetic: bool,
}

/// A live chat reply. Errors after the first increment are delivered in the
/// stream and never trigger another candidate.
pub struct ChatStream {
    pub served_by: String,
    pub degraded: bool,
    pub stream: TextStream,
}

impl fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatStream")
            .field("served_by", &self.served_by)
            .field("degraded", &self.degraded)
            .finish_non_exhaustive()
    }
}
