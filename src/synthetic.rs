//! Last-resort editing: describe the edited image in prose, then generate it
//! from scratch.

use crate::{
    backend::Backend,
    error::{GenError, Result},
    models::{
        AspectRatio, BackendRequest, BackendResponse, GenerationParams, ImageBlob, Payload,
    },
    waterfall::{CandidateOrder, ModelWaterfall},
};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticEdit {
    pub artifact: ImageBlob,
    pub description: String,
    pub described_by: String,
    pub synthesized_by: String,
}

pub struct SyntheticEditPipeline<'a> {
    backend: Arc<dyn Backend>,
    describe: &'a CandidateOrder,
    synthesize: &'a CandidateOrder,
    waterfall: ModelWaterfall,
}

pub fn description_prompt(instruction: &str, image_count: usize) -> String {
    format!(
        "You are given {count} source image(s). Describe in detail what a single image \
         should look like after applying this instruction to them: \"{instruction}\".\n\
         Cover composition, subjects, lighting, colour palette and artistic style. \
         If several images are supplied, explain how they are merged into one scene.\n\
         Reply with the description only, written as a prompt for an image generator.",
        count = image_count,
        instruction = instruction.trim(),
    )
}

impl<'a> SyntheticEditPipeline<'a> {
    pub fn new(
        backend: Arc<dyn Backend>,
        describe: &'a CandidateOrder,
        synthesize: &'a CandidateOrder,
        waterfall: ModelWaterfall,
    ) -> Self {
        Self {
            backend,
            describe,
            synthesize,
            waterfall,
        }
    }

    pub async fn run(
        &self,
        images: &[ImageBlob],
        instruction: &str,
        aspect_ratio: Option<AspectRatio>,
    ) -> Result<SyntheticEdit> {
        let prompt = description_prompt(instruction, images.len());

        let described = self
            .waterfall
            .run(self.describe, |candidate| {
                let backend = self.backend.clone();
                let request = BackendRequest {
                    model: candidate.id,
                    payload: Payload {
                        text: Some(prompt.clone()),
                        images: images.to_vec(),
                        params: None,
                    },
                };
                async move { backend.invoke(request).await.map(BackendResponse::texts) }
            })
            .await?;

        let description = described.value.join("\n");
        log::info!(
            "Synthetic edit described by {} ({} chars)",
            described.served_by,
            description.len()
        );
        log::debug!("Synthetic edit description: {}", description);

        let params = GenerationParams {
            aspect_ratio: aspect_ratio.unwrap_or_default(),
            resolution: None,
            count: 1,
        };

        let synthesized = self
            .waterfall
            .run(self.synthesize, |candidate| {
                let backend = self.backend.clone();
                let request = BackendRequest {
                    model: candidate.id,
                    payload: Payload {
                        text: Some(description.clone()),
                        images: Vec::new(),
                        params: Some(params.clone()),
                    },
                };
                async move { backend.invoke(request).await.map(BackendResponse::images) }
            })
            .await?;

        let artifact = synthesized
            .value
            .into_iter()
            .next()
            .ok_or_else(|| GenError::Response("synthesis produced no image".into()))?;

        Ok(SyntheticEdit {
            artifact,
            description,
            described_by: described.served_by,
            synthesized_by: synthesized.served_by,
        })
    }
}
