//! Public entry points: `generate`, `edit` and `chat`.
//!
//! Worst-case latency without a deadline is the sum of every candidate's
//! exhausted retry schedule, which runs to several minutes with the default
//! catalog. Callers that need a bound should use the `*_with_deadline`
//! variants.

use crate::{
    backend::{Backend, BedrockBackend, CredentialProvider, EnvCredentials},
    cache::{CacheKey, ResultCache},
    classifier::classify,
    config::{ModelCatalog, OrchestratorConfig},
    error::{GenError, Result},
    logger,
    models::{
        BackendRequest, BackendResponse, Candidate, ChatInvocation, ChatMode, ChatRequest,
        ChatStream, EditRequest, GenerateRequest, GenerationParams, GenerationResult, Payload,
        Resolution,
    },
    retry::Deadline,
    synthetic::SyntheticEditPipeline,
    waterfall::ModelWaterfall,
};
use std::sync::Arc;

pub const CACHE_SERVED_BY: &str = "cache";

const DETAIL_SUFFIX: &str =
    ", extremely detailed, ultra high resolution, razor sharp focus, intricate fine textures";

pub struct GenerationOrchestrator {
    backend: Arc<dyn Backend>,
    credentials: Arc<dyn CredentialProvider>,
    catalog: ModelCatalog,
    cache: ResultCache,
}

impl GenerationOrchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        credentials: Arc<dyn CredentialProvider>,
        catalog: ModelCatalog,
    ) -> Result<Self> {
        catalog.validate()?;
        Ok(Self {
            backend,
            credentials,
            catalog,
            cache: ResultCache::new(),
        })
    }

    /// Builds an orchestrator over AWS Bedrock using environment credentials.
    pub async fn from_config(config: OrchestratorConfig) -> Result<Self> {
        let backend = BedrockBackend::new(config.bedrock.clone()).await?;
        Self::new(
            Arc::new(backend),
            Arc::new(EnvCredentials::new(config.bedrock)),
            config.catalog,
        )
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    async fn require_credential(&self) -> Result<()> {
        if self.credentials.ensure_credential().await {
            Ok(())
        } else {
            Err(GenError::MissingCredential)
        }
    }

    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerationResult> {
        self.generate_with_deadline(request, Deadline::none()).await
    }

    pub async fn generate_with_deadline(
        &self,
        request: GenerateRequest,
        deadline: Deadline,
    ) -> Result<GenerationResult> {
        request.validate()?;
        self.require_credential().await?;
        let _timer = logger::timer("generate");

        let key = CacheKey::from_request(&request);
        if let Some(artifacts) = self.cache.get(&key) {
            log::info!("Cache hit for generate request");
            return Ok(GenerationResult {
                artifacts,
                served_by: CACHE_SERVED_BY.to_string(),
                degraded: false,
                synthetic: false,
            });
        }

        let order = self.catalog.generate_order(request.quality_tier);
        let served = ModelWaterfall::new(deadline)
            .run(&order, |candidate| {
                let backend = self.backend.clone();
                let primary = order.is_primary(&candidate.id);
                let invocation = generate_invocation(&request, &candidate, primary);
                async move { backend.invoke(invocation).await.map(BackendResponse::images) }
            })
            .await
            .map_err(|err| {
                log::error!("Generate failed: {}", err.diagnostic());
                err
            })?;

        // Only canonical-quality results are cached.
        if !served.degraded() {
            self.cache.insert(key, served.value.clone());
        }

        Ok(GenerationResult {
            degraded: served.degraded(),
            artifacts: served.value,
            served_by: served.served_by,
            synthetic: false,
        })
    }

    pub async fn edit(&self, request: EditRequest) -> Result<GenerationResult> {
        self.edit_with_deadline(request, Deadline::none()).await
    }

    pub async fn edit_with_deadline(
        &self,
        request: EditRequest,
        deadline: Deadline,
    ) -> Result<GenerationResult> {
        request.validate()?;
        self.require_credential().await?;
        let _timer = logger::timer("edit");

        let instruction = edit_instruction(&request);
        let waterfall = ModelWaterfall::new(deadline);

        let direct = waterfall
            .run(&self.catalog.edit, |candidate| {
                let backend = self.backend.clone();
                let invocation = edit_invocation(&request, &candidate, &instruction);
                async move { backend.invoke(invocation).await.map(BackendResponse::images) }
            })
            .await;

        match direct {
            Ok(served) => {
                return Ok(GenerationResult {
                    degraded: served.degraded(),
                    artifacts: served.value,
                    served_by: served.served_by,
                    synthetic: false,
                })
            }
            Err(GenError::DeadlineExceeded) => return Err(GenError::DeadlineExceeded),
            Err(err) => log::warn!(
                "Direct editing exhausted ({}), falling back to synthetic edit",
                classify(&err)
            ),
        }

        let pipeline = SyntheticEditPipeline::new(
            self.backend.clone(),
            &self.catalog.describe,
            &self.catalog.synthesize,
            waterfall,
        );

        match pipeline
            .run(&request.images, &request.instruction, request.aspect_ratio)
            .await
        {
            Ok(edit) => {
                log::warn!(
                    "Edit served synthetically: described by {}, generated by {}",
                    edit.described_by,
                    edit.synthesized_by
                );
                Ok(GenerationResult {
                    artifacts: vec![edit.artifact],
                    served_by: edit.synthesized_by,
                    degraded: true,
                    synthetic: true,
                })
            }
            Err(GenError::DeadlineExceeded) => Err(GenError::DeadlineExceeded),
            Err(err) => {
                log::error!("Synthetic edit failed: {}", err.diagnostic());
                Err(GenError::EditExhausted {
                    classification: classify(&err),
                    detail: err.diagnostic(),
                })
            }
        }
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatStream> {
        self.chat_with_deadline(request, Deadline::none()).await
    }

    /// The deadline bounds stream initiation only, not consumption.
    pub async fn chat_with_deadline(
        &self,
        request: ChatRequest,
        deadline: Deadline,
    ) -> Result<ChatStream> {
        request.validate()?;
        self.require_credential().await?;

        let order = self
            .catalog
            .chat_order(request.mode == ChatMode::Thinking);
        let served = ModelWaterfall::new(deadline)
            .try_each(&order, |candidate| {
                let backend = self.backend.clone();
                let invocation = ChatInvocation {
                    model: candidate.id,
                    history: request.history.clone(),
                    message: request.message.clone(),
                    thinking_budget: candidate.thinking_budget,
                };
                async move { backend.open_chat(invocation).await }
            })
            .await?;

        log::info!("Chat streaming from {}", served.served_by);
        Ok(ChatStream {
            degraded: served.degraded(),
            served_by: served.served_by,
            stream: served.value,
        })
    }
}

impl Drop for GenerationOrchestrator {
    fn drop(&mut self) {
        log::debug!("Dropping orchestrator with {} cached results", self.cache.len());
        self.cache.clear();
    }
}

fn generate_invocation(
    request: &GenerateRequest,
    candidate: &Candidate,
    primary: bool,
) -> BackendRequest {
    let mut prompt = request.prompt.clone();
    let resolution = if primary
        && candidate.supports_resolution_control
        && request.quality_tier.grants_resolution_control()
    {
        if request.resolution.is_supported() {
            Some(request.resolution)
        } else {
            prompt.push_str(DETAIL_SUFFIX);
            Some(Resolution::MAX_SUPPORTED)
        }
    } else {
        None
    };

    BackendRequest {
        model: candidate.id.clone(),
        payload: Payload {
            text: Some(prompt),
            images: Vec::new(),
            params: Some(GenerationParams {
                aspect_ratio: request.aspect_ratio,
                resolution,
                count: 1,
            }),
        },
    }
}

fn edit_instruction(request: &EditRequest) -> String {
    let aspect_ratio = request
        .aspect_ratio
        .map(|a| a.to_string())
        .unwrap_or_else(|| "match the source".to_string());
    let resolution = request
        .resolution
        .map(|r| r.to_string())
        .unwrap_or_else(|| "match the source".to_string());
    let count = request.images.len();
    let merge = if count > 1 {
        "Merge the source images into one coherent image as the instruction describes."
    } else {
        "Transform the source image as the instruction describes."
    };

    format!(
        "{}\n\n[Edit settings]\nTarget aspect ratio: {}\nTarget resolution: {}\nSource images: {}\n\n{}",
        request.instruction.trim(),
        aspect_ratio,
        resolution,
        count,
        merge
    )
}

fn edit_invocation(request: &EditRequest, candidate: &Candidate, instruction: &str) -> BackendRequest {
    let resolution = request
        .resolution
        .filter(|_| candidate.supports_resolution_control)
        .map(|r| r.min(Resolution::MAX_SUPPORTED));

    BackendRequest {
        model: candidate.id.clone(),
        payload: Payload {
            text: Some(instruction.to_string()),
            images: request.images.clone(),
            params: Some(GenerationParams {
                aspect_ratio: request.aspect_ratio.unwrap_or_default(),
                resolution,
                count: 1,
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::scripted::{Scripted, ScriptedBackend};
    use crate::backend::StaticCredential;
    use crate::classifier::ErrorClassification;
    use crate::models::{AspectRatio, ChatMessage, ImageBlob, QualityTier};
    use crate::retry::RetryPolicy;
    use futures::StreamExt;
    use std::time::Duration;

    const PRO: &str = "amazon.nova-canvas-v1:0";
    const STANDARD: &str = "amazon.titan-image-generator-v2:0";
    const SD35: &str = "stability.sd3-5-large-v1:0";
    const TITAN_V1: &str = "amazon.titan-image-generator-v1";
    const SONNET: &str = "anthropic.claude-3-5-sonnet-20240620-v1:0";
    const HAIKU: &str = "anthropic.claude-3-haiku-20240307-v1:0";

    fn orchestrator(backend: &Arc<ScriptedBackend>) -> GenerationOrchestrator {
        let catalog = ModelCatalog::default().with_image_retry(RetryPolicy::none());
        GenerationOrchestrator::new(backend.clone(), Arc::new(StaticCredential(true)), catalog)
            .unwrap()
    }

    fn pro_request(prompt: &str) -> GenerateRequest {
        GenerateRequest::new(prompt)
            .with_quality_tier(QualityTier::Pro)
            .with_aspect_ratio(AspectRatio::Landscape16x9)
    }

    #[tokio::test]
    async fn primary_success_is_canonical_and_cached() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push(PRO, Scripted::image("iVBORpro"));
        let orchestrator = orchestrator(&backend);

        let first = orchestrator.generate(pro_request("a lighthouse")).await.unwrap();
        assert_eq!(first.served_by, PRO);
        assert!(!first.degraded);
        assert!(!first.synthetic);

        let second = orchestrator.generate(pro_request("a lighthouse")).await.unwrap();
        assert_eq!(second.served_by, CACHE_SERVED_BY);
        assert!(!second.degraded);
        assert_eq!(second.artifacts, first.artifacts);
        assert_eq!(backend.invoked_models(), vec![PRO]);
    }

    #[tokio::test]
    async fn fallback_results_are_degraded_and_not_cached() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push(PRO, Scripted::quota())
            .push(STANDARD, Scripted::invalid())
            .push(SD35, Scripted::image("iVBORsd"))
            .push(PRO, Scripted::image("iVBORpro"));
        let orchestrator = orchestrator(&backend);

        let first = orchestrator.generate(pro_request("a fox")).await.unwrap();
        assert_eq!(first.served_by, SD35);
        assert!(first.degraded);
        assert!(orchestrator.cache().is_empty());

        let second = orchestrator.generate(pro_request("a fox")).await.unwrap();
        assert_eq!(second.served_by, PRO);
        assert_eq!(backend.invoked_models(), vec![PRO, STANDARD, SD35, PRO]);
    }

    #[tokio::test]
    async fn eight_k_is_remapped_for_the_primary_only() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push(STANDARD, Scripted::image("iVBOR"));
        let orchestrator = orchestrator(&backend);

        orchestrator
            .generate(pro_request("a city").with_resolution(Resolution::R8K))
            .await
            .unwrap();

        let calls = backend.invocations();
        let primary = &calls[0].payload;
        assert_eq!(
            primary.params.as_ref().unwrap().resolution,
            Some(Resolution::R4K)
        );
        assert!(primary.text.as_deref().unwrap().ends_with(DETAIL_SUFFIX));

        let fallback = &calls[1].payload;
        assert_eq!(fallback.params.as_ref().unwrap().resolution, None);
        assert_eq!(fallback.text.as_deref(), Some("a city"));
        assert_eq!(
            fallback.params.as_ref().unwrap().aspect_ratio,
            AspectRatio::Landscape16x9
        );
    }

    #[tokio::test]
    async fn standard_tier_ignores_resolution() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push(STANDARD, Scripted::image("iVBOR"));
        let orchestrator = orchestrator(&backend);

        let result = orchestrator
            .generate(GenerateRequest::new("a boat").with_resolution(Resolution::R4K))
            .await
            .unwrap();

        assert_eq!(result.served_by, STANDARD);
        assert!(!result.degraded);
        let params = backend.invocations()[0].payload.params.clone().unwrap();
        assert_eq!(params.resolution, None);
    }

    #[tokio::test]
    async fn exhausted_generate_hides_backend_text() {
        let backend = Arc::new(ScriptedBackend::new());
        let orchestrator = orchestrator(&backend);

        let err = orchestrator.generate(pro_request("x")).await.unwrap_err();
        assert!(matches!(
            err,
            GenError::AllCandidatesExhausted {
                classification: ErrorClassification::Permission,
                ..
            }
        ));
        assert!(!err.user_message().contains("AccessDenied"));
        assert_eq!(backend.invoked_models().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_ends_a_retrying_generate() {
        let backend = Arc::new(ScriptedBackend::new());
        for _ in 0..6 {
            backend.push(PRO, Scripted::quota());
        }
        let orchestrator = GenerationOrchestrator::new(
            backend.clone(),
            Arc::new(StaticCredential(true)),
            ModelCatalog::default(),
        )
        .unwrap();

        let err = orchestrator
            .generate_with_deadline(pro_request("x"), Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap_err();

        assert!(matches!(err, GenError::DeadlineExceeded));
        assert_eq!(backend.invoked_models(), vec![PRO, PRO]);
    }

    #[tokio::test]
    async fn missing_credential_stops_before_any_backend_call() {
        let backend = Arc::new(ScriptedBackend::new());
        let orchestrator = GenerationOrchestrator::new(
            backend.clone(),
            Arc::new(StaticCredential(false)),
            ModelCatalog::default(),
        )
        .unwrap();

        let err = orchestrator.generate(pro_request("x")).await.unwrap_err();
        assert!(matches!(err, GenError::MissingCredential));
        assert!(backend.invocations().is_empty());
    }

    #[tokio::test]
    async fn edit_served_by_second_candidate_is_degraded_not_synthetic() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push(STANDARD, Scripted::image("iVBORedit"));
        let orchestrator = orchestrator(&backend);

        let images = vec![
            ImageBlob::new("image/png", "iVBORa"),
            ImageBlob::new("image/jpeg", "/9j/b"),
        ];
        let result = orchestrator
            .edit(
                EditRequest::new(images, "put the cat on the sofa")
                    .with_aspect_ratio(AspectRatio::Square)
                    .with_resolution(Resolution::R8K),
            )
            .await
            .unwrap();

        assert_eq!(result.served_by, STANDARD);
        assert!(result.degraded);
        assert!(!result.synthetic);

        let calls = backend.invocations();
        let first = &calls[0].payload;
        assert_eq!(first.images.len(), 2);
        let text = first.text.as_deref().unwrap();
        assert!(text.starts_with("put the cat on the sofa"));
        assert!(text.contains("Target aspect ratio: 1:1"));
        assert!(text.contains("Target resolution: 8K"));
        assert!(text.contains("Source images: 2"));
        assert_eq!(
            first.params.as_ref().unwrap().resolution,
            Some(Resolution::R4K)
        );
        assert_eq!(calls[1].payload.params.as_ref().unwrap().resolution, None);
    }

    #[tokio::test(start_paused = true)]
    async fn edit_falls_back_to_synthetic_pipeline() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push(SONNET, Scripted::permission())
            .push(HAIKU, Scripted::text("A portrait of a woman on a transparent background"))
            .push(STANDARD, Scripted::image("iVBORsynthetic"));
        let orchestrator = orchestrator(&backend);

        let result = orchestrator
            .edit(EditRequest::new(
                vec![ImageBlob::new("image/png", "iVBORsrc")],
                "remove background",
            ))
            .await
            .unwrap();

        assert!(result.synthetic);
        assert!(result.degraded);
        assert_eq!(result.served_by, STANDARD);
        assert_eq!(result.artifacts[0].data, "iVBORsynthetic");
        assert_eq!(
            backend.invoked_models(),
            vec![PRO, STANDARD, TITAN_V1, SONNET, HAIKU, STANDARD]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failed_synthetic_edit_is_reported_uniformly() {
        let backend = Arc::new(ScriptedBackend::new());
        let orchestrator = orchestrator(&backend);

        let err = orchestrator
            .edit(EditRequest::new(
                vec![ImageBlob::new("image/png", "iVBORsrc")],
                "remove background",
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, GenError::EditExhausted { .. }));
        assert!(!err.to_string().contains("AccessDenied"));
        // Three edit rungs and both vision rungs; synthesis is never reached.
        assert_eq!(backend.invoked_models().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_descriptions_exhaust_edit_as_unknown() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push(PRO, Scripted::invalid())
            .push(STANDARD, Scripted::invalid())
            .push(TITAN_V1, Scripted::invalid())
            .push(SONNET, Scripted::empty())
            .push(HAIKU, Scripted::empty());
        let orchestrator = orchestrator(&backend);

        let err = orchestrator
            .edit(EditRequest::new(
                vec![ImageBlob::new("image/png", "iVBORsrc")],
                "remove background",
            ))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            GenError::EditExhausted {
                classification: ErrorClassification::Unknown,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn invalid_edit_is_rejected_locally() {
        let backend = Arc::new(ScriptedBackend::new());
        let orchestrator = orchestrator(&backend);

        let err = orchestrator
            .edit(EditRequest::new(Vec::new(), "anything"))
            .await
            .unwrap_err();
        assert!(matches!(err, GenError::InvalidRequest(_)));
        assert!(backend.invocations().is_empty());
    }

    #[tokio::test]
    async fn thinking_chat_falls_back_to_fast_tail() {
        let backend = Arc::new(ScriptedBackend::new());
        let catalog = ModelCatalog::default();
        let thinking_id = catalog.chat_thinking.id.clone();
        let fast_id = catalog.chat_fast.candidates()[0].id.clone();
        backend
            .push(&thinking_id, Scripted::invalid())
            .push(&fast_id, Scripted::Stream(vec![Ok("Hel".into()), Ok("lo".into())]));
        let orchestrator =
            GenerationOrchestrator::new(backend.clone(), Arc::new(StaticCredential(true)), catalog)
                .unwrap();

        let request = ChatRequest::new("hello?")
            .with_history(vec![ChatMessage::user("hi"), ChatMessage::assistant("hey")])
            .with_mode(ChatMode::Thinking);
        let chat = orchestrator.chat(request).await.unwrap();
        assert_eq!(chat.served_by, fast_id);
        assert!(chat.degraded);

        let text: Vec<String> = chat.stream.map(|item| item.unwrap()).collect().await;
        assert_eq!(text.concat(), "Hello");

        let chats = backend.chats();
        assert_eq!(chats[0].thinking_budget, Some(crate::config::DEFAULT_THINKING_BUDGET));
        assert_eq!(chats[1].thinking_budget, None);
        assert_eq!(chats[1].history.len(), 2);
    }

    #[tokio::test]
    async fn mid_stream_failure_is_not_failed_over() {
        let backend = Arc::new(ScriptedBackend::new());
        let catalog = ModelCatalog::default();
        let fast_id = catalog.chat_fast.candidates()[0].id.clone();
        backend.push(
            &fast_id,
            Scripted::Stream(vec![
                Ok("partial".into()),
                Err(GenError::backend("503 ServiceUnavailableException", "overloaded")),
            ]),
        );
        let orchestrator =
            GenerationOrchestrator::new(backend.clone(), Arc::new(StaticCredential(true)), catalog)
                .unwrap();

        let chat = orchestrator.chat(ChatRequest::new("tell me")).await.unwrap();
        assert!(!chat.degraded);
        let items: Vec<Result<String>> = chat.stream.collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "partial");
        assert!(items[1].is_err());
        assert_eq!(backend.chat_models(), vec![fast_id]);
    }
}
