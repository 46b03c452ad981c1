use crate::{
    backend::Backend,
    config::BedrockConfig,
    error::{GenError, Result},
    models::{
        Artifact, BackendRequest, BackendResponse, ChatInvocation, ChatRole, GenerationParams,
        ImageBlob, TextStream,
    },
};
use async_trait::async_trait;
use aws_sdk_bedrockruntime::{
    config::http::HttpResponse,
    error::{ProvideErrorMetadata, SdkError},
    primitives::Blob,
    types::ResponseStream,
    Client,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;

const DEFAULT_LONG_EDGE: u32 = 1024;
const DESCRIBE_MAX_TOKENS: u32 = 1024;
const CHAT_MAX_TOKENS: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelFamily {
    AmazonImage,
    Stability,
    Anthropic,
    TitanText,
}

impl ModelFamily {
    fn of(model_id: &str) -> Result<Self> {
        // Cross-region inference profiles prefix the id, e.g. "us.anthropic...".
        let id = match model_id.split_once('.') {
            Some((region, rest)) if matches!(region, "us" | "eu" | "apac") => rest,
            _ => model_id,
        };

        let family = match id {
            id if id.starts_with("amazon.titan-image") || id.starts_with("amazon.nova-canvas") => {
                ModelFamily::AmazonImage
            }
            id if id.starts_with("stability.") => ModelFamily::Stability,
            id if id.starts_with("anthropic.claude") => ModelFamily::Anthropic,
            id if id.starts_with("amazon.titan-text") => ModelFamily::TitanText,
            _ => {
                return Err(GenError::InvalidRequest(format!(
                    "Unsupported model ID: {}",
                    model_id
                )))
            }
        };
        Ok(family)
    }
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    finish_reasons: Vec<Option<String>>,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// [`Backend`] over the AWS Bedrock runtime API.
#[derive(Clone)]
pub struct BedrockBackend {
    client: Client,
}

impl BedrockBackend {
    pub async fn new(bedrock_config: BedrockConfig) -> Result<Self> {
        let region = aws_sdk_bedrockruntime::config::Region::new(
            bedrock_config
                .region
                .clone()
                .unwrap_or_else(|| "us-east-1".to_string()),
        );

        let aws_config = if let (Some(access_key), Some(secret_key)) =
            (&bedrock_config.access_key, &bedrock_config.secret_key)
        {
            aws_config::from_env()
                .credentials_provider(aws_sdk_bedrockruntime::config::Credentials::new(
                    access_key,
                    secret_key,
                    None,
                    None,
                    "genwaterfall",
                ))
                .region(region)
                .load()
                .await
        } else {
            aws_config::from_env().region(region).load().await
        };

        Ok(Self::from_client(Client::new(&aws_config)))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn build_invoke_payload(request: &BackendRequest) -> Result<(ModelFamily, Value)> {
        let family = ModelFamily::of(&request.model)?;
        let text = request.payload.text.clone().unwrap_or_default();
        let images = &request.payload.images;

        let payload = match family {
            ModelFamily::AmazonImage => {
                let params = request.payload.params.as_ref().ok_or_else(|| {
                    GenError::InvalidRequest("image models need generation params".into())
                })?;
                let (width, height) = dimensions(params);
                let quality = if params.resolution.is_some() {
                    "premium"
                } else {
                    "standard"
                };
                let config = json!({
                    "numberOfImages": params.count.max(1),
                    "width": width,
                    "height": height,
                    "quality": quality,
                    "cfgScale": 8.0
                });
                if images.is_empty() {
                    json!({
                        "taskType": "TEXT_IMAGE",
                        "textToImageParams": { "text": text },
                        "imageGenerationConfig": config
                    })
                } else {
                    json!({
                        "taskType": "IMAGE_VARIATION",
                        "imageVariationParams": {
                            "text": text,
                            "images": images.iter().map(|i| i.data.as_str()).collect::<Vec<_>>(),
                            "similarityStrength": 0.7
                        },
                        "imageGenerationConfig": config
                    })
                }
            }
            ModelFamily::Stability => {
                let aspect_ratio = request
                    .payload
                    .params
                    .as_ref()
                    .map(|p| p.aspect_ratio)
                    .unwrap_or_default();
                match images.as_slice() {
                    [] => json!({
                        "prompt": text,
                        "mode": "text-to-image",
                        "aspect_ratio": aspect_ratio.as_str(),
                        "output_format": "png"
                    }),
                    [image] => json!({
                        "prompt": text,
                        "mode": "image-to-image",
                        "image": image.data,
                        "strength": 0.7,
                        "output_format": "png"
                    }),
                    _ => {
                        return Err(GenError::InvalidRequest(format!(
                            "{} takes one source image, got {}",
                            request.model,
                            images.len()
                        )))
                    }
                }
            }
            ModelFamily::Anthropic => {
                let mut content: Vec<Value> = images
                    .iter()
                    .map(|image| {
                        json!({
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": image.mime_type,
                                "data": image.data
                            }
                        })
                    })
                    .collect();
                content.push(json!({ "type": "text", "text": text }));
                json!({
                    "anthropic_version": "bedrock-2023-05-31",
                    "max_tokens": DESCRIBE_MAX_TOKENS,
                    "messages": [{ "role": "user", "content": content }]
                })
            }
            ModelFamily::TitanText => json!({
                "inputText": text,
                "textGenerationConfig": {
                    "maxTokenCount": DESCRIBE_MAX_TOKENS,
                    "temperature": 0.7,
                    "topP": 0.9
                }
            }),
        };

        Ok((family, payload))
    }

    fn parse_invoke_response(family: ModelFamily, body: &[u8]) -> Result<BackendResponse> {
        let artifacts = match family {
            ModelFamily::AmazonImage | ModelFamily::Stability => {
                let parsed: ImagesResponse = serde_json::from_slice(body)
                    .map_err(|e| GenError::Response(e.to_string()))?;
                if let Some(error) = parsed.error {
                    return Err(GenError::Response(error));
                }
                parsed
                    .images
                    .into_iter()
                    .enumerate()
                    // Stability reports filtered images through a non-null finish reason.
                    .filter(|(i, _)| {
                        parsed
                            .finish_reasons
                            .get(*i)
                            .map_or(true, |reason| reason.is_none())
                    })
                    .map(|(_, data)| {
                        let mime = crate::models::detect_mime_type(&data);
                        Artifact::Image(ImageBlob::new(mime, data))
                    })
                    .collect()
            }
            ModelFamily::Anthropic => {
                let parsed: AnthropicResponse = serde_json::from_slice(body)
                    .map_err(|e| GenError::Response(e.to_string()))?;
                parsed
                    .content
                    .into_iter()
                    .filter(|block| block.kind == "text")
                    .filter_map(|block| block.text)
                    .map(Artifact::Text)
                    .collect()
            }
            ModelFamily::TitanText => {
                let parsed: Value = serde_json::from_slice(body)
                    .map_err(|e| GenError::Response(e.to_string()))?;
                parsed["results"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(|r| r["outputText"].as_str())
                    .map(|t| Artifact::Text(t.to_string()))
                    .collect()
            }
        };

        Ok(BackendResponse { artifacts })
    }

    fn build_chat_payload(invocation: &ChatInvocation) -> Result<(ModelFamily, Value)> {
        let family = ModelFamily::of(&invocation.model)?;

        let payload = match family {
            ModelFamily::Anthropic => {
                let mut messages: Vec<Value> = invocation
                    .history
                    .iter()
                    .map(|m| json!({ "role": m.role.as_str(), "content": m.text }))
                    .collect();
                messages.push(json!({ "role": "user", "content": invocation.message }));

                let mut payload = json!({
                    "anthropic_version": "bedrock-2023-05-31",
                    "max_tokens": CHAT_MAX_TOKENS,
                    "messages": messages
                });
                if let Some(budget) = invocation.thinking_budget {
                    if let Some(obj) = payload.as_object_mut() {
                        obj.insert(
                            "thinking".to_string(),
                            json!({ "type": "enabled", "budget_tokens": budget }),
                        );
                        // The reply budget must exceed the thinking budget.
                        obj.insert("max_tokens".to_string(), json!(budget + CHAT_MAX_TOKENS));
                    }
                }
                payload
            }
            ModelFamily::TitanText => json!({
                "inputText": transcript(invocation),
                "textGenerationConfig": {
                    "maxTokenCount": CHAT_MAX_TOKENS,
                    "temperature": 0.7,
                    "topP": 0.9
                }
            }),
            ModelFamily::AmazonImage | ModelFamily::Stability => {
                return Err(GenError::InvalidRequest(format!(
                    "{} cannot hold a conversation",
                    invocation.model
                )))
            }
        };

        Ok((family, payload))
    }

    /// Text carried by one streamed event, if any.
    fn parse_stream_chunk(family: ModelFamily, chunk: &[u8]) -> Result<Option<String>> {
        let json: Value =
            serde_json::from_slice(chunk).map_err(|e| GenError::Response(e.to_string()))?;

        let text = match family {
            // Thinking deltas are not part of the visible reply.
            ModelFamily::Anthropic => match json["delta"]["type"].as_str() {
                Some("text_delta") => json["delta"]["text"].as_str(),
                _ => None,
            },
            ModelFamily::TitanText => json["outputText"].as_str(),
            ModelFamily::AmazonImage | ModelFamily::Stability => None,
        };

        Ok(text.filter(|t| !t.is_empty()).map(str::to_string))
    }
}

fn dimensions(params: &GenerationParams) -> (u32, u32) {
    let long_edge = params
        .resolution
        .map(|r| r.long_edge())
        .unwrap_or(DEFAULT_LONG_EDGE);
    params.aspect_ratio.dimensions(long_edge)
}

fn transcript(invocation: &ChatInvocation) -> String {
    let mut out = String::new();
    for message in &invocation.history {
        let speaker = match message.role {
            ChatRole::User => "User",
            ChatRole::Assistant => "Bot",
        };
        out.push_str(&format!("{}: {}\n", speaker, message.text));
    }
    out.push_str(&format!("User: {}\nBot:", invocation.message));
    out
}

/// Keeps the HTTP status and service code in the text the classifier reads.
fn backend_error<E>(err: SdkError<E, HttpResponse>) -> GenError
where
    E: ProvideErrorMetadata + std::fmt::Debug,
{
    let status = err.raw_response().map(|r| r.status().as_u16());

    if let Some(service_error) = err.as_service_error() {
        log::debug!("Bedrock service error details: {:?}", service_error);
        let code = match (status, service_error.code()) {
            (Some(status), Some(code)) => format!("{} {}", status, code),
            (Some(status), None) => status.to_string(),
            (None, Some(code)) => code.to_string(),
            (None, None) => "unknown".to_string(),
        };
        GenError::Backend {
            code: Some(code),
            message: service_error.message().unwrap_or("no message").to_string(),
        }
    } else {
        GenError::Backend {
            code: status.map(|s| s.to_string()),
            message: format!("AWS SDK error: {}", err),
        }
    }
}

#[async_trait]
impl Backend for BedrockBackend {
    async fn invoke(&self, request: BackendRequest) -> Result<BackendResponse> {
        let (family, payload) = Self::build_invoke_payload(&request)?;
        let request_json = serde_json::to_string(&payload)
            .map_err(|e| GenError::Serialization(e.to_string()))?;

        log::info!("Invoking model: {}", request.model);

        let response = self
            .client
            .invoke_model()
            .model_id(&request.model)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(request_json.into_bytes()))
            .send()
            .await
            .map_err(backend_error)?;

        Self::parse_invoke_response(family, response.body.as_ref())
    }

    async fn open_chat(&self, invocation: ChatInvocation) -> Result<TextStream> {
        let (family, payload) = Self::build_chat_payload(&invocation)?;
        let request_json = serde_json::to_string(&payload)
            .map_err(|e| GenError::Serialization(e.to_string()))?;

        log::info!("Opening chat stream with model: {}", invocation.model);

        let response = self
            .client
            .invoke_model_with_response_stream()
            .model_id(&invocation.model)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(request_json.into_bytes()))
            .send()
            .await
            .map_err(backend_error)?;

        let (tx, rx) = tokio::sync::mpsc::channel(100);
        let mut event_receiver = response.body;

        tokio::spawn(async move {
            loop {
                match event_receiver.recv().await {
                    Ok(Some(ResponseStream::Chunk(chunk))) => {
                        let Some(bytes) = chunk.bytes else { continue };
                        match Self::parse_stream_chunk(family, bytes.as_ref()) {
                            Ok(None) => continue,
                            Ok(Some(text)) => {
                                if tx.send(Ok(text)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                break;
                            }
                        }
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx
                            .send(Err(GenError::Backend {
                                code: None,
                                message: format!("stream interrupted: {}", e),
                            }))
                            .await;
                        break;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
