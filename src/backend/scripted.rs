//! Test double that replays queued outcomes per model id.

use crate::{
    backend::Backend,
    error::{GenError, Result},
    models::{Artifact, BackendRequest, BackendResponse, ChatInvocation, ImageBlob, TextStream},
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

pub enum Scripted {
    Respond(BackendResponse),
    Fail(GenError),
    Stream(Vec<Result<String>>),
}

impl Scripted {
    pub fn image(data: &str) -> Self {
        Scripted::Respond(BackendResponse {
            artifacts: vec![Artifact::Image(ImageBlob::new("image/png", data))],
        })
    }

    pub fn text(text: &str) -> Self {
        Scripted::Respond(BackendResponse {
            artifacts: vec![Artifact::Text(text.to_string())],
        })
    }

    pub fn empty() -> Self {
        Scripted::Respond(BackendResponse::default())
    }

    pub fn permission() -> Self {
        Scripted::Fail(GenError::backend("403 AccessDeniedException", "no access"))
    }

    pub fn quota() -> Self {
        Scripted::Fail(GenError::backend("429 ThrottlingException", "Too many requests"))
    }

    pub fn invalid() -> Self {
        Scripted::Fail(GenError::backend("400 ValidationException", "bad input"))
    }
}

#[derive(Default)]
pub struct ScriptedBackend {
    script: Mutex<HashMap<String, VecDeque<Scripted>>>,
    invocations: Mutex<Vec<BackendRequest>>,
    chats: Mutex<Vec<ChatInvocation>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `outcome` for the next unanswered call to `model`.
    pub fn push(&self, model: &str, outcome: Scripted) -> &Self {
        self.script
            .lock()
            .unwrap()
            .entry(model.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Every `invoke` call so far, in order.
    pub fn invocations(&self) -> Vec<BackendRequest> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn invoked_models(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .map(|request| request.model)
            .collect()
    }

    pub fn chat_models(&self) -> Vec<String> {
        self.chats
            .lock()
            .unwrap()
            .iter()
            .map(|invocation| invocation.model.clone())
            .collect()
    }

    pub fn chats(&self) -> Vec<ChatInvocation> {
        self.chats.lock().unwrap().clone()
    }

    fn next(&self, model: &str) -> Scripted {
        self.script
            .lock()
            .unwrap()
            .get_mut(model)
            .and_then(VecDeque::pop_front)
            // Unscripted models behave like a model the account cannot use.
            .unwrap_or_else(Scripted::permission)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn invoke(&self, request: BackendRequest) -> Result<BackendResponse> {
        let model = request.model.clone();
        self.invocations.lock().unwrap().push(request);
        match self.next(&model) {
            Scripted::Respond(response) => Ok(response),
            Scripted::Fail(err) => Err(err),
            Scripted::Stream(_) => panic!("stream scripted for invoke on {}", model),
        }
    }

    async fn open_chat(&self, invocation: ChatInvocation) -> Result<TextStream> {
        let model = invocation.model.clone();
        self.chats.lock().unwrap().push(invocation);
        match self.next(&model) {
            Scripted::Stream(items) => Ok(Box::pin(futures::stream::iter(items))),
            Scripted::Fail(err) => Err(err),
            Scripted::Respond(_) => panic!("response scripted for chat on {}", model),
        }
    }
}
