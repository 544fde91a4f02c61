use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse,
    },
    Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{classify_openai, AppError, FailureKind};
use crate::types::ContextWindow;
use crate::utils::duration_millis;

pub const GROUNDING_SYSTEM_INSTRUCTION: &str = "You answer questions about a transcript. \
    Answer based only on the provided context. If the context does not contain the \
    information needed, say so instead of guessing.";

/// A prior answered question threaded into a follow-up request as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub question: String,
    pub answer: String,
}

/// Everything needed for one upstream generation call.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub context: ContextWindow,
    pub question: String,
    pub history: Vec<Exchange>,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub answer: String,
    pub model: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub latency_ms: u64,
}

/// Seam between the batch pipeline and the upstream model. Tests swap in a
/// mock; production uses `OpenAiGeneration`.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, AppError>;
}

pub fn create_user_message(context: &str, question: &str) -> String {
    format!(
        r"
        Given the following context from a video transcript:
        ==================
        {context}

        Question:
        ==================
        {question}
        "
    )
}

pub fn create_chat_request(
    request: &GenerationRequest,
) -> Result<CreateChatCompletionRequest, OpenAIError> {
    let mut messages: Vec<ChatCompletionRequestMessage> =
        Vec::with_capacity(2 + request.history.len() * 2);
    messages
        .push(ChatCompletionRequestSystemMessage::from(GROUNDING_SYSTEM_INSTRUCTION).into());
    for exchange in &request.history {
        messages.push(ChatCompletionRequestUserMessage::from(exchange.question.clone()).into());
        messages.push(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(exchange.answer.clone())
                .build()?
                .into(),
        );
    }
    messages.push(
        ChatCompletionRequestUserMessage::from(create_user_message(
            &request.context.text,
            &request.question,
        ))
        .into(),
    );

    CreateChatCompletionRequestArgs::default()
        .model(&request.model)
        .messages(messages)
        .build()
}

pub fn process_response(
    response: CreateChatCompletionResponse,
    latency_ms: u64,
) -> Result<GenerationResponse, AppError> {
    let answer = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_ref())
        .ok_or(AppError::PermanentApi(
            "no content in model response".into(),
        ))?
        .clone();

    Ok(GenerationResponse {
        answer,
        model: response.model,
        prompt_tokens: response.usage.as_ref().map(|usage| usage.prompt_tokens),
        completion_tokens: response
            .usage
            .as_ref()
            .map(|usage| usage.completion_tokens),
        latency_ms,
    })
}

/// Production `GenerationService` backed by an OpenAI-compatible endpoint.
pub struct OpenAiGeneration {
    client: Arc<Client<OpenAIConfig>>,
}

impl OpenAiGeneration {
    pub fn new(client: Arc<Client<OpenAIConfig>>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl GenerationService for OpenAiGeneration {
    #[tracing::instrument(
        skip_all,
        fields(model = %request.model, context_chars = request.context.char_len())
    )]
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, AppError> {
        let chat_request = create_chat_request(request)?;
        let started = std::time::Instant::now();
        let response = self.client.chat().create(chat_request).await.map_err(
            |err| match classify_openai(&err) {
                FailureKind::RateLimited => AppError::RateLimited(err.to_string()),
                FailureKind::Transient => AppError::TransientApi(err.to_string()),
                FailureKind::Permanent => AppError::OpenAI(err),
            },
        )?;
        process_response(response, duration_millis(started.elapsed()))
    }
}
