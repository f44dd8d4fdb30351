// ABOUTME: OpenAI-compatible chat completions client for agent turns
// ABOUTME: Maps transcripts and tool definitions to the function-calling wire format

use super::{
    AgentProvider, AgentProviderError, AgentProviderResult, ChatMessage, Role, ToolCallRequest,
    TurnRequest,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAIProvider {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAIProvider {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> AgentProviderResult<Self> {
        Self::with_timeouts(
            api_key,
            base_url,
            Duration::from_secs(600),
            Duration::from_secs(10),
        )
    }

    pub fn with_timeouts(
        api_key: Option<String>,
        base_url: Option<String>,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> AgentProviderResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .build()?;

        if api_key.is_none() {
            info!("OPENAI_API_KEY not set - agent turns will fail until one is configured");
        }

        Ok(Self {
            client,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
            tool_calls: message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    call_type: function_type(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect(),
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

impl From<WireMessage> for ChatMessage {
    fn from(message: WireMessage) -> Self {
        Self {
            role: message.role,
            content: message.content,
            tool_calls: message
                .tool_calls
                .into_iter()
                .map(|call| ToolCallRequest {
                    id: call.id,
                    name: call.function.name,
                    arguments: call.function.arguments,
                })
                .collect(),
            tool_call_id: message.tool_call_id,
        }
    }
}

#[async_trait]
impl AgentProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: TurnRequest<'_>) -> AgentProviderResult<ChatMessage> {
        let api_key = self.api_key.as_ref().ok_or(AgentProviderError::NoApiKey)?;

        let mut messages = Vec::with_capacity(request.transcript.len() + 1);
        messages.push(WireMessage::from(&ChatMessage {
            role: Role::System,
            content: Some(request.system.to_string()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }));
        messages.extend(request.transcript.iter().map(WireMessage::from));

        let body = CompletionRequest {
            model: request.model,
            messages,
            tools: request
                .tools
                .iter()
                .map(|tool| WireTool {
                    tool_type: "function",
                    function: WireFunction {
                        name: tool.name,
                        description: tool.description,
                        parameters: &tool.parameters,
                    },
                })
                .collect(),
        };

        debug!(
            "Making chat completion request: model={}, messages={}",
            request.model,
            body.messages.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Chat completion request failed: {}", e);
                AgentProviderError::RequestFailed(e)
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!("OpenAI API error: {} - {}", status, message);
            return Err(AgentProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| AgentProviderError::ParseError(e.to_string()))?;

        if let Some(usage) = &completion.usage {
            debug!(
                "Chat completion usage: prompt={}, completion={}",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        let message = completion
            .choices
            .into_iter()
            .next()
            .ok_or(AgentProviderError::InvalidResponse)?
            .message;

        if message.role != Role::Assistant {
            return Err(AgentProviderError::InvalidResponse);
        }

        Ok(message.into())
    }
}
