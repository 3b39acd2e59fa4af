use crate::ai::types::{GenerateRequest, GenerateResponse, ToolCall, ToolDeclaration, Turn};
use crate::error::{OrchestratorError, Result};
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAICompletionRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OpenAIMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAIFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OpenAIToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct OpenAIFunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAICompletionResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    message: String,
}

impl OpenAIClient {
    pub fn new(api_key: Option<&str>, endpoint: Option<&str>, timeout: Duration) -> Result<Self> {
        let endpoint_url = endpoint
            .unwrap_or("https://api.openai.com/v1/chat/completions")
            .to_string();

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| OrchestratorError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint_url,
            api_key: api_key.filter(|k| !k.is_empty()).map(|k| k.to_string()),
        })
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| OrchestratorError::AuthFailure("OPENAI_API_KEY not configured".to_string()))?;

        let body = Self::build_request(request);

        log::info!(
            "[OPENAI] Sending request to {} with model {} and {} tools",
            self.endpoint,
            request.model,
            body.tools.as_ref().map(|t| t.len()).unwrap_or(0)
        );
        log::debug!(
            "[OPENAI] Full request:\n{}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let response_text = response.text().await?;

        if !status.is_success() {
            return Err(Self::map_error_status(status, &response_text));
        }

        log::debug!("[OPENAI] Raw response:\n{}", response_text);
        Self::parse_response(&response_text)
    }

    fn map_error_status(status: StatusCode, body: &str) -> OrchestratorError {
        let message = serde_json::from_str::<OpenAIErrorResponse>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| format!("status {}, body: {}", status, body));

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                OrchestratorError::AuthFailure(format!("OpenAI API error: {}", message))
            }
            _ => OrchestratorError::ProviderRejection(format!("OpenAI API error: {}", message)),
        }
    }

    fn build_request(request: &GenerateRequest) -> OpenAICompletionRequest {
        let mut messages = Vec::new();
        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.is_empty()) {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: Some(system.to_string()),
                tool_calls: None,
                tool_call_id: None,
            });
        }
        messages.extend(Self::transcript_to_messages(&request.transcript));

        let tools: Option<Vec<OpenAITool>> = if request.tools.is_empty() {
            None
        } else {
            Some(request.tools.iter().map(Self::declaration_to_tool).collect())
        };

        OpenAICompletionRequest {
            model: request.model.clone(),
            messages,
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
        }
    }

    fn declaration_to_tool(declaration: &ToolDeclaration) -> OpenAITool {
        OpenAITool {
            tool_type: "function".to_string(),
            function: OpenAIFunction {
                name: declaration.name.clone(),
                description: declaration.description.clone(),
                parameters: declaration.parameters.clone(),
            },
        }
    }

    /// Model turns become assistant messages carrying `tool_calls`, tool
    /// responses become `tool` role messages keyed by call id.
    pub fn transcript_to_messages(transcript: &[Turn]) -> Vec<OpenAIMessage> {
        transcript
            .iter()
            .map(|turn| match turn {
                Turn::User { text } => OpenAIMessage {
                    role: "user".to_string(),
                    content: Some(text.clone()),
                    tool_calls: None,
                    tool_call_id: None,
                },
                Turn::Model { text, tool_calls } => OpenAIMessage {
                    role: "assistant".to_string(),
                    content: Some(text.clone()),
                    tool_calls: if tool_calls.is_empty() {
                        None
                    } else {
                        Some(
                            tool_calls
                                .iter()
                                .map(|tc| OpenAIToolCall {
                                    id: tc.id.clone(),
                                    call_type: "function".to_string(),
                                    function: OpenAIFunctionCall {
                                        name: tc.name.clone(),
                                        arguments: match &tc.arguments {
                                            Value::String(raw) => raw.clone(),
                                            args => args.to_string(),
                                        },
                                    },
                                })
                                .collect(),
                        )
                    },
                    tool_call_id: None,
                },
                Turn::ToolResponse { call_id, content, .. } => OpenAIMessage {
                    role: "tool".to_string(),
                    content: Some(Turn::content_text(content)),
                    tool_calls: None,
                    tool_call_id: Some(call_id.clone()),
                },
            })
            .collect()
    }

    fn parse_response(response_text: &str) -> Result<GenerateResponse> {
        let response_data: OpenAICompletionResponse = serde_json::from_str(response_text)
            .map_err(|e| {
                OrchestratorError::ProviderRejection(format!(
                    "Failed to parse OpenAI response: {} - body: {}",
                    e, response_text
                ))
            })?;

        let Some(choice) = response_data.choices.first() else {
            return Ok(GenerateResponse::NoCandidates {
                reason: "OpenAI API returned no choices".to_string(),
            });
        };

        log::info!(
            "[OPENAI] Response - content_len: {}, tool_calls: {}, finish_reason: {:?}",
            choice.message.content.as_ref().map(|c| c.len()).unwrap_or(0),
            choice.message.tool_calls.as_ref().map(|t| t.len()).unwrap_or(0),
            choice.finish_reason
        );

        let content = choice.message.content.clone().unwrap_or_default();
        let tool_calls: Vec<ToolCall> = choice
            .message
            .tool_calls
            .as_ref()
            .map(|calls| {
                calls
                    .iter()
                    .map(|tc| ToolCall {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        // Unparseable text is passed on as-is so the loop can report it
                        arguments: serde_json::from_str(&tc.function.arguments)
                            .unwrap_or_else(|_| Value::String(tc.function.arguments.clone())),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(GenerateResponse::from_parts(content, tool_calls))
    }
}
