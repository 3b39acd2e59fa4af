//! Gemini `generateContent` client (token-based backend)

use crate::ai::credentials::TokenProvider;
use crate::ai::types::{GenerateRequest, GenerateResponse, ToolCall, Turn};
use crate::error::{OrchestratorError, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

pub struct GeminiClient {
    client: Client,
    endpoint: String,
    tokens: TokenProvider,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTools>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct GeminiFunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTools {
    function_declarations: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

impl GeminiClient {
    pub fn new(endpoint: &str, token_path: impl Into<PathBuf>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OrchestratorError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            tokens: TokenProvider::new(client.clone(), token_path),
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse> {
        let access_token = self.tokens.access_token().await?;
        let body = Self::build_request(request);
        let url = format!("{}/models/{}:generateContent", self.endpoint, request.model);

        log::info!(
            "[GEMINI] Sending request to {} with {} turns and {} tools",
            url,
            body.contents.len(),
            request.tools.len()
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
                self.tokens.invalidate().await;
            }
            return Err(Self::map_error_status(status, &text));
        }

        log::debug!("[GEMINI] Raw response:\n{}", text);
        Self::parse_response(&text)
    }

    fn map_error_status(status: StatusCode, body: &str) -> OrchestratorError {
        let message = serde_json::from_str::<GeminiErrorResponse>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| format!("status {}, body: {}", status, body));

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                OrchestratorError::AuthFailure(format!("Gemini API error: {}", message))
            }
            _ => OrchestratorError::ProviderRejection(format!("Gemini API error: {}", message)),
        }
    }

    fn build_request(request: &GenerateRequest) -> GeminiRequest {
        let system_instruction = request
            .system_prompt
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(s.to_string()),
                    ..Default::default()
                }],
            });

        let tools = if request.tools.is_empty() {
            vec![]
        } else {
            vec![GeminiTools {
                function_declarations: request
                    .tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        })
                    })
                    .collect(),
            }]
        };

        GeminiRequest {
            contents: Self::transcript_to_contents(&request.transcript),
            system_instruction,
            tools,
        }
    }

    /// Consecutive tool responses are grouped into one `user` content made of
    /// `functionResponse` parts, following the model turn that requested them.
    fn transcript_to_contents(transcript: &[Turn]) -> Vec<GeminiContent> {
        let mut contents: Vec<GeminiContent> = Vec::new();

        for turn in transcript {
            match turn {
                Turn::User { text } => contents.push(GeminiContent {
                    role: Some("user".to_string()),
                    parts: vec![GeminiPart {
                        text: Some(text.clone()),
                        ..Default::default()
                    }],
                }),
                Turn::Model { text, tool_calls } => {
                    let mut parts = Vec::new();
                    if !text.is_empty() {
                        parts.push(GeminiPart {
                            text: Some(text.clone()),
                            ..Default::default()
                        });
                    }
                    for call in tool_calls {
                        parts.push(GeminiPart {
                            function_call: Some(GeminiFunctionCall {
                                id: None,
                                name: call.name.clone(),
                                args: call.arguments.clone(),
                            }),
                            ..Default::default()
                        });
                    }
                    contents.push(GeminiContent {
                        role: Some("model".to_string()),
                        parts,
                    });
                }
                Turn::ToolResponse { name, content, .. } => {
                    let response = match content {
                        Value::Object(_) => content.clone(),
                        other => json!({ "content": other }),
                    };
                    let part = GeminiPart {
                        function_response: Some(GeminiFunctionResponse {
                            name: name.clone(),
                            response,
                        }),
                        ..Default::default()
                    };

                    let extends_previous = contents.last().is_some_and(|c| {
                        c.role.as_deref() == Some("user")
                            && c.parts.iter().all(|p| p.function_response.is_some())
                    });
                    match contents.last_mut() {
                        Some(last) if extends_previous => last.parts.push(part),
                        _ => contents.push(GeminiContent {
                            role: Some("user".to_string()),
                            parts: vec![part],
                        }),
                    }
                }
            }
        }

        contents
    }

    fn parse_response(text: &str) -> Result<GenerateResponse> {
        let response: GeminiResponse = serde_json::from_str(text).map_err(|e| {
            OrchestratorError::ProviderRejection(format!(
                "Failed to parse Gemini response: {} - body: {}",
                e, text
            ))
        })?;

        let Some(candidate) = response.candidates.first() else {
            let reason = response
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .map(|r| format!("prompt blocked: {}", r))
                .unwrap_or_else(|| "Gemini API returned no candidates".to_string());
            return Ok(GenerateResponse::NoCandidates { reason });
        };

        log::info!(
            "[GEMINI] Response - parts: {}, finish_reason: {:?}",
            candidate.content.as_ref().map(|c| c.parts.len()).unwrap_or(0),
            candidate.finish_reason
        );

        let mut text_out = String::new();
        let mut calls = Vec::new();
        for part in candidate.content.iter().flat_map(|c| c.parts.iter()) {
            if let Some(t) = &part.text {
                text_out.push_str(t);
            }
            if let Some(fc) = &part.function_call {
                calls.push(ToolCall {
                    id: fc
                        .id
                        .clone()
                        .unwrap_or_else(|| format!("gemini_{}", Uuid::new_v4().simple())),
                    name: fc.name.clone(),
                    arguments: if fc.args.is_null() { json!({}) } else { fc.args.clone() },
                });
            }
        }

        Ok(GenerateResponse::from_parts(text_out, calls))
    }
}
