//! JSON shapes exchanged between the front end, the gateway and the upstream
//! chat-completions service.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::modes::GenerationMode;

/// Fixed path the front end posts generation requests to.
pub const GENERATE_PATH: &str = "/api/generate";

pub const SSE_DATA_PREFIX: &str = "data: ";
pub const SSE_DONE_LINE: &str = "data: [DONE]";

/// Body of the front end's generation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequestBody {
    pub password: String,
    pub image_base64: String,
    pub mime_type: String,
    #[serde(default)]
    pub mode: GenerationMode,
}

/// Error body returned by the gateway on any rejected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Best-effort decode of a rejected response body.
    pub fn parse(body: &str) -> Option<Self> {
        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .filter(|parsed| !parsed.error.trim().is_empty())
    }
}

pub fn image_data_url(mime_type: &str, image_base64: &str) -> String {
    format!("data:{mime_type};base64,{image_base64}")
}

/// Builds the streamed multimodal chat-completions payload for one upload.
pub fn build_chat_payload(model: &str, body: &GenerateRequestBody) -> Value {
    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                {
                    "type": "text",
                    "text": body.mode.instruction(),
                },
                {
                    "type": "image_url",
                    "image_url": {
                        "url": image_data_url(&body.mime_type, &body.image_base64),
                    }
                }
            ],
        }],
        "stream": true,
    })
}

/// Resolves the chat-completions endpoint for a configured API base.
///
/// `https://host` and `https://host/` become `https://host/v1/chat/completions`,
/// `https://host/v1` becomes `https://host/v1/chat/completions`, and a base that
/// already names the endpoint is kept as-is.
pub fn chat_completions_url(api_base: &str) -> String {
    let mut url = api_base.trim().trim_end_matches('/').to_string();
    if !url.ends_with("/chat/completions") {
        if url.ends_with("/v1") {
            url.push_str("/chat/completions");
        } else {
            url.push_str("/v1/chat/completions");
        }
    }
    url
}

/// `choices[0].delta.content` of one stream envelope, when it carries text.
pub fn delta_content(envelope: &Value) -> Option<&str> {
    envelope
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(|row| row.get("delta"))
        .and_then(|delta| delta.get("content"))
        .and_then(Value::as_str)
        .filter(|content| !content.is_empty())
}

/// One `data:` line carrying a content delta, as the upstream would send it.
pub fn delta_line(content: &str) -> String {
    let envelope = json!({
        "choices": [{
            "index": 0,
            "delta": { "content": content },
        }]
    });
    format!("{SSE_DATA_PREFIX}{envelope}\n")
}
