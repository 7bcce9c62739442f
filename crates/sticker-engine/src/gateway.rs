//! In-process stand-in for the deployed `/api/generate` handler.
//!
//! The gateway checks the shared access password, then forwards the upload as
//! one streamed chat-completions call. A successful upstream stream is passed
//! back untouched; a rejected one is rewritten into the gateway's error body.

use std::env;
use std::io::Cursor;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::Value;
use sticker_contracts::wire::{build_chat_payload, chat_completions_url, ErrorBody, GenerateRequestBody};

use crate::error::{PipelineError, Result};
use crate::transport::{
    build_http_client, GenerationTransport, TransportResponse, UPSTREAM_ERROR_PREFIX,
};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL_ID: &str = "gemini-2.0-flash-exp";

const MISSING_PASSWORD_MESSAGE: &str = "Server misconfigured: ACCESS_PASSWORD not set";
const MISSING_KEY_MESSAGE: &str = "Server misconfigured: GEMINI_API_KEY not set";
const INVALID_PASSWORD_MESSAGE: &str = "Unauthorized: Invalid Password";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub access_password: Option<String>,
    pub api_key: Option<String>,
    pub api_base: String,
    pub model_id: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            access_password: None,
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model_id: DEFAULT_MODEL_ID.to_string(),
        }
    }
}

impl GatewayConfig {
    /// Reads `ACCESS_PASSWORD`, `GEMINI_API_KEY`, `API_BASE_URL` and `MODEL_ID`.
    /// Blank values count as unset.
    pub fn from_env() -> Self {
        Self {
            access_password: non_empty_env("ACCESS_PASSWORD"),
            api_key: non_empty_env("GEMINI_API_KEY"),
            api_base: non_empty_env("API_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model_id: non_empty_env("MODEL_ID").unwrap_or_else(|| DEFAULT_MODEL_ID.to_string()),
        }
    }

    pub fn upstream_url(&self) -> String {
        chat_completions_url(&self.api_base)
    }
}

/// Outbound half of the gateway.
pub trait ChatUpstream: Send + Sync {
    fn post_chat(&self, url: &str, api_key: &str, payload: &Value) -> Result<TransportResponse>;
}

pub struct HttpUpstream {
    http: HttpClient,
}

impl HttpUpstream {
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            http: build_http_client(timeout)?,
        })
    }
}

impl ChatUpstream for HttpUpstream {
    fn post_chat(&self, url: &str, api_key: &str, payload: &Value) -> Result<TransportResponse> {
        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(payload)
            .send()
            .map_err(|err| PipelineError::Transport(format!("upstream request failed ({url}): {err}")))?;
        let status = response.status().as_u16();
        Ok(TransportResponse::new(status, response))
    }
}

pub struct Gateway {
    config: GatewayConfig,
    upstream: Box<dyn ChatUpstream>,
}

impl Gateway {
    pub fn new(config: GatewayConfig, upstream: Box<dyn ChatUpstream>) -> Self {
        Self { config, upstream }
    }

    pub fn from_env(timeout: Option<Duration>) -> Result<Self> {
        Ok(Self::new(
            GatewayConfig::from_env(),
            Box::new(HttpUpstream::new(timeout)?),
        ))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn authorize(&self, password: &str) -> Result<&str> {
        let Some(expected) = self.config.access_password.as_deref() else {
            return Err(PipelineError::ServerConfig(MISSING_PASSWORD_MESSAGE.to_string()));
        };
        if password != expected {
            return Err(PipelineError::Auth(INVALID_PASSWORD_MESSAGE.to_string()));
        }
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| PipelineError::ServerConfig(MISSING_KEY_MESSAGE.to_string()))
    }
}

impl GenerationTransport for Gateway {
    fn name(&self) -> &str {
        "gateway"
    }

    fn submit(&self, body: &GenerateRequestBody) -> Result<TransportResponse> {
        let api_key = self.authorize(&body.password)?;
        let url = self.config.upstream_url();
        let payload = build_chat_payload(&self.config.model_id, body);
        tracing::debug!(url = %url, model = %self.config.model_id, mode = %body.mode, "forwarding generation upstream");

        let response = self.upstream.post_chat(&url, api_key, &payload)?;
        if response.is_success() {
            return Ok(response);
        }

        let status = response.status;
        let details = response.read_text();
        tracing::warn!(status, "upstream rejected generation request");
        let error = ErrorBody::new(format!("{UPSTREAM_ERROR_PREFIX}: {status}")).with_details(details);
        let encoded = serde_json::to_vec(&error)
            .map_err(|err| PipelineError::Transport(format!("error body encode failed: {err}")))?;
        Ok(TransportResponse::new(status, Cursor::new(encoded)))
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
