use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use sticker_contracts::wire::{ErrorBody, GenerateRequestBody, GENERATE_PATH};

use crate::error::{truncate_text, PipelineError, Result};

const ERROR_BODY_MAX_CHARS: usize = 2_000;
const MISCONFIGURED_PREFIX: &str = "Server misconfigured";
/// Leading text of a gateway body that relays an upstream model rejection.
pub const UPSTREAM_ERROR_PREFIX: &str = "Upstream API Error";

/// Response head plus the still-unread body stream.
pub struct TransportResponse {
    pub status: u16,
    pub body: Box<dyn Read + Send>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Read + Send + 'static) -> Self {
        Self {
            status,
            body: Box::new(body),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drains the body of a rejected response into text.
    pub fn read_text(mut self) -> String {
        let mut raw = Vec::new();
        if let Err(err) = self.body.read_to_end(&mut raw) {
            tracing::debug!(error = %err, "rejected response body unreadable");
        }
        String::from_utf8_lossy(&raw).into_owned()
    }
}

/// Delivers one generation request and hands back the streamed answer.
pub trait GenerationTransport: Send + Sync {
    fn name(&self) -> &str;
    fn submit(&self, body: &GenerateRequestBody) -> Result<TransportResponse>;
}

/// Blocking client with no request timeout unless one is given.
pub fn build_http_client(timeout: Option<Duration>) -> Result<HttpClient> {
    HttpClient::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| PipelineError::Transport(format!("http client setup failed: {err}")))
}

/// Maps a rejected response onto the matching error kind.
///
/// `{"error": ...}` bodies are unwrapped; `details` is appended when present.
/// A relayed upstream rejection stays `Upstream` whatever its status, so a bad
/// model key is never mistaken for a bad user password.
pub fn classify_rejection(status: u16, body: &str) -> PipelineError {
    let parsed = ErrorBody::parse(body);
    let relayed = parsed
        .as_ref()
        .is_some_and(|parsed| parsed.error.starts_with(UPSTREAM_ERROR_PREFIX));
    let message = match parsed {
        Some(ErrorBody {
            error,
            details: Some(details),
        }) if !details.trim().is_empty() => format!("{error}: {}", details.trim()),
        Some(ErrorBody { error, .. }) => error,
        None if body.trim().is_empty() => format!("request failed with status {status}"),
        None => body.trim().to_string(),
    };
    let message = truncate_text(&message, ERROR_BODY_MAX_CHARS);

    match status {
        _ if relayed => PipelineError::Upstream {
            status,
            body: message,
        },
        401 => PipelineError::Auth(message),
        500 if message.starts_with(MISCONFIGURED_PREFIX) => PipelineError::ServerConfig(message),
        _ => PipelineError::Upstream {
            status,
            body: message,
        },
    }
}

/// Posts to a deployed gateway at `{endpoint}/api/generate`.
pub struct HttpTransport {
    url: String,
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(endpoint: &str, timeout: Option<Duration>) -> Result<Self> {
        Ok(Self {
            url: generate_url(endpoint),
            http: build_http_client(timeout)?,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl GenerationTransport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    fn submit(&self, body: &GenerateRequestBody) -> Result<TransportResponse> {
        let response = self
            .http
            .post(&self.url)
            .json(body)
            .send()
            .map_err(|err| PipelineError::Transport(format!("request failed ({}): {err}", self.url)))?;
        let status = response.status().as_u16();
        Ok(TransportResponse::new(status, response))
    }
}

fn generate_url(endpoint: &str) -> String {
    let base = endpoint.trim().trim_end_matches('/');
    if base.ends_with(GENERATE_PATH) {
        base.to_string()
    } else {
        format!("{base}{GENERATE_PATH}")
    }
}
