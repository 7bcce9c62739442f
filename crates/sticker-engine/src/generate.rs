use std::sync::atomic::AtomicBool;

use sticker_contracts::modes::GenerationMode;
use sticker_contracts::wire::GenerateRequestBody;

use crate::codec::encode_to_transport;
use crate::error::Result;
use crate::extract::{ContentAccumulator, ImageReference};
use crate::stream::{consume_event_stream, StreamStats};
use crate::transport::{classify_rejection, GenerationTransport};

/// One user-triggered generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub image: Vec<u8>,
    pub mime_type: String,
    pub mode: GenerationMode,
    pub credential: String,
}

impl GenerationRequest {
    /// Inbound wire body; fails when `image` is not a readable picture.
    pub fn to_body(&self) -> Result<GenerateRequestBody> {
        Ok(GenerateRequestBody {
            password: self.credential.clone(),
            image_base64: encode_to_transport(&self.image)?,
            mime_type: self.mime_type.clone(),
            mode: self.mode,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub reference: ImageReference,
    pub stats: StreamStats,
}

/// Sends one request and reads the streamed answer down to an image reference.
///
/// A rejected response fails at once with no retry. Parser and accumulator
/// live only for this call.
pub fn generate(
    transport: &dyn GenerationTransport,
    request: &GenerationRequest,
    cancel: Option<&AtomicBool>,
) -> Result<GenerationOutcome> {
    let body = request.to_body()?;
    let response = transport.submit(&body)?;
    if !response.is_success() {
        let status = response.status;
        return Err(classify_rejection(status, &response.read_text()));
    }

    let mut accumulator = ContentAccumulator::new();
    let stats = consume_event_stream(response.body, &mut accumulator, cancel)?;
    tracing::debug!(
        transport = transport.name(),
        chunks = stats.chunks,
        deltas = stats.deltas,
        malformed = stats.malformed_lines,
        saw_done = stats.saw_done,
        "generation stream consumed"
    );
    let reference = accumulator.finish()?;
    Ok(GenerationOutcome { reference, stats })
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    use sticker_contracts::modes::GenerationMode;
    use sticker_contracts::wire::{delta_line, GenerateRequestBody};

    use super::{generate, GenerationRequest};
    use crate::codec::tests::checker_png;
    use crate::error::{PipelineError, Result};
    use crate::transport::{GenerationTransport, TransportResponse};

    struct ScriptedTransport {
        status: u16,
        body: String,
        seen: Mutex<Vec<GenerateRequestBody>>,
    }

    impl ScriptedTransport {
        fn new(status: u16, body: impl Into<String>) -> Self {
            Self {
                status,
                body: body.into(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl GenerationTransport for ScriptedTransport {
        fn name(&self) -> &str {
            "scripted"
        }

        fn submit(&self, body: &GenerateRequestBody) -> Result<TransportResponse> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(body.clone());
            }
            Ok(TransportResponse::new(
                self.status,
                Cursor::new(self.body.clone().into_bytes()),
            ))
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            image: checker_png(8, 8),
            mime_type: "image/png".to_string(),
            mode: GenerationMode::StickerPack,
            credential: "pw".to_string(),
        }
    }

    #[test]
    fn three_chunk_answer_yields_url_reference() -> anyhow::Result<()> {
        let stream = format!(
            "{}{}data: [DONE]\n",
            delta_line("![a](http"),
            delta_line("://x/y.png)")
        );
        let transport = ScriptedTransport::new(200, stream);
        let outcome = generate(&transport, &request(), None)?;
        assert_eq!(outcome.reference.as_str(), "http://x/y.png");
        assert_eq!(outcome.stats.deltas, 2);

        let seen = transport.seen.lock().map_err(|_| anyhow::anyhow!("poisoned"))?;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].password, "pw");
        assert_eq!(seen[0].mime_type, "image/png");
        assert_eq!(seen[0].mode, GenerationMode::StickerPack);
        Ok(())
    }

    #[test]
    fn rejected_status_fails_without_reading_a_stream() {
        let transport = ScriptedTransport::new(
            503,
            r#"{"error":"Upstream API Error: 503","details":"overloaded"}"#,
        );
        let err = generate(&transport, &request(), None).unwrap_err();
        assert!(matches!(err, PipelineError::Upstream { status: 503, .. }));
    }

    #[test]
    fn unauthorized_status_is_an_auth_error() {
        let transport =
            ScriptedTransport::new(401, r#"{"error":"Unauthorized: Invalid Password"}"#);
        let err = generate(&transport, &request(), None).unwrap_err();
        assert_eq!(err.kind(), "auth");
        assert_eq!(err.to_string(), "Unauthorized: Invalid Password");
    }

    #[test]
    fn empty_stream_is_an_extraction_error() {
        let transport = ScriptedTransport::new(200, "data: [DONE]\n");
        let err = generate(&transport, &request(), None).unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
    }

    #[test]
    fn unreadable_upload_never_reaches_the_transport() {
        let transport = ScriptedTransport::new(200, "");
        let mut bad = request();
        bad.image = b"not a picture".to_vec();
        let err = generate(&transport, &bad, None).unwrap_err();
        assert_eq!(err.kind(), "codec");
        assert!(transport.seen.lock().map(|seen| seen.is_empty()).unwrap_or(false));
    }

    #[test]
    fn cancellation_is_reported() {
        let transport = ScriptedTransport::new(200, delta_line("![a](http://x/y.png)"));
        let cancel = AtomicBool::new(true);
        let err = generate(&transport, &request(), Some(&cancel)).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}
