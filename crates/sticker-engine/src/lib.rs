pub mod archive;
pub mod codec;
pub mod dryrun;
pub mod error;
pub mod extract;
pub mod gateway;
pub mod generate;
pub mod slicer;
pub mod stream;
pub mod transport;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::DynamicImage;
use serde_json::{json, Map, Value};
use sticker_contracts::events::{self, EventPayload, EventWriter};
use sticker_contracts::grid::GridSpec;

pub use crate::archive::{archive_file_name, pack, single_image_file_name, tile_entry_name, Archive};
pub use crate::codec::{HttpImageFetcher, ImageBytes, ImageFetcher};
pub use crate::dryrun::DryrunTransport;
pub use crate::error::PipelineError;
pub use crate::extract::{extract_image_reference, ContentAccumulator, ImageReference};
pub use crate::gateway::{ChatUpstream, Gateway, GatewayConfig, HttpUpstream};
pub use crate::generate::{generate, GenerationOutcome, GenerationRequest};
pub use crate::slicer::{slice, Tile};
pub use crate::stream::{consume_event_stream, FrameParser, ParserState, StreamEvent, StreamStats};
pub use crate::transport::{GenerationTransport, HttpTransport, TransportResponse};

/// Picks the transport for a run: offline, a deployed gateway, or the
/// in-process gateway configured from the environment.
pub fn select_transport(
    endpoint: Option<&str>,
    dryrun: bool,
    timeout: Option<Duration>,
) -> Result<Box<dyn GenerationTransport>> {
    if dryrun {
        return Ok(Box::new(DryrunTransport));
    }
    if let Some(endpoint) = endpoint.map(str::trim).filter(|value| !value.is_empty()) {
        return Ok(Box::new(HttpTransport::new(endpoint, timeout)?));
    }
    Ok(Box::new(Gateway::from_env(timeout)?))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackResult {
    pub path: PathBuf,
    pub grid: GridSpec,
    pub entry_names: Vec<String>,
    pub bytes: usize,
}

/// One user session: owns the event log and the output directory, and wraps
/// every pipeline action with its events.
pub struct StickerEngine {
    out_dir: PathBuf,
    session_id: String,
    events: EventWriter,
    transport: Option<Box<dyn GenerationTransport>>,
    fetcher: Box<dyn ImageFetcher>,
    generations: u64,
    images_saved: u64,
    archives_created: u64,
}

impl StickerEngine {
    pub fn new(
        out_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        transport: Box<dyn GenerationTransport>,
        fetcher: Box<dyn ImageFetcher>,
    ) -> Result<Self> {
        Self::open(out_dir.into(), events_path.into(), Some(transport), fetcher)
    }

    /// A session that only slices and saves existing images; `generate` fails.
    pub fn without_transport(
        out_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        fetcher: Box<dyn ImageFetcher>,
    ) -> Result<Self> {
        Self::open(out_dir.into(), events_path.into(), None, fetcher)
    }

    fn open(
        out_dir: PathBuf,
        events_path: PathBuf,
        transport: Option<Box<dyn GenerationTransport>>,
        fetcher: Box<dyn ImageFetcher>,
    ) -> Result<Self> {
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;
        let session_id = format!("session-{}", uuid::Uuid::new_v4().simple());
        let events = EventWriter::new(events_path, session_id.clone());

        events.emit(
            events::SESSION_STARTED,
            map_object(json!({
                "out_dir": out_dir.to_string_lossy().to_string(),
                "transport": transport.as_ref().map(|transport| transport.name()),
            })),
        )?;

        Ok(Self {
            out_dir,
            session_id,
            events,
            transport,
            fetcher,
            generations: 0,
            images_saved: 0,
            archives_created: 0,
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transport_name(&self) -> Option<&str> {
        self.transport.as_ref().map(|transport| transport.name())
    }

    pub fn emit_event(&self, event_type: &str, payload: EventPayload) -> Result<Value> {
        self.events.emit(event_type, payload)
    }

    pub fn event_writer(&self) -> EventWriter {
        self.events.clone()
    }

    pub fn generate(
        &mut self,
        request: &GenerationRequest,
        cancel: Option<&AtomicBool>,
    ) -> Result<GenerationOutcome> {
        self.events.emit(
            events::GENERATION_STARTED,
            map_object(json!({
                "mode": request.mode.as_str(),
                "mime_type": request.mime_type,
                "image_bytes": request.image.len(),
                "transport": self.transport_name(),
            })),
        )?;

        let started = Instant::now();
        let result = match self.transport.as_deref() {
            Some(transport) => generate(transport, request, cancel),
            None => Err(PipelineError::Transport(
                "session was opened without a generation transport".to_string(),
            )),
        };
        match result {
            Ok(outcome) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                self.generations += 1;
                self.events.emit(
                    events::GENERATION_FINISHED,
                    map_object(json!({
                        "mode": request.mode.as_str(),
                        "reference_kind": outcome.reference.kind(),
                        "chunks": outcome.stats.chunks,
                        "deltas": outcome.stats.deltas,
                        "malformed_lines": outcome.stats.malformed_lines,
                        "saw_done": outcome.stats.saw_done,
                        "latency_ms": latency_ms,
                    })),
                )?;
                tracing::info!(
                    mode = %request.mode,
                    kind = outcome.reference.kind(),
                    latency_ms,
                    "generation finished"
                );
                Ok(outcome)
            }
            Err(err) => {
                self.record_failure(events::GENERATION_FAILED, "generate", &err)?;
                Err(err.into())
            }
        }
    }

    /// Saves the raw image behind `reference` as `fox-sticker-sheet-{ms}.{ext}`.
    pub fn download_single(&mut self, reference: &ImageReference, dir: Option<&Path>) -> Result<PathBuf> {
        let image = match codec::reference_bytes(reference, self.fetcher.as_ref()) {
            Ok(image) => image,
            Err(err) => {
                self.record_failure(events::ACTION_FAILED, "download", &err)?;
                return Err(err.into());
            }
        };
        let mime = image
            .mime_type
            .as_deref()
            .or_else(|| codec::sniff_mime(&image.bytes));
        let file_name = single_image_file_name(now_ms(), codec::extension_for_mime(mime));
        let path = self.target_dir(dir)?.join(file_name);
        fs::write(&path, &image.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;

        self.images_saved += 1;
        self.events.emit(
            events::IMAGE_SAVED,
            map_object(json!({
                "path": path.to_string_lossy().to_string(),
                "reference_kind": reference.kind(),
                "bytes": image.bytes.len(),
            })),
        )?;
        tracing::info!(path = %path.display(), "image saved");
        Ok(path)
    }

    /// Decodes the generated sheet, cuts it into tiles and writes one zip.
    pub fn slice_and_pack(
        &mut self,
        reference: &ImageReference,
        grid: GridSpec,
        dir: Option<&Path>,
    ) -> Result<PackResult> {
        let decoded = codec::decode_from_reference(reference, self.fetcher.as_ref());
        self.pack_decoded(decoded, grid, dir)
    }

    /// Same as [`Self::slice_and_pack`] for a sheet already saved on disk.
    pub fn slice_file_and_pack(
        &mut self,
        image_path: &Path,
        grid: GridSpec,
        dir: Option<&Path>,
    ) -> Result<PackResult> {
        let raw = fs::read(image_path)
            .with_context(|| format!("failed to read {}", image_path.display()))?;
        let decoded = image::load_from_memory(&raw).map_err(PipelineError::from);
        self.pack_decoded(decoded, grid, dir)
    }

    pub fn finish(&mut self) -> Result<()> {
        self.events.emit(
            events::SESSION_FINISHED,
            map_object(json!({
                "generations": self.generations,
                "images_saved": self.images_saved,
                "archives_created": self.archives_created,
            })),
        )?;
        Ok(())
    }

    fn pack_decoded(
        &mut self,
        decoded: error::Result<DynamicImage>,
        grid: GridSpec,
        dir: Option<&Path>,
    ) -> Result<PackResult> {
        let archive = match decoded.and_then(|image| slice(&image, grid)).and_then(|tiles| pack(&tiles)) {
            Ok(archive) => archive,
            Err(err) => {
                self.record_failure(events::ACTION_FAILED, "zip", &err)?;
                return Err(err.into());
            }
        };

        let path = self.target_dir(dir)?.join(archive_file_name(now_ms()));
        fs::write(&path, &archive.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;

        self.archives_created += 1;
        self.events.emit(
            events::ARCHIVE_CREATED,
            map_object(json!({
                "path": path.to_string_lossy().to_string(),
                "grid": grid.to_string(),
                "entries": archive.entry_names.len(),
                "bytes": archive.bytes.len(),
            })),
        )?;
        tracing::info!(path = %path.display(), grid = %grid, entries = archive.entry_names.len(), "archive created");

        Ok(PackResult {
            path,
            grid,
            bytes: archive.bytes.len(),
            entry_names: archive.entry_names,
        })
    }

    fn target_dir(&self, dir: Option<&Path>) -> Result<PathBuf> {
        let target = dir.map(Path::to_path_buf).unwrap_or_else(|| self.out_dir.clone());
        fs::create_dir_all(&target)
            .with_context(|| format!("failed to create {}", target.display()))?;
        Ok(target)
    }

    fn record_failure(&self, event_type: &str, action: &str, err: &PipelineError) -> Result<()> {
        tracing::warn!(action, kind = err.kind(), error = %err, "action failed");
        self.events.emit(
            event_type,
            map_object(json!({
                "action": action,
                "error_kind": err.kind(),
                "error": err.to_string(),
            })),
        )?;
        Ok(())
    }
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
