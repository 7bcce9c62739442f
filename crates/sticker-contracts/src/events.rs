//! Session event log.
//!
//! Every user session appends one JSON object per line to `events.jsonl`.
//! Lines carry `type`, `session_id` and `ts`; the event payload is merged on
//! top, so a payload key wins over a default of the same name.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

pub const SESSION_STARTED: &str = "session_started";
pub const SESSION_FINISHED: &str = "session_finished";
pub const UPLOAD_SELECTED: &str = "upload_selected";
pub const GENERATION_STARTED: &str = "generation_started";
pub const GENERATION_FINISHED: &str = "generation_finished";
pub const GENERATION_FAILED: &str = "generation_failed";
pub const ACTION_FAILED: &str = "action_failed";
pub const IMAGE_SAVED: &str = "image_saved";
pub const ARCHIVE_CREATED: &str = "archive_created";

/// Cheap to clone; clones share one file handle.
#[derive(Debug, Clone)]
pub struct EventWriter {
    shared: Arc<SessionLog>,
}

#[derive(Debug)]
struct SessionLog {
    path: PathBuf,
    session_id: String,
    file: Mutex<Option<File>>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            shared: Arc::new(SessionLog {
                path: path.into(),
                session_id: session_id.into(),
                file: Mutex::new(None),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    /// Appends one event and returns the object that was written.
    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut record = EventPayload::new();
        record.insert("type".to_string(), Value::from(event_type));
        record.insert(
            "session_id".to_string(),
            Value::from(self.shared.session_id.as_str()),
        );
        record.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        record.extend(payload);

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut slot = self
            .shared
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("event log lock poisoned"))?;
        if slot.is_none() {
            *slot = Some(self.open_log()?);
        }
        if let Some(file) = slot.as_mut() {
            file.write_all(&line)
                .with_context(|| format!("failed to append to {}", self.shared.path.display()))?;
        }

        Ok(Value::Object(record))
    }

    /// Every event written so far, oldest first. Unparseable lines are skipped.
    pub fn read_events(&self) -> anyhow::Result<Vec<Value>> {
        let raw = match fs::read_to_string(&self.shared.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<Value>(line).ok())
            .collect())
    }

    pub fn recorded_types(&self) -> anyhow::Result<Vec<String>> {
        Ok(self
            .read_events()?
            .iter()
            .filter_map(|event| event.get("type").and_then(Value::as_str))
            .map(str::to_string)
            .collect())
    }

    fn open_log(&self) -> anyhow::Result<File> {
        if let Some(parent) = self.shared.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.shared.path)
            .with_context(|| format!("failed to open {}", self.shared.path.display()))
    }
}
