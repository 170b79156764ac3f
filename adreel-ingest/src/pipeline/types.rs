use std::fmt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tokio::fs;

pub const JPEG_MIME_TYPE: &str = "image/jpeg";

/// Linear state machine of one invocation. `Failed` is reachable from any
/// other state; no state is entered twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Resolving,
    Downloading,
    Probing,
    Sampling,
    ExtractingFrames,
    ExtractingAudio,
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PipelineStage::Resolving => "resolving",
            PipelineStage::Downloading => "downloading",
            PipelineStage::Probing => "probing",
            PipelineStage::Sampling => "sampling",
            PipelineStage::ExtractingFrames => "extracting_frames",
            PipelineStage::ExtractingAudio => "extracting_audio",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRequest {
    pub reference: String,
    pub timestamps: Option<Vec<u32>>,
}

impl ExtractionRequest {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            timestamps: None,
        }
    }

    pub fn with_timestamps(mut self, timestamps: Vec<u32>) -> Self {
        self.timestamps = Some(timestamps);
        self
    }
}

/// A captured still. The payload is kept raw and serialised as base64.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct Frame {
    pub timestamp: u32,
    #[serde(rename = "image_base64", serialize_with = "serialize_base64")]
    pub data: Vec<u8>,
    pub mime_type: &'static str,
}

impl Frame {
    pub fn jpeg(timestamp: u32, data: Vec<u8>) -> Self {
        Self {
            timestamp,
            data,
            mime_type: JPEG_MIME_TYPE,
        }
    }

    pub fn base64(&self) -> String {
        BASE64.encode(&self.data)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("timestamp", &self.timestamp)
            .field("bytes", &self.data.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

fn serialize_base64<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(data))
}

/// Extracted audio. The caller owns the file and must delete it after use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioTrack {
    pub path: PathBuf,
}

impl AudioTrack {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(self) -> std::io::Result<()> {
        match fs::remove_file(&self.path).await {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub invocation_id: String,
    pub frames: Vec<Frame>,
    pub audio: AudioTrack,
    pub duration_seconds: f64,
    pub duration_estimated: bool,
    pub format_name: Option<String>,
    pub strategy: &'static str,
    pub completed_at: DateTime<Utc>,
}
