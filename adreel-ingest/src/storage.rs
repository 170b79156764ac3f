use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::pipeline::PipelineStage;

/// Shared working directory. Every invocation gets its own [`InvocationScope`]
/// whose file names embed a fresh UUID, so concurrent invocations can share
/// the directory.
#[derive(Debug, Clone)]
pub struct TransientStorage {
    root: PathBuf,
}

impl TransientStorage {
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn begin_invocation(&self) -> InvocationScope {
        InvocationScope::new(self.root.clone(), Uuid::new_v4().simple().to_string())
    }
}

#[derive(Debug)]
struct ScopeState {
    stage: PipelineStage,
    intermediates: Vec<PathBuf>,
    audio: Option<PathBuf>,
    audio_transferred: bool,
}

/// Owns every transient path of one invocation. Paths handed out here are
/// deleted by [`release_intermediates`](Self::release_intermediates) /
/// [`discard`](Self::discard), and as a last resort on drop, except the
/// audio file once it has been transferred to the caller.
#[derive(Debug)]
pub struct InvocationScope {
    id: String,
    root: PathBuf,
    state: Mutex<ScopeState>,
}

impl InvocationScope {
    fn new(root: PathBuf, id: String) -> Self {
        Self {
            id,
            root,
            state: Mutex::new(ScopeState {
                stage: PipelineStage::Resolving,
                intermediates: Vec::new(),
                audio: None,
                audio_transferred: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage(&self) -> PipelineStage {
        self.lock().stage
    }

    pub fn enter(&self, next: PipelineStage) {
        let mut state = self.lock();
        if state.stage == next {
            return;
        }
        debug!(invocation = %self.id, from = %state.stage, to = %next, "stage transition");
        state.stage = next;
    }

    pub fn video_path(&self) -> PathBuf {
        let path = self.root.join(format!("video_{}.mp4", self.id));
        self.track(path)
    }

    pub fn frame_path(&self, timestamp: u32) -> PathBuf {
        let path = self.root.join(format!("frame_{}_{timestamp}.jpg", self.id));
        self.track(path)
    }

    pub fn audio_path(&self, extension: &str) -> PathBuf {
        let path = self.root.join(format!("audio_{}.{extension}", self.id));
        self.lock().audio = Some(path.clone());
        path
    }

    /// Hands the audio file to the caller; it survives every later cleanup.
    pub fn transfer_audio(&self) -> Option<PathBuf> {
        let mut state = self.lock();
        state.audio_transferred = state.audio.is_some();
        state.audio.clone()
    }

    /// Success path: delete the downloaded video and any frame file left
    /// behind.
    pub async fn release_intermediates(&self) {
        let paths = std::mem::take(&mut self.lock().intermediates);
        for path in paths {
            remove_logged(&self.id, &path).await;
        }
    }

    /// Failure path: delete intermediates plus the (partial) audio file.
    pub async fn discard(&self) {
        self.release_intermediates().await;
        let audio = {
            let mut state = self.lock();
            if state.audio_transferred {
                None
            } else {
                state.audio.take()
            }
        };
        if let Some(path) = audio {
            remove_logged(&self.id, &path).await;
        }
    }

    fn track(&self, path: PathBuf) -> PathBuf {
        let mut state = self.lock();
        if !state.intermediates.contains(&path) {
            state.intermediates.push(path.clone());
        }
        path
    }

    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for InvocationScope {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut leftovers = std::mem::take(&mut state.intermediates);
        if !state.audio_transferred {
            leftovers.extend(state.audio.take());
        }
        for path in leftovers {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(invocation = %self.id, path = %path.display(), "removed on drop"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(invocation = %self.id, path = %path.display(), error = %err, "failed to remove transient file")
                }
            }
        }
    }
}

pub(crate) async fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

async fn remove_logged(invocation: &str, path: &Path) {
    if let Err(err) = remove_if_exists(path).await {
        warn!(invocation, path = %path.display(), error = %err, "failed to remove transient file");
    }
}
