//! Transcript artifacts.
//!
//! The response surface truncates long debates; the transcript artifact
//! always carries the full history. Rendering to human-readable formats
//! happens outside this crate - the artifact is plain JSON.

use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::deliberation::types::DeliberationResult;
use crate::error::{Error, Result};

/// Writes full deliberation histories as JSON artifacts.
#[derive(Debug, Clone)]
pub struct TranscriptWriter {
    dir: PathBuf,
}

impl TranscriptWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// A writer rooted in the system temp directory.
    pub fn in_temp() -> Self {
        Self::new(std::env::temp_dir().join("counsel-transcripts"))
    }

    /// Allocate an artifact name for a new deliberation.
    pub fn allocate_ref(&self) -> String {
        format!("transcript-{}.json", Uuid::new_v4())
    }

    /// Write the untruncated result under `transcript_ref`. Returns the
    /// artifact path.
    pub fn write(&self, transcript_ref: &str, result: &DeliberationResult) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Config(format!(
                "failed to create transcript directory '{}': {}",
                self.dir.display(),
                e
            ))
        })?;

        let path = self.dir.join(transcript_ref);
        let payload = serde_json::to_string_pretty(result)?;
        fs::write(&path, payload).map_err(|e| {
            Error::Config(format!(
                "failed to write transcript '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(path)
    }

    /// Read a previously written transcript.
    pub fn read(&self, transcript_ref: &str) -> Result<DeliberationResult> {
        let path = self.dir.join(transcript_ref);
        let payload = fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!(
                "failed to read transcript '{}': {}",
                path.display(),
                e
            ))
        })?;
        Ok(serde_json::from_str(&payload)?)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
