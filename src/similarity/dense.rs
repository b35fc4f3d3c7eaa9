//! Dense embedding similarity via fastembed.
//!
//! Highest-preference backend. Loading pulls an ONNX runtime and may
//! download model weights on first use, so the whole module sits behind
//! the `dense-embeddings` feature and load failures fall back to TF-IDF
//! at selection time.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Mutex;

use super::{clamp_unit, cosine, SimilarityBackend};
use crate::error::{Error, Result};

const EMBEDDING_VERSION: &str = "all-minilm-l6-v2";

/// Neural embedding backend; one immutable model per process.
pub struct DenseEmbeddingBackend {
    model: Mutex<TextEmbedding>,
}

impl DenseEmbeddingBackend {
    /// Load the embedding model. Errors here are selection-time signals,
    /// not runtime failures.
    pub fn load() -> Result<Self> {
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(false),
        )
        .map_err(|e| Error::Similarity(format!("embedding model load failed: {}", e)))?;

        Ok(Self {
            model: Mutex::new(model),
        })
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut model = self
            .model
            .lock()
            .map_err(|e| Error::Similarity(format!("model lock poisoned: {}", e)))?;
        let mut vectors = model
            .embed(vec![text], None)
            .map_err(|e| Error::Similarity(format!("embedding failed: {}", e)))?;
        vectors
            .pop()
            .ok_or_else(|| Error::Similarity("embedding produced no vector".to_string()))
    }
}

impl SimilarityBackend for DenseEmbeddingBackend {
    fn name(&self) -> &'static str {
        "dense-embeddings"
    }

    fn similarity(&self, a: &str, b: &str) -> Result<f64> {
        let vec_a = self.embed_one(a)?;
        let vec_b = self.embed_one(b)?;
        Ok(clamp_unit(cosine(&vec_a, &vec_b)))
    }

    fn embed(&self, text: &str) -> Result<Option<Vec<f32>>> {
        self.embed_one(text).map(Some)
    }

    fn embedding_version(&self) -> Option<&str> {
        Some(EMBEDDING_VERSION)
    }
}
