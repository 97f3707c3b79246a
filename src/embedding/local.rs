//! In-process embedding via fastembed (bundled ONNX Runtime).
//!
//! The model is downloaded from Hugging Face on first use, cached, and kept
//! in memory for the life of the process. Inference is CPU-bound, so it runs
//! on the blocking thread pool.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::EmbeddingError;

const DEFAULT_MODEL: &str = "all-minilm-l6-v2";

pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
    loaded: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
}

impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let model = config_to_fastembed_model(&model_name)?;

        let native = native_dims(&model_name);
        if native != config.dims {
            return Err(EmbeddingError::Dimension {
                expected: config.dims,
                actual: native,
            });
        }

        Ok(Self {
            model_name,
            model,
            dims: config.dims,
            batch_size: config.batch_size,
            loaded: Arc::new(Mutex::new(None)),
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let loaded = Arc::clone(&self.loaded);
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| EmbeddingError::Provider("local model lock poisoned".into()))?;

            if guard.is_none() {
                tracing::info!(model = ?model, "loading local embedding model");
                let embedding = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(true),
                )
                .map_err(|e| {
                    EmbeddingError::Provider(format!(
                        "Failed to initialize local embedding model: {e}"
                    ))
                })?;
                *guard = Some(embedding);
            }

            let Some(embedding) = guard.as_mut() else {
                return Err(EmbeddingError::Provider("local model not loaded".into()));
            };
            embedding
                .embed(texts, Some(batch_size))
                .map_err(|e| EmbeddingError::Provider(format!("Local embedding failed: {e}")))
        })
        .await
        .map_err(|e| EmbeddingError::Provider(format!("embedding task failed: {e}")))?
    }
}

fn native_dims(model_name: &str) -> usize {
    match model_name {
        "bge-base-en-v1.5" | "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-base" => 768,
        "bge-large-en-v1.5" | "multilingual-e5-large" => 1024,
        _ => 384,
    }
}

fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => Err(EmbeddingError::Provider(format!(
            "Unknown local embedding model: '{other}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1, nomic-embed-text-v1.5, \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large"
        ))),
    }
}
