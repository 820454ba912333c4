//! Índice vectorial de los chunks del SRB, persistido como un único fichero JSON.
//!
//! API pública:
//!   - `VectorIndex::search(&[f64], usize)`
//!   - `save_index(&Path, &VectorIndex)`
//!   - `load_index(&Path, &IndexExpectations) -> LoadOutcome`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::ingest::SplitterConfig;
use crate::models::{IndexedChunk, ScoredChunk};

pub const INDEX_FORMAT_VERSION: u32 = 1;
const INDEX_FILE: &str = "index.json";

/// Metadatos de procedencia del índice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub version: u32,
    pub build_id: Uuid,
    pub built_at: DateTime<Utc>,
    pub source: String,
    pub embedding_model: String,
    pub dimensions: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl IndexManifest {
    pub fn new(
        source: &Path,
        embedding_model: &str,
        dimensions: usize,
        splitter: SplitterConfig,
    ) -> Self {
        Self {
            version: INDEX_FORMAT_VERSION,
            build_id: Uuid::new_v4(),
            built_at: Utc::now(),
            source: source.to_string_lossy().to_string(),
            embedding_model: embedding_model.to_string(),
            dimensions,
            chunk_size: splitter.chunk_size,
            chunk_overlap: splitter.chunk_overlap,
        }
    }
}

/// Lo que el proceso actual espera de un índice persistido para poder reutilizarlo.
#[derive(Debug, Clone, Copy)]
pub struct IndexExpectations<'a> {
    pub embedding_model: &'a str,
    pub splitter: SplitterConfig,
}

/// Motivo por el que un índice persistido no se puede reutilizar.
#[derive(Debug, Error)]
pub enum LoadFailure {
    #[error("no se pudo leer el índice: {0}")]
    Io(#[from] std::io::Error),

    #[error("índice corrupto: {0}")]
    Corrupt(String),

    #[error("versión de formato {found} no soportada (se espera {expected})")]
    UnsupportedVersion { expected: u32, found: u32 },

    #[error("índice construido con el modelo '{found}', pero el configurado es '{expected}'")]
    ModelMismatch { expected: String, found: String },

    #[error(
        "troceado distinto: índice {found_size}/{found_overlap}, configuración {expected_size}/{expected_overlap}"
    )]
    SettingsChanged {
        expected_size: usize,
        expected_overlap: usize,
        found_size: usize,
        found_overlap: usize,
    },

    #[error("el chunk {chunk_index} tiene dimensión {found}, se esperaba {expected}")]
    DimensionMismatch {
        chunk_index: usize,
        expected: usize,
        found: usize,
    },

    #[error("el índice no contiene chunks")]
    Empty,
}

/// Resultado explícito de intentar cargar el índice persistido.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(VectorIndex),
    Missing,
    Failed(LoadFailure),
}

/// Colección inmutable de (chunk, embedding) con búsqueda exacta por coseno.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    manifest: IndexManifest,
    entries: Vec<IndexedChunk>,
}

impl VectorIndex {
    /// Crea el índice comprobando que no está vacío y que todas las
    /// dimensiones coinciden con el manifiesto.
    pub fn new(manifest: IndexManifest, entries: Vec<IndexedChunk>) -> Result<Self, LoadFailure> {
        let index = Self { manifest, entries };
        index.validate()?;
        Ok(index)
    }

    fn validate(&self) -> Result<(), LoadFailure> {
        if self.entries.is_empty() {
            return Err(LoadFailure::Empty);
        }
        for entry in &self.entries {
            if entry.embedding.len() != self.manifest.dimensions {
                return Err(LoadFailure::DimensionMismatch {
                    chunk_index: entry.chunk.chunk_index,
                    expected: self.manifest.dimensions,
                    found: entry.embedding.len(),
                });
            }
        }
        Ok(())
    }

    pub fn manifest(&self) -> &IndexManifest {
        &self.manifest
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Devuelve los `top_k` chunks más similares, de mayor a menor similitud.
    /// Los empates conservan el orden de inserción.
    pub fn search(&self, query: &[f64], top_k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: entry.chunk.clone(),
                score: cosine_similarity(&entry.embedding, query),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        scored
    }
}

fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Persiste el índice en `dir`, sustituyendo de forma atómica el anterior.
pub async fn save_index(dir: &Path, index: &VectorIndex) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("No se pudo crear el directorio del índice {}", dir.display()))?;

    let path = dir.join(INDEX_FILE);
    let tmp_path = dir.join(format!("{INDEX_FILE}.tmp"));
    let data = serde_json::to_vec(index).context("Error serializando el índice")?;

    tokio::fs::write(&tmp_path, data)
        .await
        .with_context(|| format!("Error escribiendo {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, &path)
        .await
        .with_context(|| format!("Error reemplazando {}", path.display()))?;

    info!(
        "Índice guardado en {} ({} chunks, build {}).",
        path.display(),
        index.len(),
        index.manifest.build_id
    );
    Ok(path)
}

/// Intenta cargar el índice persistido. Nunca reconstruye: la decisión es del llamador.
pub async fn load_index(dir: &Path, expected: &IndexExpectations<'_>) -> LoadOutcome {
    let path = dir.join(INDEX_FILE);
    let raw = match tokio::fs::read(&path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LoadOutcome::Missing,
        Err(e) => return LoadOutcome::Failed(e.into()),
    };

    match decode_index(&raw, expected) {
        Ok(index) => LoadOutcome::Loaded(index),
        Err(reason) => LoadOutcome::Failed(reason),
    }
}

fn decode_index(raw: &[u8], expected: &IndexExpectations<'_>) -> Result<VectorIndex, LoadFailure> {
    let index: VectorIndex =
        serde_json::from_slice(raw).map_err(|e| LoadFailure::Corrupt(e.to_string()))?;
    let manifest = &index.manifest;

    if manifest.version != INDEX_FORMAT_VERSION {
        return Err(LoadFailure::UnsupportedVersion {
            expected: INDEX_FORMAT_VERSION,
            found: manifest.version,
        });
    }
    if manifest.embedding_model != expected.embedding_model {
        return Err(LoadFailure::ModelMismatch {
            expected: expected.embedding_model.to_string(),
            found: manifest.embedding_model.clone(),
        });
    }
    if manifest.chunk_size != expected.splitter.chunk_size
        || manifest.chunk_overlap != expected.splitter.chunk_overlap
    {
        return Err(LoadFailure::SettingsChanged {
            expected_size: expected.splitter.chunk_size,
            expected_overlap: expected.splitter.chunk_overlap,
            found_size: manifest.chunk_size,
            found_overlap: manifest.chunk_overlap,
        });
    }

    index.validate()?;
    Ok(index)
}
