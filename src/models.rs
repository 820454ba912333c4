//! Modelos de dominio: páginas del PDF, chunks y resultados de búsqueda.

use serde::{Deserialize, Serialize};

/// Texto extraído de una página del documento fuente.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    /// Número de página (base 1).
    pub page: usize,
    pub text: String,
}

/// Fragmento de texto de una única página; unidad de embedding y recuperación.
///
/// `start..end` es el rango en bytes dentro del texto de la página, de modo que
/// `page.text[start..end] == text`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_index: usize,
    pub page: usize,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Chunk con su vector de embedding, tal y como se persiste en el índice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f64>,
}

/// Resultado de una búsqueda: chunk + similitud coseno con la consulta.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}
